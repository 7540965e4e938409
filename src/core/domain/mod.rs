//! Domain types.

mod credential;
mod report;
mod request;

pub use credential::{CredentialFile, Field, PendingCredentialUpdate, PendingUpdates, Scope};
pub use report::{AffectedParameter, RotationResult, TargetParameter};
pub use request::{Context, RotationRequest};
