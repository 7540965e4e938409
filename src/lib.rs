//! credrot - Credential rotation for environment configuration repositories.
//!
//! # Architecture
//!
//! ```text
//! src/
//! ├── cli/              # Command-line interface
//! │   ├── rotate        # Full rotation run
//! │   ├── scan          # Show classified files
//! │   ├── crypt         # decrypt / encrypt / extract helpers
//! │   └── completions   # Shell completions
//! └── core/             # Core library components
//!     ├── config        # Repository settings, workspace, key material
//!     ├── crypt/        # Encryption backends
//!     │   ├── mod       # Crypt trait and backend selection
//!     │   ├── fernet    # Per-field Fernet tokens
//!     │   ├── sops      # sops CLI with age keys
//!     │   └── plain     # Crypt disabled
//!     ├── scanner       # Repository walk and credential loading
//!     ├── creds_macro   # ${creds.get("id").field} parsing
//!     ├── search        # Impact search across entity files
//!     ├── engine        # Request planning
//!     ├── writer        # Transactional multi-file commit
//!     └── rotate        # One rotation run end to end
//! ```
//!
//! # Features
//!
//! - Finds every parameter referencing a rotated credential field
//! - Updates every shared and environment credential file defining it
//! - All-or-nothing writes with rollback to the original bytes
//! - sops/age and Fernet credential encryption

pub mod cli;
pub mod core;
pub mod error;
