//! Core library components.
//!
//! Repository scanning, credential macro search, the crypt backends and the
//! transactional writer that together implement a rotation run.

pub mod config;
pub mod constants;
pub mod creds_macro;
pub mod crypt;
pub mod document;
pub mod domain;
pub mod engine;
pub mod payload;
pub mod pool;
pub mod rotate;
pub mod scanner;
pub mod search;
pub mod writer;
