//! fix-core - shared logic for the script fixer.
//!
//! Data model, configuration, prompt assembly, log inspection and
//! version-chain allocation used by `fixd` and `fixctl`.

pub mod config;
pub mod inspect;
pub mod prompt;
pub mod samples;
pub mod types;
pub mod versioning;

pub use config::Config;
pub use types::*;
