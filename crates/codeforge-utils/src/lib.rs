//! Foundation utilities shared by every codeforge crate.
//!
//! This crate deliberately has no dependency on the rest of the workspace:
//! it holds the error taxonomy, the core workflow vocabulary, and the
//! logging setup so that downstream crates can agree on them without
//! circular dependencies.

pub mod error;
pub mod logging;
pub mod types;

pub use error::CodeforgeError;
pub use types::PhaseType;
