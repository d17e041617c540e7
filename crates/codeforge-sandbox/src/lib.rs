//! Sandboxed execution of generated code.
//!
//! The sandbox runs an in-memory source payload plus auxiliary files in a
//! freshly provisioned working directory, under a wall-clock timeout, with
//! captured stdout/stderr/exit code. Child-level failures (spawn errors,
//! timeouts) are reported as synthetic [`ExecutionResult`]s rather than
//! errors, so callers always get the stable four-field contract back.
//!
//! One sandbox instance belongs to one workflow. Concurrent use of a
//! single instance by multiple workflows is not supported; allocate one
//! sandbox per workflow or serialize access.
//!
//! # Security
//!
//! All execution is argv-style via [`CommandSpec`]: no shell string
//! evaluation, ever. The child environment is cleared and rebuilt from an
//! explicit passlist plus caller-provided overrides.

mod classify;
mod command_spec;
mod sandbox;

pub use classify::{FailureKind, classify_failure, classify_stderr};
pub use command_spec::CommandSpec;
pub use sandbox::{
    ExecutionResult, Sandbox, SandboxConfig, TIMEOUT_MARKER, TIMEOUT_RETURN_CODE,
};
