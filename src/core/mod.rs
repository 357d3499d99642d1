//! Core domain logic.
//!
//! - [`error`] - the structured error type and exit codes
//! - [`model`] - domain entities and the persisted state snapshot
//! - [`reconcile`] - partial-update merging for the survey tree
//! - [`access`] - organization gating and answer validation
//! - [`auth`] - password digests and session tokens
//! - [`registry`] - the application service behind HTTP and CLI

pub mod access;
pub mod auth;
pub mod error;
pub mod model;
pub mod reconcile;
pub mod registry;

pub use error::{CanvassError, ErrorCategory, ExitCode, Result};
pub use registry::{Registry, RegistryConfig};
