//! canvass: survey authoring and CSV analytics backend.
//!
//! A single binary exposes two surfaces over one registry:
//!
//! - an HTTP API ([`server`]) for registration, login, survey CRUD with
//!   nested partial updates, organization-gated public reads, response
//!   submission, CSV uploads, chart-ready plot data, group-by counts,
//!   and PDF export of saved analyses
//! - a CLI ([`cli`]) for serving and for operator tasks such as
//!   managing organizations and clearing state
//!
//! State is one JSON snapshot behind [`storage::StateStore`], so every
//! multi-entity operation commits atomically. Uploaded CSV files live
//! beside the snapshot under per-user directories.

pub mod analytics;
pub mod cli;
pub mod core;
pub mod server;
pub mod storage;
