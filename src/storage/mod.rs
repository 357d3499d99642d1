//! Persistence: snapshot state store and uploaded-file storage.
//!
//! The state store is the single source of truth for entities; the
//! file storage holds raw uploaded CSV bytes referenced by
//! `CsvUpload` records.

pub mod files;
pub mod store;

pub use files::FileStorage;
pub use store::{FileStateStore, InMemoryStateStore, StateStore, StoreError};
