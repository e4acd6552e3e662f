//! cs-core: shared types, IDs, errors, configuration, and the media-cutting
//! data model.
//!
//! Every other cs-* crate depends on this one for its identifiers, the
//! unified [`Error`] type, the JSON [`config::Config`], and the records that
//! are persisted or tracked in memory (media files, projects, operations,
//! downloads).

pub mod chapters;
pub mod config;
pub mod error;
pub mod ids;
pub mod models;

// Re-export the most commonly used items at the crate root.
pub use error::{Error, ErrorKind, Result};
pub use ids::*;
pub use models::*;
