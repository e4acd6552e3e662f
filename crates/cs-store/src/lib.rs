//! cs-store: file-based persistence for cutsmith.
//!
//! Every record is one JSON file addressed by id, rewritten whole on each
//! mutation. Operations are intentionally absent: they live in memory only.

pub mod layout;
pub mod queries;
pub mod records;

pub use layout::{move_file, Store};
