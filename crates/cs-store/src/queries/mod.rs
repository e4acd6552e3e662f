//! Record operations per entity.

pub mod downloads;
pub mod projects;
pub mod videos;
