//! Route handlers for the HTTP API.

pub mod downloads;
pub mod health;
pub mod operations;
pub mod outputs;
pub mod projects;
pub mod system;
pub mod videos;
