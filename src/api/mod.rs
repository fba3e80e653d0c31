//! Read-only HTTP query surface over realms, auction files and records.

pub mod routes;

pub use routes::{router, ApiState};
