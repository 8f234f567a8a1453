//! Database module: row models and SQL repositories.
//!
//! - `model`: input/view structs specific to the SQL layer.
//! - `repo`: SQL-only functions that map rows into domain entities.
//!
//! Callers outside the store go through [`crate::store::Store`]; the repository
//! API is re-exported here for the store implementation and the admin CLI.

pub mod model;
pub mod repo;

pub use repo::*;

pub use model::NewSubject;
