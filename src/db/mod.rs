//! Database module: storage models and SQL repositories.
//!
//! - `model`: typed values stored in or returned from the tables.
//! - `repo`: SQL-only functions over the pool.
//!
//! The repository API is re-exported at `crate::db::*`.

pub mod model;
pub mod repo;

pub use model::{ChannelKind, Contributor};
pub use repo::*;
