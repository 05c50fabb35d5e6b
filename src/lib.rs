//! Cinema showtime synchronization: stage the upstream snapshot, reconcile it
//! into the canonical show table, and serve paginated queries over HTTP.

pub mod api;
pub mod chunk;
pub mod config;
pub mod error;
pub mod logging;
pub mod model;
pub mod query;
pub mod reconcile;
pub mod source;
pub mod staging;
pub mod store;
pub mod sync;

pub mod util {
    pub mod env;
}

pub use error::{ConfigError, QueryError, StoreError, SyncError};
