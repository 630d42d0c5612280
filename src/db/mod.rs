//! Database connectivity for catalog introspection
//!
//! Only read-only catalog queries go through these pools. Query execution is
//! left to the caller.

pub mod connection;

pub use connection::{init_pool, DbPool};
