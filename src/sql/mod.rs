pub mod builder;
pub mod dialect;
pub mod guard;

pub use builder::{build, BuiltQuery, SqlBuilder};
pub use dialect::SqlDialect;
pub use guard::ensure_single_select;
