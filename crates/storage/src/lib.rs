//! Rule store backends: PostgreSQL and YAML rule files.

pub mod error;
pub mod loader;
pub mod postgres;
mod watcher;

pub use error::{LoadResult, LoadStatus, LoaderError};
pub use loader::RuleFileLoader;
pub use postgres::PgRuleStore;
