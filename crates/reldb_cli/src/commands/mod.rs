//! CLI command implementations.

pub mod exec;
pub mod output;
pub mod script;
pub mod tutorial;

/// Store every command runs against; each run starts empty.
pub const STORE_URL: &str = "sqlite+pysqlite:///:memory:";
