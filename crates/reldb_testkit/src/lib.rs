//! # RelDB Testkit
//!
//! Test utilities for RelDB.
//!
//! This crate provides:
//! - Engines preloaded with the `some_table`, `user_account` and `address`
//!   layouts used throughout the test suites
//! - `User`/`Address` entities with a ready-made registry
//! - Property-based test generators using proptest
//!
//! ## Usage
//!
//! ```
//! use reldb_testkit::prelude::*;
//!
//! let store = TestStore::with_points(&[(1, 1), (2, 4)]);
//! let mut conn = store.connect().unwrap();
//! assert_eq!(points(&mut conn, "SELECT x, y FROM some_table", ()), vec![(1, 1), (2, 4)]);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod fixtures;
pub mod generators;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::fixtures::*;
    pub use crate::generators::*;
}

pub use fixtures::*;
pub use generators::*;
