//! Benchmark utilities.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use reldb_core::{Engine, Params};
use reldb_testkit::{point_params, POINTS_DDL};

/// Generate `count` deterministic `(x, y)` points.
pub fn generate_points(count: usize) -> Vec<(i64, i64)> {
    (0..count as i64).map(|i| (i, (i * 7919) % 1000)).collect()
}

/// Generate one parameter set per point.
pub fn point_batch(count: usize) -> Vec<Params> {
    generate_points(count)
        .into_iter()
        .map(|(x, y)| reldb_core::params! { "x" => x, "y" => y })
        .collect()
}

/// An engine whose `some_table` holds `count` committed points.
pub fn populated_engine(count: usize) -> Engine {
    let engine = Engine::in_memory();
    let mut conn = engine.connect().expect("Failed to connect");
    conn.execute(POINTS_DDL, ()).expect("Failed to create some_table");
    if count > 0 {
        conn.execute(
            "INSERT INTO some_table (x, y) VALUES (:x, :y)",
            point_params(&generate_points(count)),
        )
        .expect("Failed to insert points");
    }
    conn.commit().expect("Failed to commit points");
    engine
}
