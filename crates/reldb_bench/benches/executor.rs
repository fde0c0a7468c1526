//! Statement executor benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reldb_bench::{point_batch, populated_engine};
use reldb_core::{params, Engine};
use reldb_testkit::POINTS_DDL;

/// Benchmark parsing statements of growing complexity.
fn bench_parse(c: &mut Criterion) {
    let mut group = c.benchmark_group("parse");

    group.bench_function("select_simple", |b| {
        b.iter(|| reldb_sql::parse(black_box("SELECT x, y FROM some_table")).unwrap());
    });

    group.bench_function("select_filtered", |b| {
        let sql = "SELECT x, y FROM some_table WHERE y > :y AND x <> :x ORDER BY x DESC, y LIMIT 10";
        b.iter(|| reldb_sql::parse(black_box(sql)).unwrap());
    });

    group.bench_function("create_table", |b| {
        let sql = "CREATE TABLE address (id INTEGER PRIMARY KEY, \
                   user_id INTEGER NOT NULL REFERENCES user_account (id), \
                   email_address VARCHAR NOT NULL)";
        b.iter(|| reldb_sql::parse(black_box(sql)).unwrap());
    });

    group.finish();
}

/// Benchmark batched inserts committed as one transaction.
fn bench_batch_insert(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_insert");

    for batch_size in [10, 100, 1000].iter() {
        group.throughput(Throughput::Elements(*batch_size as u64));
        group.bench_with_input(
            BenchmarkId::from_parameter(batch_size),
            batch_size,
            |b, &batch_size| {
                let batch = point_batch(batch_size);
                b.iter(|| {
                    let engine = Engine::in_memory();
                    engine
                        .transaction(|conn| {
                            conn.execute(POINTS_DDL, ())?;
                            conn.execute_many(
                                "INSERT INTO some_table (x, y) VALUES (:x, :y)",
                                black_box(batch.clone()),
                            )
                        })
                        .unwrap();
                });
            },
        );
    }
    group.finish();
}

/// Benchmark filtered reads against populated tables.
fn bench_filtered_select(c: &mut Criterion) {
    let mut group = c.benchmark_group("filtered_select");

    for rows in [100, 1000, 10000].iter() {
        group.throughput(Throughput::Elements(*rows as u64));
        group.bench_with_input(BenchmarkId::from_parameter(rows), rows, |b, &rows| {
            let engine = populated_engine(rows);
            let mut conn = engine.connect().unwrap();
            b.iter(|| {
                let result = conn
                    .execute(
                        "SELECT x, y FROM some_table WHERE y > :y",
                        params! { "y" => black_box(500) },
                    )
                    .unwrap();
                black_box(result.count());
            });
        });
    }
    group.finish();
}

/// Benchmark the cost of an empty begin/commit and of an update commit.
fn bench_transaction_overhead(c: &mut Criterion) {
    let mut group = c.benchmark_group("transaction_overhead");

    group.bench_function("empty", |b| {
        let engine = populated_engine(0);
        b.iter(|| {
            let scope = engine.begin().unwrap();
            scope.commit().unwrap();
        });
    });

    group.bench_function("update_one", |b| {
        let engine = populated_engine(1000);
        let mut y = 0i64;
        b.iter(|| {
            y += 1;
            engine
                .transaction(|conn| {
                    conn.execute(
                        "UPDATE some_table SET y = :y WHERE x = :x",
                        params! { "x" => 9, "y" => black_box(y) },
                    )
                })
                .unwrap();
        });
    });

    group.finish();
}

criterion_group!(
    benches,
    bench_parse,
    bench_batch_insert,
    bench_filtered_select,
    bench_transaction_overhead,
);

criterion_main!(benches);
