//! Entity mapper benchmarks.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use reldb_orm::{col, EntityRef};
use reldb_testkit::{Address, TestStore, User};

/// Benchmark flushing new users, each with two addresses.
fn bench_flush_graph(c: &mut Criterion) {
    let mut group = c.benchmark_group("flush_graph");

    for users in [10, 100].iter() {
        group.throughput(Throughput::Elements(*users as u64));
        group.bench_with_input(BenchmarkId::from_parameter(users), users, |b, &users| {
            b.iter(|| {
                let store = TestStore::users();
                let mut session = store.session();
                for i in 0..users {
                    let user = session
                        .add(User::new(&format!("user{i}"), "Bench User"))
                        .unwrap();
                    for n in 0..2 {
                        session
                            .append_related(
                                &user,
                                "addresses",
                                Address::new(&format!("user{i}.{n}@example.com")),
                            )
                            .unwrap();
                    }
                }
                session.commit().unwrap();
            });
        });
    }
    group.finish();
}

/// Benchmark repeated lookups that hit the identity map.
fn bench_identity_map(c: &mut Criterion) {
    let mut group = c.benchmark_group("identity_map");

    let store = TestStore::users();
    let mut session = store.session();
    for i in 0..100 {
        session
            .add(User::new(&format!("user{i}"), "Bench User"))
            .unwrap();
    }
    session.commit().unwrap();
    let loaded = session.query::<User>().all().unwrap();
    black_box(&loaded);

    group.bench_function("get_hit", |b| {
        b.iter(|| {
            let user: Option<EntityRef<User>> = session.get(black_box(50)).unwrap();
            black_box(user);
        });
    });

    group.bench_function("query_by_name", |b| {
        b.iter(|| {
            let user = session
                .query::<User>()
                .filter(col("name").eq(black_box("user50")))
                .one()
                .unwrap();
            black_box(user);
        });
    });

    group.finish();
}

criterion_group!(benches, bench_flush_graph, bench_identity_map);

criterion_main!(benches);
