use criterion::{BenchmarkId, Criterion, Throughput, black_box, criterion_group, criterion_main};
use std::{collections::HashMap, sync::LazyLock, thread, time::Duration};
use tidepool::{DefaultConfig, Global, Pool, PoolConfig, SharedPool};

// no thread cache, every operation goes through the shared store
struct StoreOnly;

impl PoolConfig for StoreOnly {
    const LOCAL_CACHE: usize = 0;
    const GRACE: Duration = Duration::ZERO;
    type Alloc = Global;
}

static VEC_POOL: LazyLock<Pool<Vec<u64>>> = LazyLock::new(Pool::new);
static VEC_STORE_POOL: LazyLock<Pool<Vec<u64>, StoreOnly>> = LazyLock::new(Pool::new);
static HASHMAP_POOL: LazyLock<Pool<HashMap<u64, u64>>> = LazyLock::new(Pool::new);
static STRING_POOL: LazyLock<SharedPool<String>> = LazyLock::new(SharedPool::new);

const SIZES: [u64; 6] = [1, 10, 20, 50, 80, 100];

fn bench_vec(c: &mut Criterion) {
    let mut group = c.benchmark_group("vec");
    for size in SIZES.iter() {
        group.throughput(Throughput::Elements(*size));

        group.bench_with_input(BenchmarkId::new("standard", size), size, |b, &size| {
            b.iter(|| {
                let mut v = Box::new(Vec::new());
                for i in 0..size {
                    v.push(black_box(i));
                }
                black_box(v);
            });
        });

        group.bench_with_input(BenchmarkId::new("pooled", size), size, |b, &size| {
            b.iter(|| {
                let mut v = VEC_POOL.acquire().unwrap();
                for i in 0..size {
                    v.push(black_box(i));
                }
                black_box(&v);
            });
        });

        group.bench_with_input(BenchmarkId::new("store_only", size), size, |b, &size| {
            b.iter(|| {
                let mut v = VEC_STORE_POOL.acquire().unwrap();
                for i in 0..size {
                    v.push(black_box(i));
                }
                black_box(&v);
            });
        });
    }
    group.finish();
}

fn bench_hashmap(c: &mut Criterion) {
    let mut group = c.benchmark_group("hashmap");
    for size in SIZES.iter() {
        group.throughput(Throughput::Elements(*size));

        group.bench_with_input(BenchmarkId::new("standard", size), size, |b, &size| {
            b.iter(|| {
                let mut map = Box::new(HashMap::new());
                for i in 0..size {
                    map.insert(black_box(i), black_box(i * 2));
                }
                black_box(map);
            });
        });

        group.bench_with_input(BenchmarkId::new("pooled", size), size, |b, &size| {
            b.iter(|| {
                let mut map = HASHMAP_POOL.acquire().unwrap();
                for i in 0..size {
                    map.insert(black_box(i), black_box(i * 2));
                }
                black_box(&map);
            });
        });
    }
    group.finish();
}

fn bench_shared(c: &mut Criterion) {
    let mut group = c.benchmark_group("shared_string");
    for size in SIZES.iter() {
        group.throughput(Throughput::Elements(*size));

        group.bench_with_input(BenchmarkId::new("standard", size), size, |b, &size| {
            b.iter(|| {
                let mut s = String::new();
                for _ in 0..size {
                    s.push_str(black_box("x"));
                }
                black_box(std::sync::Arc::new(s));
            });
        });

        group.bench_with_input(BenchmarkId::new("pooled", size), size, |b, &size| {
            b.iter(|| {
                let mut s = STRING_POOL.acquire().unwrap();
                if let Some(s) = s.get_mut() {
                    for _ in 0..size {
                        s.push_str(black_box("x"));
                    }
                }
                black_box(&s);
            });
        });
    }
    group.finish();
}

// objects acquired on one thread and released on others
fn bench_cross_thread(c: &mut Criterion) {
    let pool: SharedPool<Vec<u64>, DefaultConfig> = SharedPool::new();
    c.bench_function("cross_thread_release", |b| {
        b.iter(|| {
            let batch = (0..64).map(|_| pool.acquire().unwrap()).collect::<Vec<_>>();
            thread::scope(|s| {
                s.spawn(move || drop(batch));
            });
        })
    });
}

criterion_group!(benches, bench_vec, bench_hashmap, bench_shared, bench_cross_thread);
criterion_main!(benches);
