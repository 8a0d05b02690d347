//! Tag codec hot path: encode and decode through the shared register bank.

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use modbus_plant_sim::{BitVector, RegisterStore, Tag, TagKind};

fn bench_scalar_tags(c: &mut Criterion) {
    let store = RegisterStore::new(1000);
    let int = Tag::from_kind(TagKind::Int, 1, 10);
    let signed = Tag::from_kind(TagKind::SignedInt, 1, 11);
    let float = Tag::from_kind(TagKind::FloatInverse, 0, 12);
    let long = Tag::from_kind(TagKind::Long, 0, 14);

    let mut group = c.benchmark_group("tags");
    group.bench_function("int_set_get", |b| {
        b.iter(|| {
            int.set(&store, black_box(123.4));
            black_box(int.get(&store))
        })
    });
    group.bench_function("signed_set_get", |b| {
        b.iter(|| {
            signed.set(&store, black_box(-12.3));
            black_box(signed.get(&store))
        })
    });
    group.bench_function("float_inverse_set_get", |b| {
        b.iter(|| {
            float.set(&store, black_box(3.25));
            black_box(float.get(&store))
        })
    });
    group.bench_function("long_set_get", |b| {
        b.iter(|| {
            long.set(&store, black_box(125_000.0));
            black_box(long.get(&store))
        })
    });
    group.finish();
}

fn bench_bit_vector(c: &mut Criterion) {
    let store = RegisterStore::new(16);
    let vector = BitVector::new(0);

    c.bench_function("bit_vector_set_range", |b| {
        b.iter(|| {
            vector.set_range(&store, 2, 6, black_box(0b00100)).ok();
            black_box(vector.range(&store, 2, 6).ok())
        })
    });
}

criterion_group!(benches, bench_scalar_tags, bench_bit_vector);
criterion_main!(benches);
