use criterion::Criterion;

pub mod full_gc;

pub fn bench(c: &mut Criterion) {
    full_gc::bench(c);
}
