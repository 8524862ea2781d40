use criterion::Criterion;

pub mod work_queue;

pub fn bench(c: &mut Criterion) {
    work_queue::bench(c);
}
