use criterion::Criterion;
use std::ptr::NonNull;

use parmark::mark::WorkQueue;
use parmark::util::{GcHeader, ObjectReference};

const OBJECTS: usize = 4096;

fn references(headers: &[GcHeader]) -> Vec<ObjectReference> {
    headers
        .iter()
        .map(|header| unsafe { ObjectReference::from_header(NonNull::from(header)) })
        .collect()
}

pub fn bench(c: &mut Criterion) {
    let headers: Vec<GcHeader> = (0..OBJECTS).map(|_| GcHeader::new()).collect();
    let objects = references(&headers);

    c.bench_function("work queue - push and pop", |b| {
        let mut queue = WorkQueue::new();
        b.iter(|| {
            for object in objects.iter() {
                queue.push_local(*object);
            }
            while let Some(object) = queue.pop_local() {
                object.header().clear_mark();
            }
        })
    });

    c.bench_function("work queue - share and steal", |b| {
        let mut owner = WorkQueue::new();
        let mut thief = WorkQueue::new();
        b.iter(|| {
            for object in objects.iter() {
                owner.push_local(*object);
            }
            owner.share_all();
            while thief.steal_fraction(owner.shared(), 1) > 0 {
                while let Some(object) = thief.pop_local() {
                    object.header().clear_mark();
                }
            }
        })
    });
}
