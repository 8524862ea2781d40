use criterion::Criterion;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Arc;

use parmark::gc::ManualPolicy;
use parmark::util::test_util::mock_vm::MockVM;
use parmark::ParMarkBuilder;

const OBJECTS: usize = 100_000;
const DEGREE: usize = 4;

pub fn bench(c: &mut Criterion) {
    let vm = Arc::new(MockVM::new());
    let mut rng = StdRng::seed_from_u64(0);
    let objects: Vec<_> = (0..OBJECTS).map(|_| vm.alloc()).collect();
    for i in 1..OBJECTS {
        vm.add_edge(objects[rng.random_range(0..i)], objects[i]);
        for _ in 0..rng.random_range(0..DEGREE) {
            vm.add_edge(objects[i], objects[rng.random_range(0..OBJECTS)]);
        }
    }
    vm.add_global_root(objects[0]);

    for aux in [0, 1, 3, 7] {
        let mut builder = ParMarkBuilder::new_no_env_vars();
        builder.options.aux_gc_threads = aux;
        builder.policy(Box::new(ManualPolicy));
        let gc = builder.build(vm.clone()).unwrap();
        c.bench_function(&format!("full gc - {} auxiliary threads", aux), |b| {
            b.iter(|| gc.schedule_and_wait_finished())
        });
    }
}
