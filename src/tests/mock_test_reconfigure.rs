use super::mock_test_prelude::*;

#[test]
pub fn resize_auxiliary_pool_between_cycles() {
    let vm = Arc::new(MockVM::new());
    let gc = build(&vm, "aux_gc_threads=2");
    let reachable = vm.build_random_graph(1000, 3, 3);
    assert_eq!(gc.aux_gc_threads(), 2);

    for aux in [0, 5, 1] {
        gc.reconfigure(aux, false).unwrap();
        assert_eq!(gc.aux_gc_threads(), aux);
        let epoch = gc.schedule_and_wait_finished();
        let stats = gc.epoch_stats(epoch).unwrap();
        assert_eq!(stats.mark.workers, aux + 1);
        assert_eq!(vm.live_objects(), reachable.len());
    }
}

#[test]
pub fn reconfigure_waits_for_the_cycle_in_progress() {
    let vm = Arc::new(MockVM::new());
    let gc = build(&vm, "aux_gc_threads=3");
    vm.build_random_graph(5000, 4, 9);
    std::thread::scope(|scope| {
        let requester = scope.spawn(|| gc.schedule_and_wait_finished());
        gc.reconfigure(1, false).unwrap();
        requester.join().unwrap();
    });
    let epoch = gc.schedule_and_wait_finished();
    assert_eq!(gc.epoch_stats(epoch).unwrap().mark.workers, 2);
}
