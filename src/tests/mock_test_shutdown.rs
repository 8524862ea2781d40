use super::mock_test_prelude::*;

#[test]
pub fn shutdown_while_idle() {
    panic_after(10_000, || {
        let vm = Arc::new(MockVM::new());
        let gc = build(&vm, "aux_gc_threads=3");
        gc.schedule_and_wait_finished();
        gc.shutdown();
        // Requests after shutdown do not block.
        gc.schedule_and_wait_finished();
        assert!(vm.events().len() <= 7);
    });
}

#[test]
pub fn drop_joins_gc_threads() {
    panic_after(10_000, || {
        let vm = Arc::new(MockVM::new());
        let gc = build(&vm, "aux_gc_threads=2");
        drop(gc);
        // Only the test holds the VM now.
        assert_eq!(Arc::strong_count(&vm), 1);
    });
}

#[test]
pub fn finalization_waiters_are_released_by_shutdown() {
    panic_after(10_000, || {
        let vm = Arc::new(MockVM::new());
        // No finalizer callback: finalization is never reported.
        let gc = build(&vm, "aux_gc_threads=1");
        std::thread::scope(|scope| {
            let waiter = scope.spawn(|| gc.schedule_and_wait_finalized());
            while gc.finished_epoch() == 0 {
                std::thread::yield_now();
            }
            gc.shutdown();
            assert_eq!(waiter.join().unwrap(), 1);
        });
    });
}
