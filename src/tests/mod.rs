// NOTE: Scenario tests that run whole collection cycles through `ParMark` with the mock VM.
// Each file covers one scenario; shared helpers live in `mock_test_prelude`.

mod mock_test_reconfigure;
mod mock_test_shutdown;

pub(crate) mod mock_test_prelude {
    pub use crate::gc::{GcPhase, ManualPolicy};
    pub use crate::util::test_util::mock_vm::{Event, MockMutator, MockVM};
    pub use crate::util::test_util::panic_after;
    pub use crate::vm::MutatorThread;
    pub use crate::{ParMark, ParMarkBuilder};
    pub use std::sync::atomic::{AtomicBool, Ordering};
    pub use std::sync::{Arc, Weak};

    /// An instance over `vm` that only collects on request, with `options` applied.
    pub fn build(vm: &Arc<MockVM>, options: &str) -> ParMark<MockVM> {
        let mut builder = ParMarkBuilder::new_no_env_vars();
        assert!(builder.set_options_bulk_by_str(options));
        builder.policy(Box::new(ManualPolicy));
        builder.build(vm.clone()).unwrap()
    }

    /// Report finalization of every epoch back to `gc`.
    pub fn report_finalization(vm: &MockVM, gc: &Arc<ParMark<MockVM>>) {
        let gc = Arc::downgrade(gc);
        vm.set_finalizer_callback(move |epoch| {
            if let Some(gc) = Weak::upgrade(&gc) {
                gc.on_finalized(epoch);
            }
        });
    }

    /// Run `body` while `mutators` run on their own threads, polling the safepoint in a loop.
    pub fn with_running_mutators<R>(
        vm: &MockVM,
        gc: &ParMark<MockVM>,
        mutators: &[Arc<MockMutator>],
        body: impl FnOnce() -> R,
    ) -> R {
        let done = AtomicBool::new(false);
        std::thread::scope(|scope| {
            for mutator in mutators.iter() {
                vm.attach();
                let done = &done;
                scope.spawn(move || {
                    while !done.load(Ordering::SeqCst) {
                        vm.poll_safepoint(|| gc.safepoint(mutator));
                        std::thread::yield_now();
                    }
                    vm.detach();
                });
            }
            let result = body();
            done.store(true, Ordering::SeqCst);
            result
        })
    }
}
