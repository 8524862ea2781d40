use crate::util::{GcHeader, ObjectReference};
use std::ptr::NonNull;
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

pub mod mock_vm;

/// A block of bare headers, for tests of the queues that never trace.
pub struct HeaderArena {
    headers: Box<[GcHeader]>,
}

impl HeaderArena {
    pub fn new(len: usize) -> Self {
        Self {
            headers: (0..len).map(|_| GcHeader::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    pub fn get(&self, index: usize) -> ObjectReference {
        // The arena outlives every queue of the test that uses it.
        unsafe { ObjectReference::from_header(NonNull::from(&self.headers[index])) }
    }
}

// https://github.com/rust-lang/rfcs/issues/2798#issuecomment-552949300
pub fn panic_after<T, F>(millis: u64, f: F) -> T
where
    T: Send + 'static,
    F: FnOnce() -> T,
    F: Send + 'static,
{
    let (done_tx, done_rx) = mpsc::channel();
    let handle = thread::spawn(move || {
        let val = f();
        done_tx.send(()).expect("Unable to send completion signal");
        val
    });

    match done_rx.recv_timeout(Duration::from_millis(millis)) {
        Ok(_) => handle.join().expect("Thread panicked"),
        Err(e) => panic!("Thread took too long: {}", e),
    }
}
