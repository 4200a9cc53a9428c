use std::sync::atomic::{AtomicI64, Ordering};

/// Thread id reserved for the implicit primordial thread.
pub const PRIMORDIAL_THREAD_ID: i64 = 1;

/// Process-lifetime id counters handed out to the runtime.
///
/// Ids are opaque handles for the client and are never recycled, so a stale
/// id from an earlier stop can never alias a fresh one.
#[derive(Debug)]
pub struct IdAllocator {
    thread: AtomicI64,
    stack_frame: AtomicI64,
    variable: AtomicI64,
}

impl Default for IdAllocator {
    fn default() -> Self {
        Self {
            thread: AtomicI64::new(PRIMORDIAL_THREAD_ID + 1),
            stack_frame: AtomicI64::new(1),
            variable: AtomicI64::new(1),
        }
    }
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_thread_id(&self) -> i64 {
        self.thread.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_stackframe_id(&self) -> i64 {
        self.stack_frame.fetch_add(1, Ordering::Relaxed)
    }

    pub fn next_variable_id(&self) -> i64 {
        self.variable.fetch_add(1, Ordering::Relaxed)
    }
}
