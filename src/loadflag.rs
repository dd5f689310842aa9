use std::sync::atomic::{fence, AtomicU64, Ordering};

pub const LOAD_LOW: u64 = 0;
pub const LOAD_HIGH: u64 = 1;
pub const LOAD_STOP: u64 = 2;
pub const LOAD_SWITCH: u64 = 3;

/// Process-wide word observed by every worker's hand-written payload loop.
///
/// Writers always pair the store with a full fence so the transition is
/// visible to every reader before the writer's next instruction, even
/// though readers only ever need to observe *that* a transition happened.
#[derive(Debug, Default)]
pub struct LoadFlag {
    value: AtomicU64,
}

impl LoadFlag {
    pub fn new(initial: u64) -> Self {
        Self {
            value: AtomicU64::new(initial),
        }
    }

    pub fn set(&self, value: u64) {
        self.value.store(value, Ordering::SeqCst);
        fence(Ordering::SeqCst);
    }

    pub fn get(&self) -> u64 {
        self.value.load(Ordering::SeqCst)
    }
}
