//! Fixed-capacity free list of [`AttestationState`] values.
//!
//! Expired states are handed back here so their vote buffers can be reused
//! by the next fact of the same kind.

use super::attestation_state::AttestationState;
use parking_lot::Mutex;
use shared_types::Attestable;
use tokio::time::Instant;

pub struct AttestationStatePool<T> {
    free: Mutex<Vec<AttestationState<T>>>,
    capacity: usize,
}

impl<T: Attestable> AttestationStatePool<T> {
    pub fn new(capacity: usize) -> Self {
        Self {
            free: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }

    /// Returns a state for `item`, reusing a pooled one when available.
    pub fn take(&self, item: T, now: Instant) -> AttestationState<T> {
        match self.free.lock().pop() {
            Some(mut state) => {
                state.reset(item, now);
                state
            }
            None => AttestationState::new(item, now),
        }
    }

    /// Returns a state to the pool; dropped if the pool is full.
    pub fn put(&self, state: AttestationState<T>) {
        let mut free = self.free.lock();
        if free.len() < self.capacity {
            free.push(state);
        }
    }

    pub fn available(&self) -> usize {
        self.free.lock().len()
    }
}
