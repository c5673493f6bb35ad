//! # Priority Read/Write Lock
//!
//! A blocking reader/writer lock with a fast lane for latency-critical readers.
//!
//! | Acquire          | Blocks while                                  |
//! |------------------|-----------------------------------------------|
//! | `write`          | any reader holds the lock, or a writer is active |
//! | `read`           | a writer is active, or any writer is waiting  |
//! | `priority_read`  | a writer is active                            |
//!
//! Releasing the write lock wakes waiting priority readers if there are any,
//! else one waiting writer, else every waiting normal reader. When the last
//! reader leaves, priority readers are woken first, then one writer is
//! signalled and normal readers are broadcast.
//!
//! Proposal preparation takes the priority lane so it never queues behind
//! vote-ingestion writes; writers still bound how long normal readers can
//! hold them off.

use parking_lot::{Condvar, Mutex};
use std::cell::UnsafeCell;
use std::ops::{Deref, DerefMut};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer_active: bool,
    waiting_writers: usize,
    waiting_readers: usize,
    waiting_priority: usize,
}

pub struct PriorityRwLock<T: ?Sized> {
    state: Mutex<LockState>,
    readers_cv: Condvar,
    priority_cv: Condvar,
    writers_cv: Condvar,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by `state`: shared references only
// exist while `readers > 0` and the unique reference only while
// `writer_active`, and the two are never true together.
unsafe impl<T: ?Sized + Send> Send for PriorityRwLock<T> {}
unsafe impl<T: ?Sized + Send + Sync> Sync for PriorityRwLock<T> {}

impl<T> PriorityRwLock<T> {
    pub fn new(value: T) -> Self {
        Self {
            state: Mutex::new(LockState::default()),
            readers_cv: Condvar::new(),
            priority_cv: Condvar::new(),
            writers_cv: Condvar::new(),
            data: UnsafeCell::new(value),
        }
    }

    pub fn into_inner(self) -> T {
        self.data.into_inner()
    }
}

impl<T: ?Sized> PriorityRwLock<T> {
    /// Shared access that yields to active and queued writers.
    pub fn read(&self) -> PriorityRwLockReadGuard<'_, T> {
        let mut state = self.state.lock();
        state.waiting_readers += 1;
        while state.writer_active || state.waiting_writers > 0 {
            self.readers_cv.wait(&mut state);
        }
        state.waiting_readers -= 1;
        state.readers += 1;
        PriorityRwLockReadGuard { lock: self }
    }

    /// Shared access that only waits for an active writer, overtaking
    /// queued ones.
    pub fn priority_read(&self) -> PriorityRwLockReadGuard<'_, T> {
        let mut state = self.state.lock();
        state.waiting_priority += 1;
        while state.writer_active {
            self.priority_cv.wait(&mut state);
        }
        state.waiting_priority -= 1;
        state.readers += 1;
        PriorityRwLockReadGuard { lock: self }
    }

    /// Exclusive access.
    pub fn write(&self) -> PriorityRwLockWriteGuard<'_, T> {
        let mut state = self.state.lock();
        state.waiting_writers += 1;
        while state.writer_active || state.readers > 0 {
            self.writers_cv.wait(&mut state);
        }
        state.waiting_writers -= 1;
        state.writer_active = true;
        PriorityRwLockWriteGuard { lock: self }
    }

    /// Mutable access without locking; the borrow proves exclusivity.
    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }

    fn release_read(&self) {
        let mut state = self.state.lock();
        state.readers -= 1;
        if state.readers > 0 {
            return;
        }
        if state.waiting_priority > 0 {
            self.priority_cv.notify_all();
        }
        if state.waiting_writers > 0 {
            self.writers_cv.notify_one();
        }
        if state.waiting_readers > 0 {
            self.readers_cv.notify_all();
        }
    }

    fn release_write(&self) {
        let mut state = self.state.lock();
        state.writer_active = false;
        if state.waiting_priority > 0 {
            self.priority_cv.notify_all();
        } else if state.waiting_writers > 0 {
            self.writers_cv.notify_one();
        } else if state.waiting_readers > 0 {
            self.readers_cv.notify_all();
        }
    }
}

impl<T: Default> Default for PriorityRwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

/// Shared guard returned by [`PriorityRwLock::read`] and
/// [`PriorityRwLock::priority_read`].
pub struct PriorityRwLockReadGuard<'a, T: ?Sized> {
    lock: &'a PriorityRwLock<T>,
}

impl<T: ?Sized> Deref for PriorityRwLockReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this guard counts as a reader, so no writer is active.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for PriorityRwLockReadGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_read();
    }
}

/// Exclusive guard returned by [`PriorityRwLock::write`].
pub struct PriorityRwLockWriteGuard<'a, T: ?Sized> {
    lock: &'a PriorityRwLock<T>,
}

impl<T: ?Sized> Deref for PriorityRwLockWriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: this guard is the active writer.
        unsafe { &*self.lock.data.get() }
    }
}

impl<T: ?Sized> DerefMut for PriorityRwLockWriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: this guard is the active writer.
        unsafe { &mut *self.lock.data.get() }
    }
}

impl<T: ?Sized> Drop for PriorityRwLockWriteGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.release_write();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn settle() {
        thread::sleep(Duration::from_millis(50));
    }

    fn waiting_writers<T>(lock: &PriorityRwLock<T>) -> usize {
        lock.state.lock().waiting_writers
    }

    #[test]
    fn test_readers_share() {
        let lock = PriorityRwLock::new(5);
        let a = lock.read();
        let b = lock.priority_read();
        assert_eq!(*a + *b, 10);
    }

    #[test]
    fn test_write_then_read() {
        let lock = PriorityRwLock::new(Vec::new());
        lock.write().push(1);
        lock.write().push(2);
        assert_eq!(*lock.read(), vec![1, 2]);
        assert_eq!(lock.into_inner(), vec![1, 2]);
    }

    #[test]
    fn test_writer_waits_for_readers() {
        let lock = Arc::new(PriorityRwLock::new(0));
        let reader = lock.read();
        let done = Arc::new(AtomicBool::new(false));

        let writer = {
            let lock = lock.clone();
            let done = done.clone();
            thread::spawn(move || {
                *lock.write() = 1;
                done.store(true, Ordering::SeqCst);
            })
        };

        settle();
        assert!(!done.load(Ordering::SeqCst));
        drop(reader);
        writer.join().unwrap();
        assert_eq!(*lock.read(), 1);
    }

    #[test]
    fn test_queued_writer_blocks_normal_readers_but_not_priority() {
        let lock = Arc::new(PriorityRwLock::new(0));
        let holder = lock.read();

        let writer = {
            let lock = lock.clone();
            thread::spawn(move || {
                *lock.write() += 1;
            })
        };
        while waiting_writers(&lock) == 0 {
            thread::yield_now();
        }

        let normal_done = Arc::new(AtomicBool::new(false));
        let normal = {
            let lock = lock.clone();
            let normal_done = normal_done.clone();
            thread::spawn(move || {
                let value = *lock.read();
                normal_done.store(true, Ordering::SeqCst);
                value
            })
        };

        settle();
        assert!(!normal_done.load(Ordering::SeqCst), "normal reader passed a queued writer");

        // The priority lane overtakes the queued writer.
        let fast = lock.priority_read();
        assert_eq!(*fast, 0);
        drop(fast);
        drop(holder);

        writer.join().unwrap();
        // The normal reader was queued behind the writer, so it sees its write.
        assert_eq!(normal.join().unwrap(), 1);
    }

    #[test]
    fn test_priority_reader_waits_for_active_writer() {
        let lock = Arc::new(PriorityRwLock::new(0));
        let guard = lock.write();
        let done = Arc::new(AtomicBool::new(false));

        let reader = {
            let lock = lock.clone();
            let done = done.clone();
            thread::spawn(move || {
                let value = *lock.priority_read();
                done.store(true, Ordering::SeqCst);
                value
            })
        };

        settle();
        assert!(!done.load(Ordering::SeqCst));
        let mut guard = guard;
        *guard = 7;
        drop(guard);
        assert_eq!(reader.join().unwrap(), 7);
    }

    #[test]
    fn test_contended_counter() {
        let lock = Arc::new(PriorityRwLock::new(0u64));
        let mut handles = Vec::new();
        for i in 0..8 {
            let lock = lock.clone();
            handles.push(thread::spawn(move || {
                for _ in 0..200 {
                    if i % 2 == 0 {
                        *lock.write() += 1;
                    } else if i % 4 == 1 {
                        let _ = *lock.read();
                    } else {
                        let _ = *lock.priority_read();
                    }
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(*lock.read(), 800);
    }
}
