use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Single-shot broadcast latch carrying a value.
///
/// Opened at most once; every waiter, past or future, observes the same value.
/// The value is published atomically with the opening, so a waiter can never see
/// the barrier open without its value.
#[derive(Debug)]
pub struct CompletionBarrier<T> {
    slot: Mutex<Option<Arc<T>>>,
    opened: Condvar,
}

impl<T> Default for CompletionBarrier<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> CompletionBarrier<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            opened: Condvar::new(),
        }
    }

    /// Publish `value` and wake all waiters. Returns `false` if already open; the
    /// first value is kept.
    pub fn open(&self, value: T) -> bool {
        let mut slot = self.slot.lock();
        if slot.is_some() {
            return false;
        }
        *slot = Some(Arc::new(value));
        self.opened.notify_all();
        true
    }

    pub fn is_open(&self) -> bool {
        self.slot.lock().is_some()
    }

    pub fn try_get(&self) -> Option<Arc<T>> {
        self.slot.lock().clone()
    }

    pub fn wait(&self) -> Arc<T> {
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return value.clone();
            }
            self.opened.wait(&mut slot);
        }
    }

    /// Like [`wait`](Self::wait) but gives up after `timeout`.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Arc<T>> {
        let deadline = Instant::now() + timeout;
        let mut slot = self.slot.lock();
        loop {
            if let Some(value) = slot.as_ref() {
                return Some(value.clone());
            }
            if self.opened.wait_until(&mut slot, deadline).timed_out() {
                return slot.clone();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opens_once() {
        let barrier = CompletionBarrier::new();
        assert!(!barrier.is_open());
        assert!(barrier.open(1));
        assert!(!barrier.open(2));
        assert_eq!(*barrier.wait(), 1);
        assert_eq!(barrier.try_get().as_deref(), Some(&1));
    }

    #[test]
    fn wakes_every_waiter() {
        let barrier = Arc::new(CompletionBarrier::<String>::new());
        let waiters: Vec<_> = (0..4)
            .map(|_| {
                let barrier = barrier.clone();
                std::thread::spawn(move || barrier.wait().as_str().to_string())
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        barrier.open("done".to_string());
        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), "done");
        }
    }

    #[test]
    fn wait_timeout_gives_up() {
        let barrier: CompletionBarrier<u8> = CompletionBarrier::new();
        assert!(barrier.wait_timeout(Duration::from_millis(10)).is_none());
        barrier.open(7);
        assert_eq!(barrier.wait_timeout(Duration::from_millis(10)).as_deref(), Some(&7));
    }
}
