//! Batches observer/cache notifications so a synchronous run of cache writes
//! produces one flush instead of one per write (§4.1).
//!
//! The source defers to the microtask queue; there is no such primitive on a
//! native executor, so `schedule` spawns onto the ambient tokio runtime
//! instead. Calls made inside [`NotifyManager::batch`] are buffered and
//! flushed once the outermost batch closes, matching the nesting behaviour
//! the source's counter gives it.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

type Callback = Box<dyn FnOnce() + Send>;

#[derive(Clone)]
pub struct NotifyManager {
    depth: Arc<AtomicUsize>,
    queue: Arc<Mutex<Vec<Callback>>>,
}

impl Default for NotifyManager {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyManager {
    pub fn new() -> Self {
        Self {
            depth: Arc::new(AtomicUsize::new(0)),
            queue: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Runs `f` with notifications buffered; flushes once the outermost
    /// `batch` call returns. Nested calls share one flush.
    pub fn batch<R>(&self, f: impl FnOnce() -> R) -> R {
        self.depth.fetch_add(1, Ordering::AcqRel);
        let result = f();
        if self.depth.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.flush();
        }
        result
    }

    /// Schedules `callback` to run on the next flush. Inside a batch this
    /// buffers; outside one, it spawns immediately.
    pub fn schedule(&self, callback: impl FnOnce() + Send + 'static) {
        if self.depth.load(Ordering::Acquire) > 0 {
            self.queue.lock().push(Box::new(callback));
        } else {
            tokio::task::spawn_blocking(callback);
        }
    }

    fn flush(&self) {
        let callbacks: Vec<Callback> = std::mem::take(&mut *self.queue.lock());
        if callbacks.is_empty() {
            return;
        }
        tokio::task::spawn_blocking(move || {
            for callback in callbacks {
                callback();
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[tokio::test]
    async fn batches_nested_calls_into_one_flush() {
        let manager = NotifyManager::new();
        let order = Arc::new(StdMutex::new(Vec::new()));

        manager.batch(|| {
            manager.batch(|| {
                let order = order.clone();
                manager.schedule(move || order.lock().unwrap().push(1));
            });
            let order = order.clone();
            manager.schedule(move || order.lock().unwrap().push(2));
        });

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert_eq!(*order.lock().unwrap(), vec![1, 2]);
    }

    #[tokio::test]
    async fn schedule_outside_batch_runs_without_waiting_on_flush() {
        let manager = NotifyManager::new();
        let seen = Arc::new(StdMutex::new(false));
        let seen2 = seen.clone();
        manager.schedule(move || *seen2.lock().unwrap() = true);
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(*seen.lock().unwrap());
    }
}
