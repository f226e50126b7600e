//! Cooperative cancellation for in-flight fetches (§4.2, §6.1 "CancelToken").
//!
//! A fetch function receives a [`CancelToken`] and is expected to check it
//! (or race `cancelled()` in a `select!`) at yield points; nothing forcibly
//! aborts the underlying future, matching the source's `AbortController`-based
//! cooperative model rather than a hard `JoinHandle::abort`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;

#[derive(Clone)]
pub struct CancelToken {
    cancelled: Arc<AtomicBool>,
    revert: Arc<AtomicBool>,
    silent: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
            revert: Arc::new(AtomicBool::new(false)),
            silent: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Marks the token cancelled and wakes any task waiting in `cancelled()`.
    /// `revert` asks the caller to roll back optimistic state; `silent`
    /// suppresses error callbacks and observer notification (§4.2, §7).
    pub fn cancel(&self, revert: bool, silent: bool) {
        self.revert.store(revert, Ordering::Release);
        self.silent.store(silent, Ordering::Release);
        if !self.cancelled.swap(true, Ordering::AcqRel) {
            self.notify.notify_waiters();
        }
    }

    pub fn revert(&self) -> bool {
        self.revert.load(Ordering::Acquire)
    }

    pub fn silent(&self) -> bool {
        self.silent.load(Ordering::Acquire)
    }

    /// Resolves once `cancel` is called; resolves immediately if already cancelled.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        let notified = self.notify.notified();
        if self.is_cancelled() {
            return;
        }
        notified.await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancelled_future_resolves_after_cancel() {
        let token = CancelToken::new();
        let waiter = token.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        token.cancel(true, false);
        handle.await.unwrap();
        assert!(token.is_cancelled());
        assert!(token.revert());
        assert!(!token.silent());
    }

    #[tokio::test]
    async fn cancelled_resolves_immediately_if_already_cancelled() {
        let token = CancelToken::new();
        token.cancel(false, true);
        token.cancelled().await;
        assert!(token.silent());
    }
}
