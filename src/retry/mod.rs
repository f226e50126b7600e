//! The retry/pause engine (§4.2).
//!
//! A [`Retryer`] drives one logical fetch through repeated attempts,
//! consulting [`RetryConfig`] for whether/how long to wait between them and
//! [`NetworkMode`] for whether a missing network connection should pause the
//! attempt entirely. It can be interrupted at any point by [`CancelToken`]
//! (held internally) or resumed early via [`Retryer::continue_retry`].

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tokio::sync::Notify;

use crate::cancel::CancelToken;
use crate::error::QueryError;
use crate::online::OnlineTracker;

/// Whether/how many times to retry a failed fetch (§4.2).
#[derive(Clone)]
pub enum Retry {
    /// Never retry regardless of the error.
    Never,
    /// Retry up to `n` times, but only for errors `is_retryable()` accepts.
    Count(u32),
    /// Custom predicate: `(attempt, error) -> should_retry`.
    Predicate(Arc<dyn Fn(u32, &QueryError) -> bool + Send + Sync>),
}

impl std::fmt::Debug for Retry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Never => write!(f, "Retry::Never"),
            Self::Count(n) => write!(f, "Retry::Count({n})"),
            Self::Predicate(_) => write!(f, "Retry::Predicate(..)"),
        }
    }
}

impl Retry {
    fn should_retry(&self, attempt: u32, error: &QueryError) -> bool {
        match self {
            Self::Never => false,
            Self::Count(n) => attempt < *n && error.is_retryable(),
            Self::Predicate(f) => f(attempt, error),
        }
    }
}

/// How long to wait before the next attempt (§4.2).
#[derive(Clone, Debug)]
pub enum RetryDelay {
    Fixed(Duration),
    Linear { initial: Duration, increment: Duration },
    Exponential { initial: Duration, multiplier: f64, max: Duration },
}

impl RetryDelay {
    pub fn calculate(&self, attempt: u32, jitter: bool) -> Duration {
        let base = match self {
            Self::Fixed(d) => *d,
            Self::Linear { initial, increment } => *initial + (*increment * attempt),
            Self::Exponential { initial, multiplier, max } => {
                let millis = initial.as_millis() as f64 * multiplier.powi(attempt as i32);
                Duration::from_millis(millis.min(max.as_millis() as f64) as u64)
            }
        };
        if jitter {
            let factor = rand::thread_rng().gen_range(0.5..=1.0);
            Duration::from_millis((base.as_millis() as f64 * factor) as u64)
        } else {
            base
        }
    }
}

/// Whether a fetch may run while offline (§4.2, §6).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NetworkMode {
    /// Pause (don't even attempt) while offline; resume once online.
    Online,
    /// Ignore connectivity entirely.
    Always,
    /// Attempt once regardless of connectivity, but don't retry while offline.
    OfflineFirst,
}

#[derive(Clone)]
pub struct RetryConfig {
    pub retry: Retry,
    pub delay: RetryDelay,
    pub jitter: bool,
    pub network_mode: NetworkMode,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            retry: Retry::Count(3),
            delay: RetryDelay::Exponential {
                initial: Duration::from_millis(1000),
                multiplier: 2.0,
                max: Duration::from_secs(30),
            },
            jitter: true,
            network_mode: NetworkMode::Online,
        }
    }
}

/// Optional event hooks for one [`Retryer::run_with_hooks`] call (§4.2
/// `onFail`/`onPause`/`onContinue`; `onSuccess`/`onError` are just the
/// `Result` the caller gets back, so they aren't modeled as callbacks here).
/// Plain `run` is `run_with_hooks` with every hook absent — the common case,
/// used by `Entry::fetch`, which only cares about the final success/error.
#[derive(Clone, Default)]
pub struct RetryHooks {
    pub on_fail: Option<Arc<dyn Fn(u32, &QueryError) + Send + Sync>>,
    pub on_pause: Option<Arc<dyn Fn() + Send + Sync>>,
    pub on_continue: Option<Arc<dyn Fn() + Send + Sync>>,
}

/// Drives one logical fetch through attempts, pauses, and retries.
pub struct Retryer {
    cancel: CancelToken,
    online: Arc<OnlineTracker>,
    paused: AtomicBool,
    wake: Arc<Notify>,
    _online_sub: crate::tracker::Subscription,
}

impl Retryer {
    pub fn new(cancel: CancelToken, online: Arc<OnlineTracker>) -> Arc<Self> {
        let wake = Arc::new(Notify::new());
        let wake_for_sub = wake.clone();
        let sub = online.subscribe(move |is_online| {
            if is_online {
                wake_for_sub.notify_waiters();
            }
        });
        Arc::new(Self {
            cancel,
            online,
            paused: AtomicBool::new(false),
            wake,
            _online_sub: sub,
        })
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    /// True while waiting out a network-offline pause.
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    /// Wakes a paused retryer early, as if connectivity had just returned.
    pub fn continue_retry(&self) {
        if self.paused.swap(false, Ordering::AcqRel) {
            self.wake.notify_waiters();
        }
    }

    fn can_fetch(&self, mode: NetworkMode) -> bool {
        match mode {
            NetworkMode::Always | NetworkMode::OfflineFirst => true,
            NetworkMode::Online => self.online.is_online(),
        }
    }

    async fn wait_until_fetchable(&self, mode: NetworkMode, hooks: &RetryHooks) {
        if self.can_fetch(mode) {
            return;
        }
        self.paused.store(true, Ordering::Release);
        if let Some(on_pause) = &hooks.on_pause {
            on_pause();
        }
        while !self.can_fetch(mode) && !self.cancel.is_cancelled() {
            let notified = self.wake.notified();
            if self.can_fetch(mode) || self.cancel.is_cancelled() {
                break;
            }
            notified.await;
        }
        self.paused.store(false, Ordering::Release);
        if let Some(on_continue) = &hooks.on_continue {
            on_continue();
        }
    }

    /// Runs `fetch` to completion, retrying per `config` and honoring cancellation.
    pub async fn run<T, F, Fut>(&self, config: &RetryConfig, fetch: F) -> Result<T, QueryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        self.run_with_hooks(config, &RetryHooks::default(), fetch).await
    }

    /// Like [`Retryer::run`], but additionally fires `hooks.on_fail` after
    /// every failed attempt and `hooks.on_pause`/`on_continue` around a
    /// network-gated pause (§4.2). Used by [`crate::mutation::Mutation`],
    /// which projects `on_pause`/`on_continue` onto `is_paused`.
    pub async fn run_with_hooks<T, F, Fut>(
        &self,
        config: &RetryConfig,
        hooks: &RetryHooks,
        mut fetch: F,
    ) -> Result<T, QueryError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, QueryError>>,
    {
        let mut attempt = 0u32;
        loop {
            if self.cancel.is_cancelled() {
                return Err(QueryError::cancelled(self.cancel.revert(), self.cancel.silent()));
            }

            if !self.can_fetch(config.network_mode) {
                self.wait_until_fetchable(config.network_mode, hooks).await;
                if self.cancel.is_cancelled() {
                    return Err(QueryError::cancelled(self.cancel.revert(), self.cancel.silent()));
                }
            }

            let outcome = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => {
                    return Err(QueryError::cancelled(self.cancel.revert(), self.cancel.silent()));
                }
                result = fetch(attempt) => result,
            };

            match outcome {
                Ok(value) => return Ok(value),
                Err(error) => {
                    if error.as_cancelled().is_some() {
                        return Err(error);
                    }
                    if config.network_mode == NetworkMode::OfflineFirst && !self.online.is_online() {
                        return Err(error);
                    }
                    if !config.retry.should_retry(attempt, &error) {
                        return Err(error);
                    }
                    if let Some(on_fail) = &hooks.on_fail {
                        on_fail(attempt + 1, &error);
                    }
                    let delay = error
                        .suggested_retry_delay()
                        .unwrap_or_else(|| config.delay.calculate(attempt, config.jitter));
                    attempt += 1;

                    tokio::select! {
                        biased;
                        _ = self.cancel.cancelled() => {
                            return Err(QueryError::cancelled(self.cancel.revert(), self.cancel.silent()));
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }
}
