//! The `Logger` collaborator (§6).
//!
//! Design Note §9 flags the source's logger as "currently a singleton hole;
//! prefer passing the logger through construction, with no process-wide
//! state" — so `Logger` is a trait threaded through `ClientConfig` rather than
//! a global. The default implementation forwards to `tracing`, following the
//! density `hack-ink-jwks-cache` uses around its own cache/refresh operations.

use std::sync::Arc;

/// Log sink consumed by the cache core.
pub trait Logger: Send + Sync {
    fn log(&self, message: &str);
    fn warn(&self, message: &str);
    fn error(&self, message: &str);
}

/// Forwards to the `tracing` crate at `info`/`warn`/`error` levels.
#[derive(Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn log(&self, message: &str) {
        tracing::info!("{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!("{message}");
    }

    fn error(&self, message: &str) {
        tracing::error!("{message}");
    }
}

/// Discards every message; useful for tests that assert on state, not logs.
#[derive(Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn log(&self, _message: &str) {}
    fn warn(&self, _message: &str) {}
    fn error(&self, _message: &str) {}
}

pub fn default_logger() -> Arc<dyn Logger> {
    Arc::new(TracingLogger)
}
