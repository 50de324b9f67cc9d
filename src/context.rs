//! Run context passed into every pipeline stage.
//!
//! Stages never read ambient globals: the clock, the configuration and the
//! cancellation token all travel through the context, so a test can run the
//! whole pipeline with a fixed clock and get deterministic output.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::NaiveDateTime;

use crate::config::AppConfig;

/// Source of the current time for a run.
pub trait Clock: Send + Sync {
    /// Current timestamp in UTC.
    fn now(&self) -> NaiveDateTime;
}

/// Wall-clock time.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        chrono::Utc::now().naive_utc()
    }
}

/// A clock pinned to one instant, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}

/// Cooperative cancellation flag, checked at stage boundaries.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation of the run at the next stage boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Context shared by all stages of one pipeline run.
#[derive(Clone)]
pub struct RunContext {
    config: Arc<AppConfig>,
    clock: Arc<dyn Clock>,
    cancellation: CancellationToken,
}

impl RunContext {
    /// Context with the system clock and a fresh cancellation token.
    #[must_use]
    pub fn new(config: AppConfig) -> Self {
        Self {
            config: Arc::new(config),
            clock: Arc::new(SystemClock),
            cancellation: CancellationToken::new(),
        }
    }

    /// Context with an explicit clock, for deterministic tests.
    #[must_use]
    pub fn with_clock(config: AppConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config: Arc::new(config),
            clock,
            cancellation: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Current timestamp from the run's clock.
    #[must_use]
    pub fn now(&self) -> NaiveDateTime {
        self.clock.now()
    }

    /// Token that can cancel this run from another task.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_clock_is_deterministic() {
        let instant = chrono::NaiveDate::from_ymd_opt(2025, 7, 1)
            .and_then(|d| d.and_hms_opt(2, 0, 0))
            .expect("valid timestamp");
        let ctx = RunContext::with_clock(AppConfig::default(), Arc::new(FixedClock(instant)));
        assert_eq!(ctx.now(), instant);
        assert_eq!(ctx.now(), ctx.now());
    }

    #[test]
    fn test_cancellation_is_shared() {
        let ctx = RunContext::new(AppConfig::default());
        let token = ctx.cancellation_token();
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
