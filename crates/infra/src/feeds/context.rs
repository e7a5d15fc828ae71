use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use super::FeedError;

/// Upstream sources the engine reads from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FeedKind {
    Catalog,
    SalesHistory,
    Pipeline,
    ConfirmedOrders,
    Inventory,
}

impl FeedKind {
    pub fn as_str(self) -> &'static str {
        match self {
            FeedKind::Catalog => "catalog",
            FeedKind::SalesHistory => "sales_history",
            FeedKind::Pipeline => "pipeline",
            FeedKind::ConfirmedOrders => "confirmed_orders",
            FeedKind::Inventory => "inventory",
        }
    }
}

impl core::fmt::Display for FeedKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shared cancel switch for an in-flight run.
#[derive(Debug, Clone, Default)]
pub struct CancellationFlag(Arc<AtomicBool>);

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Deadline and cancellation carried into every feed read.
///
/// Feed implementations that block should poll [`ReadContext::check`] or bound
/// their waits by [`ReadContext::remaining`].
#[derive(Debug, Clone)]
pub struct ReadContext {
    deadline: Instant,
    cancel: CancellationFlag,
}

impl ReadContext {
    pub fn new(deadline: Instant, cancel: CancellationFlag) -> Self {
        Self { deadline, cancel }
    }

    pub fn with_timeout(timeout: Duration, cancel: CancellationFlag) -> Self {
        Self::new(Instant::now() + timeout, cancel)
    }

    pub fn deadline(&self) -> Instant {
        self.deadline
    }

    pub fn remaining(&self) -> Duration {
        self.deadline.saturating_duration_since(Instant::now())
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Cancellation wins over an expired deadline.
    pub fn check(&self, feed: FeedKind) -> Result<(), FeedError> {
        if self.is_cancelled() {
            return Err(FeedError::Cancelled);
        }
        if self.is_expired() {
            return Err(FeedError::DeadlineExceeded { feed });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_context_passes() {
        let ctx = ReadContext::with_timeout(Duration::from_secs(60), CancellationFlag::new());
        assert!(ctx.check(FeedKind::Pipeline).is_ok());
        assert!(ctx.remaining() > Duration::from_secs(59));
    }

    #[test]
    fn expired_context_reports_the_feed() {
        let ctx = ReadContext::new(Instant::now(), CancellationFlag::new());
        assert_eq!(
            ctx.check(FeedKind::Inventory),
            Err(FeedError::DeadlineExceeded {
                feed: FeedKind::Inventory
            })
        );
        assert_eq!(ctx.remaining(), Duration::ZERO);
    }

    #[test]
    fn cancellation_is_shared_and_takes_priority() {
        let flag = CancellationFlag::new();
        let ctx = ReadContext::new(Instant::now(), flag.clone());
        flag.cancel();
        assert!(ctx.is_cancelled());
        assert_eq!(ctx.check(FeedKind::SalesHistory), Err(FeedError::Cancelled));
    }
}
