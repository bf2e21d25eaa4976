//! Small async helpers shared by the relay.

use std::future::Future;
use std::time::Duration;

/// Returned by [`with_timeout`] when the wrapped operation did not finish
/// within its budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("operation timed out after {}ms", after.as_millis())]
pub struct TimedOut {
    pub after: Duration,
}

/// Race `operation` against a timer. When the timer wins the operation is
/// dropped, which cancels any in-flight I/O it owns (an HTTP request from
/// `reqwest` is aborted this way), and `TimedOut` is returned.
pub async fn with_timeout<F>(limit: Duration, operation: F) -> Result<F::Output, TimedOut>
where
    F: Future,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| TimedOut { after: limit })
}
