//! Retry policy and link recovery.
//
// The protocol engine retries timed-out exchanges according to a
// `RetryPolicy`. Connection-fatal failures are left to the caller, which can
// drive a `Recoverable` link back up with `handle_recoverable_error`.

use crate::error::DriverError;
use async_trait::async_trait;
use std::time::Duration;
use tokio::time::sleep;

/// Defines a policy for retrying an operation.
///
/// # Example
///
/// ```rust
/// use psg9080::error_recovery::RetryPolicy;
/// use std::time::Duration;
///
/// let policy = RetryPolicy {
///     max_attempts: 5,
///     backoff_delay: Duration::from_millis(200),
/// };
/// assert_eq!(policy.total_attempts(), 6);
/// ```
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// The maximum number of retry attempts.
    ///
    /// Total attempts will be max_attempts + 1 (the initial try is not counted).
    /// Set to 0 to disable retries.
    pub max_attempts: u32,

    /// The delay between retry attempts.
    pub backoff_delay: Duration,
}

impl Default for RetryPolicy {
    /// Default policy attempts 2 retries with 100ms delay between attempts.
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff_delay: Duration::from_millis(100),
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    pub fn none() -> Self {
        Self {
            max_attempts: 0,
            backoff_delay: Duration::ZERO,
        }
    }

    /// Initial attempt plus retries.
    pub fn total_attempts(&self) -> u32 {
        self.max_attempts.saturating_add(1)
    }
}

/// A link that can be brought back after a connection-fatal error.
///
/// # Example
///
/// ```rust,ignore
/// use psg9080::error_recovery::Recoverable;
/// use async_trait::async_trait;
///
/// #[async_trait]
/// impl Recoverable<DriverError> for MyLink {
///     async fn recover(&mut self) -> Result<(), DriverError> {
///         self.reopen().await
///     }
/// }
/// ```
#[async_trait]
pub trait Recoverable<E> {
    /// Attempts to recover from a failure.
    ///
    /// # Returns
    ///
    /// * `Ok(())` if recovery succeeds
    /// * `Err(E)` if recovery fails
    async fn recover(&mut self) -> Result<(), E>;
}

/// Handles a connection-fatal error by retrying recovery according to a policy.
///
/// Attempts recovery up to `policy.total_attempts()` times with
/// `backoff_delay` between attempts.
///
/// # Example
///
/// ```rust,ignore
/// use psg9080::error_recovery::{handle_recoverable_error, RetryPolicy};
///
/// if err.is_connection_fatal() {
///     handle_recoverable_error(&mut generator, &RetryPolicy::default()).await?;
/// }
/// ```
pub async fn handle_recoverable_error<T: Recoverable<DriverError> + Send>(
    recoverable: &mut T,
    policy: &RetryPolicy,
) -> Result<(), DriverError> {
    let attempts = policy.total_attempts();
    let mut last_error = None;

    for attempt in 1..=attempts {
        match recoverable.recover().await {
            Ok(()) => {
                tracing::info!(attempt, "Link recovered");
                return Ok(());
            }
            Err(e) => {
                tracing::warn!(attempt, error = %e, "Recovery attempt failed");
                last_error = Some(e);
            }
        }
        if attempt < attempts {
            sleep(policy.backoff_delay).await;
        }
    }

    Err(DriverError::Disconnected(format!(
        "failed to recover after {} attempts{}",
        attempts,
        last_error
            .map(|e| format!(": {e}"))
            .unwrap_or_default()
    )))
}
