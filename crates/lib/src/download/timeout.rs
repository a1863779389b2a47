//! Per-attempt deadlines that outlive the caller's cancellation.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// The attempt ran past its deadline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("attempt deadline exceeded")]
pub struct Expired;

/// A cancellation scope for a single attempt.
///
/// The token is fresh rather than a child of the caller's, so cancelling the
/// caller does not cut an attempt short. It is cancelled when the attempt
/// deadline passes, and that deadline never extends past the overall ceiling.
#[derive(Debug, Clone)]
pub struct AttemptScope {
  token: CancellationToken,
  deadline: Instant,
}

/// Create a scope expiring after `timeout` or at `ceiling`, whichever is
/// sooner.
pub fn with_isolated_timeout(ceiling: Instant, timeout: Duration) -> AttemptScope {
  AttemptScope {
    token: CancellationToken::new(),
    deadline: ceiling.min(Instant::now() + timeout),
  }
}

impl AttemptScope {
  pub fn token(&self) -> &CancellationToken {
    &self.token
  }

  pub fn deadline(&self) -> Instant {
    self.deadline
  }

  pub fn remaining(&self) -> Duration {
    self.deadline.saturating_duration_since(Instant::now())
  }

  /// Drive `fut` until it completes or the scope expires.
  ///
  /// The future stays in the caller's span. On expiry the token is cancelled
  /// so anything else holding it stops as well.
  pub async fn run<F: Future>(&self, fut: F) -> Result<F::Output, Expired> {
    tokio::select! {
      biased;
      _ = self.token.cancelled() => Err(Expired),
      out = fut.in_current_span() => Ok(out),
      _ = sleep_until(self.deadline) => {
        self.token.cancel();
        Err(Expired)
      }
    }
  }
}
