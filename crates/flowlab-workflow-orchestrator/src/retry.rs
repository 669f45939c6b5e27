use std::time::Duration;

use flowlab_config::RetryBackoff;
use serde::{Deserialize, Serialize};

/// How failed executor calls are retried.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
  /// Additional attempts after the first.
  pub max_retry_attempts: u32,
  pub backoff: RetryBackoff,
  pub base_delay_ms: u64,
  pub max_delay_ms: u64,
}

impl Default for RetryPolicy {
  fn default() -> Self {
    Self {
      max_retry_attempts: 0,
      backoff: RetryBackoff::Constant,
      base_delay_ms: 100,
      max_delay_ms: 30_000,
    }
  }
}

impl RetryPolicy {
  pub fn none() -> Self {
    Self::default()
  }

  pub fn attempts(max_retry_attempts: u32) -> Self {
    Self {
      max_retry_attempts,
      ..Self::default()
    }
  }

  pub fn with_backoff(mut self, backoff: RetryBackoff, base_delay_ms: u64) -> Self {
    self.backoff = backoff;
    self.base_delay_ms = base_delay_ms;
    self
  }

  /// Delay before retry number `retry` (1-based).
  pub fn delay(&self, retry: u32) -> Duration {
    let retry = retry.max(1);
    let ms = match self.backoff {
      RetryBackoff::Constant => self.base_delay_ms,
      RetryBackoff::Linear => self.base_delay_ms.saturating_mul(u64::from(retry)),
      RetryBackoff::Exponential => {
        let factor = 1u64.checked_shl(retry - 1).unwrap_or(u64::MAX);
        self.base_delay_ms.saturating_mul(factor)
      }
    };
    Duration::from_millis(ms.min(self.max_delay_ms))
  }
}
