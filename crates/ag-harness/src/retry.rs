use std::future::Future;
use std::time::Duration;

use ag_core::config::CollaboratorsConfig;
use tracing::{debug, warn};

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

/// Failure of an outbound call made through a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CollaboratorError {
    /// A single attempt exceeded the per-attempt timeout.
    #[error("{name} timed out after {timeout:?}")]
    Timeout { name: String, timeout: Duration },

    /// A single attempt returned an error.
    #[error("{name} failed: {message}")]
    Failed { name: String, message: String },

    /// Every attempt failed; `last` describes the final one.
    #[error("{name} unavailable after {attempts} attempt(s): {last}")]
    Unavailable {
        name: String,
        attempts: u32,
        last: String,
    },
}

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Bounded attempts, a per-attempt timeout and a fixed delay between attempts.
///
/// Shared by every outbound collaborator so a slow or dead dependency can
/// stall a pulse for at most `attempts * (timeout + delay)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub timeout: Duration,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&CollaboratorsConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(attempts: u32, timeout: Duration, delay: Duration) -> Self {
        Self {
            attempts: attempts.max(1),
            timeout,
            delay,
        }
    }

    pub fn from_config(cfg: &CollaboratorsConfig) -> Self {
        Self::new(
            cfg.retry_attempts,
            Duration::from_secs(cfg.timeout_secs),
            Duration::from_millis(cfg.retry_delay_ms),
        )
    }

    /// Run `f` up to `attempts` times, each bounded by `timeout`.
    pub async fn run<F, Fut, T, E>(&self, name: &str, mut f: F) -> Result<T, CollaboratorError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        let mut last = String::new();
        for attempt in 1..=self.attempts {
            match self.attempt(name, f()).await {
                Ok(value) => {
                    debug!(collaborator = name, attempt, "call succeeded");
                    return Ok(value);
                }
                Err(e) => {
                    warn!(collaborator = name, attempt, of = self.attempts, error = %e, "call failed");
                    last = e.to_string();
                }
            }
            if attempt < self.attempts && !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
        }
        Err(CollaboratorError::Unavailable {
            name: name.to_string(),
            attempts: self.attempts,
            last,
        })
    }

    /// Run `f` exactly once, bounded by `timeout`. For calls that must not repeat.
    pub async fn run_once<Fut, T, E>(&self, name: &str, fut: Fut) -> Result<T, CollaboratorError>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        self.attempt(name, fut).await
    }

    async fn attempt<Fut, T, E>(&self, name: &str, fut: Fut) -> Result<T, CollaboratorError>
    where
        Fut: Future<Output = Result<T, E>>,
        E: std::fmt::Display,
    {
        match tokio::time::timeout(self.timeout, fut).await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(CollaboratorError::Failed {
                name: name.to_string(),
                message: e.to_string(),
            }),
            Err(_elapsed) => Err(CollaboratorError::Timeout {
                name: name.to_string(),
                timeout: self.timeout,
            }),
        }
    }
}
