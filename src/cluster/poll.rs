//! Bounded polling
//!
//! [`wait_for`] drives a producer until a validator accepts its result or an
//! abort check gives up. [`ExecutionDeadline`] is the usual abort check: the
//! invocation's execution budget minus a safety margin.

use chrono::{DateTime, Utc};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{AutoscaleError, Result};

/// Poll `producer` every `interval` until `validator` accepts a value.
///
/// `abort` runs before every attempt; once it returns true the poll fails
/// with [`AutoscaleError::ElectionTimeout`]. Producer errors end the poll
/// immediately.
pub async fn wait_for<T, P, Fut, V, A>(
    mut producer: P,
    mut validator: V,
    interval: Duration,
    mut abort: A,
) -> Result<T>
where
    P: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
    V: FnMut(&T) -> bool,
    A: FnMut() -> bool,
{
    let mut attempts: u32 = 0;
    loop {
        if abort() {
            return Err(AutoscaleError::ElectionTimeout(format!(
                "gave up after {} attempts",
                attempts
            )));
        }

        let value = producer().await?;
        attempts += 1;

        if validator(&value) {
            debug!(attempts, "poll condition satisfied");
            return Ok(value);
        }

        tokio::time::sleep(interval).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExecutionDeadline {
    expires_at: DateTime<Utc>,
    safety_margin: chrono::Duration,
}

impl ExecutionDeadline {
    pub fn new(expires_at: DateTime<Utc>, safety_margin: Duration) -> Result<Self> {
        Ok(Self {
            expires_at,
            safety_margin: to_chrono(safety_margin)?,
        })
    }

    /// Deadline `budget` from now.
    pub fn from_budget(budget: Duration, safety_margin: Duration) -> Result<Self> {
        let expires_at = Utc::now()
            .checked_add_signed(to_chrono(budget)?)
            .ok_or_else(|| AutoscaleError::config(format!("execution budget {:?} is out of range", budget)))?;
        Self::new(expires_at, safety_margin)
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        match self.expires_at.checked_sub_signed(self.safety_margin) {
            Some(cutoff) => now >= cutoff,
            None => true,
        }
    }

    /// Abort check for [`wait_for`].
    pub fn is_expired(&self) -> bool {
        let expired = self.is_expired_at(Utc::now());
        if expired {
            warn!("script execution is about to expire at {}", self.expires_at);
        }
        expired
    }
}

fn to_chrono(duration: Duration) -> Result<chrono::Duration> {
    chrono::Duration::from_std(duration)
        .map_err(|_| AutoscaleError::config(format!("duration {:?} is out of range", duration)))
}
