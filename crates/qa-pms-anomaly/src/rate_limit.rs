//! GitHub rate-limit coordination shared across concurrent pollers: a
//! process-local semaphore plus a Redis-backed remaining-quota record and
//! circuit breaker (§5).

use std::sync::Arc;

use qa_pms_config::engine::RateLimitSettings;
use redis::AsyncCommands;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tracing::{info, warn};

use crate::error::{EngineError, EngineResult};
use crate::store::{CIRCUIT_BREAKER_KEY, RATE_LIMIT_KEY};

/// A held semaphore slot; dropping it releases the slot back to the pool.
pub struct RateLimitGuard {
    _permit: OwnedSemaphorePermit,
}

/// Coordinates outbound GitHub API calls across concurrent pollers.
pub struct GithubRateLimiter {
    redis: redis::aio::ConnectionManager,
    semaphore: Arc<Semaphore>,
    settings: RateLimitSettings,
}

impl GithubRateLimiter {
    #[must_use]
    pub fn new(redis: redis::aio::ConnectionManager, settings: RateLimitSettings) -> Self {
        Self { semaphore: Arc::new(Semaphore::new(settings.semaphore_slots)), redis, settings }
    }

    /// Acquire a slot for one outbound call, refusing if the circuit breaker
    /// is open or the shared remaining-quota record is below the safety
    /// margin.
    pub async fn acquire(&mut self) -> EngineResult<RateLimitGuard> {
        if self.circuit_open().await? {
            return Err(EngineError::Configuration("GitHub circuit breaker is open".to_string()));
        }

        let remaining = self.remaining().await?;
        if let Some(remaining) = remaining {
            if remaining < self.settings.safety_margin {
                warn!(remaining, "refusing GitHub call, below safety margin");
                return Err(EngineError::Configuration(format!(
                    "GitHub remaining quota {remaining} below safety margin {}",
                    self.settings.safety_margin
                )));
            }
        }

        let permit = self
            .semaphore
            .clone()
            .acquire_owned()
            .await
            .map_err(|e| EngineError::Internal(anyhow::anyhow!(e)))?;
        Ok(RateLimitGuard { _permit: permit })
    }

    /// Record the rate-limit headers returned by a GitHub response, updating
    /// the circuit breaker as needed.
    pub async fn record_response(&mut self, remaining: i64, reset: i64) -> anyhow::Result<()> {
        let now = chrono::Utc::now().timestamp();
        let _: () = self
            .redis
            .hset_multiple(
                RATE_LIMIT_KEY,
                &[("remaining", remaining.to_string()), ("reset", reset.to_string()), ("updated_at", now.to_string())],
            )
            .await?;
        let _: () = self.redis.expire(RATE_LIMIT_KEY, self.settings.shared_record_ttl.as_secs() as i64).await?;

        if remaining < self.settings.circuit_open_below {
            info!(remaining, "opening GitHub circuit breaker");
            let _: () = self.redis.set(CIRCUIT_BREAKER_KEY, "open").await?;
            let _: () = self.redis.expire(CIRCUIT_BREAKER_KEY, self.settings.circuit_open_duration.as_secs() as i64).await?;
        } else if remaining > self.settings.circuit_close_above {
            let _: () = self.redis.del(CIRCUIT_BREAKER_KEY).await?;
        }

        Ok(())
    }

    async fn remaining(&mut self) -> anyhow::Result<Option<i64>> {
        let value: Option<String> = self.redis.hget(RATE_LIMIT_KEY, "remaining").await?;
        Ok(value.and_then(|v| v.parse().ok()))
    }

    async fn circuit_open(&mut self) -> anyhow::Result<bool> {
        let value: Option<String> = self.redis.get(CIRCUIT_BREAKER_KEY).await?;
        Ok(value.as_deref() == Some("open"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_settings_defaults_match_spec_thresholds() {
        let settings = RateLimitSettings::default();
        assert_eq!(settings.semaphore_slots, 3);
        assert_eq!(settings.safety_margin, 500);
        assert_eq!(settings.circuit_open_below, 50);
        assert_eq!(settings.circuit_close_above, 1_000);
    }
}
