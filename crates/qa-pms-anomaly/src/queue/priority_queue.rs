//! Redis-backed, severity-ranked priority queue (§4.7). One sorted set per
//! band, scored by a priority computed from band rank, final score,
//! timestamp, and repo criticality.

use async_trait::async_trait;
use chrono::Utc;
use qa_pms_config::engine::QueueLimits;
use qa_pms_core::health::{HealthCheck, HealthCheckResult};
use redis::AsyncCommands;
use tracing::warn;

use crate::store::{anomaly_queue_key, anomaly_queue_metadata_key, DEAD_LETTER_QUEUE_KEY};
use crate::types::{ScoredEvent, SeverityBand};

const ALL_BANDS_HIGH_TO_LOW: [SeverityBand; 5] = [
    SeverityBand::Critical,
    SeverityBand::High,
    SeverityBand::Medium,
    SeverityBand::Low,
    SeverityBand::Info,
];

const MAX_REQUEUE_ATTEMPTS: u32 = 3;
const EVICTION_FRACTION: f64 = 0.10;
const HIGH_UTILIZATION_WARNING: f64 = 0.90;

/// A queue item wrapping a `ScoredEvent` with requeue bookkeeping.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueueItem {
    pub event: ScoredEvent,
    pub enqueued_at: chrono::DateTime<Utc>,
    pub attempts: u32,
    pub boost: f64,
}

/// Queue health/size snapshot returned by `stats`/`health_check`.
#[derive(Debug, Clone)]
pub struct QueueStats {
    pub band: SeverityBand,
    pub size: u64,
    pub capacity: usize,
    pub utilization: f64,
    pub oldest: Option<chrono::DateTime<Utc>>,
    pub newest: Option<chrono::DateTime<Utc>>,
    pub warning: bool,
}

pub struct PriorityQueue {
    redis: redis::aio::ConnectionManager,
    limits: QueueLimits,
}

impl PriorityQueue {
    #[must_use]
    pub fn new(redis: redis::aio::ConnectionManager, limits: QueueLimits) -> Self {
        Self { redis, limits }
    }

    /// Insert an item, computing its priority and evicting the lowest 10% of
    /// the band's queue first if it's already at capacity.
    pub async fn enqueue(&mut self, event: ScoredEvent, repo_criticality: f64, boost: f64) -> anyhow::Result<()> {
        let band = event.band;
        let key = anomaly_queue_key(band);
        let limits = self.band_limits(band);

        let size: u64 = self.redis.zcard(&key).await?;
        if size as usize >= limits.capacity {
            self.evict_lowest(&key, limits.capacity).await?;
        }

        let priority = priority_score(band, event.final_score, event.event_timestamp, repo_criticality, boost);
        let item = QueueItem { event, enqueued_at: Utc::now(), attempts: 0, boost };
        let payload = serde_json::to_string(&item)?;

        let _: () = self.redis.zadd(&key, payload, priority).await?;
        let _: () = self.redis.expire(&key, limits.ttl.as_secs() as i64).await?;
        Ok(())
    }

    /// Pop the highest-priority item from the first non-empty band, scanning
    /// `bands` (or critical→info by default).
    pub async fn dequeue(&mut self, bands: Option<&[SeverityBand]>) -> anyhow::Result<Option<QueueItem>> {
        let scan_order = bands.unwrap_or(&ALL_BANDS_HIGH_TO_LOW);
        for band in scan_order {
            let key = anomaly_queue_key(*band);
            let popped: Vec<(String, f64)> = self.redis.zpopmax(&key, 1).await?;
            if let Some((payload, _score)) = popped.into_iter().next() {
                match serde_json::from_str::<QueueItem>(&payload) {
                    Ok(item) => return Ok(Some(item)),
                    Err(err) => {
                        warn!(error = %err, "dropping malformed queue item during dequeue");
                        continue;
                    }
                }
            }
        }
        Ok(None)
    }

    /// Non-destructive read of the top `k` items in a band, highest first.
    pub async fn peek(&mut self, band: SeverityBand, k: usize) -> anyhow::Result<Vec<QueueItem>> {
        let key = anomaly_queue_key(band);
        let raw: Vec<(String, f64)> = self.redis.zrevrange_withscores(&key, 0, k as isize - 1).await?;
        Ok(raw
            .into_iter()
            .filter_map(|(payload, _)| serde_json::from_str(&payload).ok())
            .collect())
    }

    /// Increment the attempt count and either move to the dead-letter queue
    /// (at `max_attempts`) or sleep `delay` and reinsert at 0.9x priority.
    pub async fn requeue(
        &mut self,
        mut item: QueueItem,
        repo_criticality: f64,
        delay: std::time::Duration,
    ) -> anyhow::Result<()> {
        item.attempts += 1;

        if item.attempts >= MAX_REQUEUE_ATTEMPTS {
            let payload = serde_json::to_string(&item)?;
            let _: () = self.redis.zadd(DEAD_LETTER_QUEUE_KEY, payload, Utc::now().timestamp() as f64).await?;
            let _: () = self
                .redis
                .expire(DEAD_LETTER_QUEUE_KEY, self.limits.dead_letter_ttl.as_secs() as i64)
                .await?;
            return Ok(());
        }

        tokio::time::sleep(delay).await;

        let band = item.event.band;
        let key = anomaly_queue_key(band);
        let priority =
            priority_score(band, item.event.final_score, item.event.event_timestamp, repo_criticality, item.boost)
                * 0.9;
        let payload = serde_json::to_string(&item)?;
        let _: () = self.redis.zadd(&key, payload, priority).await?;
        Ok(())
    }

    /// Drop items older than the band's TTL, plus any item that fails to
    /// deserialize.
    pub async fn cleanup_expired(&mut self) -> anyhow::Result<u64> {
        let mut removed = 0u64;
        for band in ALL_BANDS_HIGH_TO_LOW {
            let key = anomaly_queue_key(band);
            let ttl = self.band_limits(band).ttl;
            let cutoff = Utc::now() - chrono::Duration::from_std(ttl).unwrap_or_default();

            let all: Vec<String> = self.redis.zrange(&key, 0, -1).await?;
            for payload in all {
                let expired_or_malformed = match serde_json::from_str::<QueueItem>(&payload) {
                    Ok(item) => item.enqueued_at < cutoff,
                    Err(_) => true,
                };
                if expired_or_malformed {
                    let _: () = self.redis.zrem(&key, &payload).await?;
                    removed += 1;
                }
            }
        }
        Ok(removed)
    }

    pub async fn stats(&mut self, band: SeverityBand) -> anyhow::Result<QueueStats> {
        let limits = self.band_limits(band);
        band_stats(&mut self.redis, band, limits).await
    }

    /// Aggregate stats/health across every band, used by the health-check
    /// surface.
    pub async fn health_check(&mut self) -> anyhow::Result<Vec<QueueStats>> {
        let mut all = Vec::with_capacity(5);
        for band in ALL_BANDS_HIGH_TO_LOW {
            all.push(self.stats(band).await?);
        }
        Ok(all)
    }

    async fn evict_lowest(&mut self, key: &str, capacity: usize) -> anyhow::Result<()> {
        let evict_count = ((capacity as f64 * EVICTION_FRACTION).ceil() as isize).max(1);
        let _: () = self.redis.zremrangebyrank(key, 0, evict_count - 1).await?;
        Ok(())
    }

    fn band_limits(&self, band: SeverityBand) -> qa_pms_config::engine::BandQueueLimits {
        match band {
            SeverityBand::Critical => self.limits.critical,
            SeverityBand::High => self.limits.high,
            SeverityBand::Medium => self.limits.medium,
            SeverityBand::Low => self.limits.low,
            SeverityBand::Info => self.limits.info,
        }
    }
}

#[async_trait]
impl HealthCheck for PriorityQueue {
    fn integration_name(&self) -> &str {
        "anomaly_priority_queue"
    }

    /// Degraded if any band is at or above the high-utilization threshold,
    /// offline if Redis itself can't be reached.
    async fn check(&self) -> HealthCheckResult {
        let started = std::time::Instant::now();
        let mut conn = self.redis.clone();
        let mut stats = Vec::with_capacity(ALL_BANDS_HIGH_TO_LOW.len());
        for band in ALL_BANDS_HIGH_TO_LOW {
            match band_stats(&mut conn, band, self.band_limits(band)).await {
                Ok(s) => stats.push(s),
                Err(err) => {
                    return HealthCheckResult::offline(
                        self.integration_name(),
                        &format!("failed to read queue stats: {err}"),
                    );
                }
            }
        }

        let warnings: Vec<String> = stats
            .iter()
            .filter(|s| s.warning)
            .map(|s| format!("{} band at {:.0}% capacity", s.band.as_str(), s.utilization * 100.0))
            .collect();

        if warnings.is_empty() {
            HealthCheckResult::online(self.integration_name(), started.elapsed())
        } else {
            HealthCheckResult::degraded(self.integration_name(), started.elapsed(), &warnings.join("; "))
        }
    }
}

async fn band_stats(
    conn: &mut redis::aio::ConnectionManager,
    band: SeverityBand,
    limits: qa_pms_config::engine::BandQueueLimits,
) -> anyhow::Result<QueueStats> {
    let key = anomaly_queue_key(band);
    let size: u64 = conn.zcard(&key).await?;

    let oldest = conn
        .zrange_withscores::<_, Vec<(String, f64)>>(&key, 0, 0)
        .await?
        .into_iter()
        .next()
        .and_then(|(payload, _)| serde_json::from_str::<QueueItem>(&payload).ok())
        .map(|item| item.enqueued_at);
    let newest = conn
        .zrevrange_withscores::<_, Vec<(String, f64)>>(&key, 0, 0)
        .await?
        .into_iter()
        .next()
        .and_then(|(payload, _)| serde_json::from_str::<QueueItem>(&payload).ok())
        .map(|item| item.enqueued_at);

    let utilization = size as f64 / limits.capacity as f64;
    Ok(QueueStats {
        band,
        size,
        capacity: limits.capacity,
        utilization,
        oldest,
        newest,
        warning: utilization >= HIGH_UTILIZATION_WARNING,
    })
}

/// `P = 10^k(band) + 1000*final_score + ts*1e-3 + 100*repo_criticality + 50*boost`.
fn priority_score(
    band: SeverityBand,
    final_score: f64,
    event_timestamp: chrono::DateTime<Utc>,
    repo_criticality: f64,
    boost: f64,
) -> f64 {
    10f64.powi(i32::from(band.rank()))
        + 1000.0 * final_score
        + event_timestamp.timestamp() as f64 * 1e-3
        + 100.0 * repo_criticality
        + 50.0 * boost
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_orders_by_band_first() {
        let now = Utc::now();
        let critical = priority_score(SeverityBand::Critical, 0.01, now, 0.0, 0.0);
        let high = priority_score(SeverityBand::High, 1.0, now, 1.0, 1.0);
        assert!(critical > high);
    }

    #[test]
    fn test_priority_orders_by_score_within_band() {
        let now = Utc::now();
        let low_score = priority_score(SeverityBand::High, 0.1, now, 0.0, 0.0);
        let high_score = priority_score(SeverityBand::High, 0.9, now, 0.0, 0.0);
        assert!(high_score > low_score);
    }
}
