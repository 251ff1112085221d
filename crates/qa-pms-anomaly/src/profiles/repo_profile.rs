//! Per-repository EWMA baseline manager, backed by Redis. Sole writer of a
//! repository's `RepoBaseline` (§5's shared-resource policy).

use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use qa_pms_config::engine::EwmaAlphas;
use redis::AsyncCommands;
use tracing::debug;

use crate::math::coefficient_of_variation;
use crate::store::repo_profile_key;
use crate::types::{EventType, RepoBaseline, RepoFeatures};

const UPDATE_INTERVAL: Duration = Duration::from_secs(1800);

/// Relative contribution of each event type to repository health scoring,
/// grounded in the original implementation's `event_type_weights`.
fn event_type_weight(event_type: EventType) -> f64 {
    match event_type {
        EventType::Push => 1.0,
        EventType::PullRequest => 1.2,
        EventType::Issues => 0.8,
        EventType::WorkflowRun => 0.9,
        EventType::Release => 1.5,
        EventType::Create => 0.7,
        EventType::Delete => 0.5,
        EventType::Fork => 0.6,
        EventType::Watch => 0.3,
        EventType::Other => 0.5,
    }
}

/// Read-only observability projection over a repo's baseline, blending
/// activity level, diversity, and build/issue signals into one score (§4.5).
#[derive(Debug, Clone)]
pub struct HealthSummary {
    pub health_score: f64,
    pub activity_level: f64,
    pub contributor_diversity: f64,
    pub build_success_rate: f64,
    pub issue_resolution_rate: f64,
    pub activity_regularity: f64,
}

pub struct RepoProfileManager {
    redis: redis::aio::ConnectionManager,
    alphas: EwmaAlphas,
}

impl RepoProfileManager {
    #[must_use]
    pub fn new(redis: redis::aio::ConnectionManager, alphas: EwmaAlphas) -> Self {
        Self { redis, alphas }
    }

    pub async fn get_or_create(&mut self, repo_name: &str) -> anyhow::Result<RepoBaseline> {
        if let Some(existing) = self.get_baseline(repo_name).await? {
            return Ok(existing);
        }
        let fresh = RepoBaseline::new(repo_name, Utc::now());
        self.persist(&fresh).await?;
        Ok(fresh)
    }

    pub async fn get_baseline(&mut self, repo_name: &str) -> anyhow::Result<Option<RepoBaseline>> {
        let raw: Option<String> = self.redis.get(repo_profile_key(repo_name)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Fold one event into the repository's rolling feature baseline.
    pub async fn update(
        &mut self,
        repo_name: &str,
        features: &RepoFeatures,
        contributor_login: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<RepoBaseline>> {
        let mut baseline = self.get_or_create(repo_name).await?;

        if baseline.total_events > 0
            && (at - baseline.last_updated).to_std().unwrap_or(Duration::ZERO) < UPDATE_INTERVAL
        {
            debug!(repo_name, "repo profile update skipped, within rate-limit window");
            return Ok(None);
        }

        let first = baseline.total_events == 0;
        for i in 0..10 {
            let (mean, variance) = crate::math::ewma_update_dual(
                baseline.mean[i],
                baseline.std[i].powi(2),
                features[i],
                self.alphas.repo_activity,
                self.alphas.repo_contributors,
                first,
            );
            baseline.mean[i] = mean;
            baseline.std[i] = variance.sqrt();
        }

        baseline.history.push(*features);
        if baseline.history.len() > RepoBaseline::MAX_HISTORY {
            baseline.history.remove(0);
        }

        let hour = at.hour() as usize;
        if first {
            baseline.hour_distribution.fill(0.0);
            baseline.hour_distribution[hour] = 1.0;
        } else {
            const ALPHA: f64 = 0.1;
            for (i, bucket) in baseline.hour_distribution.iter_mut().enumerate() {
                let observed = if i == hour { 1.0 } else { 0.0 };
                *bucket = ALPHA * observed + (1.0 - ALPHA) * *bucket;
            }
        }

        *baseline.top_contributors.entry(contributor_login.to_string()).or_insert(0) += 1;
        baseline.total_events += 1;
        baseline.last_updated = at;

        self.persist(&baseline).await?;
        Ok(Some(baseline))
    }

    /// Weighted health summary over the baseline's stored activity features.
    #[must_use]
    pub fn health_summary(baseline: &RepoBaseline) -> HealthSummary {
        let activity_level = (baseline.mean[0] / 50.0).min(1.0);
        let contributor_diversity = (baseline.mean[4]).clamp(0.0, 1.0);
        let build_success_rate = (baseline.mean[8]).clamp(0.0, 1.0);
        let issue_resolution_rate = (baseline.mean[9]).clamp(0.0, 1.0);
        let activity_regularity = (baseline.mean[5]).clamp(0.0, 1.0);

        let health_score = 0.25 * activity_level
            + 0.2 * contributor_diversity
            + 0.2 * build_success_rate
            + 0.2 * issue_resolution_rate
            + 0.15 * activity_regularity;

        HealthSummary {
            health_score: health_score.clamp(0.0, 1.0),
            activity_level,
            contributor_diversity,
            build_success_rate,
            issue_resolution_rate,
            activity_regularity,
        }
    }

    /// Inverse of the mean coefficient of variation across the last 10
    /// history rows.
    #[must_use]
    pub fn profile_stability(baseline: &RepoBaseline) -> f64 {
        let recent: Vec<&RepoFeatures> = baseline.history.iter().rev().take(10).collect();
        if recent.len() < 2 {
            return 0.0;
        }
        let mut cvs = Vec::with_capacity(10);
        for i in 0..10 {
            let column: Vec<f64> = recent.iter().map(|f| f[i]).collect();
            cvs.push(coefficient_of_variation(&column));
        }
        let mean_cv = cvs.iter().sum::<f64>() / cvs.len() as f64;
        if mean_cv.abs() < 1e-10 {
            1.0
        } else {
            (1.0 / mean_cv).min(1.0)
        }
    }

    /// Event-type-weighted activity contribution for a single event, used by
    /// callers assembling the `avg_events_per_day`-style feature upstream.
    #[must_use]
    pub fn weighted_event_contribution(event_type: EventType) -> f64 {
        event_type_weight(event_type)
    }

    /// Fold ordered `WorkflowRun` outcomes (`true` = failure) into the repo's
    /// consecutive build-failure streak: each failure increments it, any
    /// success resets it to zero. Returns the streak after folding in
    /// `outcomes`, for the `build_failure_cascade` urgency indicator.
    pub async fn record_build_outcomes(&mut self, repo_name: &str, outcomes: &[bool]) -> anyhow::Result<u32> {
        let mut baseline = self.get_or_create(repo_name).await?;
        for &is_failure in outcomes {
            if is_failure {
                baseline.consecutive_build_failures += 1;
            } else {
                baseline.consecutive_build_failures = 0;
            }
        }
        self.persist(&baseline).await?;
        Ok(baseline.consecutive_build_failures)
    }

    async fn persist(&mut self, baseline: &RepoBaseline) -> anyhow::Result<()> {
        let json = serde_json::to_string(baseline)?;
        let _: () = self.redis.set(repo_profile_key(&baseline.repo), json).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_type_weight_release_heaviest() {
        assert!(event_type_weight(EventType::Release) > event_type_weight(EventType::Push));
        assert!(event_type_weight(EventType::Push) > event_type_weight(EventType::Watch));
    }

    #[test]
    fn test_health_summary_in_unit_range() {
        let mut baseline = RepoBaseline::new("acme/repo", Utc::now());
        baseline.mean = [10.0, 3.0, 2.0, 1.0, 0.8, 0.7, 14.0, 0.2, 0.9, 0.85];
        let summary = RepoProfileManager::health_summary(&baseline);
        assert!((0.0..=1.0).contains(&summary.health_score));
    }

    #[test]
    fn test_profile_stability_requires_at_least_two_rows() {
        let baseline = RepoBaseline::new("acme/repo", Utc::now());
        assert!((RepoProfileManager::profile_stability(&baseline)).abs() < 1e-9);
    }
}
