//! Per-user EWMA baseline manager, backed by Redis. The sole writer of a
//! user's `UserBaseline` (§5's shared-resource policy).

use std::collections::HashMap;
use std::time::Duration;

use chrono::{DateTime, Timelike, Utc};
use qa_pms_config::engine::EwmaAlphas;
use redis::AsyncCommands;
use tracing::debug;

use crate::math::{coefficient_of_variation, ewma_update_dual, z_score};
use crate::store::user_profile_key;
use crate::types::{BehavioralFeatures, UserBaseline};

const PROBABILITY_DROP_THRESHOLD: f64 = 0.01;
const UPDATE_INTERVAL: Duration = Duration::from_secs(3600);

/// A single feature found to deviate from baseline, returned by `analyze_change`.
#[derive(Debug, Clone)]
pub struct FeatureChange {
    pub index: usize,
    pub z_score: f64,
    pub percent_change: f64,
    pub direction: ChangeDirection,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeDirection {
    Increase,
    Decrease,
}

/// Read-only observability projection over a user's baseline (§4.5).
#[derive(Debug, Clone)]
pub struct ActivitySummary {
    pub total_events: u64,
    pub profile_age_days: f64,
    pub most_active_hour: u32,
    pub preferred_repos: Vec<String>,
    pub is_reliable: bool,
}

pub struct UserProfileManager {
    redis: redis::aio::ConnectionManager,
    alphas: EwmaAlphas,
}

impl UserProfileManager {
    #[must_use]
    pub fn new(redis: redis::aio::ConnectionManager, alphas: EwmaAlphas) -> Self {
        Self { redis, alphas }
    }

    /// Fetch the user's baseline, creating and persisting a fresh one if none
    /// exists yet.
    pub async fn get_or_create(&mut self, login: &str) -> anyhow::Result<UserBaseline> {
        if let Some(existing) = self.get_baseline(login).await? {
            return Ok(existing);
        }
        let fresh = UserBaseline::new(login, Utc::now());
        self.persist(&fresh).await?;
        Ok(fresh)
    }

    pub async fn get_baseline(&mut self, login: &str) -> anyhow::Result<Option<UserBaseline>> {
        let raw: Option<String> = self.redis.get(user_profile_key(login)).await?;
        match raw {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Fold a new feature observation into the baseline, subject to the
    /// per-login rate limit. Returns `Ok(None)` when the update was skipped
    /// because it arrived within `update_interval` of the last one.
    pub async fn update(
        &mut self,
        login: &str,
        features: &BehavioralFeatures,
        event_type: &str,
        repo_name: &str,
        at: DateTime<Utc>,
    ) -> anyhow::Result<Option<UserBaseline>> {
        let mut baseline = self.get_or_create(login).await?;

        if baseline.total_events > 0
            && (at - baseline.last_updated).to_std().unwrap_or(Duration::ZERO) < UPDATE_INTERVAL
        {
            debug!(login, "profile update skipped, within rate-limit window");
            return Ok(None);
        }

        let first = baseline.total_events == 0;
        for i in 0..10 {
            let (mean, variance) = ewma_update_dual(
                baseline.mean[i],
                baseline.std[i].powi(2),
                features[i],
                self.alphas.user_fast,
                self.alphas.user_slow,
                first,
            );
            baseline.mean[i] = mean;
            baseline.std[i] = variance.sqrt();
        }

        baseline.history.push(*features);
        if baseline.history.len() > UserBaseline::MAX_HISTORY {
            baseline.history.remove(0);
        }

        let hour = at.hour() as usize;
        update_distribution_bucket(&mut baseline.hour_distribution, hour, first);

        update_categorical_ewma(&mut baseline.event_type_distribution, event_type, first);
        *baseline.top_repos.entry(repo_name.to_string()).or_insert(0) += 1;

        baseline.total_events += 1;
        baseline.last_updated = at;

        self.persist(&baseline).await?;
        Ok(Some(baseline))
    }

    /// Compare `features` against the stored baseline without mutating it.
    #[must_use]
    pub fn analyze_change(features: &BehavioralFeatures, baseline: &UserBaseline) -> (Vec<FeatureChange>, f64) {
        let mut changes = Vec::new();
        let mut abs_z_sum = 0.0;

        for i in 0..10 {
            let z = z_score(features[i], baseline.mean[i], baseline.std[i]);
            abs_z_sum += z;
            if z > 2.0 {
                let percent_change = if baseline.mean[i].abs() > 1e-10 {
                    (features[i] - baseline.mean[i]) / baseline.mean[i] * 100.0
                } else {
                    0.0
                };
                changes.push(FeatureChange {
                    index: i,
                    z_score: z,
                    percent_change,
                    direction: if features[i] >= baseline.mean[i] {
                        ChangeDirection::Increase
                    } else {
                        ChangeDirection::Decrease
                    },
                });
            }
        }

        let score = (abs_z_sum / 10.0 / 5.0).min(1.0);
        (changes, score)
    }

    /// Inverse of the mean coefficient of variation across the last 10
    /// history rows; higher means a more stable, predictable profile.
    #[must_use]
    pub fn profile_stability(baseline: &UserBaseline) -> f64 {
        let recent: Vec<&BehavioralFeatures> = baseline.history.iter().rev().take(10).collect();
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

    #[must_use]
    pub fn activity_summary(baseline: &UserBaseline) -> ActivitySummary {
        let most_active_hour = baseline
            .hour_distribution
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map_or(0, |(hour, _)| hour as u32);

        let mut preferred_repos: Vec<(String, u64)> =
            baseline.top_repos.iter().map(|(k, v)| (k.clone(), *v)).collect();
        preferred_repos.sort_by(|a, b| b.1.cmp(&a.1));

        ActivitySummary {
            total_events: baseline.total_events,
            profile_age_days: (Utc::now() - baseline.first_seen).num_seconds() as f64 / 86400.0,
            most_active_hour,
            preferred_repos: preferred_repos.into_iter().take(5).map(|(repo, _)| repo).collect(),
            is_reliable: baseline.is_reliable(),
        }
    }

    async fn persist(&mut self, baseline: &UserBaseline) -> anyhow::Result<()> {
        let json = serde_json::to_string(baseline)?;
        let _: () = self.redis.set(user_profile_key(&baseline.login), json).await?;
        Ok(())
    }
}

/// EWMA update of a discrete distribution held as a probability bucket
/// array, pruning entries that fall below [`PROBABILITY_DROP_THRESHOLD`].
fn update_distribution_bucket(distribution: &mut [f64; 24], observed_index: usize, first: bool) {
    if first {
        distribution.fill(0.0);
        distribution[observed_index] = 1.0;
        return;
    }
    const ALPHA: f64 = 0.1;
    for (i, bucket) in distribution.iter_mut().enumerate() {
        let observed = if i == observed_index { 1.0 } else { 0.0 };
        *bucket = ALPHA * observed + (1.0 - ALPHA) * *bucket;
        if *bucket < PROBABILITY_DROP_THRESHOLD {
            *bucket = 0.0;
        }
    }
}

fn update_categorical_ewma(distribution: &mut HashMap<String, f64>, observed: &str, first: bool) {
    const ALPHA: f64 = 0.1;
    if first {
        distribution.clear();
        distribution.insert(observed.to_string(), 1.0);
        return;
    }
    for (key, value) in distribution.iter_mut() {
        let hit = if key == observed { 1.0 } else { 0.0 };
        *value = ALPHA * hit + (1.0 - ALPHA) * *value;
    }
    if !distribution.contains_key(observed) {
        distribution.insert(observed.to_string(), ALPHA);
    }
    distribution.retain(|_, v| *v >= PROBABILITY_DROP_THRESHOLD);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_analyze_change_flags_large_deviation() {
        let mut baseline = UserBaseline::new("alice", Utc::now());
        baseline.mean = [1.0; 10];
        baseline.std = [0.1; 10];
        let mut features = [1.0; 10];
        features[0] = 5.0;
        let (changes, score) = UserProfileManager::analyze_change(&features, &baseline);
        assert!(changes.iter().any(|c| c.index == 0));
        assert!(score > 0.0);
    }

    #[test]
    fn test_profile_stability_constant_history_is_maximal() {
        let mut baseline = UserBaseline::new("alice", Utc::now());
        baseline.history = vec![[1.0; 10]; 10];
        let stability = UserProfileManager::profile_stability(&baseline);
        assert!((stability - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_distribution_bucket_first_update_is_one_hot() {
        let mut dist = [0.0; 24];
        update_distribution_bucket(&mut dist, 5, true);
        assert!((dist[5] - 1.0).abs() < 1e-9);
        assert_eq!(dist.iter().filter(|v| **v > 0.0).count(), 1);
    }

    #[test]
    fn test_categorical_ewma_drops_small_entries() {
        let mut dist = HashMap::new();
        update_categorical_ewma(&mut dist, "push", true);
        for _ in 0..50 {
            update_categorical_ewma(&mut dist, "push", false);
        }
        assert!(dist.get("push").copied().unwrap_or(0.0) > 0.9);
    }

    #[test]
    fn test_activity_summary_reports_reliability() {
        let mut baseline = UserBaseline::new("alice", Utc::now());
        baseline.total_events = UserBaseline::MIN_RELIABLE_EVENTS;
        let summary = UserProfileManager::activity_summary(&baseline);
        assert!(summary.is_reliable);
    }
}
