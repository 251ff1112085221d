//! Behavioral anomaly detector: per-user 10-D feature extraction plus
//! z-score, Mahalanobis, and force-push checks against the user's baseline.

use chrono::{DateTime, Datelike, Timelike, Utc};
use tracing::info;

use crate::math::{chi_square_critical_95, clamp_finite, mahalanobis_distance, shannon_entropy, z_score};
use crate::types::{
    BehavioralAnalysis, BehavioralFeatures, DetectedAnomaly, Event, EventPayload, UserBaseline,
};

const Z_SCORE_THRESHOLD: f64 = 2.5;
const BURST_INTERVAL_MINUTES: f64 = 5.0;
const BURST_RUN_LENGTH: usize = 3;
const COLD_START_CONFIDENCE: f64 = 0.3;

/// Stateless behavioral feature extractor and anomaly scorer. All mutable
/// state (the baseline) is owned by `UserProfileManager`; this detector only
/// reads it.
pub struct BehavioralDetector;

impl BehavioralDetector {
    /// Extract the 10-D feature vector for one user's events in a batch.
    /// Returns the zero vector for an empty slice (§4.1, §8 boundary).
    #[must_use]
    pub fn extract_features(events: &[Event]) -> BehavioralFeatures {
        if events.is_empty() {
            return [0.0; 10];
        }

        let mut timestamps: Vec<DateTime<Utc>> = events.iter().map(|e| e.created_at).collect();
        timestamps.sort_unstable();

        let mut repos = std::collections::HashSet::new();
        let mut commit_lengths = Vec::new();
        let mut files_changed = Vec::new();
        let mut event_type_counts: std::collections::HashMap<&'static str, f64> =
            std::collections::HashMap::new();

        for event in events {
            repos.insert(event.repo_name.as_str());
            *event_type_counts.entry(event.event_type.as_str()).or_insert(0.0) += 1.0;

            if let EventPayload::Push { commits, size, .. } = &event.payload {
                for commit in commits {
                    commit_lengths.push(commit.message.len() as f64);
                }
                if *size > 0 {
                    files_changed.push(f64::from(*size));
                }
            }
        }

        let time_span_hours = ((timestamps[timestamps.len() - 1] - timestamps[0])
            .num_seconds() as f64
            / 3600.0)
            .max(1.0);

        let mut features = [0.0; 10];
        features[0] = events.len() as f64 / time_span_hours;
        features[1] = repos.len() as f64 / events.len() as f64;

        if timestamps.len() > 1 {
            let intervals = interval_minutes(&timestamps);
            features[2] = intervals.iter().sum::<f64>() / intervals.len() as f64;
        }

        if !commit_lengths.is_empty() {
            features[3] = commit_lengths.iter().sum::<f64>() / commit_lengths.len() as f64;
        }
        if !files_changed.is_empty() {
            features[4] = files_changed.iter().sum::<f64>() / files_changed.len() as f64;
        }

        features[5] = burst_score(&timestamps);
        features[6] = time_span_hours;
        features[7] = event_type_entropy(&event_type_counts);
        features[8] = weekend_ratio(&timestamps);
        features[9] = off_hours_ratio(&timestamps);

        for f in &mut features {
            *f = clamp_finite(*f, 0.0, f64::MAX);
        }

        features
    }

    /// Analyze one user's event batch against its baseline, or run the
    /// cold-start heuristic path when the baseline isn't reliable yet.
    #[must_use]
    pub fn analyze(events: &[Event], baseline: Option<&UserBaseline>) -> BehavioralAnalysis {
        let features = Self::extract_features(events);

        match baseline {
            Some(b) if b.is_reliable() => {
                let anomalies = detect_anomalies(&features, b);
                let score = behavioral_score(&anomalies);
                info!(sample_count = b.total_events, score, "behavioral analysis complete");
                BehavioralAnalysis {
                    features,
                    anomalies,
                    score,
                    confidence: (b.total_events as f64 / 100.0).min(1.0),
                    cold_start: false,
                }
            }
            _ => cold_start_analysis(&features, events),
        }
    }
}

fn interval_minutes(sorted_timestamps: &[DateTime<Utc>]) -> Vec<f64> {
    sorted_timestamps
        .windows(2)
        .map(|w| (w[1] - w[0]).num_seconds() as f64 / 60.0)
        .collect()
}

fn burst_score(sorted_timestamps: &[DateTime<Utc>]) -> f64 {
    if sorted_timestamps.len() < 3 {
        return 0.0;
    }
    let intervals = interval_minutes(sorted_timestamps);
    let mut burst_runs = 0usize;
    let mut run = 0usize;
    for interval in &intervals {
        if *interval < BURST_INTERVAL_MINUTES {
            run += 1;
        } else {
            if run >= BURST_RUN_LENGTH {
                burst_runs += 1;
            }
            run = 0;
        }
    }
    if run >= BURST_RUN_LENGTH {
        burst_runs += 1;
    }
    let max_runs = intervals.len() / BURST_RUN_LENGTH;
    if max_runs == 0 {
        0.0
    } else {
        (burst_runs as f64 / max_runs as f64).min(1.0)
    }
}

fn event_type_entropy(counts: &std::collections::HashMap<&'static str, f64>) -> f64 {
    if counts.len() <= 1 {
        return 0.0;
    }
    let values: Vec<f64> = counts.values().copied().collect();
    let entropy = shannon_entropy(&values);
    let max_entropy = (counts.len() as f64).log2();
    if max_entropy > 0.0 {
        entropy / max_entropy
    } else {
        0.0
    }
}

fn weekend_ratio(timestamps: &[DateTime<Utc>]) -> f64 {
    if timestamps.is_empty() {
        return 0.0;
    }
    let weekend = timestamps
        .iter()
        .filter(|ts| matches!(ts.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun))
        .count();
    weekend as f64 / timestamps.len() as f64
}

fn off_hours_ratio(timestamps: &[DateTime<Utc>]) -> f64 {
    if timestamps.is_empty() {
        return 0.0;
    }
    let off_hours = timestamps
        .iter()
        .filter(|ts| {
            let hour = ts.hour();
            (2..=10).contains(&hour) || (14..=18).contains(&hour)
        })
        .count();
    off_hours as f64 / timestamps.len() as f64
}

fn detect_anomalies(features: &BehavioralFeatures, baseline: &UserBaseline) -> Vec<DetectedAnomaly> {
    let mut anomalies = Vec::new();

    for i in 0..10 {
        let z = z_score(features[i], baseline.mean[i], baseline.std[i]);
        if z > Z_SCORE_THRESHOLD {
            anomalies.push(DetectedAnomaly {
                kind: "statistical_deviation".to_string(),
                severity: (z / 5.0).min(1.0),
                description: format!("feature[{i}] z-score {z:.2} exceeds threshold"),
            });
        }
    }

    if baseline.history.len() > 10 {
        if let Some(cov) = sample_covariance(&baseline.history, &baseline.mean) {
            if let Some(distance) = mahalanobis_distance(features, &baseline.mean, &cov) {
                let critical = chi_square_critical_95(10);
                if distance > critical {
                    anomalies.push(DetectedAnomaly {
                        kind: "multivariate_anomaly".to_string(),
                        severity: (distance / (2.0 * critical)).min(1.0),
                        description: format!(
                            "Mahalanobis distance {distance:.2} exceeds critical value {critical:.2}"
                        ),
                    });
                }
            }
        }
    }

    anomalies
}

/// Sample covariance matrix of the history, regularized by `+ 1e-6 * I` to
/// guard invertibility (§4.1, §9).
fn sample_covariance(history: &[BehavioralFeatures], mean: &BehavioralFeatures) -> Option<[[f64; 10]; 10]> {
    if history.is_empty() {
        return None;
    }
    let n = history.len() as f64;
    let mut cov = [[0.0; 10]; 10];
    for row in history {
        for i in 0..10 {
            for j in 0..10 {
                cov[i][j] += (row[i] - mean[i]) * (row[j] - mean[j]);
            }
        }
    }
    for i in 0..10 {
        for j in 0..10 {
            cov[i][j] /= n;
        }
        cov[i][i] += 1e-6;
    }
    Some(cov)
}

fn behavioral_score(anomalies: &[DetectedAnomaly]) -> f64 {
    if anomalies.is_empty() {
        return 0.0;
    }
    let mut weighted_sum = 0.0;
    let mut weight_total = 0.0;
    for anomaly in anomalies {
        let weight = match anomaly.kind.as_str() {
            "statistical_deviation" => 0.6,
            "multivariate_anomaly" => 0.4,
            _ => 0.3,
        };
        weighted_sum += anomaly.severity * weight;
        weight_total += weight;
    }
    if weight_total <= 0.0 {
        0.0
    } else {
        (weighted_sum / weight_total).min(1.0)
    }
}

fn force_push_score(events: &[Event]) -> f64 {
    let mut score = 0.0_f64;
    for event in events {
        if let EventPayload::Push { forced, commits, distinct_size, .. } = &event.payload {
            if *forced {
                score = score.max(0.9);
            }
            for commit in commits {
                let lower = commit.message.to_lowercase();
                if ["force push", "rewrite", "amend", "--force"]
                    .iter()
                    .any(|marker| lower.contains(marker))
                {
                    score = score.max(0.7);
                }
            }
            if commits.len() == 1 && *distinct_size <= 1 {
                score = score.max(0.6);
            }
        }
    }
    score.min(0.9)
}

fn cold_start_analysis(features: &BehavioralFeatures, events: &[Event]) -> BehavioralAnalysis {
    let mut anomalies = Vec::new();

    push_tiered(&mut anomalies, features[0], 2.0, 5.0, 10.0, false, "events_per_hour");
    push_tiered(&mut anomalies, features[5], 0.2, 0.4, 0.7, false, "activity_burst_score");
    push_tiered(&mut anomalies, features[7], 0.1, 0.2, 0.3, true, "event_type_entropy");
    push_tiered(&mut anomalies, features[9], 0.4, 0.6, 0.8, false, "off_hours_activity_ratio");
    push_tiered(&mut anomalies, features[1], 0.05, 0.1, 0.15, true, "repository_diversity_ratio");

    let force_push = force_push_score(events);
    if force_push > 0.0 {
        anomalies.push(DetectedAnomaly {
            kind: "force_push_pattern".to_string(),
            severity: force_push,
            description: "force-push indicators detected in push payload".to_string(),
        });
    }

    let score = if anomalies.is_empty() {
        0.0
    } else {
        anomalies.iter().map(|a| a.severity).sum::<f64>() / anomalies.len() as f64
    };

    BehavioralAnalysis {
        features: *features,
        anomalies,
        score,
        confidence: COLD_START_CONFIDENCE,
        cold_start: true,
    }
}

/// Multi-tier heuristic threshold check. When `inverted` is true, *low*
/// values are suspicious (diversity/entropy features); otherwise *high*
/// values are (activity/off-hours features).
#[allow(clippy::too_many_arguments)]
fn push_tiered(
    anomalies: &mut Vec<DetectedAnomaly>,
    value: f64,
    low: f64,
    medium: f64,
    high: f64,
    inverted: bool,
    feature_name: &str,
) {
    let (severity, kind) = if inverted {
        if value < low {
            (0.8 + 0.1 * (1.0 - value).clamp(0.0, 1.0), "critical_low_diversity")
        } else if value < medium {
            (0.6 + 0.1 * (medium - value) / medium, "moderate_low_diversity")
        } else if value < high {
            (0.4 + 0.1 * (high - value) / high, "low_diversity_pattern")
        } else {
            return;
        }
    } else if value > high {
        (0.7 + 0.2 * (value / high - 1.0).min(1.0), "elevated_high")
    } else if value > medium {
        (0.5 + 0.2 * (value - medium) / (high - medium), "elevated_moderate")
    } else if value > low {
        (0.3 + 0.2 * (value - low) / (medium - low), "elevated_low")
    } else {
        return;
    };

    anomalies.push(DetectedAnomaly {
        kind: format!("{kind}:{feature_name}"),
        severity: severity.min(1.0),
        description: format!("{feature_name} = {value:.3} crossed a cold-start heuristic tier"),
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;

    fn push_event(login: &str, repo: &str, at: DateTime<Utc>, forced: bool) -> Event {
        Event {
            id: format!("{login}-{at}"),
            event_type: EventType::Push,
            actor_login: login.to_string(),
            repo_name: repo.to_string(),
            created_at: at,
            payload: EventPayload::Push {
                commits: vec![],
                ref_name: "refs/heads/main".to_string(),
                size: 1,
                distinct_size: 1,
                forced,
            },
        }
    }

    #[test]
    fn test_empty_events_yield_zero_vector() {
        let features = BehavioralDetector::extract_features(&[]);
        assert_eq!(features, [0.0; 10]);
    }

    #[test]
    fn test_single_event_time_span_defaults_to_one_hour() {
        let events = vec![push_event("alice", "acme/repo", Utc::now(), false)];
        let features = BehavioralDetector::extract_features(&events);
        assert!((features[6] - 1.0).abs() < 1e-9);
        assert!((features[5]).abs() < 1e-9);
    }

    #[test]
    fn test_burst_of_tight_pushes_scores_high_burst() {
        let base = Utc::now();
        let events: Vec<Event> = (0..10)
            .map(|i| push_event("alice", "acme/repo", base + chrono::Duration::seconds(i * 10), false))
            .collect();
        let features = BehavioralDetector::extract_features(&events);
        assert!(features[5] > 0.0, "expected burst_score > 0, got {}", features[5]);
    }

    #[test]
    fn test_cold_start_used_when_baseline_unreliable() {
        let base = Utc::now();
        let events: Vec<Event> = (0..5)
            .map(|i| push_event("bob", "acme/repo", base + chrono::Duration::minutes(i), false))
            .collect();
        let analysis = BehavioralDetector::analyze(&events, None);
        assert!(analysis.cold_start);
        assert!((analysis.confidence - COLD_START_CONFIDENCE).abs() < 1e-9);
    }

    #[test]
    fn test_force_push_flagged_via_forced_flag() {
        let events = vec![push_event("alice", "acme/repo", Utc::now(), true)];
        assert!(force_push_score(&events) >= 0.9);
    }

    #[test]
    fn test_reliable_baseline_runs_statistical_path() {
        let base = Utc::now();
        let mut baseline = UserBaseline::new("alice", base);
        baseline.total_events = 50;
        baseline.mean = [1.0; 10];
        baseline.std = [0.1; 10];
        let events: Vec<Event> = (0..3)
            .map(|i| push_event("alice", "acme/repo", base + chrono::Duration::minutes(i), false))
            .collect();
        let analysis = BehavioralDetector::analyze(&events, Some(&baseline));
        assert!(!analysis.cold_start);
    }
}
