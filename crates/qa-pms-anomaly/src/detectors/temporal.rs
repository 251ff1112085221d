//! Temporal anomaly detector: burst, coordination, and timing-distribution
//! pattern mining over a batch's event timestamps.

use chrono::{DateTime, Timelike, Utc};

use crate::math::{coefficient_of_variation, linear_regression_slope, sigmoid};
use crate::types::{DetectedAnomaly, TemporalAnalysis, TemporalFeatures};

const FEATURE_WEIGHTS: [f64; 9] = [0.15, 0.10, 0.20, 0.10, 0.15, 0.10, 0.05, 0.10, 0.05];
const BURST_WINDOW_MINUTES: i64 = 5;
const BURST_EVENT_THRESHOLD: usize = 5;
const COORDINATION_WINDOW_MINUTES: i64 = 15;
const COORDINATION_ACTOR_THRESHOLD: usize = 3;
const SUSTAINED_WINDOW_HOURS: i64 = 1;
const SUSTAINED_EVENT_THRESHOLD: usize = 30;

/// One timestamped event as seen by the temporal detector, tagged with its
/// actor so coordination patterns can count distinct participants.
#[derive(Debug, Clone)]
pub struct TemporalEvent {
    pub actor_login: String,
    pub timestamp: DateTime<Utc>,
}

pub struct TemporalDetector;

impl TemporalDetector {
    /// Extract the 9-D feature vector and detect timing patterns for a batch
    /// of events sharing a time window. `baseline_rate` is the median
    /// events-per-minute of up to 5 users / 3 repos referenced in the batch;
    /// `None` when no cached baseline is available (§9 resolution).
    #[must_use]
    pub fn analyze(events: &[TemporalEvent], baseline_rate: Option<f64>) -> TemporalAnalysis {
        if events.len() < 2 {
            return TemporalAnalysis::default();
        }

        let mut timestamps: Vec<DateTime<Utc>> = events.iter().map(|e| e.timestamp).collect();
        timestamps.sort_unstable();

        let span_minutes = ((timestamps[timestamps.len() - 1] - timestamps[0]).num_seconds() as f64
            / 60.0)
            .max(1.0);
        let events_per_minute = events.len() as f64 / span_minutes;

        let intervals: Vec<f64> = timestamps
            .windows(2)
            .map(|w| (w[1] - w[0]).num_seconds() as f64 / 60.0)
            .collect();

        let mut features = [0.0; 9];
        features[0] = events_per_minute;
        features[1] = baseline_rate.map_or(0.0, |b| if b > 0.0 { events_per_minute / b } else { 0.0 });
        features[2] = (max_sliding_window_rate(&timestamps, BURST_WINDOW_MINUTES) / 2.0).min(1.0);

        let interval_mean = intervals.iter().sum::<f64>() / intervals.len() as f64;
        let interval_std = {
            let variance =
                intervals.iter().map(|i| (i - interval_mean).powi(2)).sum::<f64>() / intervals.len() as f64;
            variance.sqrt()
        };
        features[3] = if interval_mean.abs() < 1e-10 { 0.0 } else { interval_std / interval_mean };

        features[4] = coordination_score(events, &timestamps);

        let off_hours_ratio = off_hours_ratio(&timestamps);
        features[5] = (off_hours_ratio / 0.25 - 1.0).max(0.0);

        let weekend_ratio = weekend_ratio(&timestamps);
        features[6] = ((weekend_ratio - 2.0 / 7.0) / (2.0 / 7.0)).max(0.0);

        let cv = coefficient_of_variation(&intervals);
        features[7] = 1.0 / (1.0 + cv);

        features[8] = velocity_acceleration(&timestamps).clamp(-1.0, 1.0);

        let patterns = detect_patterns(events, &timestamps);
        let score = temporal_score(&features, &patterns);

        TemporalAnalysis { features, patterns, score }
    }
}

fn max_sliding_window_rate(sorted_timestamps: &[DateTime<Utc>], window_minutes: i64) -> f64 {
    let window = chrono::Duration::minutes(window_minutes);
    let mut max_count = 0usize;
    for (i, start) in sorted_timestamps.iter().enumerate() {
        let count = sorted_timestamps[i..]
            .iter()
            .take_while(|t| **t - *start <= window)
            .count();
        max_count = max_count.max(count);
    }
    max_count as f64 / window_minutes as f64
}

fn coordination_score(events: &[TemporalEvent], sorted_timestamps: &[DateTime<Utc>]) -> f64 {
    let window = chrono::Duration::minutes(COORDINATION_WINDOW_MINUTES);
    let mut max_actors = 0usize;
    let mut events_in_best_window = 0usize;

    for start in sorted_timestamps {
        let in_window: Vec<&TemporalEvent> = events
            .iter()
            .filter(|e| e.timestamp >= *start && e.timestamp - *start <= window)
            .collect();
        let distinct: std::collections::HashSet<&str> =
            in_window.iter().map(|e| e.actor_login.as_str()).collect();
        if distinct.len() > max_actors {
            max_actors = distinct.len();
            events_in_best_window = in_window.len();
        }
    }

    if max_actors >= COORDINATION_ACTOR_THRESHOLD {
        ((max_actors as f64 / 10.0) * (events_in_best_window as f64 / 20.0)).min(1.0)
    } else {
        0.0
    }
}

fn off_hours_ratio(timestamps: &[DateTime<Utc>]) -> f64 {
    let off_hours = timestamps
        .iter()
        .filter(|ts| {
            let hour = ts.hour();
            (2..=10).contains(&hour) || (14..=18).contains(&hour)
        })
        .count();
    off_hours as f64 / timestamps.len() as f64
}

fn weekend_ratio(timestamps: &[DateTime<Utc>]) -> f64 {
    let weekend = timestamps
        .iter()
        .filter(|ts| matches!(ts.weekday(), chrono::Weekday::Sat | chrono::Weekday::Sun))
        .count();
    weekend as f64 / timestamps.len() as f64
}

fn velocity_acceleration(sorted_timestamps: &[DateTime<Utc>]) -> f64 {
    if sorted_timestamps.len() < 8 {
        return 0.0;
    }
    let n = sorted_timestamps.len();
    let quantile_size = n / 4;
    if quantile_size == 0 {
        return 0.0;
    }

    let span_minutes =
        (sorted_timestamps[n - 1] - sorted_timestamps[0]).num_seconds() as f64 / 60.0;
    if span_minutes <= 0.0 {
        return 0.0;
    }
    let quantile_span = span_minutes / 4.0;

    let rates: Vec<f64> = (0..4)
        .map(|q| {
            let start = q * quantile_size;
            let end = if q == 3 { n } else { (q + 1) * quantile_size };
            (end - start) as f64 / quantile_span.max(1e-6)
        })
        .collect();

    let slope = linear_regression_slope(&rates);
    let r = correlation_strength(&rates);
    slope * r.abs()
}

/// Rough correlation-strength proxy: ratio of the fitted line's variance to
/// the series' variance.
fn correlation_strength(ys: &[f64]) -> f64 {
    let n = ys.len();
    if n < 2 {
        return 0.0;
    }
    let mean = ys.iter().sum::<f64>() / n as f64;
    let total_variance = ys.iter().map(|y| (y - mean).powi(2)).sum::<f64>();
    if total_variance.abs() < 1e-10 {
        return 0.0;
    }
    let slope = linear_regression_slope(ys);
    let xs_mean = (n as f64 - 1.0) / 2.0;
    let explained_variance: f64 = (0..n)
        .map(|i| {
            let predicted = mean + slope * (i as f64 - xs_mean);
            (predicted - mean).powi(2)
        })
        .sum();
    (explained_variance / total_variance).sqrt().min(1.0)
}

fn detect_patterns(events: &[TemporalEvent], sorted_timestamps: &[DateTime<Utc>]) -> Vec<DetectedAnomaly> {
    let mut patterns = Vec::new();

    let burst_rate = max_sliding_window_rate(sorted_timestamps, BURST_WINDOW_MINUTES) * BURST_WINDOW_MINUTES as f64;
    if burst_rate >= BURST_EVENT_THRESHOLD as f64 {
        patterns.push(DetectedAnomaly {
            kind: "activity_burst".to_string(),
            severity: (burst_rate / (BURST_EVENT_THRESHOLD as f64 * 2.0)).min(1.0),
            description: format!("{burst_rate:.0} events within a {BURST_WINDOW_MINUTES}-minute window"),
        });
    }

    let coordination = coordination_score(events, sorted_timestamps);
    if coordination > 0.0 {
        patterns.push(DetectedAnomaly {
            kind: "coordinated_activity".to_string(),
            severity: coordination,
            description: "multiple distinct actors active within a short window".to_string(),
        });
    }

    if let Some(p_value) = chi_square_hour_test(sorted_timestamps) {
        if p_value < 0.05 {
            patterns.push(DetectedAnomaly {
                kind: "unusual_timing_distribution".to_string(),
                severity: (1.0 - p_value).min(1.0),
                description: format!("hour-of-day distribution deviates from uniform (p={p_value:.4})"),
            });
        }
    }

    let sustained_rate = max_sliding_window_rate(sorted_timestamps, SUSTAINED_WINDOW_HOURS * 60)
        * (SUSTAINED_WINDOW_HOURS * 60) as f64;
    if sustained_rate >= SUSTAINED_EVENT_THRESHOLD as f64 {
        patterns.push(DetectedAnomaly {
            kind: "sustained_high_activity".to_string(),
            severity: (sustained_rate / (SUSTAINED_EVENT_THRESHOLD as f64 * 2.0)).min(1.0),
            description: format!("{sustained_rate:.0} events within a 1-hour window"),
        });
    }

    patterns
}

/// Chi-square goodness-of-fit test of the hour-of-day distribution against
/// uniform, using a fixed lookup of critical values keyed by df=23.
fn chi_square_hour_test(timestamps: &[DateTime<Utc>]) -> Option<f64> {
    if timestamps.len() < 24 {
        return None;
    }
    let mut bins = [0u32; 24];
    for ts in timestamps {
        bins[ts.hour() as usize] += 1;
    }
    let n = timestamps.len() as f64;
    let expected = n / 24.0;
    let chi_square: f64 = bins.iter().map(|&c| (f64::from(c) - expected).powi(2) / expected).sum();

    let critical_95 = crate::math::chi_square_critical_95(23);
    // Approximate the p-value by position relative to the critical value
    // rather than a full inverse-CDF; sufficient to threshold at p<0.05.
    if chi_square > critical_95 {
        Some((critical_95 / chi_square * 0.05).clamp(0.0, 0.05))
    } else {
        Some((chi_square / critical_95).clamp(0.05, 1.0))
    }
}

fn temporal_score(features: &TemporalFeatures, patterns: &[DetectedAnomaly]) -> f64 {
    let mut dot = 0.0;
    for i in 0..9 {
        dot += sigmoid(0.5 * features[i]) * FEATURE_WEIGHTS[i];
    }
    if !patterns.is_empty() {
        let mean_severity = patterns.iter().map(|p| p.severity).sum::<f64>() / patterns.len() as f64;
        dot += 0.3 * mean_severity;
    }
    dot.min(1.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(actor: &str, at: DateTime<Utc>) -> TemporalEvent {
        TemporalEvent { actor_login: actor.to_string(), timestamp: at }
    }

    #[test]
    fn test_single_event_returns_default() {
        let analysis = TemporalDetector::analyze(&[event("a", Utc::now())], None);
        assert_eq!(analysis.score, 0.0);
        assert!(analysis.patterns.is_empty());
    }

    #[test]
    fn test_burst_detected_for_tight_cluster() {
        let base = Utc::now();
        let events: Vec<TemporalEvent> =
            (0..6).map(|i| event("a", base + chrono::Duration::seconds(i * 20))).collect();
        let analysis = TemporalDetector::analyze(&events, None);
        assert!(analysis.patterns.iter().any(|p| p.kind == "activity_burst"));
    }

    #[test]
    fn test_coordination_detected_with_distinct_actors() {
        let base = Utc::now();
        let events: Vec<TemporalEvent> = ["a", "b", "c", "d"]
            .iter()
            .enumerate()
            .map(|(i, actor)| event(actor, base + chrono::Duration::minutes(i as i64)))
            .collect();
        let analysis = TemporalDetector::analyze(&events, None);
        assert!(analysis.patterns.iter().any(|p| p.kind == "coordinated_activity"));
    }

    #[test]
    fn test_no_baseline_yields_zero_relative_rate_feature() {
        let base = Utc::now();
        let events: Vec<TemporalEvent> =
            (0..3).map(|i| event("a", base + chrono::Duration::minutes(i))).collect();
        let analysis = TemporalDetector::analyze(&events, None);
        assert!((analysis.features[1]).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_clamped() {
        let base = Utc::now();
        let events: Vec<TemporalEvent> =
            (0..40).map(|i| event("a", base + chrono::Duration::seconds(i * 5))).collect();
        let analysis = TemporalDetector::analyze(&events, Some(0.01));
        assert!(analysis.score <= 1.0);
    }
}
