//! Core data model: events, feature vectors, and the scored-event output.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The GitHub event kinds this engine understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventType {
    Push,
    PullRequest,
    WorkflowRun,
    Issues,
    Delete,
    Create,
    Fork,
    Release,
    Watch,
    Other,
}

impl EventType {
    /// Parse a raw GitHub event-type string (e.g. `"PushEvent"`).
    #[must_use]
    pub fn from_github_str(s: &str) -> Self {
        match s {
            "PushEvent" => Self::Push,
            "PullRequestEvent" => Self::PullRequest,
            "WorkflowRunEvent" => Self::WorkflowRun,
            "IssuesEvent" => Self::Issues,
            "DeleteEvent" => Self::Delete,
            "CreateEvent" => Self::Create,
            "ForkEvent" => Self::Fork,
            "ReleaseEvent" => Self::Release,
            "WatchEvent" => Self::Watch,
            _ => Self::Other,
        }
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Push => "PushEvent",
            Self::PullRequest => "PullRequestEvent",
            Self::WorkflowRun => "WorkflowRunEvent",
            Self::Issues => "IssuesEvent",
            Self::Delete => "DeleteEvent",
            Self::Create => "CreateEvent",
            Self::Fork => "ForkEvent",
            Self::Release => "ReleaseEvent",
            Self::Watch => "WatchEvent",
            Self::Other => "Other",
        }
    }
}

/// A single commit inside a push event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitInfo {
    pub sha: String,
    pub message: String,
}

/// Type-dependent event payload, modeled as a tagged variant so detectors
/// pattern-match on shape instead of probing a free-form map.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum EventPayload {
    Push {
        commits: Vec<CommitInfo>,
        ref_name: String,
        size: u32,
        distinct_size: u32,
        forced: bool,
    },
    PullRequest {
        action: String,
        merged: bool,
    },
    WorkflowRun {
        conclusion: Option<String>,
        name: String,
    },
    Issues {
        action: String,
    },
    Delete {
        ref_name: String,
        ref_type: String,
    },
    Create {
        ref_name: String,
        ref_type: String,
    },
    Fork,
    Release {
        action: String,
    },
    Watch,
    /// Unrecognized event kind; contributes only to aggregate counts.
    Other {
        raw: serde_json::Value,
    },
}

/// A single immutable GitHub event as received from the poller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    pub id: String,
    pub event_type: EventType,
    pub actor_login: String,
    pub repo_name: String,
    pub created_at: DateTime<Utc>,
    pub payload: EventPayload,
}

impl Event {
    /// Owner/repo split of `repo_name`, e.g. `("acme", "prod-api")`.
    #[must_use]
    pub fn owner_repo(&self) -> Option<(&str, &str)> {
        self.repo_name.split_once('/')
    }
}

/// Behavioral detector's fixed 10-dimensional feature vector. Index order is
/// part of the wire contract.
pub type BehavioralFeatures = [f64; 10];
/// Content detector's fixed 9-dimensional feature vector.
pub type ContentFeatures = [f64; 9];
/// Temporal detector's fixed 9-dimensional feature vector.
pub type TemporalFeatures = [f64; 9];
/// Context scorer's fixed 9-dimensional feature vector.
pub type ContextFeatures = [f64; 9];
/// Repo profile's fixed 10-dimensional activity feature vector.
pub type RepoFeatures = [f64; 10];

/// Per-user rolling EWMA baseline, owned exclusively by `UserProfileManager`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserBaseline {
    pub login: String,
    pub mean: BehavioralFeatures,
    pub std: BehavioralFeatures,
    pub total_events: u64,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    /// Sliding window of recent feature vectors, trimmed to N=100, used for
    /// the behavioral detector's covariance estimate.
    pub history: Vec<BehavioralFeatures>,
    /// 24-bin hour-of-day probability distribution (GMT).
    pub hour_distribution: [f64; 24],
    pub event_type_distribution: std::collections::HashMap<String, f64>,
    pub top_repos: std::collections::HashMap<String, u64>,
}

impl UserBaseline {
    pub const MAX_HISTORY: usize = 100;
    pub const MIN_RELIABLE_EVENTS: u64 = 20;

    #[must_use]
    pub fn new(login: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            login: login.into(),
            mean: [0.0; 10],
            std: [1.0; 10],
            total_events: 0,
            first_seen: now,
            last_updated: now,
            history: Vec::new(),
            hour_distribution: [0.0; 24],
            event_type_distribution: std::collections::HashMap::new(),
            top_repos: std::collections::HashMap::new(),
        }
    }

    /// A baseline is only trustworthy for statistical comparison once it has
    /// absorbed enough observations (§3).
    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.total_events >= Self::MIN_RELIABLE_EVENTS
    }
}

/// Per-repository rolling EWMA baseline, owned exclusively by
/// `RepoProfileManager`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoBaseline {
    pub repo: String,
    pub mean: RepoFeatures,
    pub std: RepoFeatures,
    pub total_events: u64,
    pub first_seen: DateTime<Utc>,
    pub last_updated: DateTime<Utc>,
    pub history: Vec<RepoFeatures>,
    pub hour_distribution: [f64; 24],
    pub top_contributors: std::collections::HashMap<String, u64>,
    /// Consecutive `WorkflowRun` failures observed so far; reset to 0 on
    /// any success. Feeds the `build_failure_cascade` urgency indicator.
    #[serde(default)]
    pub consecutive_build_failures: u32,
}

impl RepoBaseline {
    pub const MAX_HISTORY: usize = 50;
    pub const MIN_RELIABLE_EVENTS: u64 = 10;

    #[must_use]
    pub fn new(repo: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            repo: repo.into(),
            mean: [0.0; 10],
            std: [1.0; 10],
            total_events: 0,
            first_seen: now,
            last_updated: now,
            history: Vec::new(),
            hour_distribution: [0.0; 24],
            top_contributors: std::collections::HashMap::new(),
            consecutive_build_failures: 0,
        }
    }

    #[must_use]
    pub fn is_reliable(&self) -> bool {
        self.total_events >= Self::MIN_RELIABLE_EVENTS
    }
}

/// Cached repository metadata used by `ContextScorer`. TTL 2h.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepoContext {
    pub stars: u64,
    pub forks: u64,
    pub language: Option<String>,
    pub topics: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub owner_type: String,
    pub has_security_policy: bool,
    pub has_code_of_conduct: bool,
    pub has_contributing: bool,
    pub size_kb: u64,
    pub contributors: u64,
    /// `true` when GitHub reports the repository as private.
    pub private: bool,
    pub cached_at: DateTime<Utc>,
}

/// A single anomaly finding produced by a detector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedAnomaly {
    pub kind: String,
    pub severity: f64,
    pub description: String,
}

/// Behavioral detector's output for one `(user, repo-batch)` group.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct BehavioralAnalysis {
    pub features: BehavioralFeatures,
    pub anomalies: Vec<DetectedAnomaly>,
    pub score: f64,
    pub confidence: f64,
    pub cold_start: bool,
}

/// Content detector's output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ContentAnalysis {
    pub features: ContentFeatures,
    pub secret_detections: Vec<SecretHit>,
    pub suspicious_files: Vec<SuspiciousFile>,
    pub score: f64,
}

/// A single secret-pattern match.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretHit {
    pub pattern_type: String,
    pub severity: f64,
    pub preview: String,
    pub location: String,
    /// Byte offsets `(start, end)` of the match within the scanned text.
    pub span: (usize, usize),
}

/// A file flagged by suspicious-file categorization.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SuspiciousFile {
    pub path: String,
    pub category: String,
    pub risk: f64,
}

/// Temporal detector's output.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct TemporalAnalysis {
    pub features: TemporalFeatures,
    pub patterns: Vec<DetectedAnomaly>,
    pub score: f64,
}

/// Context scorer's output for a single repository.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContextAnalysis {
    pub features: ContextFeatures,
    pub criticality: f64,
    pub analysis_type: String,
    pub public_repo: bool,
}

impl Default for ContextAnalysis {
    fn default() -> Self {
        Self {
            features: [0.0; 9],
            criticality: 0.5,
            analysis_type: "fallback".to_string(),
            public_repo: false,
        }
    }
}

/// The five disjoint, totally-ordered severity bands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SeverityBand {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl SeverityBand {
    /// Classify a final score into its band. Checks from `Critical` downward
    /// so the closed lower bound of the upper band always wins at a boundary.
    #[must_use]
    pub fn from_score(score: f64) -> Self {
        if score >= 0.85 {
            Self::Critical
        } else if score >= 0.65 {
            Self::High
        } else if score >= 0.45 {
            Self::Medium
        } else if score >= 0.20 {
            Self::Low
        } else {
            Self::Info
        }
    }

    /// Rank used by the priority queue's `10^k(band)` term (§4.7).
    #[must_use]
    pub const fn rank(self) -> u8 {
        match self {
            Self::Critical => 6,
            Self::High => 5,
            Self::Medium => 4,
            Self::Low => 3,
            Self::Info => 2,
        }
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Info => "info",
        }
    }
}

/// Weights applied to the four sub-scores when composing `final_score`,
/// carried on each `ScoredEvent` for auditability.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionWeightsUsed {
    pub behavioral: f64,
    pub content: f64,
    pub temporal: f64,
    pub repository: f64,
}

/// The fully composed result of scoring a single event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScoredEvent {
    pub event_id: String,
    pub actor_login: String,
    pub repo_name: String,
    pub event_type: EventType,
    pub event_timestamp: DateTime<Utc>,

    pub behavioral_score: f64,
    pub content_score: f64,
    pub temporal_score: f64,
    pub repository_score: f64,

    pub context_multiplier: f64,
    pub urgency_factor: f64,
    pub base_score: f64,
    pub final_score: f64,
    pub band: SeverityBand,

    pub detection_weights: DetectionWeightsUsed,
    pub context_factors_applied: Vec<String>,
    pub urgency_factors_applied: Vec<String>,

    pub behavioral_analysis: BehavioralAnalysis,
    pub content_analysis: ContentAnalysis,
    pub temporal_analysis: TemporalAnalysis,
    pub context_analysis: ContextAnalysis,

    pub summary: Option<String>,
    pub processed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_band_boundaries_closed_lower_on_upper_band() {
        assert_eq!(SeverityBand::from_score(0.85), SeverityBand::Critical);
        assert_eq!(SeverityBand::from_score(0.8499), SeverityBand::High);
        assert_eq!(SeverityBand::from_score(0.65), SeverityBand::High);
        assert_eq!(SeverityBand::from_score(0.6499), SeverityBand::Medium);
        assert_eq!(SeverityBand::from_score(0.45), SeverityBand::Medium);
        assert_eq!(SeverityBand::from_score(0.20), SeverityBand::Low);
        assert_eq!(SeverityBand::from_score(0.0), SeverityBand::Info);
    }

    #[test]
    fn test_band_rank_total_order() {
        assert!(SeverityBand::Critical.rank() > SeverityBand::High.rank());
        assert!(SeverityBand::High.rank() > SeverityBand::Medium.rank());
        assert!(SeverityBand::Medium.rank() > SeverityBand::Low.rank());
        assert!(SeverityBand::Low.rank() > SeverityBand::Info.rank());
    }

    #[test]
    fn test_event_type_round_trip() {
        assert_eq!(EventType::from_github_str("PushEvent"), EventType::Push);
        assert_eq!(EventType::Push.as_str(), "PushEvent");
        assert_eq!(EventType::from_github_str("UnknownEvent"), EventType::Other);
    }

    #[test]
    fn test_owner_repo_split() {
        let event = Event {
            id: "1".to_string(),
            event_type: EventType::Push,
            actor_login: "alice".to_string(),
            repo_name: "acme/prod-api".to_string(),
            created_at: Utc::now(),
            payload: EventPayload::Push {
                commits: vec![],
                ref_name: "refs/heads/main".to_string(),
                size: 1,
                distinct_size: 1,
                forced: false,
            },
        };
        assert_eq!(event.owner_repo(), Some(("acme", "prod-api")));
    }
}
