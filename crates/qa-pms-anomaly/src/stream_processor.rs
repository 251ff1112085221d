//! Batch orchestrator: groups events, fans out detectors in parallel,
//! updates profiles asynchronously, composes severity, enqueues, and
//! publishes (§4.8).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use qa_pms_config::engine::EngineSettings;
use redis::AsyncCommands;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::detectors::{BehavioralDetector, ContentDetector, ContextScorer, TemporalDetector};
use crate::detectors::content::FileChange;
use crate::detectors::temporal::TemporalEvent;
use crate::profiles::{RepoProfileManager, UserProfileManager};
use crate::queue::PriorityQueue;
use crate::scoring::severity_engine::{ContextFactors, SubScores, UrgencyIndicators};
use crate::scoring::SeverityEngine;
use crate::store::{band_channel, CHANNEL_ALL_ANOMALIES};
use crate::summarizer::Summarizer;
use crate::types::{
    BehavioralAnalysis, CommitInfo, ContentAnalysis, ContextAnalysis, Event, EventPayload, EventType,
    ScoredEvent, SeverityBand, TemporalAnalysis,
};

const MAX_BATCH_SIZE: usize = 50;
const ANOMALY_TRIGGER_SCORE: f64 = 0.45;
/// Consecutive build failures needed to call it a cascade (§4.6's urgency factors).
const BUILD_FAILURE_CASCADE_THRESHOLD: u32 = 3;
/// Deletions within one `(actor, repo)` group needed to call it a mass deletion.
const MASS_DELETION_THRESHOLD: usize = 3;
const PRODUCTION_REPO_MARKERS: &[&str] = &["prod", "production", "live", "release"];

/// Per-event file-diff metadata the poller may attach alongside a batch,
/// keyed by event id (§4.8's `optionalContext`). Absent when the poller has
/// no changed-file data for an event.
pub type BatchContext = HashMap<String, Vec<FileChange>>;

/// Running counters, reset at 24-hour granularity.
#[derive(Debug, Clone, Default)]
pub struct ProcessorStats {
    pub events_processed: u64,
    pub anomalies_detected: u64,
    pub rolling_avg_processing_ms: f64,
    window_started: Option<chrono::DateTime<Utc>>,
}

impl ProcessorStats {
    fn record(&mut self, batch_events: u64, anomalies: u64, elapsed_ms: f64) {
        let now = Utc::now();
        let window_expired = match self.window_started {
            None => true,
            Some(start) => (now - start).num_hours() >= 24,
        };
        if window_expired {
            self.events_processed = 0;
            self.anomalies_detected = 0;
            self.rolling_avg_processing_ms = 0.0;
            self.window_started = Some(now);
        }
        let total_before = self.events_processed;
        self.rolling_avg_processing_ms = if total_before == 0 {
            elapsed_ms
        } else {
            (self.rolling_avg_processing_ms * total_before as f64 + elapsed_ms) / (total_before + batch_events) as f64
        };
        self.events_processed += batch_events;
        self.anomalies_detected += anomalies;
    }
}

pub struct StreamProcessor {
    redis: redis::aio::ConnectionManager,
    severity_engine: SeverityEngine,
    context_scorer: ContextScorer,
    user_profiles: Arc<Mutex<UserProfileManager>>,
    repo_profiles: Arc<Mutex<RepoProfileManager>>,
    priority_queue: Arc<Mutex<PriorityQueue>>,
    summarizer: Arc<dyn Summarizer>,
    batch_deadline: Duration,
    stats: Arc<Mutex<ProcessorStats>>,
}

impl StreamProcessor {
    pub fn new(
        settings: &EngineSettings,
        redis: redis::aio::ConnectionManager,
        context_scorer: ContextScorer,
        summarizer: Arc<dyn Summarizer>,
    ) -> anyhow::Result<Self> {
        let severity_engine = SeverityEngine::new(settings.detection_weights)?;
        let user_profiles = Arc::new(Mutex::new(UserProfileManager::new(redis.clone(), settings.ewma_alphas)));
        let repo_profiles = Arc::new(Mutex::new(RepoProfileManager::new(redis.clone(), settings.ewma_alphas)));
        let priority_queue = Arc::new(Mutex::new(PriorityQueue::new(redis.clone(), settings.queue_limits)));

        Ok(Self {
            redis,
            severity_engine,
            context_scorer,
            user_profiles,
            repo_profiles,
            priority_queue,
            summarizer,
            batch_deadline: settings.batch_deadline,
            stats: Arc::new(Mutex::new(ProcessorStats::default())),
        })
    }

    #[must_use]
    pub async fn stats(&self) -> ProcessorStats {
        self.stats.lock().await.clone()
    }

    /// Score a batch of up to [`MAX_BATCH_SIZE`] events end to end. `context`
    /// carries poller-attached file-diff data, keyed by event id (§4.8), used
    /// to feed `ContentDetector`'s patch-scanning half when present.
    pub async fn process_batch(&self, events: Vec<Event>, context: Option<&BatchContext>) -> Vec<ScoredEvent> {
        let events: Vec<Event> = events.into_iter().take(MAX_BATCH_SIZE).collect();
        let start = Instant::now();

        let groups = group_by_actor_repo(events);
        let group_count = groups.len();

        let scored = tokio::time::timeout(self.batch_deadline, self.process_groups(groups, context))
            .await
            .unwrap_or_else(|_| {
                warn!(group_count, "batch deadline exceeded, returning partial results");
                Vec::new()
            });

        let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
        let anomalies = scored.iter().filter(|e| e.final_score > ANOMALY_TRIGGER_SCORE).count() as u64;
        self.stats.lock().await.record(scored.len() as u64, anomalies, elapsed_ms);

        scored
    }

    async fn process_groups(
        &self,
        groups: Vec<((String, String), Vec<Event>)>,
        context: Option<&BatchContext>,
    ) -> Vec<ScoredEvent> {
        let tasks = groups.into_iter().map(|((actor, repo), events)| self.process_group(actor, repo, events, context));
        join_all(tasks).await.into_iter().flatten().collect()
    }

    async fn process_group(
        &self,
        actor: String,
        repo: String,
        events: Vec<Event>,
        context: Option<&BatchContext>,
    ) -> Vec<ScoredEvent> {
        let behavioral_fut = {
            let events = events.clone();
            async move { BehavioralDetector::extract_features(&events) }
        };
        let content_fut = {
            let commits = extract_commits(&events);
            let files = extract_file_changes(&events, context);
            async move { ContentDetector::analyze(&commits, &files) }
        };
        let temporal_fut = {
            let temporal_events: Vec<TemporalEvent> = events
                .iter()
                .map(|e| TemporalEvent { actor_login: e.actor_login.clone(), timestamp: e.created_at })
                .collect();
            async move { TemporalDetector::analyze(&temporal_events, None) }
        };
        let context_fut = self.context_scorer.analyze(&repo, events.len());

        let (behavioral_features, content_analysis, temporal_analysis, context_analysis) =
            tokio::join!(behavioral_fut, content_fut, temporal_fut, context_fut);

        let user_baseline = {
            let mut profiles = self.user_profiles.lock().await;
            profiles.get_baseline(&actor).await.ok().flatten()
        };
        let behavioral_analysis = BehavioralDetector::analyze(&events, user_baseline.as_ref());

        let deletion_count = events.iter().filter(|e| e.event_type == EventType::Delete).count();
        let build_failure_streak = self.fold_build_outcomes(&repo, &events).await;

        self.spawn_profile_updates(&actor, &repo, behavioral_features, &events);

        let group_context = GroupContext {
            behavioral_analysis,
            content_analysis,
            temporal_analysis,
            context_analysis,
            deletion_count,
            build_failure_streak,
        };

        let scoring_tasks =
            events.into_iter().map(|event| self.score_and_publish(event, group_context.clone()));
        join_all(scoring_tasks).await
    }

    /// Fold this group's `WorkflowRun` outcomes into the repo's consecutive
    /// build-failure streak and return the resulting count, so `score_and_publish`
    /// can judge `build_failure_cascade` off a real streak rather than one event.
    async fn fold_build_outcomes(&self, repo: &str, events: &[Event]) -> u32 {
        let outcomes: Vec<bool> = events
            .iter()
            .filter_map(|e| match &e.payload {
                EventPayload::WorkflowRun { conclusion, .. } => Some(conclusion.as_deref() == Some("failure")),
                _ => None,
            })
            .collect();

        let mut profiles = self.repo_profiles.lock().await;
        if outcomes.is_empty() {
            profiles.get_baseline(repo).await.ok().flatten().map_or(0, |b| b.consecutive_build_failures)
        } else {
            profiles.record_build_outcomes(repo, &outcomes).await.unwrap_or(0)
        }
    }

    fn spawn_profile_updates(&self, actor: &str, repo: &str, features: crate::types::BehavioralFeatures, events: &[Event]) {
        let user_profiles = self.user_profiles.clone();
        let actor = actor.to_string();
        let event_type = events.first().map_or("Other", |e| e.event_type.as_str()).to_string();
        let repo_for_update = repo.to_string();
        tokio::spawn(async move {
            let mut profiles = user_profiles.lock().await;
            if let Err(err) = profiles.update(&actor, &features, &event_type, &repo_for_update, Utc::now()).await {
                warn!(error = %err, actor, "fire-and-forget user profile update failed");
            }
        });

        let repo_profiles = self.repo_profiles.clone();
        let repo = repo.to_string();
        let contributor = events.first().map_or_else(String::new, |e| e.actor_login.clone());
        tokio::spawn(async move {
            // Full repo-feature extraction (diversity, build/issue rates) needs
            // history beyond one batch; only the activity-count dimension is
            // populated here, the rest fold in as more batches arrive.
            let mut repo_features: crate::types::RepoFeatures = [0.0; 10];
            repo_features[0] = RepoProfileManager::weighted_event_contribution(
                EventType::from_github_str(&event_type),
            );
            let mut profiles = repo_profiles.lock().await;
            if let Err(err) = profiles.update(&repo, &repo_features, &contributor, Utc::now()).await {
                warn!(error = %err, repo, "fire-and-forget repo profile update failed");
            }
        });
    }

    async fn score_and_publish(&self, event: Event, group: GroupContext) -> ScoredEvent {
        let (ref_name, forced) = match &event.payload {
            EventPayload::Push { ref_name, forced, .. } => (Some(ref_name.as_str()), *forced),
            _ => (None, false),
        };
        let (mut context_factors, off_hours_likely) = ContextFactors::from_ref_and_time(ref_name, event.created_at);
        context_factors.production_repo = is_production_repo(&event.repo_name);
        context_factors.public_repo = group.context_analysis.public_repo;
        // high_privilege_user needs the actor's GitHub permissions (is_admin /
        // is_owner / role), which this engine never fetches; left false until
        // an actor-permissions lookup is added.

        let urgency = UrgencyIndicators {
            secrets_exposed: !group.content_analysis.secret_detections.is_empty(),
            mass_deletion: group.deletion_count >= MASS_DELETION_THRESHOLD,
            coordinated_attack: group.temporal_analysis.patterns.iter().any(|p| p.kind == "coordinated_activity"),
            privilege_escalation: payload_mentions_admin(&event.payload),
            force_push_main: forced && context_factors.protected_branch,
            build_failure_cascade: group.build_failure_streak >= BUILD_FAILURE_CASCADE_THRESHOLD,
        };

        let sub_scores = SubScores {
            behavioral: group.behavioral_analysis.score,
            content: group.content_analysis.score,
            temporal: group.temporal_analysis.score,
            repository: group.context_analysis.criticality,
        };

        let composition = self.severity_engine.score(sub_scores, context_factors, off_hours_likely, urgency);

        let mut scored = ScoredEvent {
            event_id: event.id.clone(),
            actor_login: event.actor_login.clone(),
            repo_name: event.repo_name.clone(),
            event_type: event.event_type,
            event_timestamp: event.created_at,
            behavioral_score: sub_scores.behavioral,
            content_score: sub_scores.content,
            temporal_score: sub_scores.temporal,
            repository_score: sub_scores.repository,
            context_multiplier: composition.context_multiplier,
            urgency_factor: composition.urgency_factor,
            base_score: composition.base_score,
            final_score: composition.final_score,
            band: composition.band,
            detection_weights: self.severity_engine.weights_used(),
            context_factors_applied: composition.context_factors_applied,
            urgency_factors_applied: composition.urgency_factors_applied,
            behavioral_analysis: group.behavioral_analysis.clone(),
            content_analysis: group.content_analysis.clone(),
            temporal_analysis: group.temporal_analysis.clone(),
            context_analysis: group.context_analysis.clone(),
            summary: None,
            processed_at: Utc::now(),
        };

        if matches!(scored.band, SeverityBand::Critical | SeverityBand::High) {
            scored.summary = self.summarizer.summarize(&scored).await.ok();
        }

        if scored.band != SeverityBand::Info {
            self.publish(&scored).await;
            let mut queue = self.priority_queue.lock().await;
            if let Err(err) = queue.enqueue(scored.clone(), group.context_analysis.criticality, 0.0).await {
                warn!(error = %err, event_id = scored.event_id, "failed to enqueue scored event");
            }
        }

        scored
    }

    async fn publish(&self, scored: &ScoredEvent) {
        let Ok(payload) = serde_json::to_string(&serde_json::json!({"type": "anomaly", "data": scored})) else {
            return;
        };
        let mut conn = self.redis.clone();
        let _: Result<(), _> = conn.publish(CHANNEL_ALL_ANOMALIES, &payload).await;
        let _: Result<(), _> = conn.publish(band_channel(scored.band), &payload).await;
        if matches!(scored.band, SeverityBand::Critical | SeverityBand::High) {
            let _: Result<(), _> = conn.publish(crate::store::user_channel(&scored.actor_login), &payload).await;
        }
    }
}

/// Detector outputs shared across every event in a `(actor, repo)` group.
#[derive(Debug, Clone)]
struct GroupContext {
    behavioral_analysis: BehavioralAnalysis,
    content_analysis: ContentAnalysis,
    temporal_analysis: TemporalAnalysis,
    context_analysis: ContextAnalysis,
    /// `EventType::Delete` events in this group, for the `mass_deletion`
    /// urgency indicator (≥3 per §4.6).
    deletion_count: usize,
    /// Consecutive `WorkflowRun` failures on this repo after folding in this
    /// group's outcomes, for the `build_failure_cascade` urgency indicator.
    build_failure_streak: u32,
}

fn group_by_actor_repo(events: Vec<Event>) -> Vec<((String, String), Vec<Event>)> {
    let mut groups: HashMap<(String, String), Vec<Event>> = HashMap::new();
    for event in events {
        let key = (event.actor_login.clone(), event.repo_name.clone());
        groups.entry(key).or_default().push(event);
    }
    groups.into_iter().collect()
}

fn extract_commits(events: &[Event]) -> Vec<CommitInfo> {
    events
        .iter()
        .filter_map(|e| match &e.payload {
            EventPayload::Push { commits, .. } => Some(commits.clone()),
            _ => None,
        })
        .flatten()
        .collect()
}

/// `true` when `repo_name` looks like a production repository by name
/// (§4.6's `production_repo` context factor).
fn is_production_repo(repo_name: &str) -> bool {
    let name = repo_name.to_lowercase();
    PRODUCTION_REPO_MARKERS.iter().any(|marker| name.contains(marker))
}

/// `true` when the event's stringified payload mentions "admin", the
/// available stand-in for an actual permission-change signal (§4.6's
/// `privilege_escalation` urgency indicator).
fn payload_mentions_admin(payload: &EventPayload) -> bool {
    serde_json::to_string(payload).is_ok_and(|s| s.to_lowercase().contains("admin"))
}

fn extract_file_changes(events: &[Event], context: Option<&BatchContext>) -> Vec<FileChange> {
    let Some(context) = context else {
        return Vec::new();
    };
    events.iter().filter_map(|e| context.get(&e.id)).flatten().cloned().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::EventType;

    fn push_event(actor: &str, repo: &str) -> Event {
        Event {
            id: "1".to_string(),
            event_type: EventType::Push,
            actor_login: actor.to_string(),
            repo_name: repo.to_string(),
            created_at: Utc::now(),
            payload: EventPayload::Push {
                commits: vec![],
                ref_name: "refs/heads/main".to_string(),
                size: 1,
                distinct_size: 1,
                forced: false,
            },
        }
    }

    #[test]
    fn test_group_by_actor_repo_partitions_correctly() {
        let events = vec![push_event("alice", "acme/a"), push_event("alice", "acme/a"), push_event("bob", "acme/b")];
        let groups = group_by_actor_repo(events);
        assert_eq!(groups.len(), 2);
    }

    #[test]
    fn test_extract_commits_flattens_push_events() {
        let mut event = push_event("alice", "acme/a");
        if let EventPayload::Push { commits, .. } = &mut event.payload {
            commits.push(CommitInfo { sha: "a".to_string(), message: "msg".to_string() });
        }
        let commits = extract_commits(&[event]);
        assert_eq!(commits.len(), 1);
    }

    #[test]
    fn test_is_production_repo_matches_name_substrings() {
        assert!(is_production_repo("acme/prod-api"));
        assert!(is_production_repo("acme/live-service"));
        assert!(!is_production_repo("acme/sandbox"));
    }

    #[test]
    fn test_payload_mentions_admin() {
        let admin_payload = EventPayload::Issues { action: "assigned to admin".to_string() };
        assert!(payload_mentions_admin(&admin_payload));

        let other_payload = EventPayload::Issues { action: "closed".to_string() };
        assert!(!payload_mentions_admin(&other_payload));
    }

    #[test]
    fn test_extract_file_changes_reads_by_event_id() {
        let event = push_event("alice", "acme/a");
        let mut context = BatchContext::new();
        context.insert(
            event.id.clone(),
            vec![FileChange { path: "src/a.rs".to_string(), additions: 1, deletions: 0, patch: None }],
        );
        let changes = extract_file_changes(&[event], Some(&context));
        assert_eq!(changes.len(), 1);
        assert!(extract_file_changes(&[push_event("bob", "acme/b")], Some(&context)).is_empty());
        assert!(extract_file_changes(&[push_event("bob", "acme/b")], None).is_empty());
    }
}
