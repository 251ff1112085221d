//! Tiered incident-summary enrichment hook, invoked best-effort for
//! HIGH/CRITICAL `ScoredEvent`s.
//!
//! Mirrors `qa-pms-ai::provider`'s trait-plus-dispatch shape (`AIProvider` /
//! `AIClient`): a pluggable `AiBackend` trait with one OpenAI-compatible
//! implementation, wrapped by a `TieredSummarizer` that tiers by severity
//! band, caches results, and falls back to a rule-based summary when the
//! backend is unavailable or errors.

use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::types::{ScoredEvent, SeverityBand};

/// Per-band processing tier, controlling token budget and cache lifetime.
#[derive(Debug, Clone, Copy)]
struct TierConfig {
    max_tokens: u32,
    use_full_context: bool,
    cache_ttl: Duration,
}

fn tier_for(band: SeverityBand) -> TierConfig {
    match band {
        SeverityBand::Critical | SeverityBand::High => {
            TierConfig { max_tokens: 500, use_full_context: true, cache_ttl: Duration::from_secs(3600) }
        }
        SeverityBand::Medium => {
            TierConfig { max_tokens: 200, use_full_context: false, cache_ttl: Duration::from_secs(7200) }
        }
        SeverityBand::Low => {
            TierConfig { max_tokens: 50, use_full_context: false, cache_ttl: Duration::from_secs(14_400) }
        }
        SeverityBand::Info => {
            TierConfig { max_tokens: 0, use_full_context: false, cache_ttl: Duration::from_secs(86_400) }
        }
    }
}

/// Minimal completion backend contract, so the summarizer can run against
/// any OpenAI-compatible endpoint (or a test double) without depending on a
/// specific provider's SDK.
#[async_trait]
pub trait AiBackend: Send + Sync {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> anyhow::Result<String>;
}

/// OpenAI-compatible chat-completion backend.
pub struct OpenAiCompatibleBackend {
    http: reqwest::Client,
    api_key: SecretString,
    base_url: String,
    model: String,
}

impl OpenAiCompatibleBackend {
    #[must_use]
    pub fn new(api_key: SecretString, base_url: String, model: String) -> Self {
        Self { http: reqwest::Client::new(), api_key, base_url, model }
    }
}

#[derive(serde::Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatRequestMessage>,
    max_tokens: u32,
}

#[derive(serde::Serialize)]
struct ChatRequestMessage {
    role: &'static str,
    content: String,
}

#[derive(serde::Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(serde::Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(serde::Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[async_trait]
impl AiBackend for OpenAiCompatibleBackend {
    async fn complete(&self, prompt: &str, max_tokens: u32) -> anyhow::Result<String> {
        let request = ChatRequest {
            model: self.model.clone(),
            messages: vec![ChatRequestMessage { role: "user", content: prompt.to_string() }],
            max_tokens,
        };

        let response = self
            .http
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(self.api_key.expose_secret())
            .json(&request)
            .send()
            .await?
            .error_for_status()?
            .json::<ChatResponse>()
            .await?;

        response
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .ok_or_else(|| anyhow::anyhow!("backend returned no choices"))
    }
}

/// A generated incident summary, invoked best-effort from the stream
/// processor for HIGH/CRITICAL events.
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, event: &ScoredEvent) -> anyhow::Result<String>;
}

/// Production summarizer: backend-driven for CRITICAL/HIGH/MEDIUM,
/// rule-based for LOW/INFO or when the backend errors, with a per-event
/// shape cache.
pub struct TieredSummarizer {
    backend: Option<Box<dyn AiBackend>>,
    cache: Cache<String, String>,
}

impl TieredSummarizer {
    #[must_use]
    pub fn new(backend: Option<Box<dyn AiBackend>>) -> Self {
        Self { backend, cache: Cache::builder().max_capacity(10_000).build() }
    }

    fn cache_key(event: &ScoredEvent) -> String {
        format!(
            "{}:{}:{}",
            event.band.as_str(),
            event.event_type.as_str(),
            (event.final_score * 100.0).round() as i64
        )
    }

    fn rule_based_summary(event: &ScoredEvent) -> String {
        format!(
            "{} severity {} event on {} by {} (score {:.2}): {} context factor(s), {} urgency factor(s) applied.",
            event.band.as_str(),
            event.event_type.as_str(),
            event.repo_name,
            event.actor_login,
            event.final_score,
            event.context_factors_applied.len(),
            event.urgency_factors_applied.len(),
        )
    }

    async fn ai_summary(&self, event: &ScoredEvent, tier: TierConfig) -> anyhow::Result<String> {
        let backend = self.backend.as_ref().ok_or_else(|| anyhow::anyhow!("no AI backend configured"))?;

        let context = if tier.use_full_context {
            format!(
                "Full detector breakdown: behavioral={:.2} content={:.2} temporal={:.2} repository={:.2}. \
                 Context factors: {:?}. Urgency factors: {:?}.",
                event.behavioral_score,
                event.content_score,
                event.temporal_score,
                event.repository_score,
                event.context_factors_applied,
                event.urgency_factors_applied,
            )
        } else {
            format!("Severity {} on {}.", event.band.as_str(), event.repo_name)
        };

        let prompt = format!(
            "Summarize this GitHub activity anomaly in at most {} tokens.\n{}",
            tier.max_tokens, context
        );

        backend.complete(&prompt, tier.max_tokens).await
    }
}

#[async_trait]
impl Summarizer for TieredSummarizer {
    async fn summarize(&self, event: &ScoredEvent) -> anyhow::Result<String> {
        let tier = tier_for(event.band);
        let key = Self::cache_key(event);

        if let Some(cached) = self.cache.get(&key).await {
            return Ok(cached);
        }

        let summary = if matches!(event.band, SeverityBand::Info) || self.backend.is_none() {
            Self::rule_based_summary(event)
        } else {
            match self.ai_summary(event, tier).await {
                Ok(summary) => summary,
                Err(err) => {
                    warn!(error = %err, band = event.band.as_str(), "AI summarization failed, falling back to rule-based");
                    Self::rule_based_summary(event)
                }
            }
        };

        self.cache.insert(key, summary.clone()).await;
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{
        BehavioralAnalysis, ContentAnalysis, ContextAnalysis, DetectionWeightsUsed, EventType, TemporalAnalysis,
    };
    use chrono::Utc;

    fn sample_event(band: SeverityBand) -> ScoredEvent {
        ScoredEvent {
            event_id: "1".to_string(),
            actor_login: "alice".to_string(),
            repo_name: "acme/repo".to_string(),
            event_type: EventType::Push,
            event_timestamp: Utc::now(),
            behavioral_score: 0.5,
            content_score: 0.5,
            temporal_score: 0.5,
            repository_score: 0.5,
            context_multiplier: 1.0,
            urgency_factor: 1.0,
            base_score: 0.5,
            final_score: 0.9,
            band,
            detection_weights: DetectionWeightsUsed { behavioral: 0.25, content: 0.35, temporal: 0.20, repository: 0.20 },
            context_factors_applied: vec![],
            urgency_factors_applied: vec![],
            behavioral_analysis: BehavioralAnalysis::default(),
            content_analysis: ContentAnalysis::default(),
            temporal_analysis: TemporalAnalysis::default(),
            context_analysis: ContextAnalysis::default(),
            summary: None,
            processed_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_info_band_uses_rule_based_summary_without_backend() {
        let summarizer = TieredSummarizer::new(None);
        let summary = summarizer.summarize(&sample_event(SeverityBand::Info)).await.unwrap();
        assert!(summary.contains("info"));
    }

    #[tokio::test]
    async fn test_no_backend_falls_back_to_rule_based_for_critical() {
        let summarizer = TieredSummarizer::new(None);
        let summary = summarizer.summarize(&sample_event(SeverityBand::Critical)).await.unwrap();
        assert!(summary.contains("critical"));
    }

    #[tokio::test]
    async fn test_summary_is_cached() {
        let summarizer = TieredSummarizer::new(None);
        let event = sample_event(SeverityBand::Low);
        let first = summarizer.summarize(&event).await.unwrap();
        let second = summarizer.summarize(&event).await.unwrap();
        assert_eq!(first, second);
    }
}
