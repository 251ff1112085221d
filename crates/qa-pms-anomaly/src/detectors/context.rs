//! Repository-context scorer: fetches and caches repo metadata, computes a
//! criticality score that feeds both the feature vector and the severity
//! engine's context multiplier.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use moka::future::Cache;
use secrecy::{ExposeSecret, SecretString};
use tracing::warn;

use crate::types::{ContextAnalysis, ContextFeatures, RepoContext};

const METADATA_CACHE_TTL: Duration = Duration::from_secs(2 * 3600);
const FEATURE_WEIGHTS: [f64; 9] = [0.0, 0.25, 0.20, 0.15, 0.15, 0.10, 0.05, 0.05, 0.05];

const HIGH_VALUE_LANGUAGES: &[&str] = &["Rust", "Go", "Python", "TypeScript", "Java"];
const HIGH_VALUE_TOPICS: &[&str] = &["security", "authentication", "payments", "infrastructure", "production"];
const WELL_KNOWN_ORGS: &[&str] = &["kubernetes", "rust-lang", "apache", "cncf", "torvalds"];
const REPO_NAME_KEYWORDS: &[&str] = &["prod", "production", "core", "api", "auth"];

/// Fetches and caches GitHub repository metadata, computing a criticality
/// score in `[0, 1]`.
pub struct ContextScorer {
    http: reqwest::Client,
    token: SecretString,
    metadata_cache: Cache<String, Arc<RepoContext>>,
}

impl ContextScorer {
    #[must_use]
    pub fn new(http: reqwest::Client, token: SecretString) -> Self {
        Self {
            http,
            token,
            metadata_cache: Cache::builder().time_to_live(METADATA_CACHE_TTL).build(),
        }
    }

    /// Score a repository's criticality, folding in the size of the current
    /// event batch as a recency boost. Falls back to a neutral criticality on
    /// any fetch error rather than failing the whole scoring pipeline.
    pub async fn analyze(&self, repo_name: &str, batch_event_count: usize) -> ContextAnalysis {
        match self.fetch_or_cache(repo_name).await {
            Ok(context) => {
                let (features, criticality) = score_context(&context, batch_event_count, repo_name);
                ContextAnalysis {
                    features,
                    criticality,
                    analysis_type: "computed".to_string(),
                    public_repo: !context.private,
                }
            }
            Err(err) => {
                warn!(repo = repo_name, error = %err, "repo context fetch failed, using fallback criticality");
                ContextAnalysis::default()
            }
        }
    }

    /// Multiplier fed into the severity engine's context composition.
    #[must_use]
    pub fn criticality_multiplier(criticality: f64) -> f64 {
        if criticality >= 0.8 {
            1.5
        } else if criticality >= 0.6 {
            1.3
        } else if criticality >= 0.4 {
            1.1
        } else {
            1.0
        }
    }

    async fn fetch_or_cache(&self, repo_name: &str) -> anyhow::Result<Arc<RepoContext>> {
        if let Some(cached) = self.metadata_cache.get(repo_name).await {
            return Ok(cached);
        }
        let fetched = Arc::new(self.fetch_repo_metadata(repo_name).await?);
        self.metadata_cache.insert(repo_name.to_string(), fetched.clone()).await;
        Ok(fetched)
    }

    async fn fetch_repo_metadata(&self, repo_name: &str) -> anyhow::Result<RepoContext> {
        let url = format!("https://api.github.com/repos/{repo_name}");
        let response = self
            .http
            .get(&url)
            .bearer_auth(self.token.expose_secret())
            .header("User-Agent", "gh-anomaly-engine")
            .send()
            .await?
            .error_for_status()?;

        let body: GithubRepoResponse = response.json().await?;
        Ok(RepoContext {
            stars: body.stargazers_count,
            forks: body.forks_count,
            language: body.language,
            topics: body.topics.unwrap_or_default(),
            created_at: body.created_at,
            updated_at: body.updated_at,
            owner_type: body.owner.kind,
            has_security_policy: body.security_and_analysis.is_some(),
            has_code_of_conduct: false,
            has_contributing: false,
            size_kb: body.size,
            contributors: 0,
            private: body.private,
            cached_at: Utc::now(),
        })
    }
}

#[derive(serde::Deserialize)]
struct GithubRepoResponse {
    stargazers_count: u64,
    forks_count: u64,
    size: u64,
    language: Option<String>,
    topics: Option<Vec<String>>,
    created_at: chrono::DateTime<Utc>,
    updated_at: chrono::DateTime<Utc>,
    owner: GithubOwner,
    #[serde(default)]
    security_and_analysis: Option<serde_json::Value>,
    #[serde(default)]
    private: bool,
}

#[derive(serde::Deserialize)]
struct GithubOwner {
    #[serde(rename = "type")]
    kind: String,
}

fn score_context(context: &RepoContext, batch_event_count: usize, repo_name: &str) -> (ContextFeatures, f64) {
    let stars_norm = (((context.stars + 1) as f64).log10() / 6.0).min(1.0);
    let forks_norm = (((context.forks + 1) as f64).log10() / 5.0).min(1.0);
    let contributor_norm = (((context.contributors + 1) as f64).log10() / 3.0).min(1.0);

    let days_since_update = (Utc::now() - context.updated_at).num_days().max(0) as f64;
    let recency = (1.0 - (days_since_update / 90.0)).clamp(0.0, 1.0);
    let event_boost = (batch_event_count as f64 / 10.0).min(0.3);
    let recent_activity = (recency + event_boost).min(1.0);

    let is_popular_language = context
        .language
        .as_deref()
        .is_some_and(|l| HIGH_VALUE_LANGUAGES.contains(&l));
    let security_policy_score = {
        let mut score = 0.0;
        if context.has_security_policy {
            score += 0.4;
        }
        if context.has_code_of_conduct {
            score += 0.2;
        }
        if context.has_contributing {
            score += 0.2;
        }
        if is_popular_language {
            score += 0.1;
        }
        score.min(1.0)
    };

    let is_org = context.owner_type.eq_ignore_ascii_case("organization");
    let branch_protection = if is_org && context.stars > 100 {
        0.8
    } else if context.stars > 1000 || context.forks > 200 {
        0.6
    } else {
        0.2
    };

    let dependency_risk = if context.size_kb > 100_000 {
        0.8
    } else if context.size_kb > 10_000 {
        0.6
    } else if context.size_kb > 1_000 {
        0.4
    } else {
        0.2
    };

    let age_years = ((Utc::now() - context.created_at).num_days() as f64 / 365.25).max(0.5);
    let popularity_momentum =
        ((context.stars as f64 / age_years + (context.forks as f64 / age_years) * 10.0) / 10.0).min(1.0);

    let mut features: ContextFeatures = [
        0.0,
        stars_norm,
        forks_norm,
        contributor_norm,
        recent_activity,
        security_policy_score,
        branch_protection,
        dependency_risk,
        popularity_momentum,
    ];

    let mut criticality = (1..9).map(|i| features[i] * FEATURE_WEIGHTS[i]).sum::<f64>();

    if is_popular_language {
        criticality += 0.1;
    }
    if context.topics.iter().any(|t| HIGH_VALUE_TOPICS.contains(&t.as_str())) {
        criticality += 0.05;
    }
    if is_org {
        criticality += 0.1;
    }
    if WELL_KNOWN_ORGS.iter().any(|org| repo_name.to_lowercase().starts_with(&format!("{org}/"))) {
        criticality += 0.2;
    }
    if REPO_NAME_KEYWORDS.iter().any(|kw| repo_name.to_lowercase().contains(kw)) {
        criticality += 0.05;
    }

    criticality = criticality.clamp(0.0, 1.0);
    features[0] = criticality;

    (features, criticality)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_context() -> RepoContext {
        RepoContext {
            stars: 10,
            forks: 2,
            language: Some("Rust".to_string()),
            topics: vec![],
            created_at: Utc::now() - chrono::Duration::days(365),
            updated_at: Utc::now() - chrono::Duration::days(1),
            owner_type: "User".to_string(),
            has_security_policy: false,
            has_code_of_conduct: false,
            has_contributing: false,
            size_kb: 500,
            contributors: 1,
            private: false,
            cached_at: Utc::now(),
        }
    }

    #[test]
    fn test_criticality_in_unit_range() {
        let (_, criticality) = score_context(&base_context(), 0, "someone/repo");
        assert!((0.0..=1.0).contains(&criticality));
    }

    #[test]
    fn test_well_known_org_boosts_criticality() {
        let (_, low) = score_context(&base_context(), 0, "someone/repo");
        let (_, high) = score_context(&base_context(), 0, "kubernetes/kubernetes");
        assert!(high > low);
    }

    #[test]
    fn test_criticality_multiplier_thresholds() {
        assert!((ContextScorer::criticality_multiplier(0.9) - 1.5).abs() < 1e-9);
        assert!((ContextScorer::criticality_multiplier(0.65) - 1.3).abs() < 1e-9);
        assert!((ContextScorer::criticality_multiplier(0.45) - 1.1).abs() < 1e-9);
        assert!((ContextScorer::criticality_multiplier(0.1) - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_event_boost_clamped() {
        let mut ctx = base_context();
        ctx.updated_at = Utc::now() - chrono::Duration::days(365);
        let (features, _) = score_context(&ctx, 1000, "someone/repo");
        assert!(features[4] <= 1.0);
    }
}
