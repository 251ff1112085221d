//! Anomaly detection engine configuration, loaded from environment variables.
//!
//! Mirrors the load-from-env-with-defaults pattern of [`crate::settings::Settings`],
//! but validates cross-field invariants (weights summing to 1, monotonic band
//! thresholds) at construction time rather than leaving them to be discovered later.

use anyhow::{bail, Context, Result};
use secrecy::SecretString;
use std::time::Duration;

const WEIGHT_SUM_TOLERANCE: f64 = 0.01;

/// Weights applied to the four detector sub-scores before composition.
///
/// Must sum to `1.0 ± `[`WEIGHT_SUM_TOLERANCE`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectionWeights {
    pub behavioral: f64,
    pub content: f64,
    pub temporal: f64,
    pub repository: f64,
}

impl DetectionWeights {
    /// Validate that the weights sum to ~1.0.
    ///
    /// # Errors
    ///
    /// Returns an error if the sum deviates from 1.0 by more than the tolerance.
    pub fn validate(&self) -> Result<()> {
        let sum = self.behavioral + self.content + self.temporal + self.repository;
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            bail!("detection weights must sum to 1.0 +/- {WEIGHT_SUM_TOLERANCE}, got {sum}");
        }
        Ok(())
    }
}

impl Default for DetectionWeights {
    fn default() -> Self {
        Self {
            behavioral: 0.25,
            content: 0.35,
            temporal: 0.20,
            repository: 0.20,
        }
    }
}

/// Per-band queue capacity and TTL.
#[derive(Debug, Clone, Copy)]
pub struct BandQueueLimits {
    pub capacity: usize,
    pub ttl: Duration,
}

/// Queue capacities/TTLs for every severity band, in CRITICAL..INFO order.
#[derive(Debug, Clone, Copy)]
pub struct QueueLimits {
    pub critical: BandQueueLimits,
    pub high: BandQueueLimits,
    pub medium: BandQueueLimits,
    pub low: BandQueueLimits,
    pub info: BandQueueLimits,
    pub dead_letter_ttl: Duration,
}

impl Default for QueueLimits {
    fn default() -> Self {
        Self {
            critical: BandQueueLimits {
                capacity: 1_000,
                ttl: Duration::from_secs(3_600),
            },
            high: BandQueueLimits {
                capacity: 2_000,
                ttl: Duration::from_secs(7_200),
            },
            medium: BandQueueLimits {
                capacity: 5_000,
                ttl: Duration::from_secs(14_400),
            },
            low: BandQueueLimits {
                capacity: 10_000,
                ttl: Duration::from_secs(28_800),
            },
            info: BandQueueLimits {
                capacity: 20_000,
                ttl: Duration::from_secs(86_400),
            },
            dead_letter_ttl: Duration::from_secs(7 * 86_400),
        }
    }
}

/// EWMA smoothing factors for the two profile managers.
#[derive(Debug, Clone, Copy)]
pub struct EwmaAlphas {
    pub user_fast: f64,
    pub user_slow: f64,
    pub repo_activity: f64,
    pub repo_contributors: f64,
}

impl Default for EwmaAlphas {
    fn default() -> Self {
        Self {
            user_fast: 0.3,
            user_slow: 0.1,
            repo_activity: 0.4,
            repo_contributors: 0.2,
        }
    }
}

/// GitHub rate-limit coordination thresholds, shared across pollers.
#[derive(Debug, Clone, Copy)]
pub struct RateLimitSettings {
    pub semaphore_slots: usize,
    pub safety_margin: i64,
    pub circuit_open_below: i64,
    pub circuit_close_above: i64,
    pub circuit_open_duration: Duration,
    pub shared_record_ttl: Duration,
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            semaphore_slots: 3,
            safety_margin: 500,
            circuit_open_below: 50,
            circuit_close_above: 1_000,
            circuit_open_duration: Duration::from_secs(1_800),
            shared_record_ttl: Duration::from_secs(3_700),
        }
    }
}

/// Summarizer enrichment hook configuration.
#[derive(Debug, Clone)]
pub struct SummarizerSettings {
    pub enabled: bool,
    pub api_key: Option<SecretString>,
}

/// Top-level configuration for the anomaly detection engine.
#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub redis_url: SecretString,
    pub github_token: SecretString,
    pub detection_weights: DetectionWeights,
    pub queue_limits: QueueLimits,
    pub ewma_alphas: EwmaAlphas,
    pub rate_limit: RateLimitSettings,
    pub http_timeout: Duration,
    pub batch_size: usize,
    pub batch_deadline: Duration,
    pub summarizer: SummarizerSettings,
}

impl EngineSettings {
    /// Load engine settings from environment variables, applying defaults for
    /// anything not overridden.
    ///
    /// # Errors
    ///
    /// Returns an error if a required variable is missing, a numeric variable
    /// fails to parse, or the loaded configuration fails validation (weights
    /// not summing to 1.0).
    pub fn from_env() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let redis_url = SecretString::from(
            std::env::var("ANOMALY_REDIS_URL").context("ANOMALY_REDIS_URL is required")?,
        );
        let github_token = SecretString::from(
            std::env::var("GITHUB_TOKEN").context("GITHUB_TOKEN is required")?,
        );

        let detection_weights = DetectionWeights {
            behavioral: env_f64("ANOMALY_WEIGHT_BEHAVIORAL", 0.25)?,
            content: env_f64("ANOMALY_WEIGHT_CONTENT", 0.35)?,
            temporal: env_f64("ANOMALY_WEIGHT_TEMPORAL", 0.20)?,
            repository: env_f64("ANOMALY_WEIGHT_REPOSITORY", 0.20)?,
        };

        let batch_size = std::env::var("ANOMALY_BATCH_SIZE")
            .unwrap_or_else(|_| "50".to_string())
            .parse()
            .context("ANOMALY_BATCH_SIZE must be a valid number")?;

        let batch_deadline_ms: u64 = std::env::var("ANOMALY_BATCH_DEADLINE_MS")
            .unwrap_or_else(|_| "2000".to_string())
            .parse()
            .context("ANOMALY_BATCH_DEADLINE_MS must be a valid number")?;

        let http_timeout_ms: u64 = std::env::var("ANOMALY_HTTP_TIMEOUT_MS")
            .unwrap_or_else(|_| "5000".to_string())
            .parse()
            .context("ANOMALY_HTTP_TIMEOUT_MS must be a valid number")?;

        let summarizer = SummarizerSettings {
            enabled: std::env::var("ANOMALY_SUMMARIZER_ENABLED")
                .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
                .unwrap_or(false),
            api_key: std::env::var("ANOMALY_SUMMARIZER_API_KEY")
                .ok()
                .map(SecretString::from),
        };

        let settings = Self {
            redis_url,
            github_token,
            detection_weights,
            queue_limits: QueueLimits::default(),
            ewma_alphas: EwmaAlphas::default(),
            rate_limit: RateLimitSettings::default(),
            http_timeout: Duration::from_millis(http_timeout_ms),
            batch_size,
            batch_deadline: Duration::from_millis(batch_deadline_ms),
            summarizer,
        };

        settings.detection_weights.validate()?;

        Ok(settings)
    }
}

fn env_f64(key: &str, default: f64) -> Result<f64> {
    match std::env::var(key) {
        Ok(v) => v.parse().with_context(|| format!("{key} must be a valid float")),
        Err(_) => Ok(default),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_weights_sum_to_one() {
        assert!(DetectionWeights::default().validate().is_ok());
    }

    #[test]
    fn test_invalid_weights_rejected() {
        let weights = DetectionWeights {
            behavioral: 0.5,
            content: 0.5,
            temporal: 0.5,
            repository: 0.5,
        };
        assert!(weights.validate().is_err());
    }

    #[test]
    fn test_weights_within_tolerance_accepted() {
        let weights = DetectionWeights {
            behavioral: 0.25,
            content: 0.35,
            temporal: 0.20,
            repository: 0.205,
        };
        assert!(weights.validate().is_ok());
    }

    #[test]
    fn test_queue_limits_default_ordering() {
        let limits = QueueLimits::default();
        assert!(limits.critical.capacity < limits.high.capacity);
        assert!(limits.high.capacity < limits.medium.capacity);
        assert!(limits.medium.capacity < limits.low.capacity);
        assert!(limits.low.capacity < limits.info.capacity);
    }
}
