//! Redis key-layout helpers (§6). Centralizing key formatting keeps the
//! `owner/repo` → `owner:repo` colon substitution in exactly one place.

/// TTL, in seconds, applied to `repo_context_info:*` entries.
pub const REPO_CONTEXT_TTL_SECS: u64 = 7200;
/// TTL, in seconds, applied to `repo_contributors:*` entries.
pub const REPO_CONTRIBUTORS_TTL_SECS: u64 = 3600;
/// TTL, in seconds, applied to temporal baseline entries.
pub const TEMPORAL_BASELINE_TTL_SECS: u64 = 3600;
/// TTL, in seconds, for the dead-letter queue.
pub const DEAD_LETTER_TTL_SECS: u64 = 7 * 24 * 3600;
/// TTL floor for the shared GitHub rate-limit record.
pub const RATE_LIMIT_RECORD_TTL_SECS: u64 = 3700;
/// TTL for the open circuit-breaker marker.
pub const CIRCUIT_BREAKER_TTL_SECS: u64 = 1800;

/// Replace `/` with `:` for use in a repo-keyed Redis key, per §6's note.
#[must_use]
pub fn repo_key_segment(repo_name: &str) -> String {
    repo_name.replace('/', ":")
}

#[must_use]
pub fn user_profile_key(login: &str) -> String {
    format!("user_profile_v2:{login}")
}

#[must_use]
pub fn repo_profile_key(repo_name: &str) -> String {
    format!("repo_profile_v2:{}", repo_key_segment(repo_name))
}

#[must_use]
pub fn repo_context_key(repo_name: &str) -> String {
    format!("repo_context_info:{}", repo_key_segment(repo_name))
}

#[must_use]
pub fn repo_contributors_key(repo_name: &str) -> String {
    format!("repo_contributors:{}", repo_key_segment(repo_name))
}

#[must_use]
pub fn user_baseline_temporal_key(login: &str) -> String {
    format!("user_baseline_temporal:{login}")
}

#[must_use]
pub fn repo_baseline_temporal_key(repo_name: &str) -> String {
    format!("repo_baseline_temporal:{}", repo_key_segment(repo_name))
}

pub const RATE_LIMIT_KEY: &str = "github:rate_limit";
pub const CIRCUIT_BREAKER_KEY: &str = "github:circuit_breaker";
pub const API_SEMAPHORE_KEY: &str = "github:api_semaphore";
pub const EVENT_QUEUE_KEY: &str = "event_queue";
pub const DEAD_LETTER_QUEUE_KEY: &str = "anomaly_queue:dead_letter";

#[must_use]
pub fn anomaly_queue_key(band: crate::types::SeverityBand) -> String {
    format!("anomaly_queue:{}", band.as_str())
}

#[must_use]
pub fn anomaly_queue_metadata_key(band: crate::types::SeverityBand) -> String {
    format!("anomaly_queue:metadata:{}", band.as_str())
}

/// Pub/sub channel for all non-INFO scored events.
pub const CHANNEL_ALL_ANOMALIES: &str = "anomalies";

#[must_use]
pub fn band_channel(band: crate::types::SeverityBand) -> String {
    format!("anomalies_{}", band.as_str())
}

#[must_use]
pub fn user_channel(login: &str) -> String {
    format!("user_{login}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SeverityBand;

    #[test]
    fn test_repo_key_segment_replaces_slash() {
        assert_eq!(repo_key_segment("acme/prod-api"), "acme:prod-api");
    }

    #[test]
    fn test_user_profile_key_uses_v2_namespace() {
        assert_eq!(user_profile_key("alice"), "user_profile_v2:alice");
    }

    #[test]
    fn test_repo_profile_key_colon_substitution() {
        assert_eq!(repo_profile_key("acme/prod-api"), "repo_profile_v2:acme:prod-api");
    }

    #[test]
    fn test_anomaly_queue_key_per_band() {
        assert_eq!(anomaly_queue_key(SeverityBand::Critical), "anomaly_queue:critical");
    }

    #[test]
    fn test_user_channel_format() {
        assert_eq!(user_channel("alice"), "user_alice");
    }
}
