//! Composes the four detector sub-scores into one final severity, applying
//! context multipliers and urgency factors (§4.6).

use chrono::{DateTime, Timelike, Utc};
use qa_pms_config::engine::DetectionWeights;

use crate::types::{DetectionWeightsUsed, SeverityBand};

const PROTECTED_BRANCH_MARKERS: &[&str] = &["main", "master", "production", "prod"];

/// Context factors recognized by the severity engine's multiplier step.
#[derive(Debug, Clone, Copy, Default)]
pub struct ContextFactors {
    pub protected_branch: bool,
    pub production_repo: bool,
    /// Always `false`: deriving this needs the actor's GitHub permissions
    /// (admin/owner/role), which this engine has no API call to fetch (see
    /// SPEC_FULL.md §4.6).
    pub high_privilege_user: bool,
    pub public_repo: bool,
}

impl ContextFactors {
    /// Derive `protected_branch` from a push ref name and `off_hours_likely`
    /// from the event timestamp; callers set the remaining flags.
    #[must_use]
    pub fn from_ref_and_time(ref_name: Option<&str>, at: DateTime<Utc>) -> (Self, bool) {
        let protected_branch = ref_name
            .is_some_and(|r| PROTECTED_BRANCH_MARKERS.iter().any(|marker| r.to_lowercase().contains(marker)));
        let off_hours_likely = is_off_hours(at);
        (Self { protected_branch, ..Self::default() }, off_hours_likely)
    }
}

/// Urgency indicators recognized by the severity engine's urgency-factor step.
#[derive(Debug, Clone, Copy, Default)]
pub struct UrgencyIndicators {
    pub secrets_exposed: bool,
    pub mass_deletion: bool,
    pub coordinated_attack: bool,
    pub privilege_escalation: bool,
    pub force_push_main: bool,
    pub build_failure_cascade: bool,
}

fn is_off_hours(at: DateTime<Utc>) -> bool {
    let hour = at.hour();
    (2..=10).contains(&hour) || (14..=18).contains(&hour)
}

/// The four clamped detector sub-scores fed into [`SeverityEngine::score`].
#[derive(Debug, Clone, Copy)]
pub struct SubScores {
    pub behavioral: f64,
    pub content: f64,
    pub temporal: f64,
    pub repository: f64,
}

/// Composed output of one scoring call, before being folded into a
/// `ScoredEvent`.
#[derive(Debug, Clone)]
pub struct Composition {
    pub base_score: f64,
    pub context_multiplier: f64,
    pub urgency_factor: f64,
    pub final_score: f64,
    pub band: SeverityBand,
    pub context_factors_applied: Vec<String>,
    pub urgency_factors_applied: Vec<String>,
}

pub struct SeverityEngine {
    weights: DetectionWeights,
}

impl SeverityEngine {
    /// Build a severity engine, rejecting weights that do not sum to
    /// `1.0 ± 0.01` — a deliberate tightening versus the original
    /// implementation's warn-only behavior (§4.6, §7).
    pub fn new(weights: DetectionWeights) -> anyhow::Result<Self> {
        weights.validate()?;
        Ok(Self { weights })
    }

    #[must_use]
    pub fn weights_used(&self) -> DetectionWeightsUsed {
        DetectionWeightsUsed {
            behavioral: self.weights.behavioral,
            content: self.weights.content,
            temporal: self.weights.temporal,
            repository: self.weights.repository,
        }
    }

    #[must_use]
    pub fn score(
        &self,
        sub_scores: SubScores,
        context: ContextFactors,
        off_hours_likely: bool,
        urgency: UrgencyIndicators,
    ) -> Composition {
        let behavioral = sub_scores.behavioral.clamp(0.0, 1.0);
        let content = sub_scores.content.clamp(0.0, 1.0);
        let temporal = sub_scores.temporal.clamp(0.0, 1.0);
        let repository = sub_scores.repository.clamp(0.0, 1.0);

        let base_score = self.weights.behavioral * behavioral
            + self.weights.content * content
            + self.weights.temporal * temporal
            + self.weights.repository * repository;

        let mut context_multiplier = 1.0;
        let mut context_factors_applied = Vec::new();
        if context.protected_branch {
            context_multiplier *= 1.5;
            context_factors_applied.push("protected_branch".to_string());
        }
        if context.production_repo {
            context_multiplier *= 1.3;
            context_factors_applied.push("production_repo".to_string());
        }
        if context.high_privilege_user {
            context_multiplier *= 1.2;
            context_factors_applied.push("high_privilege_user".to_string());
        }
        if off_hours_likely {
            context_multiplier *= 1.1;
            context_factors_applied.push("off_hours_likely".to_string());
        }
        if context.public_repo {
            context_multiplier *= 1.1;
            context_factors_applied.push("public_repo".to_string());
        }

        let mut urgency_factor = 1.0;
        let mut urgency_factors_applied = Vec::new();
        if urgency.secrets_exposed {
            urgency_factor *= 1.8;
            urgency_factors_applied.push("secrets_exposed".to_string());
        }
        if urgency.mass_deletion {
            urgency_factor *= 1.5;
            urgency_factors_applied.push("mass_deletion".to_string());
        }
        if urgency.coordinated_attack {
            urgency_factor *= 1.4;
            urgency_factors_applied.push("coordinated_attack".to_string());
        }
        if urgency.privilege_escalation {
            urgency_factor *= 1.3;
            urgency_factors_applied.push("privilege_escalation".to_string());
        }
        if urgency.force_push_main {
            urgency_factor *= 1.3;
            urgency_factors_applied.push("force_push_main".to_string());
        }
        if urgency.build_failure_cascade {
            urgency_factor *= 1.2;
            urgency_factors_applied.push("build_failure_cascade".to_string());
        }

        let final_score = (base_score * context_multiplier * urgency_factor).min(1.0);
        let band = SeverityBand::from_score(final_score);

        Composition {
            base_score,
            context_multiplier,
            urgency_factor,
            final_score,
            band,
            context_factors_applied,
            urgency_factors_applied,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn engine() -> SeverityEngine {
        SeverityEngine::new(DetectionWeights::default()).expect("default weights are valid")
    }

    #[test]
    fn test_invalid_weights_rejected_at_construction() {
        let bad = DetectionWeights { behavioral: 0.5, content: 0.5, temporal: 0.5, repository: 0.5 };
        assert!(SeverityEngine::new(bad).is_err());
    }

    #[test]
    fn test_zero_sub_scores_yield_info_band() {
        let engine = engine();
        let composition = engine.score(
            SubScores { behavioral: 0.0, content: 0.0, temporal: 0.0, repository: 0.0 },
            ContextFactors::default(),
            false,
            UrgencyIndicators::default(),
        );
        assert_eq!(composition.band, SeverityBand::Info);
        assert!((composition.context_multiplier - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_urgency_and_context_multipliers_compound() {
        let engine = engine();
        let composition = engine.score(
            SubScores { behavioral: 0.5, content: 0.5, temporal: 0.5, repository: 0.5 },
            ContextFactors { protected_branch: true, ..ContextFactors::default() },
            false,
            UrgencyIndicators { secrets_exposed: true, ..UrgencyIndicators::default() },
        );
        assert!((composition.context_multiplier - 1.5).abs() < 1e-9);
        assert!((composition.urgency_factor - 1.8).abs() < 1e-9);
        assert!(composition.final_score <= 1.0);
    }

    #[test]
    fn test_final_score_clamped_to_one() {
        let engine = engine();
        let composition = engine.score(
            SubScores { behavioral: 1.0, content: 1.0, temporal: 1.0, repository: 1.0 },
            ContextFactors {
                protected_branch: true,
                production_repo: true,
                high_privilege_user: true,
                public_repo: true,
            },
            true,
            UrgencyIndicators {
                secrets_exposed: true,
                mass_deletion: true,
                coordinated_attack: true,
                privilege_escalation: true,
                force_push_main: true,
                build_failure_cascade: true,
            },
        );
        assert!((composition.final_score - 1.0).abs() < 1e-9);
        assert_eq!(composition.band, SeverityBand::Critical);
    }

    #[test]
    fn test_protected_branch_detection_case_insensitive() {
        let (factors, _) = ContextFactors::from_ref_and_time(Some("refs/heads/MAIN"), Utc::now());
        assert!(factors.protected_branch);
    }
}
