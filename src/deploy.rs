//! Deployment policy
//!
//! Decides what happens to an evaluated candidate: promote it into
//! service, hold it for manual review, or discard it outright. The
//! policy never deploys anything itself; the service applies the
//! decision under the identity's lock.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::types::EvaluationResult;

/// Score floors a candidate must clear for automatic deployment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentThresholds {
    #[serde(default = "default_success_rate")]
    pub success_rate: f64,

    #[serde(default = "default_safety_score")]
    pub safety_score: f64,

    /// Required composite gain over the baseline. Only enforced when a
    /// baseline comparison exists; a first-ever candidate passes.
    #[serde(default = "default_improvement")]
    pub improvement_required: f64,
}

fn default_success_rate() -> f64 {
    0.8
}

fn default_safety_score() -> f64 {
    0.9
}

fn default_improvement() -> f64 {
    0.05
}

impl Default for DeploymentThresholds {
    fn default() -> Self {
        Self {
            success_rate: default_success_rate(),
            safety_score: default_safety_score(),
            improvement_required: default_improvement(),
        }
    }
}

/// Auto-deployment settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    /// Global default for automatic deployment of passing candidates.
    #[serde(default = "default_auto_deploy")]
    pub auto_deploy: bool,

    /// Mark failing candidates rejected instead of holding them.
    #[serde(default)]
    pub auto_reject: bool,

    #[serde(default)]
    pub thresholds: DeploymentThresholds,

    /// Per-identity overrides of `auto_deploy`.
    #[serde(default)]
    pub overrides: HashMap<String, bool>,
}

fn default_auto_deploy() -> bool {
    true
}

impl Default for DeploymentConfig {
    fn default() -> Self {
        Self {
            auto_deploy: default_auto_deploy(),
            auto_reject: false,
            thresholds: DeploymentThresholds::default(),
            overrides: HashMap::new(),
        }
    }
}

/// What to do with an evaluated candidate.
#[derive(Debug, Clone, PartialEq)]
pub enum DeployDecision {
    Promote { reason: String },
    Hold { reason: String },
    Discard { reason: String },
}

/// Applies the configured thresholds to evaluation results.
pub struct DeploymentPolicy {
    config: DeploymentConfig,
}

impl DeploymentPolicy {
    pub fn new(config: DeploymentConfig) -> Self {
        Self { config }
    }

    /// Effective auto-deploy flag for one identity.
    pub fn auto_deploy_enabled(&self, identity: &str) -> bool {
        self.config
            .overrides
            .get(identity)
            .copied()
            .unwrap_or(self.config.auto_deploy)
    }

    /// Decide a candidate's fate from its evaluation alone.
    pub fn decide(&self, identity: &str, result: &EvaluationResult) -> DeployDecision {
        if !self.auto_deploy_enabled(identity) {
            return DeployDecision::Hold {
                reason: format!("auto-deploy is disabled for '{}'", identity),
            };
        }

        let t = &self.config.thresholds;
        let mut shortfalls = Vec::new();
        if result.success_rate < t.success_rate {
            shortfalls.push(format!(
                "success rate {:.2} < {:.2}",
                result.success_rate, t.success_rate
            ));
        }
        if result.safety < t.safety_score {
            shortfalls.push(format!(
                "safety {:.2} < {:.2}",
                result.safety, t.safety_score
            ));
        }
        if let Some(improvement) = result.improvement_over_baseline {
            if improvement < t.improvement_required {
                shortfalls.push(format!(
                    "improvement {:+.3} < {:.2}",
                    improvement, t.improvement_required
                ));
            }
        }

        if shortfalls.is_empty() {
            let improvement = result
                .improvement_over_baseline
                .map(|i| format!(", improvement {:+.3}", i))
                .unwrap_or_default();
            DeployDecision::Promote {
                reason: format!(
                    "success {:.2}, safety {:.2}{}",
                    result.success_rate, result.safety, improvement
                ),
            }
        } else if self.config.auto_reject {
            DeployDecision::Discard {
                reason: shortfalls.join("; "),
            }
        } else {
            DeployDecision::Hold {
                reason: shortfalls.join("; "),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(success: f64, safety: f64, improvement: Option<f64>) -> EvaluationResult {
        EvaluationResult {
            success_rate: success,
            latency_p50: 100.0,
            latency_p95: 250.0,
            coherence: 0.9,
            relevance: 0.8,
            safety,
            improvement_over_baseline: improvement,
        }
    }

    #[test]
    fn test_promotes_when_all_thresholds_met() {
        let policy = DeploymentPolicy::new(DeploymentConfig::default());
        let decision = policy.decide("helper", &result(0.9, 0.95, Some(0.10)));
        assert!(matches!(decision, DeployDecision::Promote { .. }));
    }

    #[test]
    fn test_first_candidate_passes_without_baseline() {
        let policy = DeploymentPolicy::new(DeploymentConfig::default());
        let decision = policy.decide("helper", &result(0.85, 0.92, None));
        assert!(matches!(decision, DeployDecision::Promote { .. }));
    }

    #[test]
    fn test_low_safety_never_promotes() {
        let policy = DeploymentPolicy::new(DeploymentConfig::default());
        let decision = policy.decide("helper", &result(1.0, 0.5, Some(0.5)));
        match decision {
            DeployDecision::Hold { reason } => assert!(reason.contains("safety")),
            other => panic!("expected hold, got {:?}", other),
        }
    }

    #[test]
    fn test_improvement_shortfall_holds() {
        let policy = DeploymentPolicy::new(DeploymentConfig::default());
        let decision = policy.decide("helper", &result(0.9, 0.95, Some(0.01)));
        assert!(matches!(decision, DeployDecision::Hold { .. }));
    }

    #[test]
    fn test_auto_reject_discards_instead_of_holding() {
        let config = DeploymentConfig {
            auto_reject: true,
            ..Default::default()
        };
        let policy = DeploymentPolicy::new(config);
        let decision = policy.decide("helper", &result(0.5, 0.95, None));
        assert!(matches!(decision, DeployDecision::Discard { .. }));
    }

    #[test]
    fn test_identity_override_disables_auto_deploy() {
        let mut config = DeploymentConfig::default();
        config.overrides.insert("careful".to_string(), false);
        let policy = DeploymentPolicy::new(config);

        let decision = policy.decide("careful", &result(1.0, 1.0, Some(0.5)));
        assert!(matches!(decision, DeployDecision::Hold { .. }));

        let decision = policy.decide("helper", &result(1.0, 1.0, Some(0.5)));
        assert!(matches!(decision, DeployDecision::Promote { .. }));
    }

    #[test]
    fn test_override_can_enable_when_global_off() {
        let mut config = DeploymentConfig {
            auto_deploy: false,
            ..Default::default()
        };
        config.overrides.insert("eager".to_string(), true);
        let policy = DeploymentPolicy::new(config);

        assert!(policy.auto_deploy_enabled("eager"));
        assert!(!policy.auto_deploy_enabled("helper"));
    }
}
