//! Routing outcomes.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::billing::CostClass;
use crate::edit::{EditTask, EditedImage};
use crate::error::ProviderError;

/// Why a request needs more entitlement before it can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(tag = "reason", rename_all = "snake_case")]
pub enum UpgradeReason {
    #[error("insufficient budget credits: {required} required, {remaining} remaining")]
    InsufficientBudgetCredits { required: u32, remaining: u32 },

    #[error("insufficient premium credits: {required} required, {remaining} remaining")]
    InsufficientPremiumCredits { required: u32, remaining: u32 },

    #[error("premium feature required: {required} required, {remaining} remaining")]
    PremiumFeatureRequired { required: u32, remaining: u32 },
}

impl UpgradeReason {
    pub fn required(&self) -> u32 {
        match self {
            Self::InsufficientBudgetCredits { required, .. }
            | Self::InsufficientPremiumCredits { required, .. }
            | Self::PremiumFeatureRequired { required, .. } => *required,
        }
    }

    pub fn remaining(&self) -> u32 {
        match self {
            Self::InsufficientBudgetCredits { remaining, .. }
            | Self::InsufficientPremiumCredits { remaining, .. }
            | Self::PremiumFeatureRequired { remaining, .. } => *remaining,
        }
    }
}

/// What the router would do with a request, computed without side effects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "decision", rename_all = "snake_case")]
pub enum RoutingDecision {
    /// Candidate provider ids, in the order they would be tried.
    Route { providers: Vec<String> },
    RequiresUpgrade { reason: UpgradeReason },
    NoProvidersAvailable,
}

/// How one candidate fared.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptOutcome {
    Succeeded,
    Failed(ProviderError),
    /// No credit left for the candidate's cost class; not invoked.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttemptRecord {
    pub provider_id: String,
    pub cost_class: CostClass,
    pub outcome: AttemptOutcome,
    pub elapsed: Duration,
}

impl AttemptRecord {
    /// Whether the provider was actually called.
    pub fn invoked(&self) -> bool {
        !matches!(self.outcome, AttemptOutcome::Skipped)
    }
}

/// Details attached to a successful route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RouteMetadata {
    pub request_id: Uuid,
    /// `None` for cache hits, which skip classification.
    pub task: Option<EditTask>,
    pub cost_class: CostClass,
    pub cache_hit: bool,
    pub attempts: Vec<AttemptRecord>,
}

/// Terminal failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingFailure {
    #[error("no provider supports {task}")]
    NoProvidersAvailable { task: EditTask },

    #[error("all {attempts} provider attempts failed; last error: {last_error}")]
    AllProvidersFailed {
        last_error: ProviderError,
        attempts: usize,
    },
}

/// Result of [`Router::route`](super::Router::route).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RoutingResult {
    Success {
        output: EditedImage,
        provider_id: String,
        elapsed: Duration,
        metadata: RouteMetadata,
    },
    RequiresUpgrade(UpgradeReason),
    Failure(RoutingFailure),
}

impl RoutingResult {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Winning provider, for successes.
    pub fn provider_id(&self) -> Option<&str> {
        match self {
            Self::Success { provider_id, .. } => Some(provider_id),
            _ => None,
        }
    }

    pub fn metadata(&self) -> Option<&RouteMetadata> {
        match self {
            Self::Success { metadata, .. } => Some(metadata),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn upgrade_reason_exposes_amounts() {
        let reason = UpgradeReason::InsufficientBudgetCredits {
            required: 1,
            remaining: 0,
        };
        assert_eq!(reason.required(), 1);
        assert_eq!(reason.remaining(), 0);
        assert_eq!(
            reason.to_string(),
            "insufficient budget credits: 1 required, 0 remaining"
        );
    }

    #[test]
    fn decision_serializes_tagged() {
        let decision = RoutingDecision::RequiresUpgrade {
            reason: UpgradeReason::PremiumFeatureRequired {
                required: 1,
                remaining: 0,
            },
        };
        let json = serde_json::to_value(&decision).unwrap();
        assert_eq!(json["decision"], "requires_upgrade");
        assert_eq!(json["reason"]["reason"], "premium_feature_required");
    }
}
