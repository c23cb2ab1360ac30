//! Clip planning: per-request tier attempts and GOP anchoring for remux

use serde::Serialize;

use crate::domain::model::{CapabilityTier, ClipRequest};
use crate::domain::rules::TierFallback;

pub mod gop;

pub use gop::{GopPhase, GopWindow};

/// What the orchestrator intends to do with one request
#[derive(Debug, Clone, Serialize)]
pub struct ClipPlan {
    pub index: usize,
    pub label: String,
    /// Tier the first attempt runs at
    pub first_tier: CapabilityTier,
    /// Every tier a request may end up on, highest first
    pub candidate_tiers: Vec<CapabilityTier>,
}

impl ClipPlan {
    pub fn new(index: usize, request: &ClipRequest, detected: CapabilityTier) -> Self {
        let candidate_tiers = CapabilityTier::ALL
            .iter()
            .copied()
            .filter(|tier| *tier <= detected)
            .collect();
        Self {
            index,
            label: request.label.clone(),
            first_tier: detected,
            candidate_tiers,
        }
    }

    /// Fresh downgrade state for executing this plan
    pub fn fallback(&self) -> TierFallback {
        TierFallback::starting_at(self.first_tier)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::model::TimeRange;
    use std::time::Duration;

    #[test]
    fn test_plan_lists_tiers_at_or_below_detected() {
        let request = ClipRequest::new(
            TimeRange::new(Duration::ZERO, Duration::from_secs(5)),
            "X",
        );
        let plan = ClipPlan::new(0, &request, CapabilityTier::CanvasRecorder);
        assert_eq!(
            plan.candidate_tiers,
            vec![CapabilityTier::CanvasRecorder, CapabilityTier::RemuxOnly]
        );

        let mut fallback = plan.fallback();
        assert_eq!(fallback.next_tier(), Some(CapabilityTier::CanvasRecorder));
    }
}
