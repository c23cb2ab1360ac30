//! Capability detection
//!
//! Probes a runtime once and caches the resulting tier for the lifetime of the
//! detector. Probe failures count as "capability absent"; detection itself
//! never fails.

use std::sync::Arc;

use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

use crate::domain::model::CapabilityTier;
use crate::domain::rules::cap_tier;
use crate::ports::MediaRuntime;

/// Memoized capability probe over one runtime
pub struct CapabilityDetector {
    runtime: Arc<dyn MediaRuntime>,
    max_tier: Option<CapabilityTier>,
    detected: OnceCell<CapabilityTier>,
}

impl CapabilityDetector {
    pub fn new(runtime: Arc<dyn MediaRuntime>) -> Self {
        Self {
            runtime,
            max_tier: None,
            detected: OnceCell::new(),
        }
    }

    /// Never report a tier above `max_tier`
    pub fn with_max_tier(mut self, max_tier: Option<CapabilityTier>) -> Self {
        self.max_tier = max_tier;
        self
    }

    /// Highest available tier, probed on first call
    pub async fn detect(&self) -> CapabilityTier {
        *self
            .detected
            .get_or_init(|| async {
                let tier = cap_tier(self.probe().await, self.max_tier);
                info!(runtime = self.runtime.name(), tier = %tier, "Capability detected");
                tier
            })
            .await
    }

    /// Cached tier, if detection already ran
    pub fn cached(&self) -> Option<CapabilityTier> {
        self.detected.get().copied()
    }

    async fn probe(&self) -> CapabilityTier {
        match self.runtime.probe_frame_encoder().await {
            Ok(true) => return CapabilityTier::HardwareFrameEncoder,
            Ok(false) => debug!("No hardware frame encoder"),
            Err(e) => warn!("Frame encoder probe failed: {}", e),
        }

        match self.runtime.probe_recorder().await {
            Ok(true) => return CapabilityTier::CanvasRecorder,
            Ok(false) => debug!("No recorder"),
            Err(e) => warn!("Recorder probe failed: {}", e),
        }

        CapabilityTier::RemuxOnly
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::synthetic::SyntheticRuntime;

    #[tokio::test]
    async fn test_detects_highest_tier() {
        let runtime = Arc::new(SyntheticRuntime::builder().build());
        let detector = CapabilityDetector::new(runtime);
        assert_eq!(detector.cached(), None);
        assert_eq!(detector.detect().await, CapabilityTier::HardwareFrameEncoder);
        assert_eq!(detector.cached(), Some(CapabilityTier::HardwareFrameEncoder));
    }

    #[tokio::test]
    async fn test_drops_to_next_available_tier() {
        let runtime = Arc::new(
            SyntheticRuntime::builder()
                .hardware_encoder(false)
                .build(),
        );
        assert_eq!(
            CapabilityDetector::new(runtime).detect().await,
            CapabilityTier::CanvasRecorder
        );

        let runtime = Arc::new(
            SyntheticRuntime::builder()
                .hardware_encoder(false)
                .recorder(false)
                .build(),
        );
        assert_eq!(
            CapabilityDetector::new(runtime).detect().await,
            CapabilityTier::RemuxOnly
        );
    }

    #[tokio::test]
    async fn test_probe_errors_mean_unavailable() {
        let runtime = Arc::new(SyntheticRuntime::builder().failing_probes().build());
        assert_eq!(
            CapabilityDetector::new(runtime).detect().await,
            CapabilityTier::RemuxOnly
        );
    }

    #[tokio::test]
    async fn test_probes_once() {
        let runtime = Arc::new(SyntheticRuntime::builder().build());
        let detector = CapabilityDetector::new(runtime.clone());
        detector.detect().await;
        detector.detect().await;
        assert_eq!(runtime.probe_count(), 1);
    }

    #[tokio::test]
    async fn test_max_tier_caps_detection() {
        let runtime = Arc::new(SyntheticRuntime::builder().build());
        let detector =
            CapabilityDetector::new(runtime).with_max_tier(Some(CapabilityTier::CanvasRecorder));
        assert_eq!(detector.detect().await, CapabilityTier::CanvasRecorder);
    }
}
