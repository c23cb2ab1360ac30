// Unit tests for domain rules

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::domain::model::CapabilityTier;
    use crate::domain::rules::*;
    use crate::error::ClipError;

    #[test]
    fn test_sanitize_label() {
        assert_eq!(sanitize_label("Intro"), "Intro");
        assert_eq!(sanitize_label("My clip #1"), "My_clip__1");
        assert_eq!(sanitize_label("café"), "caf_");
        assert_eq!(sanitize_label(""), "clip");
    }

    #[test]
    fn test_snap_frame_rate() {
        assert_eq!(snap_frame_rate(59.94), 60);
        assert_eq!(snap_frame_rate(50.0), 50);
        assert_eq!(snap_frame_rate(29.97), 30);
        assert_eq!(snap_frame_rate(23.976), 24);
        assert_eq!(snap_frame_rate(15.0), 30);
        assert_eq!(snap_frame_rate(0.0), 30);
    }

    #[test]
    fn test_effective_frame_rate_never_upsamples() {
        assert_eq!(effective_frame_rate(30, 60.0), 30.0);
        assert_eq!(effective_frame_rate(30, 24.0), 24.0);
        assert_eq!(effective_frame_rate(24, f64::NAN), 24.0);
    }

    #[test]
    fn test_keyframe_interval() {
        assert_eq!(keyframe_interval_frames(30.0, 2), 60);
        assert_eq!(keyframe_interval_frames(23.976, 2), 48);
        assert_eq!(keyframe_interval_frames(0.1, 1), 1);
    }

    #[test]
    fn test_frame_count() {
        assert_eq!(frame_count(5.0, 30.0), 150);
        assert_eq!(frame_count(0.5, 24.0), 12);
        assert_eq!(frame_count(0.01, 24.0), 1);
        assert_eq!(frame_count(0.0, 24.0), 0);
    }

    #[test]
    fn test_cap_tier() {
        let hw = CapabilityTier::HardwareFrameEncoder;
        assert_eq!(cap_tier(hw, None), hw);
        assert_eq!(
            cap_tier(hw, Some(CapabilityTier::CanvasRecorder)),
            CapabilityTier::CanvasRecorder
        );
        assert_eq!(
            cap_tier(CapabilityTier::RemuxOnly, Some(hw)),
            CapabilityTier::RemuxOnly
        );
    }

    #[test]
    fn test_fallback_walks_every_tier_once() {
        let mut plan = TierFallback::starting_at(CapabilityTier::HardwareFrameEncoder);
        let err = ClipError::encoding("encoder crashed");

        let first = plan.next_tier().unwrap();
        assert!(plan.record_failure(first, &err));
        let second = plan.next_tier().unwrap();
        assert_eq!(second, CapabilityTier::CanvasRecorder);
        assert!(plan.record_failure(second, &err));
        let third = plan.next_tier().unwrap();
        assert_eq!(third, CapabilityTier::RemuxOnly);
        assert!(!plan.record_failure(third, &ClipError::NoKeyframeFound { start: Duration::ZERO }));
        assert_eq!(plan.next_tier(), None);
        assert_eq!(plan.attempted().len(), 3);
    }

    #[test]
    fn test_fallback_stops_on_decode_error() {
        let mut plan = TierFallback::starting_at(CapabilityTier::CanvasRecorder);
        let tier = plan.next_tier().unwrap();
        assert!(!plan.record_failure(tier, &ClipError::decode("out of order")));
        assert_eq!(plan.next_tier(), None);
    }

    #[test]
    fn test_fallback_from_unsupported_configuration() {
        let mut plan = TierFallback::starting_at(CapabilityTier::HardwareFrameEncoder);
        let tier = plan.next_tier().unwrap();
        let err = ClipError::UnsupportedConfiguration {
            tier,
            reason: "width exceeds 720".into(),
        };
        assert!(plan.record_failure(tier, &err));
        assert_eq!(plan.next_tier(), Some(CapabilityTier::CanvasRecorder));
    }
}
