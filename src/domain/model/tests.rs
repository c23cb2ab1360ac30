// Unit tests for domain models

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use crate::domain::model::*;
    use crate::error::ClipError;

    #[test]
    fn test_source_clone_keeps_identity() {
        let source = SourceMedia::new(vec![1u8, 2, 3], "video/mp4");
        let clone = source.clone();
        assert_eq!(source.id(), clone.id());
        assert_eq!(clone.len(), 3);

        let other = SourceMedia::new(vec![1u8, 2, 3], "video/mp4");
        assert_ne!(source.id(), other.id());
    }

    #[test]
    fn test_source_container_hint() {
        assert_eq!(
            SourceMedia::new(Vec::new(), "video/mp4").container_hint(),
            Some(ContainerFormat::Mp4)
        );
        assert_eq!(
            SourceMedia::new(Vec::new(), "video/webm; codecs=vp9").container_hint(),
            Some(ContainerFormat::WebM)
        );
        assert_eq!(SourceMedia::new(Vec::new(), "video/x-ivf").container_hint(), None);
    }

    #[test]
    fn test_time_range_parse_and_duration() {
        let range = TimeRange::parse("00:10", "00:25").unwrap();
        assert_eq!(range.start, Duration::from_secs(10));
        assert_eq!(range.duration(), Duration::from_secs(15));
        assert!(range.contains(Duration::from_secs(10)));
        assert!(!range.contains(Duration::from_secs(25)));
        assert_eq!(range.to_string(), "00:10-00:25");
    }

    #[test]
    fn test_time_range_validation() {
        let duration = Duration::from_secs(180);

        let ok = TimeRange::parse("00:00", "03:00").unwrap();
        assert!(ok.validate_against(duration).is_ok());

        let past_end = TimeRange::parse("03:00", "03:10").unwrap();
        assert!(matches!(
            past_end.validate_against(duration),
            Err(ClipError::InvalidRange { .. })
        ));

        let empty = TimeRange::parse("00:30", "00:30").unwrap();
        assert!(empty.validate_against(duration).is_err());

        let reversed = TimeRange::parse("00:40", "00:30").unwrap();
        assert_eq!(reversed.duration(), Duration::ZERO);
        assert!(reversed.validate_against(duration).is_err());
    }

    #[test]
    fn test_clip_request_from_str() {
        let request: ClipRequest = "00:00,00:15,Intro, part one".parse().unwrap();
        assert_eq!(request.label, "Intro, part one");
        assert_eq!(request.range.end, Duration::from_secs(15));

        assert!(matches!(
            "00:00".parse::<ClipRequest>(),
            Err(ClipError::MalformedTimecode { .. })
        ));
        assert!("xx:00,00:15,Bad".parse::<ClipRequest>().is_err());
    }

    #[test]
    fn test_capability_tier_ordering() {
        assert!(CapabilityTier::HardwareFrameEncoder > CapabilityTier::CanvasRecorder);
        assert!(CapabilityTier::CanvasRecorder > CapabilityTier::RemuxOnly);
        assert_eq!(
            CapabilityTier::HardwareFrameEncoder.step_down(),
            Some(CapabilityTier::CanvasRecorder)
        );
        assert_eq!(CapabilityTier::RemuxOnly.step_down(), None);
        assert!(!CapabilityTier::RemuxOnly.is_encode_tier());
    }

    #[test]
    fn test_capability_tier_parse_and_serde() {
        assert_eq!("hw".parse::<CapabilityTier>().unwrap(), CapabilityTier::HardwareFrameEncoder);
        assert_eq!(
            "canvas-recorder".parse::<CapabilityTier>().unwrap(),
            CapabilityTier::CanvasRecorder
        );
        assert!("gpu".parse::<CapabilityTier>().is_err());

        let json = serde_json::to_string(&CapabilityTier::RemuxOnly).unwrap();
        assert_eq!(json, "\"remux-only\"");
    }

    #[test]
    fn test_tier_containers() {
        assert_eq!(
            CapabilityTier::HardwareFrameEncoder.output_container(),
            Some(ContainerFormat::Mp4)
        );
        assert_eq!(
            CapabilityTier::CanvasRecorder.output_container(),
            Some(ContainerFormat::WebM)
        );
        assert_eq!(CapabilityTier::RemuxOnly.output_container(), None);
    }

    #[test]
    fn test_encoded_clip_naming() {
        let clip = EncodedClip {
            index: 0,
            label: "Best bit! (v2)".to_string(),
            bytes: vec![0u8; 4].into(),
            container: ContainerFormat::WebM,
            tier: CapabilityTier::CanvasRecorder,
            width: 1080,
            height: 1920,
            duration: Duration::from_secs(5),
        };
        assert_eq!(clip.suggested_filename(), "Best_bit___v2_.webm");
        assert_eq!(clip.mime_type(), "video/webm");
        assert_eq!(clip.len(), 4);
    }

    #[test]
    fn test_timebase_creation() {
        let timebase = Timebase::new(1, 30).unwrap();
        assert_eq!(timebase.to_seconds(), 1.0 / 30.0);
        assert!(Timebase::new(1, 0).is_err());
        assert!(Timebase::new(0, 30).is_err());
    }

    #[test]
    fn test_timebase_duration_conversion() {
        let timebase = Timebase::new(1, 30).unwrap();
        assert_eq!(timebase.ticks_to_duration(150), Duration::from_secs(5));
        assert_eq!(timebase.duration_to_ticks(Duration::from_secs(5)), 150);
        assert_eq!(timebase.ticks_to_duration(-3), Duration::ZERO);
    }

    #[test]
    fn test_timebase_rescale() {
        let ms = Timebase::new(1, 1000).unwrap();
        let mpeg = Timebase::new(1, 90_000).unwrap();
        assert_eq!(ms.rescale(1500, &mpeg), 135_000);
        assert_eq!(mpeg.rescale(135_000, &ms), 1500);
    }

    #[test]
    fn test_video_stream_info() {
        let timebase = Timebase::new(1, 30).unwrap();
        let stream = VideoStreamInfo::new(0, "h264", 1920, 1080, 30.0, timebase).unwrap();
        assert_eq!(stream.aspect_ratio(), 16.0 / 9.0);
        assert!(VideoStreamInfo::new(0, "h264", 0, 1080, 30.0, timebase).is_err());
        assert!(VideoStreamInfo::new(0, "h264", 1920, 1080, 0.0, timebase).is_err());
    }
}
