// Domain rules - Clip naming, frame rate and tier fallback policies

use tracing::debug;

use crate::domain::model::CapabilityTier;
use crate::error::ClipError;

/// Replace every character that is not ASCII alphanumeric with `_`.
///
/// An empty label yields `clip` so a download name is always produced.
pub fn sanitize_label(label: &str) -> String {
    if label.is_empty() {
        return "clip".to_string();
    }
    label
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Snap a measured frame rate to the nearest standard rate
pub fn snap_frame_rate(measured: f64) -> u32 {
    if measured >= 55.0 {
        60
    } else if measured >= 45.0 {
        50
    } else if measured >= 28.0 {
        30
    } else if measured >= 22.0 {
        24
    } else {
        30
    }
}

/// Output frame rate for a clip; never above the source rate
pub fn effective_frame_rate(preset_fps: u32, source_fps: f64) -> f64 {
    let preset = preset_fps as f64;
    if source_fps.is_finite() && source_fps > 0.0 {
        preset.min(source_fps)
    } else {
        preset
    }
}

/// Frames between forced key frames
pub fn keyframe_interval_frames(fps: f64, interval_secs: u32) -> u64 {
    ((fps * interval_secs as f64).round() as u64).max(1)
}

/// Number of output frames needed to cover `seconds` at `fps`
pub fn frame_count(seconds: f64, fps: f64) -> u64 {
    if seconds <= 0.0 || fps <= 0.0 {
        return 0;
    }
    // tolerate float noise such as 5.0 * 30.0 = 150.00000000000003
    (seconds * fps - 1e-6).ceil().max(1.0) as u64
}

/// Cap a detected tier at a configured maximum
pub fn cap_tier(detected: CapabilityTier, max_tier: Option<CapabilityTier>) -> CapabilityTier {
    match max_tier {
        Some(max) if max < detected => max,
        _ => detected,
    }
}

/// Tier downgrade policy for a single clip request.
///
/// Starts at the detected tier and walks down one tier per permitted failure,
/// ending at remux. Each tier is attempted at most once.
#[derive(Debug, Clone)]
pub struct TierFallback {
    next: Option<CapabilityTier>,
    attempted: Vec<CapabilityTier>,
}

impl TierFallback {
    pub fn starting_at(tier: CapabilityTier) -> Self {
        Self {
            next: Some(tier),
            attempted: Vec::new(),
        }
    }

    /// Tier to try now, or `None` once the chain is exhausted
    pub fn next_tier(&mut self) -> Option<CapabilityTier> {
        let tier = self.next.take()?;
        self.attempted.push(tier);
        Some(tier)
    }

    /// Record a failed attempt. Returns whether another tier will be tried.
    pub fn record_failure(&mut self, tier: CapabilityTier, error: &ClipError) -> bool {
        if !tier.is_encode_tier() || !error.permits_downgrade() {
            debug!(tier = %tier, error = %error, "Failure is terminal for this request");
            self.next = None;
            return false;
        }
        self.next = tier.step_down();
        self.next.is_some()
    }

    /// Tiers attempted so far, in order
    pub fn attempted(&self) -> &[CapabilityTier] {
        &self.attempted
    }
}

#[cfg(test)]
mod tests;
