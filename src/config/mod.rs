//! Engine configuration
//!
//! Values are layered with precedence CLI > environment > file > defaults.
//! The CLI layer is applied by the command handlers on top of what
//! [`EngineConfig::load`] returns.

use std::collections::HashMap;
use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::domain::model::CapabilityTier;
use crate::error::{ClipError, ClipResult};
use crate::utils::logging::LoggingConfig;

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "VERTICUT_";

/// Default config file looked up in the working directory
pub const DEFAULT_CONFIG_FILE: &str = "verticut.toml";

/// Audio bitrate of custom presets
pub const DEFAULT_AUDIO_BITRATE: u64 = 128_000;

/// Target geometry, frame rate and bitrate of produced clips
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputPreset {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Video bitrate in bits per second
    pub video_bitrate: u64,
    /// Bitrate of the audio track carried into encoded clips
    pub audio_bitrate: u64,
}

impl OutputPreset {
    pub const NAMES: [&'static str; 4] = ["whatsapp", "tiktok", "instagram", "default"];

    pub fn whatsapp() -> Self {
        Self::named("whatsapp", 720, 1280, 24, 1_500_000, 96_000)
    }

    pub fn tiktok() -> Self {
        Self::named("tiktok", 1080, 1920, 30, 2_500_000, 128_000)
    }

    pub fn instagram() -> Self {
        Self::named("instagram", 1080, 1920, 30, 3_000_000, 128_000)
    }

    pub fn vertical_default() -> Self {
        Self::named("default", 1080, 1920, 30, 4_000_000, 128_000)
    }

    /// Arbitrary output parameters with 128 kbps audio
    pub fn custom(width: u32, height: u32, fps: u32, video_bitrate: u64) -> Self {
        Self::named("custom", width, height, fps, video_bitrate, DEFAULT_AUDIO_BITRATE)
    }

    fn named(name: &str, width: u32, height: u32, fps: u32, video_bitrate: u64, audio_bitrate: u64) -> Self {
        Self {
            name: name.to_string(),
            width,
            height,
            fps,
            video_bitrate,
            audio_bitrate,
        }
    }

    /// Look up a built-in preset by name
    pub fn by_name(name: &str) -> ClipResult<Self> {
        match name.trim().to_lowercase().as_str() {
            "whatsapp" => Ok(Self::whatsapp()),
            "tiktok" => Ok(Self::tiktok()),
            "instagram" | "reels" => Ok(Self::instagram()),
            "default" | "" => Ok(Self::vertical_default()),
            other => Err(ClipError::config(format!(
                "Unknown preset: {}. Valid presets: {}",
                other,
                Self::NAMES.join(", ")
            ))),
        }
    }

    pub fn aspect_ratio(&self) -> f64 {
        self.width as f64 / self.height as f64
    }

    /// Reject parameters no encoder can honour
    pub fn validate(&self) -> ClipResult<()> {
        if self.width == 0 || self.height == 0 {
            return Err(ClipError::config(format!(
                "Output size {}x{} must be non-zero",
                self.width, self.height
            )));
        }
        if self.width % 2 != 0 || self.height % 2 != 0 {
            return Err(ClipError::config(format!(
                "Output size {}x{} must have even dimensions",
                self.width, self.height
            )));
        }
        if self.fps == 0 {
            return Err(ClipError::config("Output frame rate must be positive"));
        }
        if self.video_bitrate == 0 {
            return Err(ClipError::config("Output bitrate must be positive"));
        }
        if self.audio_bitrate == 0 {
            return Err(ClipError::config("Audio bitrate must be positive"));
        }
        Ok(())
    }
}

impl Default for OutputPreset {
    fn default() -> Self {
        Self::vertical_default()
    }
}

impl fmt::Display for OutputPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}x{} @ {} fps, {:.1} Mbps, audio {} kbps)",
            self.name,
            self.width,
            self.height,
            self.fps,
            self.video_bitrate as f64 / 1_000_000.0,
            self.audio_bitrate / 1000
        )
    }
}

/// Per-field overrides applied on top of the named preset
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputOverrides {
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub fps: Option<u32>,
    pub video_bitrate: Option<u64>,
    pub audio_bitrate: Option<u64>,
}

impl OutputOverrides {
    fn is_empty(&self) -> bool {
        self == &Self::default()
    }
}

/// Top-level configuration of the clip engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Name of the built-in output preset
    pub preset: String,
    pub output: OutputOverrides,
    /// Highest tier the engine may use, regardless of what is detected
    pub max_tier: Option<CapabilityTier>,
    /// Encoded frames between progress reports
    pub progress_interval_frames: u32,
    /// Seconds of output between forced key frames
    pub keyframe_interval_secs: u32,
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            preset: "default".to_string(),
            output: OutputOverrides::default(),
            max_tier: None,
            progress_interval_frames: 15,
            keyframe_interval_secs: 2,
            logging: LoggingConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Parse a TOML document
    pub fn from_toml_str(content: &str) -> ClipResult<Self> {
        toml::from_str(content)
            .map_err(|e| ClipError::config(format!("Failed to parse TOML config: {}", e)))
    }

    /// Read a TOML file
    pub fn from_file(path: impl AsRef<Path>) -> ClipResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            ClipError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        info!("Loading configuration from: {}", path.display());
        Self::from_toml_str(&content)
    }

    /// Defaults, then `file` (or `verticut.toml` if present), then process
    /// environment. The result is validated.
    pub fn load(file: Option<&Path>) -> ClipResult<Self> {
        let mut config = match file {
            Some(path) => Self::from_file(path)?,
            None if Path::new(DEFAULT_CONFIG_FILE).exists() => Self::from_file(DEFAULT_CONFIG_FILE)?,
            None => {
                debug!("No configuration file, using defaults");
                Self::default()
            }
        };
        config.apply_env(std::env::vars())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply `VERTICUT_*` overrides from an environment snapshot
    pub fn apply_env<I>(&mut self, vars: I) -> ClipResult<()>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter(|(k, _)| k.starts_with(ENV_PREFIX))
            .collect();
        let mut applied = 0;

        for (key, value) in &vars {
            let field = &key[ENV_PREFIX.len()..];
            match field {
                "PRESET" => self.preset = value.clone(),
                "MAX_TIER" => self.max_tier = Some(value.parse()?),
                "OUTPUT_WIDTH" => self.output.width = Some(parse_env(key, value)?),
                "OUTPUT_HEIGHT" => self.output.height = Some(parse_env(key, value)?),
                "OUTPUT_FPS" => self.output.fps = Some(parse_env(key, value)?),
                "OUTPUT_BITRATE" => self.output.video_bitrate = Some(parse_env(key, value)?),
                "OUTPUT_AUDIO_BITRATE" => self.output.audio_bitrate = Some(parse_env(key, value)?),
                "PROGRESS_INTERVAL_FRAMES" => self.progress_interval_frames = parse_env(key, value)?,
                "KEYFRAME_INTERVAL_SECS" => self.keyframe_interval_secs = parse_env(key, value)?,
                "LOG_LEVEL" => self.logging.level = value.parse()?,
                "LOG_FORMAT" => self.logging.format = value.parse()?,
                _ => continue,
            }
            info!("Found environment override: {} = {}", key, value);
            applied += 1;
        }

        if applied > 0 {
            info!("Applied {} environment variable overrides", applied);
        }
        Ok(())
    }

    /// Resolve the named preset and apply per-field overrides
    pub fn output_preset(&self) -> ClipResult<OutputPreset> {
        let mut preset = OutputPreset::by_name(&self.preset)?;
        if !self.output.is_empty() {
            preset.name = format!("{}+custom", preset.name);
        }
        if let Some(width) = self.output.width {
            preset.width = width;
        }
        if let Some(height) = self.output.height {
            preset.height = height;
        }
        if let Some(fps) = self.output.fps {
            preset.fps = fps;
        }
        if let Some(bitrate) = self.output.video_bitrate {
            preset.video_bitrate = bitrate;
        }
        if let Some(bitrate) = self.output.audio_bitrate {
            preset.audio_bitrate = bitrate;
        }
        Ok(preset)
    }

    pub fn validate(&self) -> ClipResult<()> {
        self.output_preset()?.validate()?;
        if self.progress_interval_frames == 0 {
            return Err(ClipError::config("progress_interval_frames must be positive"));
        }
        if self.keyframe_interval_secs == 0 {
            return Err(ClipError::config("keyframe_interval_secs must be positive"));
        }
        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> ClipResult<T> {
    value
        .trim()
        .parse()
        .map_err(|_| ClipError::config(format!("Invalid value for {}: {}", key, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::utils::logging::LogFormat;

    fn env(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_builtin_presets() {
        let whatsapp = OutputPreset::by_name("WhatsApp").unwrap();
        assert_eq!((whatsapp.width, whatsapp.height, whatsapp.fps), (720, 1280, 24));
        assert_eq!(whatsapp.video_bitrate, 1_500_000);
        assert_eq!(OutputPreset::by_name("tiktok").unwrap().video_bitrate, 2_500_000);
        assert_eq!(OutputPreset::by_name("instagram").unwrap().video_bitrate, 3_000_000);
        assert_eq!(OutputPreset::default().video_bitrate, 4_000_000);
        assert!((OutputPreset::default().aspect_ratio() - 0.5625).abs() < 1e-9);
        assert!(OutputPreset::by_name("myspace").is_err());
    }

    #[test]
    fn test_preset_audio_bitrates() {
        assert_eq!(OutputPreset::whatsapp().audio_bitrate, 96_000);
        assert_eq!(OutputPreset::tiktok().audio_bitrate, 128_000);
        assert_eq!(OutputPreset::instagram().audio_bitrate, 128_000);
        assert_eq!(OutputPreset::custom(54, 96, 10, 1).audio_bitrate, DEFAULT_AUDIO_BITRATE);

        let mut config = EngineConfig::from_toml_str("preset = \"whatsapp\"\n[output]\naudio_bitrate = 64000").unwrap();
        assert_eq!(config.output_preset().unwrap().audio_bitrate, 64_000);
        config
            .apply_env(env(&[("VERTICUT_OUTPUT_AUDIO_BITRATE", "0")]))
            .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_preset_validation() {
        assert!(OutputPreset::custom(1080, 1920, 30, 1).validate().is_ok());
        assert!(OutputPreset::custom(0, 1920, 30, 1).validate().is_err());
        assert!(OutputPreset::custom(1081, 1920, 30, 1).validate().is_err());
        assert!(OutputPreset::custom(1080, 1920, 0, 1).validate().is_err());
        assert!(OutputPreset::custom(1080, 1920, 30, 0).validate().is_err());
    }

    #[test]
    fn test_toml_file_layer() {
        let config = EngineConfig::from_toml_str(
            r#"
            preset = "whatsapp"
            max_tier = "canvas-recorder"

            [output]
            fps = 15

            [logging]
            format = "json"
            "#,
        )
        .unwrap();

        assert_eq!(config.max_tier, Some(CapabilityTier::CanvasRecorder));
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.progress_interval_frames, 15);

        let preset = config.output_preset().unwrap();
        assert_eq!(preset.fps, 15);
        assert_eq!(preset.width, 720);
        assert_eq!(preset.name, "whatsapp+custom");
    }

    #[test]
    fn test_env_overrides_file() {
        let mut config = EngineConfig::from_toml_str("preset = \"tiktok\"").unwrap();
        config
            .apply_env(env(&[
                ("VERTICUT_PRESET", "instagram"),
                ("VERTICUT_MAX_TIER", "remux-only"),
                ("VERTICUT_OUTPUT_WIDTH", "540"),
                ("HOME", "/root"),
            ]))
            .unwrap();

        assert_eq!(config.preset, "instagram");
        assert_eq!(config.max_tier, Some(CapabilityTier::RemuxOnly));
        assert_eq!(config.output_preset().unwrap().width, 540);
    }

    #[test]
    fn test_env_rejects_garbage() {
        let mut config = EngineConfig::default();
        assert!(config
            .apply_env(env(&[("VERTICUT_OUTPUT_FPS", "fast")]))
            .is_err());
    }

    #[test]
    fn test_validate_rejects_odd_output() {
        let mut config = EngineConfig::default();
        config.output.height = Some(1919);
        assert!(matches!(config.validate(), Err(ClipError::Config { .. })));

        let mut config = EngineConfig::default();
        config.progress_interval_frames = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_unknown_keys_are_rejected_by_type() {
        assert!(EngineConfig::from_toml_str("max_tier = \"quantum\"").is_err());
    }
}
