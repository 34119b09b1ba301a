//! Reader configuration, loadable from TOML.

use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse reader config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("max_images must be at least 1")]
    ZeroMaxImages,
}

/// Tuning knobs for a [`FrameReader`](crate::FrameReader).
///
/// Dimensions below 1 are clamped rather than rejected; a zero image budget
/// is a hard error because the acquisition buffer cannot work without one.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReaderConfig {
    /// Default buffer width producers will write at.
    pub width: u32,
    /// Default buffer height producers will write at.
    pub height: u32,
    /// Maximum images a consumer may hold un-recycled.
    pub max_images: usize,
    /// How long construction waits for the render thread to come up.
    pub start_timeout_ms: u64,
    /// How long construction waits for the input surface to exist.
    pub surface_timeout_ms: u64,
}

impl Default for ReaderConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            max_images: 2,
            start_timeout_ms: 3_000,
            surface_timeout_ms: 1_000,
        }
    }
}

impl ReaderConfig {
    pub fn new(width: u32, height: u32, max_images: usize) -> Self {
        Self {
            width,
            height,
            max_images,
            ..Self::default()
        }
    }

    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(input)?;
        config.validated()
    }

    pub fn validated(self) -> Result<Self, ConfigError> {
        if self.max_images == 0 {
            return Err(ConfigError::ZeroMaxImages);
        }
        Ok(Self {
            width: self.width.max(1),
            height: self.height.max(1),
            ..self
        })
    }

    pub fn start_timeout(&self) -> Duration {
        Duration::from_millis(self.start_timeout_ms)
    }

    pub fn surface_timeout(&self) -> Duration {
        Duration::from_millis(self.surface_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_usable() {
        let config = ReaderConfig::default().validated().unwrap();
        assert_eq!(config.max_images, 2);
        assert_eq!(config.start_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn parses_partial_toml() {
        let config = ReaderConfig::from_toml_str(
            r#"
            width = 1280
            height = 720
            max_images = 4
            "#,
        )
        .unwrap();
        assert_eq!((config.width, config.height), (1280, 720));
        assert_eq!(config.max_images, 4);
        assert_eq!(config.surface_timeout_ms, 1_000);
    }

    #[test]
    fn zero_max_images_is_rejected() {
        let err = ReaderConfig::from_toml_str("max_images = 0").unwrap_err();
        assert!(matches!(err, ConfigError::ZeroMaxImages));
    }

    #[test]
    fn zero_dimensions_clamp_to_one() {
        let config = ReaderConfig::new(0, 0, 1).validated().unwrap();
        assert_eq!((config.width, config.height), (1, 1));
    }

    #[test]
    fn unknown_keys_parse_as_defaults_elsewhere() {
        let config = ReaderConfig::from_toml_str("start_timeout_ms = 50").unwrap();
        assert_eq!(config.start_timeout(), Duration::from_millis(50));
        assert_eq!(config.width, 640);
    }
}
