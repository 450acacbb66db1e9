//! ROI Pooling Configuration
//!
//! This module defines the configuration record for the ROI pooling layer.
//! Field and variant names follow the Faster R-CNN config files
//! (`pooling_mode: crop`, `padding: VALID`), so the record can be read
//! from JSON as-is.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use candle_core::Result;
use serde::{Deserialize, Serialize};

/// How proposals are reduced to a fixed-size grid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolingMode {
    /// Bilinear crop-and-resize to twice the pooled size, then 2x2 max pool
    #[default]
    Crop,
    /// Quantized Fast R-CNN pooling: max over integer bins of feature cells
    RoiPooling,
}

impl PoolingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            PoolingMode::Crop => "crop",
            PoolingMode::RoiPooling => "roi_pooling",
        }
    }
}

impl fmt::Display for PoolingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PoolingMode {
    type Err = candle_core::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "crop" => Ok(PoolingMode::Crop),
            "roi_pooling" => Ok(PoolingMode::RoiPooling),
            other => candle_core::bail!("Pooling mode {} does not exist", other),
        }
    }
}

/// Padding of the max-pool step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Padding {
    /// Only full windows; trailing odd rows/columns are dropped
    #[default]
    #[serde(alias = "valid", alias = "Valid")]
    Valid,
    /// Output size is `ceil(input / stride)`; partial windows are kept
    #[serde(alias = "same", alias = "Same")]
    Same,
}

impl Padding {
    pub fn as_str(&self) -> &'static str {
        match self {
            Padding::Valid => "VALID",
            Padding::Same => "SAME",
        }
    }

    /// Output length of a 2-wide, stride-2 pool over `len` elements
    pub fn pooled_len(&self, len: usize) -> usize {
        match self {
            Padding::Valid => len / 2,
            Padding::Same => len.div_ceil(2),
        }
    }
}

impl fmt::Display for Padding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Padding {
    type Err = candle_core::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_uppercase().as_str() {
            "VALID" => Ok(Padding::Valid),
            "SAME" => Ok(Padding::Same),
            _ => candle_core::bail!("Unknown padding {}, expected VALID or SAME", s),
        }
    }
}

/// Configuration for the ROI pooling layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RoiPoolConfig {
    /// Which pooling algorithm to run
    pub pooling_mode: PoolingMode,
    /// Width of the pooled output grid
    pub pooled_width: usize,
    /// Height of the pooled output grid
    pub pooled_height: usize,
    /// Padding used by the max-pool step in crop mode
    pub padding: Padding,
}

impl Default for RoiPoolConfig {
    fn default() -> Self {
        Self {
            pooling_mode: PoolingMode::Crop,
            pooled_width: 7,
            pooled_height: 7,
            padding: Padding::Valid,
        }
    }
}

impl RoiPoolConfig {
    pub fn new(
        pooling_mode: PoolingMode,
        pooled_width: usize,
        pooled_height: usize,
        padding: Padding,
    ) -> Self {
        Self {
            pooling_mode,
            pooled_width,
            pooled_height,
            padding,
        }
    }

    /// Check that the pooled grid is not empty
    pub fn validate(&self) -> Result<()> {
        if self.pooled_width == 0 || self.pooled_height == 0 {
            candle_core::bail!(
                "Pooled size must be at least 1x1, got {}x{}",
                self.pooled_height,
                self.pooled_width
            );
        }
        Ok(())
    }

    /// Size (height, width) of the intermediate crops: twice the pooled size
    pub fn crop_size(&self) -> (usize, usize) {
        (self.pooled_height * 2, self.pooled_width * 2)
    }

    /// Parse a configuration from a JSON string; missing fields take defaults
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json).map_err(candle_core::Error::wrap)?;
        config.validate()?;
        Ok(config)
    }

    /// Load a configuration from a JSON file
    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json_str(&json)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RoiPoolConfig::default();
        assert_eq!(config.pooling_mode, PoolingMode::Crop);
        assert_eq!(config.pooled_width, 7);
        assert_eq!(config.pooled_height, 7);
        assert_eq!(config.padding, Padding::Valid);
        assert_eq!(config.crop_size(), (14, 14));
    }

    #[test]
    fn test_crop_size_is_height_then_width() {
        let config = RoiPoolConfig::new(PoolingMode::Crop, 3, 5, Padding::Valid);
        assert_eq!(config.crop_size(), (10, 6));
    }

    #[test]
    fn test_from_json() {
        let config = RoiPoolConfig::from_json_str(
            r#"{"pooling_mode": "crop", "pooled_width": 2, "pooled_height": 2, "padding": "VALID"}"#,
        )
        .unwrap();
        assert_eq!(
            config,
            RoiPoolConfig::new(PoolingMode::Crop, 2, 2, Padding::Valid)
        );

        let config = RoiPoolConfig::from_json_str(r#"{"pooling_mode": "roi_pooling"}"#).unwrap();
        assert_eq!(config.pooling_mode, PoolingMode::RoiPooling);
        assert_eq!(config.pooled_width, 7);
        assert_eq!(config.padding, Padding::Valid);
    }

    #[test]
    fn test_from_json_padding_any_case() {
        let config = RoiPoolConfig::from_json_str(r#"{"padding": "same"}"#).unwrap();
        assert_eq!(config.padding, Padding::Same);
        let config = RoiPoolConfig::from_json_str(r#"{"padding": "valid"}"#).unwrap();
        assert_eq!(config.padding, Padding::Valid);
        let config = RoiPoolConfig::from_json_str(r#"{"padding": "Same"}"#).unwrap();
        assert_eq!(config.padding, Padding::Same);
    }

    #[test]
    fn test_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("roi_pool.json");
        std::fs::write(
            &path,
            r#"{"pooling_mode": "roi_pooling", "pooled_width": 3, "pooled_height": 4, "padding": "SAME"}"#,
        )
        .unwrap();

        let config = RoiPoolConfig::from_json_file(&path).unwrap();
        assert_eq!(
            config,
            RoiPoolConfig::new(PoolingMode::RoiPooling, 3, 4, Padding::Same)
        );

        assert!(RoiPoolConfig::from_json_file(dir.path().join("missing.json")).is_err());
    }

    #[test]
    fn test_from_json_rejects_unknown_mode_and_zero_size() {
        assert!(RoiPoolConfig::from_json_str(r#"{"pooling_mode": "align"}"#).is_err());
        assert!(RoiPoolConfig::from_json_str(r#"{"pooled_width": 0}"#).is_err());
    }

    #[test]
    fn test_mode_and_padding_from_str() {
        assert_eq!("crop".parse::<PoolingMode>().unwrap(), PoolingMode::Crop);
        assert_eq!(
            "roi_pooling".parse::<PoolingMode>().unwrap(),
            PoolingMode::RoiPooling
        );
        assert!("max".parse::<PoolingMode>().is_err());
        assert_eq!("same".parse::<Padding>().unwrap(), Padding::Same);
        assert_eq!("VALID".parse::<Padding>().unwrap(), Padding::Valid);
        assert_eq!(Padding::Same.to_string(), "SAME");
    }

    #[test]
    fn test_pooled_len() {
        assert_eq!(Padding::Valid.pooled_len(4), 2);
        assert_eq!(Padding::Valid.pooled_len(5), 2);
        assert_eq!(Padding::Same.pooled_len(4), 2);
        assert_eq!(Padding::Same.pooled_len(5), 3);
    }
}
