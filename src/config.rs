use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;

use crate::matcher::{MatchParams, DEFAULT_AREA_CHANGE_THRESHOLD, DEFAULT_IOU_THRESHOLD};

const DEFAULT_DB_PATH: &str = "change_history.db";
const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.5;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ChangeConfigFile {
    db_path: Option<String>,
    matching: Option<MatchingConfigFile>,
    detector: Option<DetectorConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct MatchingConfigFile {
    iou_threshold: Option<f64>,
    area_change_threshold: Option<f64>,
    max_center_distance: Option<f64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    confidence_threshold: Option<f32>,
}

/// Runtime settings: TOML file at `$CHANGE_CONFIG`, then `CHANGE_*` env overrides.
#[derive(Debug, Clone, PartialEq)]
pub struct ChangeConfig {
    pub db_path: String,
    pub matching: MatchParams,
    /// Minimum detector confidence for a detection to take part in matching.
    pub confidence_threshold: f32,
}

impl Default for ChangeConfig {
    fn default() -> Self {
        Self {
            db_path: DEFAULT_DB_PATH.to_string(),
            matching: MatchParams::default(),
            confidence_threshold: DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

impl ChangeConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("CHANGE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: ChangeConfigFile) -> Self {
        let matching = file.matching.unwrap_or_default();
        Self {
            db_path: file.db_path.unwrap_or_else(|| DEFAULT_DB_PATH.to_string()),
            matching: MatchParams {
                iou_threshold: matching.iou_threshold.unwrap_or(DEFAULT_IOU_THRESHOLD),
                area_change_threshold: matching
                    .area_change_threshold
                    .unwrap_or(DEFAULT_AREA_CHANGE_THRESHOLD),
                max_center_distance: matching.max_center_distance,
            },
            confidence_threshold: file
                .detector
                .and_then(|d| d.confidence_threshold)
                .unwrap_or(DEFAULT_CONFIDENCE_THRESHOLD),
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(path) = std::env::var("CHANGE_DB_PATH") {
            if !path.trim().is_empty() {
                self.db_path = path;
            }
        }
        if let Some(v) = env_f64("CHANGE_IOU_THRESHOLD")? {
            self.matching.iou_threshold = v;
        }
        if let Some(v) = env_f64("CHANGE_AREA_THRESHOLD")? {
            self.matching.area_change_threshold = v;
        }
        if let Some(v) = env_f64("CHANGE_MAX_CENTER_DISTANCE")? {
            self.matching.max_center_distance = Some(v);
        }
        if let Some(v) = env_f64("CHANGE_CONFIDENCE_THRESHOLD")? {
            self.confidence_threshold = v as f32;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.db_path.trim().is_empty() {
            return Err(anyhow!("db_path must not be empty"));
        }
        self.matching.validate()?;
        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return Err(anyhow!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<ChangeConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_f64(key: &str) -> Result<Option<f64>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a number, got '{}'", key, value)),
        _ => Ok(None),
    }
}
