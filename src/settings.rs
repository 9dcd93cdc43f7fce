//! Background settings

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::toolbar::IconScale;

const MIN_REFRESH_INTERVAL_MS: u64 = 100;

/// Pre-baked icon assets used when pixel icons are rejected
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StaticIconPaths {
    pub default: BTreeMap<u32, String>,
    pub in_progress: String,
    pub finished: String,
}

impl Default for StaticIconPaths {
    fn default() -> Self {
        Self {
            default: BTreeMap::from([
                (16, "/icons/icon-16x16.png".to_string()),
                (48, "/icons/icon-48x48.png".to_string()),
                (128, "/icons/icon-128x128.png".to_string()),
            ]),
            in_progress: "/icons/iconyellow.png".to_string(),
            finished: "/icons/icongreen.png".to_string(),
        }
    }
}

/// Settings structure, camelCase on disk to match the extension's JSON
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackgroundSettings {
    pub refresh_interval_ms: u64,
    pub device_pixel_ratio: f64,
    pub static_icons: StaticIconPaths,
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            refresh_interval_ms: 1000,
            device_pixel_ratio: 1.0,
            static_icons: StaticIconPaths::default(),
        }
    }
}

impl BackgroundSettings {
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings from {}", path.display()))?;
        let settings: Self =
            serde_json::from_str(&contents).context("Failed to parse settings JSON")?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.refresh_interval_ms < MIN_REFRESH_INTERVAL_MS {
            bail!(
                "refreshIntervalMs must be at least {} (got {})",
                MIN_REFRESH_INTERVAL_MS,
                self.refresh_interval_ms
            );
        }
        if !self.device_pixel_ratio.is_finite() || self.device_pixel_ratio <= 0.0 {
            bail!("devicePixelRatio must be positive (got {})", self.device_pixel_ratio);
        }
        Ok(())
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_millis(self.refresh_interval_ms)
    }

    pub fn icon_scale(&self) -> IconScale {
        IconScale::for_device_pixel_ratio(self.device_pixel_ratio)
    }
}
