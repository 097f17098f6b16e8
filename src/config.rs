use crate::types::{GreenError, GreenResult};
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const EARTH_SEARCH_URL: &str = "https://earth-search.aws.element84.com/v1";
pub const SENTINEL2_L2A: &str = "sentinel-2-l2a";

/// Versioned behaviour switches for a processing run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingFlags {
    /// Null out NDVI where the scene classification marks cloud, shadow, snow or water
    pub use_scl_masking: bool,
    /// Restrict statistics to pixels inside the city polygon
    pub use_polygon_masking: bool,
    /// Fill missing pixels from complete-coverage backup scenes
    pub use_gap_filling: bool,
}

impl Default for ProcessingFlags {
    fn default() -> Self {
        Self {
            use_scl_masking: true,
            use_polygon_masking: true,
            use_gap_filling: true,
        }
    }
}

impl ProcessingFlags {
    /// First-generation behaviour: whole-bbox statistics, no quality mask, no gap filling
    pub fn legacy() -> Self {
        Self {
            use_scl_masking: false,
            use_polygon_masking: false,
            use_gap_filling: false,
        }
    }
}

/// Parameters for one vegetation processing run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ProcessingConfig {
    /// Initial scene cloud cover ceiling (percent)
    pub cloud_coverage_threshold: f64,
    /// Configured NDVI vegetation threshold
    pub ndvi_threshold: f64,
    pub collection: String,
    pub catalog_url: String,
    pub target_width: usize,
    pub target_height: usize,
    /// Supersampling factor of the intermediate alignment grid
    pub precision_factor: usize,
    /// Candidates scored per run
    pub max_candidates: usize,
    /// Valid-data coverage (percent of polygon) below which gap filling starts
    pub completeness_threshold: f64,
    pub asset_timeout_secs: u64,
    /// Concurrent band downloads per scene
    pub band_workers: usize,
    /// Half-width of the square used when only a city centroid is known
    pub fallback_buffer_degrees: f64,
    pub flags: ProcessingFlags,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            cloud_coverage_threshold: 20.0,
            ndvi_threshold: 0.3,
            collection: SENTINEL2_L2A.to_string(),
            catalog_url: EARTH_SEARCH_URL.to_string(),
            target_width: 1024,
            target_height: 1024,
            precision_factor: 2,
            max_candidates: 20,
            completeness_threshold: 95.0,
            asset_timeout_secs: 60,
            band_workers: 4,
            fallback_buffer_degrees: 0.05,
            flags: ProcessingFlags::default(),
        }
    }
}

impl ProcessingConfig {
    /// Load a config from a JSON job file; missing fields keep their defaults
    pub fn from_file<P: AsRef<Path>>(path: P) -> GreenResult<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: ProcessingConfig = serde_json::from_str(&text)?;
        config.validate()?;
        log::debug!("Loaded processing config from {}", path.as_ref().display());
        Ok(config)
    }

    pub fn validate(&self) -> GreenResult<()> {
        if self.target_width == 0 || self.target_height == 0 {
            return Err(GreenError::InvalidInput(format!(
                "target grid must be non-empty, got {}x{}",
                self.target_width, self.target_height
            )));
        }
        if self.precision_factor == 0 {
            return Err(GreenError::InvalidInput("precision factor must be at least 1".into()));
        }
        if !(0.0..=100.0).contains(&self.cloud_coverage_threshold) {
            return Err(GreenError::InvalidInput(format!(
                "cloud coverage threshold {} outside 0-100",
                self.cloud_coverage_threshold
            )));
        }
        if !(-1.0..=1.0).contains(&self.ndvi_threshold) {
            return Err(GreenError::InvalidInput(format!(
                "NDVI threshold {} outside [-1, 1]",
                self.ndvi_threshold
            )));
        }
        if !(0.0..=100.0).contains(&self.completeness_threshold) {
            return Err(GreenError::InvalidInput(format!(
                "completeness threshold {} outside 0-100",
                self.completeness_threshold
            )));
        }
        if self.max_candidates == 0 || self.band_workers == 0 {
            return Err(GreenError::InvalidInput(
                "max candidates and band workers must be positive".into(),
            ));
        }
        if !(self.fallback_buffer_degrees > 0.0) {
            return Err(GreenError::InvalidInput("fallback buffer must be positive".into()));
        }
        Ok(())
    }
}
