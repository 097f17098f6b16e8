use crate::types::{
    AlignedScene, BandGrid, BandId, CityMask, ClassificationResult, GreenError, GreenResult,
    NdviGrid,
};
use ndarray::{Array2, Zip};

/// Scene classification codes whose pixels are dropped from the statistics:
/// no data, saturated/defective, cloud shadow, water, cloud (medium, high),
/// thin cirrus and snow/ice
pub const SCL_EXCLUDED: [u8; 8] = [0, 1, 3, 6, 8, 9, 10, 11];

const NDVI_EPSILON: f32 = 1e-10;

/// NDVI lower bounds of the density tiers
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DensityThresholds {
    pub high: f64,
    pub medium: f64,
    pub subtle: f64,
}

impl Default for DensityThresholds {
    fn default() -> Self {
        Self {
            high: 0.55,
            medium: 0.35,
            subtle: 0.15,
        }
    }
}

/// Per-pixel density class
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum DensityTier {
    None = 0,
    Subtle = 1,
    Low = 2,
    Medium = 3,
    High = 4,
}

pub type TierGrid = Array2<DensityTier>;

/// NDVI grid, tier grid and the statistics derived from them
#[derive(Debug, Clone)]
pub struct Classification {
    pub ndvi: NdviGrid,
    pub tiers: TierGrid,
    pub result: ClassificationResult,
}

pub fn is_excluded_scl(code: f32) -> bool {
    code.is_finite() && code >= 0.0 && SCL_EXCLUDED.contains(&(code.round() as u8))
}

/// `(nir - red) / (nir + red + eps)` clipped to [-1, 1]; NaN where either input is
pub fn compute_ndvi(red: &BandGrid, nir: &BandGrid) -> NdviGrid {
    Zip::from(red).and(nir).map_collect(|&r, &n| {
        if !r.is_finite() || !n.is_finite() {
            return f32::NAN;
        }
        ((n - r) / (n + r + NDVI_EPSILON)).clamp(-1.0, 1.0)
    })
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        count as f64 / total as f64 * 100.0
    }
}

/// Buckets in-polygon pixels into vegetation density tiers
#[derive(Debug, Clone)]
pub struct VegetationClassifier {
    ndvi_threshold: f64,
    use_scl_masking: bool,
    thresholds: DensityThresholds,
}

impl VegetationClassifier {
    pub fn new(ndvi_threshold: f64, use_scl_masking: bool) -> Self {
        Self {
            ndvi_threshold,
            use_scl_masking,
            thresholds: DensityThresholds::default(),
        }
    }

    /// `max(0.2, threshold - 0.05)`
    pub fn enhanced_threshold(&self) -> f64 {
        (self.ndvi_threshold - 0.05).max(0.2)
    }

    /// Tier of one NDVI value; tier bounds never drop below the enhanced threshold
    pub fn tier(&self, ndvi: f32) -> DensityTier {
        if !ndvi.is_finite() {
            return DensityTier::None;
        }
        let v = ndvi as f64;
        let enhanced = self.enhanced_threshold();
        if v >= self.thresholds.high.max(enhanced) {
            DensityTier::High
        } else if v >= self.thresholds.medium.max(enhanced) {
            DensityTier::Medium
        } else if v >= enhanced {
            DensityTier::Low
        } else if v >= self.thresholds.subtle {
            DensityTier::Subtle
        } else {
            DensityTier::None
        }
    }

    pub fn classify(&self, scene: &AlignedScene, mask: &CityMask) -> GreenResult<Classification> {
        let (red, nir) = match (scene.band(BandId::Red), scene.band(BandId::Nir)) {
            (Some(red), Some(nir)) => (red, nir),
            _ => {
                return Err(GreenError::Processing(format!(
                    "scene {} lacks red or NIR for NDVI",
                    scene.scene_id
                )))
            }
        };
        if red.dim() != mask.dim() || nir.dim() != mask.dim() {
            return Err(GreenError::Processing(format!(
                "band grid {:?} does not match mask {:?}",
                red.dim(),
                mask.dim()
            )));
        }

        let mut ndvi = compute_ndvi(red, nir);

        let mut cloud_excluded_pixels = 0;
        match scene.band(BandId::Scl) {
            Some(scl) if self.use_scl_masking && scl.dim() == mask.dim() => {
                Zip::from(&mut ndvi).and(scl).and(mask).for_each(|v, &code, &inside| {
                    if inside && is_excluded_scl(code) {
                        *v = f32::NAN;
                        cloud_excluded_pixels += 1;
                    }
                });
            }
            Some(_) if self.use_scl_masking => {
                log::warn!("Classification layer does not match the grid; SCL masking skipped")
            }
            None if self.use_scl_masking => {
                log::debug!("No classification layer; SCL masking skipped")
            }
            _ => {}
        }

        Zip::from(&mut ndvi).and(mask).for_each(|v, &inside| {
            if !inside {
                *v = f32::NAN;
            }
        });

        let tiers = ndvi.mapv(|v| self.tier(v));
        let total_pixels = mask.iter().filter(|&&m| m).count();
        let enhanced = self.enhanced_threshold();

        let mut counts = [0usize; 5];
        for tier in tiers.iter() {
            counts[*tier as usize] += 1;
        }
        let vegetation_pixels = ndvi.iter().filter(|&&v| v.is_finite() && v as f64 >= enhanced).count();

        let (sum, valid) = ndvi
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0f64, 0usize), |(s, n), &v| (s + v as f64, n + 1));
        let ndvi_mean = if valid > 0 { sum / valid as f64 } else { 0.0 };

        let result = ClassificationResult {
            vegetation_percentage: percentage(vegetation_pixels, total_pixels),
            high_density_percentage: percentage(counts[DensityTier::High as usize], total_pixels),
            medium_density_percentage: percentage(counts[DensityTier::Medium as usize], total_pixels),
            low_density_percentage: percentage(counts[DensityTier::Low as usize], total_pixels),
            subtle_percentage: percentage(counts[DensityTier::Subtle as usize], total_pixels),
            ndvi_mean,
            cloud_excluded_percentage: percentage(cloud_excluded_pixels, total_pixels),
            total_pixels,
            vegetation_pixels,
            high_pixels: counts[DensityTier::High as usize],
            medium_pixels: counts[DensityTier::Medium as usize],
            low_pixels: counts[DensityTier::Low as usize],
            subtle_pixels: counts[DensityTier::Subtle as usize],
            cloud_excluded_pixels,
            enhanced_threshold: enhanced,
        };

        log::info!(
            "Vegetation {:.2}% (high {:.2}%, medium {:.2}%, low {:.2}%), mean NDVI {:.3}, {:.2}% excluded, {} polygon pixels",
            result.vegetation_percentage,
            result.high_density_percentage,
            result.medium_density_percentage,
            result.low_density_percentage,
            result.ndvi_mean,
            result.cloud_excluded_percentage,
            result.total_pixels
        );

        Ok(Classification { ndvi, tiers, result })
    }
}
