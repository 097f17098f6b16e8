use crate::config::{ProcessingConfig, ProcessingFlags};
use crate::core::pipeline::VegetationAnalysis;
use crate::io::render::{self, Stretch};
use crate::types::{BandId, GeoBoundingBox, GeoTransform, GreenError, GreenResult};
use chrono::{DateTime, Utc};
use gdal::raster::Buffer;
use gdal::spatial_ref::SpatialRef;
use gdal::DriverManager;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const ANALYSIS_DIR: &str = "vegetation_analysis";
pub const SUMMARY_FILE: &str = "vegetation_analysis_summary.json";
pub const NDVI_RASTER_FILE: &str = "ndvi_data.tif";
pub const OVERLAY_FILE: &str = "vegetation_highlighted.png";
pub const NDVI_IMAGE_FILE: &str = "ndvi_visualization.png";
pub const FALSE_COLOR_FILE: &str = "false_color_base.png";
pub const NATURAL_COLOR_FILE: &str = "natural_color_base.png";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CityInfo {
    pub name: String,
    pub center_lat: f64,
    pub center_lon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryConfig {
    pub cloud_threshold: f64,
    pub ndvi_threshold: f64,
    pub date_range: String,
    pub flags: ProcessingFlags,
}

/// Record consumed by reporting and map collaborators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VegetationSummary {
    pub vegetation_percentage: f64,
    pub high_density_percentage: f64,
    pub medium_density_percentage: f64,
    pub low_density_percentage: f64,
    pub subtle_percentage: f64,
    pub ndvi_mean: f64,
    pub cloud_excluded_percentage: f64,
    pub total_pixels: usize,
    pub vegetation_pixels: usize,
    /// Always the resolved city bbox
    pub geographic_bounds: GeoBoundingBox,
    /// Valid red/NIR pixels inside the polygon after gap filling
    pub data_coverage_percentage: f64,
    /// Share of the grid inside the polygon
    pub polygon_coverage_percentage: f64,
    pub ndvi_threshold: f64,
    pub enhanced_threshold: f64,
    pub images_found: usize,
    pub images_processed: usize,
    pub primary_scene: String,
    pub backup_scenes_used: Vec<String>,
    pub city_info: CityInfo,
    pub processing_config: SummaryConfig,
    pub output_files: Vec<String>,
    pub warnings: Vec<String>,
    pub processed_at: DateTime<Utc>,
}

impl VegetationSummary {
    pub fn from_analysis(analysis: &VegetationAnalysis, config: &ProcessingConfig) -> Self {
        let r = &analysis.classification.result;
        Self {
            vegetation_percentage: r.vegetation_percentage,
            high_density_percentage: r.high_density_percentage,
            medium_density_percentage: r.medium_density_percentage,
            low_density_percentage: r.low_density_percentage,
            subtle_percentage: r.subtle_percentage,
            ndvi_mean: r.ndvi_mean,
            cloud_excluded_percentage: r.cloud_excluded_percentage,
            total_pixels: r.total_pixels,
            vegetation_pixels: r.vegetation_pixels,
            geographic_bounds: analysis.city.bbox,
            data_coverage_percentage: analysis.data_coverage_percentage,
            polygon_coverage_percentage: analysis.polygon_coverage_percentage,
            ndvi_threshold: config.ndvi_threshold,
            enhanced_threshold: r.enhanced_threshold,
            images_found: analysis.images_found,
            images_processed: 1 + analysis.gap_fill.backups_used.len(),
            primary_scene: analysis.scene.scene_id.clone(),
            backup_scenes_used: analysis.gap_fill.backups_used.clone(),
            city_info: CityInfo {
                name: analysis.city.name.clone(),
                center_lat: analysis.city.center_lat,
                center_lon: analysis.city.center_lon,
            },
            processing_config: SummaryConfig {
                cloud_threshold: config.cloud_coverage_threshold,
                ndvi_threshold: config.ndvi_threshold,
                date_range: analysis.dates.label(),
                flags: config.flags,
            },
            output_files: Vec::new(),
            warnings: analysis.warnings.iter().map(|w| w.to_string()).collect(),
            processed_at: Utc::now(),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> GreenResult<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }
}

/// Change between two summaries of the same city
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PeriodComparison {
    pub baseline_vegetation_percentage: f64,
    pub compare_vegetation_percentage: f64,
    /// Percentage points
    pub vegetation_change: f64,
    /// Relative change; absent when the baseline has no vegetation
    pub vegetation_change_percent: Option<f64>,
    pub ndvi_mean_change: f64,
    pub ndvi_change_percent: Option<f64>,
    /// Both runs used the same polygon pixel count
    pub same_denominator: bool,
}

fn relative_change(from: f64, to: f64) -> Option<f64> {
    if from.abs() < f64::EPSILON {
        None
    } else {
        Some((to - from) / from.abs() * 100.0)
    }
}

/// Year-over-year (or any two period) comparison of vegetation statistics
pub fn compare_periods(baseline: &VegetationSummary, compare: &VegetationSummary) -> PeriodComparison {
    let same_denominator = baseline.total_pixels == compare.total_pixels;
    if !same_denominator {
        log::warn!(
            "Comparing summaries with different polygon pixel counts ({} vs {})",
            baseline.total_pixels,
            compare.total_pixels
        );
    }
    PeriodComparison {
        baseline_vegetation_percentage: baseline.vegetation_percentage,
        compare_vegetation_percentage: compare.vegetation_percentage,
        vegetation_change: compare.vegetation_percentage - baseline.vegetation_percentage,
        vegetation_change_percent: relative_change(baseline.vegetation_percentage, compare.vegetation_percentage),
        ndvi_mean_change: compare.ndvi_mean - baseline.ndvi_mean,
        ndvi_change_percent: relative_change(baseline.ndvi_mean, compare.ndvi_mean),
        same_denominator,
    }
}

/// Writes rasters, images and the summary of one analysis
#[derive(Debug, Clone)]
pub struct ResultEmitter {
    output_dir: PathBuf,
}

impl ResultEmitter {
    pub fn new<P: AsRef<Path>>(output_dir: P) -> Self {
        Self { output_dir: output_dir.as_ref().to_path_buf() }
    }

    pub fn analysis_dir(&self) -> PathBuf {
        self.output_dir.join(ANALYSIS_DIR)
    }

    /// Write every artifact and return the summary that was saved
    pub fn emit(&self, analysis: &VegetationAnalysis, config: &ProcessingConfig) -> GreenResult<VegetationSummary> {
        let dir = self.analysis_dir();
        std::fs::create_dir_all(&dir)?;
        log::info!("Writing results to {}", dir.display());

        let mut summary = VegetationSummary::from_analysis(analysis, config);
        let mut written = Vec::new();

        let transform = GeoTransform::from_bounds(
            &analysis.city.bbox,
            analysis.classification.ndvi.dim().1,
            analysis.classification.ndvi.dim().0,
        );
        save_geotiff(&analysis.classification.ndvi, &transform, dir.join(NDVI_RASTER_FILE))?;
        written.push(NDVI_RASTER_FILE);

        render::tier_overlay(&analysis.classification.tiers, &analysis.mask).save(dir.join(OVERLAY_FILE))?;
        written.push(OVERLAY_FILE);

        render::ndvi_visualization(&analysis.classification.ndvi).save(dir.join(NDVI_IMAGE_FILE))?;
        written.push(NDVI_IMAGE_FILE);

        let band = |id: BandId| analysis.scene.band(id);
        if let (Some(nir), Some(red), Some(green)) = (band(BandId::Nir), band(BandId::Red), band(BandId::Green)) {
            render::composite([nir, red, green], Stretch::false_color()).save(dir.join(FALSE_COLOR_FILE))?;
            written.push(FALSE_COLOR_FILE);
        }
        if let (Some(red), Some(green), Some(blue)) = (band(BandId::Red), band(BandId::Green), band(BandId::Blue)) {
            render::composite([red, green, blue], Stretch::natural_color()).save(dir.join(NATURAL_COLOR_FILE))?;
            written.push(NATURAL_COLOR_FILE);
        }

        summary.output_files = written
            .iter()
            .map(|name| format!("{}/{}", ANALYSIS_DIR, name))
            .collect();

        let summary_path = dir.join(SUMMARY_FILE);
        std::fs::write(&summary_path, serde_json::to_string_pretty(&summary)?)?;
        log::info!("Summary saved: {}", summary_path.display());
        Ok(summary)
    }
}

/// Float32 single-band GeoTIFF in EPSG:4326 with NaN no-data
pub fn save_geotiff<P: AsRef<Path>>(grid: &Array2<f32>, transform: &GeoTransform, path: P) -> GreenResult<()> {
    log::debug!("Saving GeoTIFF: {}", path.as_ref().display());
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let (height, width) = grid.dim();
    if width == 0 || height == 0 {
        return Err(GreenError::InvalidInput("cannot write an empty raster".into()));
    }

    let mut dataset = driver.create_with_band_type::<f32, _>(path.as_ref(), width as isize, height as isize, 1)?;
    dataset.set_geo_transform(&transform.to_gdal())?;
    dataset.set_spatial_ref(&SpatialRef::from_epsg(4326)?)?;

    let mut rasterband = dataset.rasterband(1)?;
    let data: Vec<f32> = grid.iter().cloned().collect();
    rasterband.write((0, 0), (width, height), &Buffer::new((width, height), data))?;
    rasterband.set_no_data_value(Some(f64::NAN))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary(vegetation: f64, ndvi: f64, total: usize) -> VegetationSummary {
        VegetationSummary {
            vegetation_percentage: vegetation,
            high_density_percentage: 0.0,
            medium_density_percentage: 0.0,
            low_density_percentage: vegetation,
            subtle_percentage: 0.0,
            ndvi_mean: ndvi,
            cloud_excluded_percentage: 0.0,
            total_pixels: total,
            vegetation_pixels: (vegetation / 100.0 * total as f64) as usize,
            geographic_bounds: GeoBoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap(),
            data_coverage_percentage: 100.0,
            polygon_coverage_percentage: 80.0,
            ndvi_threshold: 0.3,
            enhanced_threshold: 0.25,
            images_found: 3,
            images_processed: 1,
            primary_scene: "S2".into(),
            backup_scenes_used: vec![],
            city_info: CityInfo { name: "Test".into(), center_lat: 0.5, center_lon: 0.5 },
            processing_config: SummaryConfig {
                cloud_threshold: 20.0,
                ndvi_threshold: 0.3,
                date_range: "2024-06-01 to 2024-06-30".into(),
                flags: ProcessingFlags::default(),
            },
            output_files: vec![],
            warnings: vec![],
            processed_at: Utc::now(),
        }
    }

    #[test]
    fn test_compare_periods() {
        let comparison = compare_periods(&summary(40.0, 0.30, 1000), &summary(30.0, 0.33, 1000));
        assert!((comparison.vegetation_change + 10.0).abs() < 1e-9);
        assert!((comparison.vegetation_change_percent.unwrap() + 25.0).abs() < 1e-9);
        assert!((comparison.ndvi_change_percent.unwrap() - 10.0).abs() < 1e-6);
        assert!(comparison.same_denominator);
    }

    #[test]
    fn test_compare_from_zero_baseline() {
        let comparison = compare_periods(&summary(0.0, 0.0, 1000), &summary(5.0, 0.1, 900));
        assert!(comparison.vegetation_change_percent.is_none());
        assert!(!comparison.same_denominator);
    }

    #[test]
    fn test_summary_json_field_names() {
        let json = serde_json::to_value(summary(12.5, 0.2, 400)).unwrap();
        for key in [
            "vegetation_percentage",
            "high_density_percentage",
            "medium_density_percentage",
            "low_density_percentage",
            "ndvi_mean",
            "cloud_excluded_percentage",
            "total_pixels",
            "vegetation_pixels",
        ] {
            assert!(json.get(key).is_some(), "missing {}", key);
        }
        assert_eq!(json["geographic_bounds"]["east"], 1.0);
        assert_eq!(json["processing_config"]["flags"]["useSclMasking"], true);
    }
}
