use crate::core::projection::SceneCrs;
use crate::core::resample::{build_grid, decimate, Kernel};
use crate::io::raster::AssetFetcher;
use crate::types::{
    AlignedBand, AlignedScene, BandId, GeoBoundingBox, GeoTransform, GreenError, GreenResult,
    ProcessingWarning, SceneCandidate, ValueKind,
};
use std::collections::HashMap;

/// Output grid parameters for band alignment
#[derive(Debug, Clone)]
pub struct AlignmentParams {
    pub target_width: usize,
    pub target_height: usize,
    /// Intermediate grid is this many times finer than the target
    pub precision_factor: usize,
    /// Concurrent band fetches per scene
    pub band_workers: usize,
}

impl Default for AlignmentParams {
    fn default() -> Self {
        Self {
            target_width: 1024,
            target_height: 1024,
            precision_factor: 2,
            band_workers: 4,
        }
    }
}

impl AlignmentParams {
    /// Supersampled grid (width, height) bands are reprojected onto before decimation
    pub fn intermediate_size(&self) -> (usize, usize) {
        let factor = self.precision_factor.max(1);
        (self.target_width * factor, self.target_height * factor)
    }
}

/// Bands of one scene plus the per-band failures that were tolerated
#[derive(Debug, Clone)]
pub struct SceneAlignment {
    pub scene: AlignedScene,
    pub warnings: Vec<ProcessingWarning>,
}

impl SceneAlignment {
    pub fn continuous_band_count(&self) -> usize {
        BandId::REQUIRED
            .iter()
            .filter(|b| self.scene.bands.contains_key(b))
            .count()
    }
}

/// Reprojects scene bands onto the output grid of a bounding box
pub struct BandAligner<'a> {
    fetcher: &'a dyn AssetFetcher,
    params: AlignmentParams,
}

impl<'a> BandAligner<'a> {
    pub fn new(fetcher: &'a dyn AssetFetcher, params: AlignmentParams) -> Self {
        Self { fetcher, params }
    }

    pub fn params(&self) -> &AlignmentParams {
        &self.params
    }

    /// Transform of the output grid; depends only on the bbox and target size
    pub fn output_transform(&self, bbox: &GeoBoundingBox) -> GeoTransform {
        GeoTransform::from_bounds(bbox, self.params.target_width, self.params.target_height)
    }

    /// Align one band: fetch, reproject onto the supersampled grid, decimate to target
    pub fn align_band(
        &self,
        scene: &SceneCandidate,
        band: BandId,
        bbox: &GeoBoundingBox,
    ) -> GreenResult<AlignedBand> {
        let locator = scene.asset(band).ok_or_else(|| GreenError::BandDownload {
            band,
            reason: format!("scene {} has no {} asset", scene.id, band),
        })?;

        let source = self
            .fetcher
            .fetch(locator)
            .map_err(|e| GreenError::BandDownload { band, reason: e.to_string() })?;

        let crs = SceneCrs::from_epsg(source.epsg()).ok_or_else(|| GreenError::Reprojection {
            band,
            reason: format!("unsupported source CRS EPSG:{}", source.epsg()),
        })?;

        let factor = self.params.precision_factor.max(1);
        let (inter_w, inter_h) = self.params.intermediate_size();
        let inter_transform = GeoTransform::from_bounds(bbox, inter_w, inter_h);

        // Source pixels finer than twice the intermediate grid add nothing
        let source_bounds = crs.project_bbox(bbox);
        let window = source
            .read_window(&source_bounds, 2 * inter_w.max(inter_h), band.kind())
            .map_err(|e| GreenError::BandDownload { band, reason: e.to_string() })?;

        log::debug!(
            "{} {}: window {:?} from EPSG:{}, intermediate {}x{}",
            scene.id,
            band,
            window.data.dim(),
            crs.epsg(),
            inter_w,
            inter_h
        );

        let (kernel, decimation) = match band.kind() {
            ValueKind::Categorical => (Kernel::Nearest, Kernel::Nearest),
            ValueKind::Continuous => (Kernel::Cubic, Kernel::Cubic),
        };

        let intermediate = build_grid(inter_h, inter_w, |i, j| {
            let (lon, lat) = inter_transform.pixel_center(i, j);
            let (x, y) = crs.forward(lon, lat);
            let (col, row) = window.transform.to_pixel(x, y);
            kernel.sample(&window.data, col - 0.5, row - 0.5)
        })
        .map_err(|e| GreenError::Reprojection { band, reason: e.to_string() })?;

        let data = decimate(&intermediate, factor, decimation)
            .map_err(|e| GreenError::Reprojection { band, reason: e.to_string() })?;

        let transform = self.output_transform(bbox);
        let aligned = AlignedBand {
            band,
            kind: band.kind(),
            data,
            transform,
        };
        verify_declared_bounds(&aligned, bbox)?;
        Ok(aligned)
    }

    /// Align every requested band of a scene, tolerating per-band failures
    pub fn align_scene(
        &self,
        scene: &SceneCandidate,
        bands: &[BandId],
        bbox: &GeoBoundingBox,
    ) -> GreenResult<SceneAlignment> {
        log::info!("Aligning {} bands of {} ({:.1}% cloud)", bands.len(), scene.id, scene.cloud_cover);
        let results = self.fetch_all(scene, bands, bbox)?;

        let mut aligned = HashMap::new();
        let mut warnings = Vec::new();
        for (band, result) in results {
            match result {
                Ok(b) => {
                    aligned.insert(band, b);
                }
                Err(e) => {
                    log::warn!("Band {} of {} unavailable: {}", band, scene.id, e);
                    warnings.push(ProcessingWarning::BandUnavailable {
                        scene_id: scene.id.clone(),
                        band,
                        reason: e.to_string(),
                    });
                }
            }
        }

        Ok(SceneAlignment {
            scene: AlignedScene {
                scene_id: scene.id.clone(),
                cloud_cover: scene.cloud_cover,
                transform: self.output_transform(bbox),
                bands: aligned,
            },
            warnings,
        })
    }

    #[cfg(feature = "parallel")]
    fn fetch_all(
        &self,
        scene: &SceneCandidate,
        bands: &[BandId],
        bbox: &GeoBoundingBox,
    ) -> GreenResult<Vec<(BandId, GreenResult<AlignedBand>)>> {
        use rayon::prelude::*;

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.params.band_workers.max(1))
            .build()
            .map_err(|e| GreenError::Processing(format!("Failed to build band pool: {}", e)))?;

        Ok(pool.install(|| {
            bands
                .par_iter()
                .map(|&band| (band, self.align_band(scene, band, bbox)))
                .collect()
        }))
    }

    #[cfg(not(feature = "parallel"))]
    fn fetch_all(
        &self,
        scene: &SceneCandidate,
        bands: &[BandId],
        bbox: &GeoBoundingBox,
    ) -> GreenResult<Vec<(BandId, GreenResult<AlignedBand>)>> {
        Ok(bands
            .iter()
            .map(|&band| (band, self.align_band(scene, band, bbox)))
            .collect())
    }
}

/// The grid must declare exactly the resolved bbox, not a reprojected approximation
fn verify_declared_bounds(band: &AlignedBand, bbox: &GeoBoundingBox) -> GreenResult<()> {
    let declared = band.bounds();
    let drift = [
        (declared.west - bbox.west).abs(),
        (declared.south - bbox.south).abs(),
        (declared.east - bbox.east).abs(),
        (declared.north - bbox.north).abs(),
    ]
    .iter()
    .cloned()
    .fold(0.0, f64::max);

    if drift > 1e-9 {
        return Err(GreenError::Reprojection {
            band: band.band,
            reason: format!("declared bounds drift by {:.3e} degrees", drift),
        });
    }
    Ok(())
}
