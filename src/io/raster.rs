use crate::config::ProcessingConfig;
use crate::types::{BandGrid, GeoTransform, GreenError, GreenResult, ProjectedBounds, ValueKind};
use gdal::raster::ResampleAlg;
use gdal::Dataset;
use ndarray::{s, Array2, ArrayView2};
use std::collections::{BTreeMap, HashMap};
use std::path::Path;
use std::sync::Arc;

/// Extra source pixels read around a window so resampling kernels have support
pub const WINDOW_MARGIN: usize = 3;

/// Pixels read from a source raster together with their native georeferencing
#[derive(Debug, Clone)]
pub struct SourceWindow {
    pub data: BandGrid,
    pub transform: GeoTransform,
}

/// Single-band raster in its native CRS
pub trait RasterSource {
    fn epsg(&self) -> u32;

    fn transform(&self) -> GeoTransform;

    /// (width, height) in pixels
    fn size(&self) -> (usize, usize);

    fn native_bounds(&self) -> ProjectedBounds {
        let (width, height) = self.size();
        self.transform().projected_bounds(width, height)
    }

    /// Read the pixels covering `bounds`, reduced so neither side exceeds `max_size`
    ///
    /// Reduced continuous reads average the source pixels under each window
    /// cell; categorical reads keep a source code. Each cell's value belongs
    /// to the center the returned transform declares for it.
    fn read_window(
        &self,
        bounds: &ProjectedBounds,
        max_size: usize,
        kind: ValueKind,
    ) -> GreenResult<SourceWindow>;
}

/// Opens band assets by locator
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, locator: &str) -> GreenResult<Box<dyn RasterSource>>;
}

/// Pixel window `(x_off, y_off, width, height)` covering `bounds`, clamped to the raster
pub fn pixel_window(
    transform: &GeoTransform,
    size: (usize, usize),
    bounds: &ProjectedBounds,
    margin: usize,
) -> Option<(usize, usize, usize, usize)> {
    let (width, height) = size;
    let (c0, r0) = transform.to_pixel(bounds.min_x, bounds.max_y);
    let (c1, r1) = transform.to_pixel(bounds.max_x, bounds.min_y);

    let col_min = c0.min(c1).floor() - margin as f64;
    let col_max = c0.max(c1).ceil() + margin as f64;
    let row_min = r0.min(r1).floor() - margin as f64;
    let row_max = r0.max(r1).ceil() + margin as f64;

    let x0 = col_min.max(0.0) as usize;
    let y0 = row_min.max(0.0) as usize;
    let x1 = (col_max.max(0.0) as usize).min(width);
    let y1 = (row_max.max(0.0) as usize).min(height);
    if x1 <= x0 || y1 <= y0 {
        return None;
    }
    Some((x0, y0, x1 - x0, y1 - y0))
}

/// Output size for a window read, keeping the aspect ratio under `max_size`
fn buffer_size(window_w: usize, window_h: usize, max_size: usize) -> (usize, usize) {
    let longest = window_w.max(window_h);
    if max_size == 0 || longest <= max_size {
        return (window_w, window_h);
    }
    let scale = max_size as f64 / longest as f64;
    (
        ((window_w as f64 * scale).round() as usize).max(1),
        ((window_h as f64 * scale).round() as usize).max(1),
    )
}

fn window_transform(
    native: &GeoTransform,
    window: (usize, usize, usize, usize),
    buffer: (usize, usize),
) -> GeoTransform {
    let (x0, y0, w, h) = window;
    let (top_left_x, top_left_y) = native.apply(x0 as f64, y0 as f64);
    GeoTransform {
        top_left_x,
        pixel_width: native.pixel_width * w as f64 / buffer.0 as f64,
        rotation_x: 0.0,
        top_left_y,
        rotation_y: 0.0,
        pixel_height: native.pixel_height * h as f64 / buffer.1 as f64,
    }
}

fn outside_error(bounds: &ProjectedBounds) -> GreenError {
    GreenError::Processing(format!(
        "requested window ({:.1}, {:.1}) - ({:.1}, {:.1}) lies outside the raster",
        bounds.min_x, bounds.min_y, bounds.max_x, bounds.max_y
    ))
}

/// Raster opened through GDAL, local or over `/vsicurl/`
pub struct GdalRaster {
    dataset: Dataset,
    epsg: u32,
    transform: GeoTransform,
    size: (usize, usize),
    no_data: Option<f64>,
}

impl GdalRaster {
    pub fn open<P: AsRef<Path>>(path: P) -> GreenResult<Self> {
        let dataset = Dataset::open(path.as_ref())?;
        let transform = GeoTransform::from_gdal(dataset.geo_transform()?);
        if transform.rotation_x != 0.0 || transform.rotation_y != 0.0 {
            return Err(GreenError::Processing(format!(
                "rotated rasters are not supported: {}",
                path.as_ref().display()
            )));
        }
        let epsg = dataset
            .spatial_ref()?
            .auth_code()
            .map_err(|e| GreenError::Processing(format!("raster has no EPSG code: {}", e)))?
            as u32;
        let size = dataset.raster_size();
        let no_data = dataset.rasterband(1)?.no_data_value();

        log::debug!(
            "Opened {} ({}x{}, EPSG:{})",
            path.as_ref().display(),
            size.0,
            size.1,
            epsg
        );
        Ok(Self { dataset, epsg, transform, size, no_data })
    }
}

impl RasterSource for GdalRaster {
    fn epsg(&self) -> u32 {
        self.epsg
    }

    fn transform(&self) -> GeoTransform {
        self.transform
    }

    fn size(&self) -> (usize, usize) {
        self.size
    }

    fn read_window(
        &self,
        bounds: &ProjectedBounds,
        max_size: usize,
        kind: ValueKind,
    ) -> GreenResult<SourceWindow> {
        let window = pixel_window(&self.transform, self.size, bounds, WINDOW_MARGIN)
            .ok_or_else(|| outside_error(bounds))?;
        let (x0, y0, w, h) = window;
        let (bw, bh) = buffer_size(w, h, max_size);
        let alg = match kind {
            ValueKind::Continuous => ResampleAlg::Average,
            ValueKind::Categorical => ResampleAlg::NearestNeighbour,
        };

        let rasterband = self.dataset.rasterband(1)?;
        let buffer =
            rasterband.read_as::<f32>((x0 as isize, y0 as isize), (w, h), (bw, bh), Some(alg))?;
        let mut data = Array2::from_shape_vec((bh, bw), buffer.data)
            .map_err(|e| GreenError::Processing(format!("Failed to reshape window: {}", e)))?;

        if let Some(no_data) = self.no_data {
            let no_data = no_data as f32;
            data.mapv_inplace(|v| if v == no_data { f32::NAN } else { v });
        }

        Ok(SourceWindow {
            data,
            transform: window_transform(&self.transform, window, (bw, bh)),
        })
    }
}

/// Fetches remote assets through GDAL's virtual curl filesystem
#[derive(Debug, Clone)]
pub struct GdalFetcher {
    timeout_secs: u64,
}

impl GdalFetcher {
    pub fn new(timeout_secs: u64) -> GreenResult<Self> {
        gdal::config::set_config_option("GDAL_HTTP_TIMEOUT", &timeout_secs.to_string())?;
        gdal::config::set_config_option("GDAL_DISABLE_READDIR_ON_OPEN", "EMPTY_DIR")?;
        gdal::config::set_config_option("CPL_VSIL_CURL_ALLOWED_EXTENSIONS", ".tif,.tiff,.jp2")?;
        Ok(Self { timeout_secs })
    }

    pub fn from_config(config: &ProcessingConfig) -> GreenResult<Self> {
        Self::new(config.asset_timeout_secs)
    }

    pub fn vsi_path(locator: &str) -> String {
        if locator.starts_with("http://") || locator.starts_with("https://") {
            format!("/vsicurl/{}", locator)
        } else {
            locator.to_string()
        }
    }
}

impl AssetFetcher for GdalFetcher {
    fn fetch(&self, locator: &str) -> GreenResult<Box<dyn RasterSource>> {
        log::debug!("Fetching {} (timeout {}s)", locator, self.timeout_secs);
        let raster = GdalRaster::open(Self::vsi_path(locator))?;
        Ok(Box::new(raster))
    }
}

/// Raster held in memory
#[derive(Debug, Clone)]
pub struct MemoryRaster {
    pub epsg: u32,
    pub transform: GeoTransform,
    pub data: Arc<BandGrid>,
}

impl MemoryRaster {
    pub fn new(epsg: u32, transform: GeoTransform, data: BandGrid) -> Self {
        Self { epsg, transform, data: Arc::new(data) }
    }
}

impl RasterSource for MemoryRaster {
    fn epsg(&self) -> u32 {
        self.epsg
    }

    fn transform(&self) -> GeoTransform {
        self.transform
    }

    fn size(&self) -> (usize, usize) {
        let (rows, cols) = self.data.dim();
        (cols, rows)
    }

    fn read_window(
        &self,
        bounds: &ProjectedBounds,
        max_size: usize,
        kind: ValueKind,
    ) -> GreenResult<SourceWindow> {
        let (width, height) = self.size();
        let (x0, y0, w, h) = pixel_window(&self.transform, (width, height), bounds, WINDOW_MARGIN)
            .ok_or_else(|| outside_error(bounds))?;
        let longest = w.max(h);
        let step = if max_size == 0 || longest <= max_size {
            1
        } else {
            (longest + max_size - 1) / max_size
        };

        // Whole step-sized blocks where the raster allows, so each cell covers one block
        let (x0, w) = block_span(x0, w, step, width);
        let (y0, h) = block_span(y0, h, step, height);
        let view = self.data.slice(s![y0..y0 + h, x0..x0 + w]);
        let data = Array2::from_shape_fn(((h + step - 1) / step, (w + step - 1) / step), |(i, j)| {
            let block = view.slice(s![
                i * step..((i + 1) * step).min(h),
                j * step..((j + 1) * step).min(w)
            ]);
            match kind {
                ValueKind::Continuous => block_mean(block),
                ValueKind::Categorical => block_mode(block),
            }
        });
        let (bh, bw) = data.dim();

        let transform = GeoTransform {
            top_left_x: self.transform.top_left_x + x0 as f64 * self.transform.pixel_width,
            pixel_width: self.transform.pixel_width * step as f64,
            rotation_x: 0.0,
            top_left_y: self.transform.top_left_y + y0 as f64 * self.transform.pixel_height,
            rotation_y: 0.0,
            pixel_height: self.transform.pixel_height * step as f64,
        };
        log::debug!("Memory window {}x{} (step {}) from {}x{}", bw, bh, step, w, h);
        Ok(SourceWindow { data, transform })
    }
}

/// Grow `len` to a multiple of `step`, shifting `start` back if the raster ends first
fn block_span(start: usize, len: usize, step: usize, limit: usize) -> (usize, usize) {
    let full = (len + step - 1) / step * step;
    if full > limit {
        return (0, limit);
    }
    (start.min(limit - full), full)
}

/// Mean of the finite values, NaN when there are none
fn block_mean(block: ArrayView2<f32>) -> f32 {
    let (sum, count) = block
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0f64, 0usize), |(sum, count), v| (sum + *v as f64, count + 1));
    if count == 0 {
        f32::NAN
    } else {
        (sum / count as f64) as f32
    }
}

/// Most frequent finite code; ties go to the smallest code
fn block_mode(block: ArrayView2<f32>) -> f32 {
    let mut counts: BTreeMap<i64, usize> = BTreeMap::new();
    for v in block.iter().filter(|v| v.is_finite()) {
        *counts.entry(v.round() as i64).or_insert(0) += 1;
    }
    let mut best: Option<(i64, usize)> = None;
    for (code, count) in counts {
        if best.map_or(true, |(_, c)| count > c) {
            best = Some((code, count));
        }
    }
    best.map_or(f32::NAN, |(code, _)| code as f32)
}

/// Serves pre-loaded rasters by locator
#[derive(Debug, Clone, Default)]
pub struct MemoryFetcher {
    rasters: HashMap<String, MemoryRaster>,
}

impl MemoryFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, locator: &str, raster: MemoryRaster) {
        self.rasters.insert(locator.to_string(), raster);
    }

    pub fn with(mut self, locator: &str, raster: MemoryRaster) -> Self {
        self.insert(locator, raster);
        self
    }
}

impl AssetFetcher for MemoryFetcher {
    fn fetch(&self, locator: &str) -> GreenResult<Box<dyn RasterSource>> {
        self.rasters
            .get(locator)
            .map(|r| Box::new(r.clone()) as Box<dyn RasterSource>)
            .ok_or_else(|| GreenError::Processing(format!("asset not found: {}", locator)))
    }
}
