use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Single-band reflectance or classification grid (rows x cols)
pub type BandGrid = Array2<f32>;

/// Pixel membership in the city polygon
pub type CityMask = Array2<bool>;

/// NDVI grid, NaN where masked or unavailable
pub type NdviGrid = Array2<f32>;

/// Spectral bands consumed by the classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BandId {
    Red,
    Green,
    Blue,
    Nir,
    /// Sentinel-2 L2A scene classification layer
    Scl,
}

impl BandId {
    /// The four continuous bands a run cannot do without
    pub const REQUIRED: [BandId; 4] = [BandId::Red, BandId::Green, BandId::Blue, BandId::Nir];

    pub fn kind(&self) -> ValueKind {
        match self {
            BandId::Scl => ValueKind::Categorical,
            _ => ValueKind::Continuous,
        }
    }

    pub fn is_categorical(&self) -> bool {
        self.kind() == ValueKind::Categorical
    }

    /// Catalog asset keys to try for this band, most specific first
    pub fn asset_keys(&self) -> &'static [&'static str] {
        match self {
            BandId::Red => &["red", "B04", "B4", "RED"],
            BandId::Green => &["green", "B03", "B3", "GREEN"],
            BandId::Blue => &["blue", "B02", "B2", "BLUE"],
            BandId::Nir => &["nir", "B08", "B8", "NIR"],
            BandId::Scl => &["scl", "SCL"],
        }
    }
}

impl std::fmt::Display for BandId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BandId::Red => write!(f, "red"),
            BandId::Green => write!(f, "green"),
            BandId::Blue => write!(f, "blue"),
            BandId::Nir => write!(f, "nir"),
            BandId::Scl => write!(f, "scl"),
        }
    }
}

/// How band values may be resampled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Reflectance, resampled with cubic kernels
    Continuous,
    /// Class codes, nearest neighbour only
    Categorical,
}

/// Geographic bounding box in WGS84 degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoBoundingBox {
    pub west: f64,
    pub south: f64,
    pub east: f64,
    pub north: f64,
}

impl GeoBoundingBox {
    /// Build a bounding box, rejecting degenerate or inverted extents
    pub fn new(west: f64, south: f64, east: f64, north: f64) -> GreenResult<Self> {
        let finite = [west, south, east, north].iter().all(|v| v.is_finite());
        if !finite || west >= east || south >= north {
            return Err(GreenError::InvalidInput(format!(
                "invalid bounding box: W={} S={} E={} N={}",
                west, south, east, north
            )));
        }
        Ok(Self { west, south, east, north })
    }

    pub fn width(&self) -> f64 {
        self.east - self.west
    }

    pub fn height(&self) -> f64 {
        self.north - self.south
    }

    /// (lat, lon) of the box center
    pub fn center(&self) -> (f64, f64) {
        ((self.north + self.south) / 2.0, (self.east + self.west) / 2.0)
    }

    /// Boundary points in (lon, lat), `per_edge` samples along each edge
    pub fn densified_ring(&self, per_edge: usize) -> Vec<(f64, f64)> {
        let n = per_edge.max(1);
        let mut points = Vec::with_capacity(4 * n);
        for k in 0..n {
            let t = k as f64 / n as f64;
            points.push((self.west + t * self.width(), self.south));
            points.push((self.east, self.south + t * self.height()));
            points.push((self.east - t * self.width(), self.north));
            points.push((self.west, self.north - t * self.height()));
        }
        points
    }

    pub fn as_array(&self) -> [f64; 4] {
        [self.west, self.south, self.east, self.north]
    }
}

/// Axis-aligned bounds in a projected CRS (metres for UTM)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ProjectedBounds {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl ProjectedBounds {
    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Self {
        Self { min_x, min_y, max_x, max_y }
    }

    /// Envelope of a set of points
    pub fn envelope(points: &[(f64, f64)]) -> Option<Self> {
        if points.is_empty() {
            return None;
        }
        let mut bounds = Self::new(f64::MAX, f64::MAX, f64::MIN, f64::MIN);
        for &(x, y) in points {
            bounds.min_x = bounds.min_x.min(x);
            bounds.min_y = bounds.min_y.min(y);
            bounds.max_x = bounds.max_x.max(x);
            bounds.max_y = bounds.max_y.max(y);
        }
        Some(bounds)
    }

    pub fn area(&self) -> f64 {
        (self.max_x - self.min_x).max(0.0) * (self.max_y - self.min_y).max(0.0)
    }

    pub fn intersection(&self, other: &ProjectedBounds) -> Option<ProjectedBounds> {
        let min_x = self.min_x.max(other.min_x);
        let max_x = self.max_x.min(other.max_x);
        let min_y = self.min_y.max(other.min_y);
        let max_y = self.max_y.min(other.max_y);
        if min_x < max_x && min_y < max_y {
            Some(ProjectedBounds::new(min_x, min_y, max_x, max_y))
        } else {
            None
        }
    }

    /// True when `other` lies inside on all four sides
    pub fn contains(&self, other: &ProjectedBounds) -> bool {
        self.min_x <= other.min_x
            && self.min_y <= other.min_y
            && self.max_x >= other.max_x
            && self.max_y >= other.max_y
    }

    pub fn expand(&self, margin: f64) -> ProjectedBounds {
        ProjectedBounds::new(
            self.min_x - margin,
            self.min_y - margin,
            self.max_x + margin,
            self.max_y + margin,
        )
    }
}

/// Geospatial transformation parameters (GDAL ordering)
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoTransform {
    pub top_left_x: f64,
    pub pixel_width: f64,
    pub rotation_x: f64,
    pub top_left_y: f64,
    pub rotation_y: f64,
    pub pixel_height: f64,
}

impl GeoTransform {
    /// North-up transform that maps a `width` x `height` grid exactly onto `bbox`
    pub fn from_bounds(bbox: &GeoBoundingBox, width: usize, height: usize) -> Self {
        Self {
            top_left_x: bbox.west,
            pixel_width: bbox.width() / width as f64,
            rotation_x: 0.0,
            top_left_y: bbox.north,
            rotation_y: 0.0,
            pixel_height: -bbox.height() / height as f64,
        }
    }

    pub fn from_gdal(gt: [f64; 6]) -> Self {
        Self {
            top_left_x: gt[0],
            pixel_width: gt[1],
            rotation_x: gt[2],
            top_left_y: gt[3],
            rotation_y: gt[4],
            pixel_height: gt[5],
        }
    }

    pub fn to_gdal(&self) -> [f64; 6] {
        [
            self.top_left_x,
            self.pixel_width,
            self.rotation_x,
            self.top_left_y,
            self.rotation_y,
            self.pixel_height,
        ]
    }

    /// Map coordinate of a fractional pixel position (col, row)
    pub fn apply(&self, col: f64, row: f64) -> (f64, f64) {
        (
            self.top_left_x + col * self.pixel_width + row * self.rotation_x,
            self.top_left_y + col * self.rotation_y + row * self.pixel_height,
        )
    }

    /// Map coordinate of the center of cell (row, col)
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        self.apply(col as f64 + 0.5, row as f64 + 0.5)
    }

    /// Fractional (col, row) of a map coordinate; north-up transforms only
    pub fn to_pixel(&self, x: f64, y: f64) -> (f64, f64) {
        (
            (x - self.top_left_x) / self.pixel_width,
            (y - self.top_left_y) / self.pixel_height,
        )
    }

    /// Geographic extent covered by a `width` x `height` grid
    pub fn grid_bounds(&self, width: usize, height: usize) -> GeoBoundingBox {
        let (x0, y0) = self.apply(0.0, 0.0);
        let (x1, y1) = self.apply(width as f64, height as f64);
        GeoBoundingBox {
            west: x0.min(x1),
            south: y0.min(y1),
            east: x0.max(x1),
            north: y0.max(y1),
        }
    }

    /// Projected extent covered by a `width` x `height` grid
    pub fn projected_bounds(&self, width: usize, height: usize) -> ProjectedBounds {
        let (x0, y0) = self.apply(0.0, 0.0);
        let (x1, y1) = self.apply(width as f64, height as f64);
        ProjectedBounds::new(x0.min(x1), y0.min(y1), x0.max(x1), y0.max(y1))
    }
}

/// Native footprint of a scene in its own CRS
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SceneFootprint {
    pub epsg: u32,
    pub bounds: ProjectedBounds,
}

/// Catalog item considered during scene selection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneCandidate {
    pub id: String,
    pub acquired: DateTime<Utc>,
    /// Scene cloud cover, 0-100
    pub cloud_cover: f64,
    /// Band asset locators (HTTPS hrefs)
    pub assets: HashMap<BandId, String>,
    /// Native CRS and bounds, when the catalog publishes projection metadata
    pub footprint: Option<SceneFootprint>,
}

impl SceneCandidate {
    pub fn asset(&self, band: BandId) -> Option<&str> {
        self.assets.get(&band).map(|s| s.as_str())
    }
}

/// Geometric fit of one candidate against the city bounding box
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoverageScore {
    pub candidate_id: String,
    /// Share of the bbox covered by the scene, 0-100
    pub overlap_percentage: f64,
    /// Cloud-adjusted composite used for ranking
    pub score: f64,
    /// Scene bounds contain the reprojected bbox on all four sides
    pub complete_coverage: bool,
    pub cloud_cover: f64,
}

/// Band reprojected onto the run's output grid
#[derive(Debug, Clone)]
pub struct AlignedBand {
    pub band: BandId,
    pub kind: ValueKind,
    pub data: BandGrid,
    pub transform: GeoTransform,
}

impl AlignedBand {
    pub fn dim(&self) -> (usize, usize) {
        self.data.dim()
    }

    /// Geographic extent declared by this band's transform
    pub fn bounds(&self) -> GeoBoundingBox {
        let (height, width) = self.data.dim();
        self.transform.grid_bounds(width, height)
    }
}

/// All bands of one scene on the shared output grid
#[derive(Debug, Clone)]
pub struct AlignedScene {
    pub scene_id: String,
    pub cloud_cover: f64,
    pub transform: GeoTransform,
    pub bands: HashMap<BandId, AlignedBand>,
}

impl AlignedScene {
    pub fn band(&self, band: BandId) -> Option<&BandGrid> {
        self.bands.get(&band).map(|b| &b.data)
    }

    pub fn has_required_bands(&self) -> bool {
        BandId::REQUIRED.iter().all(|b| self.bands.contains_key(b))
    }
}

/// Vegetation statistics over the city polygon
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub vegetation_percentage: f64,
    pub high_density_percentage: f64,
    pub medium_density_percentage: f64,
    pub low_density_percentage: f64,
    pub subtle_percentage: f64,
    pub ndvi_mean: f64,
    pub cloud_excluded_percentage: f64,
    /// Polygon pixel count, the denominator of every percentage
    pub total_pixels: usize,
    pub vegetation_pixels: usize,
    pub high_pixels: usize,
    pub medium_pixels: usize,
    pub low_pixels: usize,
    pub subtle_pixels: usize,
    pub cloud_excluded_pixels: usize,
    pub enhanced_threshold: f64,
}

/// Non-fatal anomalies reported alongside the statistics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ProcessingWarning {
    /// A band could not be downloaded or reprojected
    BandUnavailable { scene_id: String, band: BandId, reason: String },
    /// No candidate overlapped the city; the clearest scene was used anyway
    LowCoverageFallback { scene_id: String },
    /// Valid data inside the polygon fell below the completeness threshold
    InsufficientCoverage { coverage_percentage: f64, threshold: f64 },
    /// Gaps remained after every backup scene was tried
    GapFillExhausted { remaining_gap_pixels: usize, coverage_percentage: f64 },
}

impl std::fmt::Display for ProcessingWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingWarning::BandUnavailable { scene_id, band, reason } => {
                write!(f, "band {} unavailable for {}: {}", band, scene_id, reason)
            }
            ProcessingWarning::LowCoverageFallback { scene_id } => {
                write!(f, "no scene overlaps the city, using {} with low coverage", scene_id)
            }
            ProcessingWarning::InsufficientCoverage { coverage_percentage, threshold } => write!(
                f,
                "valid data covers {:.1}% of the city (threshold {:.1}%)",
                coverage_percentage, threshold
            ),
            ProcessingWarning::GapFillExhausted { remaining_gap_pixels, coverage_percentage } => write!(
                f,
                "{} city pixels still without data after gap filling ({:.1}% coverage)",
                remaining_gap_pixels, coverage_percentage
            ),
        }
    }
}

/// Error types for vegetation processing
#[derive(Debug, thiserror::Error)]
pub enum GreenError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] gdal::errors::GdalError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Image encoding error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Cannot resolve bounds: {0}")]
    BoundsResolution(String),

    #[error("No imagery found after {attempts} search attempts")]
    NoImageryFound { attempts: usize },

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("Failed to download band {band}: {reason}")]
    BandDownload { band: BandId, reason: String },

    #[error("Failed to reproject band {band}: {reason}")]
    Reprojection { band: BandId, reason: String },

    #[error("Only {obtained}/4 required bands obtained from the primary scene")]
    InsufficientBands { obtained: usize },

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Processing error: {0}")]
    Processing(String),
}

/// Result type for vegetation processing
pub type GreenResult<T> = Result<T, GreenError>;
