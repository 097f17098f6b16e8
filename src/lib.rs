//! greenspace: Polygon-exact vegetation coverage for municipalities
//!
//! This library searches a STAC catalog for Sentinel-2 L2A scenes, aligns the
//! red, green, blue, NIR and scene-classification bands onto a common grid over
//! a city's bounding box, masks the grid to the municipal polygon, fills cloud
//! gaps from backup scenes and classifies vegetation density from NDVI.

pub mod config;
pub mod core;
pub mod io;
pub mod types;

// Re-export main types and functions for easier access
pub use config::{ProcessingConfig, ProcessingFlags};
pub use types::{
    AlignedBand, AlignedScene, BandId, ClassificationResult, CoverageScore, GeoBoundingBox,
    GeoTransform, GreenError, GreenResult, ProcessingWarning, SceneCandidate,
};

pub use crate::core::{
    JobScheduler, ProcessingJob, ProgressEvent, ProgressSink, VegetationAnalysis,
    VegetationProcessor,
};
pub use io::{CityRecord, DateRange, GdalFetcher, StacCatalog, VegetationSummary};
