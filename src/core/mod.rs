//! Core vegetation processing modules

pub mod band_align;
pub mod classify;
pub mod coverage;
pub mod gap_fill;
pub mod pipeline;
pub mod polygon_mask;
pub mod progress;
pub mod projection;
pub mod resample;
pub mod scheduler;

// Re-export main types
pub use band_align::{AlignmentParams, BandAligner, SceneAlignment};
pub use classify::{Classification, DensityThresholds, DensityTier, TierGrid, VegetationClassifier};
pub use coverage::{CoverageScorer, SceneSelection};
pub use gap_fill::{GapFillReport, GapFiller};
pub use pipeline::{VegetationAnalysis, VegetationProcessor};
pub use polygon_mask::PolygonMasker;
pub use progress::{ChannelProgress, LogProgress, NoProgress, ProgressEvent, ProgressSink, Stage};
pub use projection::SceneCrs;
pub use resample::Kernel;
pub use scheduler::{JobScheduler, ProcessingJob};
