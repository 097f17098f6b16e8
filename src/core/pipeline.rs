use crate::config::ProcessingConfig;
use crate::core::band_align::{AlignmentParams, BandAligner};
use crate::core::classify::{Classification, VegetationClassifier};
use crate::core::coverage::CoverageScorer;
use crate::core::gap_fill::{data_coverage_percentage, gap_count, GapFillReport, GapFiller};
use crate::core::polygon_mask::{coverage_percentage, PolygonMasker};
use crate::core::progress::{ProgressEvent, ProgressSink, Stage};
use crate::io::catalog::{CatalogSearcher, DateRange, ImageryCatalog};
use crate::io::city::{BoundsResolver, CityRecord, ResolvedCity};
use crate::io::output::{ResultEmitter, VegetationSummary};
use crate::io::raster::AssetFetcher;
use crate::types::{AlignedScene, BandId, CityMask, GreenError, GreenResult, ProcessingWarning};
use std::path::Path;

/// Everything one run derived for a city and time window
#[derive(Debug, Clone)]
pub struct VegetationAnalysis {
    pub city: ResolvedCity,
    /// Window that produced imagery, possibly widened by search relaxation
    pub dates: DateRange,
    pub images_found: usize,
    /// Primary scene after gap filling
    pub scene: AlignedScene,
    pub mask: CityMask,
    pub classification: Classification,
    pub gap_fill: GapFillReport,
    pub data_coverage_percentage: f64,
    pub polygon_coverage_percentage: f64,
    pub warnings: Vec<ProcessingWarning>,
}

/// Runs the whole chain from city record to vegetation statistics
///
/// Holds no per-run state; one processor may serve many jobs concurrently.
pub struct VegetationProcessor<'a> {
    config: ProcessingConfig,
    catalog: &'a dyn ImageryCatalog,
    fetcher: &'a dyn AssetFetcher,
}

impl<'a> VegetationProcessor<'a> {
    pub fn new(
        config: ProcessingConfig,
        catalog: &'a dyn ImageryCatalog,
        fetcher: &'a dyn AssetFetcher,
    ) -> GreenResult<Self> {
        config.validate()?;
        Ok(Self { config, catalog, fetcher })
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    fn bands(&self) -> Vec<BandId> {
        let mut bands = BandId::REQUIRED.to_vec();
        if self.config.flags.use_scl_masking {
            bands.push(BandId::Scl);
        }
        bands
    }

    pub fn run(
        &self,
        city: &CityRecord,
        dates: &DateRange,
        progress: &dyn ProgressSink,
    ) -> GreenResult<VegetationAnalysis> {
        let config = &self.config;
        let step = |pct: u8, stage: Stage, message: String| {
            progress.report(ProgressEvent::new(pct, stage, message))
        };
        let mut warnings: Vec<ProcessingWarning> = Vec::new();

        step(5, Stage::Bounds, format!("Resolving bounds for {}", city.display_name()));
        let resolved = BoundsResolver::new(config.fallback_buffer_degrees).resolve(city)?;
        let bbox = resolved.bbox;

        step(15, Stage::Search, format!("Searching {} for {}", config.collection, dates.label()));
        let outcome = CatalogSearcher::new(self.catalog, &config.collection).search(
            &bbox,
            dates,
            config.cloud_coverage_threshold,
        )?;

        step(25, Stage::Scoring, format!("Scoring {} candidate scenes", outcome.candidates.len()));
        let selection = CoverageScorer::new(self.fetcher, config.max_candidates)
            .select(&outcome.candidates, &bbox)?;
        warnings.extend(selection.warnings.iter().cloned());

        step(35, Stage::Alignment, format!("Aligning bands of {}", selection.primary.id));
        let aligner = BandAligner::new(
            self.fetcher,
            AlignmentParams {
                target_width: config.target_width,
                target_height: config.target_height,
                precision_factor: config.precision_factor,
                band_workers: config.band_workers,
            },
        );
        let bands = self.bands();
        let alignment = aligner.align_scene(&selection.primary, &bands, &bbox)?;
        let obtained = alignment.continuous_band_count();
        if obtained < BandId::REQUIRED.len() {
            return Err(GreenError::InsufficientBands { obtained });
        }
        warnings.extend(alignment.warnings.iter().cloned());

        step(55, Stage::Masking, "Rasterizing city polygon".to_string());
        let masker = PolygonMasker::new(
            aligner.output_transform(&bbox),
            config.target_width,
            config.target_height,
        );
        let polygon_mask = masker.rasterize(&resolved.polygon);
        let polygon_coverage_percentage = coverage_percentage(&polygon_mask);
        let mask = if config.flags.use_polygon_masking {
            polygon_mask
        } else {
            masker.full()
        };

        let mut scene = alignment.scene;
        let gaps = gap_count(&scene, &mask);
        let mut gap_fill = GapFillReport {
            gaps_before: gaps,
            gaps_after: gaps,
            ..Default::default()
        };

        let filler = GapFiller::new(config.completeness_threshold);
        if filler.needs_fill(&scene, &mask) {
            let coverage = data_coverage_percentage(&scene, &mask);
            log::warn!(
                "Valid data covers {:.1}% of the city, below {:.1}%",
                coverage,
                config.completeness_threshold
            );
            warnings.push(ProcessingWarning::InsufficientCoverage {
                coverage_percentage: coverage,
                threshold: config.completeness_threshold,
            });

            if config.flags.use_gap_filling && !selection.backups.is_empty() {
                step(
                    65,
                    Stage::GapFilling,
                    format!("Filling gaps from {} backup scenes", selection.backups.len()),
                );
                let (filled, report) = filler.fill(scene, &mask, &selection.backups, |backup| {
                    aligner.align_scene(backup, &bands, &bbox).map(|a| a.scene)
                })?;
                scene = filled;
                gap_fill = report;

                if gap_fill.exhausted {
                    let warning = ProcessingWarning::GapFillExhausted {
                        remaining_gap_pixels: gap_fill.gaps_after,
                        coverage_percentage: data_coverage_percentage(&scene, &mask),
                    };
                    log::warn!("{}", warning);
                    warnings.push(warning);
                }
            }
        }
        let data_coverage = data_coverage_percentage(&scene, &mask);

        step(85, Stage::Classification, "Classifying vegetation density".to_string());
        let classification = VegetationClassifier::new(config.ndvi_threshold, config.flags.use_scl_masking)
            .classify(&scene, &mask)?;

        log::info!(
            "{}: {:.1}% vegetation over {} polygon pixels",
            resolved.name,
            classification.result.vegetation_percentage,
            classification.result.total_pixels
        );

        Ok(VegetationAnalysis {
            city: resolved,
            dates: outcome.dates,
            images_found: outcome.candidates.len(),
            scene,
            mask,
            classification,
            gap_fill,
            data_coverage_percentage: data_coverage,
            polygon_coverage_percentage,
            warnings,
        })
    }

    /// Run and write every artifact under `output_dir`
    pub fn run_and_emit<P: AsRef<Path>>(
        &self,
        city: &CityRecord,
        dates: &DateRange,
        output_dir: P,
        progress: &dyn ProgressSink,
    ) -> GreenResult<VegetationSummary> {
        let analysis = self.run(city, dates, progress)?;
        progress.report(ProgressEvent::new(97, Stage::Output, "Writing rasters and summary"));
        let summary = ResultEmitter::new(output_dir).emit(&analysis, &self.config)?;
        progress.report(ProgressEvent::new(100, Stage::Complete, "Processing complete"));
        Ok(summary)
    }
}
