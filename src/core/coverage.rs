use crate::core::projection::SceneCrs;
use crate::io::raster::AssetFetcher;
use crate::types::{
    BandId, CoverageScore, GeoBoundingBox, GreenError, GreenResult, ProcessingWarning,
    SceneCandidate, SceneFootprint,
};

/// Weight applied to a candidate's overlap before the cloud penalty
pub fn coverage_weight(overlap_percentage: f64, complete: bool) -> f64 {
    if complete {
        1.2
    } else if overlap_percentage >= 98.0 {
        1.0
    } else if overlap_percentage >= 95.0 {
        0.8
    } else {
        0.5
    }
}

/// `overlap% * weight * (1 - cloud%/100)`
pub fn composite_score(overlap_percentage: f64, complete: bool, cloud_cover: f64) -> f64 {
    overlap_percentage
        * coverage_weight(overlap_percentage, complete)
        * (1.0 - cloud_cover.clamp(0.0, 100.0) / 100.0)
}

/// Primary scene plus the complete-coverage backups used for gap filling
#[derive(Debug, Clone)]
pub struct SceneSelection {
    pub primary: SceneCandidate,
    pub primary_score: Option<CoverageScore>,
    /// Complete-coverage candidates other than the primary, ascending cloud cover
    pub backups: Vec<SceneCandidate>,
    pub scores: Vec<CoverageScore>,
    pub warnings: Vec<ProcessingWarning>,
}

/// Ranks catalog candidates by geometric fit and cloud cover
pub struct CoverageScorer<'a> {
    fetcher: &'a dyn AssetFetcher,
    max_candidates: usize,
}

impl<'a> CoverageScorer<'a> {
    pub fn new(fetcher: &'a dyn AssetFetcher, max_candidates: usize) -> Self {
        Self {
            fetcher,
            max_candidates: max_candidates.max(1),
        }
    }

    /// Native CRS and bounds, from catalog metadata or by opening the red asset
    pub fn footprint(&self, candidate: &SceneCandidate) -> GreenResult<SceneFootprint> {
        if let Some(footprint) = candidate.footprint {
            return Ok(footprint);
        }
        let locator = candidate.asset(BandId::Red).ok_or_else(|| GreenError::BandDownload {
            band: BandId::Red,
            reason: format!("scene {} has no red asset", candidate.id),
        })?;
        let source = self.fetcher.fetch(locator)?;
        Ok(SceneFootprint {
            epsg: source.epsg(),
            bounds: source.native_bounds(),
        })
    }

    pub fn score(&self, candidate: &SceneCandidate, bbox: &GeoBoundingBox) -> GreenResult<CoverageScore> {
        let footprint = self.footprint(candidate)?;
        let crs = SceneCrs::from_epsg(footprint.epsg).ok_or_else(|| GreenError::Reprojection {
            band: BandId::Red,
            reason: format!("unsupported scene CRS EPSG:{}", footprint.epsg),
        })?;

        let target = crs.project_bbox(bbox);
        let overlap_percentage = match footprint.bounds.intersection(&target) {
            Some(overlap) if target.area() > 0.0 => (overlap.area() / target.area() * 100.0).min(100.0),
            _ => 0.0,
        };
        let complete_coverage = footprint.bounds.contains(&target);
        let score = composite_score(overlap_percentage, complete_coverage, candidate.cloud_cover);

        log::debug!(
            "{}: overlap {:.1}%, cloud {:.1}%, complete {}, score {:.2}",
            candidate.id,
            overlap_percentage,
            candidate.cloud_cover,
            complete_coverage,
            score
        );

        Ok(CoverageScore {
            candidate_id: candidate.id.clone(),
            overlap_percentage,
            score,
            complete_coverage,
            cloud_cover: candidate.cloud_cover,
        })
    }

    /// Score the clearest candidates and pick a primary scene and backup pool
    ///
    /// `candidates` must be sorted ascending by cloud cover and non-empty.
    pub fn select(
        &self,
        candidates: &[SceneCandidate],
        bbox: &GeoBoundingBox,
    ) -> GreenResult<SceneSelection> {
        let clearest = candidates
            .first()
            .ok_or(GreenError::NoImageryFound { attempts: 0 })?;

        let mut scored: Vec<(&SceneCandidate, CoverageScore)> = Vec::new();
        for candidate in candidates.iter().take(self.max_candidates) {
            match self.score(candidate, bbox) {
                Ok(score) => scored.push((candidate, score)),
                Err(e) => log::warn!("Skipping candidate {}: {}", candidate.id, e),
            }
        }
        let scores: Vec<CoverageScore> = scored.iter().map(|(_, s)| s.clone()).collect();

        let mut complete: Vec<&(&SceneCandidate, CoverageScore)> =
            scored.iter().filter(|(_, s)| s.complete_coverage).collect();
        complete.sort_by(|a, b| a.0.cloud_cover.total_cmp(&b.0.cloud_cover));

        if let Some((primary, primary_score)) = complete.first().map(|entry| (entry.0, entry.1.clone())) {
            let backups: Vec<SceneCandidate> =
                complete.iter().skip(1).map(|entry| entry.0.clone()).collect();
            log::info!(
                "Primary scene {} ({:.1}% cloud, complete coverage), {} backups",
                primary.id,
                primary.cloud_cover,
                backups.len()
            );
            return Ok(SceneSelection {
                primary: primary.clone(),
                primary_score: Some(primary_score),
                backups,
                scores,
                warnings: Vec::new(),
            });
        }

        let best = scored
            .iter()
            .filter(|(_, s)| s.overlap_percentage > 0.0)
            .max_by(|a, b| a.1.score.total_cmp(&b.1.score));

        if let Some((primary, score)) = best {
            log::info!(
                "Primary scene {} ({:.1}% overlap, {:.1}% cloud), no complete-coverage backups",
                primary.id,
                score.overlap_percentage,
                primary.cloud_cover
            );
            return Ok(SceneSelection {
                primary: (*primary).clone(),
                primary_score: Some(score.clone()),
                backups: Vec::new(),
                scores,
                warnings: Vec::new(),
            });
        }

        log::warn!("No candidate overlaps the city; falling back to {}", clearest.id);
        let primary_score = scores.iter().find(|s| s.candidate_id == clearest.id).cloned();
        Ok(SceneSelection {
            primary: clearest.clone(),
            primary_score,
            backups: Vec::new(),
            scores,
            warnings: vec![ProcessingWarning::LowCoverageFallback {
                scene_id: clearest.id.clone(),
            }],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::raster::MemoryFetcher;
    use crate::types::ProjectedBounds;
    use chrono::Utc;
    use std::collections::HashMap;

    fn bbox() -> GeoBoundingBox {
        GeoBoundingBox::new(15.0, 50.0, 15.1, 50.1).unwrap()
    }

    fn candidate(id: &str, cloud: f64, bounds: ProjectedBounds) -> SceneCandidate {
        SceneCandidate {
            id: id.into(),
            acquired: Utc::now(),
            cloud_cover: cloud,
            assets: HashMap::new(),
            footprint: Some(SceneFootprint { epsg: 32633, bounds }),
        }
    }

    fn city_in_utm() -> ProjectedBounds {
        SceneCrs::from_epsg(32633).unwrap().project_bbox(&bbox())
    }

    #[test]
    fn test_lower_cloud_scores_higher_at_equal_overlap() {
        assert!(composite_score(97.0, false, 5.0) > composite_score(97.0, false, 6.0));
        assert!(composite_score(100.0, true, 10.0) > composite_score(100.0, true, 11.0));
    }

    #[test]
    fn test_complete_beats_98_percent_at_equal_cloud() {
        assert!(composite_score(100.0, true, 20.0) > composite_score(98.0, false, 20.0));
        assert!(composite_score(99.9, false, 20.0) > composite_score(97.0, false, 20.0));
    }

    #[test]
    fn test_complete_and_partial_coverage() {
        let fetcher = MemoryFetcher::new();
        let scorer = CoverageScorer::new(&fetcher, 20);
        let city = city_in_utm();

        let full = candidate("full", 10.0, city.expand(5_000.0));
        let score = scorer.score(&full, &bbox()).unwrap();
        assert!(score.complete_coverage);
        assert!((score.overlap_percentage - 100.0).abs() < 1e-9);

        let mid_x = (city.min_x + city.max_x) / 2.0;
        let half = candidate(
            "half",
            10.0,
            ProjectedBounds::new(mid_x, city.min_y - 1_000.0, city.max_x + 1_000.0, city.max_y + 1_000.0),
        );
        let score = scorer.score(&half, &bbox()).unwrap();
        assert!(!score.complete_coverage);
        assert!((score.overlap_percentage - 50.0).abs() < 1e-6);
    }

    #[test]
    fn test_selection_prefers_complete_and_keeps_backups() {
        let fetcher = MemoryFetcher::new();
        let scorer = CoverageScorer::new(&fetcher, 20);
        let city = city_in_utm();
        let mid_x = (city.min_x + city.max_x) / 2.0;
        let partial = ProjectedBounds::new(mid_x - 100.0, city.min_y, city.max_x + 1.0, city.max_y + 1.0);

        let candidates = vec![
            candidate("clear-partial", 1.0, partial),
            candidate("complete-a", 8.0, city.expand(100.0)),
            candidate("complete-b", 15.0, city.expand(100.0)),
        ];
        let selection = scorer.select(&candidates, &bbox()).unwrap();

        assert_eq!(selection.primary.id, "complete-a");
        let backups: Vec<&str> = selection.backups.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(backups, vec!["complete-b"]);
        assert_eq!(selection.scores.len(), 3);
        assert!(selection.warnings.is_empty());
    }

    #[test]
    fn test_no_overlap_falls_back_to_clearest() {
        let fetcher = MemoryFetcher::new();
        let scorer = CoverageScorer::new(&fetcher, 20);
        let far = ProjectedBounds::new(100_000.0, 1_000_000.0, 200_000.0, 1_100_000.0);
        let candidates = vec![candidate("a", 2.0, far), candidate("b", 9.0, far)];

        let selection = scorer.select(&candidates, &bbox()).unwrap();
        assert_eq!(selection.primary.id, "a");
        assert!(matches!(
            selection.warnings.as_slice(),
            [ProcessingWarning::LowCoverageFallback { .. }]
        ));
    }

    #[test]
    fn test_only_top_candidates_are_scored() {
        let fetcher = MemoryFetcher::new();
        let scorer = CoverageScorer::new(&fetcher, 2);
        let city = city_in_utm();
        let candidates: Vec<SceneCandidate> = (0..5)
            .map(|i| candidate(&format!("c{}", i), i as f64, city.expand(10.0)))
            .collect();
        let selection = scorer.select(&candidates, &bbox()).unwrap();
        assert_eq!(selection.scores.len(), 2);
        assert_eq!(selection.backups.len(), 1);
    }
}
