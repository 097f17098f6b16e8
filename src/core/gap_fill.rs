use crate::types::{
    AlignedBand, AlignedScene, BandId, CityMask, GreenResult, SceneCandidate,
};
use ndarray::{Array2, Zip};
use std::collections::HashMap;

/// Outcome of a gap-filling pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GapFillReport {
    /// In-mask pixels without valid red/NIR before filling
    pub gaps_before: usize,
    pub gaps_after: usize,
    /// Backups that contributed at least one pixel, in the order tried
    pub backups_used: Vec<String>,
    pub backups_tried: usize,
    /// Gaps remained after every backup was tried
    pub exhausted: bool,
}

/// Pixels whose red and NIR values are both usable
pub fn valid_data_mask(scene: &AlignedScene) -> Option<Array2<bool>> {
    let red = scene.band(BandId::Red)?;
    let nir = scene.band(BandId::Nir)?;
    Some(Zip::from(red).and(nir).map_collect(|r, n| r.is_finite() && n.is_finite()))
}

/// In-mask pixels lacking valid data
pub fn gap_mask(scene: &AlignedScene, mask: &CityMask) -> Array2<bool> {
    match valid_data_mask(scene) {
        Some(valid) if valid.dim() == mask.dim() => {
            Zip::from(mask).and(&valid).map_collect(|&m, &v| m && !v)
        }
        _ => mask.clone(),
    }
}

pub fn gap_count(scene: &AlignedScene, mask: &CityMask) -> usize {
    gap_mask(scene, mask).iter().filter(|&&g| g).count()
}

/// Valid in-mask pixels as a share of in-mask pixels, 0-100
pub fn data_coverage_percentage(scene: &AlignedScene, mask: &CityMask) -> f64 {
    let inside = mask.iter().filter(|&&m| m).count();
    if inside == 0 {
        return 0.0;
    }
    (inside - gap_count(scene, mask)) as f64 / inside as f64 * 100.0
}

/// Fills in-mask gaps of the primary scene from ranked backup scenes
#[derive(Debug, Clone)]
pub struct GapFiller {
    completeness_threshold: f64,
}

impl GapFiller {
    pub fn new(completeness_threshold: f64) -> Self {
        Self { completeness_threshold }
    }

    pub fn needs_fill(&self, scene: &AlignedScene, mask: &CityMask) -> bool {
        data_coverage_percentage(scene, mask) < self.completeness_threshold
    }

    /// Try each backup once, in order, until no gaps remain
    ///
    /// `align` produces the backup's bands on the primary grid. The primary
    /// is consumed and a new derived scene is returned.
    pub fn fill<F>(
        &self,
        primary: AlignedScene,
        mask: &CityMask,
        backups: &[SceneCandidate],
        mut align: F,
    ) -> GreenResult<(AlignedScene, GapFillReport)>
    where
        F: FnMut(&SceneCandidate) -> GreenResult<AlignedScene>,
    {
        let gaps_before = gap_count(&primary, mask);
        let mut report = GapFillReport {
            gaps_before,
            gaps_after: gaps_before,
            ..Default::default()
        };
        log::info!(
            "Gap filling: {} gap pixels, {} backup scenes available",
            gaps_before,
            backups.len()
        );

        let mut current = primary;
        for backup in backups {
            if report.gaps_after == 0 {
                break;
            }
            report.backups_tried += 1;

            let candidate = match align(backup) {
                Ok(scene) => scene,
                Err(e) => {
                    log::warn!("Backup {} could not be aligned: {}", backup.id, e);
                    continue;
                }
            };

            let gaps = gap_mask(&current, mask);
            let fillable = match valid_data_mask(&candidate) {
                Some(valid) if valid.dim() == gaps.dim() => {
                    Zip::from(&gaps).and(&valid).map_collect(|&g, &v| g && v)
                }
                _ => {
                    log::warn!("Backup {} lacks usable red/NIR on the output grid", backup.id);
                    continue;
                }
            };
            let filled = fillable.iter().filter(|&&f| f).count();
            if filled == 0 {
                log::debug!("Backup {} covers none of the remaining gaps", backup.id);
                continue;
            }

            current = merge_scene(current, &candidate, &fillable);
            report.gaps_after = gap_count(&current, mask);
            report.backups_used.push(backup.id.clone());
            log::info!(
                "Filled {} pixels from {} ({} gaps left)",
                filled,
                backup.id,
                report.gaps_after
            );
        }

        report.exhausted = report.gaps_after > 0;
        Ok((current, report))
    }
}

/// New scene taking `backup` values wherever `fillable` is set
fn merge_scene(current: AlignedScene, backup: &AlignedScene, fillable: &Array2<bool>) -> AlignedScene {
    let bands: HashMap<BandId, AlignedBand> = current
        .bands
        .into_iter()
        .map(|(id, band)| {
            let data = match backup.band(id) {
                Some(other) if other.dim() == band.data.dim() => Zip::from(&band.data)
                    .and(other)
                    .and(fillable)
                    .map_collect(|&c, &b, &f| if f { b } else { c }),
                // A class code from the primary would describe a pixel it never saw
                _ if id.is_categorical() => Zip::from(&band.data)
                    .and(fillable)
                    .map_collect(|&c, &f| if f { f32::NAN } else { c }),
                _ => band.data,
            };
            (id, AlignedBand { data, ..band })
        })
        .collect();

    AlignedScene {
        scene_id: current.scene_id,
        cloud_cover: current.cloud_cover,
        transform: current.transform,
        bands,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{GeoBoundingBox, GeoTransform, GreenError};
    use chrono::Utc;

    fn transform() -> GeoTransform {
        GeoTransform::from_bounds(&GeoBoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap(), 10, 10)
    }

    fn scene(id: &str, red: Array2<f32>, nir: Array2<f32>, scl: Option<Array2<f32>>) -> AlignedScene {
        let mut bands = HashMap::new();
        let mut add = |band: BandId, data: Array2<f32>| {
            bands.insert(band, AlignedBand { band, kind: band.kind(), data, transform: transform() });
        };
        add(BandId::Red, red);
        add(BandId::Nir, nir);
        if let Some(scl) = scl {
            add(BandId::Scl, scl);
        }
        AlignedScene { scene_id: id.into(), cloud_cover: 5.0, transform: transform(), bands }
    }

    fn candidate(id: &str) -> SceneCandidate {
        SceneCandidate {
            id: id.into(),
            acquired: Utc::now(),
            cloud_cover: 10.0,
            assets: HashMap::new(),
            footprint: None,
        }
    }

    /// Primary missing its left `cols` columns
    fn gappy(cols: usize) -> AlignedScene {
        let red = Array2::from_shape_fn((10, 10), |(_, c)| if c < cols { f32::NAN } else { 0.1 });
        scene("primary", red, Array2::from_elem((10, 10), 0.4), Some(Array2::from_elem((10, 10), 4.0)))
    }

    fn full(id: &str, value: f32) -> AlignedScene {
        scene(id, Array2::from_elem((10, 10), value), Array2::from_elem((10, 10), 0.5), None)
    }

    #[test]
    fn test_coverage_counts_only_masked_pixels() {
        let mask = Array2::from_shape_fn((10, 10), |(_, c)| c >= 5);
        assert_eq!(gap_count(&gappy(3), &mask), 0);
        assert_eq!(data_coverage_percentage(&gappy(3), &mask), 100.0);

        let all = Array2::from_elem((10, 10), true);
        assert_eq!(gap_count(&gappy(3), &all), 30);
        assert!(GapFiller::new(95.0).needs_fill(&gappy(3), &all));
    }

    #[test]
    fn test_fill_stops_once_closed() {
        let mask = Array2::from_elem((10, 10), true);
        let backups = vec![candidate("b1"), candidate("b2")];
        let mut calls = 0;

        let (filled, report) = GapFiller::new(95.0)
            .fill(gappy(4), &mask, &backups, |b| {
                calls += 1;
                Ok(full(&b.id, 0.2))
            })
            .unwrap();

        assert_eq!(calls, 1);
        assert_eq!(report.gaps_before, 40);
        assert_eq!(report.gaps_after, 0);
        assert_eq!(report.backups_used, vec!["b1".to_string()]);
        assert!(!report.exhausted);

        let red = filled.band(BandId::Red).unwrap();
        assert_eq!(red[[0, 0]], 0.2);
        assert_eq!(red[[0, 9]], 0.1);
        // Backup had no classification layer
        assert!(filled.band(BandId::Scl).unwrap()[[0, 0]].is_nan());
        assert_eq!(filled.band(BandId::Scl).unwrap()[[0, 9]], 4.0);
    }

    #[test]
    fn test_gaps_never_increase_and_exhaustion_reported() {
        let mask = Array2::from_elem((10, 10), true);
        let backups = vec![candidate("broken"), candidate("partial"), candidate("useless")];

        let (_, report) = GapFiller::new(95.0)
            .fill(gappy(6), &mask, &backups, |b| match b.id.as_str() {
                "broken" => Err(GreenError::Processing("timeout".into())),
                "partial" => {
                    let red = Array2::from_shape_fn((10, 10), |(_, c)| if c < 2 { 0.3 } else { f32::NAN });
                    Ok(scene("partial", red, Array2::from_elem((10, 10), 0.5), None))
                }
                _ => Ok(scene(
                    "useless",
                    Array2::from_elem((10, 10), f32::NAN),
                    Array2::from_elem((10, 10), f32::NAN),
                    None,
                )),
            })
            .unwrap();

        assert_eq!(report.backups_tried, 3);
        assert_eq!(report.gaps_before, 60);
        assert_eq!(report.gaps_after, 40);
        assert!(report.gaps_after <= report.gaps_before);
        assert_eq!(report.backups_used, vec!["partial".to_string()]);
        assert!(report.exhausted);
    }
}
