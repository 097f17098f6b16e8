use crate::io::city::CityPolygon;
use crate::types::{CityMask, GeoTransform};
use geo::{BoundingRect, Contains, Point, Polygon, Rect};
use ndarray::{Array2, ArrayViewMut1, Axis};

/// Rasterizes a city polygon onto the output grid
#[derive(Debug, Clone)]
pub struct PolygonMasker {
    transform: GeoTransform,
    width: usize,
    height: usize,
}

impl PolygonMasker {
    pub fn new(transform: GeoTransform, width: usize, height: usize) -> Self {
        Self { transform, width, height }
    }

    /// `true` where the cell center lies inside any polygon (holes excluded)
    pub fn rasterize(&self, polygon: &CityPolygon) -> CityMask {
        let shapes: Vec<(&Polygon<f64>, Rect<f64>)> = polygon
            .polygons
            .0
            .iter()
            .filter_map(|p| p.bounding_rect().map(|rect| (p, rect)))
            .collect();
        let mut mask = Array2::from_elem((self.height, self.width), false);

        #[cfg(feature = "parallel")]
        {
            use ndarray::parallel::prelude::*;
            mask.axis_iter_mut(Axis(0))
                .into_par_iter()
                .enumerate()
                .for_each(|(row, line)| self.fill_row(row, line, &shapes));
        }

        #[cfg(not(feature = "parallel"))]
        for (row, line) in mask.axis_iter_mut(Axis(0)).enumerate() {
            self.fill_row(row, line, &shapes);
        }

        let inside = mask.iter().filter(|&&m| m).count();
        log::info!(
            "Polygon mask: {} of {} pixels inside ({:.2}%)",
            inside,
            mask.len(),
            coverage_percentage(&mask)
        );
        mask
    }

    /// Mask with every cell inside, used when polygon masking is disabled
    pub fn full(&self) -> CityMask {
        Array2::from_elem((self.height, self.width), true)
    }

    /// Columns of `rect` on this grid, clamped to the grid width
    fn column_range(&self, rect: &Rect<f64>) -> (usize, usize) {
        let (c0, _) = self.transform.to_pixel(rect.min().x, 0.0);
        let (c1, _) = self.transform.to_pixel(rect.max().x, 0.0);
        let start = (c0.min(c1).floor().max(0.0) as usize).min(self.width);
        let end = (c0.max(c1).ceil().max(0.0) as usize).min(self.width);
        (start, end)
    }

    fn fill_row(&self, row: usize, mut line: ArrayViewMut1<bool>, shapes: &[(&Polygon<f64>, Rect<f64>)]) {
        let (_, lat) = self.transform.pixel_center(row, 0);

        for (polygon, rect) in shapes {
            if lat < rect.min().y || lat > rect.max().y {
                continue;
            }
            let (start, end) = self.column_range(rect);
            for col in start..end {
                if line[col] {
                    continue;
                }
                let (lon, _) = self.transform.pixel_center(row, col);
                if polygon.contains(&Point::new(lon, lat)) {
                    line[col] = true;
                }
            }
        }
    }
}

/// Share of grid cells inside the mask, 0-100
pub fn coverage_percentage(mask: &CityMask) -> f64 {
    if mask.is_empty() {
        return 0.0;
    }
    mask.iter().filter(|&&m| m).count() as f64 / mask.len() as f64 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::GeoBoundingBox;
    use geo::{LineString, MultiPolygon, Polygon};

    fn unit_masker(size: usize) -> PolygonMasker {
        let bbox = GeoBoundingBox::new(0.0, 0.0, 1.0, 1.0).unwrap();
        PolygonMasker::new(GeoTransform::from_bounds(&bbox, size, size), size, size)
    }

    fn polygon(exterior: Vec<(f64, f64)>, holes: Vec<Vec<(f64, f64)>>) -> CityPolygon {
        CityPolygon::new(MultiPolygon(vec![Polygon::new(
            LineString::from(exterior),
            holes.into_iter().map(LineString::from).collect(),
        )]))
    }

    #[test]
    fn test_top_left_quadrant_is_2500_pixels() {
        let quadrant = polygon(vec![(0.0, 0.5), (0.5, 0.5), (0.5, 1.0), (0.0, 1.0), (0.0, 0.5)], vec![]);
        let mask = unit_masker(100).rasterize(&quadrant);

        assert_eq!(mask.iter().filter(|&&m| m).count(), 2500);
        assert!(mask[[0, 0]] && mask[[49, 49]]);
        assert!(!mask[[50, 0]] && !mask[[0, 50]]);
        assert!((coverage_percentage(&mask) - 25.0).abs() < 1e-12);
    }

    #[test]
    fn test_hole_is_excluded() {
        let donut = polygon(
            vec![(0.0, 0.0), (1.0, 0.0), (1.0, 1.0), (0.0, 1.0), (0.0, 0.0)],
            vec![vec![(0.25, 0.25), (0.75, 0.25), (0.75, 0.75), (0.25, 0.75), (0.25, 0.25)]],
        );
        let mask = unit_masker(100).rasterize(&donut);
        assert_eq!(mask.iter().filter(|&&m| m).count(), 10_000 - 2_500);
        assert!(!mask[[50, 50]]);
    }

    #[test]
    fn test_triangle_is_stable_across_runs() {
        let triangle = polygon(vec![(0.1, 0.1), (0.9, 0.2), (0.4, 0.95), (0.1, 0.1)], vec![]);
        let masker = unit_masker(64);
        let first = masker.rasterize(&triangle);
        let second = masker.rasterize(&triangle);
        assert_eq!(first, second);

        let count = first.iter().filter(|&&m| m).count() as f64;
        // Shoelace area 0.325 of the unit square
        assert!((count / 4096.0 - 0.325).abs() < 0.02);
    }

    #[test]
    fn test_disjoint_polygons_are_combined() {
        let west = Polygon::new(
            LineString::from(vec![(0.0, 0.0), (0.25, 0.0), (0.25, 1.0), (0.0, 1.0), (0.0, 0.0)]),
            vec![],
        );
        let east = Polygon::new(
            LineString::from(vec![(0.75, 0.0), (1.0, 0.0), (1.0, 1.0), (0.75, 1.0), (0.75, 0.0)]),
            vec![],
        );
        let mask = unit_masker(100).rasterize(&CityPolygon::new(MultiPolygon(vec![west, east])));

        assert_eq!(mask.iter().filter(|&&m| m).count(), 5000);
        assert!(mask[[10, 0]] && mask[[10, 99]]);
        assert!(!mask[[10, 50]]);
    }

    #[test]
    fn test_bbox_polygon_fills_grid() {
        let bbox = GeoBoundingBox::new(4.8, 45.7, 4.9, 45.8).unwrap();
        let masker = PolygonMasker::new(GeoTransform::from_bounds(&bbox, 32, 24), 32, 24);
        let mask = masker.rasterize(&CityPolygon::from_bbox(&bbox));
        assert!(mask.iter().all(|&m| m));
        assert_eq!(mask, masker.full());
    }
}
