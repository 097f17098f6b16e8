use crate::core::classify::{DensityTier, TierGrid};
use crate::types::{BandGrid, CityMask, NdviGrid};
use image::{Rgba, RgbaImage};

/// Overlay colors per density tier (RGBA)
pub const TIER_COLORS: [(DensityTier, [u8; 4]); 4] = [
    (DensityTier::Subtle, [230, 210, 255, 80]),
    (DensityTier::Low, [204, 153, 255, 120]),
    (DensityTier::Medium, [153, 102, 204, 150]),
    (DensityTier::High, [102, 51, 153, 180]),
];

const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

// Viridis sampled at nine evenly spaced stops
const VIRIDIS: [[u8; 3]; 9] = [
    [68, 1, 84],
    [71, 44, 122],
    [59, 81, 139],
    [44, 113, 142],
    [33, 144, 141],
    [39, 173, 129],
    [92, 200, 99],
    [170, 220, 50],
    [253, 231, 37],
];

/// Contrast stretch settings for a three-band composite
#[derive(Debug, Clone, Copy)]
pub struct Stretch {
    pub low_percentile: f64,
    pub high_percentile: f64,
    pub gamma: f64,
}

impl Stretch {
    /// NIR/red/green false color
    pub fn false_color() -> Self {
        Self { low_percentile: 1.0, high_percentile: 99.0, gamma: 0.8 }
    }

    pub fn natural_color() -> Self {
        Self { low_percentile: 2.0, high_percentile: 98.0, gamma: 1.0 }
    }
}

/// Linear-interpolated percentile of sorted values
pub fn percentile(sorted: &[f32], p: f64) -> f32 {
    if sorted.is_empty() {
        return f32::NAN;
    }
    let rank = (p / 100.0).clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    let frac = (rank - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}

fn viridis(t: f64) -> [u8; 3] {
    let t = t.clamp(0.0, 1.0) * (VIRIDIS.len() - 1) as f64;
    let i = (t.floor() as usize).min(VIRIDIS.len() - 2);
    let f = t - i as f64;
    let mut rgb = [0u8; 3];
    for k in 0..3 {
        let a = VIRIDIS[i][k] as f64;
        let b = VIRIDIS[i + 1][k] as f64;
        rgb[k] = (a + (b - a) * f).round() as u8;
    }
    rgb
}

/// Three bands stretched per channel; pixels with any missing band are transparent
pub fn composite(channels: [&BandGrid; 3], stretch: Stretch) -> RgbaImage {
    let (height, width) = channels[0].dim();
    let valid = |row: usize, col: usize| channels.iter().all(|c| c[[row, col]].is_finite());

    let mut limits = [(0.0f32, 1.0f32); 3];
    for (k, channel) in channels.iter().enumerate() {
        let mut values: Vec<f32> = channel
            .indexed_iter()
            .filter(|((r, c), _)| valid(*r, *c))
            .map(|(_, v)| *v)
            .collect();
        if values.is_empty() {
            continue;
        }
        values.sort_by(|a, b| a.total_cmp(b));
        limits[k] = (
            percentile(&values, stretch.low_percentile),
            percentile(&values, stretch.high_percentile),
        );
    }

    RgbaImage::from_fn(width as u32, height as u32, |x, y| {
        let (row, col) = (y as usize, x as usize);
        if !valid(row, col) {
            return TRANSPARENT;
        }
        let mut rgba = [0u8, 0, 0, 255];
        for k in 0..3 {
            let (lo, hi) = limits[k];
            let v = channels[k][[row, col]];
            let scaled = if hi > lo { ((v - lo) / (hi - lo)).clamp(0.0, 1.0) } else { 0.5 };
            rgba[k] = ((scaled as f64).powf(stretch.gamma) * 255.0).round() as u8;
        }
        Rgba(rgba)
    })
}

/// NDVI in [-1, 1] through the viridis ramp; NaN is transparent
pub fn ndvi_visualization(ndvi: &NdviGrid) -> RgbaImage {
    let (height, width) = ndvi.dim();
    RgbaImage::from_fn(width as u32, height as u32, |x, y| {
        let v = ndvi[[y as usize, x as usize]];
        if !v.is_finite() {
            return TRANSPARENT;
        }
        let [r, g, b] = viridis((v as f64 + 1.0) / 2.0);
        Rgba([r, g, b, 255])
    })
}

/// Tier colors inside the polygon, transparent elsewhere
pub fn tier_overlay(tiers: &TierGrid, mask: &CityMask) -> RgbaImage {
    let (height, width) = tiers.dim();
    RgbaImage::from_fn(width as u32, height as u32, |x, y| {
        let (row, col) = (y as usize, x as usize);
        if !mask[[row, col]] {
            return TRANSPARENT;
        }
        TIER_COLORS
            .iter()
            .find(|(tier, _)| *tier == tiers[[row, col]])
            .map(|(_, color)| Rgba(*color))
            .unwrap_or(TRANSPARENT)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    #[test]
    fn test_percentile_interpolates() {
        let values: Vec<f32> = (0..=100).map(|v| v as f32).collect();
        assert_eq!(percentile(&values, 2.0), 2.0);
        assert_eq!(percentile(&values, 98.0), 98.0);
        assert_eq!(percentile(&[1.0, 3.0], 50.0), 2.0);
    }

    #[test]
    fn test_viridis_endpoints() {
        assert_eq!(viridis(0.0), [68, 1, 84]);
        assert_eq!(viridis(1.0), [253, 231, 37]);
        assert_eq!(viridis(0.5), [33, 144, 141]);
    }

    #[test]
    fn test_overlay_colors_and_transparency() {
        let tiers = Array2::from_shape_vec(
            (1, 4),
            vec![DensityTier::High, DensityTier::Subtle, DensityTier::None, DensityTier::High],
        )
        .unwrap();
        let mask = Array2::from_shape_vec((1, 4), vec![true, true, true, false]).unwrap();
        let image = tier_overlay(&tiers, &mask);

        assert_eq!(image.get_pixel(0, 0).0, [102, 51, 153, 180]);
        assert_eq!(image.get_pixel(1, 0).0, [230, 210, 255, 80]);
        assert_eq!(image.get_pixel(2, 0).0[3], 0);
        assert_eq!(image.get_pixel(3, 0).0[3], 0);
    }

    #[test]
    fn test_composite_masks_missing_pixels() {
        let mut nir = Array2::from_shape_fn((10, 10), |(r, c)| (r * 10 + c) as f32);
        nir[[0, 0]] = f32::NAN;
        let red = Array2::from_elem((10, 10), 0.2f32);
        let green = Array2::from_shape_fn((10, 10), |(r, _)| r as f32);

        let image = composite([&nir, &red, &green], Stretch::false_color());
        assert_eq!(image.get_pixel(0, 0).0[3], 0);
        let pixel = image.get_pixel(9, 9).0;
        assert_eq!((pixel[0], pixel[2], pixel[3]), (255, 255, 255));
        // Constant red channel sits at mid-grey before gamma
        assert_eq!(pixel[1], (0.5f64.powf(0.8) * 255.0).round() as u8);
    }
}
