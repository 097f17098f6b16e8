use crate::types::{BandGrid, GreenError, GreenResult};
use ndarray::Array2;

/// Keys cubic convolution parameter
const CUBIC_A: f64 = -0.5;

/// Grid sampling kernels; coordinates are in array index space where
/// pixel (r, c) has its center at (x = c, y = r)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Kernel {
    Nearest,
    Bilinear,
    Cubic,
}

impl Kernel {
    pub fn sample(&self, grid: &BandGrid, x: f64, y: f64) -> f32 {
        match self {
            Kernel::Nearest => nearest(grid, x, y),
            Kernel::Bilinear => {
                let v = bilinear(grid, x, y);
                if v.is_nan() { nearest(grid, x, y) } else { v }
            }
            Kernel::Cubic => {
                let v = cubic(grid, x, y);
                if !v.is_nan() {
                    return v;
                }
                let v = bilinear(grid, x, y);
                if v.is_nan() { nearest(grid, x, y) } else { v }
            }
        }
    }
}

fn inside(grid: &BandGrid, x: f64, y: f64) -> bool {
    let (rows, cols) = grid.dim();
    x >= -0.5 && y >= -0.5 && x < cols as f64 - 0.5 && y < rows as f64 - 0.5
}

fn clamp_index(i: isize, n: usize) -> usize {
    i.clamp(0, n as isize - 1) as usize
}

fn nearest(grid: &BandGrid, x: f64, y: f64) -> f32 {
    if !inside(grid, x, y) {
        return f32::NAN;
    }
    let (rows, cols) = grid.dim();
    grid[[clamp_index(y.round() as isize, rows), clamp_index(x.round() as isize, cols)]]
}

fn bilinear(grid: &BandGrid, x: f64, y: f64) -> f32 {
    if !inside(grid, x, y) {
        return f32::NAN;
    }
    let (rows, cols) = grid.dim();
    let x0 = x.floor();
    let y0 = y.floor();
    let dx = x - x0;
    let dy = y - y0;
    let c0 = clamp_index(x0 as isize, cols);
    let c1 = clamp_index(x0 as isize + 1, cols);
    let r0 = clamp_index(y0 as isize, rows);
    let r1 = clamp_index(y0 as isize + 1, rows);

    let v00 = grid[[r0, c0]] as f64;
    let v01 = grid[[r0, c1]] as f64;
    let v10 = grid[[r1, c0]] as f64;
    let v11 = grid[[r1, c1]] as f64;

    (v00 * (1.0 - dx) * (1.0 - dy) + v01 * dx * (1.0 - dy) + v10 * (1.0 - dx) * dy + v11 * dx * dy)
        as f32
}

fn cubic_weight(t: f64) -> f64 {
    let t = t.abs();
    if t <= 1.0 {
        (CUBIC_A + 2.0) * t * t * t - (CUBIC_A + 3.0) * t * t + 1.0
    } else if t < 2.0 {
        CUBIC_A * t * t * t - 5.0 * CUBIC_A * t * t + 8.0 * CUBIC_A * t - 4.0 * CUBIC_A
    } else {
        0.0
    }
}

fn cubic(grid: &BandGrid, x: f64, y: f64) -> f32 {
    if !inside(grid, x, y) {
        return f32::NAN;
    }
    let (rows, cols) = grid.dim();
    let x0 = x.floor();
    let y0 = y.floor();
    let dx = x - x0;
    let dy = y - y0;

    let mut sum = 0.0;
    for m in -1..=2isize {
        let wy = cubic_weight(m as f64 - dy);
        let r = clamp_index(y0 as isize + m, rows);
        for n in -1..=2isize {
            let wx = cubic_weight(n as f64 - dx);
            let v = grid[[r, clamp_index(x0 as isize + n, cols)]];
            if v.is_nan() {
                return f32::NAN;
            }
            sum += wx * wy * v as f64;
        }
    }
    sum as f32
}

/// Build a grid cell by cell, in parallel when the feature is on
pub fn build_grid<F>(height: usize, width: usize, cell: F) -> GreenResult<BandGrid>
where
    F: Fn(usize, usize) -> f32 + Sync + Send,
{
    #[cfg(feature = "parallel")]
    let values: Vec<f32> = {
        use rayon::prelude::*;
        (0..height)
            .into_par_iter()
            .flat_map_iter(|i| (0..width).map(move |j| (i, j)))
            .map(|(i, j)| cell(i, j))
            .collect()
    };

    #[cfg(not(feature = "parallel"))]
    let values: Vec<f32> = (0..height)
        .flat_map(|i| (0..width).map(move |j| (i, j)))
        .map(|(i, j)| cell(i, j))
        .collect();

    Array2::from_shape_vec((height, width), values)
        .map_err(|e| GreenError::Processing(format!("Shape error: {}", e)))
}

/// Shrink `grid` by an integer `factor`, sampling each output cell's center
pub fn decimate(grid: &BandGrid, factor: usize, kernel: Kernel) -> GreenResult<BandGrid> {
    let (rows, cols) = grid.dim();
    if factor <= 1 {
        return Ok(grid.clone());
    }
    let height = rows / factor;
    let width = cols / factor;
    let f = factor as f64;
    build_grid(height, width, |i, j| {
        let x = (j as f64 + 0.5) * f - 0.5;
        let y = (i as f64 + 0.5) * f - 0.5;
        kernel.sample(grid, x, y)
    })
}
