//! Heatmap synthesis.
//!
//! Two products: a per-frame overlay rendered from the small density grid,
//! and a full-resolution accumulator of anchor hits that is blurred and
//! colourised on demand.

use crate::density_grid::{DensityGrid, Placement};
use image::{Rgb, RgbImage};
use ndarray::{Array1, Array2};

/// Colour of the "no forecast data" placeholder.
pub const FORECAST_PLACEHOLDER: Rgb<u8> = Rgb([150, 0, 0]);

/// Smallest overlay blur kernel.
const MIN_OVERLAY_KERNEL: usize = 5;

/// Accumulator blur extends this many sigmas either side.
const HEAT_TRUNCATE_SIGMAS: f32 = 4.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlayKind {
    /// Current occupancy; an empty grid renders black
    Density,
    /// Predicted occupancy; an empty grid renders the red placeholder
    Forecast,
}

/// Blue-to-red "jet" ramp.
pub fn jet(value: u8) -> Rgb<u8> {
    let x = f32::from(value) / 255.0;
    let channel = |offset: f32| {
        let v = (1.5 - (4.0 * x - offset).abs()).clamp(0.0, 1.0);
        (v * 255.0).round() as u8
    };
    Rgb([channel(3.0), channel(2.0), channel(1.0)])
}

/// Odd blur kernel proportional to the cell width, at least 5.
pub fn overlay_kernel_size(width: u32, cols: usize) -> usize {
    let half_cell = (f64::from(width) / cols.max(1) as f64 / 2.0).floor() as usize;
    (half_cell * 2 + 1).max(MIN_OVERLAY_KERNEL)
}

/// Gaussian kernel for a fixed size; sigma is derived from the size the
/// same way common imaging libraries do when none is given.
fn sized_gaussian_kernel(size: usize) -> Array1<f32> {
    let sigma = 0.3 * ((size as f32 - 1.0) * 0.5 - 1.0) + 0.8;
    gaussian_kernel((size / 2) as isize, sigma)
}

fn gaussian_kernel(radius: isize, sigma: f32) -> Array1<f32> {
    let denom = 2.0 * sigma * sigma;
    let raw: Array1<f32> = (-radius..=radius)
        .map(|i| (-((i * i) as f32) / denom).exp())
        .collect();
    let sum = raw.sum();
    raw / sum
}

/// Mirror index without repeating the edge sample (`d c b | a b c d`).
fn reflect_101(i: isize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = 2 * n as isize - 2;
    let m = i.rem_euclid(period) as usize;
    if m >= n {
        period as usize - m
    } else {
        m
    }
}

/// Mirror index repeating the edge sample (`c b a | a b c`).
fn reflect_symmetric(i: isize, n: usize) -> usize {
    if n <= 1 {
        return 0;
    }
    let period = 2 * n as isize;
    let m = i.rem_euclid(period) as usize;
    if m >= n {
        period as usize - 1 - m
    } else {
        m
    }
}

/// Weights mapping grid cells onto output pixels along one axis: a
/// nearest-neighbour upscale followed by the blur kernel, folded into a
/// single `(pixels, cells)` matrix.
fn upscale_blur_weights(pixels: u32, cells: usize, kernel: &Array1<f32>) -> Array2<f32> {
    let len = pixels as usize;
    let radius = (kernel.len() / 2) as isize;
    let mut weights = Array2::<f32>::zeros((len, cells));

    for p in 0..len {
        for (k, g) in kernel.iter().enumerate() {
            let src = reflect_101(p as isize + k as isize - radius, len);
            let cell = (src * cells / len).min(cells - 1);
            weights[[p, cell]] += *g;
        }
    }
    weights
}

/// Render a grid of (possibly fractional) counts as a smooth colour overlay
/// the size of the frame.
pub fn render_overlay(grid: &Array2<f32>, width: u32, height: u32, kind: OverlayKind) -> RgbImage {
    let (rows, cols) = grid.dim();
    let peak = grid.iter().copied().fold(f32::NEG_INFINITY, f32::max);

    if rows == 0 || cols == 0 || width == 0 || height == 0 || !(peak > 0.0) {
        return match kind {
            OverlayKind::Density => RgbImage::new(width, height),
            OverlayKind::Forecast => RgbImage::from_pixel(width, height, FORECAST_PLACEHOLDER),
        };
    }

    let kernel = sized_gaussian_kernel(overlay_kernel_size(width, cols));
    let wy = upscale_blur_weights(height, rows, &kernel);
    let wx = upscale_blur_weights(width, cols, &kernel);
    let blurred = wy.dot(grid).dot(&wx.t());

    let lo = blurred.iter().copied().fold(f32::INFINITY, f32::min);
    let hi = blurred.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    // a flat field (up to rounding noise from the weight sums) maps to zero
    let scale = if hi - lo > hi.abs().max(1.0) * 1e-5 {
        255.0 / (hi - lo)
    } else {
        0.0
    };

    RgbImage::from_fn(width, height, |x, y| {
        let v = (blurred[[y as usize, x as usize]] - lo) * scale;
        jet(v.round().clamp(0.0, 255.0) as u8)
    })
}

/// Overlay for a frame's occupancy counts.
pub fn density_overlay(grid: &DensityGrid, width: u32, height: u32) -> RgbImage {
    let counts = grid.counts().mapv(|c| c as f32);
    render_overlay(&counts, width, height, OverlayKind::Density)
}

/// Linear-interpolated percentile of an unsorted sample (`p` in 0..=100).
pub fn percentile(values: &mut [f32], p: f32) -> Option<f32> {
    if values.is_empty() {
        return None;
    }
    let rank = (p.clamp(0.0, 100.0) / 100.0) * (values.len() - 1) as f32;
    let lo_idx = rank.floor() as usize;
    let hi_idx = (lo_idx + 1).min(values.len() - 1);
    let frac = rank - lo_idx as f32;

    let (_, lo, upper) = values.select_nth_unstable_by(lo_idx, f32::total_cmp);
    let lo = *lo;
    let hi = if hi_idx == lo_idx {
        lo
    } else {
        // the next order statistic is the minimum of the upper partition
        upper.iter().copied().fold(f32::INFINITY, f32::min)
    };
    Some(lo + (hi - lo) * frac)
}

/// Per-session full-resolution heat, never reset while the session lives.
#[derive(Debug, Clone)]
pub struct HeatAccumulator {
    heat: Array2<f32>,
    deposits: u64,
}

impl HeatAccumulator {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            heat: Array2::zeros((height as usize, width as usize)),
            deposits: 0,
        }
    }

    /// `(width, height)` the accumulator was sized for.
    pub fn dimensions(&self) -> (u32, u32) {
        let (h, w) = self.heat.dim();
        (w as u32, h as u32)
    }

    /// Add one unit of heat at an anchor pixel; anchors outside are ignored.
    pub fn deposit(&mut self, x: i32, y: i32) {
        let (Ok(x), Ok(y)) = (usize::try_from(x), usize::try_from(y)) else {
            return;
        };
        if let Some(cell) = self.heat.get_mut([y, x]) {
            *cell += 1.0;
            self.deposits += 1;
        }
    }

    /// Deposit every binned anchor of a frame.
    pub fn deposit_placements(&mut self, placements: &[Placement]) {
        for p in placements.iter().filter(|p| p.cell.is_some()) {
            self.deposit(p.anchor.0, p.anchor.1);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.deposits == 0
    }

    pub fn deposits(&self) -> u64 {
        self.deposits
    }

    pub fn heat(&self) -> &Array2<f32> {
        &self.heat
    }

    /// Blur, saturate at the given percentile and colourise.
    ///
    /// Returns `None` when nothing has been deposited or the saturation
    /// point is not positive.
    pub fn snapshot(&self, sigma: f32, saturation_percentile: f32) -> Option<RgbImage> {
        if self.is_empty() {
            return None;
        }

        let blurred = blur_symmetric(&self.heat, sigma);
        let mut samples: Vec<f32> = blurred.iter().copied().collect();
        let vmax = percentile(&mut samples, saturation_percentile)?;
        if !(vmax > 0.0) {
            return None;
        }

        let (w, h) = self.dimensions();
        Some(RgbImage::from_fn(w, h, |x, y| {
            let v = blurred[[y as usize, x as usize]].clamp(0.0, vmax);
            // truncating conversion, matching integer image casts
            jet((255.0 * v / vmax) as u8)
        }))
    }
}

/// Separable Gaussian blur with symmetric borders, skipping all-zero rows.
fn blur_symmetric(input: &Array2<f32>, sigma: f32) -> Array2<f32> {
    let (h, w) = input.dim();
    let radius = (HEAT_TRUNCATE_SIGMAS * sigma + 0.5) as isize;
    let kernel = gaussian_kernel(radius, sigma);

    let mut horizontal = Array2::<f32>::zeros((h, w));
    let mut live_rows = vec![false; h];
    for (y, row) in input.rows().into_iter().enumerate() {
        if row.iter().all(|v| *v == 0.0) {
            continue;
        }
        live_rows[y] = true;
        let mut out = horizontal.row_mut(y);
        for x in 0..w {
            out[x] = kernel
                .iter()
                .enumerate()
                .map(|(k, g)| g * row[reflect_symmetric(x as isize + k as isize - radius, w)])
                .sum();
        }
    }

    let mut output = Array2::<f32>::zeros((h, w));
    for y in 0..h {
        let mut out = output.row_mut(y);
        for (k, g) in kernel.iter().enumerate() {
            let src = reflect_symmetric(y as isize + k as isize - radius, h);
            if live_rows[src] {
                out.scaled_add(*g, &horizontal.row(src));
            }
        }
    }
    output
}
