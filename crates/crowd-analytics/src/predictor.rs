use crate::density_grid::{CellCoord, DensityGrid};
use common::crowd::RiskLevel;
use ndarray::{s, stack, Array2, ArrayView2, Axis};
use std::collections::VecDeque;

/// Extra weight on the observed velocity when extrapolating.
const VELOCITY_GAIN: f64 = 1.5;

#[derive(Debug, Clone, PartialEq)]
pub struct PredictionResult {
    /// Forecast occupancy per cell, never negative
    pub forecast: Array2<f32>,
    /// Cells forecast at or above the density threshold, row-major
    pub high_risk_cells: Vec<CellCoord>,
    pub expected_max_density: u32,
}

impl PredictionResult {
    pub fn risk_level(&self) -> RiskLevel {
        if self.high_risk_cells.is_empty() {
            RiskLevel::Low
        } else {
            RiskLevel::High
        }
    }

    /// High-risk cells as `[row, col]` pairs.
    pub fn high_risk_zones(&self) -> Vec<[usize; 2]> {
        self.high_risk_cells.iter().map(|c| [c.row, c.col]).collect()
    }
}

/// Linear extrapolation over a bounded window of recent grids.
///
/// Deliberately simple: the per-cell velocity is the mean frame-to-frame
/// change over the window, projected forward to the horizon.
#[derive(Debug, Clone)]
pub struct DensityPredictor {
    history: VecDeque<Array2<f64>>,
    capacity: usize,
    horizon_secs: f64,
    threshold: u32,
}

impl DensityPredictor {
    pub fn new(capacity: usize, horizon_secs: f64, threshold: u32) -> Self {
        Self {
            history: VecDeque::with_capacity(capacity),
            capacity: capacity.max(2),
            horizon_secs,
            threshold,
        }
    }

    pub fn len(&self) -> usize {
        self.history.len()
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    pub fn is_ready(&self) -> bool {
        self.history.len() >= self.capacity
    }

    /// Append a grid, evicting the oldest when full. A grid of a different
    /// shape starts a new window.
    pub fn push(&mut self, grid: &DensityGrid) {
        let counts = grid.counts().mapv(f64::from);
        if self
            .history
            .back()
            .is_some_and(|last| last.dim() != counts.dim())
        {
            tracing::debug!("grid shape changed, discarding forecast history");
            self.history.clear();
        }
        if self.history.len() == self.capacity {
            self.history.pop_front();
        }
        self.history.push_back(counts);
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Forecast `horizon_secs` ahead, or `None` until the window is full.
    pub fn forecast(&self, fps: f64) -> Option<PredictionResult> {
        if !self.is_ready() {
            return None;
        }

        let views: Vec<ArrayView2<f64>> = self.history.iter().map(|g| g.view()).collect();
        let stacked = stack(Axis(0), &views).ok()?;
        let diffs = &stacked.slice(s![1.., .., ..]) - &stacked.slice(s![..-1, .., ..]);
        let velocity = diffs.mean_axis(Axis(0))?;

        let steps = (self.horizon_secs * fps).trunc();
        let last = self.history.back()?;
        let projected = last + &(velocity * (VELOCITY_GAIN * steps));
        let forecast = projected.mapv(|v| v.max(0.0));

        let threshold = f64::from(self.threshold);
        let high_risk_cells = forecast
            .indexed_iter()
            .filter(|(_, v)| **v >= threshold)
            .map(|((row, col), _)| CellCoord::new(row, col))
            .collect();
        let peak = forecast.iter().copied().fold(0.0_f64, f64::max);

        Some(PredictionResult {
            forecast: forecast.mapv(|v| v as f32),
            high_risk_cells,
            expected_max_density: peak as u32,
        })
    }
}
