use crate::error::{AnalyticsError, Result};
use serde::{Deserialize, Serialize};

/// Tunables of the analytics core.
///
/// Defaults are the reference constants; a deployment may override them from
/// a JSON file, but they are fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalyticsConfig {
    /// Minimum detector confidence for a person box (exclusive)
    #[serde(default = "default_confidence")]
    pub confidence_threshold: f32,

    /// Occupancy at or above which a grid cell counts as congested
    #[serde(default = "default_cell_density_threshold")]
    pub cell_density_threshold: u32,

    /// Minimum congested dwell time, in seconds, for a batch event
    #[serde(default = "default_unsafe_duration")]
    pub unsafe_duration_secs: f64,

    #[serde(default = "default_grid_min")]
    pub grid_min: usize,

    #[serde(default = "default_grid_max")]
    pub grid_max: usize,

    /// Grid size used until person heights are observed
    #[serde(default = "default_grid")]
    pub default_grid: usize,

    /// Person-heights per cell edge when sizing the grid
    #[serde(default = "default_grid_scale_factor")]
    pub grid_scale_factor: f32,

    #[serde(default = "default_prediction_horizon")]
    pub prediction_horizon_secs: f64,

    /// Number of grids kept for forecasting; forecasts need a full window
    #[serde(default = "default_prediction_history")]
    pub prediction_history_frames: usize,

    /// Live mode analyses one frame out of every `live_frame_skip + 1`
    #[serde(default = "default_live_frame_skip")]
    pub live_frame_skip: u32,

    /// Trail displacement (px) above which movement is drawn yellow
    #[serde(default = "default_speed_low")]
    pub speed_threshold_low: f32,

    /// Trail displacement (px) above which movement is drawn red
    #[serde(default = "default_speed_high")]
    pub speed_threshold_high: f32,

    /// Live heatmap/forecast/chart cadence, in processed frames
    #[serde(default = "default_snapshot_interval")]
    pub snapshot_interval_frames: u64,

    /// Gaussian sigma (px) applied to the accumulated heat
    #[serde(default = "default_heat_sigma")]
    pub heat_sigma: f32,

    /// Percentile of blurred heat used as the colour saturation point
    #[serde(default = "default_heat_percentile")]
    pub heat_saturation_percentile: f32,

    #[serde(default = "default_trail_length")]
    pub trail_length: usize,

    /// A trail needs more than this many anchors before an arrow is drawn
    #[serde(default = "default_trail_min_samples")]
    pub trail_min_samples: usize,

    /// Length of the batch warm-up pass that seeds the grid size
    #[serde(default = "default_warmup")]
    pub warmup_secs: f64,

    /// Minimum wall-clock spacing between live grid recomputations
    #[serde(default = "default_live_grid_interval")]
    pub live_grid_recompute_secs: u64,

    /// Frame rate assumed for live sources and videos that do not report one
    #[serde(default = "default_fps")]
    pub default_fps: f64,
}

fn default_confidence() -> f32 {
    0.65
}

fn default_cell_density_threshold() -> u32 {
    6
}

fn default_unsafe_duration() -> f64 {
    1.5
}

fn default_grid_min() -> usize {
    3
}

fn default_grid_max() -> usize {
    8
}

fn default_grid() -> usize {
    4
}

fn default_grid_scale_factor() -> f32 {
    1.5
}

fn default_prediction_horizon() -> f64 {
    30.0
}

fn default_prediction_history() -> usize {
    45
}

fn default_live_frame_skip() -> u32 {
    2
}

fn default_speed_low() -> f32 {
    15.0
}

fn default_speed_high() -> f32 {
    50.0
}

fn default_snapshot_interval() -> u64 {
    50
}

fn default_heat_sigma() -> f32 {
    20.0
}

fn default_heat_percentile() -> f32 {
    99.9
}

fn default_trail_length() -> usize {
    15
}

fn default_trail_min_samples() -> usize {
    10
}

fn default_warmup() -> f64 {
    3.0
}

fn default_live_grid_interval() -> u64 {
    10
}

fn default_fps() -> f64 {
    25.0
}

impl Default for AnalyticsConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: default_confidence(),
            cell_density_threshold: default_cell_density_threshold(),
            unsafe_duration_secs: default_unsafe_duration(),
            grid_min: default_grid_min(),
            grid_max: default_grid_max(),
            default_grid: default_grid(),
            grid_scale_factor: default_grid_scale_factor(),
            prediction_horizon_secs: default_prediction_horizon(),
            prediction_history_frames: default_prediction_history(),
            live_frame_skip: default_live_frame_skip(),
            speed_threshold_low: default_speed_low(),
            speed_threshold_high: default_speed_high(),
            snapshot_interval_frames: default_snapshot_interval(),
            heat_sigma: default_heat_sigma(),
            heat_saturation_percentile: default_heat_percentile(),
            trail_length: default_trail_length(),
            trail_min_samples: default_trail_min_samples(),
            warmup_secs: default_warmup(),
            live_grid_recompute_secs: default_live_grid_interval(),
            default_fps: default_fps(),
        }
    }
}

impl AnalyticsConfig {
    pub fn validate(&self) -> Result<()> {
        let fail = |msg: String| Err(AnalyticsError::InvalidConfig(msg));

        if !(0.0..=1.0).contains(&self.confidence_threshold) {
            return fail(format!(
                "confidence_threshold must be within [0, 1], got {}",
                self.confidence_threshold
            ));
        }
        if self.cell_density_threshold == 0 {
            return fail("cell_density_threshold must be at least 1".to_string());
        }
        if !self.unsafe_duration_secs.is_finite() || self.unsafe_duration_secs < 0.0 {
            return fail(format!(
                "unsafe_duration_secs must be non-negative, got {}",
                self.unsafe_duration_secs
            ));
        }
        if self.grid_min == 0 || self.grid_min > self.grid_max {
            return fail(format!(
                "grid bounds must satisfy 1 <= grid_min <= grid_max, got {}..={}",
                self.grid_min, self.grid_max
            ));
        }
        if !(self.grid_min..=self.grid_max).contains(&self.default_grid) {
            return fail(format!(
                "default_grid {} is outside {}..={}",
                self.default_grid, self.grid_min, self.grid_max
            ));
        }
        if !self.grid_scale_factor.is_finite() || self.grid_scale_factor <= 0.0 {
            return fail("grid_scale_factor must be positive".to_string());
        }
        if !self.prediction_horizon_secs.is_finite() || self.prediction_horizon_secs < 0.0 {
            return fail("prediction_horizon_secs must be non-negative".to_string());
        }
        if self.prediction_history_frames < 2 {
            return fail(format!(
                "prediction_history_frames needs at least 2 grids to derive a velocity, got {}",
                self.prediction_history_frames
            ));
        }
        if self.speed_threshold_low > self.speed_threshold_high {
            return fail("speed_threshold_low must not exceed speed_threshold_high".to_string());
        }
        if self.snapshot_interval_frames == 0 {
            return fail("snapshot_interval_frames must be at least 1".to_string());
        }
        if !self.heat_sigma.is_finite() || self.heat_sigma <= 0.0 {
            return fail("heat_sigma must be positive".to_string());
        }
        if !(0.0..=100.0).contains(&self.heat_saturation_percentile) {
            return fail("heat_saturation_percentile must be within [0, 100]".to_string());
        }
        if self.trail_length == 0 {
            return fail("trail_length must be at least 1".to_string());
        }
        if !self.warmup_secs.is_finite() || self.warmup_secs < 0.0 {
            return fail("warmup_secs must be non-negative".to_string());
        }
        if !self.default_fps.is_finite() || self.default_fps <= 0.0 {
            return fail("default_fps must be positive".to_string());
        }

        Ok(())
    }

    /// Number of frames in the batch warm-up pass at the given frame rate.
    pub fn warmup_frames(&self, fps: f64) -> usize {
        (fps * self.warmup_secs).max(0.0) as usize
    }
}
