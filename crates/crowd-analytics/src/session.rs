//! Per-session orchestration of the analytics components.
//!
//! One [`AnalyticsSession`] owns every piece of mutable state for a single
//! batch job or live connection. Frames must be fed strictly in order.

use crate::config::AnalyticsConfig;
use crate::density_grid::{DensityGrid, Placement};
use crate::error::{AnalyticsError, Result};
use crate::grid_sizer::GridSizer;
use crate::heatmap::{render_overlay, HeatAccumulator, OverlayKind};
use crate::policy::{AlertEmission, GridRecompute, SessionMode, SessionPolicy};
use crate::predictor::{DensityPredictor, PredictionResult};
use crate::summary;
use crate::trails::{Motion, TrackTrails};
use crate::zone_state::{live_alert, UnsafeEvent, ZoneStateTracker};
use common::crowd::{AlertMessage, CountSummary, GridDimensions, SecondCount, Track};
use image::RgbImage;
use ndarray::Array2;
use std::time::Instant;

/// Periodic extras attached to every `snapshot_interval`-th frame.
#[derive(Debug, Clone)]
pub struct PeriodicSnapshot {
    /// Colourised accumulated heat, absent while nothing has been seen
    pub heatmap: Option<RgbImage>,
    /// Absent until the forecast window has filled
    pub prediction: Option<PredictionResult>,
    /// Mean people count since the previous snapshot, two decimals
    pub mean_count: Option<f64>,
}

/// Output of one analysed frame.
#[derive(Debug, Clone)]
pub struct FrameResult {
    /// 1-based position of the frame in the session
    pub frame_index: u64,
    /// Whether fresh tracks were supplied rather than reused
    pub detected: bool,
    pub grid: DensityGrid,
    pub placements: Vec<Placement>,
    pub total_count: usize,
    pub alerts: Vec<AlertMessage>,
    /// Debounced events that ended on this frame
    pub closed_events: Vec<UnsafeEvent>,
    pub motions: Vec<Motion>,
    pub snapshot: Option<PeriodicSnapshot>,
}

impl FrameResult {
    pub fn grid_dimensions(&self) -> GridDimensions {
        self.grid.dimensions()
    }

    pub fn grid_counts(&self) -> Vec<Vec<u32>> {
        self.grid.to_rows()
    }
}

/// Everything a finished session reports.
#[derive(Debug, Clone)]
pub struct SessionSummary {
    pub frames: u64,
    /// Completed events, including those force-closed at the last frame
    pub events: Vec<UnsafeEvent>,
    pub alerts: Vec<AlertMessage>,
    pub counts: CountSummary,
    pub people_count_by_second: Vec<SecondCount>,
    pub grid_counts_over_time: Vec<Vec<Vec<u32>>>,
    pub grid_dimensions: GridDimensions,
    pub prediction: Option<PredictionResult>,
    /// Forecast overlay; the placeholder when no forecast was possible
    pub prediction_overlay: Option<RgbImage>,
    pub heatmap: Option<RgbImage>,
}

pub struct AnalyticsSession {
    config: AnalyticsConfig,
    policy: SessionPolicy,
    fps: f64,
    sizer: GridSizer,
    zones: ZoneStateTracker,
    predictor: DensityPredictor,
    trails: TrackTrails,
    heat: Option<HeatAccumulator>,
    frame_index: u64,
    last_tracks: Vec<Track>,
    last_grid_recompute: Option<Instant>,
    counts_per_frame: Vec<usize>,
    counts_since_snapshot: Vec<usize>,
    grid_counts_over_time: Vec<Vec<Vec<u32>>>,
    events: Vec<UnsafeEvent>,
}

impl AnalyticsSession {
    pub fn new(config: AnalyticsConfig, policy: SessionPolicy, fps: f64) -> Result<Self> {
        config.validate()?;
        if !fps.is_finite() || fps <= 0.0 {
            return Err(AnalyticsError::InvalidConfig(format!(
                "frame rate must be positive, got {}",
                fps
            )));
        }

        Ok(Self {
            sizer: GridSizer::new(&config),
            zones: ZoneStateTracker::new(
                policy.alert_emission,
                config.cell_density_threshold,
                config.unsafe_duration_secs,
                fps,
            ),
            predictor: DensityPredictor::new(
                config.prediction_history_frames,
                config.prediction_horizon_secs,
                config.cell_density_threshold,
            ),
            trails: TrackTrails::new(
                config.trail_length,
                config.trail_min_samples,
                config.speed_threshold_low,
                config.speed_threshold_high,
            ),
            heat: None,
            frame_index: 0,
            last_tracks: Vec::new(),
            last_grid_recompute: None,
            counts_per_frame: Vec::new(),
            counts_since_snapshot: Vec::new(),
            grid_counts_over_time: Vec::new(),
            events: Vec::new(),
            config,
            policy,
            fps,
        })
    }

    pub fn config(&self) -> &AnalyticsConfig {
        &self.config
    }

    pub fn policy(&self) -> &SessionPolicy {
        &self.policy
    }

    pub fn fps(&self) -> f64 {
        self.fps
    }

    pub fn grid_size(&self) -> usize {
        self.sizer.current()
    }

    /// Number of frames analysed so far.
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn zone_state(&self) -> &ZoneStateTracker {
        &self.zones
    }

    pub fn predictor(&self) -> &DensityPredictor {
        &self.predictor
    }

    pub fn heat(&self) -> Option<&HeatAccumulator> {
        self.heat.as_ref()
    }

    /// Whether the next frame should get fresh detections.
    pub fn needs_detection(&self) -> bool {
        self.policy.runs_detection(self.frame_index + 1)
    }

    /// Fix the grid size from a warm-up sample of person heights.
    pub fn seed_grid(&mut self, person_heights: &[f32], frame_height: u32) -> usize {
        let size = self.sizer.recompute(person_heights, frame_height);
        tracing::info!(
            grid_size = size,
            samples = person_heights.len(),
            "grid size seeded from warm-up"
        );
        size
    }

    /// Recompute the grid on the live cadence. Returns `true` when the grid
    /// size changed, in which case zone state and forecast history restart.
    pub fn maybe_recompute_grid(&mut self, person_heights: &[f32], frame_height: u32, now: Instant) -> bool {
        let GridRecompute::Interval(interval) = self.policy.grid_recompute else {
            return false;
        };
        let due = self
            .last_grid_recompute
            .map_or(true, |last| now.saturating_duration_since(last) > interval);
        if !due {
            return false;
        }
        self.last_grid_recompute = Some(now);

        let before = self.sizer.current();
        let after = self.sizer.recompute(person_heights, frame_height);
        if before == after {
            return false;
        }

        tracing::info!(from = before, to = after, "grid resized, resetting zone state");
        self.zones.reset();
        self.predictor.clear();
        true
    }

    /// Analyse the next frame.
    ///
    /// `tracks` carries fresh confirmed tracks when detection ran for this
    /// frame; `None` reuses the most recent ones.
    pub fn analyze_frame(&mut self, tracks: Option<Vec<Track>>, frame_width: u32, frame_height: u32) -> Result<FrameResult> {
        if frame_width == 0 || frame_height == 0 {
            return Err(AnalyticsError::EmptyFrame {
                width: frame_width,
                height: frame_height,
            });
        }
        let heat = self
            .heat
            .get_or_insert_with(|| HeatAccumulator::new(frame_width, frame_height));
        let (expected_width, expected_height) = heat.dimensions();
        if (expected_width, expected_height) != (frame_width, frame_height) {
            return Err(AnalyticsError::FrameSizeChanged {
                expected_width,
                expected_height,
                width: frame_width,
                height: frame_height,
            });
        }

        self.frame_index += 1;
        let frame_index = self.frame_index;
        let detected = tracks.is_some();
        if let Some(fresh) = tracks {
            self.last_tracks = fresh;
        }

        let grid_size = self.sizer.current();
        let binning = DensityGrid::bin(&self.last_tracks, frame_width, frame_height, grid_size);
        heat.deposit_placements(&binning.placements);
        self.predictor.push(&binning.grid);

        let update = self.zones.update(&binning.grid, frame_index);
        let alerts: Vec<AlertMessage> = match self.policy.alert_emission {
            AlertEmission::Immediate => update
                .entered
                .iter()
                .map(|cell| live_alert(*cell, grid_size))
                .collect(),
            AlertEmission::Debounced => Vec::new(),
        };
        if !alerts.is_empty() {
            tracing::info!(frame_index, alerts = alerts.len(), "congestion alerts raised");
        }
        self.events.extend(update.closed.iter().cloned());

        let motions = self.trails.update(&self.last_tracks);
        let total_count = self.last_tracks.len();
        // Per-frame history feeds only the batch report; live sessions keep
        // the counts since the last snapshot and nothing else.
        if self.policy.mode == SessionMode::Batch {
            self.counts_per_frame.push(total_count);
            self.grid_counts_over_time.push(binning.grid.to_rows());
        }
        if self.policy.snapshot_interval.is_some() {
            self.counts_since_snapshot.push(total_count);
        }

        let snapshot = if self.policy.is_snapshot_frame(frame_index) {
            Some(self.take_snapshot())
        } else {
            None
        };

        tracing::trace!(frame_index, total_count, grid_size, "frame analysed");

        Ok(FrameResult {
            frame_index,
            detected,
            grid: binning.grid,
            placements: binning.placements,
            total_count,
            alerts,
            closed_events: update.closed,
            motions,
            snapshot,
        })
    }

    fn take_snapshot(&mut self) -> PeriodicSnapshot {
        let heatmap = self.heat.as_ref().and_then(|h| {
            h.snapshot(self.config.heat_sigma, self.config.heat_saturation_percentile)
        });
        let prediction = self.predictor.forecast(self.fps);
        let mean_count = summary::mean(&self.counts_since_snapshot).map(summary::round2);
        self.counts_since_snapshot.clear();

        PeriodicSnapshot {
            heatmap,
            prediction,
            mean_count,
        }
    }

    /// Forecast overlay at frame resolution, using the red placeholder when
    /// there is no forecast. `None` before the first frame.
    pub fn forecast_overlay(&self, prediction: Option<&PredictionResult>) -> Option<RgbImage> {
        let (width, height) = self.heat.as_ref()?.dimensions();
        let n = self.sizer.current();
        let zeros;
        let grid = match prediction {
            Some(p) => &p.forecast,
            None => {
                zeros = Array2::<f32>::zeros((n, n));
                &zeros
            }
        };
        Some(render_overlay(grid, width, height, OverlayKind::Forecast))
    }

    /// Close the session: force-close open congestion at the last frame and
    /// aggregate the report inputs.
    pub fn finish(mut self) -> SessionSummary {
        let forced = self.zones.finish(self.frame_index);
        self.events.extend(forced);

        let grid_size = self.sizer.current();
        let alerts = self
            .events
            .iter()
            .enumerate()
            .map(|(i, e)| e.to_alert(i, grid_size))
            .collect();

        let prediction = self.predictor.forecast(self.fps);
        let prediction_overlay = self.forecast_overlay(prediction.as_ref());
        let heatmap = self.heat.as_ref().and_then(|h| {
            h.snapshot(self.config.heat_sigma, self.config.heat_saturation_percentile)
        });

        tracing::info!(
            frames = self.frame_index,
            events = self.events.len(),
            grid_size,
            "analytics session finished"
        );

        SessionSummary {
            frames: self.frame_index,
            alerts,
            counts: summary::count_summary(&self.counts_per_frame),
            people_count_by_second: summary::people_count_by_second(&self.counts_per_frame, self.fps),
            grid_counts_over_time: self.grid_counts_over_time,
            grid_dimensions: GridDimensions {
                rows: grid_size,
                cols: grid_size,
            },
            prediction,
            prediction_overlay,
            heatmap,
            events: self.events,
        }
    }
}
