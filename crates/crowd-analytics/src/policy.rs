//! Per-mode behaviour of an analytics session, chosen once at session start.

use crate::config::AnalyticsConfig;
use std::fmt;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionMode {
    Batch,
    Live,
}

impl SessionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionMode::Batch => "batch",
            SessionMode::Live => "live",
        }
    }
}

impl fmt::Display for SessionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How congestion is reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlertEmission {
    /// Alert on entry into congestion, nothing on exit
    Immediate,
    /// Report only completed intervals that pass the duration gate
    Debounced,
}

/// When the grid size may change.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GridRecompute {
    /// Seeded once from a warm-up sample, then fixed
    Warmup,
    /// At most once per wall-clock interval, only when people are visible
    Interval(Duration),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionPolicy {
    pub mode: SessionMode,
    /// Frames skipped between detector runs (0 = every frame)
    pub frame_skip_factor: u32,
    pub grid_recompute: GridRecompute,
    pub alert_emission: AlertEmission,
    /// Cadence of heatmap/forecast/chart snapshots, if any
    pub snapshot_interval: Option<u64>,
}

impl SessionPolicy {
    pub fn batch() -> Self {
        Self {
            mode: SessionMode::Batch,
            frame_skip_factor: 0,
            grid_recompute: GridRecompute::Warmup,
            alert_emission: AlertEmission::Debounced,
            snapshot_interval: None,
        }
    }

    pub fn live(config: &AnalyticsConfig) -> Self {
        Self {
            mode: SessionMode::Live,
            frame_skip_factor: config.live_frame_skip,
            grid_recompute: GridRecompute::Interval(Duration::from_secs(
                config.live_grid_recompute_secs,
            )),
            alert_emission: AlertEmission::Immediate,
            snapshot_interval: Some(config.snapshot_interval_frames),
        }
    }

    pub fn for_mode(mode: SessionMode, config: &AnalyticsConfig) -> Self {
        match mode {
            SessionMode::Batch => Self::batch(),
            SessionMode::Live => Self::live(config),
        }
    }

    /// Whether the detector and tracker run for the given 1-based frame.
    pub fn runs_detection(&self, frame_index: u64) -> bool {
        frame_index % (u64::from(self.frame_skip_factor) + 1) == 0
    }

    /// Whether the given 1-based frame carries a periodic snapshot.
    pub fn is_snapshot_frame(&self, frame_index: u64) -> bool {
        self.snapshot_interval
            .is_some_and(|every| every > 0 && frame_index % every == 0)
    }
}
