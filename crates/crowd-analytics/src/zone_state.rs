use crate::density_grid::{CellCoord, DensityGrid};
use crate::policy::AlertEmission;
use common::crowd::{AlertMessage, AlertType};
use std::collections::HashMap;

/// A completed stretch of sustained congestion in one cell.
#[derive(Debug, Clone, PartialEq)]
pub struct UnsafeEvent {
    pub cell: CellCoord,
    pub start_frame: u64,
    pub end_frame: u64,
    pub start_secs: f64,
    pub end_secs: f64,
}

impl UnsafeEvent {
    pub fn duration_secs(&self) -> f64 {
        self.end_secs - self.start_secs
    }

    /// Operator-facing alert for the `index`-th event of a report.
    pub fn to_alert(&self, index: usize, grid_size: usize) -> AlertMessage {
        AlertMessage {
            id: format!("unsafe-{}", index),
            alert_type: AlertType::HighRiskEvent,
            message: format!(
                "High density in {} (Grid {},{}) from {:.1}s to {:.1}s",
                zone_name(self.cell, grid_size),
                self.cell.col,
                self.cell.row,
                self.start_secs,
                self.end_secs
            ),
        }
    }
}

/// Transitions observed in one frame.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ZoneUpdate {
    /// Cells that became congested this frame, row-major
    pub entered: Vec<CellCoord>,
    /// Debounced events whose congestion ended this frame
    pub closed: Vec<UnsafeEvent>,
}

/// Human name of a cell's position: thirds of the grid along each axis.
pub fn zone_name(cell: CellCoord, grid_size: usize) -> String {
    let n = grid_size as f64;
    let third = |i: usize, low: &'static str, mid: &'static str, high: &'static str| {
        let i = i as f64;
        if i < n / 3.0 {
            low
        } else if i >= n * 2.0 / 3.0 {
            high
        } else {
            mid
        }
    };

    let row = third(cell.row, "Top", "Middle", "Bottom");
    let col = third(cell.col, "Left", "Center", "Right");
    if row == "Middle" && col == "Center" {
        "Central Area".to_string()
    } else {
        format!("{}-{} Zone", row, col)
    }
}

/// Immediate alert raised when a live cell turns congested.
pub fn live_alert(cell: CellCoord, grid_size: usize) -> AlertMessage {
    AlertMessage {
        id: format!("live-dense-{}-{}", cell.col, cell.row),
        alert_type: AlertType::HighRiskDetected,
        message: format!("Congestion in {}", zone_name(cell, grid_size)),
    }
}

/// Safe/unsafe state machine over grid cells.
///
/// A cell is tracked exactly while its latest count is at or above the
/// threshold; the stored value is the frame at which it became unsafe.
#[derive(Debug, Clone)]
pub struct ZoneStateTracker {
    active: HashMap<CellCoord, u64>,
    emission: AlertEmission,
    threshold: u32,
    min_duration_secs: f64,
    fps: f64,
}

impl ZoneStateTracker {
    pub fn new(emission: AlertEmission, threshold: u32, min_duration_secs: f64, fps: f64) -> Self {
        Self {
            active: HashMap::new(),
            emission,
            threshold,
            min_duration_secs,
            fps,
        }
    }

    pub fn is_unsafe(&self, cell: CellCoord) -> bool {
        self.active.contains_key(&cell)
    }

    pub fn entry_frame(&self, cell: CellCoord) -> Option<u64> {
        self.active.get(&cell).copied()
    }

    pub fn is_empty(&self) -> bool {
        self.active.is_empty()
    }

    /// Apply one frame's counts. `frame_index` must increase between calls.
    pub fn update(&mut self, grid: &DensityGrid, frame_index: u64) -> ZoneUpdate {
        let mut update = ZoneUpdate::default();

        for (cell, count) in grid.cells() {
            let unsafe_now = count >= self.threshold;
            match (unsafe_now, self.active.get(&cell).copied()) {
                (true, None) => {
                    self.active.insert(cell, frame_index);
                    tracing::debug!(%cell, count, frame_index, "cell entered congestion");
                    update.entered.push(cell);
                }
                (false, Some(entry)) => {
                    self.active.remove(&cell);
                    if let Some(event) = self.close(cell, entry, frame_index) {
                        tracing::info!(
                            %cell,
                            start_secs = event.start_secs,
                            end_secs = event.end_secs,
                            "sustained congestion ended"
                        );
                        update.closed.push(event);
                    }
                }
                _ => {}
            }
        }

        update
    }

    /// Force-close every still-congested cell at `final_frame`.
    ///
    /// The final frame stands in for the exit, so an event still running at
    /// the end of the stream reports the dwell observed so far.
    pub fn finish(&mut self, final_frame: u64) -> Vec<UnsafeEvent> {
        let mut open: Vec<(CellCoord, u64)> = self.active.drain().collect();
        open.sort_by_key(|(cell, entry)| (*entry, *cell));

        open.into_iter()
            .filter_map(|(cell, entry)| self.close(cell, entry, final_frame))
            .collect()
    }

    /// Drop all state without emitting anything.
    pub fn reset(&mut self) {
        self.active.clear();
    }

    fn close(&self, cell: CellCoord, entry: u64, exit: u64) -> Option<UnsafeEvent> {
        if self.emission == AlertEmission::Immediate {
            return None;
        }
        let dwell = exit.saturating_sub(entry) as f64 / self.fps;
        (dwell >= self.min_duration_secs).then(|| UnsafeEvent {
            cell,
            start_frame: entry,
            end_frame: exit,
            start_secs: entry as f64 / self.fps,
            end_secs: exit as f64 / self.fps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::crowd::{PixelBox, Track, TrackId};

    /// A 2x2 grid over a 100x100 frame with `n` people in the top-left cell.
    fn grid_with(n: usize) -> DensityGrid {
        let tracks: Vec<Track> = (0..n)
            .map(|i| Track {
                id: TrackId(i as u64),
                bbox: PixelBox::new(10, 10, 20, 30),
                confidence: None,
            })
            .collect();
        DensityGrid::bin(&tracks, 100, 100, 2).grid
    }

    fn run(tracker: &mut ZoneStateTracker, counts: &[usize]) -> Vec<UnsafeEvent> {
        let mut events = Vec::new();
        for (i, n) in counts.iter().enumerate() {
            events.extend(tracker.update(&grid_with(*n), i as u64 + 1).closed);
        }
        events
    }

    #[test]
    fn test_single_debounced_event() {
        // 1.5s at 2 fps spans 3 frames
        let mut tracker = ZoneStateTracker::new(AlertEmission::Debounced, 6, 1.5, 2.0);
        let events = run(&mut tracker, &[5, 5, 8, 8, 8, 8, 5, 5]);

        assert_eq!(events.len(), 1);
        let e = &events[0];
        assert_eq!(e.cell, CellCoord::new(0, 0));
        assert_eq!((e.start_frame, e.end_frame), (3, 7));
        assert_eq!((e.start_secs, e.end_secs), (1.5, 3.5));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_short_run_is_debounced() {
        let mut tracker = ZoneStateTracker::new(AlertEmission::Debounced, 6, 1.5, 2.0);
        let events = run(&mut tracker, &[5, 8, 8, 5, 5]);
        assert!(events.is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_membership_tracks_latest_count() {
        let mut tracker = ZoneStateTracker::new(AlertEmission::Debounced, 6, 1.5, 25.0);
        let cell = CellCoord::new(0, 0);

        tracker.update(&grid_with(6), 1);
        assert_eq!(tracker.entry_frame(cell), Some(1));
        tracker.update(&grid_with(9), 2);
        assert_eq!(tracker.entry_frame(cell), Some(1));
        tracker.update(&grid_with(5), 3);
        assert!(!tracker.is_unsafe(cell));
    }

    #[test]
    fn test_finish_force_closes_at_final_frame() {
        let mut tracker = ZoneStateTracker::new(AlertEmission::Debounced, 6, 1.5, 25.0);
        let mut counts = vec![2; 10];
        counts.extend(vec![7; 60]);
        assert!(run(&mut tracker, &counts).is_empty());

        let events = tracker.finish(70);
        assert_eq!(events.len(), 1);
        assert_eq!((events[0].start_frame, events[0].end_frame), (11, 70));
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_finish_applies_duration_gate() {
        let mut tracker = ZoneStateTracker::new(AlertEmission::Debounced, 6, 1.5, 25.0);
        run(&mut tracker, &[7, 7, 7]);
        assert!(tracker.finish(3).is_empty());
    }

    #[test]
    fn test_immediate_mode_reports_entries_only() {
        let mut tracker = ZoneStateTracker::new(AlertEmission::Immediate, 6, 1.5, 25.0);
        let first = tracker.update(&grid_with(7), 1);
        assert_eq!(first.entered, vec![CellCoord::new(0, 0)]);

        let still = tracker.update(&grid_with(8), 2);
        assert!(still.entered.is_empty());

        let mut counts = vec![7; 100];
        counts.push(0);
        assert!(run(&mut tracker, &counts).is_empty());
        assert!(tracker.finish(200).is_empty());
    }

    #[test]
    fn test_zone_names() {
        assert_eq!(zone_name(CellCoord::new(1, 1), 3), "Central Area");
        assert_eq!(zone_name(CellCoord::new(0, 0), 3), "Top-Left Zone");
        assert_eq!(zone_name(CellCoord::new(2, 0), 3), "Bottom-Left Zone");
        assert_eq!(zone_name(CellCoord::new(0, 3), 4), "Top-Right Zone");
        // n = 4: index 1 is below 4/3, index 2 sits between 4/3 and 8/3
        assert_eq!(zone_name(CellCoord::new(2, 2), 4), "Central Area");
        assert_eq!(zone_name(CellCoord::new(2, 1), 4), "Middle-Left Zone");
        assert_eq!(zone_name(CellCoord::new(1, 0), 4), "Top-Left Zone");
    }

    #[test]
    fn test_alert_messages() {
        let live = live_alert(CellCoord::new(2, 1), 3);
        assert_eq!(live.id, "live-dense-1-2");
        assert_eq!(live.message, "Congestion in Bottom-Center Zone");

        let event = UnsafeEvent {
            cell: CellCoord::new(0, 2),
            start_frame: 25,
            end_frame: 75,
            start_secs: 1.0,
            end_secs: 3.0,
        };
        let alert = event.to_alert(4, 3);
        assert_eq!(alert.id, "unsafe-4");
        assert_eq!(alert.alert_type, AlertType::HighRiskEvent);
        assert_eq!(
            alert.message,
            "High density in Top-Right Zone (Grid 2,0) from 1.0s to 3.0s"
        );
        assert_eq!(event.duration_secs(), 2.0);
    }
}
