/// End-to-end analytics scenarios over synthetic tracks
use common::crowd::{AlertType, PixelBox, Track, TrackId};
use crowd_analytics::{
    AnalyticsConfig, AnalyticsSession, CellCoord, DensityGrid, SessionPolicy,
};

const WIDTH: u32 = 640;
const HEIGHT: u32 = 480;

/// `n` people standing with their anchors at `(x, y)`.
fn people_at(n: usize, x: i32, y: i32) -> Vec<Track> {
    (0..n)
        .map(|i| Track {
            id: TrackId(i as u64 + 1),
            bbox: PixelBox::new(x - 10, y - 40, x + 10, y + 10),
            confidence: Some(0.8),
        })
        .collect()
}

fn batch_session() -> AnalyticsSession {
    AnalyticsSession::new(AnalyticsConfig::default(), SessionPolicy::batch(), 25.0).unwrap()
}

/// Run one batch session over per-frame counts in the bottom-right cell.
fn run_counts(counts: &[usize]) -> crowd_analytics::SessionSummary {
    let mut session = batch_session();
    for &n in counts {
        session
            .analyze_frame(Some(people_at(n, 600, 440)), WIDTH, HEIGHT)
            .unwrap();
    }
    session.finish()
}

#[test]
fn test_sparse_cell_never_alerts() {
    let mut session = batch_session();
    let tracks = people_at(3, 50, 60);

    for _ in 0..50 {
        let result = session.analyze_frame(Some(tracks.clone()), WIDTH, HEIGHT).unwrap();
        assert_eq!(result.grid.count(CellCoord { row: 0, col: 0 }), 3);
        assert_eq!(result.total_count, 3);
        assert!(result.alerts.is_empty());
        assert!(result.closed_events.is_empty());
        assert!(session.zone_state().is_empty());
    }

    let summary = session.finish();
    assert!(summary.alerts.is_empty());
    assert_eq!(summary.counts.max_people_detected, 3);
    assert_eq!(summary.counts.avg_people_detected, 3.0);
    assert_eq!(summary.people_count_by_second.len(), 2);
}

#[test]
fn test_short_congestion_is_debounced() {
    let mut counts = vec![2; 10];
    counts.extend([7; 5]);
    counts.extend([2; 10]);

    let summary = run_counts(&counts);
    assert!(summary.events.is_empty());
    assert!(summary.alerts.is_empty());
}

#[test]
fn test_sustained_congestion_yields_one_event() {
    let mut counts = vec![2; 10];
    counts.extend([7; 50]);
    counts.extend([2; 10]);

    let summary = run_counts(&counts);
    assert_eq!(summary.events.len(), 1);

    let event = &summary.events[0];
    assert_eq!(event.cell, CellCoord { row: 3, col: 3 });
    assert_eq!(event.start_frame, 11);
    assert_eq!(event.end_frame, 61);
    assert!((event.duration_secs() - 2.0).abs() < 1e-9);

    let alert = &summary.alerts[0];
    assert_eq!(alert.id, "unsafe-0");
    assert_eq!(alert.alert_type, AlertType::HighRiskEvent);
    assert_eq!(
        alert.message,
        "High density in Bottom-Right Zone (Grid 3,3) from 0.4s to 2.4s"
    );
}

#[test]
fn test_congestion_open_at_end_is_closed_at_last_frame() {
    let mut counts = vec![2; 5];
    counts.extend([9; 45]);

    let summary = run_counts(&counts);
    assert_eq!(summary.events.len(), 1);
    assert_eq!(summary.events[0].start_frame, 6);
    assert_eq!(summary.events[0].end_frame, 50);
}

#[test]
fn test_grid_sum_matches_in_frame_anchors() {
    let mut tracks = people_at(4, 100, 100);
    // Anchor below the frame.
    tracks.push(Track {
        id: TrackId(99),
        bbox: PixelBox::new(300, 470, 320, 560),
        confidence: None,
    });
    // Anchor left of the frame.
    tracks.push(Track {
        id: TrackId(100),
        bbox: PixelBox::new(-60, 10, -20, 100),
        confidence: None,
    });

    for n in [3, 4, 5, 8] {
        let binning = DensityGrid::bin(&tracks, WIDTH, HEIGHT, n);
        assert_eq!(binning.grid.total(), 4, "grid {}", n);
        assert_eq!(binning.placements.len(), tracks.len());
    }
}

#[test]
fn test_forecast_follows_rising_density() {
    let mut session = batch_session();
    let mut last = 0;
    for frame in 0..45 {
        let n = 1 + frame / 9;
        last = n;
        session
            .analyze_frame(Some(people_at(n, 600, 440)), WIDTH, HEIGHT)
            .unwrap();
    }

    let summary = session.finish();
    let prediction = summary.prediction.unwrap();
    assert!(prediction.expected_max_density as usize > last);
    assert!(prediction.high_risk_cells.contains(&CellCoord { row: 3, col: 3 }));
    assert!(summary.prediction_overlay.is_some());
}

#[test]
fn test_sessions_are_isolated() {
    let mut busy = batch_session();
    let mut quiet = batch_session();

    for _ in 0..40 {
        busy.analyze_frame(Some(people_at(8, 600, 440)), WIDTH, HEIGHT).unwrap();
        quiet.analyze_frame(Some(people_at(1, 50, 60)), WIDTH, HEIGHT).unwrap();
    }

    assert!(!busy.zone_state().is_empty());
    assert!(quiet.zone_state().is_empty());
    assert_eq!(busy.finish().alerts.len(), 1);
    assert!(quiet.finish().alerts.is_empty());
}
