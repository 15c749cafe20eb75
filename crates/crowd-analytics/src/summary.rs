//! Aggregates over a finished session, shaped for the batch report.

use crate::predictor::PredictionResult;
use common::crowd::{CountSummary, PredictionReport, SecondCount};

/// Round to two decimals, as charted by clients.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

pub fn mean(counts: &[usize]) -> Option<f64> {
    if counts.is_empty() {
        return None;
    }
    Some(counts.iter().sum::<usize>() as f64 / counts.len() as f64)
}

pub fn count_summary(counts: &[usize]) -> CountSummary {
    CountSummary {
        max_people_detected: counts.iter().copied().max().unwrap_or(0),
        avg_people_detected: mean(counts).unwrap_or(0.0),
    }
}

/// Average people per second of video, using whole-second chunks of
/// `trunc(fps)` frames; the last chunk may be short.
pub fn people_count_by_second(counts: &[usize], fps: f64) -> Vec<SecondCount> {
    let chunk = (fps as usize).max(1);
    counts
        .chunks(chunk)
        .enumerate()
        .filter_map(|(second, frames)| {
            mean(frames).map(|avg| SecondCount {
                second,
                count: round2(avg),
            })
        })
        .collect()
}

/// Forecast section of a report; defaults when no forecast was possible.
pub fn prediction_report(
    prediction: Option<&PredictionResult>,
    horizon_secs: f64,
    overlay_b64: Option<String>,
) -> PredictionReport {
    let mut report = PredictionReport::empty(horizon_secs);
    if let Some(p) = prediction {
        report.high_risk_zones = p.high_risk_zones();
        report.expected_risk_level = p.risk_level();
        report.expected_max_density = p.expected_max_density;
    }
    report.heatmap_prediction_b64 = overlay_b64;
    report
}
