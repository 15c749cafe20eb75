//! Wire contracts for the crowd analytics service.
//!
//! Tracks flow in from the external tracker; alerts, live frame messages and
//! batch reports flow out to clients. Field names follow what the dashboard
//! frontend reads, which is why a few of them are camelCase.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque identity assigned by the tracker, stable across frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TrackId(pub u64);

impl fmt::Display for TrackId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Axis-aligned box in integer pixel coordinates (top-left, bottom-right).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelBox {
    pub x1: i32,
    pub y1: i32,
    pub x2: i32,
    pub y2: i32,
}

impl PixelBox {
    pub fn new(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    pub fn width(&self) -> i32 {
        self.x2.saturating_sub(self.x1)
    }

    pub fn height(&self) -> i32 {
        self.y2.saturating_sub(self.y1)
    }

    /// Ground-position proxy: horizontal midpoint, 80% of the way down the box.
    ///
    /// Both coordinates lie between the box edges, so the arithmetic is done
    /// in i64 and always narrows back without loss.
    pub fn anchor(&self) -> (i32, i32) {
        let (x1, y1) = (i64::from(self.x1), i64::from(self.y1));
        let (x2, y2) = (i64::from(self.x2), i64::from(self.y2));
        let cx = (x1 + x2).div_euclid(2);
        let cy = y1 + ((y2 - y1) as f64 * 0.8) as i64;
        (narrow(cx), narrow(cy))
    }

    /// Intersection over union; zero for degenerate boxes.
    pub fn iou(&self, other: &PixelBox) -> f32 {
        let span = |lo: i32, hi: i32| (i64::from(hi) - i64::from(lo)).max(0) as f64;

        let iw = span(self.x1.max(other.x1), self.x2.min(other.x2));
        let ih = span(self.y1.max(other.y1), self.y2.min(other.y2));
        let intersection = iw * ih;

        let area_a = span(self.x1, self.x2) * span(self.y1, self.y2);
        let area_b = span(other.x1, other.x2) * span(other.y1, other.y2);
        let union = area_a + area_b - intersection;

        if union > 0.0 {
            (intersection / union) as f32
        } else {
            0.0
        }
    }
}

fn narrow(value: i64) -> i32 {
    i32::try_from(value).unwrap_or(if value < 0 { i32::MIN } else { i32::MAX })
}

/// A confirmed track for the current frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: TrackId,
    pub bbox: PixelBox,
    /// Confidence of the detection matched this frame, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f32>,
}

/// A person candidate produced by the detector, before tracking.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PersonDetection {
    pub bbox: PixelBox,
    pub confidence: f32,
}

/// Alert category as shown to operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertType {
    /// Live entry into congestion, raised without debounce
    #[serde(rename = "High Risk Detected")]
    HighRiskDetected,
    /// Completed sustained-congestion interval from a batch job
    #[serde(rename = "High Risk Event")]
    HighRiskEvent,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertMessage {
    pub id: String,
    #[serde(rename = "type")]
    pub alert_type: AlertType,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GridDimensions {
    pub rows: usize,
    pub cols: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum RiskLevel {
    High,
    #[default]
    Low,
}

/// Forecast section of a batch report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PredictionReport {
    /// Horizon label, e.g. "30s"
    pub prediction_horizon: String,
    /// Forecast cells at or above the density threshold, as `[row, col]`
    pub high_risk_zones: Vec<[usize; 2]>,
    pub expected_risk_level: RiskLevel,
    pub expected_max_density: u32,
    /// Base64 PNG of the forecast overlay
    pub heatmap_prediction_b64: Option<String>,
}

impl PredictionReport {
    /// Report used when the history window never filled.
    pub fn empty(horizon_secs: f64) -> Self {
        Self {
            prediction_horizon: format!("{}s", horizon_secs),
            high_risk_zones: Vec::new(),
            expected_risk_level: RiskLevel::Low,
            expected_max_density: 0,
            heatmap_prediction_b64: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CountSummary {
    pub max_people_detected: usize,
    pub avg_people_detected: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecondCount {
    pub second: usize,
    pub count: f64,
}

/// Result of analysing one recorded video end-to-end.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub processed_video_url: String,
    /// Absent when nobody was ever seen, so there is nothing to render
    pub heatmap_image_url: Option<String>,
    pub alerts: Vec<AlertMessage>,
    pub summary: CountSummary,
    pub prediction: PredictionReport,
    pub people_count_by_second: Vec<SecondCount>,
    pub grid_counts_over_time: Vec<Vec<Vec<u32>>>,
    pub grid_dimensions: GridDimensions,
}

/// First message of a live WebSocket session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum LiveSource {
    /// Capture device attached to the server
    Webcam,
    /// Network stream pulled by the server
    Stream { url: String },
    /// Frames pushed by the client over the socket
    Client,
}

/// A client-pushed frame (base64 JPEG) on a `client` live session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClientFrame {
    pub frame: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LivePrediction {
    pub heatmap_prediction_b64: String,
    pub expected_risk_level: RiskLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ChartDataPoint {
    pub count: f64,
}

/// Per-frame message on a live session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LiveFrameMessage {
    /// Base64 JPEG of the annotated frame
    pub frame: String,
    pub total_count: usize,
    pub alerts: Vec<AlertMessage>,
    pub grid_counts: Vec<Vec<u32>>,
    pub grid_dimensions: GridDimensions,
    /// PNG data URI of the accumulated heatmap
    #[serde(rename = "liveHeatmap", default, skip_serializing_if = "Option::is_none")]
    pub live_heatmap: Option<String>,
    #[serde(rename = "livePrediction", default, skip_serializing_if = "Option::is_none")]
    pub live_prediction: Option<LivePrediction>,
    #[serde(rename = "chartDataPoint", default, skip_serializing_if = "Option::is_none")]
    pub chart_data_point: Option<ChartDataPoint>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorMessage {
    pub error: String,
}

impl ErrorMessage {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
        }
    }
}

// ---------------------------------------------------------------------------
// Remote inference contracts
// ---------------------------------------------------------------------------

/// Frame submitted to a remote inference endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoFrame {
    /// Session or stream the frame belongs to
    pub source_id: String,

    /// Frame timestamp (Unix timestamp in milliseconds)
    pub timestamp: u64,

    /// Frame sequence number
    pub sequence: u64,

    pub width: u32,
    pub height: u32,

    /// Image format of `data` ("jpeg")
    pub format: String,

    /// Base64 encoded image
    pub data: String,
}

/// Box as returned by the remote endpoint (x, y, width, height).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl From<BoundingBox> for PixelBox {
    fn from(b: BoundingBox) -> Self {
        let x1 = i32::try_from(b.x).unwrap_or(i32::MAX);
        let y1 = i32::try_from(b.y).unwrap_or(i32::MAX);
        let w = i32::try_from(b.width).unwrap_or(i32::MAX);
        let h = i32::try_from(b.height).unwrap_or(i32::MAX);
        PixelBox::new(x1, y1, x1.saturating_add(w), y1.saturating_add(h))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Object class label
    pub class: String,

    /// Detection confidence (0.0 to 1.0)
    pub confidence: f32,

    pub bbox: BoundingBox,
}

/// Response of the remote inference endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    pub detections: Vec<Detection>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub processing_time_ms: Option<u64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_anchor_is_biased_towards_feet() {
        let b = PixelBox::new(100, 100, 141, 200);
        assert_eq!(b.anchor(), (120, 180));

        // truncation, not rounding, on the vertical offset
        let b = PixelBox::new(0, 0, 10, 9);
        assert_eq!(b.anchor(), (5, 7));
    }

    #[test]
    fn test_anchor_floors_negative_midpoints() {
        let b = PixelBox::new(-5, 0, 0, 10);
        assert_eq!(b.anchor().0, -3);
    }

    #[test]
    fn test_iou() {
        let a = PixelBox::new(0, 0, 10, 10);
        let b = PixelBox::new(5, 0, 15, 10);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&PixelBox::new(20, 20, 30, 30)), 0.0);
        assert_eq!(a.iou(&PixelBox::new(3, 3, 3, 3)), 0.0);
    }

    #[test]
    fn test_alert_serialization() {
        let alert = AlertMessage {
            id: "live-dense-1-2".to_string(),
            alert_type: AlertType::HighRiskDetected,
            message: "Congestion in Central Area".to_string(),
        };

        let json = serde_json::to_value(&alert).unwrap();
        assert_eq!(json["type"], "High Risk Detected");
        assert_eq!(json["id"], "live-dense-1-2");
    }

    #[test]
    fn test_live_source_handshake() {
        let webcam: LiveSource = serde_json::from_str(r#"{"source":"webcam"}"#).unwrap();
        assert_eq!(webcam, LiveSource::Webcam);

        let stream: LiveSource =
            serde_json::from_str(r#"{"source":"stream","url":"rtsp://cam/1"}"#).unwrap();
        assert_eq!(
            stream,
            LiveSource::Stream {
                url: "rtsp://cam/1".to_string()
            }
        );

        assert!(serde_json::from_str::<LiveSource>(r#"{"source":"satellite"}"#).is_err());
    }

    #[test]
    fn test_live_message_omits_periodic_fields() {
        let msg = LiveFrameMessage {
            frame: "abc".to_string(),
            total_count: 3,
            alerts: vec![],
            grid_counts: vec![vec![0, 3], vec![0, 0]],
            grid_dimensions: GridDimensions { rows: 2, cols: 2 },
            live_heatmap: None,
            live_prediction: None,
            chart_data_point: Some(ChartDataPoint { count: 2.5 }),
        };

        let json = serde_json::to_value(&msg).unwrap();
        assert!(json.get("liveHeatmap").is_none());
        assert!(json.get("livePrediction").is_none());
        assert_eq!(json["chartDataPoint"]["count"], 2.5);
        assert_eq!(json["grid_dimensions"]["rows"], 2);
    }

    #[test]
    fn test_remote_box_conversion() {
        let pixel: PixelBox = BoundingBox {
            x: 10,
            y: 20,
            width: 30,
            height: 40,
        }
        .into();
        assert_eq!(pixel, PixelBox::new(10, 20, 40, 60));
    }

    #[test]
    fn test_extreme_boxes_do_not_overflow() {
        let huge: PixelBox = BoundingBox {
            x: 1_500_000_000,
            y: 10,
            width: 1_000_000_000,
            height: 20,
        }
        .into();
        assert_eq!(huge.x2, i32::MAX);
        let (cx, cy) = huge.anchor();
        assert!(cx >= huge.x1 && cx <= huge.x2);
        assert_eq!(cy, 26);

        let wide = PixelBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX);
        assert_eq!(wide.anchor(), (-1, i32::MAX - 858_993_459));
        assert_eq!(wide.width(), i32::MAX);

        let big = PixelBox::new(0, 0, 50_000, 50_000);
        assert!((big.iou(&big) - 1.0).abs() < 1e-6);
        let half = PixelBox::new(0, 0, 25_000, 50_000);
        assert!((big.iou(&half) - 0.5).abs() < 1e-6);
        assert!(wide.iou(&big) > 0.0);
    }

    #[test]
    fn test_empty_prediction_report() {
        let report = PredictionReport::empty(30.0);
        assert_eq!(report.prediction_horizon, "30s");
        assert_eq!(report.expected_risk_level, RiskLevel::Low);
        assert!(report.heatmap_prediction_b64.is_none());
    }
}
