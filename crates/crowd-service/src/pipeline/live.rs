//! Incremental analysis of a live source, one message per frame.

use super::{FrameProcessor, FrameSource, ProcessedFrame, SessionGauge};
use crate::detector::Detector;
use anyhow::Result;
use common::crowd::{ChartDataPoint, LiveFrameMessage, LivePrediction};
use common::video::{encode_jpeg, encode_png, png_data_uri, to_base64};
use crowd_analytics::{AnalyticsConfig, AnalyticsSession, SessionMode};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

const FRAME_JPEG_QUALITY: u8 = 80;

/// Why a live session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LiveEnd {
    SourceExhausted,
    Cancelled,
    /// The receiving side of the output channel went away
    ClientGone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveStats {
    pub frames: u64,
    pub end: LiveEnd,
}

/// Build the client message for one processed frame.
pub fn frame_message(session: &AnalyticsSession, processed: ProcessedFrame) -> Result<LiveFrameMessage> {
    let ProcessedFrame { result, annotated } = processed;
    let frame = to_base64(&encode_jpeg(&annotated, FRAME_JPEG_QUALITY)?);

    let mut message = LiveFrameMessage {
        frame,
        total_count: result.total_count,
        grid_counts: result.grid_counts(),
        grid_dimensions: result.grid_dimensions(),
        alerts: result.alerts,
        live_heatmap: None,
        live_prediction: None,
        chart_data_point: None,
    };

    if let Some(snapshot) = result.snapshot {
        if let Some(heatmap) = &snapshot.heatmap {
            message.live_heatmap = Some(png_data_uri(heatmap)?);
        }
        if let Some(prediction) = &snapshot.prediction {
            if let Some(overlay) = session.forecast_overlay(Some(prediction)) {
                message.live_prediction = Some(LivePrediction {
                    heatmap_prediction_b64: to_base64(&encode_png(&overlay)?),
                    expected_risk_level: prediction.risk_level(),
                });
            }
        }
        message.chart_data_point = snapshot.mean_count.map(|count| ChartDataPoint { count });
    }

    Ok(message)
}

/// Analyse `source` until it ends, the token is cancelled or the output
/// receiver is dropped.
///
/// Frames are handled strictly in order and the task yields after every
/// message, so cancellation is seen at the next frame boundary. All session
/// state is dropped on return.
#[instrument(skip_all, fields(session_id = %session_id))]
pub async fn run_live_session(
    session_id: &str,
    detector: Arc<dyn Detector>,
    analytics: AnalyticsConfig,
    source: &mut dyn FrameSource,
    out: mpsc::Sender<LiveFrameMessage>,
    cancel: CancellationToken,
) -> Result<LiveStats> {
    let _gauge = SessionGauge::enter(SessionMode::Live);
    let fps = analytics.default_fps;
    let mut processor = FrameProcessor::new(detector, analytics, SessionMode::Live, fps)?;
    info!(grid_size = processor.session()?.grid_size(), "live session started");

    let end = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break LiveEnd::Cancelled,
            next = source.next_frame() => next?,
        };
        let Some(frame) = next else {
            break LiveEnd::SourceExhausted;
        };

        let processed = processor.process(frame).await?;
        let message = frame_message(processor.session()?, processed)?;
        if out.send(message).await.is_err() {
            break LiveEnd::ClientGone;
        }
        tokio::task::yield_now().await;
    };

    let frames = processor.session()?.frame_index();
    match end {
        LiveEnd::SourceExhausted => info!(frames, "live source exhausted"),
        LiveEnd::Cancelled => info!(frames, "live session cancelled"),
        LiveEnd::ClientGone => debug!(frames, "live client stopped receiving"),
    }
    Ok(LiveStats { frames, end })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{MockDetector, MockDetectorConfig};
    use crate::pipeline::{ChannelSource, MemorySource};
    use image::RgbImage;

    fn detector(people: usize, crowd: usize) -> Arc<dyn Detector> {
        Arc::new(MockDetector::new(MockDetectorConfig {
            people,
            crowd,
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_every_fiftieth_frame_carries_snapshot() {
        let mut source = MemorySource::new((0..100).map(|_| RgbImage::new(320, 240)));
        let (tx, mut rx) = mpsc::channel(128);

        let stats = run_live_session(
            "test",
            detector(4, 0),
            AnalyticsConfig::default(),
            &mut source,
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(stats, LiveStats { frames: 100, end: LiveEnd::SourceExhausted });

        let mut messages = Vec::new();
        while let Some(m) = rx.recv().await {
            messages.push(m);
        }
        assert_eq!(messages.len(), 100);
        for (i, m) in messages.iter().enumerate() {
            let periodic = (i + 1) % 50 == 0;
            assert_eq!(m.chart_data_point.is_some(), periodic, "frame {}", i + 1);
            assert!(!m.frame.is_empty());
        }
        assert!(messages[49].live_heatmap.as_deref().unwrap().starts_with("data:image/png;base64,"));
        assert!(messages[49].live_prediction.is_some());
        assert!(messages[48].live_prediction.is_none());
    }

    #[tokio::test]
    async fn test_congestion_alert_raised_once() {
        let mut source = MemorySource::new((0..30).map(|_| RgbImage::new(320, 240)));
        let (tx, mut rx) = mpsc::channel(64);

        run_live_session(
            "test",
            detector(0, 8),
            AnalyticsConfig::default(),
            &mut source,
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();

        let mut alerts = Vec::new();
        while let Some(m) = rx.recv().await {
            alerts.extend(m.alerts);
        }
        assert_eq!(alerts.len(), 1);
        assert!(alerts[0].id.starts_with("live-dense-"));
    }

    #[tokio::test]
    async fn test_cancel_stops_at_frame_boundary() {
        let (frames, mut source) = ChannelSource::channel(4);
        let (tx, mut rx) = mpsc::channel(4);
        let cancel = CancellationToken::new();

        let task = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                run_live_session(
                    "test",
                    detector(2, 0),
                    AnalyticsConfig::default(),
                    &mut source,
                    tx,
                    cancel,
                )
                .await
            })
        };

        frames.send(RgbImage::new(64, 48)).await.unwrap();
        assert!(rx.recv().await.is_some());

        // Source is idle; cancellation must still end the session.
        cancel.cancel();
        let stats = task.await.unwrap().unwrap();
        assert_eq!(stats, LiveStats { frames: 1, end: LiveEnd::Cancelled });
    }

    #[tokio::test]
    async fn test_dropped_receiver_ends_session() {
        let mut source = MemorySource::new((0..10).map(|_| RgbImage::new(64, 48)));
        let (tx, rx) = mpsc::channel(1);
        drop(rx);

        let stats = run_live_session(
            "test",
            detector(1, 0),
            AnalyticsConfig::default(),
            &mut source,
            tx,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(stats.end, LiveEnd::ClientGone);
        assert_eq!(stats.frames, 1);
    }
}
