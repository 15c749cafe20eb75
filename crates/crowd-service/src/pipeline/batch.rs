//! Whole-video analysis behind `POST /analyze/`.

use super::{FrameProcessor, FrameSource, SessionGauge};
use crate::config::ServiceConfig;
use crate::detector::{self, Detector};
use anyhow::Context;
use async_trait::async_trait;
use common::crowd::BatchReport;
use common::video::{encode_png, probe_video, to_base64, FrameReader, VideoWriter};
use crowd_analytics::summary::prediction_report;
use crowd_analytics::{AnalyticsConfig, AnalyticsError, SessionMode, SessionSummary};
use image::RgbImage;
use std::path::Path;
use std::sync::Arc;
use telemetry::metrics;
use thiserror::Error;
use tracing::{info, instrument, warn};

#[derive(Debug, Error)]
pub enum BatchError {
    #[error("could not open video {path}: {reason}")]
    Open { path: String, reason: String },

    #[error(transparent)]
    Analytics(#[from] AnalyticsError),

    #[error(transparent)]
    Pipeline(#[from] anyhow::Error),
}

/// Destination for annotated frames.
#[async_trait]
pub trait FrameSink: Send {
    async fn write_frame(&mut self, frame: &RgbImage) -> anyhow::Result<()>;
}

#[async_trait]
impl FrameSink for VideoWriter {
    async fn write_frame(&mut self, frame: &RgbImage) -> anyhow::Result<()> {
        VideoWriter::write_frame(self, frame).await
    }
}

/// Counts frames and throws them away.
#[derive(Debug, Default)]
pub struct DiscardSink {
    pub frames: u64,
}

#[async_trait]
impl FrameSink for DiscardSink {
    async fn write_frame(&mut self, _frame: &RgbImage) -> anyhow::Result<()> {
        self.frames += 1;
        Ok(())
    }
}

/// Heights of confident people over the first `frames` frames of a source.
pub async fn warmup_heights(
    detector: &dyn Detector,
    source: &mut dyn FrameSource,
    frames: usize,
    confidence_threshold: f32,
) -> anyhow::Result<Vec<f32>> {
    let mut heights = Vec::new();
    for sequence in 0..frames as u64 {
        let Some(frame) = source.next_frame().await? else {
            break;
        };
        let people = detector::confident(detector.detect(&frame, sequence).await?, confidence_threshold);
        heights.extend(detector::heights(&people));
    }
    Ok(heights)
}

/// Run one batch session: seed the grid from `warmup`, then analyse every
/// frame of `main` in order, handing annotated frames to `sink`.
pub async fn run_batch(
    detector: Arc<dyn Detector>,
    analytics: AnalyticsConfig,
    fps: f64,
    frame_height: u32,
    warmup: &mut dyn FrameSource,
    main: &mut dyn FrameSource,
    sink: &mut dyn FrameSink,
) -> Result<SessionSummary, BatchError> {
    let warmup_frames = analytics.warmup_frames(fps);
    let heights = warmup_heights(
        detector.as_ref(),
        warmup,
        warmup_frames,
        analytics.confidence_threshold,
    )
    .await
    .context("warm-up pass failed")?;

    let mut processor = FrameProcessor::new(detector, analytics, SessionMode::Batch, fps)?;
    processor.session_mut()?.seed_grid(&heights, frame_height);

    while let Some(frame) = main.next_frame().await? {
        let processed = processor.process(frame).await?;
        sink.write_frame(&processed.annotated).await?;
    }

    // The final heat snapshot and forecast overlay are a full-frame blur.
    let session = processor.into_session()?;
    let summary = tokio::task::spawn_blocking(move || session.finish())
        .await
        .context("session summary task failed")?;
    Ok(summary)
}

/// Write report artifacts and assemble the client-facing report.
pub async fn build_report(
    config: &ServiceConfig,
    job_id: &str,
    video_file: &str,
    summary: SessionSummary,
) -> anyhow::Result<BatchReport> {
    let heatmap_image_url = match &summary.heatmap {
        Some(heatmap) => {
            let file_name = format!("heatmap_{}.png", job_id);
            let path = config.output_dir.join(&file_name);
            tokio::fs::write(&path, encode_png(heatmap)?)
                .await
                .with_context(|| format!("failed to write heatmap {}", path.display()))?;
            Some(config.output_url(&file_name))
        }
        None => None,
    };

    let overlay_b64 = summary
        .prediction_overlay
        .as_ref()
        .map(|overlay| encode_png(overlay).map(|png| to_base64(&png)))
        .transpose()?;

    Ok(BatchReport {
        processed_video_url: config.output_url(video_file),
        heatmap_image_url,
        alerts: summary.alerts,
        summary: summary.counts,
        prediction: prediction_report(
            summary.prediction.as_ref(),
            config.analytics.prediction_horizon_secs,
            overlay_b64,
        ),
        people_count_by_second: summary.people_count_by_second,
        grid_counts_over_time: summary.grid_counts_over_time,
        grid_dimensions: summary.grid_dimensions,
    })
}

/// Analyse a recorded video end-to-end and write its artifacts under the
/// output directory.
#[instrument(skip(config, detector), fields(job_id = %job_id))]
pub async fn process_video(
    config: &ServiceConfig,
    detector: Arc<dyn Detector>,
    video: &Path,
    job_id: &str,
) -> Result<BatchReport, BatchError> {
    let _gauge = SessionGauge::enter(SessionMode::Batch);
    let result = analyze_video(config, detector, video, job_id).await;
    let status = if result.is_ok() { "completed" } else { "failed" };
    metrics::CROWD_BATCH_JOBS.with_label_values(&[status]).inc();
    result
}

async fn analyze_video(
    config: &ServiceConfig,
    detector: Arc<dyn Detector>,
    video: &Path,
    job_id: &str,
) -> Result<BatchReport, BatchError> {
    let display = video.display().to_string();
    let open_error = |e: anyhow::Error| BatchError::Open {
        path: display.clone(),
        reason: format!("{:#}", e),
    };

    if !video.is_file() {
        return Err(BatchError::Open {
            path: display.clone(),
            reason: "file not found".to_string(),
        });
    }

    let info = probe_video(&video.to_string_lossy()).await.map_err(open_error)?;
    let fps = match info.fps {
        Some(fps) => fps,
        None => {
            warn!("video reports no frame rate, assuming {}", config.analytics.default_fps);
            config.analytics.default_fps
        }
    };
    info!(
        width = info.width,
        height = info.height,
        fps,
        "starting batch analysis"
    );

    tokio::fs::create_dir_all(&config.output_dir)
        .await
        .with_context(|| format!("failed to create {}", config.output_dir.display()))?;

    let mut warmup = FrameReader::open_file(video, info.width, info.height).map_err(open_error)?;
    let mut main = FrameReader::open_file(video, info.width, info.height).map_err(open_error)?;

    let video_file = format!("processed_{}.mp4", job_id);
    let video_path = config.output_dir.join(&video_file);
    let mut writer = VideoWriter::create(&video_path, info.width, info.height, fps)?;

    let summary = run_batch(
        detector,
        config.analytics.clone(),
        fps,
        info.height,
        &mut warmup,
        &mut main,
        &mut writer,
    )
    .await?;
    drop(warmup);
    writer.finish().await?;

    info!(
        frames = summary.frames,
        alerts = summary.alerts.len(),
        "batch analysis finished"
    );
    Ok(build_report(config, job_id, &video_file, summary).await?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{MockDetector, MockDetectorConfig};
    use crate::pipeline::MemorySource;
    use common::crowd::AlertType;

    fn frames(n: usize) -> Vec<RgbImage> {
        (0..n).map(|_| RgbImage::new(320, 240)).collect()
    }

    fn crowd_detector(crowd: usize) -> Arc<dyn Detector> {
        Arc::new(MockDetector::new(MockDetectorConfig {
            people: 0,
            crowd,
            ..Default::default()
        }))
    }

    #[tokio::test]
    async fn test_sustained_crowd_produces_one_event() {
        let mut warmup = MemorySource::new(frames(60));
        let mut main = MemorySource::new(frames(60));
        let mut sink = DiscardSink::default();

        let summary = run_batch(
            crowd_detector(8),
            AnalyticsConfig::default(),
            25.0,
            240,
            &mut warmup,
            &mut main,
            &mut sink,
        )
        .await
        .unwrap();

        assert_eq!(sink.frames, 60);
        assert_eq!(summary.frames, 60);
        assert_eq!(summary.grid_dimensions.rows, 3);
        assert_eq!(summary.alerts.len(), 1);
        assert_eq!(summary.alerts[0].alert_type, AlertType::HighRiskEvent);
        assert!(summary.alerts[0].message.contains("Bottom-Right Zone"));
        assert_eq!(summary.counts.max_people_detected, 8);
        assert_eq!(summary.grid_counts_over_time.len(), 60);
    }

    #[tokio::test]
    async fn test_sparse_scene_has_no_alerts() {
        let mut warmup = MemorySource::new(frames(10));
        let mut main = MemorySource::new(frames(30));
        let mut sink = DiscardSink::default();

        let summary = run_batch(
            crowd_detector(3),
            AnalyticsConfig::default(),
            25.0,
            240,
            &mut warmup,
            &mut main,
            &mut sink,
        )
        .await
        .unwrap();

        assert!(summary.alerts.is_empty());
        assert!(summary.prediction.is_none());
        assert!(summary.heatmap.is_some());
    }

    #[tokio::test]
    async fn test_build_report_writes_heatmap() {
        let dir = tempfile::tempdir().unwrap();
        let config = ServiceConfig {
            output_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let mut warmup = MemorySource::new(frames(5));
        let mut main = MemorySource::new(frames(20));
        let summary = run_batch(
            crowd_detector(2),
            AnalyticsConfig::default(),
            25.0,
            240,
            &mut warmup,
            &mut main,
            &mut DiscardSink::default(),
        )
        .await
        .unwrap();

        let report = build_report(&config, "job1", "processed_job1.mp4", summary)
            .await
            .unwrap();
        assert_eq!(report.processed_video_url, "outputs/processed_job1.mp4");
        assert_eq!(report.heatmap_image_url.as_deref(), Some("outputs/heatmap_job1.png"));
        assert!(dir.path().join("heatmap_job1.png").exists());
        assert_eq!(report.prediction.prediction_horizon, "30s");
        assert!(report.prediction.heatmap_prediction_b64.is_some());
        assert_eq!(report.people_count_by_second.len(), 1);
    }

    #[tokio::test]
    async fn test_missing_video_is_open_error() {
        let config = ServiceConfig::default();
        let err = process_video(
            &config,
            crowd_detector(1),
            Path::new("/nonexistent/crowd.mp4"),
            "job2",
        )
        .await
        .unwrap_err();
        assert!(matches!(err, BatchError::Open { .. }));
    }
}
