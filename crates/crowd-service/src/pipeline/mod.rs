//! Session pipelines: detector and tracker in front of the analytics core,
//! rendering behind it.

pub mod batch;
pub mod live;
pub mod source;

use crate::detector::{self, Detector};
use crate::tracker::{IouTracker, Tracker};
use anyhow::{anyhow, Context, Result};
use common::crowd::AlertType;
use crowd_analytics::{
    AnalyticsConfig, AnalyticsSession, FrameRenderer, FrameResult, SessionMode, SessionPolicy,
};
use image::RgbImage;
use std::sync::Arc;
use std::time::Instant;
use telemetry::metrics;

pub use source::{ChannelSource, FrameSource, MemorySource, PrimedSource};

/// One analysed and annotated frame.
pub struct ProcessedFrame {
    pub result: FrameResult,
    pub annotated: RgbImage,
}

/// Session state and renderer, moved onto the blocking pool for the
/// CPU-bound part of each frame.
struct Analysis {
    session: AnalyticsSession,
    renderer: FrameRenderer,
}

/// Runs the per-frame chain shared by batch and live sessions:
/// detection on policy frames, tracking, analysis and rendering.
pub struct FrameProcessor {
    detector: Arc<dyn Detector>,
    tracker: Box<dyn Tracker>,
    /// `None` only if a frame was interrupted while its analysis ran
    analysis: Option<Analysis>,
}

impl FrameProcessor {
    pub fn new(detector: Arc<dyn Detector>, config: AnalyticsConfig, mode: SessionMode, fps: f64) -> Result<Self> {
        let policy = SessionPolicy::for_mode(mode, &config);
        let renderer = FrameRenderer::new(config.cell_density_threshold);
        let session = AnalyticsSession::new(config, policy, fps)?;
        Ok(Self {
            detector,
            tracker: Box::new(IouTracker::default()),
            analysis: Some(Analysis { session, renderer }),
        })
    }

    pub fn session(&self) -> Result<&AnalyticsSession> {
        self.analysis
            .as_ref()
            .map(|a| &a.session)
            .ok_or_else(lost_session)
    }

    pub fn session_mut(&mut self) -> Result<&mut AnalyticsSession> {
        self.analysis
            .as_mut()
            .map(|a| &mut a.session)
            .ok_or_else(lost_session)
    }

    pub fn into_session(self) -> Result<AnalyticsSession> {
        self.analysis.map(|a| a.session).ok_or_else(lost_session)
    }

    pub async fn process(&mut self, frame: RgbImage) -> Result<ProcessedFrame> {
        let started = Instant::now();
        let (width, height) = frame.dimensions();
        let session = self.session_mut()?;
        let mode = session.policy().mode.as_str();
        let sequence = session.frame_index() + 1;
        let detect = session.needs_detection();
        let confidence_threshold = session.config().confidence_threshold;

        let tracks = if detect {
            let raw = self
                .detector
                .detect(&frame, sequence)
                .await
                .with_context(|| format!("detector failed on frame {}", sequence))?;
            metrics::CROWD_DETECTOR_INVOCATIONS
                .with_label_values(&[mode, self.detector.id()])
                .inc();

            let people = detector::confident(raw, confidence_threshold);
            self.session_mut()?
                .maybe_recompute_grid(&detector::heights(&people), height, started);
            Some(self.tracker.update(&people))
        } else {
            None
        };

        // Binning, heatmap blur and drawing are CPU-bound.
        let mut analysis = self.analysis.take().ok_or_else(lost_session)?;
        let (analysis, outcome) = tokio::task::spawn_blocking(move || {
            let outcome = analysis
                .session
                .analyze_frame(tracks, width, height)
                .map(|result| {
                    let annotated = analysis.renderer.render(&frame, &result);
                    ProcessedFrame { result, annotated }
                });
            (analysis, outcome)
        })
        .await
        .context("frame analysis task failed")?;
        self.analysis = Some(analysis);
        let processed = outcome?;

        metrics::CROWD_FRAMES_ANALYZED.with_label_values(&[mode]).inc();
        metrics::CROWD_FRAME_LATENCY
            .with_label_values(&[mode])
            .observe(started.elapsed().as_secs_f64());
        for alert in &processed.result.alerts {
            metrics::CROWD_ALERTS_EMITTED
                .with_label_values(&[alert_label(alert.alert_type)])
                .inc();
        }

        Ok(processed)
    }
}

fn lost_session() -> anyhow::Error {
    anyhow!("analysis session was lost to an interrupted frame")
}

pub(crate) fn alert_label(alert_type: AlertType) -> &'static str {
    match alert_type {
        AlertType::HighRiskDetected => "high_risk_detected",
        AlertType::HighRiskEvent => "high_risk_event",
    }
}

/// Keeps the active-session gauge in step with a running session.
pub(crate) struct SessionGauge {
    mode: &'static str,
}

impl SessionGauge {
    pub(crate) fn enter(mode: SessionMode) -> Self {
        let mode = mode.as_str();
        metrics::CROWD_ACTIVE_SESSIONS.with_label_values(&[mode]).inc();
        Self { mode }
    }
}

impl Drop for SessionGauge {
    fn drop(&mut self) {
        metrics::CROWD_ACTIVE_SESSIONS
            .with_label_values(&[self.mode])
            .dec();
    }
}
