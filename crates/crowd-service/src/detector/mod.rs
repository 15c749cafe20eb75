pub mod mock;
pub mod remote;

use crate::config::{DetectorKind, ServiceConfig};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use common::crowd::PersonDetection;
use image::RgbImage;
use std::sync::Arc;

pub use mock::{MockDetector, MockDetectorConfig};
pub use remote::RemoteDetector;

/// Person detector consulted by the pipelines.
///
/// Implementations return every person candidate they see; confidence
/// filtering happens in the pipeline so all detectors share one cutoff.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Short identifier used in logs and metric labels
    fn id(&self) -> &'static str;

    async fn detect(&self, frame: &RgbImage, sequence: u64) -> Result<Vec<PersonDetection>>;

    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Keep detections strictly above the confidence cutoff.
pub fn confident(detections: Vec<PersonDetection>, cutoff: f32) -> Vec<PersonDetection> {
    detections
        .into_iter()
        .filter(|d| d.confidence > cutoff)
        .collect()
}

pub fn heights(detections: &[PersonDetection]) -> Vec<f32> {
    detections.iter().map(|d| d.bbox.height() as f32).collect()
}

pub fn build_detector(config: &ServiceConfig) -> Result<Arc<dyn Detector>> {
    match config.detector {
        DetectorKind::Mock => Ok(Arc::new(MockDetector::default())),
        DetectorKind::Remote => {
            let url = config
                .detector_url
                .clone()
                .ok_or_else(|| anyhow!("remote detector requires an endpoint URL"))?;
            Ok(Arc::new(RemoteDetector::new(url)?))
        }
    }
}
