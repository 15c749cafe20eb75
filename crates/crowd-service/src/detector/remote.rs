use super::Detector;
use anyhow::{Context, Result};
use async_trait::async_trait;
use common::crowd::{InferenceResult, PersonDetection, PixelBox, VideoFrame};
use common::validation::unix_timestamp_millis;
use common::video::{encode_jpeg, to_base64};
use image::RgbImage;
use reqwest::Url;
use std::time::Duration;
use tracing::instrument;

const PERSON_CLASS: &str = "person";
const JPEG_QUALITY: u8 = 85;

/// Detector backed by an HTTP inference endpoint.
///
/// Frames are posted as base64 JPEG `VideoFrame`s; non-person detections in
/// the reply are discarded.
pub struct RemoteDetector {
    endpoint: Url,
    client: reqwest::Client,
}

impl RemoteDetector {
    pub fn new(endpoint: Url) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(3))
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self { endpoint, client })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

pub(crate) fn persons(result: InferenceResult) -> Vec<PersonDetection> {
    result
        .detections
        .into_iter()
        .filter(|d| d.class.eq_ignore_ascii_case(PERSON_CLASS))
        .map(|d| PersonDetection {
            bbox: PixelBox::from(d.bbox),
            confidence: d.confidence,
        })
        .collect()
}

#[async_trait]
impl Detector for RemoteDetector {
    fn id(&self) -> &'static str {
        "remote"
    }

    #[instrument(skip_all, fields(sequence))]
    async fn detect(&self, frame: &RgbImage, sequence: u64) -> Result<Vec<PersonDetection>> {
        let jpeg = encode_jpeg(frame, JPEG_QUALITY)?;
        let request = VideoFrame {
            source_id: "crowd-service".to_string(),
            timestamp: unix_timestamp_millis(),
            sequence,
            width: frame.width(),
            height: frame.height(),
            format: "jpeg".to_string(),
            data: to_base64(&jpeg),
        };

        let resp = self
            .client
            .post(self.endpoint.clone())
            .json(&request)
            .send()
            .await
            .context("detector request failed")?;
        let resp = resp
            .error_for_status()
            .context("detector returned error status")?;
        let result: InferenceResult = resp
            .json()
            .await
            .context("failed to parse detector response")?;

        Ok(persons(result))
    }
}
