/// Mock person detector for demos and tests
use super::Detector;
use anyhow::Result;
use async_trait::async_trait;
use common::crowd::{PersonDetection, PixelBox};
use image::RgbImage;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MockDetectorConfig {
    /// People walking around the scene
    #[serde(default = "default_people")]
    pub people: usize,

    /// How many of them gather in the lower-right corner
    #[serde(default = "default_crowd")]
    pub crowd: usize,

    /// Confidence reported for every detection
    #[serde(default = "default_confidence")]
    pub confidence: f32,

    /// Simulate processing delay in milliseconds
    #[serde(default)]
    pub simulated_delay_ms: u64,
}

fn default_people() -> usize {
    6
}

fn default_crowd() -> usize {
    0
}

fn default_confidence() -> f32 {
    0.9
}

impl Default for MockDetectorConfig {
    fn default() -> Self {
        Self {
            people: default_people(),
            crowd: default_crowd(),
            confidence: default_confidence(),
            simulated_delay_ms: 0,
        }
    }
}

/// Deterministic synthetic people.
///
/// Walkers drift slowly so a tracker can follow them; crowd members stand
/// still around one spot. The same sequence number always yields the same
/// boxes.
#[derive(Debug, Clone, Default)]
pub struct MockDetector {
    config: MockDetectorConfig,
}

impl MockDetector {
    pub fn new(config: MockDetectorConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &MockDetectorConfig {
        &self.config
    }

    fn person(&self, width: u32, height: u32, x: i64, y: i64) -> PersonDetection {
        let h = i64::from(height / 5).max(2);
        let w = (h / 3).max(1);
        let max_x = (i64::from(width) - w).max(1);
        let max_y = (i64::from(height) - h).max(1);
        let x1 = x.rem_euclid(max_x) as i32;
        let y1 = y.clamp(0, max_y - 1) as i32;
        PersonDetection {
            bbox: PixelBox::new(x1, y1, x1 + w as i32, y1 + h as i32),
            confidence: self.config.confidence,
        }
    }

    /// Boxes for one frame size and sequence number.
    pub fn people_at(&self, width: u32, height: u32, sequence: u64) -> Vec<PersonDetection> {
        let seq = sequence as i64;
        let lane = i64::from(height / 5).max(1);
        let mut detections = Vec::with_capacity(self.config.people + self.config.crowd);

        for i in 0..self.config.people as i64 {
            let speed = i % 3 + 1;
            let x = i * 97 + seq * speed;
            let y = (i % 4) * lane;
            detections.push(self.person(width, height, x, y));
        }

        let (cx, cy) = (i64::from(width) * 3 / 4, i64::from(height) * 3 / 5);
        for j in 0..self.config.crowd as i64 {
            let dx = (j % 4) * 6;
            let dy = (j / 4) * 4;
            detections.push(self.person(width, height, cx + dx, cy + dy));
        }

        detections
    }
}

#[async_trait]
impl Detector for MockDetector {
    fn id(&self) -> &'static str {
        "mock"
    }

    async fn detect(&self, frame: &RgbImage, sequence: u64) -> Result<Vec<PersonDetection>> {
        if self.config.simulated_delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(
                self.config.simulated_delay_ms,
            ))
            .await;
        }
        let (width, height) = frame.dimensions();
        Ok(self.people_at(width, height, sequence))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_deterministic_per_sequence() {
        let detector = MockDetector::default();
        let frame = RgbImage::new(640, 480);
        let a = detector.detect(&frame, 7).await.unwrap();
        let b = detector.detect(&frame, 7).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), 6);
    }

    #[test]
    fn test_boxes_stay_in_frame() {
        let detector = MockDetector::new(MockDetectorConfig {
            people: 10,
            crowd: 9,
            ..Default::default()
        });
        for seq in [0, 1, 500, 10_000] {
            for d in detector.people_at(320, 240, seq) {
                assert!(d.bbox.x1 >= 0 && d.bbox.x2 <= 320, "{:?}", d.bbox);
                assert!(d.bbox.y1 >= 0 && d.bbox.y2 <= 240, "{:?}", d.bbox);
                assert!(d.bbox.height() > 0);
            }
        }
    }

    #[test]
    fn test_walkers_move_slowly() {
        let detector = MockDetector::default();
        let a = detector.people_at(640, 480, 10);
        let b = detector.people_at(640, 480, 11);
        for (p, q) in a.iter().zip(&b) {
            assert!(p.bbox.iou(&q.bbox) > 0.5);
        }
    }

    #[test]
    fn test_crowd_packs_into_one_spot() {
        let detector = MockDetector::new(MockDetectorConfig {
            people: 0,
            crowd: 8,
            ..Default::default()
        });
        let people = detector.people_at(400, 400, 3);
        assert_eq!(people.len(), 8);
        let xs: Vec<i32> = people.iter().map(|p| p.bbox.anchor().0).collect();
        assert!(xs.iter().max().unwrap() - xs.iter().min().unwrap() < 40);
    }
}
