//! Multi-object tracking over person detections.

use common::crowd::{PersonDetection, PixelBox, Track, TrackId};

/// Turns per-frame detections into identities that persist across frames.
pub trait Tracker: Send {
    /// Feed one frame of detections and return the confirmed tracks.
    fn update(&mut self, detections: &[PersonDetection]) -> Vec<Track>;

    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy)]
pub struct IouTrackerConfig {
    /// Minimum overlap for a detection to continue a track
    pub iou_threshold: f32,
    /// Consecutive hits before a track is reported
    pub min_hits: u32,
    /// Frames a confirmed track may go unmatched before deletion
    pub max_age: u32,
}

impl Default for IouTrackerConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            min_hits: 3,
            max_age: 30,
        }
    }
}

#[derive(Debug, Clone)]
struct TrackState {
    id: TrackId,
    bbox: PixelBox,
    hits: u32,
    misses: u32,
    confirmed: bool,
    confidence: Option<f32>,
}

/// Greedy IoU association tracker.
///
/// Confirmed tracks coast on their last box while unmatched (reported
/// without a confidence) until `max_age` misses. Tentative tracks are
/// dropped on their first miss.
#[derive(Debug, Clone)]
pub struct IouTracker {
    config: IouTrackerConfig,
    tracks: Vec<TrackState>,
    next_id: u64,
}

impl IouTracker {
    pub fn new(config: IouTrackerConfig) -> Self {
        Self {
            config,
            tracks: Vec::new(),
            next_id: 1,
        }
    }

    /// Tracks currently held, confirmed or not.
    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    fn associate(&self, detections: &[PersonDetection]) -> Vec<(usize, usize)> {
        let mut candidates = Vec::new();
        for (t, track) in self.tracks.iter().enumerate() {
            for (d, det) in detections.iter().enumerate() {
                let iou = track.bbox.iou(&det.bbox);
                if iou >= self.config.iou_threshold {
                    candidates.push((iou, t, d));
                }
            }
        }
        candidates.sort_by(|a, b| b.0.total_cmp(&a.0));

        let mut track_used = vec![false; self.tracks.len()];
        let mut det_used = vec![false; detections.len()];
        let mut matches = Vec::new();
        for (_, t, d) in candidates {
            if track_used[t] || det_used[d] {
                continue;
            }
            track_used[t] = true;
            det_used[d] = true;
            matches.push((t, d));
        }
        matches
    }
}

impl Default for IouTracker {
    fn default() -> Self {
        Self::new(IouTrackerConfig::default())
    }
}

impl Tracker for IouTracker {
    fn update(&mut self, detections: &[PersonDetection]) -> Vec<Track> {
        let matches = self.associate(detections);

        for track in &mut self.tracks {
            track.misses += 1;
            track.confidence = None;
        }

        let mut det_used = vec![false; detections.len()];
        for (t, d) in matches {
            let det = &detections[d];
            let track = &mut self.tracks[t];
            track.bbox = det.bbox;
            track.confidence = Some(det.confidence);
            track.hits += 1;
            track.misses = 0;
            if track.hits >= self.config.min_hits {
                track.confirmed = true;
            }
            det_used[d] = true;
        }

        let max_age = self.config.max_age;
        self.tracks.retain(|t| {
            if t.confirmed {
                t.misses <= max_age
            } else {
                t.misses == 0
            }
        });

        for (det, used) in detections.iter().zip(det_used) {
            if used {
                continue;
            }
            let id = TrackId(self.next_id);
            self.next_id += 1;
            self.tracks.push(TrackState {
                id,
                bbox: det.bbox,
                hits: 1,
                misses: 0,
                confirmed: self.config.min_hits <= 1,
                confidence: Some(det.confidence),
            });
        }

        self.tracks
            .iter()
            .filter(|t| t.confirmed)
            .map(|t| Track {
                id: t.id,
                bbox: t.bbox,
                confidence: t.confidence,
            })
            .collect()
    }

    fn reset(&mut self) {
        self.tracks.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn det(x: i32, y: i32) -> PersonDetection {
        PersonDetection {
            bbox: PixelBox::new(x, y, x + 20, y + 60),
            confidence: 0.9,
        }
    }

    #[test]
    fn test_confirmation_after_min_hits() {
        let mut tracker = IouTracker::default();
        assert!(tracker.update(&[det(10, 10)]).is_empty());
        assert!(tracker.update(&[det(12, 10)]).is_empty());
        let tracks = tracker.update(&[det(14, 10)]);
        assert_eq!(tracks.len(), 1);
        assert_eq!(tracks[0].id, TrackId(1));
        assert_eq!(tracks[0].confidence, Some(0.9));
    }

    #[test]
    fn test_identity_is_stable_while_moving() {
        let mut tracker = IouTracker::default();
        let mut ids = Vec::new();
        for step in 0..10 {
            let tracks = tracker.update(&[det(10 + step * 2, 10), det(200, 50 + step)]);
            if step >= 2 {
                ids.push(tracks.iter().map(|t| t.id).collect::<Vec<_>>());
            }
        }
        assert!(ids.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(ids[0].len(), 2);
    }

    #[test]
    fn test_confirmed_track_coasts_then_expires() {
        let mut tracker = IouTracker::new(IouTrackerConfig {
            max_age: 2,
            ..Default::default()
        });
        for _ in 0..3 {
            tracker.update(&[det(10, 10)]);
        }

        let coasting = tracker.update(&[]);
        assert_eq!(coasting.len(), 1);
        assert_eq!(coasting[0].confidence, None);

        assert_eq!(tracker.update(&[]).len(), 1);
        assert!(tracker.update(&[]).is_empty());
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_tentative_track_dropped_on_miss() {
        let mut tracker = IouTracker::default();
        tracker.update(&[det(10, 10)]);
        tracker.update(&[]);
        assert!(tracker.is_empty());

        // A fresh detection starts a new identity.
        tracker.update(&[det(10, 10)]);
        tracker.update(&[det(10, 10)]);
        let tracks = tracker.update(&[det(10, 10)]);
        assert_eq!(tracks[0].id, TrackId(2));
    }
}
