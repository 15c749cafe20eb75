use common::crowd::{Track, TrackId};
use image::Rgb;
use std::collections::{HashMap, VecDeque};

/// Displacement (px) a trail must exceed before it is drawn.
const MIN_ARROW_MAGNITUDE: f32 = 5.0;

/// Drawn arrow length in pixels.
const ARROW_LENGTH: f32 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpeedClass {
    Slow,
    Moderate,
    Fast,
}

impl SpeedClass {
    pub fn color(&self) -> Rgb<u8> {
        match self {
            SpeedClass::Slow => Rgb([0, 255, 0]),
            SpeedClass::Moderate => Rgb([255, 255, 0]),
            SpeedClass::Fast => Rgb([255, 0, 0]),
        }
    }
}

/// Direction-of-travel arrow for one track.
#[derive(Debug, Clone, PartialEq)]
pub struct Motion {
    pub track: TrackId,
    pub start: (i32, i32),
    pub end: (i32, i32),
    /// First-to-last displacement over the trail, in pixels
    pub magnitude: f32,
    pub speed: SpeedClass,
}

/// Recent anchor points per track, used only for motion arrows.
#[derive(Debug, Clone)]
pub struct TrackTrails {
    trails: HashMap<TrackId, VecDeque<(i32, i32)>>,
    capacity: usize,
    min_samples: usize,
    speed_low: f32,
    speed_high: f32,
}

impl TrackTrails {
    pub fn new(capacity: usize, min_samples: usize, speed_low: f32, speed_high: f32) -> Self {
        Self {
            trails: HashMap::new(),
            capacity: capacity.max(1),
            min_samples,
            speed_low,
            speed_high,
        }
    }

    pub fn len(&self) -> usize {
        self.trails.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trails.is_empty()
    }

    pub fn trail(&self, id: TrackId) -> Option<&VecDeque<(i32, i32)>> {
        self.trails.get(&id)
    }

    fn classify(&self, magnitude: f32) -> SpeedClass {
        if magnitude > self.speed_high {
            SpeedClass::Fast
        } else if magnitude > self.speed_low {
            SpeedClass::Moderate
        } else {
            SpeedClass::Slow
        }
    }

    /// Record this frame's anchors, forget tracks that are no longer present
    /// and return the arrows to draw.
    pub fn update(&mut self, tracks: &[Track]) -> Vec<Motion> {
        let mut motions = Vec::new();

        for track in tracks {
            let anchor = track.bbox.anchor();
            let trail = self.trails.entry(track.id).or_default();
            if trail.len() == self.capacity {
                trail.pop_front();
            }
            trail.push_back(anchor);

            if trail.len() <= self.min_samples {
                continue;
            }
            let (Some(first), Some(last)) = (trail.front(), trail.back()) else {
                continue;
            };
            let dx = (i64::from(last.0) - i64::from(first.0)) as f32;
            let dy = (i64::from(last.1) - i64::from(first.1)) as f32;
            let magnitude = dx.hypot(dy);
            if magnitude <= MIN_ARROW_MAGNITUDE {
                continue;
            }

            let end = (
                anchor.0.saturating_add((dx / magnitude * ARROW_LENGTH) as i32),
                anchor.1.saturating_add((dy / magnitude * ARROW_LENGTH) as i32),
            );
            motions.push(Motion {
                track: track.id,
                start: anchor,
                end,
                magnitude,
                speed: self.classify(magnitude),
            });
        }

        let present: std::collections::HashSet<TrackId> = tracks.iter().map(|t| t.id).collect();
        self.trails.retain(|id, _| present.contains(id));

        motions
    }
}
