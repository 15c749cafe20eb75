//! Annotated output frames: density overlay, cell outlines with count bars,
//! person boxes, motion arrows and a total-count bar.

use crate::heatmap::density_overlay;
use crate::session::FrameResult;
use crate::trails::Motion;
use common::crowd::PixelBox;
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut};
use imageproc::rect::Rect;

const OVERLAY_WEIGHT: f32 = 0.4;
const FRAME_WEIGHT: f32 = 0.6;

const UNSAFE_COLOR: Rgb<u8> = Rgb([255, 0, 0]);
const SAFE_COLOR: Rgb<u8> = Rgb([0, 200, 0]);
const BOX_COLOR: Rgb<u8> = Rgb([0, 255, 0]);
const BACKDROP: Rgb<u8> = Rgb([0, 0, 0]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);

/// Pixels of bar per counted person.
const BAR_UNIT: u32 = 6;
const BAR_HEIGHT: u32 = 6;
const TOTAL_BAR_UNIT: u32 = 12;
const TOTAL_BAR_HEIGHT: u32 = 14;
const TOTAL_BAR_MARGIN: u32 = 40;

/// Arrow head length as a fraction of the shaft.
const ARROW_TIP: f32 = 0.5;

#[derive(Debug, Clone)]
pub struct FrameRenderer {
    density_threshold: u32,
}

fn rect(x: i32, y: i32, w: u32, h: u32) -> Rect {
    Rect::at(x, y).of_size(w.max(1), h.max(1))
}

/// Box limited to a small margin around the frame, as `(x, y, w, h)`.
/// Detector boxes can reach far outside the image.
fn clip_box(b: &PixelBox, width: u32, height: u32) -> (i32, i32, u32, u32) {
    const MARGIN: i32 = 16;
    let max_x = i32::try_from(width).unwrap_or(i32::MAX - MARGIN) + MARGIN;
    let max_y = i32::try_from(height).unwrap_or(i32::MAX - MARGIN) + MARGIN;
    let x1 = b.x1.clamp(-MARGIN, max_x);
    let y1 = b.y1.clamp(-MARGIN, max_y);
    let x2 = b.x2.clamp(-MARGIN, max_x);
    let y2 = b.y2.clamp(-MARGIN, max_y);
    (x1, y1, (x2 - x1).max(1) as u32, (y2 - y1).max(1) as u32)
}

/// Weighted blend of `overlay` onto `frame`, in place.
pub fn blend(frame: &mut RgbImage, overlay: &RgbImage, overlay_weight: f32, frame_weight: f32) {
    for (dst, src) in frame.pixels_mut().zip(overlay.pixels()) {
        for c in 0..3 {
            let v = f32::from(src.0[c]) * overlay_weight + f32::from(dst.0[c]) * frame_weight;
            dst.0[c] = v.round().clamp(0.0, 255.0) as u8;
        }
    }
}

impl FrameRenderer {
    pub fn new(density_threshold: u32) -> Self {
        Self { density_threshold }
    }

    /// Draw the analytics of `result` over a copy of `frame`.
    pub fn render(&self, frame: &RgbImage, result: &FrameResult) -> RgbImage {
        let (width, height) = frame.dimensions();
        let mut vis = frame.clone();

        let overlay = density_overlay(&result.grid, width, height);
        blend(&mut vis, &overlay, OVERLAY_WEIGHT, FRAME_WEIGHT);

        self.draw_cells(&mut vis, result);
        self.draw_tracks(&mut vis, result);
        for motion in &result.motions {
            draw_arrow(&mut vis, motion);
        }
        draw_total(&mut vis, result.total_count);

        vis
    }

    fn draw_cells(&self, vis: &mut RgbImage, result: &FrameResult) {
        let (cell_w, cell_h) = result.grid.cell_size();
        for (cell, count) in result.grid.cells() {
            let color = if count >= self.density_threshold {
                UNSAFE_COLOR
            } else {
                SAFE_COLOR
            };
            let x = (cell.col as u32 * cell_w) as i32;
            let y = (cell.row as u32 * cell_h) as i32;
            draw_hollow_rect_mut(vis, rect(x, y, cell_w, cell_h), color);

            if count > 0 {
                let bar = (count * BAR_UNIT).min(cell_w.saturating_sub(10));
                draw_filled_rect_mut(vis, rect(x + 4, y + 4, bar + 2, BAR_HEIGHT + 2), BACKDROP);
                draw_filled_rect_mut(vis, rect(x + 5, y + 5, bar, BAR_HEIGHT), color);
            }
        }
    }

    fn draw_tracks(&self, vis: &mut RgbImage, result: &FrameResult) {
        for placement in &result.placements {
            let Some(confidence) = placement.track.confidence else {
                continue;
            };
            let (x, y, w, h) = clip_box(&placement.track.bbox, vis.width(), vis.height());
            draw_hollow_rect_mut(vis, rect(x, y, w, h), BOX_COLOR);
            draw_hollow_rect_mut(vis, rect(x + 1, y + 1, w.saturating_sub(2), h.saturating_sub(2)), BOX_COLOR);

            // confidence tab above the box
            let tab = (w as f32 * confidence.clamp(0.0, 1.0)).round() as u32;
            draw_filled_rect_mut(vis, rect(x, y - 10, tab, 5), BOX_COLOR);
        }
    }
}

fn draw_arrow(vis: &mut RgbImage, motion: &Motion) {
    let color = motion.speed.color();
    let start = (motion.start.0 as f32, motion.start.1 as f32);
    let end = (motion.end.0 as f32, motion.end.1 as f32);

    for offset in [0.0, 1.0] {
        draw_line_segment_mut(vis, (start.0 + offset, start.1), (end.0 + offset, end.1), color);
    }

    let (dx, dy) = (start.0 - end.0, start.1 - end.1);
    let len = dx.hypot(dy);
    if len <= f32::EPSILON {
        return;
    }
    let tip = len * ARROW_TIP;
    let (ux, uy) = (dx / len, dy / len);
    let (sin, cos) = std::f32::consts::FRAC_PI_4.sin_cos();
    for sign in [1.0, -1.0] {
        let rx = ux * cos - sign * uy * sin;
        let ry = sign * ux * sin + uy * cos;
        draw_line_segment_mut(vis, end, (end.0 + rx * tip, end.1 + ry * tip), color);
    }
}

fn draw_total(vis: &mut RgbImage, total: usize) {
    let (width, height) = vis.dimensions();
    if height <= TOTAL_BAR_MARGIN + TOTAL_BAR_HEIGHT || width <= 2 * TOTAL_BAR_MARGIN {
        return;
    }
    let max_bar = width - 2 * TOTAL_BAR_MARGIN;
    let bar = (total as u32).saturating_mul(TOTAL_BAR_UNIT).min(max_bar);
    let x = TOTAL_BAR_MARGIN as i32;
    let y = (height - TOTAL_BAR_MARGIN - TOTAL_BAR_HEIGHT) as i32;

    draw_filled_rect_mut(vis, rect(x - 2, y - 2, max_bar + 4, TOTAL_BAR_HEIGHT + 4), BACKDROP);
    if bar > 0 {
        draw_filled_rect_mut(vis, rect(x, y, bar, TOTAL_BAR_HEIGHT), WHITE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnalyticsConfig;
    use crate::policy::SessionPolicy;
    use crate::session::AnalyticsSession;
    use common::crowd::{Track, TrackId};

    #[test]
    fn test_blend_weights() {
        let mut frame = RgbImage::from_pixel(2, 2, Rgb([100, 100, 100]));
        let overlay = RgbImage::from_pixel(2, 2, Rgb([200, 0, 50]));
        blend(&mut frame, &overlay, 0.4, 0.6);
        assert_eq!(*frame.get_pixel(0, 0), Rgb([140, 60, 80]));
    }

    #[test]
    fn test_render_keeps_frame_size_and_marks_congestion() {
        let config = AnalyticsConfig {
            cell_density_threshold: 2,
            ..Default::default()
        };
        let mut session = AnalyticsSession::new(config, SessionPolicy::batch(), 25.0).unwrap();
        let tracks: Vec<Track> = (0..3)
            .map(|i| Track {
                id: TrackId(i),
                bbox: PixelBox::new(10, 10, 30, 60),
                confidence: Some(0.8),
            })
            .collect();
        let result = session.analyze_frame(Some(tracks), 200, 160).unwrap();

        let frame = RgbImage::from_pixel(200, 160, Rgb([90, 90, 90]));
        let out = FrameRenderer::new(2).render(&frame, &result);
        assert_eq!(out.dimensions(), (200, 160));

        // congested cell outline is red, an empty one green
        assert_eq!(*out.get_pixel(0, 20), UNSAFE_COLOR);
        assert_eq!(*out.get_pixel(100, 20), SAFE_COLOR);
        // person box edge
        assert_eq!(*out.get_pixel(20, 59), BOX_COLOR);
    }

    #[test]
    fn test_render_far_out_boxes() {
        let mut session =
            AnalyticsSession::new(AnalyticsConfig::default(), SessionPolicy::batch(), 25.0).unwrap();
        let tracks = vec![
            Track {
                id: TrackId(1),
                bbox: PixelBox::new(1_500_000_000, 10, i32::MAX, 30),
                confidence: Some(0.9),
            },
            Track {
                id: TrackId(2),
                bbox: PixelBox::new(i32::MIN, i32::MIN, i32::MAX, i32::MAX),
                confidence: Some(0.9),
            },
        ];
        let result = session.analyze_frame(Some(tracks), 120, 90).unwrap();
        let out = FrameRenderer::new(6).render(&RgbImage::new(120, 90), &result);
        assert_eq!(out.dimensions(), (120, 90));
    }

    #[test]
    fn test_clip_box_keeps_in_frame_boxes() {
        assert_eq!(clip_box(&PixelBox::new(10, 10, 30, 60), 200, 160), (10, 10, 20, 50));
        assert_eq!(
            clip_box(&PixelBox::new(i32::MIN, -5, i32::MAX, 5), 200, 160),
            (-16, -5, 232, 10)
        );
    }

    #[test]
    fn test_render_tiny_frame_does_not_panic() {
        let mut session =
            AnalyticsSession::new(AnalyticsConfig::default(), SessionPolicy::batch(), 25.0).unwrap();
        let result = session.analyze_frame(Some(Vec::new()), 3, 3).unwrap();
        let frame = RgbImage::new(3, 3);
        let out = FrameRenderer::new(6).render(&frame, &result);
        assert_eq!(out.dimensions(), (3, 3));
    }
}
