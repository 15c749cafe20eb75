use crate::config::AnalyticsConfig;

/// Guards the division when the observed heights are vanishingly small.
const HEIGHT_EPSILON: f64 = 1e-8;

/// Chooses the N×N grid resolution from the apparent size of people.
///
/// Larger people (camera closer, zoomed in) give a coarser grid so that one
/// cell stays roughly person-sized.
#[derive(Debug, Clone)]
pub struct GridSizer {
    current: usize,
    min: usize,
    max: usize,
    scale_factor: f32,
}

impl GridSizer {
    pub fn new(config: &AnalyticsConfig) -> Self {
        Self {
            current: config.default_grid,
            min: config.grid_min,
            max: config.grid_max,
            scale_factor: config.grid_scale_factor,
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    /// Recompute the grid size from person box heights.
    ///
    /// Non-finite and non-positive heights are ignored. Without any usable
    /// height the previous size is kept.
    pub fn recompute(&mut self, person_heights: &[f32], frame_height: u32) -> usize {
        let (sum, n) = person_heights
            .iter()
            .filter(|h| h.is_finite() && **h > 0.0)
            .fold((0.0_f64, 0_usize), |(sum, n), h| (sum + f64::from(*h), n + 1));

        if n == 0 {
            return self.current;
        }

        let avg_h = sum / n as f64;
        let raw = f64::from(frame_height) / (avg_h * f64::from(self.scale_factor) + HEIGHT_EPSILON);
        // saturating float->int cast, then clamp into the configured bounds
        let next = (raw as usize).clamp(self.min, self.max);

        if next != self.current {
            tracing::debug!(
                previous = self.current,
                grid_size = next,
                avg_height = avg_h,
                "grid size recomputed"
            );
        }
        self.current = next;
        next
    }

    /// Force a size, clamped into the configured bounds.
    pub fn set(&mut self, size: usize) {
        self.current = size.clamp(self.min, self.max);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sizer() -> GridSizer {
        GridSizer::new(&AnalyticsConfig::default())
    }

    #[test]
    fn test_starts_at_default() {
        assert_eq!(sizer().current(), 4);
    }

    #[test]
    fn test_recompute_from_heights() {
        let mut s = sizer();
        // 720 / (100 * 1.5) = 4.8 -> 4
        assert_eq!(s.recompute(&[80.0, 120.0], 720), 4);
        // 720 / (40 * 1.5) = 12 -> clamped to 8
        assert_eq!(s.recompute(&[40.0], 720), 8);
        // 720 / (300 * 1.5) = 1.6 -> clamped to 3
        assert_eq!(s.recompute(&[300.0], 720), 3);
    }

    #[test]
    fn test_no_heights_keeps_previous() {
        let mut s = sizer();
        s.recompute(&[40.0], 720);
        assert_eq!(s.recompute(&[], 720), 8);
        assert_eq!(s.recompute(&[0.0, -3.0, f32::NAN], 720), 8);
    }

    #[test]
    fn test_output_bounded_and_monotone() {
        let mut previous = usize::MAX;
        for h in (1..2000).map(|h| h as f32 * 0.5) {
            let mut s = sizer();
            let size = s.recompute(&[h], 1080);
            assert!((3..=8).contains(&size), "size {size} out of bounds for h={h}");
            assert!(size <= previous, "grid grew as people got taller at h={h}");
            previous = size;
        }
    }

    #[test]
    fn test_set_clamps() {
        let mut s = sizer();
        s.set(20);
        assert_eq!(s.current(), 8);
        s.set(0);
        assert_eq!(s.current(), 3);
    }
}
