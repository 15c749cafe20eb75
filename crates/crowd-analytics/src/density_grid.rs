use common::crowd::{GridDimensions, Track};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Grid cell coordinate, row-major.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellCoord {
    pub row: usize,
    pub col: usize,
}

impl CellCoord {
    pub fn new(row: usize, col: usize) -> Self {
        Self { row, col }
    }
}

impl fmt::Display for CellCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})", self.row, self.col)
    }
}

/// Where one track landed in this frame's grid.
#[derive(Debug, Clone, PartialEq)]
pub struct Placement {
    pub track: Track,
    pub anchor: (i32, i32),
    /// `None` when the anchor fell outside the frame
    pub cell: Option<CellCoord>,
}

/// Occupancy counts for one frame. Immutable once binned.
#[derive(Debug, Clone, PartialEq)]
pub struct DensityGrid {
    counts: Array2<u32>,
    cell_width: u32,
    cell_height: u32,
}

/// Result of binning a frame's tracks.
#[derive(Debug, Clone)]
pub struct Binning {
    pub grid: DensityGrid,
    pub placements: Vec<Placement>,
}

impl DensityGrid {
    /// Bin each track's anchor point into an N×N grid over the frame.
    ///
    /// Cells are `max(1, dim / n)` pixels; the last row and column absorb the
    /// remainder. Anchors outside `[0, width) × [0, height)` are dropped.
    pub fn bin(tracks: &[Track], frame_width: u32, frame_height: u32, grid_size: usize) -> Binning {
        let n = grid_size.max(1);
        let n_u32 = u32::try_from(n).unwrap_or(u32::MAX);
        let cell_width = (frame_width / n_u32).max(1);
        let cell_height = (frame_height / n_u32).max(1);

        let mut counts = Array2::<u32>::zeros((n, n));
        let mut placements = Vec::with_capacity(tracks.len());

        for track in tracks {
            let anchor = track.bbox.anchor();
            let cell = Self::cell_of(anchor, frame_width, frame_height, cell_width, cell_height, n);
            if let Some(c) = cell {
                counts[[c.row, c.col]] += 1;
            }
            placements.push(Placement {
                track: track.clone(),
                anchor,
                cell,
            });
        }

        Binning {
            grid: Self {
                counts,
                cell_width,
                cell_height,
            },
            placements,
        }
    }

    fn cell_of(
        (cx, cy): (i32, i32),
        frame_width: u32,
        frame_height: u32,
        cell_width: u32,
        cell_height: u32,
        n: usize,
    ) -> Option<CellCoord> {
        let x = u32::try_from(cx).ok().filter(|x| *x < frame_width)?;
        let y = u32::try_from(cy).ok().filter(|y| *y < frame_height)?;
        let col = ((x / cell_width) as usize).min(n - 1);
        let row = ((y / cell_height) as usize).min(n - 1);
        Some(CellCoord::new(row, col))
    }

    pub fn counts(&self) -> &Array2<u32> {
        &self.counts
    }

    pub fn grid_size(&self) -> usize {
        self.counts.nrows()
    }

    pub fn dimensions(&self) -> GridDimensions {
        let (rows, cols) = self.counts.dim();
        GridDimensions { rows, cols }
    }

    pub fn cell_size(&self) -> (u32, u32) {
        (self.cell_width, self.cell_height)
    }

    pub fn count(&self, cell: CellCoord) -> u32 {
        self.counts.get([cell.row, cell.col]).copied().unwrap_or(0)
    }

    pub fn total(&self) -> u32 {
        self.counts.sum()
    }

    pub fn max(&self) -> u32 {
        self.counts.iter().copied().max().unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.counts.iter().all(|c| *c == 0)
    }

    /// Cells paired with their counts, row-major.
    pub fn cells(&self) -> impl Iterator<Item = (CellCoord, u32)> + '_ {
        self.counts
            .indexed_iter()
            .map(|((row, col), count)| (CellCoord::new(row, col), *count))
    }

    /// Nested rows as serialised into reports and live messages.
    pub fn to_rows(&self) -> Vec<Vec<u32>> {
        self.counts.rows().into_iter().map(|r| r.to_vec()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::crowd::{PixelBox, TrackId};

    fn track(id: u64, x1: i32, y1: i32, x2: i32, y2: i32) -> Track {
        Track {
            id: TrackId(id),
            bbox: PixelBox::new(x1, y1, x2, y2),
            confidence: Some(0.9),
        }
    }

    #[test]
    fn test_bin_counts_by_anchor() {
        // 400x400 frame, 4x4 grid -> 100px cells
        let tracks = vec![
            track(1, 10, 0, 30, 50),   // anchor (20, 40)   -> (0,0)
            track(2, 150, 100, 170, 200), // anchor (160, 180) -> (1,1)
            track(3, 150, 110, 170, 210), // anchor (160, 190) -> (1,1)
        ];
        let binning = DensityGrid::bin(&tracks, 400, 400, 4);

        assert_eq!(binning.grid.count(CellCoord::new(0, 0)), 1);
        assert_eq!(binning.grid.count(CellCoord::new(1, 1)), 2);
        assert_eq!(binning.grid.total(), 3);
        assert_eq!(binning.placements[1].anchor, (160, 180));
    }

    #[test]
    fn test_last_cell_absorbs_remainder() {
        // 10 / 3 = 3px cells; x=9 -> 9/3 = 3 -> clamped to column 2
        let tracks = vec![track(1, 8, 0, 10, 10)];
        let binning = DensityGrid::bin(&tracks, 10, 10, 3);
        assert_eq!(binning.placements[0].cell, Some(CellCoord::new(2, 2)));
        assert_eq!(binning.grid.cell_size(), (3, 3));
    }

    #[test]
    fn test_out_of_bounds_anchor_dropped() {
        let tracks = vec![
            track(1, -50, 0, -10, 10),
            track(2, 0, 90, 10, 200),
            track(3, 10, 10, 20, 20),
        ];
        let binning = DensityGrid::bin(&tracks, 100, 100, 4);

        assert_eq!(binning.grid.total(), 1);
        assert_eq!(binning.placements.len(), 3);
        assert!(binning.placements[0].cell.is_none());
        assert!(binning.placements[1].cell.is_none());
    }

    #[test]
    fn test_sum_equals_in_bounds_tracks() {
        let tracks: Vec<Track> = (0..40)
            .map(|i| {
                let x = i * 37 - 200;
                let y = i * 23 - 100;
                track(i as u64, x, y, x + 30, y + 80)
            })
            .collect();

        for n in 3..=8 {
            let binning = DensityGrid::bin(&tracks, 640, 480, n);
            let in_bounds = binning.placements.iter().filter(|p| p.cell.is_some()).count();
            assert_eq!(binning.grid.total() as usize, in_bounds);
        }
    }

    #[test]
    fn test_binning_is_idempotent() {
        let tracks = vec![track(1, 0, 0, 40, 100), track(2, 300, 200, 340, 300)];
        let a = DensityGrid::bin(&tracks, 640, 480, 5);
        let b = DensityGrid::bin(&tracks, 640, 480, 5);
        assert_eq!(a.grid, b.grid);
    }

    #[test]
    fn test_tiny_frame_uses_unit_cells() {
        let tracks = vec![track(1, 0, 0, 2, 2)];
        let binning = DensityGrid::bin(&tracks, 2, 2, 8);
        assert_eq!(binning.grid.cell_size(), (1, 1));
        assert_eq!(binning.grid.total(), 1);
    }

    #[test]
    fn test_to_rows_layout() {
        let tracks = vec![track(1, 350, 0, 370, 10)];
        let binning = DensityGrid::bin(&tracks, 400, 400, 4);
        let rows = binning.grid.to_rows();
        assert_eq!(rows.len(), 4);
        assert_eq!(rows[0], vec![0, 0, 0, 1]);
        assert_eq!(binning.grid.dimensions(), GridDimensions { rows: 4, cols: 4 });
    }
}
