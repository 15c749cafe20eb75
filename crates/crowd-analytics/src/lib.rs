//! Crowd density analytics core.
//!
//! Consumes confirmed person tracks one frame at a time and derives grid
//! occupancy, heatmaps, debounced congestion alerts and a short-horizon
//! density forecast. Detection, tracking, video I/O and transport live
//! outside this crate.

pub mod config;
pub mod density_grid;
pub mod error;
pub mod grid_sizer;
pub mod heatmap;
pub mod policy;
pub mod predictor;
pub mod render;
pub mod session;
pub mod summary;
pub mod trails;
pub mod zone_state;

pub use config::AnalyticsConfig;
pub use density_grid::{Binning, CellCoord, DensityGrid, Placement};
pub use error::{AnalyticsError, Result};
pub use grid_sizer::GridSizer;
pub use heatmap::{HeatAccumulator, OverlayKind};
pub use policy::{AlertEmission, GridRecompute, SessionMode, SessionPolicy};
pub use predictor::{DensityPredictor, PredictionResult};
pub use render::FrameRenderer;
pub use session::{AnalyticsSession, FrameResult, PeriodicSnapshot, SessionSummary};
pub use trails::{SpeedClass, TrackTrails};
pub use zone_state::{UnsafeEvent, ZoneStateTracker, ZoneUpdate};
