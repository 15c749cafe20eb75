use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum AnalyticsError {
    #[error("invalid analytics configuration: {0}")]
    InvalidConfig(String),

    #[error("frame size must be non-zero, got {width}x{height}")]
    EmptyFrame { width: u32, height: u32 },

    /// The heat accumulator is sized by the first frame of a session.
    #[error("frame size changed mid-session from {expected_width}x{expected_height} to {width}x{height}")]
    FrameSizeChanged {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },
}

pub type Result<T> = std::result::Result<T, AnalyticsError>;
