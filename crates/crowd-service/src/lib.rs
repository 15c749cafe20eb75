pub mod api;
pub mod config;
pub mod detector;
pub mod error;
pub mod pipeline;
pub mod state;
pub mod tracker;

pub use config::ServiceConfig;
pub use error::ApiError;
pub use state::AppState;
