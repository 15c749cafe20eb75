pub mod crowd;
pub mod validation;
pub mod video;

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
