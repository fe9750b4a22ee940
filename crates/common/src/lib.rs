pub mod config;
pub mod geometry;
pub mod logging;
pub mod telemetry;

pub use config::{Environment, env_or, env_or_valid};
pub use geometry::{BoundingBox, cosine_similarity};
pub use logging::setup_logging;
pub use telemetry::TelemetryGuard;
