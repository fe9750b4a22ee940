pub mod backend;
pub mod config;
pub mod errors;
pub mod gate;
pub mod logging;
pub mod pipeline;
pub mod processing;
pub mod service;
pub mod session;
pub mod source;
pub mod types;

// Re-export commonly used types for convenience
pub use backend::{ExecutionProvider, InferenceBackend, InferenceOutput};
pub use config::InferenceConfig;
pub use errors::{PipelineError, SessionError};
pub use gate::{FrameGate, GatePermit};
pub use pipeline::{PipelineSettings, RecognitionPipeline};
pub use service::InferenceService;
pub use session::{ModelSession, SessionState, SessionStatus};
pub use types::{
    Detection, Frame, FrameOutcome, FrameReport, FrameTimings, PipelineMode, PipelineStatus,
    RecognitionResult,
};
