use crate::backend::{ExecutionProvider, InferenceBackend, InferenceOutput};
use crate::errors::SessionError;
use preprocess::Tensor;
use serde::Serialize;
use std::fmt;
use std::path::Path;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    Uninitialized,
    Loading,
    Ready,
    Failed,
}

impl SessionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::Loading => "loading",
            SessionState::Ready => "ready",
            SessionState::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a session for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub model: String,
    pub state: SessionState,
    pub provider: Option<ExecutionProvider>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.model, self.state)?;
        if let Some(provider) = self.provider {
            write!(f, " ({provider})")?;
        }
        Ok(())
    }
}

/// A loaded model plus its lifecycle:
/// `Uninitialized -> Loading -> Ready | Failed`, and back to `Uninitialized`
/// on close.
pub struct ModelSession<B: InferenceBackend> {
    model: String,
    state: SessionState,
    provider: Option<ExecutionProvider>,
    backend: Option<B>,
    last_error: Option<String>,
}

impl<B: InferenceBackend> ModelSession<B> {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            state: SessionState::Uninitialized,
            provider: None,
            backend: None,
            last_error: None,
        }
    }

    /// Load the model from memory. With `accelerate` the CUDA provider is
    /// tried first and a failure there falls back to CPU. Does nothing when
    /// already ready.
    pub fn initialize(
        &mut self,
        env: &B::Environment,
        model_bytes: &[u8],
        accelerate: bool,
    ) -> Result<(), SessionError> {
        if self.state == SessionState::Ready {
            return Ok(());
        }

        self.state = SessionState::Loading;
        self.last_error = None;

        if accelerate {
            match B::load(env, model_bytes, ExecutionProvider::Cuda) {
                Ok(backend) => {
                    self.ready(backend, ExecutionProvider::Cuda);
                    return Ok(());
                }
                Err(e) => {
                    warn!(
                        model = %self.model,
                        error = %e,
                        "Accelerated provider unavailable, falling back to CPU"
                    );
                }
            }
        }

        match B::load(env, model_bytes, ExecutionProvider::Cpu) {
            Ok(backend) => {
                self.ready(backend, ExecutionProvider::Cpu);
                Ok(())
            }
            Err(source) => {
                self.fail(source.to_string());
                Err(SessionError::Load {
                    model: self.model.clone(),
                    source,
                })
            }
        }
    }

    pub fn initialize_from_file(
        &mut self,
        env: &B::Environment,
        path: impl AsRef<Path>,
        accelerate: bool,
    ) -> Result<(), SessionError> {
        if self.state == SessionState::Ready {
            return Ok(());
        }

        let path = path.as_ref();
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(source) => {
                self.fail(source.to_string());
                return Err(SessionError::Io {
                    model: self.model.clone(),
                    path: path.to_path_buf(),
                    source,
                });
            }
        };

        self.initialize(env, &bytes, accelerate)
    }

    pub fn run(&mut self, inputs: &[(&str, &Tensor)]) -> Result<InferenceOutput, SessionError> {
        let backend = match (self.state, self.backend.as_mut()) {
            (SessionState::Ready, Some(backend)) => backend,
            _ => {
                return Err(SessionError::NotReady {
                    model: self.model.clone(),
                    state: self.state,
                });
            }
        };

        backend.run(inputs).map_err(|source| SessionError::Execution {
            model: self.model.clone(),
            source,
        })
    }

    /// Release the backend. Later runs fail with `NotReady`.
    pub fn close(&mut self) {
        if self.backend.take().is_some() {
            info!(model = %self.model, "Session closed");
        }
        self.state = SessionState::Uninitialized;
        self.provider = None;
    }

    pub fn is_ready(&self) -> bool {
        self.state == SessionState::Ready
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn provider(&self) -> Option<ExecutionProvider> {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn status(&self) -> SessionStatus {
        SessionStatus {
            model: self.model.clone(),
            state: self.state,
            provider: self.provider,
            error: self.last_error.clone(),
        }
    }

    fn ready(&mut self, backend: B, provider: ExecutionProvider) {
        info!(model = %self.model, %provider, "Session ready");
        self.backend = Some(backend);
        self.provider = Some(provider);
        self.state = SessionState::Ready;
    }

    fn fail(&mut self, error: String) {
        warn!(model = %self.model, error = %error, "Session failed to initialize");
        self.backend = None;
        self.provider = None;
        self.last_error = Some(error);
        self.state = SessionState::Failed;
    }
}
