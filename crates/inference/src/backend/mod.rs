use preprocess::Tensor;
use serde::Serialize;
use std::fmt;

#[cfg(feature = "ort-backend")]
pub mod ort;

/// Where a model executes. `Cuda` is the accelerated path; loading falls back
/// to `Cpu` when it is unavailable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionProvider {
    Cpu,
    Cuda,
}

impl fmt::Display for ExecutionProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExecutionProvider::Cpu => write!(f, "CPU"),
            ExecutionProvider::Cuda => write!(f, "CUDA"),
        }
    }
}

/// Tensor-in, tensor-out model runtime. Dropping the backend releases the
/// model.
pub trait InferenceBackend: Sized {
    /// Runtime-wide state shared by every model loaded through it.
    type Environment;

    fn load(
        env: &Self::Environment,
        model: &[u8],
        provider: ExecutionProvider,
    ) -> anyhow::Result<Self>;

    /// Run the model on named inputs.
    fn run(&mut self, inputs: &[(&str, &Tensor)]) -> anyhow::Result<InferenceOutput>;
}

/// Named output tensors in model output order.
#[derive(Debug, Default)]
pub struct InferenceOutput {
    tensors: Vec<(String, Tensor)>,
}

impl InferenceOutput {
    pub fn new(tensors: Vec<(String, Tensor)>) -> Self {
        Self { tensors }
    }

    pub fn single(name: impl Into<String>, tensor: Tensor) -> Self {
        Self {
            tensors: vec![(name.into(), tensor)],
        }
    }

    pub fn get(&self, name: &str) -> Option<&Tensor> {
        self.tensors
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, t)| t)
    }

    /// The first output, which is the only one for the detector and recognizer.
    pub fn primary(&self) -> Option<&Tensor> {
        self.tensors.first().map(|(_, t)| t)
    }

    pub fn len(&self) -> usize {
        self.tensors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tensors.is_empty()
    }
}
