use super::{ExecutionProvider, InferenceBackend, InferenceOutput};
use ort::{
    session::{Session, SessionInputValue, builder::GraphOptimizationLevel},
    value::TensorRef,
};
use preprocess::Tensor;

/// ONNX Runtime environment. Construct one per process and pass it to every
/// model load.
#[derive(Debug)]
pub struct OrtEnvironment {
    name: String,
}

impl OrtEnvironment {
    pub fn new(name: &str) -> anyhow::Result<Self> {
        // Re-committing an existing environment is harmless; record whether it took.
        let committed = ort::init().with_name(name).commit();
        tracing::info!(name, committed = ?committed, "ONNX Runtime environment committed");
        Ok(Self {
            name: name.to_string(),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

pub struct OrtBackend {
    session: Session,
}

impl InferenceBackend for OrtBackend {
    type Environment = OrtEnvironment;

    fn load(
        env: &OrtEnvironment,
        model: &[u8],
        provider: ExecutionProvider,
    ) -> anyhow::Result<Self> {
        let mut builder = Session::builder()?
            .with_optimization_level(GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?;

        match provider {
            ExecutionProvider::Cuda => {
                tracing::info!(env = env.name(), "Initializing ONNX Runtime with CUDA execution provider");
                builder = builder.with_execution_providers([
                    ort::execution_providers::CUDAExecutionProvider::default()
                        .with_device_id(0)
                        .build()
                        .error_on_failure(),
                ])?;
            }
            ExecutionProvider::Cpu => {
                tracing::info!(env = env.name(), "Initializing ONNX Runtime with CPU execution provider");
            }
        }

        let session = builder.commit_from_memory(model)?;
        tracing::info!(model_bytes = model.len(), %provider, "Model loaded");
        Ok(Self { session })
    }

    fn run(&mut self, inputs: &[(&str, &Tensor)]) -> anyhow::Result<InferenceOutput> {
        let mut session_inputs: Vec<(String, SessionInputValue<'_>)> =
            Vec::with_capacity(inputs.len());
        for (name, tensor) in inputs {
            session_inputs.push((
                name.to_string(),
                TensorRef::from_array_view(tensor.view())?.into(),
            ));
        }

        let outputs = self.session.run(session_inputs)?;

        let mut tensors = Vec::with_capacity(outputs.len());
        for (name, value) in outputs.iter() {
            let array = value.try_extract_array::<f32>()?;
            tensors.push((name.to_string(), array.into_owned()));
        }

        Ok(InferenceOutput::new(tensors))
    }
}
