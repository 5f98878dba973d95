use anyhow::Result;
use serde::Deserialize;

use crate::decode::{QuantParams, RawOutputTensor};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    Cpu,
    Gpu,
    /// NNAPI on phones, an Edge TPU on the Pi
    #[serde(alias = "nnapi", alias = "coral")]
    NnAccelerator,
}

impl std::str::FromStr for Backend {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "cpu" => Ok(Self::Cpu),
            "gpu" => Ok(Self::Gpu),
            "nnapi" | "coral" | "nnaccelerator" | "npu" => Ok(Self::NnAccelerator),
            other => anyhow::bail!("unknown backend: {}", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineOptions {
    pub num_threads: u32,
    pub backend: Backend,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self { num_threads: 1, backend: Backend::Cpu }
    }
}

/// What the loaded model expects and emits.
#[derive(Debug, Clone, PartialEq)]
pub struct TensorSpec {
    pub input_size: u32,
    pub output_len: usize,
    pub output_fields: usize,
    pub input_quant: Option<QuantParams>,
    pub output_quant: Option<QuantParams>,
}

impl TensorSpec {
    pub fn quantized(&self) -> bool {
        self.output_quant.is_some()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum InputTensor {
    Quantized(Vec<u8>),
    Float(Vec<f32>),
}

impl InputTensor {
    pub fn len(&self) -> usize {
        match self {
            Self::Quantized(b) => b.len(),
            Self::Float(v) => v.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Opaque model runner: fixed-size input tensor in, fixed-size output out.
pub trait InferenceEngine: Send {
    fn spec(&self) -> &TensorSpec;

    fn recognize(&mut self, input: &InputTensor) -> Result<RawOutputTensor>;

    /// Apply thread count and backend. Always a full reinitialization.
    fn reconfigure(&mut self, opts: EngineOptions) -> Result<()>;
}
