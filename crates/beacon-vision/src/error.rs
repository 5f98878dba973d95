use thiserror::Error;

/// Fatal setup problems. Raised before any frame is processed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("output tensor holds {actual} values, model geometry needs {expected} ({boxes} boxes x {fields} fields)")]
    ShapeMismatch {
        expected: usize,
        actual: usize,
        boxes: usize,
        fields: usize,
    },
    #[error("output tensor is {actual} but the decoder was loaded for {expected}")]
    FormatMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("model emits {classes} class scores but {labels} labels were supplied")]
    LabelCount { classes: usize, labels: usize },
    #[error("input size {0} must be a positive multiple of 32")]
    InputSize(u32),
    #[error("model must have at least one class")]
    NoClasses,
    #[error("quantization scale must be positive and finite, got {0}")]
    QuantScale(f32),
    #[error("class height table is empty")]
    EmptyHeightTable,
    #[error("height for {label:?} must be positive and finite, got {height}")]
    InvalidHeight { label: String, height: f32 },
    #[error("focal length must be positive and finite, got {0}")]
    FocalLength(f32),
    #[error("rotation must be a multiple of 90 degrees, got {0}")]
    Rotation(i32),
    #[error("frame size {width}x{height} is degenerate")]
    FrameSize { width: u32, height: u32 },
    #[error("threshold {name} must lie in [0, 1], got {value}")]
    Threshold { name: &'static str, value: f32 },
}

/// A single frame failed. Logged and skipped; the next frame proceeds normally.
#[derive(Debug, Error)]
pub enum RecognitionError {
    #[error("inference failed: {0:#}")]
    Inference(anyhow::Error),
    #[error("decode failed: {0}")]
    Decode(#[source] ConfigError),
    #[error("frame buffer holds {len} bytes, {width}x{height} RGB needs {need}")]
    FrameBuffer {
        width: u32,
        height: u32,
        len: usize,
        need: usize,
    },
}
