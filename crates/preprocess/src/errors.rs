use thiserror::Error;

#[derive(Error, Debug)]
pub enum PreprocessError {
    #[error("Image has zero dimension: {width}x{height}")]
    ZeroDimension { width: u32, height: u32 },

    #[error("Target size must be positive, got {0}")]
    ZeroTarget(u32),

    #[error("Buffer size mismatch: expected {expected}, got {actual} bytes")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("Empty crop region")]
    EmptyRegion,

    #[error("Image buffer error: {0}")]
    ImageBuffer(#[from] fast_image_resize::ImageBufferError),

    #[error("Resize failed: {0}")]
    Resize(#[from] fast_image_resize::ResizeError),

    #[error("Tensor shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),
}
