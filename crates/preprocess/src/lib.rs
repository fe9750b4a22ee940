pub mod config;
pub mod errors;
pub mod letterbox;
pub mod recognizer;

use ndarray::{Array, IxDyn};

pub use config::{DEFAULT_CROP_PADDING, DEFAULT_INPUT_SIZE, DEFAULT_RECOGNIZER_INPUT_SIZE};
pub use errors::PreprocessError;
pub use letterbox::{LetterboxPreProcessor, LetterboxTransform};
pub use recognizer::{CropRegion, RecognizerPreProcessor};

/// NCHW `f32` tensor exchanged with the inference backend.
pub type Tensor = Array<f32, IxDyn>;

/// Result of detector preprocessing including the letterbox parameters
/// needed to map boxes back to the source image.
#[derive(Debug)]
pub struct PreprocessResult {
    pub tensor: Tensor,
    pub transform: LetterboxTransform,
}

/// Pixel window read out of a packed RGB buffer.
#[derive(Debug, Clone, Copy)]
pub(crate) struct Window {
    pub stride: usize,
    pub x: usize,
    pub y: usize,
    pub width: usize,
    pub height: usize,
}

/// Convert an RGB window to a `[1, 3, h, w]` tensor, planes in R, G, B order,
/// applying `(p / 255 - mean) / std` per channel.
pub(crate) fn to_planar_tensor(
    buf: &[u8],
    window: Window,
    mean: [f32; 3],
    std: [f32; 3],
) -> Result<Tensor, PreprocessError> {
    let spatial = window.width * window.height;
    let mut output = vec![0.0f32; 3 * spatial];

    for row in 0..window.height {
        let src = ((window.y + row) * window.stride + window.x) * 3;
        let src_row = &buf[src..src + window.width * 3];
        let dst_row = row * window.width;

        for (col, px) in src_row.chunks_exact(3).enumerate() {
            let i = dst_row + col;
            output[i] = (px[0] as f32 / 255.0 - mean[0]) / std[0];
            output[i + spatial] = (px[1] as f32 / 255.0 - mean[1]) / std[1];
            output[i + 2 * spatial] = (px[2] as f32 / 255.0 - mean[2]) / std[2];
        }
    }

    Ok(Array::from_shape_vec(
        IxDyn(&[1, 3, window.height, window.width]),
        output,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Every value must land at `[0, c, y, x]` with planes contiguous.
    #[test]
    fn test_planar_layout_is_channel_major_row_major() {
        // 3x2 image, pixel (x, y) = (10x + y, 100 + x, 200 + y)
        let (w, h) = (3usize, 2usize);
        let mut buf = Vec::with_capacity(w * h * 3);
        for y in 0..h {
            for x in 0..w {
                buf.extend_from_slice(&[(10 * x + y) as u8, (100 + x) as u8, (200 + y) as u8]);
            }
        }

        let window = Window {
            stride: w,
            x: 0,
            y: 0,
            width: w,
            height: h,
        };
        let t = to_planar_tensor(&buf, window, [0.0; 3], [1.0 / 255.0; 3]).unwrap();

        assert_eq!(t.shape(), &[1, 3, 2, 3]);
        let flat = t.as_slice().unwrap();
        let plane = w * h;
        for y in 0..h {
            for x in 0..w {
                let i = y * w + x;
                assert!((flat[i] - (10 * x + y) as f32).abs() < 1e-3, "R at ({x},{y})");
                assert!((flat[plane + i] - (100 + x) as f32).abs() < 1e-3, "G at ({x},{y})");
                assert!((flat[2 * plane + i] - (200 + y) as f32).abs() < 1e-3, "B at ({x},{y})");
            }
        }
    }

    #[test]
    fn test_planar_window_offsets() {
        // 4x4 image where R encodes the flat pixel index
        let buf: Vec<u8> = (0..16u8).flat_map(|i| [i, 0, 0]).collect();
        let window = Window {
            stride: 4,
            x: 1,
            y: 2,
            width: 2,
            height: 2,
        };
        let t = to_planar_tensor(&buf, window, [0.0; 3], [1.0 / 255.0; 3]).unwrap();

        let r: Vec<f32> = t.as_slice().unwrap()[..4].iter().map(|v| v.round()).collect();
        assert_eq!(r, vec![9.0, 10.0, 13.0, 14.0]);
    }
}
