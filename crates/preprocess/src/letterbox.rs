use crate::config::{DEFAULT_INPUT_SIZE, LETTERBOX_COLOR};
use crate::{PreprocessError, PreprocessResult, Window, to_planar_tensor};
use common::{BoundingBox, span};
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use image::RgbImage;

/// Geometry of an aspect-preserving resize onto a square, gray-padded canvas.
///
/// Computed once per frame and shared by preprocessing and postprocessing so
/// both sides agree on the exact padding.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LetterboxTransform {
    pub orig_width: u32,
    pub orig_height: u32,
    pub target: u32,
    pub scale: f32,
    pub new_width: u32,
    pub new_height: u32,
    pub pad_x: u32,
    pub pad_y: u32,
}

impl LetterboxTransform {
    pub fn compute(width: u32, height: u32, target: u32) -> Result<Self, PreprocessError> {
        if width == 0 || height == 0 {
            return Err(PreprocessError::ZeroDimension { width, height });
        }
        if target == 0 {
            return Err(PreprocessError::ZeroTarget(target));
        }

        let scale = (target as f32 / width as f32).min(target as f32 / height as f32);
        // Extremely thin images would otherwise round to an empty resize.
        let new_width = ((width as f32 * scale).round() as u32).clamp(1, target);
        let new_height = ((height as f32 * scale).round() as u32).clamp(1, target);

        Ok(Self {
            orig_width: width,
            orig_height: height,
            target,
            scale,
            new_width,
            new_height,
            pad_x: (target - new_width) / 2,
            pad_y: (target - new_height) / 2,
        })
    }

    /// Map a box from letterboxed input space back to source pixels, clamped
    /// to the source image.
    pub fn to_original(&self, bbox: &BoundingBox) -> BoundingBox {
        let (px, py) = (self.pad_x as f32, self.pad_y as f32);
        BoundingBox::new(
            (bbox.x1 - px) / self.scale,
            (bbox.y1 - py) / self.scale,
            (bbox.x2 - px) / self.scale,
            (bbox.y2 - py) / self.scale,
        )
        .clamp(self.orig_width as f32, self.orig_height as f32)
    }

    /// Map a box from source pixels into letterboxed input space.
    pub fn to_letterboxed(&self, bbox: &BoundingBox) -> BoundingBox {
        let (px, py) = (self.pad_x as f32, self.pad_y as f32);
        BoundingBox::new(
            bbox.x1 * self.scale + px,
            bbox.y1 * self.scale + py,
            bbox.x2 * self.scale + px,
            bbox.y2 * self.scale + py,
        )
    }
}

/// Detector preprocessing: letterbox to `S x S`, scale to `[0, 1]`, NCHW.
pub struct LetterboxPreProcessor {
    pub input_size: u32,
    resizer: Resizer,
    letterboxed_buffer: Vec<u8>,
}

impl LetterboxPreProcessor {
    pub fn new(input_size: u32) -> Self {
        Self {
            input_size,
            resizer: Resizer::new(),
            letterboxed_buffer: vec![LETTERBOX_COLOR; (input_size * input_size * 3) as usize],
        }
    }

    pub fn preprocess(&mut self, image: &RgbImage) -> Result<PreprocessResult, PreprocessError> {
        self.preprocess_pixels(image.as_raw(), image.width(), image.height())
    }

    /// Preprocess packed RGB (HWC) pixels.
    pub fn preprocess_pixels(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
    ) -> Result<PreprocessResult, PreprocessError> {
        let _s = span!("letterbox_preprocess");

        tracing::trace!(
            width,
            height,
            pixel_bytes = pixels.len(),
            "Preprocessing frame dimensions"
        );

        let transform = LetterboxTransform::compute(width, height, self.input_size)?;

        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected {
            return Err(PreprocessError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        self.resize_and_letterbox(pixels, &transform)?;

        let side = self.input_size as usize;
        let tensor = to_planar_tensor(
            &self.letterboxed_buffer,
            Window {
                stride: side,
                x: 0,
                y: 0,
                width: side,
                height: side,
            },
            [0.0; 3],
            [1.0; 3],
        )?;

        Ok(PreprocessResult { tensor, transform })
    }

    /// The letterboxed RGB canvas from the last call, `S x S x 3`.
    pub fn letterboxed(&self) -> &[u8] {
        &self.letterboxed_buffer
    }

    fn resize_and_letterbox(
        &mut self,
        pixels: &[u8],
        transform: &LetterboxTransform,
    ) -> Result<(), PreprocessError> {
        let _s = span!("resize_and_letterbox");

        let src = ImageRef::new(
            transform.orig_width,
            transform.orig_height,
            pixels,
            PixelType::U8x3,
        )?;
        let mut resized = Image::new(transform.new_width, transform.new_height, PixelType::U8x3);

        self.resizer.resize(
            &src,
            &mut resized,
            &ResizeOptions::new().resize_alg(ResizeAlg::Convolution(FilterType::Bilinear)),
        )?;

        self.letterboxed_buffer.fill(LETTERBOX_COLOR);

        let resized_data = resized.buffer();
        let row_bytes = (transform.new_width * 3) as usize;
        let stride = (self.input_size * 3) as usize;

        for y in 0..transform.new_height as usize {
            let src_row = y * row_bytes;
            let dst_row = (y + transform.pad_y as usize) * stride + (transform.pad_x * 3) as usize;

            self.letterboxed_buffer[dst_row..dst_row + row_bytes]
                .copy_from_slice(&resized_data[src_row..src_row + row_bytes]);
        }

        Ok(())
    }
}

impl Default for LetterboxPreProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_INPUT_SIZE)
    }
}
