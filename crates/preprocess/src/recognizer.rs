use crate::config::{
    DEFAULT_CROP_PADDING, DEFAULT_RECOGNIZER_INPUT_SIZE, RECOGNIZER_MEAN, RECOGNIZER_STD,
};
use crate::{PreprocessError, Tensor, Window, to_planar_tensor};
use common::{BoundingBox, span_debug};
use fast_image_resize::{
    FilterType, PixelType, ResizeAlg, ResizeOptions, Resizer,
    images::{Image, ImageRef},
};
use image::RgbImage;

/// Integer pixel rectangle inside a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CropRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl CropRegion {
    /// Crop for a detection box: corners truncated to whole pixels and clamped
    /// to the frame. `None` when nothing is left.
    pub fn from_bbox(bbox: &BoundingBox, frame_width: u32, frame_height: u32) -> Option<Self> {
        let x1 = (bbox.x1 as i64).max(0);
        let y1 = (bbox.y1 as i64).max(0);
        let x2 = (bbox.x2 as i64).min(frame_width as i64);
        let y2 = (bbox.y2 as i64).min(frame_height as i64);

        let (width, height) = (x2 - x1, y2 - y1);
        if width <= 0 || height <= 0 {
            return None;
        }

        Some(Self {
            x: x1 as u32,
            y: y1 as u32,
            width: width as u32,
            height: height as u32,
        })
    }

    pub fn full(width: u32, height: u32) -> Self {
        Self {
            x: 0,
            y: 0,
            width,
            height,
        }
    }
}

/// Recognizer preprocessing: stretch the region to `(I + P)^2` with a bicubic
/// filter, keep the central `I x I`, and standardize each channel.
pub struct RecognizerPreProcessor {
    pub input_size: u32,
    pub crop_padding: u32,
    resizer: Resizer,
    resized: Image<'static>,
}

impl RecognizerPreProcessor {
    pub fn new(input_size: u32, crop_padding: u32) -> Self {
        let side = input_size + crop_padding;
        Self {
            input_size,
            crop_padding,
            resizer: Resizer::new(),
            resized: Image::new(side, side, PixelType::U8x3),
        }
    }

    pub fn preprocess(&mut self, image: &RgbImage) -> Result<Tensor, PreprocessError> {
        self.preprocess_region(
            image.as_raw(),
            image.width(),
            image.height(),
            CropRegion::full(image.width(), image.height()),
        )
    }

    /// Preprocess `region` of a packed RGB frame without copying the crop out
    /// first.
    pub fn preprocess_region(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        region: CropRegion,
    ) -> Result<Tensor, PreprocessError> {
        let _s = span_debug!("recognizer_preprocess");

        if width == 0 || height == 0 {
            return Err(PreprocessError::ZeroDimension { width, height });
        }
        if self.input_size == 0 {
            return Err(PreprocessError::ZeroTarget(self.input_size));
        }
        if region.width == 0
            || region.height == 0
            || region.x + region.width > width
            || region.y + region.height > height
        {
            return Err(PreprocessError::EmptyRegion);
        }

        let expected = (width as usize) * (height as usize) * 3;
        if pixels.len() != expected {
            return Err(PreprocessError::SizeMismatch {
                expected,
                actual: pixels.len(),
            });
        }

        let src = ImageRef::new(width, height, pixels, PixelType::U8x3)?;
        let options = ResizeOptions::new()
            .resize_alg(ResizeAlg::Convolution(FilterType::CatmullRom))
            .crop(
                region.x as f64,
                region.y as f64,
                region.width as f64,
                region.height as f64,
            );
        self.resizer.resize(&src, &mut self.resized, &options)?;

        let side = (self.input_size + self.crop_padding) as usize;
        let offset = (self.crop_padding / 2) as usize;

        to_planar_tensor(
            self.resized.buffer(),
            Window {
                stride: side,
                x: offset,
                y: offset,
                width: self.input_size as usize,
                height: self.input_size as usize,
            },
            RECOGNIZER_MEAN,
            RECOGNIZER_STD,
        )
    }
}

impl Default for RecognizerPreProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_RECOGNIZER_INPUT_SIZE, DEFAULT_CROP_PADDING)
    }
}
