/// Square input side of the detector.
pub const DEFAULT_INPUT_SIZE: u32 = 640;

/// Square input side of the recognizer.
pub const DEFAULT_RECOGNIZER_INPUT_SIZE: u32 = 224;

/// Extra pixels added before the recognizer center crop, split evenly per side.
pub const DEFAULT_CROP_PADDING: u32 = 32;

pub const LETTERBOX_COLOR: u8 = 114;

// EfficientNet-Lite constants, effectively mapping [0, 1] onto [-1, 1].
pub const RECOGNIZER_MEAN: [f32; 3] = [0.498, 0.498, 0.498];
pub const RECOGNIZER_STD: [f32; 3] = [0.502, 0.502, 0.502];
