pub mod nms;
pub mod post;

pub use nms::{NmsStrategy, non_max_suppression};
pub use post::DetectionDecoder;
