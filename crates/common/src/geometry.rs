//! Box geometry and vector similarity shared by the pre/post-processing and
//! matching crates.

use serde::Serialize;

/// Axis-aligned box in corner form, `x1 <= x2` and `y1 <= y2`.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct BoundingBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BoundingBox {
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        Self { x1, y1, x2, y2 }
    }

    /// Convert bounding box from center-width-height format to corner format
    #[inline]
    pub fn from_cxcywh(cx: f32, cy: f32, w: f32, h: f32) -> Self {
        Self {
            x1: cx - w / 2.0,
            y1: cy - h / 2.0,
            x2: cx + w / 2.0,
            y2: cy + h / 2.0,
        }
    }

    #[inline]
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    #[inline]
    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    #[inline]
    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn intersection(&self, other: &Self) -> f32 {
        let w = self.x2.min(other.x2) - self.x1.max(other.x1);
        let h = self.y2.min(other.y2) - self.y1.max(other.y1);
        w.max(0.0) * h.max(0.0)
    }

    /// Intersection over union. Zero when the union is empty.
    pub fn iou(&self, other: &Self) -> f32 {
        let intersection = self.intersection(other);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }

    /// Clamp every coordinate into `[0, width] x [0, height]`.
    pub fn clamp(&self, width: f32, height: f32) -> Self {
        Self {
            x1: self.x1.clamp(0.0, width),
            y1: self.y1.clamp(0.0, height),
            x2: self.x2.clamp(0.0, width),
            y2: self.y2.clamp(0.0, height),
        }
    }
}

#[inline]
pub fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

#[inline]
pub fn l2_norm(v: &[f32]) -> f32 {
    dot(v, v).sqrt()
}

/// Cosine similarity with precomputed norms. Zero norms give 0.
#[inline]
pub fn cosine_similarity_with_norms(a: &[f32], a_norm: f32, b: &[f32], b_norm: f32) -> f32 {
    if a.len() != b.len() || a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    (dot(a, b) / (a_norm * b_norm)).clamp(-1.0, 1.0)
}

/// Cosine similarity in `[-1, 1]`.
///
/// Zero-norm or length-mismatched inputs are degenerate and yield 0 rather
/// than NaN.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    cosine_similarity_with_norms(a, l2_norm(a), b, l2_norm(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_cxcywh() {
        let b = BoundingBox::from_cxcywh(0.5, 0.5, 0.4, 0.2);
        assert!((b.x1 - 0.3).abs() < 1e-6);
        assert!((b.y1 - 0.4).abs() < 1e-6);
        assert!((b.x2 - 0.7).abs() < 1e-6);
        assert!((b.y2 - 0.6).abs() < 1e-6);
    }

    #[test]
    fn test_iou_overlapping_boxes() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(1.0, 1.0, 11.0, 11.0);
        // 81 / (100 + 100 - 81)
        assert!((a.iou(&b) - 81.0 / 119.0).abs() < 1e-6);
        assert_eq!(a.iou(&b), b.iou(&a), "IoU should be symmetric");
    }

    #[test]
    fn test_iou_disjoint_and_identical() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let c = BoundingBox::new(50.0, 50.0, 60.0, 60.0);
        assert_eq!(a.iou(&c), 0.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_iou_zero_area_boxes_is_zero() {
        let point = BoundingBox::new(5.0, 5.0, 5.0, 5.0);
        assert_eq!(point.iou(&point), 0.0, "Degenerate union must not divide by zero");
    }

    #[test]
    fn test_clamp() {
        let b = BoundingBox::new(-5.0, -1.0, 120.0, 40.0).clamp(100.0, 50.0);
        assert_eq!(b, BoundingBox::new(0.0, 0.0, 100.0, 40.0));
    }

    #[test]
    fn test_cosine_identical_vectors() {
        let v = [0.3, -1.2, 4.0, 0.0, 2.5];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_bounds() {
        let a = [1.0, 2.0, 3.0, 4.0, 5.0, 6.0];
        let b = [5.0, 6.0, 7.0, 8.0, 9.0, 10.0];
        let neg: Vec<f32> = a.iter().map(|x| -x).collect();

        let s = cosine_similarity(&a, &b);
        assert!((-1.0..=1.0).contains(&s));
        assert!((cosine_similarity(&a, &neg) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_zero_vector_is_zero() {
        let zero = [0.0f32; 4];
        let v = [1.0, 0.0, 0.0, 0.0];
        let s = cosine_similarity(&zero, &v);
        assert_eq!(s, 0.0);
        assert!(!s.is_nan());
    }

    #[test]
    fn test_cosine_length_mismatch_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0, 2.0, 3.0]), 0.0);
    }
}
