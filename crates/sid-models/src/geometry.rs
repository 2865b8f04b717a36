use schemars::gen::SchemaGenerator;
use schemars::schema::Schema;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Axis-aligned box in pixel coordinates, `(x1, y1)` top-left and `(x2, y2)` bottom-right.
///
/// Serialized as a 4-element array `[x1, y1, x2, y2]`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(from = "[f32; 4]", into = "[f32; 4]")]
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

    /// A box is usable only when all coordinates are finite and it has positive extent.
    pub fn is_valid(&self) -> bool {
        [self.x1, self.y1, self.x2, self.y2]
            .iter()
            .all(|v| v.is_finite())
            && self.x2 > self.x1
            && self.y2 > self.y1
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        if self.is_valid() {
            self.width() * self.height()
        } else {
            0.0
        }
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Intersection over union with another box.
    pub fn iou(&self, other: &BoundingBox) -> f32 {
        let ix1 = self.x1.max(other.x1);
        let iy1 = self.y1.max(other.y1);
        let ix2 = self.x2.min(other.x2);
        let iy2 = self.y2.min(other.y2);

        let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    /// Clamp the box into a `width` x `height` frame.
    pub fn clamp(&self, width: u32, height: u32) -> Self {
        let w = width as f32;
        let h = height as f32;
        Self {
            x1: self.x1.clamp(0.0, w),
            y1: self.y1.clamp(0.0, h),
            x2: self.x2.clamp(0.0, w),
            y2: self.y2.clamp(0.0, h),
        }
    }

    /// Multiply every coordinate by `factor`.
    pub fn scale(&self, factor: f32) -> Self {
        Self {
            x1: self.x1 * factor,
            y1: self.y1 * factor,
            x2: self.x2 * factor,
            y2: self.y2 * factor,
        }
    }

    pub fn to_array(&self) -> [f32; 4] {
        [self.x1, self.y1, self.x2, self.y2]
    }
}

impl JsonSchema for BoundingBox {
    fn schema_name() -> String {
        "BoundingBox".to_string()
    }

    fn json_schema(gen: &mut SchemaGenerator) -> Schema {
        <[f32; 4]>::json_schema(gen)
    }
}

impl From<[f32; 4]> for BoundingBox {
    fn from(v: [f32; 4]) -> Self {
        Self::new(v[0], v[1], v[2], v[3])
    }
}

impl From<BoundingBox> for [f32; 4] {
    fn from(b: BoundingBox) -> Self {
        b.to_array()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_degenerate_boxes_are_invalid() {
        assert!(BoundingBox::new(0.0, 0.0, 10.0, 10.0).is_valid());
        assert!(!BoundingBox::new(10.0, 0.0, 10.0, 10.0).is_valid());
        assert!(!BoundingBox::new(0.0, 5.0, 10.0, 4.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, f32::NAN, 10.0).is_valid());
        assert!(!BoundingBox::new(0.0, 0.0, f32::INFINITY, 10.0).is_valid());
    }

    #[test]
    fn test_iou() {
        let a = BoundingBox::new(0.0, 0.0, 10.0, 10.0);
        let b = BoundingBox::new(5.0, 0.0, 15.0, 10.0);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
        assert!((a.iou(&b) - 50.0 / 150.0).abs() < 1e-6);
        assert_eq!(a.iou(&BoundingBox::new(20.0, 20.0, 30.0, 30.0)), 0.0);
    }

    #[test]
    fn test_serializes_as_array() {
        let b = BoundingBox::new(1.0, 2.0, 3.5, 4.0);
        assert_eq!(serde_json::to_string(&b).unwrap(), "[1.0,2.0,3.5,4.0]");
        let back: BoundingBox = serde_json::from_str("[1.0,2.0,3.5,4.0]").unwrap();
        assert_eq!(back, b);
    }

    #[test]
    fn test_clamp_and_scale() {
        let b = BoundingBox::new(-5.0, 10.0, 700.0, 500.0).clamp(640, 480);
        assert_eq!(b, BoundingBox::new(0.0, 10.0, 640.0, 480.0));
        assert_eq!(b.scale(2.0), BoundingBox::new(0.0, 20.0, 1280.0, 960.0));
    }
}
