use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

/// A point in image pixel space.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        (dx * dx + dy * dy).sqrt()
    }
}

/// Axis-aligned bounding box `(x1, y1, x2, y2)` in pixel coordinates.
///
/// Construction rejects non-finite coordinates and inverted boxes.
/// Zero-width or zero-height boxes are kept; they have zero area.
/// Deserialization goes through the same checks.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BBoxFields")]
pub struct BBox {
    pub x1: f64,
    pub y1: f64,
    pub x2: f64,
    pub y2: f64,
}

#[derive(Deserialize)]
struct BBoxFields {
    x1: f64,
    y1: f64,
    x2: f64,
    y2: f64,
}

impl TryFrom<BBoxFields> for BBox {
    type Error = anyhow::Error;

    fn try_from(fields: BBoxFields) -> Result<Self> {
        Self::new(fields.x1, fields.y1, fields.x2, fields.y2)
    }
}

impl BBox {
    pub fn new(x1: f64, y1: f64, x2: f64, y2: f64) -> Result<Self> {
        if ![x1, y1, x2, y2].iter().all(|v| v.is_finite()) {
            return Err(anyhow!(
                "bbox coordinates must be finite: [{}, {}, {}, {}]",
                x1,
                y1,
                x2,
                y2
            ));
        }
        if x2 < x1 || y2 < y1 {
            return Err(anyhow!(
                "bbox is inverted: [{}, {}, {}, {}]",
                x1,
                y1,
                x2,
                y2
            ));
        }
        Ok(Self { x1, y1, x2, y2 })
    }

    /// Builds a box from a `[x1, y1, x2, y2]` slice.
    pub fn from_slice(coords: &[f64]) -> Result<Self> {
        match coords {
            [x1, y1, x2, y2] => Self::new(*x1, *y1, *x2, *y2),
            _ => Err(anyhow!(
                "bbox must have exactly 4 coordinates, got {}",
                coords.len()
            )),
        }
    }

    pub fn width(&self) -> f64 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f64 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f64 {
        self.width() * self.height()
    }

    pub fn center(&self) -> Point {
        Point::new((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    pub fn intersection_area(&self, other: &BBox) -> f64 {
        let w = self.x2.min(other.x2) - self.x1.max(other.x1);
        let h = self.y2.min(other.y2) - self.y1.max(other.y1);
        if w < 0.0 || h < 0.0 {
            return 0.0;
        }
        w * h
    }

    /// Intersection over union. Defined as 0 when the union is empty.
    pub fn iou(&self, other: &BBox) -> f64 {
        let intersection = self.intersection_area(other);
        let union = self.area() + other.area() - intersection;
        if union > 0.0 {
            intersection / union
        } else {
            0.0
        }
    }
}

/// Pixel dimensions of the analysed frame.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageSize {
    pub width: u32,
    pub height: u32,
}

impl ImageSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn area(&self) -> f64 {
        f64::from(self.width) * f64::from(self.height)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn bbox(x1: f64, y1: f64, x2: f64, y2: f64) -> BBox {
        BBox::new(x1, y1, x2, y2).unwrap()
    }

    #[test]
    fn rejects_inverted_and_non_finite() {
        assert!(BBox::new(10.0, 0.0, 5.0, 10.0).is_err());
        assert!(BBox::new(0.0, 10.0, 5.0, 5.0).is_err());
        assert!(BBox::new(f64::NAN, 0.0, 5.0, 5.0).is_err());
        assert!(BBox::new(0.0, 0.0, f64::INFINITY, 5.0).is_err());
        assert!(BBox::new(3.0, 3.0, 3.0, 3.0).is_ok());
    }

    #[test]
    fn from_slice_requires_four_values() {
        assert!(BBox::from_slice(&[0.0, 0.0, 1.0]).is_err());
        assert!(BBox::from_slice(&[0.0, 0.0, 1.0, 1.0, 2.0]).is_err());
        assert_eq!(
            BBox::from_slice(&[0.0, 0.0, 1.0, 2.0]).unwrap(),
            bbox(0.0, 0.0, 1.0, 2.0)
        );
    }

    #[test]
    fn derived_area_and_center() {
        let b = bbox(0.0, 0.0, 100.0, 50.0);
        assert_eq!(b.area(), 5000.0);
        assert_eq!(b.center(), Point::new(50.0, 25.0));
    }

    #[test]
    fn iou_of_nested_boxes() {
        let small = bbox(0.0, 0.0, 100.0, 100.0);
        let large = bbox(0.0, 0.0, 150.0, 150.0);
        let iou = small.iou(&large);
        assert!((iou - 10000.0 / 22500.0).abs() < 1e-12);
    }

    #[test]
    fn touching_edges_do_not_overlap() {
        let a = bbox(0.0, 0.0, 10.0, 10.0);
        let b = bbox(10.0, 0.0, 20.0, 10.0);
        assert_eq!(a.intersection_area(&b), 0.0);
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn degenerate_boxes_have_zero_iou() {
        let point = bbox(5.0, 5.0, 5.0, 5.0);
        assert_eq!(point.iou(&point), 0.0);
    }

    #[test]
    fn frame_area() {
        assert_eq!(ImageSize::new(1000, 1000).area(), 1_000_000.0);
        assert_eq!(ImageSize::default().area(), 0.0);
    }

    fn arb_bbox() -> impl Strategy<Value = BBox> {
        (0.0f64..1000.0, 0.0f64..1000.0, 0.5f64..500.0, 0.5f64..500.0)
            .prop_map(|(x, y, w, h)| BBox::new(x, y, x + w, y + h).unwrap())
    }

    #[test]
    fn deserialization_rejects_inverted_boxes() {
        let inverted = r#"{"x1": 10.0, "y1": 0.0, "x2": 0.0, "y2": 10.0}"#;
        let err = serde_json::from_str::<BBox>(inverted).unwrap_err();
        assert!(err.to_string().contains("inverted"), "{}", err);

        let bbox = BBox::new(0.0, 0.0, 10.0, 20.0).unwrap();
        let json = serde_json::to_string(&bbox).unwrap();
        assert_eq!(serde_json::from_str::<BBox>(&json).unwrap(), bbox);
    }

    proptest! {
        #[test]
        fn iou_is_bounded(a in arb_bbox(), b in arb_bbox()) {
            let iou = a.iou(&b);
            prop_assert!((0.0..=1.0).contains(&iou));
        }

        #[test]
        fn iou_is_symmetric(a in arb_bbox(), b in arb_bbox()) {
            prop_assert_eq!(a.iou(&b), b.iou(&a));
        }

        #[test]
        fn iou_with_self_is_one(a in arb_bbox()) {
            prop_assert!((a.iou(&a) - 1.0).abs() < 1e-9);
        }

        #[test]
        fn shifted_boxes_do_not_overlap(a in arb_bbox(), gap in 0.0f64..100.0) {
            let shifted = BBox::new(a.x2 + gap, a.y1, a.x2 + gap + a.width(), a.y2).unwrap();
            prop_assert_eq!(a.iou(&shifted), 0.0);
        }
    }
}
