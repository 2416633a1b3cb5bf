//! Rectangle drawable.

use super::{DrawableKind, Placement, ShapeStyle, ShapeTrait};
use crate::ids::DrawableId;
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// A rectangle with optional rounded corners, positioned by its top-left corner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rectangle {
    #[serde(skip)]
    pub(crate) id: DrawableId,
    #[serde(flatten)]
    pub placement: Placement,
    pub width: f64,
    pub height: f64,
    /// Corner radius (0 = sharp corners).
    #[serde(default)]
    pub corner_radius: f64,
    #[serde(flatten)]
    pub style: ShapeStyle,
}

impl Rectangle {
    pub fn new(id: DrawableId, position: Point, width: f64, height: f64) -> Self {
        Self {
            id,
            placement: Placement::at(position),
            width,
            height,
            corner_radius: 0.0,
            style: ShapeStyle::default(),
        }
    }

    /// Create a rectangle spanning two corner points.
    pub fn from_corners(id: DrawableId, p1: Point, p2: Point) -> Self {
        let origin = Point::new(p1.x.min(p2.x), p1.y.min(p2.y));
        Self::new(id, origin, (p2.x - p1.x).abs(), (p2.y - p1.y).abs())
    }

    pub fn with_corner_radius(mut self, radius: f64) -> Self {
        self.corner_radius = radius;
        self
    }

    pub fn as_rect(&self) -> Rect {
        let Placement { x, y, .. } = self.placement;
        Rect::new(x, y, x + self.width, y + self.height)
    }
}

impl ShapeTrait for Rectangle {
    fn id(&self) -> &DrawableId {
        &self.id
    }

    fn kind(&self) -> DrawableKind {
        DrawableKind::Rectangle
    }

    fn placement(&self) -> &Placement {
        &self.placement
    }

    fn placement_mut(&mut self) -> &mut Placement {
        &mut self.placement
    }

    fn bounds(&self) -> Rect {
        self.as_rect()
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        let rect = self.as_rect();
        if self.style.fill.is_some() {
            return rect.inflate(tolerance, tolerance).contains(point);
        }
        // Outline only: hit on the border
        let band = tolerance + self.style.stroke_width / 2.0;
        rect.inflate(band, band).contains(point) && !rect.inflate(-band, -band).contains(point)
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::SerializableColor;

    fn rect(x: f64, y: f64, w: f64, h: f64) -> Rectangle {
        Rectangle::new(DrawableId::new("r1"), Point::new(x, y), w, h)
    }

    #[test]
    fn test_rectangle_from_corners() {
        let r = Rectangle::from_corners(
            DrawableId::new("r1"),
            Point::new(100.0, 100.0),
            Point::new(50.0, 40.0),
        );
        assert_eq!(r.placement.position(), Point::new(50.0, 40.0));
        assert!((r.width - 50.0).abs() < f64::EPSILON);
        assert!((r.height - 60.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_hit_test_outline_and_filled() {
        let mut r = rect(0.0, 0.0, 100.0, 100.0);
        assert!(!r.hit_test(Point::new(50.0, 50.0), 2.0));
        assert!(r.hit_test(Point::new(0.5, 50.0), 2.0));

        r.style.fill = Some(SerializableColor::white());
        assert!(r.hit_test(Point::new(50.0, 50.0), 0.0));
        assert!(r.hit_test(Point::new(105.0, 50.0), 10.0));
        assert!(!r.hit_test(Point::new(150.0, 50.0), 0.0));
    }

    #[test]
    fn test_translate_moves_bounds() {
        let mut r = rect(10.0, 20.0, 100.0, 50.0);
        r.translate(5.0, -5.0);
        assert_eq!(r.bounds(), Rect::new(15.0, 15.0, 115.0, 65.0));
    }
}
