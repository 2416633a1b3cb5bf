//! Circle drawable.

use super::{DrawableKind, Placement, ShapeStyle, ShapeTrait};
use crate::ids::DrawableId;
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// A circle. The placement is the top-left corner of its bounding square.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Circle {
    #[serde(skip)]
    pub(crate) id: DrawableId,
    #[serde(flatten)]
    pub placement: Placement,
    pub radius: f64,
    #[serde(flatten)]
    pub style: ShapeStyle,
}

impl Circle {
    pub fn new(id: DrawableId, position: Point, radius: f64) -> Self {
        Self {
            id,
            placement: Placement::at(position),
            radius: radius.abs(),
            style: ShapeStyle::default(),
        }
    }

    /// Create a circle from its center.
    pub fn centered(id: DrawableId, center: Point, radius: f64) -> Self {
        let radius = radius.abs();
        Self::new(id, Point::new(center.x - radius, center.y - radius), radius)
    }

    pub fn center(&self) -> Point {
        Point::new(self.placement.x + self.radius, self.placement.y + self.radius)
    }
}

impl ShapeTrait for Circle {
    fn id(&self) -> &DrawableId {
        &self.id
    }

    fn kind(&self) -> DrawableKind {
        DrawableKind::Circle
    }

    fn placement(&self) -> &Placement {
        &self.placement
    }

    fn placement_mut(&mut self) -> &mut Placement {
        &mut self.placement
    }

    fn bounds(&self) -> Rect {
        let Placement { x, y, .. } = self.placement;
        let diameter = self.radius * 2.0;
        Rect::new(x, y, x + diameter, y + diameter)
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        let half_sw = self.style.stroke_width / 2.0;
        let dist = self.center().distance(point);
        if dist > self.radius + tolerance + half_sw {
            return false;
        }
        if self.style.fill.is_some() {
            return true;
        }
        // Outline only: reject if inside the inner circle
        let inner = (self.radius - tolerance - half_sw).max(0.0);
        inner < f64::EPSILON || dist > inner
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

    #[test]
    fn test_centered_circle() {
        let circle = Circle::centered(DrawableId::new("c1"), Point::new(100.0, 100.0), 50.0);
        assert_eq!(circle.placement.position(), Point::new(50.0, 50.0));
        assert_eq!(circle.bounds(), Rect::new(50.0, 50.0, 150.0, 150.0));
    }

    #[test]
    fn test_hit_test_ring() {
        let circle = Circle::new(DrawableId::new("c1"), Point::ZERO, 50.0);
        assert!(circle.hit_test(Point::new(100.0, 50.0), 1.0));
        assert!(!circle.hit_test(Point::new(50.0, 50.0), 1.0));
        assert!(!circle.hit_test(Point::new(120.0, 50.0), 1.0));
    }
}
