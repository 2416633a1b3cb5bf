//! Polyline drawable used for pen, highlighter and eraser strokes and arrows.

use super::{DrawableKind, Placement, ShapeStyle, ShapeTrait, point_to_polyline_dist};
use crate::ids::DrawableId;
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// How a path's pixels combine with what is beneath it.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Composite {
    #[default]
    Normal,
    /// Highlighter ink.
    Multiply,
    /// Eraser strokes punch through underlying ink.
    Erase,
}

/// A polyline. Points are relative to the placement origin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Path {
    #[serde(skip)]
    pub(crate) id: DrawableId,
    #[serde(flatten)]
    pub placement: Placement,
    pub points: Vec<Point>,
    #[serde(default)]
    pub composite: Composite,
    #[serde(default)]
    pub closed: bool,
    #[serde(flatten)]
    pub style: ShapeStyle,
}

impl Path {
    pub fn new(id: DrawableId, origin: Point, points: Vec<Point>) -> Self {
        Self {
            id,
            placement: Placement::at(origin),
            points,
            composite: Composite::Normal,
            closed: false,
            style: ShapeStyle::default(),
        }
    }

    /// Build from canvas-space points; the origin becomes their top-left extent.
    pub fn from_absolute(id: DrawableId, points: &[Point]) -> Self {
        let origin = points
            .iter()
            .fold(None, |acc: Option<Point>, p| {
                Some(acc.map_or(*p, |m| Point::new(m.x.min(p.x), m.y.min(p.y))))
            })
            .unwrap_or(Point::ZERO);
        let relative = points
            .iter()
            .map(|p| Point::new(p.x - origin.x, p.y - origin.y))
            .collect();
        Self::new(id, origin, relative)
    }

    pub fn with_composite(mut self, composite: Composite) -> Self {
        self.composite = composite;
        self
    }

    /// Points in canvas coordinates.
    pub fn absolute_points(&self) -> Vec<Point> {
        let Placement { x, y, .. } = self.placement;
        self.points.iter().map(|p| Point::new(p.x + x, p.y + y)).collect()
    }

    /// Drop points that deviate less than `tolerance` from the simplified line.
    pub fn simplify(&mut self, tolerance: f64) {
        if self.points.len() < 3 {
            return;
        }
        self.points = rdp_simplify(&self.points, tolerance);
    }
}

impl ShapeTrait for Path {
    fn id(&self) -> &DrawableId {
        &self.id
    }

    fn kind(&self) -> DrawableKind {
        DrawableKind::Path
    }

    fn placement(&self) -> &Placement {
        &self.placement
    }

    fn placement_mut(&mut self) -> &mut Placement {
        &mut self.placement
    }

    fn bounds(&self) -> Rect {
        let points = self.absolute_points();
        let Some(first) = points.first() else {
            return Rect::from_origin_size(self.placement.position(), (0.0, 0.0));
        };
        let rect = points
            .iter()
            .fold(Rect::from_points(*first, *first), |r, p| r.union_pt(*p));
        let pad = self.style.stroke_width / 2.0;
        rect.inflate(pad, pad)
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        let mut points = self.absolute_points();
        if self.closed {
            if let Some(first) = points.first().copied() {
                points.push(first);
            }
        }
        point_to_polyline_dist(point, &points) <= tolerance + self.style.stroke_width / 2.0
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }
}

/// Ramer-Douglas-Peucker line simplification.
fn rdp_simplify(points: &[Point], tolerance: f64) -> Vec<Point> {
    if points.len() < 3 {
        return points.to_vec();
    }

    let first = points[0];
    let last = points[points.len() - 1];

    let mut max_dist = 0.0;
    let mut max_index = 0;
    for (i, point) in points.iter().enumerate().skip(1).take(points.len() - 2) {
        let dist = perpendicular_distance(*point, first, last);
        if dist > max_dist {
            max_dist = dist;
            max_index = i;
        }
    }

    if max_dist > tolerance {
        let mut left = rdp_simplify(&points[..=max_index], tolerance);
        let right = rdp_simplify(&points[max_index..], tolerance);
        left.pop();
        left.extend(right);
        left
    } else {
        vec![first, last]
    }
}

fn perpendicular_distance(point: Point, line_start: Point, line_end: Point) -> f64 {
    let dx = line_end.x - line_start.x;
    let dy = line_end.y - line_start.y;
    let len_sq = dx * dx + dy * dy;
    if len_sq < f64::EPSILON {
        return point.distance(line_start);
    }
    ((dy * point.x - dx * point.y + line_end.x * line_start.y - line_end.y * line_start.x).abs())
        / len_sq.sqrt()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_absolute_relativizes() {
        let path = Path::from_absolute(
            DrawableId::new("p1"),
            &[Point::new(10.0, 20.0), Point::new(30.0, 5.0)],
        );
        assert_eq!(path.placement.position(), Point::new(10.0, 5.0));
        assert_eq!(path.points, vec![Point::new(0.0, 15.0), Point::new(20.0, 0.0)]);
        assert_eq!(
            path.absolute_points(),
            vec![Point::new(10.0, 20.0), Point::new(30.0, 5.0)]
        );
    }

    #[test]
    fn test_simplify_straight_line() {
        let points: Vec<Point> = (0..10).map(|i| Point::new(i as f64, 0.0)).collect();
        let mut path = Path::new(DrawableId::new("p1"), Point::ZERO, points);
        path.simplify(0.5);
        assert_eq!(path.points, vec![Point::new(0.0, 0.0), Point::new(9.0, 0.0)]);
    }

    #[test]
    fn test_hit_test_follows_translation() {
        let mut path = Path::from_absolute(
            DrawableId::new("p1"),
            &[Point::new(0.0, 0.0), Point::new(100.0, 0.0)],
        );
        assert!(path.hit_test(Point::new(50.0, 1.0), 1.0));
        path.translate(0.0, 50.0);
        assert!(!path.hit_test(Point::new(50.0, 1.0), 1.0));
        assert!(path.hit_test(Point::new(50.0, 50.0), 1.0));
    }

    #[test]
    fn test_empty_path_bounds() {
        let path = Path::new(DrawableId::new("p1"), Point::new(3.0, 4.0), Vec::new());
        assert_eq!(path.bounds(), Rect::new(3.0, 4.0, 3.0, 4.0));
    }
}
