//! Drawable definitions for the shared canvas.

mod circle;
mod group;
mod path;
mod rectangle;
mod text;

pub use circle::Circle;
pub use group::Group;
pub use path::{Composite, Path};
pub use rectangle::Rectangle;
pub use text::{FontWeight, TextBox};

use crate::ids::DrawableId;
use kurbo::{Point, Rect};
use peniko::Color;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// RGBA8 color, serialized as a CSS hex string.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SerializableColor {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl SerializableColor {
    pub fn new(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn black() -> Self {
        Self::new(0, 0, 0, 255)
    }

    pub fn white() -> Self {
        Self::new(255, 255, 255, 255)
    }

    pub fn transparent() -> Self {
        Self::new(0, 0, 0, 0)
    }

    /// Parse `#rgb`, `#rrggbb`, `#rrggbbaa` or `transparent`.
    pub fn from_hex(color: &str) -> Option<Self> {
        let color = color.trim();
        if color.eq_ignore_ascii_case("transparent") {
            return Some(Self::transparent());
        }

        let hex = color.strip_prefix('#')?;
        if !hex.is_ascii() {
            return None;
        }
        let channel = |range: std::ops::Range<usize>| u8::from_str_radix(&hex[range], 16).ok();
        match hex.len() {
            3 => {
                // #rgb -> #rrggbb
                let r = channel(0..1)? * 17;
                let g = channel(1..2)? * 17;
                let b = channel(2..3)? * 17;
                Some(Self::new(r, g, b, 255))
            }
            6 => Some(Self::new(channel(0..2)?, channel(2..4)?, channel(4..6)?, 255)),
            8 => Some(Self::new(
                channel(0..2)?,
                channel(2..4)?,
                channel(4..6)?,
                channel(6..8)?,
            )),
            _ => None,
        }
    }

    /// Hex form; the alpha byte is only written when the color is not opaque.
    pub fn to_hex(&self) -> String {
        if self.a == 255 {
            format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
        } else {
            format!("#{:02x}{:02x}{:02x}{:02x}", self.r, self.g, self.b, self.a)
        }
    }
}

impl fmt::Display for SerializableColor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for SerializableColor {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for SerializableColor {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_hex(&raw).ok_or_else(|| D::Error::custom(format!("invalid color: {raw}")))
    }
}

impl From<Color> for SerializableColor {
    fn from(color: Color) -> Self {
        let rgba = color.to_rgba8();
        Self {
            r: rgba.r,
            g: rgba.g,
            b: rgba.b,
            a: rgba.a,
        }
    }
}

impl From<SerializableColor> for Color {
    fn from(color: SerializableColor) -> Self {
        Color::from_rgba8(color.r, color.g, color.b, color.a)
    }
}

/// Style properties shared by every drawable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShapeStyle {
    /// Fill color (None = no fill).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fill: Option<SerializableColor>,
    /// Stroke color (None = no outline).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke: Option<SerializableColor>,
    /// Stroke width.
    #[serde(default = "default_stroke_width")]
    pub stroke_width: f64,
    /// Overall opacity (0.0 = fully transparent, 1.0 = fully opaque).
    #[serde(default = "default_opacity")]
    pub opacity: f64,
}

fn default_stroke_width() -> f64 {
    1.0
}

fn default_opacity() -> f64 {
    1.0
}

impl ShapeStyle {
    pub fn with_fill(mut self, color: SerializableColor) -> Self {
        self.fill = Some(color);
        self
    }

    pub fn with_stroke(mut self, color: SerializableColor, width: f64) -> Self {
        self.stroke = Some(color);
        self.stroke_width = width;
        self
    }

    /// Fill color with opacity applied.
    pub fn fill_with_opacity(&self) -> Option<Color> {
        self.fill.map(|c| apply_opacity(c, self.opacity))
    }

    /// Stroke color with opacity applied.
    pub fn stroke_with_opacity(&self) -> Option<Color> {
        self.stroke.map(|c| apply_opacity(c, self.opacity))
    }
}

fn apply_opacity(color: SerializableColor, opacity: f64) -> Color {
    let alpha = (color.a as f64 * opacity.clamp(0.0, 1.0)) as u8;
    Color::from_rgba8(color.r, color.g, color.b, alpha)
}

impl Default for ShapeStyle {
    fn default() -> Self {
        Self {
            fill: None,
            stroke: None,
            stroke_width: default_stroke_width(),
            opacity: default_opacity(),
        }
    }
}

/// Position, rotation and group membership of a drawable.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Placement {
    pub x: f64,
    pub y: f64,
    /// Rotation angle in degrees.
    #[serde(default)]
    pub rotation: f64,
    /// Enclosing group, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<DrawableId>,
}

impl Placement {
    pub fn at(position: Point) -> Self {
        Self {
            x: position.x,
            y: position.y,
            rotation: 0.0,
            parent: None,
        }
    }

    pub fn position(&self) -> Point {
        Point::new(self.x, self.y)
    }
}

/// The closed set of drawable kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DrawableKind {
    Rectangle,
    Circle,
    Path,
    Text,
    Group,
}

impl DrawableKind {
    pub const ALL: [DrawableKind; 5] = [
        DrawableKind::Rectangle,
        DrawableKind::Circle,
        DrawableKind::Path,
        DrawableKind::Text,
        DrawableKind::Group,
    ];

    /// The `type` tag written into attribute bags.
    pub fn tag(self) -> &'static str {
        match self {
            DrawableKind::Rectangle => "rectangle",
            DrawableKind::Circle => "circle",
            DrawableKind::Path => "path",
            DrawableKind::Text => "text",
            DrawableKind::Group => "group",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.tag() == tag)
    }

    /// Single-letter prefix used for generated identifiers.
    pub fn prefix(self) -> char {
        match self {
            DrawableKind::Rectangle => 'r',
            DrawableKind::Circle => 'c',
            DrawableKind::Path => 'p',
            DrawableKind::Text => 't',
            DrawableKind::Group => 'g',
        }
    }

    pub fn from_prefix(prefix: char) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.prefix() == prefix)
    }
}

/// Distance from a point to a line segment (a→b).
pub fn point_to_segment_dist(point: Point, a: Point, b: Point) -> f64 {
    let seg = kurbo::Vec2::new(b.x - a.x, b.y - a.y);
    let pv = kurbo::Vec2::new(point.x - a.x, point.y - a.y);
    let len_sq = seg.hypot2();
    if len_sq < f64::EPSILON {
        return pv.hypot();
    }
    let t = (pv.dot(seg) / len_sq).clamp(0.0, 1.0);
    let proj = Point::new(a.x + t * seg.x, a.y + t * seg.y);
    ((point.x - proj.x).powi(2) + (point.y - proj.y).powi(2)).sqrt()
}

/// Minimum distance from a point to a polyline (sequence of connected segments).
pub fn point_to_polyline_dist(point: Point, points: &[Point]) -> f64 {
    if let [only] = points {
        return only.distance(point);
    }
    points
        .windows(2)
        .map(|w| point_to_segment_dist(point, w[0], w[1]))
        .fold(f64::INFINITY, f64::min)
}

/// Common trait for all drawables.
pub trait ShapeTrait {
    /// Get the unique identifier.
    fn id(&self) -> &DrawableId;

    /// The drawable's kind.
    fn kind(&self) -> DrawableKind;

    fn placement(&self) -> &Placement;

    fn placement_mut(&mut self) -> &mut Placement;

    /// Bounding box in canvas coordinates, ignoring rotation.
    fn bounds(&self) -> Rect;

    /// Check if a point (in canvas coordinates) hits this drawable.
    fn hit_test(&self, point: Point, tolerance: f64) -> bool;

    fn style(&self) -> &ShapeStyle;

    fn style_mut(&mut self) -> &mut ShapeStyle;

    /// Move by an offset.
    fn translate(&mut self, dx: f64, dy: f64) {
        let placement = self.placement_mut();
        placement.x += dx;
        placement.y += dy;
    }
}

/// Tagged union over every drawable kind.
///
/// Serializes to a flat attribute bag whose `type` field selects the variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Drawable {
    Rectangle(Rectangle),
    Circle(Circle),
    Path(Path),
    Text(TextBox),
    Group(Group),
}

impl Drawable {
    fn as_shape(&self) -> &dyn ShapeTrait {
        match self {
            Drawable::Rectangle(s) => s,
            Drawable::Circle(s) => s,
            Drawable::Path(s) => s,
            Drawable::Text(s) => s,
            Drawable::Group(s) => s,
        }
    }

    fn as_shape_mut(&mut self) -> &mut dyn ShapeTrait {
        match self {
            Drawable::Rectangle(s) => s,
            Drawable::Circle(s) => s,
            Drawable::Path(s) => s,
            Drawable::Text(s) => s,
            Drawable::Group(s) => s,
        }
    }

    pub fn id(&self) -> &DrawableId {
        self.as_shape().id()
    }

    /// Replace the identifier. Used when rebuilding from a map key or duplicating.
    pub fn set_id(&mut self, id: DrawableId) {
        match self {
            Drawable::Rectangle(s) => s.id = id,
            Drawable::Circle(s) => s.id = id,
            Drawable::Path(s) => s.id = id,
            Drawable::Text(s) => s.id = id,
            Drawable::Group(s) => s.id = id,
        }
    }

    pub fn kind(&self) -> DrawableKind {
        self.as_shape().kind()
    }

    pub fn placement(&self) -> &Placement {
        self.as_shape().placement()
    }

    pub fn placement_mut(&mut self) -> &mut Placement {
        self.as_shape_mut().placement_mut()
    }

    pub fn position(&self) -> Point {
        self.placement().position()
    }

    pub fn parent(&self) -> Option<&DrawableId> {
        self.placement().parent.as_ref()
    }

    pub fn set_parent(&mut self, parent: Option<DrawableId>) {
        self.placement_mut().parent = parent;
    }

    pub fn bounds(&self) -> Rect {
        self.as_shape().bounds()
    }

    pub fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        self.as_shape().hit_test(point, tolerance)
    }

    pub fn style(&self) -> &ShapeStyle {
        self.as_shape().style()
    }

    pub fn style_mut(&mut self) -> &mut ShapeStyle {
        self.as_shape_mut().style_mut()
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.as_shape_mut().translate(dx, dy);
    }

    /// Check if this drawable is a group.
    pub fn is_group(&self) -> bool {
        matches!(self, Drawable::Group(_))
    }

    pub fn as_text(&self) -> Option<&TextBox> {
        match self {
            Drawable::Text(t) => Some(t),
            _ => None,
        }
    }
}
