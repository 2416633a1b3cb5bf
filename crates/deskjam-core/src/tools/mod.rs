//! Drawing tools and the drawables they produce.

use crate::ids::{DrawableId, IdGenerator};
use crate::shapes::{
    Circle, Composite, Drawable, DrawableKind, Group, Path, Rectangle, SerializableColor,
    ShapeStyle, TextBox,
};
use kurbo::Point;
use serde::{Deserialize, Serialize};

/// Default rectangle size and corner radius.
pub const RECT_SIZE: (f64, f64) = (100.0, 60.0);
pub const RECT_CORNER_RADIUS: f64 = 8.0;
pub const CIRCLE_RADIUS: f64 = 50.0;
pub const TEXT_PLACEHOLDER: &str = "Click to edit";
pub const TEXT_SIZE: f64 = 24.0;
pub const STICKY_SIZE: f64 = 150.0;
pub const STICKY_COLOR: &str = "#ffe600";
/// Arrow outline, relative to the click point.
pub const ARROW_POINTS: [(f64, f64); 5] =
    [(0.0, 0.0), (50.0, 0.0), (40.0, -10.0), (50.0, 0.0), (40.0, 10.0)];

/// Available tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    #[default]
    Select,
    Pen,
    Highlighter,
    Eraser,
    Rectangle,
    Circle,
    Text,
    Sticky,
    Arrow,
}

impl ToolKind {
    /// Tools that record a freehand stroke.
    pub fn is_stroke(self) -> bool {
        matches!(self, ToolKind::Pen | ToolKind::Highlighter | ToolKind::Eraser)
    }

    /// Tools that place a drawable with a single click.
    pub fn is_placement(self) -> bool {
        matches!(
            self,
            ToolKind::Rectangle | ToolKind::Circle | ToolKind::Text | ToolKind::Sticky | ToolKind::Arrow
        )
    }
}

/// Color and brush size used by the tools.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ToolOptions {
    pub color: SerializableColor,
    pub brush_size: f64,
}

impl Default for ToolOptions {
    fn default() -> Self {
        Self {
            color: SerializableColor::new(0x00, 0xff, 0xf7, 255),
            brush_size: 5.0,
        }
    }
}

/// Build a drawable of `kind` with the default geometry for that kind.
pub fn default_drawable(kind: DrawableKind, id: DrawableId, position: Point, style: ShapeStyle) -> Drawable {
    let mut drawable = match kind {
        DrawableKind::Rectangle => Drawable::Rectangle(
            Rectangle::new(id, position, RECT_SIZE.0, RECT_SIZE.1).with_corner_radius(RECT_CORNER_RADIUS),
        ),
        DrawableKind::Circle => Drawable::Circle(Circle::new(id, position, CIRCLE_RADIUS)),
        DrawableKind::Path => Drawable::Path(Path::new(id, position, Vec::new())),
        DrawableKind::Text => {
            Drawable::Text(TextBox::new(id, position, TEXT_PLACEHOLDER, TEXT_SIZE))
        }
        DrawableKind::Group => Drawable::Group(Group::new(id, position)),
    };
    *drawable.style_mut() = style;
    drawable
}

/// Drawables placed by a click with `tool`, parents before members.
///
/// Stroke tools and Select place nothing.
pub fn place(tool: ToolKind, ids: &mut IdGenerator, position: Point, options: &ToolOptions) -> Vec<Drawable> {
    let outlined = ShapeStyle::default()
        .with_fill(options.color)
        .with_stroke(SerializableColor::white(), 2.0);
    match tool {
        ToolKind::Rectangle => {
            let id = ids.next(DrawableKind::Rectangle);
            vec![default_drawable(DrawableKind::Rectangle, id, position, outlined)]
        }
        ToolKind::Circle => {
            let id = ids.next(DrawableKind::Circle);
            vec![default_drawable(DrawableKind::Circle, id, position, outlined)]
        }
        ToolKind::Text => {
            let id = ids.next(DrawableKind::Text);
            let style = ShapeStyle::default().with_fill(options.color);
            vec![default_drawable(DrawableKind::Text, id, position, style)]
        }
        ToolKind::Sticky => sticky_note(ids, position),
        ToolKind::Arrow => {
            let points: Vec<Point> = ARROW_POINTS.iter().map(|&(x, y)| Point::new(x, y)).collect();
            let mut arrow = Path::new(ids.next(DrawableKind::Path), position, points);
            arrow.style = ShapeStyle::default().with_stroke(options.color, 3.0);
            vec![Drawable::Path(arrow)]
        }
        ToolKind::Select | ToolKind::Pen | ToolKind::Highlighter | ToolKind::Eraser => Vec::new(),
    }
}

/// A yellow note: a group holding a square background and a text label.
pub fn sticky_note(ids: &mut IdGenerator, position: Point) -> Vec<Drawable> {
    let black = SerializableColor::black();
    let paper = SerializableColor::from_hex(STICKY_COLOR).unwrap_or(SerializableColor::white());

    let group = Group::new(ids.next(DrawableKind::Group), position);
    let parent = Some(group.id.clone());

    let mut background = Rectangle::new(ids.next(DrawableKind::Rectangle), position, STICKY_SIZE, STICKY_SIZE);
    background.style = ShapeStyle::default().with_fill(paper).with_stroke(black, 1.0);
    background.placement.parent = parent.clone();

    let mut label = TextBox::new(
        ids.next(DrawableKind::Text),
        Point::new(position.x + 10.0, position.y + 10.0),
        "Note",
        16.0,
    );
    label.style = ShapeStyle::default().with_fill(black);
    label.placement.parent = parent;

    vec![
        Drawable::Group(group),
        Drawable::Rectangle(background),
        Drawable::Text(label),
    ]
}

/// Turn a recorded stroke into a path. Returns None for non-stroke tools or no points.
pub fn stroke(tool: ToolKind, id: DrawableId, points: &[Point], options: &ToolOptions) -> Option<Drawable> {
    if points.is_empty() {
        return None;
    }
    let (width, composite) = match tool {
        ToolKind::Pen => (options.brush_size, Composite::Normal),
        ToolKind::Highlighter => (options.brush_size * 3.0, Composite::Multiply),
        ToolKind::Eraser => (options.brush_size * 2.0, Composite::Erase),
        _ => return None,
    };
    let mut path = Path::from_absolute(id, points).with_composite(composite);
    path.simplify(0.5);
    path.style = ShapeStyle::default().with_stroke(options.color, width);
    Some(Drawable::Path(path))
}

/// Tracks the active tool and the stroke being drawn.
#[derive(Debug, Clone, Default)]
pub struct ToolManager {
    pub current_tool: ToolKind,
    pub options: ToolOptions,
    stroke: Vec<Point>,
    active: bool,
}

impl ToolManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Switch tools, abandoning any stroke in progress.
    pub fn set_tool(&mut self, tool: ToolKind) {
        self.cancel();
        self.current_tool = tool;
    }

    pub fn begin(&mut self, point: Point) {
        if !self.current_tool.is_stroke() {
            return;
        }
        self.stroke.clear();
        self.stroke.push(point);
        self.active = true;
    }

    pub fn update(&mut self, point: Point) {
        if self.active {
            self.stroke.push(point);
        }
    }

    /// Finish the gesture. Returns the recorded stroke for stroke tools.
    pub fn end(&mut self, point: Point) -> Option<Vec<Point>> {
        if !self.active {
            return None;
        }
        self.stroke.push(point);
        self.active = false;
        Some(std::mem::take(&mut self.stroke))
    }

    pub fn cancel(&mut self) {
        self.stroke.clear();
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn stroke_points(&self) -> &[Point] {
        &self.stroke
    }
}
