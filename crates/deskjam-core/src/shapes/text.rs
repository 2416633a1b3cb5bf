//! Text drawable.

use super::{DrawableKind, Placement, ShapeStyle, ShapeTrait};
use crate::ids::DrawableId;
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// Font weight options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FontWeight {
    #[default]
    Normal,
    Bold,
}

fn default_font_family() -> String {
    "Arial".to_string()
}

fn default_line_height() -> f64 {
    1.16
}

/// An editable text box, positioned by its top-left corner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextBox {
    #[serde(skip)]
    pub(crate) id: DrawableId,
    #[serde(flatten)]
    pub placement: Placement,
    pub text: String,
    pub font_size: f64,
    #[serde(default = "default_font_family")]
    pub font_family: String,
    #[serde(default)]
    pub font_weight: FontWeight,
    /// Wrapping width. Unset means the box grows with its longest line.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub width: Option<f64>,
    #[serde(default = "default_line_height")]
    pub line_height: f64,
    #[serde(flatten)]
    pub style: ShapeStyle,
}

impl TextBox {
    pub fn new(id: DrawableId, position: Point, text: impl Into<String>, font_size: f64) -> Self {
        Self {
            id,
            placement: Placement::at(position),
            text: text.into(),
            font_size,
            font_family: default_font_family(),
            font_weight: FontWeight::Normal,
            width: None,
            line_height: default_line_height(),
            style: ShapeStyle::default(),
        }
    }

    pub fn with_width(mut self, width: f64) -> Self {
        self.width = Some(width);
        self
    }

    pub fn bold(mut self) -> Self {
        self.font_weight = FontWeight::Bold;
        self
    }

    pub fn with_line_height(mut self, line_height: f64) -> Self {
        self.line_height = line_height;
        self
    }

    fn approximate_width(&self) -> f64 {
        let longest = self.text.lines().map(|l| l.chars().count()).max().unwrap_or(0);
        let factor = match self.font_weight {
            FontWeight::Normal => 0.55,
            FontWeight::Bold => 0.6,
        };
        longest as f64 * self.font_size * factor
    }

    fn approximate_height(&self) -> f64 {
        let mut lines = self.text.lines().count().max(1);
        if self.text.ends_with('\n') {
            lines += 1;
        }
        lines as f64 * self.font_size * self.line_height
    }
}

impl ShapeTrait for TextBox {
    fn id(&self) -> &DrawableId {
        &self.id
    }

    fn kind(&self) -> DrawableKind {
        DrawableKind::Text
    }

    fn placement(&self) -> &Placement {
        &self.placement
    }

    fn placement_mut(&mut self) -> &mut Placement {
        &mut self.placement
    }

    fn bounds(&self) -> Rect {
        let width = self.width.unwrap_or_else(|| self.approximate_width()).max(20.0);
        Rect::from_origin_size(self.placement.position(), (width, self.approximate_height()))
    }

    fn hit_test(&self, point: Point, tolerance: f64) -> bool {
        self.bounds().inflate(tolerance, tolerance).contains(point)
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }
}
