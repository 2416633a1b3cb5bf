//! Group drawable. Members point at their group through `Placement::parent`.

use super::{DrawableKind, Placement, ShapeStyle, ShapeTrait};
use crate::ids::DrawableId;
use kurbo::{Point, Rect};
use serde::{Deserialize, Serialize};

/// A group anchor. Its extent is the union of its members, computed by the scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Group {
    #[serde(skip)]
    pub(crate) id: DrawableId,
    #[serde(flatten)]
    pub placement: Placement,
    #[serde(flatten)]
    pub style: ShapeStyle,
}

impl Group {
    pub fn new(id: DrawableId, position: Point) -> Self {
        Self {
            id,
            placement: Placement::at(position),
            style: ShapeStyle::default(),
        }
    }
}

impl ShapeTrait for Group {
    fn id(&self) -> &DrawableId {
        &self.id
    }

    fn kind(&self) -> DrawableKind {
        DrawableKind::Group
    }

    fn placement(&self) -> &Placement {
        &self.placement
    }

    fn placement_mut(&mut self) -> &mut Placement {
        &mut self.placement
    }

    fn bounds(&self) -> Rect {
        Rect::from_origin_size(self.placement.position(), (0.0, 0.0))
    }

    fn hit_test(&self, _point: Point, _tolerance: f64) -> bool {
        false
    }

    fn style(&self) -> &ShapeStyle {
        &self.style
    }

    fn style_mut(&mut self) -> &mut ShapeStyle {
        &mut self.style
    }
}
