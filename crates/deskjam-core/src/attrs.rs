//! Conversion between drawables and the flat attribute bags stored in shared maps.

use crate::ids::DrawableId;
use crate::shapes::{Drawable, DrawableKind};
use serde_json::{Map, Value};
use thiserror::Error;

/// A serialized drawable: a flat JSON object keyed by attribute name.
pub type AttributeBag = Map<String, Value>;

/// Key holding the drawable's type tag.
pub const KIND_KEY: &str = "type";
/// Key holding the drawable's position in the scene order.
pub const Z_KEY: &str = "z";

/// Errors raised while decoding an attribute bag from a peer.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("attribute bag has no type tag")]
    MissingKind,
    #[error("unknown drawable type: {0}")]
    UnknownKind(String),
    #[error("invalid attributes: {0}")]
    Invalid(#[from] serde_json::Error),
}

/// Serialize a drawable with its z index. The id is the map key and is not written.
pub fn to_bag(drawable: &Drawable, z: usize) -> serde_json::Result<AttributeBag> {
    match serde_json::to_value(drawable)? {
        Value::Object(mut bag) => {
            bag.insert(Z_KEY.to_string(), Value::from(z as u64));
            Ok(bag)
        }
        other => Err(<serde_json::Error as serde::ser::Error>::custom(format!(
            "drawable serialized to a non-object: {other}"
        ))),
    }
}

/// Rebuild a drawable from a bag stored under `key`. Returns it with its z index.
pub fn from_bag(key: &str, bag: &AttributeBag) -> Result<(Drawable, i64), DecodeError> {
    let tag = bag
        .get(KIND_KEY)
        .and_then(Value::as_str)
        .ok_or(DecodeError::MissingKind)?;
    if DrawableKind::from_tag(tag).is_none() {
        return Err(DecodeError::UnknownKind(tag.to_string()));
    }

    let z = bag
        .get(Z_KEY)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0);

    let mut attrs = bag.clone();
    attrs.remove(Z_KEY);
    let mut drawable: Drawable = serde_json::from_value(Value::Object(attrs))?;
    drawable.set_id(DrawableId::new(key));
    Ok((drawable, z))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{
        Circle, Composite, Group, Path, Rectangle, SerializableColor, ShapeStyle, TextBox,
    };
    use kurbo::Point;
    use serde_json::json;

    fn as_bag(value: Value) -> AttributeBag {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected object"),
        }
    }

    #[test]
    fn test_rectangle_bag_layout() {
        let mut rect = Rectangle::new(DrawableId::new("r1"), Point::new(10.0, 10.0), 100.0, 60.0);
        rect.style = ShapeStyle::default().with_fill(SerializableColor::white());
        let bag = to_bag(&Drawable::Rectangle(rect), 0).expect("encode");

        assert_eq!(bag["type"], json!("rectangle"));
        assert_eq!(bag["x"], json!(10.0));
        assert_eq!(bag["y"], json!(10.0));
        assert_eq!(bag["width"], json!(100.0));
        assert_eq!(bag["fill"], json!("#ffffff"));
        assert_eq!(bag["z"], json!(0));
        assert!(!bag.contains_key("id"));
        assert!(!bag.contains_key("parent"));
        assert!(!bag.contains_key("stroke"));
    }

    #[test]
    fn test_every_kind_survives_a_bag() {
        let mut path = Path::from_absolute(
            DrawableId::new("p3"),
            &[Point::new(0.0, 0.0), Point::new(5.5, 2.25)],
        )
        .with_composite(Composite::Multiply);
        path.placement.parent = Some(DrawableId::new("g5"));
        let drawables = vec![
            Drawable::Rectangle(
                Rectangle::new(DrawableId::new("r1"), Point::new(1.0, 2.0), 3.0, 4.0)
                    .with_corner_radius(8.0),
            ),
            Drawable::Circle(Circle::new(DrawableId::new("c2"), Point::new(-4.0, 9.5), 50.0)),
            Drawable::Path(path),
            Drawable::Text(
                TextBox::new(DrawableId::new("t4"), Point::new(100.0, 50.0), "Slide Title", 48.0)
                    .bold()
                    .with_width(400.0),
            ),
            Drawable::Group(Group::new(DrawableId::new("g5"), Point::new(7.0, 7.0))),
        ];

        for (z, drawable) in drawables.iter().enumerate() {
            let bag = to_bag(drawable, z).expect("encode");
            let (decoded, decoded_z) = from_bag(drawable.id().as_str(), &bag).expect("decode");
            assert_eq!(&decoded, drawable);
            assert_eq!(decoded_z, z as i64);
        }
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let bag = as_bag(json!({"type": "text", "x": 1, "y": 2, "text": "hi", "font_size": 24}));
        let (drawable, z) = from_bag("t9", &bag).expect("decode");
        let text = drawable.as_text().expect("text");
        assert_eq!(text.font_family, "Arial");
        assert_eq!(text.style.opacity, 1.0);
        assert_eq!(drawable.id().as_str(), "t9");
        assert_eq!(z, 0);
    }

    #[test]
    fn test_rejects_bad_tags() {
        let missing = as_bag(json!({"x": 1, "y": 2}));
        assert!(matches!(from_bag("a", &missing), Err(DecodeError::MissingKind)));

        let unknown = as_bag(json!({"type": "triangle", "x": 1, "y": 2}));
        assert!(matches!(
            from_bag("a", &unknown),
            Err(DecodeError::UnknownKind(tag)) if tag == "triangle"
        ));
    }

    #[test]
    fn test_rejects_invalid_fields() {
        let bad_color = as_bag(json!({"type": "circle", "x": 0, "y": 0, "radius": 5, "fill": "blue"}));
        assert!(matches!(from_bag("c1", &bad_color), Err(DecodeError::Invalid(_))));

        let missing_geometry = as_bag(json!({"type": "rectangle", "x": 0, "y": 0}));
        assert!(matches!(from_bag("r1", &missing_geometry), Err(DecodeError::Invalid(_))));
    }
}
