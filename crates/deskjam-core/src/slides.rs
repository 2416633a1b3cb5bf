//! Slide decks: an ordered list of slides, each with its own canvas map.

use crate::adapter::CanvasSyncAdapter;
use crate::attrs::AttributeBag;
use crate::config::SyncConfig;
use crate::ids::{DrawableId, IdGenerator};
use crate::shapes::{Drawable, DrawableKind, Rectangle, SerializableColor, ShapeStyle, TextBox};
use crate::store::{MapOp, SharedStore, Snapshot, StoreError, StoreResult, Subscription};
use crate::tools::{TEXT_SIZE, ToolOptions};
use kurbo::Point;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use uuid::Uuid;

/// Map of slide id to `{title, order}`.
pub const SLIDES_MAP: &str = "slides";
/// Map holding deck-wide state.
pub const DECK_MAP: &str = "deck";
/// Key in [`DECK_MAP`] naming the slide everyone is on.
pub const CURRENT_KEY: &str = "current";
/// Slide every new deck starts with.
pub const FIRST_SLIDE_ID: &str = "slide-1";

const BULLETS_TEXT: &str = "• Point 1\n• Point 2\n• Point 3";

/// Name of the map holding a slide's drawables.
pub fn slide_map(slide_id: &str) -> String {
    format!("objectsBySlide/{slide_id}")
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slide {
    #[serde(skip)]
    pub id: String,
    pub title: String,
    pub order: i64,
}

impl Slide {
    fn to_bag(&self) -> StoreResult<AttributeBag> {
        match serde_json::to_value(self)? {
            Value::Object(bag) => Ok(bag),
            _ => Err(StoreError::Other(format!("slide {} is not an object", self.id))),
        }
    }

    fn from_bag(id: &str, bag: &AttributeBag) -> Option<Self> {
        match serde_json::from_value::<Slide>(Value::Object(bag.clone())) {
            Ok(mut slide) => {
                slide.id = id.to_string();
                Some(slide)
            }
            Err(e) => {
                log::warn!("Skipping slide '{}': {}", id, e);
                None
            }
        }
    }
}

/// Starting content for a new slide.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlideTemplate {
    TitleSlide,
    Bullets,
    ImageCaption,
}

impl SlideTemplate {
    pub const ALL: [SlideTemplate; 3] = [
        SlideTemplate::TitleSlide,
        SlideTemplate::Bullets,
        SlideTemplate::ImageCaption,
    ];

    pub fn name(self) -> &'static str {
        match self {
            SlideTemplate::TitleSlide => "Title Slide",
            SlideTemplate::Bullets => "Bullets",
            SlideTemplate::ImageCaption => "Image + Caption",
        }
    }

    /// The template's drawables, with ids from `ids`.
    pub fn build(self, ids: &mut IdGenerator) -> Vec<Drawable> {
        let white = ShapeStyle::default().with_fill(SerializableColor::white());
        let text = |ids: &mut IdGenerator, body: &str, x: f64, y: f64, width: f64, size: f64| {
            let mut text = TextBox::new(ids.next(DrawableKind::Text), Point::new(x, y), body, size)
                .with_width(width);
            text.style = white.clone();
            text
        };
        match self {
            SlideTemplate::TitleSlide => {
                vec![Drawable::Text(text(ids, "Title", 400.0, 100.0, 400.0, 48.0).bold())]
            }
            SlideTemplate::Bullets => {
                vec![Drawable::Text(text(ids, BULLETS_TEXT, 200.0, 200.0, 600.0, 32.0))]
            }
            SlideTemplate::ImageCaption => {
                let mut frame = Rectangle::new(
                    ids.next(DrawableKind::Rectangle),
                    Point::new(350.0, 150.0),
                    500.0,
                    300.0,
                );
                frame.style = ShapeStyle::default()
                    .with_fill(SerializableColor::from_hex("#222").unwrap_or(SerializableColor::black()));
                vec![
                    Drawable::Rectangle(frame),
                    Drawable::Text(text(ids, "Caption here", 400.0, 480.0, 400.0, 28.0)),
                ]
            }
        }
    }
}

/// A shared slide deck. The canvas of the current slide is exposed through
/// [`SlideDeck::adapter_mut`]; switching slides remounts it on the slide's map.
pub struct SlideDeck<S: SharedStore> {
    store: Arc<S>,
    config: SyncConfig,
    slides_sub: Subscription,
    deck_sub: Subscription,
    slides: Vec<Slide>,
    current: String,
    ids: IdGenerator,
    adapter: Option<CanvasSyncAdapter<Arc<S>>>,
}

impl<S: SharedStore> SlideDeck<S> {
    /// Join the deck, creating the first slide if the deck is empty.
    pub fn open(store: Arc<S>, config: SyncConfig) -> StoreResult<Self> {
        store.ensure_map(SLIDES_MAP)?;
        store.ensure_map(DECK_MAP)?;
        let slides_sub = store.subscribe(SLIDES_MAP)?;
        let deck_sub = store.subscribe(DECK_MAP)?;

        let mut slides = read_slides(store.read(SLIDES_MAP)?.as_ref());
        if slides.is_empty() {
            let first = Slide {
                id: FIRST_SLIDE_ID.to_string(),
                title: "Slide 1".to_string(),
                order: 0,
            };
            store.transact(
                SLIDES_MAP,
                vec![MapOp::Set {
                    key: first.id.clone(),
                    bag: first.to_bag()?,
                }],
            )?;
            slides.push(first);
        }

        let shared_current = read_current(store.read(DECK_MAP)?.as_ref());
        let current = match shared_current {
            Some(id) if slides.iter().any(|s| s.id == id) => id,
            _ => slides[0].id.clone(),
        };

        let namespace = match &config.id_namespace {
            Some(ns) => ns.clone(),
            None => store.connection_id().to_string(),
        };
        let mut deck = Self {
            store,
            config,
            slides_sub,
            deck_sub,
            slides,
            current: String::new(),
            ids: IdGenerator::new(namespace),
            adapter: None,
        };
        deck.switch_to(&current)?;
        Ok(deck)
    }

    /// Slides in display order.
    pub fn slides(&self) -> &[Slide] {
        &self.slides
    }

    pub fn current_slide(&self) -> Option<&Slide> {
        self.slides.iter().find(|s| s.id == self.current)
    }

    pub fn adapter(&self) -> Option<&CanvasSyncAdapter<Arc<S>>> {
        self.adapter.as_ref()
    }

    /// Canvas of the current slide.
    pub fn adapter_mut(&mut self) -> Option<&mut CanvasSyncAdapter<Arc<S>>> {
        self.adapter.as_mut()
    }

    /// Append a slide, optionally filled from a template, and go to it.
    pub fn add_slide(&mut self, template: Option<SlideTemplate>) -> StoreResult<String> {
        let order = self.slides.iter().map(|s| s.order).max().map_or(0, |o| o + 1);
        let slide = Slide {
            id: Uuid::new_v4().to_string(),
            title: format!("Slide {}", self.slides.len() + 1),
            order,
        };
        self.store.ensure_map(&slide_map(&slide.id))?;
        self.store.transact(
            SLIDES_MAP,
            vec![MapOp::Set {
                key: slide.id.clone(),
                bag: slide.to_bag()?,
            }],
        )?;
        let id = slide.id.clone();
        self.slides.push(slide);
        sort_slides(&mut self.slides);
        self.go_to(&id)?;

        if let (Some(template), Some(adapter)) = (template, self.adapter.as_mut()) {
            adapter.add_with(|ids| template.build(ids));
            adapter.scene_mut().clear_history();
            adapter.flush()?;
        }
        log::info!("Added slide {} ({:?})", id, template.map(SlideTemplate::name));
        Ok(id)
    }

    /// Delete a slide and its drawables. The last remaining slide is kept.
    pub fn remove_slide(&mut self, slide_id: &str) -> StoreResult<bool> {
        let Some(index) = self.slides.iter().position(|s| s.id == slide_id) else {
            return Ok(false);
        };
        if self.slides.len() == 1 {
            return Ok(false);
        }
        if self.current == slide_id {
            let neighbor = if index + 1 < self.slides.len() { index + 1 } else { index - 1 };
            let next = self.slides[neighbor].id.clone();
            self.go_to(&next)?;
        }
        self.store.transact(
            SLIDES_MAP,
            vec![MapOp::Delete {
                key: slide_id.to_string(),
            }],
        )?;
        let objects = slide_map(slide_id);
        if self.store.read(&objects)?.is_some() {
            self.store.transact(&objects, vec![MapOp::Clear])?;
        }
        self.slides.retain(|s| s.id != slide_id);
        Ok(true)
    }

    /// Move everyone to a slide.
    pub fn go_to(&mut self, slide_id: &str) -> StoreResult<()> {
        if !self.slides.iter().any(|s| s.id == slide_id) {
            return Err(StoreError::Other(format!("unknown slide: {slide_id}")));
        }
        let mut bag = AttributeBag::new();
        bag.insert("slide".into(), Value::from(slide_id));
        self.store.transact(
            DECK_MAP,
            vec![MapOp::Set {
                key: CURRENT_KEY.to_string(),
                bag,
            }],
        )?;
        self.switch_to(slide_id)
    }

    /// Follow remote slide list and slide switches, then poll the canvas.
    pub fn poll(&mut self) -> StoreResult<()> {
        if let Some(snapshot) = self.slides_sub.try_latest() {
            let slides = read_slides(Some(&snapshot));
            if !slides.is_empty() {
                self.slides = slides;
            }
        }
        let remote_current = self
            .deck_sub
            .try_latest()
            .and_then(|snapshot| read_current(Some(&snapshot)));
        if let Some(id) = remote_current {
            if id != self.current && self.slides.iter().any(|s| s.id == id) {
                log::info!("Following remote switch to slide {}", id);
                self.switch_to(&id)?;
            }
        }
        if !self.slides.iter().any(|s| s.id == self.current) {
            if let Some(first) = self.slides.first().map(|s| s.id.clone()) {
                self.switch_to(&first)?;
            }
        }
        match self.adapter.as_mut() {
            Some(adapter) => adapter.poll(),
            None => Ok(()),
        }
    }

    /// Insert a bold slide title on the current slide.
    pub fn add_title(&mut self, options: &ToolOptions) -> Option<DrawableId> {
        let color = options.color;
        let adapter = self.adapter.as_mut()?;
        let ids = adapter.add_with(|ids| {
            let mut title = TextBox::new(
                ids.next(DrawableKind::Text),
                Point::new(100.0, 50.0),
                "Slide Title",
                TEXT_SIZE * 2.0,
            )
            .bold();
            title.style = ShapeStyle::default().with_fill(color);
            vec![Drawable::Text(title)]
        });
        ids.into_iter().next()
    }

    /// Insert a three-point bullet list on the current slide.
    pub fn add_bullets(&mut self, options: &ToolOptions) -> Option<DrawableId> {
        let color = options.color;
        let adapter = self.adapter.as_mut()?;
        let ids = adapter.add_with(|ids| {
            let mut bullets = TextBox::new(
                ids.next(DrawableKind::Text),
                Point::new(100.0, 200.0),
                BULLETS_TEXT,
                TEXT_SIZE,
            )
            .with_line_height(1.5);
            bullets.style = ShapeStyle::default().with_fill(color);
            vec![Drawable::Text(bullets)]
        });
        ids.into_iter().next()
    }

    fn switch_to(&mut self, slide_id: &str) -> StoreResult<()> {
        if let Some(previous) = self.adapter.take() {
            self.ids = previous.ids().clone();
            if self.slides.iter().any(|s| s.id == self.current) {
                previous.unmount();
            } else {
                // Publishing would recreate entries in the removed slide's map.
                log::info!("Slide {} was removed, dropping its unpublished edits", self.current);
                drop(previous);
            }
        }
        let config = SyncConfig {
            map_name: slide_map(slide_id),
            ..self.config.clone()
        };
        let adapter = CanvasSyncAdapter::mount_with_ids(self.store.clone(), config, self.ids.clone())?;
        self.adapter = Some(adapter);
        self.current = slide_id.to_string();
        Ok(())
    }
}

fn read_slides(snapshot: Option<&Snapshot>) -> Vec<Slide> {
    let mut slides: Vec<Slide> = snapshot
        .map(|s| {
            s.entries
                .iter()
                .filter_map(|(id, bag)| Slide::from_bag(id, bag))
                .collect()
        })
        .unwrap_or_default();
    sort_slides(&mut slides);
    slides
}

fn sort_slides(slides: &mut [Slide]) {
    slides.sort_by(|a, b| a.order.cmp(&b.order).then_with(|| a.id.cmp(&b.id)));
}

fn read_current(snapshot: Option<&Snapshot>) -> Option<String> {
    snapshot?
        .entries
        .get(CURRENT_KEY)?
        .get("slide")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::FontWeight;
    use crate::store::{MemoryConnection, MemoryRoom};

    fn open(room: &MemoryRoom) -> SlideDeck<MemoryConnection> {
        let conn = Arc::new(room.connect().expect("connect"));
        let config = SyncConfig {
            id_namespace: Some(String::new()),
            presence_throttle_ms: 0,
            ..SyncConfig::default()
        };
        SlideDeck::open(conn, config).expect("open")
    }

    #[test]
    fn test_open_creates_first_slide() {
        let room = MemoryRoom::new();
        let deck = open(&room);
        assert_eq!(deck.slides().len(), 1);
        assert_eq!(deck.current_slide().map(|s| s.id.as_str()), Some(FIRST_SLIDE_ID));
        assert_eq!(
            deck.adapter().map(|a| a.config().map_name.clone()),
            Some(slide_map(FIRST_SLIDE_ID))
        );
        assert!(room.snapshot(&slide_map(FIRST_SLIDE_ID)).is_some());
    }

    #[test]
    fn test_add_slide_from_template() {
        let room = MemoryRoom::new();
        let mut deck = open(&room);
        let id = deck.add_slide(Some(SlideTemplate::ImageCaption)).expect("add");

        assert_eq!(deck.slides().len(), 2);
        assert_eq!(deck.slides()[1].id, id);
        assert_eq!(deck.current_slide().map(|s| s.id.clone()), Some(id.clone()));
        let objects = room.snapshot(&slide_map(&id)).expect("slide map");
        assert_eq!(objects.len(), 2);
        let kinds: Vec<&str> = objects
            .entries
            .values()
            .filter_map(|bag| bag.get("type").and_then(Value::as_str))
            .collect();
        assert!(kinds.contains(&"rectangle"));
        assert!(kinds.contains(&"text"));
    }

    #[test]
    fn test_title_template() {
        let mut ids = IdGenerator::new("");
        let drawables = SlideTemplate::TitleSlide.build(&mut ids);
        assert_eq!(drawables.len(), 1);
        let text = drawables[0].as_text().expect("text");
        assert_eq!(text.text, "Title");
        assert_eq!(text.font_size, 48.0);
        assert_eq!(text.font_weight, FontWeight::Bold);
        assert_eq!(text.width, Some(400.0));
        assert_eq!(text.placement.position(), Point::new(400.0, 100.0));
    }

    #[test]
    fn test_peer_follows_slide_switch() {
        let room = MemoryRoom::new();
        let mut a = open(&room);
        let mut b = open(&room);
        let id = a.add_slide(None).expect("add");

        b.poll().expect("poll");
        assert_eq!(b.slides().len(), 2);
        assert_eq!(b.current_slide().map(|s| s.id.clone()), Some(id.clone()));

        a.go_to(FIRST_SLIDE_ID).expect("go to");
        b.poll().expect("poll");
        assert_eq!(b.current_slide().map(|s| s.id.as_str()), Some(FIRST_SLIDE_ID));
    }

    #[test]
    fn test_drawables_stay_on_their_slide() {
        let room = MemoryRoom::new();
        let mut deck = open(&room);
        let options = ToolOptions::default();
        deck.add_title(&options).expect("title");
        deck.adapter_mut().expect("adapter").flush().expect("flush");

        let second = deck.add_slide(None).expect("add");
        assert!(deck.adapter().expect("adapter").scene().is_empty());
        let bullets = deck.add_bullets(&options).expect("bullets");
        deck.adapter_mut().expect("adapter").flush().expect("flush");

        // Ids keep counting across slides.
        assert_eq!(bullets.as_str(), "t2");
        assert_eq!(room.snapshot(&slide_map(FIRST_SLIDE_ID)).expect("map").len(), 1);
        assert_eq!(room.snapshot(&slide_map(&second)).expect("map").len(), 1);
    }

    #[test]
    fn test_remove_slide() {
        let room = MemoryRoom::new();
        let mut deck = open(&room);
        assert!(!deck.remove_slide(FIRST_SLIDE_ID).expect("remove only slide"));

        let second = deck.add_slide(Some(SlideTemplate::Bullets)).expect("add");
        assert!(deck.remove_slide(&second).expect("remove"));
        assert_eq!(deck.slides().len(), 1);
        assert_eq!(deck.current_slide().map(|s| s.id.as_str()), Some(FIRST_SLIDE_ID));
        assert!(room.snapshot(&slide_map(&second)).expect("map").is_empty());
        assert!(!deck.remove_slide("missing").expect("remove unknown"));
    }

    #[test]
    fn test_remote_removal_discards_pending_edits() {
        let room = MemoryRoom::new();
        let mut a = open(&room);
        let mut b = open(&room);
        let second = a.add_slide(None).expect("add");
        b.poll().expect("follow");
        assert_eq!(b.current_slide().map(|s| s.id.clone()), Some(second.clone()));

        b.adapter_mut()
            .expect("canvas")
            .add_drawable(DrawableKind::Circle, Point::ZERO, ShapeStyle::default());
        assert!(a.remove_slide(&second).expect("remove"));
        b.poll().expect("poll");

        assert_eq!(b.current_slide().map(|s| s.id.as_str()), Some(FIRST_SLIDE_ID));
        assert!(room.snapshot(&slide_map(&second)).expect("map").is_empty());
        assert!(room.snapshot(&slide_map(FIRST_SLIDE_ID)).expect("map").is_empty());
    }

    #[test]
    fn test_go_to_unknown_slide_fails() {
        let room = MemoryRoom::new();
        let mut deck = open(&room);
        assert!(deck.go_to("nope").is_err());
    }
}
