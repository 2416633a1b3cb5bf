//! Local scene graph: drawables, z-order, selection and undo history.

use crate::ids::{DrawableId, IdGenerator};
use crate::shapes::{Drawable, ShapeStyle};
use kurbo::{Point, Rect};
use std::collections::{HashMap, HashSet};
use std::fmt;

/// Maximum number of undo states to keep.
const MAX_UNDO_HISTORY: usize = 50;

/// Offset applied to duplicated drawables.
pub const DUPLICATE_OFFSET: f64 = 20.0;

/// A local mutation of the scene.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SceneEvent {
    Added(DrawableId),
    Modified(DrawableId),
    Removed(DrawableId),
    Cleared,
}

/// Receives local scene mutations as they happen.
///
/// Remote rebuilds through [`Scene::replace_all`] are not reported.
pub trait SceneObserver {
    fn on_scene_event(&mut self, event: &SceneEvent);
}

/// Handle returned by [`Scene::add_observer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObserverId(u64);

#[derive(Debug, Clone)]
struct SceneSnapshot {
    drawables: HashMap<DrawableId, Drawable>,
    z_order: Vec<DrawableId>,
}

/// An ordered collection of drawables.
pub struct Scene {
    drawables: HashMap<DrawableId, Drawable>,
    /// Z-order of drawables (back to front).
    z_order: Vec<DrawableId>,
    selection: Vec<DrawableId>,
    events: Vec<SceneEvent>,
    observers: Vec<(ObserverId, Box<dyn SceneObserver>)>,
    next_observer: u64,
    undo_stack: Vec<SceneSnapshot>,
    redo_stack: Vec<SceneSnapshot>,
}

impl Default for Scene {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Scene {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scene")
            .field("z_order", &self.z_order)
            .field("selection", &self.selection)
            .field("pending_events", &self.events.len())
            .field("observers", &self.observers.len())
            .finish()
    }
}

impl Scene {
    pub fn new() -> Self {
        Self {
            drawables: HashMap::new(),
            z_order: Vec::new(),
            selection: Vec::new(),
            events: Vec::new(),
            observers: Vec::new(),
            next_observer: 0,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
        }
    }

    // --- observation ---

    pub fn add_observer(&mut self, observer: Box<dyn SceneObserver>) -> ObserverId {
        self.next_observer += 1;
        let id = ObserverId(self.next_observer);
        self.observers.push((id, observer));
        id
    }

    pub fn remove_observer(&mut self, id: ObserverId) -> bool {
        let before = self.observers.len();
        self.observers.retain(|(oid, _)| *oid != id);
        self.observers.len() != before
    }

    /// Take all mutation events recorded since the last drain.
    pub fn drain_events(&mut self) -> Vec<SceneEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn has_pending_events(&self) -> bool {
        !self.events.is_empty()
    }

    fn emit(&mut self, event: SceneEvent) {
        for (_, observer) in &mut self.observers {
            observer.on_scene_event(&event);
        }
        self.events.push(event);
    }

    // --- queries ---

    pub fn get(&self, id: &DrawableId) -> Option<&Drawable> {
        self.drawables.get(id)
    }

    pub fn contains(&self, id: &DrawableId) -> bool {
        self.drawables.contains_key(id)
    }

    /// Drawables in z-order (back to front).
    pub fn ordered(&self) -> impl Iterator<Item = &Drawable> {
        self.z_order.iter().filter_map(|id| self.drawables.get(id))
    }

    pub fn z_order(&self) -> &[DrawableId] {
        &self.z_order
    }

    pub fn len(&self) -> usize {
        self.drawables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.drawables.is_empty()
    }

    /// All drawables whose parent chain leads to `id`, excluding `id` itself.
    pub fn descendants(&self, id: &DrawableId) -> Vec<DrawableId> {
        let mut found = Vec::new();
        let mut seen: HashSet<&DrawableId> = HashSet::from([id]);
        let mut frontier = vec![id];
        while let Some(parent) = frontier.pop() {
            for child_id in &self.z_order {
                let Some(child) = self.drawables.get(child_id) else {
                    continue;
                };
                if child.parent() == Some(parent) && seen.insert(child_id) {
                    found.push(child_id.clone());
                    frontier.push(child_id);
                }
            }
        }
        found
    }

    /// Outermost group containing `id`, or `id` itself.
    pub fn top_ancestor(&self, id: &DrawableId) -> DrawableId {
        let mut current = id;
        let mut seen = HashSet::from([id]);
        while let Some(parent) = self.drawables.get(current).and_then(Drawable::parent) {
            if !self.drawables.contains_key(parent) || !seen.insert(parent) {
                break;
            }
            current = parent;
        }
        current.clone()
    }

    /// Bounds of a drawable; groups span their members.
    pub fn bounds_of(&self, id: &DrawableId) -> Option<Rect> {
        let drawable = self.drawables.get(id)?;
        if !drawable.is_group() {
            return Some(drawable.bounds());
        }
        self.descendants(id)
            .iter()
            .filter_map(|child| self.drawables.get(child))
            .filter(|child| !child.is_group())
            .map(Drawable::bounds)
            .reduce(|a, b| a.union(b))
            .or_else(|| Some(drawable.bounds()))
    }

    /// Drawables hit at a point, front to back.
    pub fn drawables_at_point(&self, point: Point, tolerance: f64) -> Vec<DrawableId> {
        self.z_order
            .iter()
            .rev()
            .filter(|id| {
                self.drawables
                    .get(*id)
                    .is_some_and(|d| d.hit_test(point, tolerance))
            })
            .cloned()
            .collect()
    }

    // --- mutation ---

    /// Insert a drawable on top, or replace the one with the same id in place.
    pub fn insert(&mut self, drawable: Drawable) {
        let id = drawable.id().clone();
        let existed = self.drawables.insert(id.clone(), drawable).is_some();
        if existed {
            self.emit(SceneEvent::Modified(id));
        } else {
            self.z_order.push(id.clone());
            self.emit(SceneEvent::Added(id));
        }
    }

    /// Mutate a drawable in place. Returns false if it does not exist.
    pub fn update<F: FnOnce(&mut Drawable)>(&mut self, id: &DrawableId, f: F) -> bool {
        let Some(drawable) = self.drawables.get_mut(id) else {
            return false;
        };
        f(drawable);
        // Keep the id authoritative even if the closure replaced the value.
        drawable.set_id(id.clone());
        self.emit(SceneEvent::Modified(id.clone()));
        true
    }

    /// Move a drawable and, for groups, all of its members.
    pub fn translate(&mut self, id: &DrawableId, dx: f64, dy: f64) -> bool {
        if !self.contains(id) {
            return false;
        }
        let mut targets = vec![id.clone()];
        targets.extend(self.descendants(id));
        for target in targets {
            self.update(&target, |d| d.translate(dx, dy));
        }
        true
    }

    pub fn restyle(&mut self, id: &DrawableId, style: ShapeStyle) -> bool {
        self.update(id, |d| *d.style_mut() = style)
    }

    /// Remove a drawable and every descendant. Returns what was removed.
    pub fn remove(&mut self, id: &DrawableId) -> Vec<Drawable> {
        if !self.contains(id) {
            return Vec::new();
        }
        let mut targets = vec![id.clone()];
        targets.extend(self.descendants(id));

        let mut removed = Vec::with_capacity(targets.len());
        for target in targets {
            if let Some(drawable) = self.drawables.remove(&target) {
                self.z_order.retain(|z| *z != target);
                self.selection.retain(|s| *s != target);
                removed.push(drawable);
                self.emit(SceneEvent::Removed(target));
            }
        }
        removed
    }

    /// Remove every drawable.
    pub fn clear(&mut self) {
        if self.drawables.is_empty() {
            return;
        }
        self.push_undo();
        self.drawables.clear();
        self.z_order.clear();
        self.selection.clear();
        self.emit(SceneEvent::Cleared);
    }

    /// Bring a drawable to the front (topmost).
    pub fn bring_to_front(&mut self, id: &DrawableId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.z_order.retain(|z| z != id);
        self.z_order.push(id.clone());
        self.emit(SceneEvent::Modified(id.clone()));
        true
    }

    /// Send a drawable to the back (bottommost).
    pub fn send_to_back(&mut self, id: &DrawableId) -> bool {
        if !self.contains(id) {
            return false;
        }
        self.z_order.retain(|z| z != id);
        self.z_order.insert(0, id.clone());
        self.emit(SceneEvent::Modified(id.clone()));
        true
    }

    /// Rebuild from remote state without emitting events.
    ///
    /// The selection keeps only ids that still exist. Returns whether anything changed.
    pub fn replace_all(&mut self, drawables: Vec<Drawable>) -> bool {
        let z_order: Vec<DrawableId> = drawables.iter().map(|d| d.id().clone()).collect();
        let drawables: HashMap<DrawableId, Drawable> = drawables
            .into_iter()
            .map(|d| (d.id().clone(), d))
            .collect();
        let changed = z_order != self.z_order || drawables != self.drawables;
        self.drawables = drawables;
        self.z_order = z_order;
        let drawables = &self.drawables;
        self.selection.retain(|id| drawables.contains_key(id));
        changed
    }

    // --- selection ---

    pub fn selection(&self) -> &[DrawableId] {
        &self.selection
    }

    pub fn select(&mut self, id: DrawableId) {
        self.selection.clear();
        self.add_to_selection(id);
    }

    pub fn add_to_selection(&mut self, id: DrawableId) {
        if self.contains(&id) && !self.selection.contains(&id) {
            self.selection.push(id);
        }
    }

    pub fn clear_selection(&mut self) {
        self.selection.clear();
    }

    pub fn is_selected(&self, id: &DrawableId) -> bool {
        self.selection.contains(id)
    }

    /// Select the outermost drawable under a point. Returns it, if any.
    pub fn select_at(&mut self, point: Point, tolerance: f64) -> Option<DrawableId> {
        let hit = self.drawables_at_point(point, tolerance).into_iter().next();
        match hit {
            Some(id) => {
                let top = self.top_ancestor(&id);
                self.select(top.clone());
                Some(top)
            }
            None => {
                self.clear_selection();
                None
            }
        }
    }

    /// Delete the selected drawables and their descendants.
    pub fn remove_active_selection(&mut self) -> Vec<DrawableId> {
        if self.selection.is_empty() {
            return Vec::new();
        }
        self.push_undo();
        let selected = std::mem::take(&mut self.selection);
        selected
            .iter()
            .flat_map(|id| self.remove(id))
            .map(|d| d.id().clone())
            .collect()
    }

    /// Copy the selection, members included, offset by [`DUPLICATE_OFFSET`].
    ///
    /// Copies get fresh ids and become the new selection.
    pub fn duplicate_selected(&mut self, ids: &mut IdGenerator) -> Vec<DrawableId> {
        if self.selection.is_empty() {
            return Vec::new();
        }
        self.push_undo();

        let mut sources: Vec<DrawableId> = Vec::new();
        for id in &self.selection {
            for candidate in std::iter::once(id.clone()).chain(self.descendants(id)) {
                if !sources.contains(&candidate) {
                    sources.push(candidate);
                }
            }
        }
        // Keep relative stacking order of the copies.
        sources.sort_by_key(|id| self.z_order.iter().position(|z| z == id));

        let remap: HashMap<DrawableId, DrawableId> = sources
            .iter()
            .filter_map(|id| self.drawables.get(id).map(|d| (id.clone(), ids.next(d.kind()))))
            .collect();

        let selected = self.selection.clone();
        let mut new_selection = Vec::new();
        for source in &sources {
            let (Some(original), Some(new_id)) = (self.drawables.get(source), remap.get(source))
            else {
                continue;
            };
            let mut copy = original.clone();
            copy.set_id(new_id.clone());
            // Members follow their copied group; others stay in their original group.
            if let Some(parent) = copy.parent().and_then(|p| remap.get(p)).cloned() {
                copy.set_parent(Some(parent));
            }
            copy.translate(DUPLICATE_OFFSET, DUPLICATE_OFFSET);
            if selected.contains(source) {
                new_selection.push(new_id.clone());
            }
            self.insert(copy);
        }
        self.selection = new_selection.clone();
        new_selection
    }

    // --- history ---

    fn snapshot(&self) -> SceneSnapshot {
        SceneSnapshot {
            drawables: self.drawables.clone(),
            z_order: self.z_order.clone(),
        }
    }

    /// Push current state to the undo stack (call before making changes).
    pub fn push_undo(&mut self) {
        self.undo_stack.push(self.snapshot());
        self.redo_stack.clear();
        if self.undo_stack.len() > MAX_UNDO_HISTORY {
            self.undo_stack.remove(0);
        }
    }

    /// Undo the last change. Returns false if there is nothing to undo.
    pub fn undo(&mut self) -> bool {
        let Some(snapshot) = self.undo_stack.pop() else {
            return false;
        };
        self.redo_stack.push(self.snapshot());
        self.restore(snapshot);
        true
    }

    /// Redo the last undone change. Returns false if there is nothing to redo.
    pub fn redo(&mut self) -> bool {
        let Some(snapshot) = self.redo_stack.pop() else {
            return false;
        };
        self.undo_stack.push(self.snapshot());
        self.restore(snapshot);
        true
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Forget undo and redo state.
    pub fn clear_history(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    /// Swap in a snapshot and report the difference as events.
    fn restore(&mut self, snapshot: SceneSnapshot) {
        let previous = std::mem::replace(&mut self.drawables, snapshot.drawables);
        let previous_order = std::mem::replace(&mut self.z_order, snapshot.z_order);
        let drawables = &self.drawables;
        self.selection.retain(|id| drawables.contains_key(id));

        for id in &previous_order {
            if !self.drawables.contains_key(id) {
                self.emit(SceneEvent::Removed(id.clone()));
            }
        }
        let current_order = self.z_order.clone();
        for (index, id) in current_order.iter().enumerate() {
            match previous.get(id) {
                None => self.emit(SceneEvent::Added(id.clone())),
                Some(old) => {
                    let moved = previous_order.iter().position(|p| p == id) != Some(index);
                    if moved || self.drawables.get(id) != Some(old) {
                        self.emit(SceneEvent::Modified(id.clone()));
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shapes::{DrawableKind, Group, Rectangle, SerializableColor, TextBox};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn rect(id: &str, x: f64, y: f64) -> Drawable {
        Drawable::Rectangle(Rectangle::new(DrawableId::new(id), Point::new(x, y), 100.0, 100.0))
    }

    fn child_of(mut drawable: Drawable, parent: &str) -> Drawable {
        drawable.set_parent(Some(DrawableId::new(parent)));
        drawable
    }

    fn sticky_scene() -> Scene {
        let mut scene = Scene::new();
        scene.insert(Drawable::Group(Group::new(DrawableId::new("g1"), Point::ZERO)));
        scene.insert(child_of(rect("r2", 0.0, 0.0), "g1"));
        scene.insert(child_of(
            Drawable::Text(TextBox::new(DrawableId::new("t3"), Point::new(10.0, 10.0), "Note", 16.0)),
            "g1",
        ));
        scene.insert(rect("r4", 300.0, 300.0));
        scene.drain_events();
        scene
    }

    #[test]
    fn test_insert_and_order() {
        let mut scene = Scene::new();
        scene.insert(rect("r1", 0.0, 0.0));
        scene.insert(rect("r2", 50.0, 50.0));
        assert_eq!(scene.z_order(), &[DrawableId::new("r1"), DrawableId::new("r2")]);
        assert_eq!(
            scene.drain_events(),
            vec![
                SceneEvent::Added(DrawableId::new("r1")),
                SceneEvent::Added(DrawableId::new("r2"))
            ]
        );
        assert!(!scene.has_pending_events());

        scene.insert(rect("r1", 5.0, 5.0));
        assert_eq!(scene.len(), 2);
        assert_eq!(scene.drain_events(), vec![SceneEvent::Modified(DrawableId::new("r1"))]);
    }

    #[test]
    fn test_z_order_moves() {
        let mut scene = Scene::new();
        scene.insert(rect("r1", 0.0, 0.0));
        scene.insert(rect("r2", 50.0, 50.0));

        assert!(scene.bring_to_front(&DrawableId::new("r1")));
        assert_eq!(scene.z_order(), &[DrawableId::new("r2"), DrawableId::new("r1")]);
        assert!(scene.send_to_back(&DrawableId::new("r1")));
        assert_eq!(scene.z_order(), &[DrawableId::new("r1"), DrawableId::new("r2")]);
        assert!(!scene.bring_to_front(&DrawableId::new("missing")));
    }

    #[test]
    fn test_drawables_at_point_front_first() {
        let mut scene = Scene::new();
        let mut a = rect("r1", 0.0, 0.0);
        let mut b = rect("r2", 50.0, 50.0);
        a.style_mut().fill = Some(SerializableColor::white());
        b.style_mut().fill = Some(SerializableColor::white());
        scene.insert(a);
        scene.insert(b);

        let hits = scene.drawables_at_point(Point::new(75.0, 75.0), 0.0);
        assert_eq!(hits, vec![DrawableId::new("r2"), DrawableId::new("r1")]);
    }

    #[test]
    fn test_translate_cascades_to_members() {
        let mut scene = sticky_scene();
        scene.translate(&DrawableId::new("g1"), 5.0, 7.0);
        let text = scene.get(&DrawableId::new("t3")).map(Drawable::position);
        assert_eq!(text, Some(Point::new(15.0, 17.0)));
        let other = scene.get(&DrawableId::new("r4")).map(Drawable::position);
        assert_eq!(other, Some(Point::new(300.0, 300.0)));
        assert_eq!(scene.drain_events().len(), 3);
    }

    #[test]
    fn test_group_bounds_span_members() {
        let scene = sticky_scene();
        let bounds = scene.bounds_of(&DrawableId::new("g1")).expect("group bounds");
        assert_eq!(bounds.origin(), Point::ZERO);
        assert!((bounds.width() - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_remove_active_selection_cascades() {
        let mut scene = sticky_scene();
        scene.select(DrawableId::new("g1"));

        let removed = scene.remove_active_selection();
        assert_eq!(removed.len(), 3);
        assert_eq!(scene.z_order(), &[DrawableId::new("r4")]);
        assert!(scene.selection().is_empty());
        assert_eq!(scene.drain_events().len(), 3);
        assert!(scene.remove_active_selection().is_empty());
    }

    #[test]
    fn test_select_at_picks_group() {
        let mut scene = sticky_scene();
        let picked = scene.select_at(Point::new(12.0, 12.0), 1.0);
        assert_eq!(picked, Some(DrawableId::new("g1")));
        assert_eq!(scene.select_at(Point::new(900.0, 900.0), 1.0), None);
        assert!(scene.selection().is_empty());
    }

    #[test]
    fn test_duplicate_selected_remaps_group() {
        let mut scene = sticky_scene();
        let mut ids = IdGenerator::new("");
        for id in scene.z_order().to_vec() {
            ids.observe(&id);
        }
        scene.select(DrawableId::new("g1"));

        let copies = scene.duplicate_selected(&mut ids);
        assert_eq!(copies, vec![DrawableId::new("g5")]);
        assert_eq!(scene.len(), 7);
        assert_eq!(scene.selection(), &[DrawableId::new("g5")]);

        let members = scene.descendants(&DrawableId::new("g5"));
        assert_eq!(members.len(), 2);
        let text = members
            .iter()
            .filter_map(|id| scene.get(id))
            .find(|d| d.kind() == DrawableKind::Text)
            .map(Drawable::position);
        assert_eq!(text, Some(Point::new(30.0, 30.0)));
    }

    #[test]
    fn test_replace_all_is_silent() {
        let mut scene = Scene::new();
        scene.insert(rect("r1", 0.0, 0.0));
        scene.select(DrawableId::new("r1"));
        scene.drain_events();

        assert!(scene.replace_all(vec![rect("r1", 0.0, 0.0), rect("r2", 1.0, 1.0)]));
        assert!(!scene.has_pending_events());
        assert_eq!(scene.selection(), &[DrawableId::new("r1")]);
        assert!(!scene.replace_all(vec![rect("r1", 0.0, 0.0), rect("r2", 1.0, 1.0)]));

        scene.replace_all(vec![rect("r2", 1.0, 1.0)]);
        assert!(scene.selection().is_empty());
    }

    #[test]
    fn test_observer_sees_local_events_only() {
        struct Recorder(Rc<RefCell<Vec<SceneEvent>>>);
        impl SceneObserver for Recorder {
            fn on_scene_event(&mut self, event: &SceneEvent) {
                self.0.borrow_mut().push(event.clone());
            }
        }

        let seen = Rc::new(RefCell::new(Vec::new()));
        let mut scene = Scene::new();
        let observer = scene.add_observer(Box::new(Recorder(seen.clone())));
        scene.insert(rect("r1", 0.0, 0.0));
        scene.replace_all(vec![rect("r9", 0.0, 0.0)]);
        scene.clear();
        assert_eq!(
            *seen.borrow(),
            vec![SceneEvent::Added(DrawableId::new("r1")), SceneEvent::Cleared]
        );

        assert!(scene.remove_observer(observer));
        scene.insert(rect("r2", 0.0, 0.0));
        assert_eq!(seen.borrow().len(), 2);
    }

    #[test]
    fn test_undo_redo_reports_changes() {
        let mut scene = Scene::new();
        scene.push_undo();
        scene.insert(rect("r1", 0.0, 0.0));
        scene.drain_events();

        assert!(scene.undo());
        assert!(scene.is_empty());
        assert_eq!(scene.drain_events(), vec![SceneEvent::Removed(DrawableId::new("r1"))]);
        assert!(scene.redo());
        assert_eq!(scene.drain_events(), vec![SceneEvent::Added(DrawableId::new("r1"))]);
        assert!(!scene.redo());
    }

    #[test]
    fn test_clear_is_undoable() {
        let mut scene = sticky_scene();
        scene.clear();
        assert!(scene.is_empty());
        assert_eq!(scene.drain_events(), vec![SceneEvent::Cleared]);
        assert!(scene.undo());
        assert_eq!(scene.len(), 4);
    }

    #[test]
    fn test_undo_history_is_bounded() {
        let mut scene = Scene::new();
        for i in 0..(MAX_UNDO_HISTORY + 10) {
            scene.push_undo();
            scene.insert(rect(&format!("r{i}"), 0.0, 0.0));
        }
        let mut undone = 0;
        while scene.undo() {
            undone += 1;
        }
        assert_eq!(undone, MAX_UNDO_HISTORY);
        assert_eq!(scene.len(), 10);
    }
}
