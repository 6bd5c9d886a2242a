//! The game object tree.
//!
//! One concrete [`GameObject`] carries the fields every entity shares;
//! an [`ObjectKind`] embeds the per-class data. Objects live in a central
//! [`World`] registry keyed by a monotonic 64-bit id that is never reused,
//! so a weak [`ObjectHandle`](crate::value::ObjectHandle) either resolves
//! to the object it was bound to or to nothing. Ownership runs strictly
//! parent → child; destroying an object destroys its subtree.

pub mod actor;
pub mod game;
pub mod item;
pub mod scene;
pub mod sprite;
pub mod window;

use std::collections::BTreeMap;

use tracing::warn;

use crate::host::HostServices;
use crate::scriptable::{MethodOutcome, PropertyBag, Scriptable};
use crate::value::{ObjectHandle, SharedStr, Value};

pub use actor::{ActorData, Direction, TalkState, WalkState};
pub use game::GameData;
pub use item::ItemData;
pub use scene::{LayerData, Region, ScaleLevel, SceneData, WaypointGroup};
pub use sprite::{SpriteData, SpriteFrame};
pub use window::{ButtonData, WindowData};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub fn contains(&self, point: Point) -> bool {
        point.x >= self.x
            && point.y >= self.y
            && point.x < self.x + self.width
            && point.y < self.y + self.height
    }
}

/// Per-class specialisation data.
#[derive(Clone, Debug, PartialEq)]
pub enum ObjectKind {
    Game(GameData),
    Scene(SceneData),
    Layer(LayerData),
    Entity(EntityData),
    Actor(ActorData),
    Item(ItemData),
    Window(WindowData),
    Button(ButtonData),
    Sprite(SpriteData),
}

impl ObjectKind {
    pub fn tag(&self) -> &'static str {
        match self {
            ObjectKind::Game(_) => "game",
            ObjectKind::Scene(_) => "scene",
            ObjectKind::Layer(_) => "layer",
            ObjectKind::Entity(_) => "entity",
            ObjectKind::Actor(_) => "actor",
            ObjectKind::Item(_) => "item",
            ObjectKind::Window(_) => "window",
            ObjectKind::Button(_) => "button",
            ObjectKind::Sprite(_) => "sprite",
        }
    }
}

/// A plain interactive scene prop: a sprite plus a hotspot.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct EntityData {
    pub sprite: Option<u64>,
    pub interactive: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct GameObject {
    pub id: u64,
    pub name: Option<SharedStr>,
    pub visible: bool,
    pub active: bool,
    pub priority: i32,
    pub x: i32,
    pub y: i32,
    pub bbox: Rect,
    /// False while a blocking operation (walk, talk, animation) runs;
    /// scripts waiting on this object resume when it flips back.
    pub ready: bool,
    pub parent: Option<u64>,
    pub children: Vec<u64>,
    pub props: PropertyBag,
    pub kind: ObjectKind,
}

impl GameObject {
    pub(crate) fn new(id: u64, kind: ObjectKind) -> Self {
        Self {
            id,
            name: None,
            visible: true,
            active: true,
            priority: 0,
            x: 0,
            y: 0,
            bbox: Rect::default(),
            ready: true,
            parent: None,
            children: Vec::new(),
            props: PropertyBag::new(),
            kind,
        }
    }

    pub fn handle(&self) -> ObjectHandle {
        ObjectHandle::new(self.id)
    }

    pub fn name_matches(&self, name: &str) -> bool {
        self.name
            .as_deref()
            .is_some_and(|own| own.eq_ignore_ascii_case(name))
    }
}

impl Scriptable for GameObject {
    fn get(&self, name: &str) -> Option<Value> {
        match name.to_ascii_lowercase().as_str() {
            "id" => Some(Value::Int(self.id as i32)),
            "name" => Some(
                self.name
                    .as_ref()
                    .map(|name| Value::String(name.clone()))
                    .unwrap_or(Value::Null),
            ),
            "type" => Some(Value::string(self.kind.tag())),
            "visible" => Some(Value::Bool(self.visible)),
            "active" => Some(Value::Bool(self.active)),
            "priority" => Some(Value::Int(self.priority)),
            "x" => Some(Value::Int(self.x)),
            "y" => Some(Value::Int(self.y)),
            "ready" => Some(Value::Bool(self.ready)),
            "parent" => Some(
                self.parent
                    .map(|id| Value::Object(ObjectHandle::new(id)))
                    .unwrap_or(Value::Null),
            ),
            _ => match &self.kind {
                ObjectKind::Game(_) => game::get(self, name),
                ObjectKind::Scene(_) => scene::get(self, name),
                ObjectKind::Layer(_) => scene::get_layer(self, name),
                ObjectKind::Entity(_) => entity_get(self, name),
                ObjectKind::Actor(_) => actor::get(self, name),
                ObjectKind::Item(_) => item::get(self, name),
                ObjectKind::Window(_) => window::get(self, name),
                ObjectKind::Button(_) => window::get_button(self, name),
                ObjectKind::Sprite(_) => sprite::get(self, name),
            }
            .or_else(|| self.props.get(name).cloned()),
        }
    }

    fn set(&mut self, name: &str, value: Value) -> bool {
        match name.to_ascii_lowercase().as_str() {
            "name" => {
                self.name = match value {
                    Value::Null => None,
                    other => Some(SharedStr::from(other.to_display_string())),
                };
                true
            }
            "visible" => {
                self.visible = value.is_truthy();
                true
            }
            "active" => {
                self.active = value.is_truthy();
                true
            }
            "priority" => {
                self.priority = value.as_int();
                true
            }
            "x" => {
                self.x = value.as_int();
                true
            }
            "y" => {
                self.y = value.as_int();
                true
            }
            _ => {
                let handled = match self.kind.tag() {
                    "actor" => actor::set(self, name, &value),
                    "sprite" => sprite::set(self, name, &value),
                    "button" => window::set_button(self, name, &value),
                    "item" => item::set(self, name, &value),
                    _ => false,
                };
                if !handled {
                    // Ad-hoc script fields land in the dynamic bag.
                    self.props.set(name, value);
                }
                true
            }
        }
    }
}

fn entity_get(object: &GameObject, name: &str) -> Option<Value> {
    let ObjectKind::Entity(data) = &object.kind else {
        return None;
    };
    match name.to_ascii_lowercase().as_str() {
        "interactive" => Some(Value::Bool(data.interactive)),
        "sprite" => Some(
            data.sprite
                .map(|id| Value::Object(ObjectHandle::new(id)))
                .unwrap_or(Value::Null),
        ),
        _ => None,
    }
}

/// The central object registry. Ids start at 1 (the game root) and are
/// never reused within a process lifetime.
#[derive(Debug)]
pub struct World {
    objects: BTreeMap<u64, GameObject>,
    next_id: u64,
    root: u64,
}

impl World {
    pub fn new() -> Self {
        let mut objects = BTreeMap::new();
        let mut root = GameObject::new(1, ObjectKind::Game(GameData::default()));
        root.name = Some(SharedStr::from("game"));
        objects.insert(1, root);
        Self {
            objects,
            next_id: 2,
            root: 1,
        }
    }

    pub fn root(&self) -> ObjectHandle {
        ObjectHandle::new(self.root)
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    pub fn get(&self, handle: ObjectHandle) -> Option<&GameObject> {
        self.objects.get(&handle.raw())
    }

    pub fn get_mut(&mut self, handle: ObjectHandle) -> Option<&mut GameObject> {
        self.objects.get_mut(&handle.raw())
    }

    pub fn is_alive(&self, handle: ObjectHandle) -> bool {
        self.objects.contains_key(&handle.raw())
    }

    /// Gone objects count as ready so waiters never hang on them.
    pub fn is_ready(&self, handle: ObjectHandle) -> bool {
        self.get(handle).map(|object| object.ready).unwrap_or(true)
    }

    /// Direct access for the persistence traversal.
    pub(crate) fn persist_parts(&mut self) -> (&mut BTreeMap<u64, GameObject>, &mut u64) {
        (&mut self.objects, &mut self.next_id)
    }

    /// Ids in ascending order; the deterministic iteration order for
    /// updates and persistence.
    pub fn ids(&self) -> impl Iterator<Item = u64> + '_ {
        self.objects.keys().copied()
    }

    pub fn objects(&self) -> impl Iterator<Item = &GameObject> {
        self.objects.values()
    }

    /// Creates an object under `parent` (the game root when `None`).
    pub fn create(
        &mut self,
        kind: ObjectKind,
        name: Option<&str>,
        parent: Option<ObjectHandle>,
    ) -> ObjectHandle {
        let id = self.next_id;
        self.next_id += 1;
        let mut object = GameObject::new(id, kind);
        object.name = name.map(SharedStr::from);
        let parent_id = parent.map(ObjectHandle::raw).unwrap_or(self.root);
        let parent_id = if self.objects.contains_key(&parent_id) {
            parent_id
        } else {
            self.root
        };
        object.parent = Some(parent_id);
        self.objects.insert(id, object);
        if let Some(parent) = self.objects.get_mut(&parent_id) {
            parent.children.push(id);
        }
        ObjectHandle::new(id)
    }

    /// Destroys an object and its subtree. The root game object cannot be
    /// destroyed. Values still holding the handle resolve to gone from
    /// here on.
    pub fn destroy(&mut self, handle: ObjectHandle) -> bool {
        let id = handle.raw();
        if id == self.root || !self.objects.contains_key(&id) {
            return false;
        }
        if let Some(parent_id) = self.objects.get(&id).and_then(|object| object.parent) {
            if let Some(parent) = self.objects.get_mut(&parent_id) {
                parent.children.retain(|&child| child != id);
            }
        }
        let mut pending = vec![id];
        while let Some(current) = pending.pop() {
            if let Some(object) = self.objects.remove(&current) {
                pending.extend(object.children);
            }
        }
        true
    }

    /// Depth-first name lookup under a subtree root.
    pub fn find_by_name(&self, under: ObjectHandle, name: &str) -> Option<ObjectHandle> {
        let start = self.get(under)?;
        let mut pending: Vec<u64> = start.children.clone();
        while let Some(id) = pending.pop() {
            let Some(object) = self.objects.get(&id) else {
                continue;
            };
            if object.name_matches(name) {
                return Some(object.handle());
            }
            pending.extend(object.children.iter().copied());
        }
        None
    }

    /// Advances time-dependent object state: sprite animation, actor
    /// walking and talking. Deterministic: ascending id order.
    pub fn update(&mut self, delta_ms: u64, services: &mut HostServices) {
        let ids: Vec<u64> = self.objects.keys().copied().collect();
        for id in ids {
            let Some(object) = self.objects.get_mut(&id) else {
                continue;
            };
            if !object.active {
                continue;
            }
            match &object.kind {
                ObjectKind::Sprite(_) => sprite::update(object, delta_ms),
                ObjectKind::Actor(_) => actor::update(object, delta_ms, services),
                _ => {}
            }
        }
    }

    /// Protocol read. `None` means the object is gone; the VM turns that
    /// into null plus a warning.
    pub fn get_property(&self, handle: ObjectHandle, name: &str) -> Option<Value> {
        self.get(handle).map(|object| {
            object
                .get(name)
                .unwrap_or(Value::Null)
        })
    }

    /// Protocol write. Returns false when the object is gone.
    pub fn set_property(&mut self, handle: ObjectHandle, name: &str, value: Value) -> bool {
        match self.get_mut(handle) {
            Some(object) => object.set(name, value),
            None => false,
        }
    }

    /// Protocol call. Class methods first, then the shared ones; unknown
    /// names report `NotHandled` so the VM can raise a script error with
    /// source context.
    pub fn call_method(
        &mut self,
        handle: ObjectHandle,
        name: &str,
        args: &[Value],
        services: &mut HostServices,
    ) -> MethodOutcome {
        let Some(tag) = self.get(handle).map(|object| object.kind.tag()) else {
            return MethodOutcome::NotHandled;
        };
        let lowered = name.to_ascii_lowercase();
        let kind_outcome = match tag {
            "game" => game::call(self, handle, &lowered, args, services),
            "scene" => scene::call(self, handle, &lowered, args, services),
            "actor" => actor::call(self, handle, &lowered, args, services),
            "entity" => entity_call(self, handle, &lowered, args, services),
            "item" => item::call(self, handle, &lowered, args),
            "window" => window::call(self, handle, &lowered, args),
            "button" => window::call_button(self, handle, &lowered, args),
            "sprite" => sprite::call(self, handle, &lowered, args),
            _ => MethodOutcome::NotHandled,
        };
        if !matches!(kind_outcome, MethodOutcome::NotHandled) {
            return kind_outcome;
        }
        self.call_common(handle, &lowered, args)
    }

    fn call_common(
        &mut self,
        handle: ObjectHandle,
        name: &str,
        args: &[Value],
    ) -> MethodOutcome {
        match name {
            "setposition" => {
                let (Some(x), Some(y)) = (args.first(), args.get(1)) else {
                    return MethodOutcome::ok();
                };
                let (x, y) = (x.as_int(), y.as_int());
                if let Some(object) = self.get_mut(handle) {
                    object.x = x;
                    object.y = y;
                }
                MethodOutcome::ok()
            }
            "getchildcount" => MethodOutcome::Value(Value::Int(
                self.get(handle)
                    .map(|object| object.children.len() as i32)
                    .unwrap_or(0),
            )),
            "getchild" => {
                let index = args.first().map(Value::as_int).unwrap_or(0);
                let child = self
                    .get(handle)
                    .and_then(|object| object.children.get(index.max(0) as usize))
                    .copied();
                MethodOutcome::Value(
                    child
                        .map(|id| Value::Object(ObjectHandle::new(id)))
                        .unwrap_or(Value::Null),
                )
            }
            "delete" => {
                self.destroy(handle);
                MethodOutcome::ok()
            }
            _ => MethodOutcome::NotHandled,
        }
    }

    /// Script-side constructor dispatch for `new Class(name)`.
    pub fn construct(&mut self, class: &str, args: &[Value]) -> Option<ObjectHandle> {
        let name_arg = args.first().and_then(|value| match value {
            Value::String(text) => Some(text.to_string()),
            _ => None,
        });
        let kind = match class.to_ascii_lowercase().as_str() {
            "entity" => ObjectKind::Entity(EntityData::default()),
            "actor" => ObjectKind::Actor(ActorData::default()),
            "item" => ObjectKind::Item(ItemData::default()),
            "window" => ObjectKind::Window(WindowData::default()),
            "button" => ObjectKind::Button(ButtonData::default()),
            "sprite" => ObjectKind::Sprite(SpriteData::default()),
            other => {
                warn!(class = other, "unknown object class in constructor");
                return None;
            }
        };
        Some(self.create(kind, name_arg.as_deref(), None))
    }
}

impl Default for World {
    fn default() -> Self {
        Self::new()
    }
}

fn entity_call(
    world: &mut World,
    handle: ObjectHandle,
    name: &str,
    args: &[Value],
    services: &mut HostServices,
) -> MethodOutcome {
    match name {
        "setsprite" => {
            let Some(Value::String(path)) = args.first() else {
                return MethodOutcome::Value(Value::Bool(false));
            };
            let sprite = sprite::load_for(world, handle, path, services);
            if let (Some(sprite_id), Some(object)) = (sprite, world.get_mut(handle)) {
                if let ObjectKind::Entity(data) = &mut object.kind {
                    data.sprite = Some(sprite_id);
                }
                return MethodOutcome::Value(Value::Bool(true));
            }
            MethodOutcome::Value(Value::Bool(false))
        }
        "setinteractive" => {
            let interactive = args.first().map(Value::is_truthy).unwrap_or(true);
            if let Some(object) = world.get_mut(handle) {
                if let ObjectKind::Entity(data) = &mut object.kind {
                    data.interactive = interactive;
                }
            }
            MethodOutcome::ok()
        }
        _ => MethodOutcome::NotHandled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_and_never_reused() {
        let mut world = World::new();
        let first = world.create(ObjectKind::Entity(EntityData::default()), Some("a"), None);
        let second = world.create(ObjectKind::Entity(EntityData::default()), Some("b"), None);
        assert!(second.raw() > first.raw());

        world.destroy(first);
        let third = world.create(ObjectKind::Entity(EntityData::default()), Some("c"), None);
        assert!(third.raw() > second.raw(), "destroyed ids must not recycle");
        assert!(!world.is_alive(first));
    }

    #[test]
    fn destroy_removes_subtree_and_parent_link() {
        let mut world = World::new();
        let scene = world.create(ObjectKind::Scene(SceneData::default()), Some("s"), None);
        let entity = world.create(
            ObjectKind::Entity(EntityData::default()),
            Some("door"),
            Some(scene),
        );
        let sprite = world.create(
            ObjectKind::Sprite(SpriteData::default()),
            None,
            Some(entity),
        );

        assert!(world.destroy(entity));
        assert!(!world.is_alive(entity));
        assert!(!world.is_alive(sprite), "children die with their parent");
        let scene_object = world.get(scene).expect("scene lives");
        assert!(scene_object.children.is_empty());
    }

    #[test]
    fn root_cannot_be_destroyed() {
        let mut world = World::new();
        let root = world.root();
        assert!(!world.destroy(root));
        assert!(world.is_alive(root));
    }

    #[test]
    fn property_roundtrip_through_protocol() {
        let mut world = World::new();
        let entity = world.create(ObjectKind::Entity(EntityData::default()), Some("door"), None);

        assert!(world.set_property(entity, "X", Value::Int(120)));
        assert!(matches!(
            world.get_property(entity, "x"),
            Some(Value::Int(120))
        ));

        // Unknown names land in the bag and read back.
        assert!(world.set_property(entity, "CustomField", Value::string("hello")));
        let read = world.get_property(entity, "customfield").expect("alive");
        assert!(read.equals(&Value::string("hello")));

        // Gone object: reads become None, writes report false.
        world.destroy(entity);
        assert!(world.get_property(entity, "x").is_none());
        assert!(!world.set_property(entity, "x", Value::Int(1)));
    }

    #[test]
    fn find_by_name_walks_the_subtree() {
        let mut world = World::new();
        let scene = world.create(ObjectKind::Scene(SceneData::default()), Some("town"), None);
        let layer = world.create(ObjectKind::Layer(LayerData::default()), Some("bg"), Some(scene));
        let door = world.create(
            ObjectKind::Entity(EntityData::default()),
            Some("Door"),
            Some(layer),
        );

        assert_eq!(world.find_by_name(world.root(), "door"), Some(door));
        assert_eq!(world.find_by_name(scene, "DOOR"), Some(door));
        assert_eq!(world.find_by_name(scene, "missing"), None);
    }

    #[test]
    fn unknown_method_is_not_handled() {
        let mut world = World::new();
        let entity = world.create(ObjectKind::Entity(EntityData::default()), Some("e"), None);
        let mut services = HostServices::new(7);
        let outcome = world.call_method(entity, "NoSuchMethod", &[], &mut services);
        assert_eq!(outcome, MethodOutcome::NotHandled);
    }
}
