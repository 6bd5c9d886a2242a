//! Actors: direction/action sprite sets, waypoint walking, speech.
//!
//! Walking and talking are the engine's canonical blocking host calls: the
//! method returns a suspend sentinel, the world update drives the motion,
//! and the waiting script resumes when the actor reports ready again.

use std::collections::BTreeMap;

use tracing::debug;

use crate::definition::DefBlock;
use crate::host::{HostCommand, HostServices};
use crate::object::{sprite, GameObject, ObjectKind, Point, World};
use crate::scriptable::{MethodOutcome, WaitKind};
use crate::value::{ObjectHandle, SharedStr, Value};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Direction {
    Up,
    #[default]
    Down,
    Left,
    Right,
}

impl Direction {
    pub fn as_str(self) -> &'static str {
        match self {
            Direction::Up => "up",
            Direction::Down => "down",
            Direction::Left => "left",
            Direction::Right => "right",
        }
    }

    pub fn parse(text: &str) -> Option<Self> {
        match text.to_ascii_lowercase().as_str() {
            "up" => Some(Direction::Up),
            "down" => Some(Direction::Down),
            "left" => Some(Direction::Left),
            "right" => Some(Direction::Right),
            _ => None,
        }
    }

    fn from_delta(dx: i32, dy: i32) -> Self {
        if dx.abs() >= dy.abs() {
            if dx >= 0 {
                Direction::Right
            } else {
                Direction::Left
            }
        } else if dy >= 0 {
            Direction::Down
        } else {
            Direction::Up
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct WalkState {
    pub path: Vec<Point>,
    pub next: usize,
    /// Fractional movement carry in 1/1000 pixel, so speed stays
    /// deterministic across any tick length.
    pub millipx: u32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TalkState {
    pub text: SharedStr,
    pub remaining_ms: u64,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ActorData {
    pub direction: Direction,
    pub action: SharedStr,
    /// Walk speed in pixels per second.
    pub speed: i32,
    pub walk: Option<WalkState>,
    pub talk: Option<TalkState>,
    /// Sprite children keyed by "action_direction", e.g. "walk_left".
    pub sprites: BTreeMap<String, u64>,
}

impl Default for ActorData {
    fn default() -> Self {
        Self {
            direction: Direction::Down,
            action: SharedStr::from("idle"),
            speed: 100,
            walk: None,
            talk: None,
            sprites: BTreeMap::new(),
        }
    }
}

pub(crate) fn update(object: &mut GameObject, delta_ms: u64, _services: &mut HostServices) {
    let (x, y) = (object.x, object.y);
    let ObjectKind::Actor(data) = &mut object.kind else {
        return;
    };

    if let Some(talk) = &mut data.talk {
        if talk.remaining_ms > delta_ms {
            talk.remaining_ms -= delta_ms;
        } else {
            data.talk = None;
        }
    }

    let mut position = Point::new(x, y);
    if let Some(walk) = &mut data.walk {
        let mut budget = walk
            .millipx
            .saturating_add((data.speed.max(1) as u32).saturating_mul(delta_ms as u32));
        while budget >= 1000 {
            let Some(&target) = walk.path.get(walk.next) else {
                break;
            };
            if position == target {
                walk.next += 1;
                continue;
            }
            let dx = (target.x - position.x).signum();
            let dy = (target.y - position.y).signum();
            data.direction = Direction::from_delta(target.x - position.x, target.y - position.y);
            position.x += dx;
            position.y += dy;
            budget -= 1000;
        }
        walk.millipx = budget;
        if walk.next >= walk.path.len() {
            data.walk = None;
            data.action = SharedStr::from("idle");
        }
    }
    object.x = position.x;
    object.y = position.y;

    let ObjectKind::Actor(data) = &object.kind else {
        return;
    };
    object.ready = data.walk.is_none() && data.talk.is_none();
}

pub(crate) fn get(object: &GameObject, name: &str) -> Option<Value> {
    let ObjectKind::Actor(data) = &object.kind else {
        return None;
    };
    match name.to_ascii_lowercase().as_str() {
        "direction" => Some(Value::string(data.direction.as_str())),
        "action" => Some(Value::String(data.action.clone())),
        "speed" => Some(Value::Int(data.speed)),
        "walking" => Some(Value::Bool(data.walk.is_some())),
        "talking" => Some(Value::Bool(data.talk.is_some())),
        _ => None,
    }
}

pub(crate) fn set(object: &mut GameObject, name: &str, value: &Value) -> bool {
    let ObjectKind::Actor(data) = &mut object.kind else {
        return false;
    };
    match name.to_ascii_lowercase().as_str() {
        "direction" => {
            if let Some(direction) = Direction::parse(&value.to_display_string()) {
                data.direction = direction;
            }
            true
        }
        "speed" => {
            data.speed = value.as_int().max(1);
            true
        }
        _ => false,
    }
}

pub(crate) fn call(
    world: &mut World,
    handle: ObjectHandle,
    name: &str,
    args: &[Value],
    services: &mut HostServices,
) -> MethodOutcome {
    match name {
        "walkto" => walk_to(world, handle, args),
        "talk" => talk(world, handle, args, services),
        "turnto" => {
            let direction = args
                .first()
                .and_then(|value| Direction::parse(&value.to_display_string()));
            if let (Some(direction), Some(object)) = (direction, world.get_mut(handle)) {
                if let ObjectKind::Actor(data) = &mut object.kind {
                    data.direction = direction;
                }
            }
            MethodOutcome::ok()
        }
        "stopwalking" => {
            if let Some(object) = world.get_mut(handle) {
                if let ObjectKind::Actor(data) = &mut object.kind {
                    data.walk = None;
                    data.action = SharedStr::from("idle");
                }
                object.ready = true;
            }
            MethodOutcome::ok()
        }
        "setsprite" => {
            let (Some(key), Some(Value::String(path))) = (args.first(), args.get(1)) else {
                return MethodOutcome::Value(Value::Bool(false));
            };
            let key = key.to_display_string().to_ascii_lowercase();
            let Some(sprite_id) = sprite::load_for(world, handle, path, services) else {
                return MethodOutcome::Value(Value::Bool(false));
            };
            if let Some(object) = world.get_mut(handle) {
                if let ObjectKind::Actor(data) = &mut object.kind {
                    data.sprites.insert(key, sprite_id);
                    return MethodOutcome::Value(Value::Bool(true));
                }
            }
            MethodOutcome::Value(Value::Bool(false))
        }
        _ => MethodOutcome::NotHandled,
    }
}

fn walk_to(world: &mut World, handle: ObjectHandle, args: &[Value]) -> MethodOutcome {
    let goal = Point::new(
        args.first().map(Value::as_int).unwrap_or(0),
        args.get(1).map(Value::as_int).unwrap_or(0),
    );
    let Some(object) = world.get(handle) else {
        return MethodOutcome::NotHandled;
    };
    let start = Point::new(object.x, object.y);

    // The enclosing scene provides blocked regions and waypoints; an actor
    // outside any scene walks a straight line.
    let path = match enclosing_scene(world, handle) {
        Some(scene_handle) => {
            let Some(ObjectKind::Scene(scene)) =
                world.get(scene_handle).map(|object| &object.kind)
            else {
                return MethodOutcome::NotHandled;
            };
            scene.find_path(start, goal)
        }
        None => Some(vec![goal]),
    };

    let Some(path) = path else {
        debug!(actor = handle.raw(), ?goal, "walk target unreachable");
        return MethodOutcome::Value(Value::Bool(false));
    };
    if let Some(object) = world.get_mut(handle) {
        if let ObjectKind::Actor(data) = &mut object.kind {
            data.walk = Some(WalkState {
                path,
                next: 0,
                millipx: 0,
            });
            data.action = SharedStr::from("walk");
        }
        object.ready = false;
    }
    MethodOutcome::Suspend(WaitKind::Object(handle))
}

fn talk(
    world: &mut World,
    handle: ObjectHandle,
    args: &[Value],
    services: &mut HostServices,
) -> MethodOutcome {
    let text = SharedStr::from(
        args.first()
            .map(Value::to_display_string)
            .unwrap_or_default(),
    );
    // Flat cost plus per-character reading time keeps speech pacing
    // deterministic without an audio clock.
    let duration_ms = 500 + 40 * text.chars().count() as u64;
    if let Some(object) = world.get_mut(handle) {
        if let ObjectKind::Actor(data) = &mut object.kind {
            data.talk = Some(TalkState {
                text: text.clone(),
                remaining_ms: duration_ms,
            });
        }
        object.ready = false;
    }
    services.commands.push(HostCommand::Speech {
        actor: handle,
        text,
        duration_ms,
    });
    MethodOutcome::Suspend(WaitKind::Object(handle))
}

fn enclosing_scene(world: &World, handle: ObjectHandle) -> Option<ObjectHandle> {
    let mut current = world.get(handle)?.parent;
    while let Some(id) = current {
        let object = world.get(ObjectHandle::new(id))?;
        if matches!(object.kind, ObjectKind::Scene(_)) {
            return Some(object.handle());
        }
        current = object.parent;
    }
    None
}

/// Builds an actor from an `ACTOR` definition block.
pub(crate) fn actor_from_block(
    world: &mut World,
    block: &DefBlock,
    parent: ObjectHandle,
) -> ObjectHandle {
    let data = ActorData {
        speed: block.get_int("SPEED").unwrap_or(100).max(1) as i32,
        direction: block
            .get_str("DIRECTION")
            .and_then(Direction::parse)
            .unwrap_or_default(),
        ..ActorData::default()
    };
    let actor = world.create(ObjectKind::Actor(data), block.get_str("NAME"), Some(parent));
    if let Some(object) = world.get_mut(actor) {
        if let Some((x, y)) = block.get_int_pair("POS") {
            object.x = x as i32;
            object.y = y as i32;
        }
    }
    actor
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::ActorData;

    fn world_with_actor() -> (World, ObjectHandle) {
        let mut world = World::new();
        let actor = world.create(ObjectKind::Actor(ActorData::default()), Some("hero"), None);
        (world, actor)
    }

    #[test]
    fn walk_to_suspends_until_arrival() {
        let (mut world, actor) = world_with_actor();
        let mut services = HostServices::new(1);

        let outcome = world.call_method(actor, "WalkTo", &[Value::Int(10), Value::Int(0)], &mut services);
        assert_eq!(outcome, MethodOutcome::Suspend(WaitKind::Object(actor)));
        assert!(!world.is_ready(actor));

        // 100 px/s for 100 ms = 10 px: exactly to the goal.
        world.update(100, &mut services);
        assert!(world.is_ready(actor));
        let object = world.get(actor).expect("alive");
        assert_eq!((object.x, object.y), (10, 0));
        let ObjectKind::Actor(data) = &object.kind else {
            panic!()
        };
        assert_eq!(data.direction, Direction::Right);
        assert_eq!(&*data.action, "idle");
    }

    #[test]
    fn walking_is_deterministic_across_tick_sizes() {
        let (mut world_a, actor_a) = world_with_actor();
        let (mut world_b, actor_b) = world_with_actor();
        let mut services = HostServices::new(1);
        let args = [Value::Int(37), Value::Int(22)];
        world_a.call_method(actor_a, "walkto", &args, &mut services);
        world_b.call_method(actor_b, "walkto", &args, &mut services);

        for _ in 0..60 {
            world_a.update(16, &mut services);
        }
        for _ in 0..6 {
            world_b.update(160, &mut services);
        }

        let a = world_a.get(actor_a).expect("a");
        let b = world_b.get(actor_b).expect("b");
        assert_eq!((a.x, a.y), (b.x, b.y));
    }

    #[test]
    fn talk_queues_speech_and_times_out() {
        let (mut world, actor) = world_with_actor();
        let mut services = HostServices::new(1);

        let outcome = world.call_method(actor, "Talk", &[Value::string("Hi!")], &mut services);
        assert_eq!(outcome, MethodOutcome::Suspend(WaitKind::Object(actor)));

        let commands = services.drain_commands();
        assert_eq!(commands.len(), 1);
        assert!(matches!(&commands[0], HostCommand::Speech { duration_ms, .. } if *duration_ms == 500 + 40 * 3));

        world.update(619, &mut services);
        assert!(!world.is_ready(actor), "still talking");
        world.update(1, &mut services);
        assert!(world.is_ready(actor));
    }

    #[test]
    fn unreachable_walk_returns_false_without_suspending() {
        let mut world = World::new();
        let scene = world.create(
            ObjectKind::Scene(crate::object::SceneData {
                width: 100,
                height: 100,
                regions: vec![crate::object::Region {
                    name: None,
                    points: vec![
                        Point::new(40, 40),
                        Point::new(60, 40),
                        Point::new(60, 60),
                        Point::new(40, 60),
                    ],
                    blocked: true,
                }],
                ..Default::default()
            }),
            Some("s"),
            None,
        );
        let actor = world.create(
            ObjectKind::Actor(ActorData::default()),
            Some("hero"),
            Some(scene),
        );
        let mut services = HostServices::new(1);
        let outcome =
            world.call_method(actor, "walkto", &[Value::Int(50), Value::Int(50)], &mut services);
        assert_eq!(outcome, MethodOutcome::Value(Value::Bool(false)));
        assert!(world.is_ready(actor));
    }
}
