//! Sprites: frame lists with per-frame delays, advanced by the world
//! update and built from `SPRITE` definition blocks.

use crate::definition::{DefBlock, DefinitionFile};
use crate::host::HostServices;
use crate::object::{GameObject, ObjectKind, Point, World};
use crate::scriptable::MethodOutcome;
use crate::value::{ObjectHandle, SharedStr, Value};

#[derive(Clone, Debug, PartialEq)]
pub struct SpriteFrame {
    pub image: SharedStr,
    /// Extra images composited over the base frame.
    pub overlays: Vec<SharedStr>,
    pub delay_ms: u32,
    pub hotspot: Point,
}

#[derive(Clone, Debug, PartialEq)]
pub struct SpriteData {
    pub frames: Vec<SpriteFrame>,
    pub current: usize,
    pub elapsed_ms: u64,
    pub looping: bool,
    pub playing: bool,
    pub finished: bool,
    /// Definition path this sprite was built from, when any.
    pub source: Option<SharedStr>,
}

impl Default for SpriteData {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            current: 0,
            elapsed_ms: 0,
            looping: true,
            playing: true,
            finished: false,
            source: None,
        }
    }
}

pub(crate) fn update(object: &mut GameObject, delta_ms: u64) {
    let ObjectKind::Sprite(data) = &mut object.kind else {
        return;
    };
    if !data.playing || data.frames.is_empty() {
        return;
    }
    data.elapsed_ms += delta_ms;
    loop {
        let delay = u64::from(data.frames[data.current].delay_ms.max(1));
        if data.elapsed_ms < delay {
            break;
        }
        data.elapsed_ms -= delay;
        if data.current + 1 < data.frames.len() {
            data.current += 1;
        } else if data.looping {
            data.current = 0;
        } else {
            data.playing = false;
            data.finished = true;
            break;
        }
    }
}

pub(crate) fn get(object: &GameObject, name: &str) -> Option<Value> {
    let ObjectKind::Sprite(data) = &object.kind else {
        return None;
    };
    match name.to_ascii_lowercase().as_str() {
        "frame" => Some(Value::Int(data.current as i32)),
        "framecount" => Some(Value::Int(data.frames.len() as i32)),
        "looping" => Some(Value::Bool(data.looping)),
        "playing" => Some(Value::Bool(data.playing)),
        "finished" => Some(Value::Bool(data.finished)),
        "source" => Some(
            data.source
                .as_ref()
                .map(|source| Value::String(source.clone()))
                .unwrap_or(Value::Null),
        ),
        _ => None,
    }
}

pub(crate) fn set(object: &mut GameObject, name: &str, value: &Value) -> bool {
    let ObjectKind::Sprite(data) = &mut object.kind else {
        return false;
    };
    match name.to_ascii_lowercase().as_str() {
        "frame" => {
            let frame = value.as_int().max(0) as usize;
            data.current = frame.min(data.frames.len().saturating_sub(1));
            data.elapsed_ms = 0;
            true
        }
        "looping" => {
            data.looping = value.is_truthy();
            true
        }
        "playing" => {
            data.playing = value.is_truthy();
            true
        }
        _ => false,
    }
}

pub(crate) fn call(
    world: &mut World,
    handle: ObjectHandle,
    name: &str,
    _args: &[Value],
) -> MethodOutcome {
    let Some(object) = world.get_mut(handle) else {
        return MethodOutcome::NotHandled;
    };
    let ObjectKind::Sprite(data) = &mut object.kind else {
        return MethodOutcome::NotHandled;
    };
    match name {
        "play" => {
            data.playing = true;
            data.finished = false;
            MethodOutcome::ok()
        }
        "stop" => {
            data.playing = false;
            MethodOutcome::ok()
        }
        "reset" => {
            data.current = 0;
            data.elapsed_ms = 0;
            data.finished = false;
            MethodOutcome::ok()
        }
        _ => MethodOutcome::NotHandled,
    }
}

/// Builds a sprite object from a parsed `SPRITE` block.
pub fn sprite_from_block(
    world: &mut World,
    block: &DefBlock,
    parent: ObjectHandle,
    source_path: &str,
) -> ObjectHandle {
    let mut data = SpriteData {
        looping: block.get_bool("LOOPING").unwrap_or(true),
        source: Some(SharedStr::from(source_path)),
        ..SpriteData::default()
    };
    for frame_block in block.children("FRAME") {
        let image = SharedStr::from(frame_block.get_str("IMAGE").unwrap_or(""));
        let overlays = frame_block
            .children("SUBFRAME")
            .filter_map(|subframe| subframe.get_str("IMAGE"))
            .map(SharedStr::from)
            .collect();
        let hotspot = frame_block
            .get_int_pair("HOTSPOT")
            .map(|(x, y)| Point::new(x as i32, y as i32))
            .unwrap_or_default();
        data.frames.push(SpriteFrame {
            image,
            overlays,
            delay_ms: frame_block.get_int("DELAY").unwrap_or(100).max(1) as u32,
            hotspot,
        });
    }
    world.create(ObjectKind::Sprite(data), block.get_str("NAME"), Some(parent))
}

/// Loads a sprite definition through the cache and instantiates it under
/// `owner`. Without a cache wired in, a bare sprite records the path so
/// the save still round-trips.
pub(crate) fn load_for(
    world: &mut World,
    owner: ObjectHandle,
    path: &SharedStr,
    services: &mut HostServices,
) -> Option<u64> {
    if let Some(cache) = services.cache.clone() {
        let file = cache.acquire::<DefinitionFile>(path).ok()?;
        let file = file.get().ok()?;
        let block = file.block("SPRITE")?;
        return Some(sprite_from_block(world, block, owner, path).raw());
    }
    let data = SpriteData {
        source: Some(path.clone()),
        ..SpriteData::default()
    };
    Some(world.create(ObjectKind::Sprite(data), None, Some(owner)).raw())
}
