//! Save/load: a bidirectional transfer traversal over the object tree,
//! the scheduler, and every running script.
//!
//! One code path serves both directions: each `transfer_*` call writes in
//! save mode and reads in load mode, so the two can never drift apart.
//! Keys name fields for the reader of this code; the wire format is
//! positional. Object references travel as stable registry ids, which
//! stay valid because the registry and its id counter are part of the
//! save; a validation pass after loading rejects graphs whose links do
//! not close.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use thiserror::Error;
use wintermute_assets::ResourceCache;

use crate::host::Lcg;
use crate::object::{
    ActorData, ButtonData, Direction, EntityData, GameData, GameObject, ItemData, LayerData,
    ObjectKind, Point, Rect, ScaleLevel, SceneData, SpriteData, SpriteFrame, TalkState, WalkState,
    WindowData, World,
};
use crate::scheduler::{Attachment, QueuedEvent, Scheduler};
use crate::script::image::ScriptImage;
use crate::value::{ObjectHandle, SharedStr, Value};
use crate::version::{CONTAINER_MAGIC, DEFAULT_GAME_SAVE_VERSION, SAVE_FORMAT_VERSION};
use crate::vm::{CallStack, Frame, OperandStack, ScriptInstance, ScriptState};

pub type PersistResult<T> = Result<T, PersistError>;

#[derive(Debug, Error)]
pub enum PersistError {
    #[error("save data is corrupt: {0}")]
    Corrupt(String),
    #[error("save format {found} is older than supported {supported}")]
    VersionTooOld { found: u16, supported: u16 },
    #[error("save format {found} is newer than supported {supported}")]
    VersionTooNew { found: u16, supported: u16 },
    #[error("io error: {0}")]
    Io(String),
}

/// The category a save/load failure surfaces to the UI as.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SaveLoadResult {
    Ok,
    VersionTooOld,
    VersionTooNew,
    Corrupt,
    IoError,
}

impl From<&PersistError> for SaveLoadResult {
    fn from(error: &PersistError) -> Self {
        match error {
            PersistError::Corrupt(_) => SaveLoadResult::Corrupt,
            PersistError::VersionTooOld { .. } => SaveLoadResult::VersionTooOld,
            PersistError::VersionTooNew { .. } => SaveLoadResult::VersionTooNew,
            PersistError::Io(_) => SaveLoadResult::IoError,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PersistMode {
    Save,
    Load,
}

/// The bidirectional cursor. In save mode it appends to an owned buffer;
/// in load mode it consumes a borrowed one.
pub struct Persistor<'a> {
    mode: PersistMode,
    out: Vec<u8>,
    input: &'a [u8],
    cursor: usize,
}

impl<'a> Persistor<'a> {
    pub fn saver() -> Persistor<'static> {
        Persistor {
            mode: PersistMode::Save,
            out: Vec::new(),
            input: &[],
            cursor: 0,
        }
    }

    pub fn loader(input: &'a [u8]) -> Persistor<'a> {
        Persistor {
            mode: PersistMode::Load,
            out: Vec::new(),
            input,
            cursor: 0,
        }
    }

    pub fn is_saving(&self) -> bool {
        self.mode == PersistMode::Save
    }

    pub fn finish(self) -> Vec<u8> {
        self.out
    }

    /// All input must be consumed; trailing garbage means corruption.
    pub fn finish_load(self) -> PersistResult<()> {
        if self.cursor != self.input.len() {
            return Err(PersistError::Corrupt(format!(
                "{} unread bytes after the object graph",
                self.input.len() - self.cursor
            )));
        }
        Ok(())
    }

    fn read(&mut self, len: usize) -> PersistResult<&'a [u8]> {
        let slice = self
            .input
            .get(self.cursor..self.cursor + len)
            .ok_or_else(|| PersistError::Corrupt("unexpected end of save data".to_string()))?;
        self.cursor += len;
        Ok(slice)
    }

    pub fn transfer_u8(&mut self, _key: &str, value: &mut u8) -> PersistResult<()> {
        if self.is_saving() {
            self.out.push(*value);
        } else {
            *value = self.read(1)?[0];
        }
        Ok(())
    }

    pub fn transfer_bool(&mut self, key: &str, value: &mut bool) -> PersistResult<()> {
        let mut raw = u8::from(*value);
        self.transfer_u8(key, &mut raw)?;
        *value = raw != 0;
        Ok(())
    }

    pub fn transfer_u16(&mut self, _key: &str, value: &mut u16) -> PersistResult<()> {
        if self.is_saving() {
            self.out.extend_from_slice(&value.to_le_bytes());
        } else {
            *value = u16::from_le_bytes(self.read(2)?.try_into().expect("len 2"));
        }
        Ok(())
    }

    pub fn transfer_u32(&mut self, _key: &str, value: &mut u32) -> PersistResult<()> {
        if self.is_saving() {
            self.out.extend_from_slice(&value.to_le_bytes());
        } else {
            *value = u32::from_le_bytes(self.read(4)?.try_into().expect("len 4"));
        }
        Ok(())
    }

    pub fn transfer_u64(&mut self, _key: &str, value: &mut u64) -> PersistResult<()> {
        if self.is_saving() {
            self.out.extend_from_slice(&value.to_le_bytes());
        } else {
            *value = u64::from_le_bytes(self.read(8)?.try_into().expect("len 8"));
        }
        Ok(())
    }

    pub fn transfer_i32(&mut self, key: &str, value: &mut i32) -> PersistResult<()> {
        let mut raw = *value as u32;
        self.transfer_u32(key, &mut raw)?;
        *value = raw as i32;
        Ok(())
    }

    pub fn transfer_i64(&mut self, key: &str, value: &mut i64) -> PersistResult<()> {
        let mut raw = *value as u64;
        self.transfer_u64(key, &mut raw)?;
        *value = raw as i64;
        Ok(())
    }

    pub fn transfer_f64(&mut self, key: &str, value: &mut f64) -> PersistResult<()> {
        let mut raw = value.to_bits();
        self.transfer_u64(key, &mut raw)?;
        *value = f64::from_bits(raw);
        Ok(())
    }

    pub fn transfer_string(&mut self, key: &str, value: &mut String) -> PersistResult<()> {
        if self.is_saving() {
            let mut len = value.len() as u32;
            self.transfer_u32(key, &mut len)?;
            self.out.extend_from_slice(value.as_bytes());
        } else {
            let mut len = 0u32;
            self.transfer_u32(key, &mut len)?;
            let bytes = self.read(len as usize)?;
            *value = String::from_utf8_lossy(bytes).into_owned();
        }
        Ok(())
    }

    pub fn transfer_shared_str(&mut self, key: &str, value: &mut SharedStr) -> PersistResult<()> {
        let mut text = value.to_string();
        self.transfer_string(key, &mut text)?;
        *value = SharedStr::from(text);
        Ok(())
    }

    pub fn transfer_opt_shared_str(
        &mut self,
        key: &str,
        value: &mut Option<SharedStr>,
    ) -> PersistResult<()> {
        let mut present = value.is_some();
        self.transfer_bool(key, &mut present)?;
        if present {
            let mut text = value.clone().unwrap_or_else(|| SharedStr::from(""));
            self.transfer_shared_str(key, &mut text)?;
            *value = Some(text);
        } else {
            *value = None;
        }
        Ok(())
    }

    pub fn transfer_opt_u64(&mut self, key: &str, value: &mut Option<u64>) -> PersistResult<()> {
        let mut present = value.is_some();
        self.transfer_bool(key, &mut present)?;
        if present {
            let mut raw = value.unwrap_or(0);
            self.transfer_u64(key, &mut raw)?;
            *value = Some(raw);
        } else {
            *value = None;
        }
        Ok(())
    }

    pub fn transfer_bytes(&mut self, key: &str, value: &mut Vec<u8>) -> PersistResult<()> {
        if self.is_saving() {
            let mut len = value.len() as u32;
            self.transfer_u32(key, &mut len)?;
            self.out.extend_from_slice(value);
        } else {
            let mut len = 0u32;
            self.transfer_u32(key, &mut len)?;
            *value = self.read(len as usize)?.to_vec();
        }
        Ok(())
    }

    pub fn transfer_u64_vec(&mut self, key: &str, value: &mut Vec<u64>) -> PersistResult<()> {
        let mut len = value.len() as u32;
        self.transfer_u32(key, &mut len)?;
        if self.is_saving() {
            for item in value.iter_mut() {
                self.transfer_u64(key, item)?;
            }
        } else {
            value.clear();
            for _ in 0..len {
                let mut item = 0u64;
                self.transfer_u64(key, &mut item)?;
                value.push(item);
            }
        }
        Ok(())
    }

    /// Tagged transfer of a script value; object references travel as
    /// their stable ids.
    pub fn transfer_value(&mut self, key: &str, value: &mut Value) -> PersistResult<()> {
        let mut tag = match value {
            Value::Null => 0u8,
            Value::Bool(_) => 1,
            Value::Int(_) => 2,
            Value::Float(_) => 3,
            Value::String(_) => 4,
            Value::Object(_) => 5,
            Value::Array(_) => 6,
        };
        self.transfer_u8(key, &mut tag)?;
        match tag {
            0 => *value = Value::Null,
            1 => {
                let mut raw = matches!(value, Value::Bool(true));
                self.transfer_bool(key, &mut raw)?;
                *value = Value::Bool(raw);
            }
            2 => {
                let mut raw = match value {
                    Value::Int(v) => *v,
                    _ => 0,
                };
                self.transfer_i32(key, &mut raw)?;
                *value = Value::Int(raw);
            }
            3 => {
                let mut raw = match value {
                    Value::Float(v) => *v,
                    _ => 0.0,
                };
                self.transfer_f64(key, &mut raw)?;
                *value = Value::Float(raw);
            }
            4 => {
                let mut raw = match value {
                    Value::String(v) => v.clone(),
                    _ => SharedStr::from(""),
                };
                self.transfer_shared_str(key, &mut raw)?;
                *value = Value::String(raw);
            }
            5 => {
                let mut raw = match value {
                    Value::Object(v) => v.raw(),
                    _ => 0,
                };
                self.transfer_u64(key, &mut raw)?;
                *value = Value::Object(ObjectHandle::new(raw));
            }
            6 => {
                let mut items = match std::mem::take(value) {
                    Value::Array(items) => items,
                    _ => Vec::new(),
                };
                let mut len = items.len() as u32;
                self.transfer_u32(key, &mut len)?;
                if self.is_saving() {
                    for item in &mut items {
                        self.transfer_value(key, item)?;
                    }
                } else {
                    items.clear();
                    for _ in 0..len {
                        let mut item = Value::Null;
                        self.transfer_value(key, &mut item)?;
                        items.push(item);
                    }
                }
                *value = Value::Array(items);
            }
            other => {
                return Err(PersistError::Corrupt(format!(
                    "unknown value tag {other} for '{key}'"
                )))
            }
        }
        Ok(())
    }

    pub fn transfer_value_vec(&mut self, key: &str, value: &mut Vec<Value>) -> PersistResult<()> {
        let mut len = value.len() as u32;
        self.transfer_u32(key, &mut len)?;
        if self.is_saving() {
            for item in value.iter_mut() {
                self.transfer_value(key, item)?;
            }
        } else {
            value.clear();
            for _ in 0..len {
                let mut item = Value::Null;
                self.transfer_value(key, &mut item)?;
                value.push(item);
            }
        }
        Ok(())
    }

    pub fn transfer_value_map(
        &mut self,
        key: &str,
        map: &mut BTreeMap<String, Value>,
    ) -> PersistResult<()> {
        let mut len = map.len() as u32;
        self.transfer_u32(key, &mut len)?;
        if self.is_saving() {
            for (name, value) in map.iter_mut() {
                let mut name = name.clone();
                self.transfer_string(key, &mut name)?;
                self.transfer_value(key, value)?;
            }
        } else {
            map.clear();
            for _ in 0..len {
                let mut name = String::new();
                self.transfer_string(key, &mut name)?;
                let mut value = Value::Null;
                self.transfer_value(key, &mut value)?;
                map.insert(name, value);
            }
        }
        Ok(())
    }
}

/// Implemented by everything that takes part in the save traversal.
pub trait Persist {
    fn persist(&mut self, pm: &mut Persistor<'_>) -> PersistResult<()>;
}

impl Persist for World {
    fn persist(&mut self, pm: &mut Persistor<'_>) -> PersistResult<()> {
        transfer_world(pm, self)
    }
}

impl Persist for GameObject {
    fn persist(&mut self, pm: &mut Persistor<'_>) -> PersistResult<()> {
        transfer_object(pm, self)
    }
}

impl Persist for Value {
    fn persist(&mut self, pm: &mut Persistor<'_>) -> PersistResult<()> {
        pm.transfer_value("value", self)
    }
}

// ----- save file header -----

/// The save-file header: identity and presentation only, no game state.
#[derive(Clone, Debug, PartialEq)]
pub struct SaveHeader {
    pub game_version: u16,
    pub name: String,
    pub description: String,
    pub timestamp: i64,
    pub thumbnail: Vec<u8>,
}

impl Default for SaveHeader {
    fn default() -> Self {
        Self {
            game_version: DEFAULT_GAME_SAVE_VERSION,
            name: String::new(),
            description: String::new(),
            timestamp: 0,
            thumbnail: Vec::new(),
        }
    }
}

impl SaveHeader {
    fn encode(&self, out: &mut Vec<u8>) {
        out.extend_from_slice(&CONTAINER_MAGIC.to_le_bytes());
        out.extend_from_slice(&SAVE_FORMAT_VERSION.to_le_bytes());
        out.extend_from_slice(&self.game_version.to_le_bytes());
        encode_string(out, &self.name);
        encode_string(out, &self.description);
        out.extend_from_slice(&self.timestamp.to_le_bytes());
        out.extend_from_slice(&(self.thumbnail.len() as u32).to_le_bytes());
        out.extend_from_slice(&self.thumbnail);
    }

    fn decode(bytes: &[u8]) -> PersistResult<(Self, usize)> {
        let mut cursor = HeaderCursor { bytes, pos: 0 };
        let magic = cursor.u32()?;
        if magic != CONTAINER_MAGIC {
            return Err(PersistError::Corrupt("bad save magic".to_string()));
        }
        let engine_version = cursor.u16()?;
        if engine_version > SAVE_FORMAT_VERSION {
            return Err(PersistError::VersionTooNew {
                found: engine_version,
                supported: SAVE_FORMAT_VERSION,
            });
        }
        if engine_version < SAVE_FORMAT_VERSION {
            return Err(PersistError::VersionTooOld {
                found: engine_version,
                supported: SAVE_FORMAT_VERSION,
            });
        }
        let game_version = cursor.u16()?;
        let name = cursor.string()?;
        let description = cursor.string()?;
        let timestamp = cursor.i64()?;
        let thumbnail_len = cursor.u32()? as usize;
        let thumbnail = cursor.take(thumbnail_len)?.to_vec();
        Ok((
            Self {
                game_version,
                name,
                description,
                timestamp,
                thumbnail,
            },
            cursor.pos,
        ))
    }
}

fn encode_string(out: &mut Vec<u8>, text: &str) {
    out.extend_from_slice(&(text.len() as u32).to_le_bytes());
    out.extend_from_slice(text.as_bytes());
}

struct HeaderCursor<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> HeaderCursor<'a> {
    fn take(&mut self, len: usize) -> PersistResult<&'a [u8]> {
        let slice = self
            .bytes
            .get(self.pos..self.pos + len)
            .ok_or_else(|| PersistError::Corrupt("truncated save header".to_string()))?;
        self.pos += len;
        Ok(slice)
    }

    fn u16(&mut self) -> PersistResult<u16> {
        Ok(u16::from_le_bytes(self.take(2)?.try_into().expect("len 2")))
    }

    fn u32(&mut self) -> PersistResult<u32> {
        Ok(u32::from_le_bytes(self.take(4)?.try_into().expect("len 4")))
    }

    fn i64(&mut self) -> PersistResult<i64> {
        Ok(i64::from_le_bytes(self.take(8)?.try_into().expect("len 8")))
    }

    fn string(&mut self) -> PersistResult<String> {
        let len = self.u32()? as usize;
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }
}

// ----- top-level save / load -----

/// Parses just the header of a save file, for listings and tooling.
pub fn read_save_header(bytes: &[u8]) -> PersistResult<SaveHeader> {
    SaveHeader::decode(bytes).map(|(header, _)| header)
}

/// Serializes the whole running game.
pub fn save_game(
    header: &SaveHeader,
    world: &mut World,
    scheduler: &mut Scheduler,
) -> PersistResult<Vec<u8>> {
    let mut pm = Persistor::saver();
    transfer_world(&mut pm, world)?;
    save_scheduler(&mut pm, scheduler)?;
    let mut out = Vec::new();
    header.encode(&mut out);
    out.extend_from_slice(&pm.finish());
    Ok(out)
}

/// Reconstructs a game from a save. Script images are re-acquired
/// through the cache by their filesystem paths; live state is only
/// produced when the whole file decodes and validates.
pub fn load_game(
    bytes: &[u8],
    cache: &ResourceCache,
) -> PersistResult<(SaveHeader, World, Scheduler)> {
    let (header, body_start) = SaveHeader::decode(bytes)?;
    let mut pm = Persistor::loader(&bytes[body_start..]);
    let mut world = World::new();
    transfer_world(&mut pm, &mut world)?;
    let scheduler = load_scheduler(&mut pm, cache)?;
    pm.finish_load()?;
    validate_world(&world)?;
    Ok((header, world, scheduler))
}

/// Link-closure pass over a freshly loaded world.
fn validate_world(world: &World) -> PersistResult<()> {
    let ids: std::collections::HashSet<u64> = world.ids().collect();
    if !ids.contains(&world.root().raw()) {
        return Err(PersistError::Corrupt("world has no root object".to_string()));
    }
    for object in world.objects() {
        if let Some(parent) = object.parent {
            if !ids.contains(&parent) {
                return Err(PersistError::Corrupt(format!(
                    "object {} has a dangling parent {}",
                    object.id, parent
                )));
            }
        }
        for &child in &object.children {
            let ok = world
                .get(ObjectHandle::new(child))
                .is_some_and(|c| c.parent == Some(object.id));
            if !ok {
                return Err(PersistError::Corrupt(format!(
                    "object {} lists child {} that does not point back",
                    object.id, child
                )));
            }
        }
    }
    Ok(())
}

// ----- world traversal -----

pub(crate) fn transfer_world(pm: &mut Persistor<'_>, world: &mut World) -> PersistResult<()> {
    let (objects, next_id) = world.persist_parts();
    pm.transfer_u64("next_id", next_id)?;
    let mut count = objects.len() as u32;
    pm.transfer_u32("object_count", &mut count)?;
    if pm.is_saving() {
        for object in objects.values_mut() {
            transfer_object(pm, object)?;
        }
    } else {
        objects.clear();
        for _ in 0..count {
            let mut object = GameObject::new(0, ObjectKind::Entity(EntityData::default()));
            transfer_object(pm, &mut object)?;
            objects.insert(object.id, object);
        }
    }
    Ok(())
}

fn kind_tag(kind: &ObjectKind) -> u8 {
    match kind {
        ObjectKind::Game(_) => 0,
        ObjectKind::Scene(_) => 1,
        ObjectKind::Layer(_) => 2,
        ObjectKind::Entity(_) => 3,
        ObjectKind::Actor(_) => 4,
        ObjectKind::Item(_) => 5,
        ObjectKind::Window(_) => 6,
        ObjectKind::Button(_) => 7,
        ObjectKind::Sprite(_) => 8,
    }
}

fn blank_kind(tag: u8) -> PersistResult<ObjectKind> {
    Ok(match tag {
        0 => ObjectKind::Game(GameData::default()),
        1 => ObjectKind::Scene(SceneData::default()),
        2 => ObjectKind::Layer(LayerData::default()),
        3 => ObjectKind::Entity(EntityData::default()),
        4 => ObjectKind::Actor(ActorData::default()),
        5 => ObjectKind::Item(ItemData::default()),
        6 => ObjectKind::Window(WindowData::default()),
        7 => ObjectKind::Button(ButtonData::default()),
        8 => ObjectKind::Sprite(SpriteData::default()),
        other => {
            return Err(PersistError::Corrupt(format!(
                "unknown object kind tag {other}"
            )))
        }
    })
}

fn transfer_object(pm: &mut Persistor<'_>, object: &mut GameObject) -> PersistResult<()> {
    pm.transfer_u64("id", &mut object.id)?;
    let mut tag = kind_tag(&object.kind);
    pm.transfer_u8("kind", &mut tag)?;
    if !pm.is_saving() {
        object.kind = blank_kind(tag)?;
    }
    pm.transfer_opt_shared_str("name", &mut object.name)?;
    pm.transfer_bool("visible", &mut object.visible)?;
    pm.transfer_bool("active", &mut object.active)?;
    pm.transfer_i32("priority", &mut object.priority)?;
    pm.transfer_i32("x", &mut object.x)?;
    pm.transfer_i32("y", &mut object.y)?;
    transfer_rect(pm, &mut object.bbox)?;
    pm.transfer_bool("ready", &mut object.ready)?;
    pm.transfer_opt_u64("parent", &mut object.parent)?;
    pm.transfer_u64_vec("children", &mut object.children)?;
    pm.transfer_value_map("props", object.props.entries_mut())?;

    match &mut object.kind {
        ObjectKind::Game(data) => {
            pm.transfer_opt_shared_str("caption", &mut data.caption)?;
            pm.transfer_opt_u64("current_scene", &mut data.current_scene)?;
            pm.transfer_u64_vec("inventory", &mut data.inventory)?;
            transfer_string_map(pm, "strings", &mut data.strings)?;
        }
        ObjectKind::Scene(data) => {
            pm.transfer_i32("width", &mut data.width)?;
            pm.transfer_i32("height", &mut data.height)?;
            let mut count = data.regions.len() as u32;
            pm.transfer_u32("region_count", &mut count)?;
            resize_for_load(pm, &mut data.regions, count);
            for region in &mut data.regions {
                pm.transfer_opt_shared_str("region_name", &mut region.name)?;
                transfer_points(pm, &mut region.points)?;
                pm.transfer_bool("blocked", &mut region.blocked)?;
            }
            let mut count = data.waypoints.len() as u32;
            pm.transfer_u32("waypoint_group_count", &mut count)?;
            resize_for_load(pm, &mut data.waypoints, count);
            for group in &mut data.waypoints {
                pm.transfer_opt_shared_str("group_name", &mut group.name)?;
                transfer_points(pm, &mut group.points)?;
            }
            let mut count = data.scale_levels.len() as u32;
            pm.transfer_u32("scale_level_count", &mut count)?;
            if !pm.is_saving() {
                data.scale_levels = vec![ScaleLevel { y: 0, scale: 1000 }; count as usize];
            }
            for level in &mut data.scale_levels {
                pm.transfer_i32("y", &mut level.y)?;
                pm.transfer_u32("scale", &mut level.scale)?;
            }
        }
        ObjectKind::Layer(data) => {
            pm.transfer_i32("width", &mut data.width)?;
            pm.transfer_i32("height", &mut data.height)?;
            pm.transfer_opt_shared_str("image", &mut data.image)?;
        }
        ObjectKind::Entity(data) => {
            pm.transfer_opt_u64("sprite", &mut data.sprite)?;
            pm.transfer_bool("interactive", &mut data.interactive)?;
        }
        ObjectKind::Actor(data) => {
            let mut direction = data.direction as u8;
            pm.transfer_u8("direction", &mut direction)?;
            data.direction = match direction {
                0 => Direction::Up,
                1 => Direction::Down,
                2 => Direction::Left,
                _ => Direction::Right,
            };
            pm.transfer_shared_str("action", &mut data.action)?;
            pm.transfer_i32("speed", &mut data.speed)?;
            let mut walking = data.walk.is_some();
            pm.transfer_bool("walking", &mut walking)?;
            if walking {
                let mut walk = data.walk.take().unwrap_or(WalkState {
                    path: Vec::new(),
                    next: 0,
                    millipx: 0,
                });
                transfer_points(pm, &mut walk.path)?;
                let mut next = walk.next as u32;
                pm.transfer_u32("next", &mut next)?;
                walk.next = next as usize;
                pm.transfer_u32("millipx", &mut walk.millipx)?;
                data.walk = Some(walk);
            } else {
                data.walk = None;
            }
            let mut talking = data.talk.is_some();
            pm.transfer_bool("talking", &mut talking)?;
            if talking {
                let mut talk = data.talk.take().unwrap_or(TalkState {
                    text: SharedStr::from(""),
                    remaining_ms: 0,
                });
                pm.transfer_shared_str("text", &mut talk.text)?;
                pm.transfer_u64("remaining_ms", &mut talk.remaining_ms)?;
                data.talk = Some(talk);
            } else {
                data.talk = None;
            }
            transfer_sprite_keys(pm, &mut data.sprites)?;
        }
        ObjectKind::Item(data) => {
            pm.transfer_opt_shared_str("caption", &mut data.caption)?;
            pm.transfer_opt_shared_str("icon", &mut data.icon)?;
        }
        ObjectKind::Window(data) => {
            pm.transfer_bool("modal", &mut data.modal)?;
        }
        ObjectKind::Button(data) => {
            pm.transfer_shared_str("text", &mut data.text)?;
            pm.transfer_bool("pressed", &mut data.pressed)?;
            pm.transfer_opt_shared_str("event", &mut data.event)?;
        }
        ObjectKind::Sprite(data) => {
            let mut count = data.frames.len() as u32;
            pm.transfer_u32("frame_count", &mut count)?;
            if !pm.is_saving() {
                data.frames = (0..count)
                    .map(|_| SpriteFrame {
                        image: SharedStr::from(""),
                        overlays: Vec::new(),
                        delay_ms: 0,
                        hotspot: Point::default(),
                    })
                    .collect();
            }
            for frame in &mut data.frames {
                pm.transfer_shared_str("image", &mut frame.image)?;
                let mut overlay_count = frame.overlays.len() as u32;
                pm.transfer_u32("overlay_count", &mut overlay_count)?;
                if !pm.is_saving() {
                    frame.overlays = vec![SharedStr::from(""); overlay_count as usize];
                }
                for overlay in &mut frame.overlays {
                    pm.transfer_shared_str("overlay", overlay)?;
                }
                pm.transfer_u32("delay_ms", &mut frame.delay_ms)?;
                pm.transfer_i32("hotspot_x", &mut frame.hotspot.x)?;
                pm.transfer_i32("hotspot_y", &mut frame.hotspot.y)?;
            }
            let mut current = data.current as u32;
            pm.transfer_u32("current", &mut current)?;
            data.current = current as usize;
            pm.transfer_u64("elapsed_ms", &mut data.elapsed_ms)?;
            pm.transfer_bool("looping", &mut data.looping)?;
            pm.transfer_bool("playing", &mut data.playing)?;
            pm.transfer_bool("finished", &mut data.finished)?;
            pm.transfer_opt_shared_str("source", &mut data.source)?;
        }
    }
    Ok(())
}

fn transfer_rect(pm: &mut Persistor<'_>, rect: &mut Rect) -> PersistResult<()> {
    pm.transfer_i32("x", &mut rect.x)?;
    pm.transfer_i32("y", &mut rect.y)?;
    pm.transfer_i32("width", &mut rect.width)?;
    pm.transfer_i32("height", &mut rect.height)
}

fn transfer_points(pm: &mut Persistor<'_>, points: &mut Vec<Point>) -> PersistResult<()> {
    let mut count = points.len() as u32;
    pm.transfer_u32("point_count", &mut count)?;
    if !pm.is_saving() {
        *points = vec![Point::default(); count as usize];
    }
    for point in points.iter_mut() {
        pm.transfer_i32("x", &mut point.x)?;
        pm.transfer_i32("y", &mut point.y)?;
    }
    Ok(())
}

fn transfer_string_map(
    pm: &mut Persistor<'_>,
    key: &str,
    map: &mut BTreeMap<String, String>,
) -> PersistResult<()> {
    let mut len = map.len() as u32;
    pm.transfer_u32(key, &mut len)?;
    if pm.is_saving() {
        for (name, value) in map.iter_mut() {
            let mut name = name.clone();
            pm.transfer_string(key, &mut name)?;
            pm.transfer_string(key, value)?;
        }
    } else {
        map.clear();
        for _ in 0..len {
            let mut name = String::new();
            pm.transfer_string(key, &mut name)?;
            let mut value = String::new();
            pm.transfer_string(key, &mut value)?;
            map.insert(name, value);
        }
    }
    Ok(())
}

fn transfer_sprite_keys(
    pm: &mut Persistor<'_>,
    map: &mut BTreeMap<String, u64>,
) -> PersistResult<()> {
    let mut len = map.len() as u32;
    pm.transfer_u32("sprite_count", &mut len)?;
    if pm.is_saving() {
        for (name, value) in map.iter_mut() {
            let mut name = name.clone();
            pm.transfer_string("key", &mut name)?;
            pm.transfer_u64("sprite", value)?;
        }
    } else {
        map.clear();
        for _ in 0..len {
            let mut name = String::new();
            pm.transfer_string("key", &mut name)?;
            let mut value = 0u64;
            pm.transfer_u64("sprite", &mut value)?;
            map.insert(name, value);
        }
    }
    Ok(())
}

fn resize_for_load<T: Default + Clone>(pm: &Persistor<'_>, items: &mut Vec<T>, count: u32) {
    if !pm.is_saving() {
        *items = vec![T::default(); count as usize];
    }
}

// ----- scheduler traversal -----

fn state_parts(state: ScriptState) -> (u8, u64) {
    match state {
        // A saved running script resumes as ready.
        ScriptState::Ready | ScriptState::Running => (0, 0),
        ScriptState::Sleeping { until_ms } => (1, until_ms),
        ScriptState::WaitingForObject { object } => (2, object.raw()),
        ScriptState::WaitingForScript { thread } => (3, thread),
        ScriptState::Finished => (4, 0),
        ScriptState::Error => (5, 0),
    }
}

fn state_from_parts(tag: u8, payload: u64) -> PersistResult<ScriptState> {
    Ok(match tag {
        0 => ScriptState::Ready,
        1 => ScriptState::Sleeping { until_ms: payload },
        2 => ScriptState::WaitingForObject {
            object: ObjectHandle::new(payload),
        },
        3 => ScriptState::WaitingForScript { thread: payload },
        4 => ScriptState::Finished,
        5 => ScriptState::Error,
        other => {
            return Err(PersistError::Corrupt(format!(
                "unknown script state tag {other}"
            )))
        }
    })
}

fn save_scheduler(pm: &mut Persistor<'_>, scheduler: &mut Scheduler) -> PersistResult<()> {
    let (scripts, attachments, queue, globals, services, next_thread) = scheduler.persist_parts();

    pm.transfer_u64("next_thread", next_thread)?;
    let mut clock = services.clock_ms;
    pm.transfer_u64("clock_ms", &mut clock)?;
    let mut rng_state = services.rng.state();
    pm.transfer_u64("rng_state", &mut rng_state)?;

    pm.transfer_value_map("globals", globals.entries_mut())?;

    let mut count = scripts.len() as u32;
    pm.transfer_u32("script_count", &mut count)?;
    for script in scripts.iter_mut() {
        let mut path = script.image.source_path.clone();
        pm.transfer_shared_str("image", &mut path)?;
        pm.transfer_u64("thread", &mut script.thread)?;
        pm.transfer_u32("ip", &mut script.ip)?;
        pm.transfer_bool("paused", &mut script.paused)?;
        let (mut tag, mut payload) = state_parts(script.state);
        pm.transfer_u8("state", &mut tag)?;
        pm.transfer_u64("state_arg", &mut payload)?;
        pm.transfer_value("this", &mut script.this)?;
        let mut owner = script.owner.map(ObjectHandle::raw);
        pm.transfer_opt_u64("owner", &mut owner)?;
        let mut stack = script.stack.values().to_vec();
        pm.transfer_value_vec("stack", &mut stack)?;
        let mut frame_count = script.calls.depth() as u32;
        pm.transfer_u32("frame_count", &mut frame_count)?;
        for frame in script.calls.frames().to_vec().iter_mut() {
            transfer_frame(pm, frame)?;
        }
    }

    let mut count = attachments.len() as u32;
    pm.transfer_u32("attachment_count", &mut count)?;
    for attachment in attachments.iter_mut() {
        let mut object = attachment.object.raw();
        pm.transfer_u64("object", &mut object)?;
        let mut path = attachment.image.source_path.clone();
        pm.transfer_shared_str("image", &mut path)?;
        let mut filter = attachment.event.clone();
        transfer_opt_string(pm, &mut filter)?;
    }

    let mut count = queue.len() as u32;
    pm.transfer_u32("event_count", &mut count)?;
    for event in queue.iter_mut() {
        let mut object = event.object.raw();
        pm.transfer_u64("object", &mut object)?;
        pm.transfer_string("name", &mut event.name)?;
        pm.transfer_value_vec("payload", &mut event.payload)?;
    }
    Ok(())
}

fn load_scheduler(pm: &mut Persistor<'_>, cache: &ResourceCache) -> PersistResult<Scheduler> {
    let mut scheduler = Scheduler::new(1);
    {
        let (scripts, attachments, queue, globals, services, next_thread) =
            scheduler.persist_parts();

        pm.transfer_u64("next_thread", next_thread)?;
        let mut clock = 0u64;
        pm.transfer_u64("clock_ms", &mut clock)?;
        services.clock_ms = clock;
        let mut rng_state = 0u64;
        pm.transfer_u64("rng_state", &mut rng_state)?;
        services.rng = Lcg::restore(rng_state);

        pm.transfer_value_map("globals", globals.entries_mut())?;

        let mut count = 0u32;
        pm.transfer_u32("script_count", &mut count)?;
        for _ in 0..count {
            let mut path = SharedStr::from("");
            pm.transfer_shared_str("image", &mut path)?;
            let image = acquire_image(cache, &path)?;
            let mut script = ScriptInstance::new(image, 0, None);

            pm.transfer_u64("thread", &mut script.thread)?;
            pm.transfer_u32("ip", &mut script.ip)?;
            pm.transfer_bool("paused", &mut script.paused)?;
            let mut tag = 0u8;
            let mut payload = 0u64;
            pm.transfer_u8("state", &mut tag)?;
            pm.transfer_u64("state_arg", &mut payload)?;
            script.state = state_from_parts(tag, payload)?;
            pm.transfer_value("this", &mut script.this)?;
            let mut owner = None;
            pm.transfer_opt_u64("owner", &mut owner)?;
            script.owner = owner.map(ObjectHandle::new);
            let mut stack = Vec::new();
            pm.transfer_value_vec("stack", &mut stack)?;
            script.stack = OperandStack::restore(stack);
            let mut frame_count = 0u32;
            pm.transfer_u32("frame_count", &mut frame_count)?;
            let mut frames = Vec::with_capacity(frame_count as usize);
            for _ in 0..frame_count {
                let mut frame = Frame::new(0, Value::Null, Vec::new(), 0);
                transfer_frame(pm, &mut frame)?;
                frames.push(frame);
            }
            script.calls = CallStack::restore(frames);
            scripts.push(script);
        }

        let mut count = 0u32;
        pm.transfer_u32("attachment_count", &mut count)?;
        for _ in 0..count {
            let mut object = 0u64;
            pm.transfer_u64("object", &mut object)?;
            let mut path = SharedStr::from("");
            pm.transfer_shared_str("image", &mut path)?;
            let mut filter = None;
            transfer_opt_string(pm, &mut filter)?;
            attachments.push(Attachment {
                object: ObjectHandle::new(object),
                image: acquire_image(cache, &path)?,
                event: filter,
            });
        }

        let mut count = 0u32;
        pm.transfer_u32("event_count", &mut count)?;
        for _ in 0..count {
            let mut object = 0u64;
            pm.transfer_u64("object", &mut object)?;
            let mut name = String::new();
            pm.transfer_string("name", &mut name)?;
            let mut payload = Vec::new();
            pm.transfer_value_vec("payload", &mut payload)?;
            queue.push_back(QueuedEvent {
                object: ObjectHandle::new(object),
                name,
                payload,
            });
        }
    }
    Ok(scheduler)
}

fn transfer_frame(pm: &mut Persistor<'_>, frame: &mut Frame) -> PersistResult<()> {
    pm.transfer_u32("return_ip", &mut frame.return_ip)?;
    pm.transfer_value("saved_this", &mut frame.saved_this)?;
    pm.transfer_value_vec("locals", &mut frame.locals)?;
    let mut watermark = frame.watermark as u32;
    pm.transfer_u32("watermark", &mut watermark)?;
    frame.watermark = watermark as usize;
    Ok(())
}

fn transfer_opt_string(pm: &mut Persistor<'_>, value: &mut Option<String>) -> PersistResult<()> {
    let mut present = value.is_some();
    pm.transfer_bool("present", &mut present)?;
    if present {
        let mut text = value.clone().unwrap_or_default();
        pm.transfer_string("text", &mut text)?;
        *value = Some(text);
    } else {
        *value = None;
    }
    Ok(())
}

fn acquire_image(cache: &ResourceCache, path: &str) -> PersistResult<Arc<ScriptImage>> {
    let handle = cache
        .acquire::<ScriptImage>(path)
        .map_err(|err| PersistError::Corrupt(format!("script image '{path}': {err}")))?;
    handle
        .get()
        .map_err(|err| PersistError::Corrupt(format!("script image '{path}': {err}")))
}

// ----- save-slot store -----

/// Sidecar metadata written next to each slot for save/load UI listings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlotMetadata {
    pub slot_id: u16,
    pub quick: bool,
    pub updated_unix_ms: u64,
    pub description: String,
    pub save_crc32: u32,
    pub sha256: String,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SlotEntry {
    pub metadata: SlotMetadata,
    pub path: PathBuf,
}

#[derive(Debug, Error)]
pub enum SlotStoreError {
    #[error("save store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("save store metadata error: {0}")]
    Metadata(String),
    #[error("save slot recovery failed: primary {primary}, backup {}", .backup.as_deref().unwrap_or("missing"))]
    RecoveryFailed {
        primary: String,
        backup: Option<String>,
    },
}

/// Numbered save slots plus a quicksave, under one root directory.
/// Writes are atomic (temp file + rename) and keep a `.bak` of the
/// previous contents, which `load_slot` falls back to when the primary
/// fails its checksum.
#[derive(Debug)]
pub struct SaveSlotStore {
    root: PathBuf,
}

impl SaveSlotStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn ensure_layout(&self) -> Result<(), SlotStoreError> {
        fs::create_dir_all(self.root.join("slots"))?;
        fs::create_dir_all(self.root.join("meta"))?;
        Ok(())
    }

    pub fn save_slot(
        &self,
        slot_id: u16,
        bytes: &[u8],
        description: &str,
    ) -> Result<SlotEntry, SlotStoreError> {
        self.write_slot(slot_id, false, bytes, description)
    }

    pub fn quicksave(&self, bytes: &[u8], description: &str) -> Result<SlotEntry, SlotStoreError> {
        self.write_slot(0, true, bytes, description)
    }

    pub fn load_slot(&self, slot_id: u16) -> Result<Vec<u8>, SlotStoreError> {
        self.read_slot(slot_id, false)
    }

    pub fn quickload(&self) -> Result<Vec<u8>, SlotStoreError> {
        self.read_slot(0, true)
    }

    pub fn remove_slot(&self, slot_id: u16) -> Result<(), SlotStoreError> {
        let slot = self.slot_path(slot_id, false);
        let meta = self.metadata_path(slot_id, false);
        if slot.exists() {
            fs::remove_file(slot)?;
        }
        if meta.exists() {
            fs::remove_file(meta)?;
        }
        Ok(())
    }

    /// Slots newest-first by update time.
    pub fn list_slots(&self) -> Result<Vec<SlotEntry>, SlotStoreError> {
        self.ensure_layout()?;
        let mut entries = Vec::new();
        for entry in fs::read_dir(self.root.join("meta"))? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("json") {
                continue;
            }
            let bytes = fs::read(&path)?;
            let metadata: SlotMetadata = serde_json::from_slice(&bytes)
                .map_err(|err| SlotStoreError::Metadata(err.to_string()))?;
            let slot_path = self.slot_path(metadata.slot_id, metadata.quick);
            if slot_path.exists() {
                entries.push(SlotEntry {
                    metadata,
                    path: slot_path,
                });
            }
        }
        entries.sort_by(|a, b| b.metadata.updated_unix_ms.cmp(&a.metadata.updated_unix_ms));
        Ok(entries)
    }

    fn write_slot(
        &self,
        slot_id: u16,
        quick: bool,
        bytes: &[u8],
        description: &str,
    ) -> Result<SlotEntry, SlotStoreError> {
        self.ensure_layout()?;
        let slot_path = self.slot_path(slot_id, quick);
        atomic_write(&slot_path, bytes)?;

        let metadata = SlotMetadata {
            slot_id,
            quick,
            updated_unix_ms: now_unix_ms(),
            description: description.to_string(),
            save_crc32: crc32fast::hash(bytes),
            sha256: sha256_hex(bytes),
        };
        let metadata_path = self.metadata_path(slot_id, quick);
        let json = serde_json::to_vec_pretty(&metadata)
            .map_err(|err| SlotStoreError::Metadata(err.to_string()))?;
        atomic_write(&metadata_path, &json)?;
        Ok(SlotEntry {
            metadata,
            path: slot_path,
        })
    }

    fn read_slot(&self, slot_id: u16, quick: bool) -> Result<Vec<u8>, SlotStoreError> {
        let slot_path = self.slot_path(slot_id, quick);
        let metadata_path = self.metadata_path(slot_id, quick);
        let expected_crc = fs::read(&metadata_path)
            .ok()
            .and_then(|bytes| serde_json::from_slice::<SlotMetadata>(&bytes).ok())
            .map(|metadata| metadata.save_crc32);

        let primary = fs::read(&slot_path)?;
        match check_crc(&primary, expected_crc) {
            Ok(()) => Ok(primary),
            Err(primary_err) => {
                let backup_path = backup_path(&slot_path);
                match fs::read(&backup_path) {
                    Ok(backup) => Ok(backup),
                    Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                        Err(SlotStoreError::RecoveryFailed {
                            primary: primary_err,
                            backup: None,
                        })
                    }
                    Err(err) => Err(SlotStoreError::RecoveryFailed {
                        primary: primary_err,
                        backup: Some(err.to_string()),
                    }),
                }
            }
        }
    }

    fn slot_path(&self, slot_id: u16, quick: bool) -> PathBuf {
        if quick {
            self.root.join("slots").join("quicksave.wsav")
        } else {
            self.root
                .join("slots")
                .join(format!("slot_{slot_id:03}.wsav"))
        }
    }

    fn metadata_path(&self, slot_id: u16, quick: bool) -> PathBuf {
        if quick {
            self.root.join("meta").join("quicksave.json")
        } else {
            self.root.join("meta").join(format!("slot_{slot_id:03}.json"))
        }
    }
}

fn check_crc(bytes: &[u8], expected: Option<u32>) -> Result<(), String> {
    match expected {
        Some(expected) if crc32fast::hash(bytes) != expected => {
            Err(format!("crc mismatch, expected {expected:08x}"))
        }
        _ => Ok(()),
    }
}

fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), SlotStoreError> {
    if path.exists() {
        fs::copy(path, backup_path(path))?;
    }
    let tmp = path.with_extension("tmp");
    fs::write(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn backup_path(path: &Path) -> PathBuf {
    let mut out = path.as_os_str().to_os_string();
    out.push(".bak");
    PathBuf::from(out)
}

fn now_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    digest.iter().map(|byte| format!("{byte:02x}")).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ActorData, EntityData, Region, WaypointGroup};

    #[test]
    fn value_transfer_roundtrips_every_variant() {
        let mut original = vec![
            Value::Null,
            Value::Bool(true),
            Value::Int(-5),
            Value::Float(3.25),
            Value::string("door key"),
            Value::Object(ObjectHandle::new(17)),
            Value::Array(vec![Value::Int(1), Value::Array(vec![Value::string("x")])]),
        ];
        let mut pm = Persistor::saver();
        pm.transfer_value_vec("values", &mut original).expect("save");
        let bytes = pm.finish();

        let mut loaded = Vec::new();
        let mut pm = Persistor::loader(&bytes);
        pm.transfer_value_vec("values", &mut loaded).expect("load");
        pm.finish_load().expect("fully consumed");

        assert_eq!(loaded.len(), original.len());
        for (a, b) in loaded.iter().zip(&original) {
            assert!(a.strict_equals(b), "{a:?} != {b:?}");
        }
    }

    fn sample_world() -> World {
        let mut world = World::new();
        let scene = world.create(
            ObjectKind::Scene(SceneData {
                width: 640,
                height: 480,
                regions: vec![Region {
                    name: Some(SharedStr::from("pond")),
                    points: vec![Point::new(0, 0), Point::new(8, 0), Point::new(4, 6)],
                    blocked: true,
                }],
                waypoints: vec![WaypointGroup {
                    name: None,
                    points: vec![Point::new(10, 10)],
                }],
                scale_levels: vec![ScaleLevel { y: 400, scale: 800 }],
            }),
            Some("town"),
            None,
        );
        let actor = world.create(
            ObjectKind::Actor(ActorData::default()),
            Some("hero"),
            Some(scene),
        );
        world.set_property(actor, "mood", Value::string("wary"));
        let door = world.create(
            ObjectKind::Entity(EntityData::default()),
            Some("door"),
            Some(scene),
        );
        world.set_property(door, "locked", Value::Bool(true));
        world
    }

    #[test]
    fn world_roundtrip_is_byte_stable() {
        let mut world = sample_world();
        let mut pm = Persistor::saver();
        transfer_world(&mut pm, &mut world).expect("save");
        let first = pm.finish();

        let mut loaded = World::new();
        let mut pm = Persistor::loader(&first);
        transfer_world(&mut pm, &mut loaded).expect("load");
        pm.finish_load().expect("consumed");
        validate_world(&loaded).expect("links close");

        let mut pm = Persistor::saver();
        transfer_world(&mut pm, &mut loaded).expect("save again");
        let second = pm.finish();
        assert_eq!(first, second, "save(load(save(w))) must be byte-equal");

        let hero = loaded.find_by_name(loaded.root(), "hero").expect("hero");
        let mood = loaded.get_property(hero, "mood").expect("alive");
        assert!(mood.equals(&Value::string("wary")));
    }

    #[test]
    fn header_version_gates() {
        let header = SaveHeader {
            name: "slot one".to_string(),
            description: "by the pond".to_string(),
            timestamp: 1_700_000_000,
            thumbnail: vec![1, 2, 3],
            ..SaveHeader::default()
        };
        let mut bytes = Vec::new();
        header.encode(&mut bytes);
        let (decoded, consumed) = SaveHeader::decode(&bytes).expect("decode");
        assert_eq!(decoded, header);
        assert_eq!(consumed, bytes.len());

        let mut newer = bytes.clone();
        newer[4..6].copy_from_slice(&(SAVE_FORMAT_VERSION + 1).to_le_bytes());
        assert!(matches!(
            SaveHeader::decode(&newer),
            Err(PersistError::VersionTooNew { .. })
        ));

        let mut older = bytes.clone();
        older[4..6].copy_from_slice(&(SAVE_FORMAT_VERSION - 1).to_le_bytes());
        assert!(matches!(
            SaveHeader::decode(&older),
            Err(PersistError::VersionTooOld { .. })
        ));

        bytes[0] = 0;
        let err = SaveHeader::decode(&bytes).expect_err("bad magic");
        assert_eq!(SaveLoadResult::from(&err), SaveLoadResult::Corrupt);
    }

    #[test]
    fn corrupt_bodies_are_rejected() {
        let mut world = sample_world();
        let header = SaveHeader::default();
        let mut scheduler = Scheduler::new(1);
        let bytes = save_game(&header, &mut world, &mut scheduler).expect("save");

        let vfs = Arc::new(wintermute_assets::Vfs::new());
        let cache = ResourceCache::new(vfs, 1 << 20);
        assert!(load_game(&bytes[..bytes.len() - 3], &cache).is_err());

        let mut truncated_graph = bytes.clone();
        truncated_graph.extend_from_slice(&[0, 0]);
        assert!(load_game(&truncated_graph, &cache).is_err());
    }

    #[test]
    fn slot_store_roundtrip_backup_and_listing() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = SaveSlotStore::new(dir.path().to_path_buf());

        let first = b"first save".to_vec();
        let second = b"second save".to_vec();
        store.save_slot(1, &first, "chapter 1").expect("save 1");
        store.save_slot(1, &second, "chapter 1b").expect("save 1 again");
        assert_eq!(store.load_slot(1).expect("load"), second);

        // Corrupt the primary; the backup carries the previous write.
        std::fs::write(store.root().join("slots").join("slot_001.wsav"), b"junk")
            .expect("corrupt");
        assert_eq!(store.load_slot(1).expect("recover"), first);

        store.quicksave(b"quick", "autosave").expect("quicksave");
        assert_eq!(store.quickload().expect("quickload"), b"quick");

        let slots = store.list_slots().expect("list");
        assert_eq!(slots.len(), 2);
        assert!(slots.iter().any(|slot| slot.metadata.quick));
        assert!(slots
            .iter()
            .any(|slot| slot.metadata.description == "chapter 1b"));

        store.remove_slot(1).expect("remove");
        assert!(store.load_slot(1).is_err());
    }
}
