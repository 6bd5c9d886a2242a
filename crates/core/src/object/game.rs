//! The game root object: current scene, inventory, and the string table.

use std::collections::BTreeMap;

use crate::definition::DefinitionFile;
use crate::error::{EngineError, EngineResult};
use crate::host::HostServices;
use crate::object::{item, scene, GameObject, ObjectKind, World};
use crate::scriptable::MethodOutcome;
use crate::value::{ObjectHandle, SharedStr, Value};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct GameData {
    pub caption: Option<SharedStr>,
    pub current_scene: Option<u64>,
    /// Item object ids held by the player, in pickup order.
    pub inventory: Vec<u64>,
    /// Localized text, keyed lower-cased.
    pub strings: BTreeMap<String, String>,
}

pub(crate) fn get(object: &GameObject, name: &str) -> Option<Value> {
    let ObjectKind::Game(data) = &object.kind else {
        return None;
    };
    match name.to_ascii_lowercase().as_str() {
        "caption" => Some(
            data.caption
                .as_ref()
                .map(|caption| Value::String(caption.clone()))
                .unwrap_or(Value::Null),
        ),
        "currentscene" => Some(
            data.current_scene
                .map(|id| Value::Object(ObjectHandle::new(id)))
                .unwrap_or(Value::Null),
        ),
        "inventorycount" => Some(Value::Int(data.inventory.len() as i32)),
        _ => None,
    }
}

pub(crate) fn call(
    world: &mut World,
    handle: ObjectHandle,
    name: &str,
    args: &[Value],
    _services: &mut HostServices,
) -> MethodOutcome {
    match name {
        "changescene" => {
            let target = match args.first() {
                Some(Value::Object(scene)) => world.is_alive(*scene).then_some(*scene),
                Some(Value::String(wanted)) => world.find_by_name(world.root(), wanted),
                _ => None,
            };
            let target = target.filter(|found| {
                matches!(
                    world.get(*found).map(|object| &object.kind),
                    Some(ObjectKind::Scene(_))
                )
            });
            if let Some(object) = world.get_mut(handle) {
                if let ObjectKind::Game(data) = &mut object.kind {
                    data.current_scene = target.map(ObjectHandle::raw);
                }
            }
            MethodOutcome::Value(Value::Bool(target.is_some()))
        }
        "takeitem" => {
            let item = match args.first() {
                Some(Value::Object(item)) => Some(*item),
                Some(Value::String(wanted)) => world.find_by_name(world.root(), wanted),
                _ => None,
            };
            let item = item.filter(|found| {
                matches!(
                    world.get(*found).map(|object| &object.kind),
                    Some(ObjectKind::Item(_))
                )
            });
            let Some(item) = item else {
                return MethodOutcome::Value(Value::Bool(false));
            };
            if let Some(object) = world.get_mut(handle) {
                if let ObjectKind::Game(data) = &mut object.kind {
                    if !data.inventory.contains(&item.raw()) {
                        data.inventory.push(item.raw());
                    }
                }
            }
            MethodOutcome::Value(Value::Bool(true))
        }
        "dropitem" => {
            let Some(item) = args.first().and_then(Value::as_object) else {
                return MethodOutcome::Value(Value::Bool(false));
            };
            let mut removed = false;
            if let Some(object) = world.get_mut(handle) {
                if let ObjectKind::Game(data) = &mut object.kind {
                    let before = data.inventory.len();
                    data.inventory.retain(|&id| id != item.raw());
                    removed = data.inventory.len() != before;
                }
            }
            MethodOutcome::Value(Value::Bool(removed))
        }
        "hasitem" => {
            let Some(object) = world.get(handle) else {
                return MethodOutcome::NotHandled;
            };
            let ObjectKind::Game(data) = &object.kind else {
                return MethodOutcome::NotHandled;
            };
            let has = match args.first() {
                Some(Value::Object(item)) => data.inventory.contains(&item.raw()),
                Some(Value::String(wanted)) => data.inventory.iter().any(|&id| {
                    world
                        .get(ObjectHandle::new(id))
                        .is_some_and(|item| item.name_matches(wanted))
                }),
                _ => false,
            };
            MethodOutcome::Value(Value::Bool(has))
        }
        "getitem" => {
            let index = args.first().map(Value::as_int).unwrap_or(0).max(0) as usize;
            let Some(object) = world.get(handle) else {
                return MethodOutcome::NotHandled;
            };
            let ObjectKind::Game(data) = &object.kind else {
                return MethodOutcome::NotHandled;
            };
            MethodOutcome::Value(
                data.inventory
                    .get(index)
                    .map(|&id| Value::Object(ObjectHandle::new(id)))
                    .unwrap_or(Value::Null),
            )
        }
        "getstring" => {
            let key = args
                .first()
                .map(Value::to_display_string)
                .unwrap_or_default()
                .to_ascii_lowercase();
            let Some(object) = world.get(handle) else {
                return MethodOutcome::NotHandled;
            };
            let ObjectKind::Game(data) = &object.kind else {
                return MethodOutcome::NotHandled;
            };
            MethodOutcome::Value(
                data.strings
                    .get(&key)
                    .map(|text| Value::string(text.clone()))
                    .unwrap_or(Value::Null),
            )
        }
        _ => MethodOutcome::NotHandled,
    }
}

/// Applies a `GAME` definition block to the root object: caption, items,
/// and the string table.
pub fn apply_game_definition(
    world: &mut World,
    file: &DefinitionFile,
    path: &str,
) -> EngineResult<()> {
    let block = file
        .block("GAME")
        .ok_or_else(|| EngineError::definition(path, 0, 0, "no GAME block"))?;
    let root = world.root();

    let caption = block.get_str("CAPTION").map(SharedStr::from);
    let mut strings = BTreeMap::new();
    if let Some(table) = block.child("STRING_TABLE") {
        for entry in &table.entries {
            if let crate::definition::DefEntry::KeyValue { key, values, .. } = entry {
                if let Some(text) = values.first().and_then(|value| value.as_str()) {
                    strings.insert(key.to_ascii_lowercase(), text.to_string());
                }
            }
        }
    }

    if let Some(object) = world.get_mut(root) {
        if let Some(name) = block.get_str("NAME") {
            object.name = Some(SharedStr::from(name));
        }
        if let ObjectKind::Game(data) = &mut object.kind {
            data.caption = caption;
            data.strings.extend(strings);
        }
    }

    for item_block in block.children("ITEM") {
        item::item_from_block(world, item_block, root);
    }
    for scene_block_file in block.children("SCENE") {
        // Inline scenes are rare but legal; reuse the scene builder on a
        // synthetic single-block file.
        let file = DefinitionFile {
            blocks: vec![scene_block_file.clone()],
        };
        scene::scene_from_definition(world, &file, path)?;
    }
    Ok(())
}
