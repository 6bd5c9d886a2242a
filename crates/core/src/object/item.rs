//! Inventory items.

use crate::definition::DefBlock;
use crate::object::{GameObject, ObjectKind, World};
use crate::scriptable::MethodOutcome;
use crate::value::{ObjectHandle, SharedStr, Value};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ItemData {
    pub caption: Option<SharedStr>,
    pub icon: Option<SharedStr>,
}

pub(crate) fn get(object: &GameObject, name: &str) -> Option<Value> {
    let ObjectKind::Item(data) = &object.kind else {
        return None;
    };
    match name.to_ascii_lowercase().as_str() {
        "caption" => Some(
            data.caption
                .as_ref()
                .map(|caption| Value::String(caption.clone()))
                .unwrap_or(Value::Null),
        ),
        "icon" => Some(
            data.icon
                .as_ref()
                .map(|icon| Value::String(icon.clone()))
                .unwrap_or(Value::Null),
        ),
        _ => None,
    }
}

pub(crate) fn set(object: &mut GameObject, name: &str, value: &Value) -> bool {
    let ObjectKind::Item(data) = &mut object.kind else {
        return false;
    };
    match name.to_ascii_lowercase().as_str() {
        "caption" => {
            data.caption = match value {
                Value::Null => None,
                other => Some(SharedStr::from(other.to_display_string())),
            };
            true
        }
        "icon" => {
            data.icon = match value {
                Value::Null => None,
                other => Some(SharedStr::from(other.to_display_string())),
            };
            true
        }
        _ => false,
    }
}

pub(crate) fn call(
    _world: &mut World,
    _handle: ObjectHandle,
    _name: &str,
    _args: &[Value],
) -> MethodOutcome {
    MethodOutcome::NotHandled
}

/// Builds an item from an `ITEM` definition block.
pub(crate) fn item_from_block(
    world: &mut World,
    block: &DefBlock,
    parent: ObjectHandle,
) -> ObjectHandle {
    world.create(
        ObjectKind::Item(ItemData {
            caption: block.get_str("CAPTION").map(SharedStr::from),
            icon: block.get_str("ICON").map(SharedStr::from),
        }),
        block.get_str("NAME"),
        Some(parent),
    )
}
