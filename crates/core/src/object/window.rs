//! UI windows and their buttons.

use crate::definition::{DefBlock, DefinitionFile};
use crate::error::{EngineError, EngineResult};
use crate::object::{GameObject, ObjectKind, World};
use crate::scriptable::MethodOutcome;
use crate::value::{ObjectHandle, SharedStr, Value};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WindowData {
    pub modal: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ButtonData {
    pub text: SharedStr,
    pub pressed: bool,
    /// Event emitted against the button when it is clicked.
    pub event: Option<SharedStr>,
}

impl Default for ButtonData {
    fn default() -> Self {
        Self {
            text: SharedStr::from(""),
            pressed: false,
            event: None,
        }
    }
}

pub(crate) fn get(object: &GameObject, name: &str) -> Option<Value> {
    let ObjectKind::Window(data) = &object.kind else {
        return None;
    };
    match name.to_ascii_lowercase().as_str() {
        "modal" => Some(Value::Bool(data.modal)),
        "buttoncount" => Some(Value::Int(object.children.len() as i32)),
        _ => None,
    }
}

pub(crate) fn get_button(object: &GameObject, name: &str) -> Option<Value> {
    let ObjectKind::Button(data) = &object.kind else {
        return None;
    };
    match name.to_ascii_lowercase().as_str() {
        "text" => Some(Value::String(data.text.clone())),
        "pressed" => Some(Value::Bool(data.pressed)),
        "event" => Some(
            data.event
                .as_ref()
                .map(|event| Value::String(event.clone()))
                .unwrap_or(Value::Null),
        ),
        _ => None,
    }
}

pub(crate) fn set_button(object: &mut GameObject, name: &str, value: &Value) -> bool {
    let ObjectKind::Button(data) = &mut object.kind else {
        return false;
    };
    match name.to_ascii_lowercase().as_str() {
        "text" => {
            data.text = SharedStr::from(value.to_display_string());
            true
        }
        "event" => {
            data.event = match value {
                Value::Null => None,
                other => Some(SharedStr::from(other.to_display_string())),
            };
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
) -> MethodOutcome {
    match name {
        "show" => {
            if let Some(object) = world.get_mut(handle) {
                object.visible = true;
            }
            MethodOutcome::ok()
        }
        "hide" | "close" => {
            if let Some(object) = world.get_mut(handle) {
                object.visible = false;
            }
            MethodOutcome::ok()
        }
        "addbutton" => {
            let button_name = args.first().and_then(|value| match value {
                Value::String(text) => Some(text.to_string()),
                _ => None,
            });
            let text = args
                .get(1)
                .map(Value::to_display_string)
                .unwrap_or_default();
            let button = world.create(
                ObjectKind::Button(ButtonData {
                    text: SharedStr::from(text),
                    ..ButtonData::default()
                }),
                button_name.as_deref(),
                Some(handle),
            );
            MethodOutcome::Value(Value::Object(button))
        }
        "getbutton" => {
            let Some(Value::String(wanted)) = args.first() else {
                return MethodOutcome::Value(Value::Null);
            };
            let found = world.find_by_name(handle, wanted);
            MethodOutcome::Value(found.map(Value::Object).unwrap_or(Value::Null))
        }
        _ => MethodOutcome::NotHandled,
    }
}

pub(crate) fn call_button(
    world: &mut World,
    handle: ObjectHandle,
    name: &str,
    args: &[Value],
) -> MethodOutcome {
    let Some(object) = world.get_mut(handle) else {
        return MethodOutcome::NotHandled;
    };
    let ObjectKind::Button(data) = &mut object.kind else {
        return MethodOutcome::NotHandled;
    };
    match name {
        "press" => {
            data.pressed = true;
            MethodOutcome::ok()
        }
        "release" => {
            data.pressed = false;
            MethodOutcome::ok()
        }
        "settext" => {
            data.text = SharedStr::from(
                args.first()
                    .map(Value::to_display_string)
                    .unwrap_or_default(),
            );
            MethodOutcome::ok()
        }
        _ => MethodOutcome::NotHandled,
    }
}

/// Builds a window subtree from a `WINDOW` definition block.
pub fn window_from_definition(
    world: &mut World,
    file: &DefinitionFile,
    path: &str,
) -> EngineResult<ObjectHandle> {
    let block = file
        .block("WINDOW")
        .ok_or_else(|| EngineError::definition(path, 0, 0, "no WINDOW block"))?;
    let window = world.create(
        ObjectKind::Window(WindowData {
            modal: block.get_bool("MODAL").unwrap_or(false),
        }),
        block.get_str("NAME"),
        None,
    );
    if let Some(object) = world.get_mut(window) {
        if let Some((x, y)) = block.get_int_pair("POS") {
            object.x = x as i32;
            object.y = y as i32;
        }
        object.visible = block.get_bool("VISIBLE").unwrap_or(true);
    }
    for button_block in block.children("BUTTON") {
        button_from_block(world, button_block, window);
    }
    Ok(window)
}

fn button_from_block(world: &mut World, block: &DefBlock, parent: ObjectHandle) -> ObjectHandle {
    let button = world.create(
        ObjectKind::Button(ButtonData {
            text: SharedStr::from(block.get_str("TEXT").unwrap_or("")),
            pressed: false,
            event: block.get_str("EVENT").map(SharedStr::from),
        }),
        block.get_str("NAME"),
        Some(parent),
    );
    if let Some(object) = world.get_mut(button) {
        if let Some((x, y)) = block.get_int_pair("POS") {
            object.x = x as i32;
            object.y = y as i32;
        }
    }
    button
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::definition::DefinitionFile;

    #[test]
    fn window_definition_with_buttons() {
        let text = r#"
WINDOW {
    NAME = "main_menu"
    POS = 200, 120
    MODAL = TRUE
    BUTTON {
        NAME = "new_game"
        TEXT = "New Game"
        POS = 20, 40
        EVENT = "NewGame"
    }
    BUTTON {
        NAME = "quit"
        TEXT = "Quit"
        POS = 20, 80
    }
}
"#;
        let file = DefinitionFile::parse("menu.window", text).expect("parse");
        let mut world = World::new();
        let window = window_from_definition(&mut world, &file, "menu.window").expect("build");

        let object = world.get(window).expect("alive");
        assert!(object.name_matches("main_menu"));
        assert_eq!((object.x, object.y), (200, 120));
        assert_eq!(object.children.len(), 2);

        let quit = world.find_by_name(window, "quit").expect("button");
        let quit_object = world.get(quit).expect("alive");
        let ObjectKind::Button(data) = &quit_object.kind else {
            panic!()
        };
        assert_eq!(&*data.text, "Quit");
        assert!(data.event.is_none());
    }

    #[test]
    fn buttons_press_and_retext_through_protocol() {
        let mut world = World::new();
        let window = world.create(ObjectKind::Window(WindowData::default()), Some("w"), None);
        let mut services = crate::host::HostServices::new(1);

        let MethodOutcome::Value(Value::Object(button)) = world.call_method(
            window,
            "AddButton",
            &[Value::string("ok"), Value::string("OK")],
            &mut services,
        ) else {
            panic!("addbutton must return the new button");
        };

        world.call_method(button, "Press", &[], &mut services);
        assert!(matches!(
            world.get_property(button, "pressed"),
            Some(Value::Bool(true))
        ));

        world.call_method(button, "SetText", &[Value::string("Go")], &mut services);
        let text = world.get_property(button, "text").expect("alive");
        assert!(text.equals(&Value::string("Go")));

        world.call_method(window, "Hide", &[], &mut services);
        assert!(!world.get(window).expect("alive").visible);
    }
}
