//! Input capture is an external collaborator; the runtime consumes a
//! small event vocabulary and turns pointer events into script events on
//! the objects under the cursor.

use wintermute_core::object::{ObjectKind, World};
use wintermute_core::{ObjectHandle, Scheduler, Value};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputEvent {
    PointerMove { x: i32, y: i32 },
    LeftClick { x: i32, y: i32 },
    RightClick { x: i32, y: i32 },
    KeyDown { code: u32 },
}

/// Topmost interactive entity or actor whose bounding box contains the
/// point; ties break toward higher render priority, then newer objects.
pub fn pick_object(world: &World, x: i32, y: i32) -> Option<ObjectHandle> {
    let point = wintermute_core::Point::new(x, y);
    world
        .objects()
        .filter(|object| object.visible && object.active)
        .filter(|object| match &object.kind {
            ObjectKind::Entity(entity) => entity.interactive,
            ObjectKind::Actor(_) | ObjectKind::Button(_) => true,
            _ => false,
        })
        .filter(|object| object.bbox.contains(point))
        .max_by_key(|object| (object.priority, object.id))
        .map(|object| object.handle())
}

/// Routes one input event into the event queue.
pub fn dispatch(world: &World, scheduler: &mut Scheduler, event: InputEvent) {
    match event {
        InputEvent::LeftClick { x, y } => {
            if let Some(target) = pick_object(world, x, y) {
                scheduler.emit_event(target, "LeftClick", vec![Value::Int(x), Value::Int(y)]);
            }
        }
        InputEvent::RightClick { x, y } => {
            if let Some(target) = pick_object(world, x, y) {
                scheduler.emit_event(target, "RightClick", vec![Value::Int(x), Value::Int(y)]);
            }
        }
        InputEvent::KeyDown { code } => {
            scheduler.emit_event(world.root(), "Keypress", vec![Value::Int(code as i32)]);
        }
        InputEvent::PointerMove { .. } => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wintermute_core::object::{EntityData, Rect};

    #[test]
    fn picking_respects_bounds_priority_and_interactivity() {
        let mut world = World::new();
        let make = |world: &mut World, name: &str, priority: i32, interactive: bool| {
            let handle = world.create(
                ObjectKind::Entity(EntityData {
                    interactive,
                    ..EntityData::default()
                }),
                Some(name),
                None,
            );
            if let Some(object) = world.get_mut(handle) {
                object.bbox = Rect {
                    x: 0,
                    y: 0,
                    width: 100,
                    height: 100,
                };
                object.priority = priority;
            }
            handle
        };
        let _under = make(&mut world, "rug", 0, true);
        let over = make(&mut world, "table", 5, true);
        let _inert = make(&mut world, "wall", 9, false);

        assert_eq!(pick_object(&world, 50, 50), Some(over));
        assert_eq!(pick_object(&world, 500, 50), None);
    }
}
