//! Rendering collaborator interface.
//!
//! The concrete blitter lives outside this repository; the runtime only
//! needs a backend that can take an immutable draw list once per frame.
//! The headless backend records the lists, which is what the scenario
//! tests and the `--headless` runtime mode run against.

use wintermute_core::object::{ObjectKind, World};
use wintermute_core::ObjectHandle;

/// One sprite or primitive to draw this frame, already depth-sorted.
#[derive(Clone, Debug, PartialEq)]
pub struct DrawCommand {
    pub object: ObjectHandle,
    pub image: Option<String>,
    pub x: i32,
    pub y: i32,
    /// Per-mille scale from the scene's scale levels.
    pub scale: u32,
    pub priority: i32,
}

/// A frame's draw list: an immutable snapshot the backend may consume on
/// its own thread.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FrameDrawList {
    pub commands: Vec<DrawCommand>,
}

pub trait RenderBackend {
    fn resize(&mut self, width: u32, height: u32);
    fn present(&mut self, frame: &FrameDrawList) -> Result<(), String>;
}

impl<T: RenderBackend + ?Sized> RenderBackend for Box<T> {
    fn resize(&mut self, width: u32, height: u32) {
        (**self).resize(width, height);
    }

    fn present(&mut self, frame: &FrameDrawList) -> Result<(), String> {
        (**self).present(frame)
    }
}

/// Builds the frame's draw list from the visible object tree.
///
/// Order: render priority ascending, then object id, matching the
/// registry's deterministic iteration contract.
pub fn build_draw_list(world: &World) -> FrameDrawList {
    let mut commands = Vec::new();
    for object in world.objects() {
        if !object.visible || !object.active {
            continue;
        }
        let image = match &object.kind {
            ObjectKind::Sprite(sprite) => sprite
                .frames
                .get(sprite.current)
                .map(|frame| frame.image.to_string()),
            ObjectKind::Layer(layer) => layer.image.as_ref().map(|image| image.to_string()),
            _ => continue,
        };
        let scale = enclosing_scale(world, object.parent, object.y);
        commands.push(DrawCommand {
            object: object.handle(),
            image,
            x: object.x,
            y: object.y,
            scale,
            priority: object.priority,
        });
    }
    commands.sort_by(|a, b| {
        a.priority
            .cmp(&b.priority)
            .then(a.object.raw().cmp(&b.object.raw()))
    });
    FrameDrawList { commands }
}

fn enclosing_scale(world: &World, mut parent: Option<u64>, y: i32) -> u32 {
    while let Some(id) = parent {
        let Some(object) = world.get(ObjectHandle::new(id)) else {
            break;
        };
        if let ObjectKind::Scene(scene) = &object.kind {
            return scene.scale_at(y);
        }
        parent = object.parent;
    }
    1000
}

/// Records draw lists instead of rasterizing them.
#[derive(Debug, Default)]
pub struct HeadlessRender {
    pub width: u32,
    pub height: u32,
    pub frames_presented: u64,
    pub last_frame: FrameDrawList,
}

impl HeadlessRender {
    pub fn new() -> Self {
        Self::default()
    }
}

impl RenderBackend for HeadlessRender {
    fn resize(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    fn present(&mut self, frame: &FrameDrawList) -> Result<(), String> {
        self.frames_presented += 1;
        self.last_frame = frame.clone();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wintermute_core::object::{LayerData, SceneData, SpriteData, SpriteFrame};
    use wintermute_core::object::{Point, ScaleLevel};
    use wintermute_core::SharedStr;

    #[test]
    fn draw_list_is_depth_sorted_and_skips_hidden() {
        let mut world = World::new();
        let scene = world.create(
            ObjectKind::Scene(SceneData {
                scale_levels: vec![ScaleLevel { y: 0, scale: 700 }],
                ..SceneData::default()
            }),
            Some("s"),
            None,
        );
        let back = world.create(
            ObjectKind::Layer(LayerData {
                image: Some(SharedStr::from("bg.png")),
                ..LayerData::default()
            }),
            Some("bg"),
            Some(scene),
        );
        let sprite = world.create(
            ObjectKind::Sprite(SpriteData {
                frames: vec![SpriteFrame {
                    image: SharedStr::from("hero.png"),
                    overlays: Vec::new(),
                    delay_ms: 100,
                    hotspot: Point::default(),
                }],
                ..SpriteData::default()
            }),
            Some("hero"),
            Some(scene),
        );
        if let Some(object) = world.get_mut(back) {
            object.priority = -10;
        }
        if let Some(object) = world.get_mut(sprite) {
            object.priority = 5;
        }
        let hidden = world.create(
            ObjectKind::Sprite(SpriteData::default()),
            Some("ghost"),
            Some(scene),
        );
        if let Some(object) = world.get_mut(hidden) {
            object.visible = false;
        }

        let frame = build_draw_list(&world);
        assert_eq!(frame.commands.len(), 2);
        assert_eq!(frame.commands[0].object, back);
        assert_eq!(frame.commands[1].object, sprite);
        assert_eq!(frame.commands[1].image.as_deref(), Some("hero.png"));
        assert_eq!(frame.commands[1].scale, 700);
    }

    #[test]
    fn headless_backend_records_frames() {
        let mut backend = HeadlessRender::new();
        backend.resize(640, 480);
        backend.present(&FrameDrawList::default()).expect("present");
        backend.present(&FrameDrawList::default()).expect("present");
        assert_eq!(backend.frames_presented, 2);
        assert_eq!((backend.width, backend.height), (640, 480));
    }
}
