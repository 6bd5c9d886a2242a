//! Scenes and layers: walkable geometry, waypoint routing, scale levels,
//! and construction from definition files.

use crate::definition::{DefBlock, DefEntry, DefinitionFile};
use crate::error::{EngineError, EngineResult};
use crate::host::HostServices;
use crate::object::{
    actor, sprite, EntityData, GameObject, ObjectKind, Point, World,
};
use crate::scriptable::MethodOutcome;
use crate::value::{ObjectHandle, SharedStr, Value};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct SceneData {
    pub width: i32,
    pub height: i32,
    pub regions: Vec<Region>,
    pub waypoints: Vec<WaypointGroup>,
    pub scale_levels: Vec<ScaleLevel>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct LayerData {
    pub width: i32,
    pub height: i32,
    pub image: Option<SharedStr>,
}

/// A polygonal region; blocked regions exclude actors.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Region {
    pub name: Option<SharedStr>,
    pub points: Vec<Point>,
    pub blocked: bool,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct WaypointGroup {
    pub name: Option<SharedStr>,
    pub points: Vec<Point>,
}

/// Actor scale at a given scene depth, per-mille (1000 = 1.0x).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ScaleLevel {
    pub y: i32,
    pub scale: u32,
}

impl SceneData {
    /// True when the point falls inside any blocked region.
    pub fn is_blocked(&self, point: Point) -> bool {
        self.regions
            .iter()
            .filter(|region| region.blocked)
            .any(|region| point_in_polygon(point, &region.points))
    }

    /// Interpolated actor scale at depth `y`, per-mille. Scenes without
    /// scale levels report 1000.
    pub fn scale_at(&self, y: i32) -> u32 {
        let mut levels: Vec<&ScaleLevel> = self.scale_levels.iter().collect();
        if levels.is_empty() {
            return 1000;
        }
        levels.sort_by_key(|level| level.y);
        if y <= levels[0].y {
            return levels[0].scale;
        }
        for pair in levels.windows(2) {
            let (low, high) = (pair[0], pair[1]);
            if y <= high.y {
                let span = i64::from(high.y - low.y);
                if span == 0 {
                    return high.scale;
                }
                let t = i64::from(y - low.y);
                let delta = i64::from(high.scale) - i64::from(low.scale);
                return (i64::from(low.scale) + delta * t / span) as u32;
            }
        }
        levels[levels.len() - 1].scale
    }

    /// True when the straight segment crosses or ends inside a blocked
    /// region.
    pub fn segment_blocked(&self, from: Point, to: Point) -> bool {
        if self.is_blocked(to) {
            return true;
        }
        let midpoint = Point::new((from.x + to.x) / 2, (from.y + to.y) / 2);
        if self.is_blocked(midpoint) {
            return true;
        }
        for region in self.regions.iter().filter(|region| region.blocked) {
            let n = region.points.len();
            for i in 0..n {
                let a = region.points[i];
                let b = region.points[(i + 1) % n];
                if segments_intersect(from, to, a, b) {
                    return true;
                }
            }
        }
        false
    }

    /// Path from `from` to `to`: the direct segment when clear, else a
    /// breadth-first route over the waypoint graph. `None` when the goal
    /// is unreachable.
    pub fn find_path(&self, from: Point, to: Point) -> Option<Vec<Point>> {
        if !self.segment_blocked(from, to) {
            return Some(vec![to]);
        }
        let mut nodes = vec![from, to];
        for group in &self.waypoints {
            nodes.extend(group.points.iter().copied());
        }
        let count = nodes.len();
        // Breadth-first over visibility edges; waypoint counts are small
        // enough that the O(n^2) edge scan is irrelevant.
        let mut previous: Vec<Option<usize>> = vec![None; count];
        let mut queue = std::collections::VecDeque::from([0usize]);
        let mut seen = vec![false; count];
        seen[0] = true;
        while let Some(current) = queue.pop_front() {
            if current == 1 {
                let mut path = Vec::new();
                let mut cursor = 1;
                while cursor != 0 {
                    path.push(nodes[cursor]);
                    cursor = previous[cursor].expect("walk back to start");
                }
                path.reverse();
                return Some(path);
            }
            for next in 0..count {
                if !seen[next] && !self.segment_blocked(nodes[current], nodes[next]) {
                    seen[next] = true;
                    previous[next] = Some(current);
                    queue.push_back(next);
                }
            }
        }
        None
    }
}

/// Ray-cast point-in-polygon; on-edge points count as inside enough for
/// blocking purposes.
pub(crate) fn point_in_polygon(point: Point, polygon: &[Point]) -> bool {
    if polygon.len() < 3 {
        return false;
    }
    let mut inside = false;
    let mut j = polygon.len() - 1;
    for i in 0..polygon.len() {
        let (a, b) = (polygon[i], polygon[j]);
        if (a.y > point.y) != (b.y > point.y) {
            // Cross-product form of the crossing test; no division.
            let lhs = i64::from(point.x - a.x) * i64::from(b.y - a.y);
            let rhs = i64::from(b.x - a.x) * i64::from(point.y - a.y);
            let crosses = if b.y - a.y > 0 { lhs < rhs } else { lhs > rhs };
            if crosses {
                inside = !inside;
            }
        }
        j = i;
    }
    inside
}

fn orientation(a: Point, b: Point, c: Point) -> i64 {
    i64::from(b.x - a.x) * i64::from(c.y - a.y) - i64::from(b.y - a.y) * i64::from(c.x - a.x)
}

fn on_segment(a: Point, b: Point, p: Point) -> bool {
    p.x >= a.x.min(b.x) && p.x <= a.x.max(b.x) && p.y >= a.y.min(b.y) && p.y <= a.y.max(b.y)
}

pub(crate) fn segments_intersect(p1: Point, p2: Point, q1: Point, q2: Point) -> bool {
    let o1 = orientation(p1, p2, q1);
    let o2 = orientation(p1, p2, q2);
    let o3 = orientation(q1, q2, p1);
    let o4 = orientation(q1, q2, p2);
    if (o1 > 0) != (o2 > 0) && (o3 > 0) != (o4 > 0) && o1 != 0 && o2 != 0 && o3 != 0 && o4 != 0 {
        return true;
    }
    (o1 == 0 && on_segment(p1, p2, q1))
        || (o2 == 0 && on_segment(p1, p2, q2))
        || (o3 == 0 && on_segment(q1, q2, p1))
        || (o4 == 0 && on_segment(q1, q2, p2))
}

/// Builds a scene subtree from a parsed `SCENE` definition block.
pub fn scene_from_definition(
    world: &mut World,
    file: &DefinitionFile,
    path: &str,
) -> EngineResult<ObjectHandle> {
    let block = file
        .block("SCENE")
        .ok_or_else(|| EngineError::definition(path, 0, 0, "no SCENE block"))?;

    let mut data = SceneData::default();
    if let Some((width, height)) = block.get_int_pair("SIZE") {
        data.width = width as i32;
        data.height = height as i32;
    }
    for region_block in block.children("REGION") {
        data.regions.push(region_from_block(region_block));
    }
    for waypoint_block in block.children("WAYPOINTS") {
        data.waypoints.push(WaypointGroup {
            name: waypoint_block.get_str("NAME").map(SharedStr::from),
            points: collect_points(waypoint_block),
        });
    }
    for scale_block in block.children("SCALE_LEVEL") {
        data.scale_levels.push(ScaleLevel {
            y: scale_block.get_int("Y").unwrap_or(0) as i32,
            scale: scale_block.get_int("SCALE").unwrap_or(1000).max(0) as u32,
        });
    }

    let name = block.get_str("NAME").unwrap_or("scene");
    let scene = world.create(ObjectKind::Scene(data), Some(name), None);

    for layer_block in block.children("LAYER") {
        let layer_data = LayerData {
            width: layer_block.get_int("WIDTH").unwrap_or(0) as i32,
            height: layer_block.get_int("HEIGHT").unwrap_or(0) as i32,
            image: layer_block.get_str("IMAGE").map(SharedStr::from),
        };
        let layer = world.create(
            ObjectKind::Layer(layer_data),
            layer_block.get_str("NAME"),
            Some(scene),
        );
        for entity_block in layer_block.children("ENTITY") {
            entity_from_block(world, entity_block, layer, path);
        }
    }
    // Entities may also sit directly under the scene.
    for entity_block in block.children("ENTITY") {
        entity_from_block(world, entity_block, scene, path);
    }
    for actor_block in block.children("ACTOR") {
        actor::actor_from_block(world, actor_block, scene);
    }

    for entry in &block.entries {
        if let DefEntry::KeyValue { key, line, .. } = entry {
            if !known_scene_key(key) {
                crate::definition::warn_unknown_key(path, "SCENE", key, *line);
            }
        }
    }
    Ok(scene)
}

fn known_scene_key(key: &str) -> bool {
    ["NAME", "SIZE", "CAPTION"]
        .iter()
        .any(|known| known.eq_ignore_ascii_case(key))
}

fn region_from_block(block: &DefBlock) -> Region {
    Region {
        name: block.get_str("NAME").map(SharedStr::from),
        points: collect_points(block),
        blocked: block.get_bool("BLOCKED").unwrap_or(false),
    }
}

fn collect_points(block: &DefBlock) -> Vec<Point> {
    block
        .entries
        .iter()
        .filter_map(|entry| match entry {
            DefEntry::KeyValue { key, values, .. } if key.eq_ignore_ascii_case("POINT") => {
                match values.as_slice() {
                    [x, y, ..] => Some(Point::new(x.as_int()? as i32, y.as_int()? as i32)),
                    _ => None,
                }
            }
            _ => None,
        })
        .collect()
}

fn entity_from_block(world: &mut World, block: &DefBlock, parent: ObjectHandle, path: &str) {
    let entity = world.create(
        ObjectKind::Entity(EntityData {
            sprite: None,
            interactive: block.get_bool("INTERACTIVE").unwrap_or(true),
        }),
        block.get_str("NAME"),
        Some(parent),
    );
    if let Some(object) = world.get_mut(entity) {
        if let Some((x, y)) = block.get_int_pair("POS") {
            object.x = x as i32;
            object.y = y as i32;
        }
    }
    if let Some(sprite_block) = block.child("SPRITE") {
        let sprite_id = sprite::sprite_from_block(world, sprite_block, entity, path);
        if let Some(object) = world.get_mut(entity) {
            if let ObjectKind::Entity(data) = &mut object.kind {
                data.sprite = Some(sprite_id.raw());
            }
        }
    }
}

pub(crate) fn get(object: &GameObject, name: &str) -> Option<Value> {
    let ObjectKind::Scene(data) = &object.kind else {
        return None;
    };
    match name.to_ascii_lowercase().as_str() {
        "width" => Some(Value::Int(data.width)),
        "height" => Some(Value::Int(data.height)),
        "regioncount" => Some(Value::Int(data.regions.len() as i32)),
        _ => None,
    }
}

pub(crate) fn get_layer(object: &GameObject, name: &str) -> Option<Value> {
    let ObjectKind::Layer(data) = &object.kind else {
        return None;
    };
    match name.to_ascii_lowercase().as_str() {
        "width" => Some(Value::Int(data.width)),
        "height" => Some(Value::Int(data.height)),
        "image" => Some(
            data.image
                .as_ref()
                .map(|image| Value::String(image.clone()))
                .unwrap_or(Value::Null),
        ),
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
        "getentity" => {
            let Some(Value::String(wanted)) = args.first() else {
                return MethodOutcome::Value(Value::Null);
            };
            let found = world.find_by_name(handle, wanted);
            MethodOutcome::Value(found.map(Value::Object).unwrap_or(Value::Null))
        }
        "addentity" => {
            let entity_name = args.first().and_then(|value| match value {
                Value::String(text) => Some(text.to_string()),
                _ => None,
            });
            let entity = world.create(
                ObjectKind::Entity(EntityData::default()),
                entity_name.as_deref(),
                Some(handle),
            );
            MethodOutcome::Value(Value::Object(entity))
        }
        "isblocked" => {
            let point = Point::new(
                args.first().map(Value::as_int).unwrap_or(0),
                args.get(1).map(Value::as_int).unwrap_or(0),
            );
            let blocked = match world.get(handle).map(|object| &object.kind) {
                Some(ObjectKind::Scene(data)) => data.is_blocked(point),
                _ => false,
            };
            MethodOutcome::Value(Value::Bool(blocked))
        }
        "scaleat" => {
            let y = args.first().map(Value::as_int).unwrap_or(0);
            let scale = match world.get(handle).map(|object| &object.kind) {
                Some(ObjectKind::Scene(data)) => data.scale_at(y),
                _ => 1000,
            };
            MethodOutcome::Value(Value::Int(scale as i32))
        }
        _ => MethodOutcome::NotHandled,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn square(x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<Point> {
        vec![
            Point::new(x0, y0),
            Point::new(x1, y0),
            Point::new(x1, y1),
            Point::new(x0, y1),
        ]
    }

    fn scene_with_block() -> SceneData {
        SceneData {
            width: 200,
            height: 200,
            regions: vec![Region {
                name: None,
                points: square(80, 80, 120, 120),
                blocked: true,
            }],
            waypoints: vec![WaypointGroup {
                name: None,
                points: vec![Point::new(100, 50), Point::new(100, 150)],
            }],
            scale_levels: Vec::new(),
        }
    }

    #[test]
    fn point_in_polygon_basics() {
        let poly = square(0, 0, 10, 10);
        assert!(point_in_polygon(Point::new(5, 5), &poly));
        assert!(!point_in_polygon(Point::new(15, 5), &poly));
        assert!(!point_in_polygon(Point::new(-1, -1), &poly));
    }

    #[test]
    fn segment_intersection_basics() {
        assert!(segments_intersect(
            Point::new(0, 0),
            Point::new(10, 10),
            Point::new(0, 10),
            Point::new(10, 0)
        ));
        assert!(!segments_intersect(
            Point::new(0, 0),
            Point::new(1, 1),
            Point::new(5, 5),
            Point::new(6, 5)
        ));
    }

    #[test]
    fn direct_path_when_clear() {
        let scene = scene_with_block();
        let path = scene
            .find_path(Point::new(10, 10), Point::new(60, 10))
            .expect("clear route");
        assert_eq!(path, vec![Point::new(60, 10)]);
    }

    #[test]
    fn routed_path_detours_around_blocked_region() {
        let scene = scene_with_block();
        let from = Point::new(60, 100);
        let to = Point::new(140, 100);
        assert!(scene.segment_blocked(from, to), "direct line crosses block");
        let path = scene.find_path(from, to).expect("route via waypoints");
        assert!(path.len() >= 2, "must detour: {path:?}");
        assert_eq!(*path.last().expect("non-empty"), to);
        for pair in path.windows(2) {
            assert!(!scene.segment_blocked(pair[0], pair[1]));
        }
    }

    #[test]
    fn unreachable_goal_reports_none() {
        let mut scene = scene_with_block();
        // Goal inside the blocked region.
        assert!(scene.find_path(Point::new(10, 10), Point::new(100, 100)).is_none());
        // No waypoints and a wall across the scene.
        scene.waypoints.clear();
        scene.regions[0].points = square(0, 90, 200, 110);
        assert!(scene
            .find_path(Point::new(100, 10), Point::new(100, 190))
            .is_none());
    }

    #[test]
    fn scale_levels_interpolate() {
        let scene = SceneData {
            scale_levels: vec![
                ScaleLevel { y: 100, scale: 500 },
                ScaleLevel { y: 200, scale: 1000 },
            ],
            ..SceneData::default()
        };
        assert_eq!(scene.scale_at(50), 500);
        assert_eq!(scene.scale_at(100), 500);
        assert_eq!(scene.scale_at(150), 750);
        assert_eq!(scene.scale_at(200), 1000);
        assert_eq!(scene.scale_at(300), 1000);
        assert_eq!(SceneData::default().scale_at(123), 1000);
    }

    #[test]
    fn scene_definition_builds_subtree() {
        let text = r#"
SCENE {
    NAME = "town"
    SIZE = 640, 480
    LAYER {
        NAME = "bg"
        WIDTH = 640
        HEIGHT = 480
        ENTITY {
            NAME = "door"
            POS = 100, 200
        }
    }
    REGION {
        NAME = "pond"
        BLOCKED = TRUE
        POINT = 0, 0
        POINT = 10, 0
        POINT = 10, 10
        POINT = 0, 10
    }
    WAYPOINTS {
        POINT = 50, 50
    }
    SCALE_LEVEL {
        Y = 400
        SCALE = 800
    }
}
"#;
        let file = DefinitionFile::parse("town.scene", text).expect("parse");
        let mut world = World::new();
        let scene = scene_from_definition(&mut world, &file, "town.scene").expect("build");

        let object = world.get(scene).expect("scene");
        assert!(object.name_matches("town"));
        let ObjectKind::Scene(data) = &object.kind else {
            panic!("wrong kind");
        };
        assert_eq!((data.width, data.height), (640, 480));
        assert_eq!(data.regions.len(), 1);
        assert_eq!(data.waypoints.len(), 1);
        assert_eq!(data.scale_levels.len(), 1);

        let door = world.find_by_name(scene, "door").expect("door");
        let door_object = world.get(door).expect("alive");
        assert_eq!((door_object.x, door_object.y), (100, 200));
    }
}
