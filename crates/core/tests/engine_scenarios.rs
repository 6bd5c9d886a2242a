//! End-to-end scenarios: packages feeding the cache, scripts compiled
//! from archive bytes, cooperative scheduling against the object tree,
//! and save round-trips of running games.

use std::path::Path;
use std::sync::Arc;

use wintermute_assets::{PackageWriter, ResourceCache, Vfs};
use wintermute_core::object::{ActorData, EntityData, ObjectKind, SceneData};
use wintermute_core::persist::{load_game, save_game, SaveHeader};
use wintermute_core::script::ScriptImage;
use wintermute_core::{HostRegistry, Scheduler, Value, World};

fn cache_with_disk(root: &Path) -> Arc<ResourceCache> {
    let vfs = Arc::new(Vfs::new());
    vfs.mount_disk(root, 0);
    Arc::new(ResourceCache::new(vfs, 16 << 20))
}

#[test]
fn script_loads_from_a_package_and_runs() {
    let dir = tempfile::tempdir().expect("tempdir");
    let source = br#"
greeting = "hello from the archive";
Print(greeting);
"#;
    let mut writer = PackageWriter::new(5, "game data");
    writer
        .add_entry("scripts/boot.script", source, true)
        .expect("add entry");
    let pkg = dir.path().join("data.pkg");
    writer.finish_to_path(&pkg).expect("write package");

    let vfs = Arc::new(Vfs::new());
    vfs.mount_package(&pkg).expect("mount");
    let cache = Arc::new(ResourceCache::new(vfs, 16 << 20));

    let mut world = World::new();
    let host = HostRegistry::with_builtins();
    let mut scheduler = Scheduler::new(7);
    scheduler
        .load(&cache, "Scripts\\Boot.script", None)
        .expect("load through the layered filesystem");

    scheduler.tick(&mut world, &host, 16);
    assert_eq!(
        scheduler.services_mut().drain_printed(),
        ["hello from the archive"]
    );
    assert!(scheduler
        .globals()
        .get("greeting")
        .equals(&Value::string("hello from the archive")));
}

#[test]
fn precompiled_image_behaves_like_source() {
    let dir = tempfile::tempdir().expect("tempdir");
    let image =
        wintermute_core::compile("scripts/answer.script", "answer = 6 * 7;").expect("compile");
    let script_dir = dir.path().join("scripts");
    std::fs::create_dir_all(&script_dir).expect("mkdir");
    std::fs::write(script_dir.join("answer.script"), image.to_binary()).expect("write image");

    let cache = cache_with_disk(dir.path());
    let mut world = World::new();
    let host = HostRegistry::with_builtins();
    let mut scheduler = Scheduler::new(7);
    scheduler
        .load(&cache, "scripts/answer.script", None)
        .expect("load container form");
    scheduler.tick(&mut world, &host, 16);
    assert!(scheduler.globals().get("answer").equals(&Value::Int(42)));
}

#[test]
fn destroyed_entity_reads_as_null_through_a_scene_lookup() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("scripts")).expect("mkdir");
    std::fs::write(
        dir.path().join("scripts").join("door.script"),
        br#"
e = scene.GetEntity("door");
found = e != null;
Sleep(50);
name = e.Name;
gone = e == null;
"#,
    )
    .expect("write script");

    let cache = cache_with_disk(dir.path());
    let mut world = World::new();
    let scene = world.create(ObjectKind::Scene(SceneData::default()), Some("town"), None);
    let door = world.create(
        ObjectKind::Entity(EntityData::default()),
        Some("door"),
        Some(scene),
    );

    let host = HostRegistry::with_builtins();
    let mut scheduler = Scheduler::new(7);
    scheduler.globals_mut().set("scene", Value::Object(scene));
    scheduler
        .load(&cache, "scripts/door.script", None)
        .expect("load");

    // First tick: the script binds the entity, then sleeps.
    scheduler.tick(&mut world, &host, 16);
    assert!(scheduler.globals().get("found").equals(&Value::Bool(true)));

    // The host destroys the door while the script sleeps.
    world.destroy(door);
    for _ in 0..4 {
        scheduler.tick(&mut world, &host, 16);
    }

    assert!(scheduler.globals().get("name").is_null());
    assert!(scheduler.globals().get("gone").equals(&Value::Bool(true)));
}

fn fresh_game(root: &Path) -> (World, Scheduler, Arc<ResourceCache>) {
    let cache = cache_with_disk(root);
    let mut world = World::new();
    let scene = world.create(
        ObjectKind::Scene(SceneData {
            width: 320,
            height: 200,
            ..SceneData::default()
        }),
        Some("cell"),
        None,
    );
    world.create(
        ObjectKind::Actor(ActorData::default()),
        Some("hero"),
        Some(scene),
    );

    let host = HostRegistry::with_builtins();
    let mut scheduler = Scheduler::new(1234).with_cache(cache.clone());
    let hero = world.find_by_name(world.root(), "hero").expect("hero");
    scheduler.globals_mut().set("hero", Value::Object(hero));
    scheduler
        .load(&cache, "scripts/loop.script", None)
        .expect("load");
    let mut boot_world = world;
    scheduler.tick(&mut boot_world, &host, 0);
    (boot_world, scheduler, cache)
}

#[test]
fn save_round_trip_of_a_running_game_is_byte_stable() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("scripts")).expect("mkdir");
    std::fs::write(
        dir.path().join("scripts").join("loop.script"),
        br#"
ticks = 0;
steps = [0, 0];
while (true) {
    ticks = ticks + 1;
    steps[0] = steps[0] + hero.X;
    Sleep(30);
}
"#,
    )
    .expect("write script");

    let host = HostRegistry::with_builtins();
    let header = SaveHeader {
        name: "autosave".to_string(),
        description: "ten ticks in".to_string(),
        timestamp: 1_722_000_000,
        ..SaveHeader::default()
    };

    // Game one: advance ten ticks, then save.
    let (mut world_a, mut scheduler_a, _cache_a) = fresh_game(dir.path());
    for _ in 0..10 {
        scheduler_a.tick(&mut world_a, &host, 16);
        world_a.update(16, scheduler_a.services_mut());
    }
    let save_a = save_game(&header, &mut world_a, &mut scheduler_a).expect("save a");

    // Game two: fresh boot, load game one's save, save again.
    let (_world_b, _scheduler_b, cache_b) = fresh_game(dir.path());
    let (loaded_header, mut world_c, mut scheduler_c) =
        load_game(&save_a, &cache_b).expect("load");
    assert_eq!(loaded_header.name, "autosave");
    let save_c = save_game(&header, &mut world_c, &mut scheduler_c).expect("save c");
    assert_eq!(save_a, save_c, "loaded state must re-serialize byte-for-byte");

    // Both games keep evolving identically after the load.
    for _ in 0..7 {
        scheduler_a.tick(&mut world_a, &host, 16);
        world_a.update(16, scheduler_a.services_mut());
        scheduler_c.tick(&mut world_c, &host, 16);
        world_c.update(16, scheduler_c.services_mut());
    }
    let later_a = save_game(&header, &mut world_a, &mut scheduler_a).expect("save a later");
    let later_c = save_game(&header, &mut world_c, &mut scheduler_c).expect("save c later");
    assert_eq!(later_a, later_c);
    assert!(scheduler_a.globals().get("ticks").as_int() >= 2);
}

#[test]
fn sleeping_across_a_save_preserves_the_deadline() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("scripts")).expect("mkdir");
    std::fs::write(
        dir.path().join("scripts").join("loop.script"),
        br#"
Print("A");
Sleep(100);
Print("B");
"#,
    )
    .expect("write script");

    let host = HostRegistry::with_builtins();
    let (mut world, mut scheduler, cache) = fresh_game(dir.path());

    scheduler.tick(&mut world, &host, 16);
    assert_eq!(scheduler.services_mut().drain_printed(), ["A"]);

    // Save at clock 16 with 100ms of sleep pending.
    let header = SaveHeader::default();
    let bytes = save_game(&header, &mut world, &mut scheduler).expect("save");
    let (_, mut world2, mut scheduler2) = load_game(&bytes, &cache).expect("load");

    // 5 ticks of 16ms reach clock 96: still sleeping.
    for _ in 0..5 {
        scheduler2.tick(&mut world2, &host, 16);
    }
    assert!(scheduler2.services_mut().drain_printed().is_empty());

    scheduler2.tick(&mut world2, &host, 16);
    assert_eq!(scheduler2.services_mut().drain_printed(), ["B"]);
}

#[test]
fn cache_stats_reflect_shared_script_loads() {
    let dir = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(dir.path().join("scripts")).expect("mkdir");
    std::fs::write(dir.path().join("scripts").join("noop.script"), b"x = 1;")
        .expect("write script");

    let cache = cache_with_disk(dir.path());
    let first = cache
        .acquire::<ScriptImage>("scripts/noop.script")
        .expect("first");
    let second = cache
        .acquire::<ScriptImage>("scripts/noop.script")
        .expect("second");
    assert!(Arc::ptr_eq(
        &first.get().expect("payload"),
        &second.get().expect("payload")
    ));

    let stats = cache.stats();
    assert_eq!(stats.misses, 1);
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entries, 1);
}
