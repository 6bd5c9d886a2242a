//! Runtime layer: wires the filesystem, cache, object tree, and
//! scheduler into one frame loop.
//!
//! The loop is the engine's only driver: input → scheduler tick → object
//! tree update → render present. Renderer and mixer are collaborator
//! interfaces; the bundled implementations are headless so the runtime
//! works the same under tests, CI, and the real backends.

pub mod audio;
pub mod input;
pub mod render;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use thiserror::Error;
use tracing::{info, warn};
use wintermute_assets::{ResourceCache, Vfs};
use wintermute_core::definition::DefinitionFile;
use wintermute_core::object::{game, scene, window};
use wintermute_core::persist::{self, PersistError, SaveHeader, SaveSlotStore, SlotStoreError};
use wintermute_core::{EngineError, HostRegistry, Scheduler, World};

pub use audio::{route_commands, AudioMixer, SilentMixer};
pub use input::{dispatch, pick_object, InputEvent};
pub use render::{build_draw_list, DrawCommand, FrameDrawList, HeadlessRender, RenderBackend};

/// Environment variable that overrides the save directory.
pub const SAVEDIR_ENV: &str = "WME_SAVEDIR";

/// Default soft cap for the resource cache.
const CACHE_SOFT_CAP: usize = 256 << 20;

#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("project file '{0}' not found")]
    ProjectMissing(PathBuf),
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error(transparent)]
    Save(#[from] PersistError),
    #[error(transparent)]
    SlotStore(#[from] SlotStoreError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Startup settings, straight off the command line.
#[derive(Clone, Debug)]
pub struct RuntimeConfig {
    pub project_file: PathBuf,
    pub width: u32,
    pub height: u32,
    pub fullscreen: bool,
    pub save_dir: Option<PathBuf>,
}

impl RuntimeConfig {
    pub fn new(project_file: impl Into<PathBuf>) -> Self {
        Self {
            project_file: project_file.into(),
            width: 800,
            height: 600,
            fullscreen: false,
            save_dir: None,
        }
    }
}

/// The assembled engine: every component constructor-injected, no
/// ambient globals.
pub struct GameRuntime {
    pub vfs: Arc<Vfs>,
    pub cache: Arc<ResourceCache>,
    pub world: World,
    pub scheduler: Scheduler,
    pub host: HostRegistry,
    pub saves: SaveSlotStore,
    quit_requested: bool,
}

impl GameRuntime {
    /// Boots a game: mounts the project directory and every package
    /// beside it, then applies the project's game definition.
    pub fn boot(config: &RuntimeConfig) -> Result<Self, RuntimeError> {
        if !config.project_file.is_file() {
            return Err(RuntimeError::ProjectMissing(config.project_file.clone()));
        }
        let project_dir = config
            .project_file
            .parent()
            .unwrap_or(Path::new("."))
            .to_path_buf();

        let vfs = Arc::new(Vfs::new());
        vfs.mount_disk(&project_dir, i32::MIN);
        for entry in std::fs::read_dir(&project_dir)?.filter_map(Result::ok) {
            let path = entry.path();
            if path.extension().and_then(|ext| ext.to_str()) != Some("pkg") {
                continue;
            }
            // A bad package loses only itself; loose files still serve.
            match vfs.mount_package(&path) {
                Ok(_) => info!(package = %path.display(), "mounted package"),
                Err(err) => warn!(package = %path.display(), error = %err, "skipped package"),
            }
        }

        let cache = Arc::new(ResourceCache::new(vfs.clone(), CACHE_SOFT_CAP));
        let mut world = World::new();
        let host = HostRegistry::with_builtins();
        let seed = 0x5EED_0000 | u64::from(config.width);
        let mut scheduler = Scheduler::new(seed).with_cache(cache.clone());

        let project_name = config
            .project_file
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let project = cache
            .acquire::<DefinitionFile>(&project_name)
            .map_err(EngineError::from)?;
        let project = project.get().map_err(EngineError::from)?;
        apply_project(&project, &project_name, &mut world, &mut scheduler, &cache)?;

        let save_root = save_directory(config, &project_dir);
        Ok(Self {
            vfs,
            cache,
            world,
            scheduler,
            host,
            saves: SaveSlotStore::new(save_root),
            quit_requested: false,
        })
    }

    /// One frame: input, script slices, object updates, then a draw list
    /// for the renderer and the queued commands for the mixer. Returns
    /// false once the game asked to quit.
    pub fn frame(
        &mut self,
        events: &[InputEvent],
        delta_ms: u64,
        renderer: &mut impl RenderBackend,
        mixer: &mut impl AudioMixer,
    ) -> Result<bool, RuntimeError> {
        for &event in events {
            input::dispatch(&self.world, &mut self.scheduler, event);
        }
        self.scheduler.tick(&mut self.world, &self.host, delta_ms);
        self.world.update(delta_ms, self.scheduler.services_mut());

        let commands = self.scheduler.services_mut().drain_commands();
        if audio::route_commands(mixer, &commands) {
            self.quit_requested = true;
        }

        let frame = render::build_draw_list(&self.world);
        if let Err(message) = renderer.present(&frame) {
            warn!(error = %message, "renderer dropped a frame");
        }
        Ok(!self.quit_requested)
    }

    pub fn quit_requested(&self) -> bool {
        self.quit_requested
    }

    /// Serializes the running game into a slot.
    pub fn save_to_slot(&mut self, slot: u16, description: &str) -> Result<(), RuntimeError> {
        let header = SaveHeader {
            name: format!("slot {slot}"),
            description: description.to_string(),
            timestamp: self.scheduler.clock_ms() as i64,
            ..SaveHeader::default()
        };
        let bytes = persist::save_game(&header, &mut self.world, &mut self.scheduler)?;
        self.saves.save_slot(slot, &bytes, description)?;
        Ok(())
    }

    /// Replaces the running game with a slot's contents. The current
    /// state is untouched when loading fails.
    pub fn load_from_slot(&mut self, slot: u16) -> Result<(), RuntimeError> {
        let bytes = self.saves.load_slot(slot)?;
        self.load_save_bytes(&bytes)
    }

    pub fn load_save_bytes(&mut self, bytes: &[u8]) -> Result<(), RuntimeError> {
        let (header, world, mut scheduler) = persist::load_game(bytes, &self.cache)?;
        info!(name = %header.name, clock_ms = scheduler.clock_ms(), "save loaded");
        scheduler.services_mut().cache = Some(self.cache.clone());
        self.world = world;
        self.scheduler = scheduler;
        Ok(())
    }
}

/// `WME_SAVEDIR` wins, then the config, then `saves/` next to the game.
fn save_directory(config: &RuntimeConfig, project_dir: &Path) -> PathBuf {
    if let Ok(dir) = std::env::var(SAVEDIR_ENV) {
        if !dir.is_empty() {
            return PathBuf::from(dir);
        }
    }
    config
        .save_dir
        .clone()
        .unwrap_or_else(|| project_dir.join("saves"))
}

/// Walks the project's GAME definition: caption, items, string table,
/// then the referenced scene, window, and boot-script files.
fn apply_project(
    project: &DefinitionFile,
    project_name: &str,
    world: &mut World,
    scheduler: &mut Scheduler,
    cache: &ResourceCache,
) -> Result<(), RuntimeError> {
    game::apply_game_definition(world, project, project_name)?;
    let Some(block) = project.block("GAME") else {
        return Ok(());
    };

    if let Some(values) = block.values("SCENE") {
        for value in values {
            let Some(path) = value.as_str() else { continue };
            let file = cache
                .acquire::<DefinitionFile>(path)
                .map_err(EngineError::from)?;
            let file = file.get().map_err(EngineError::from)?;
            scene::scene_from_definition(world, &file, path)?;
        }
    }
    if let Some(values) = block.values("WINDOW") {
        for value in values {
            let Some(path) = value.as_str() else { continue };
            let file = cache
                .acquire::<DefinitionFile>(path)
                .map_err(EngineError::from)?;
            let file = file.get().map_err(EngineError::from)?;
            window::window_from_definition(world, &file, path)?;
        }
    }
    if let Some(values) = block.values("SCRIPT") {
        for value in values {
            let Some(path) = value.as_str() else { continue };
            scheduler.load(cache, path, Some(world.root()))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_project(dir: &Path) {
        std::fs::write(
            dir.join("demo.game"),
            br#"
GAME {
    NAME = "demo"
    CAPTION = "Demo Quest"
    SCENE = "scenes/cell.scene"
    SCRIPT = "scripts/boot.script"
}
"#,
        )
        .expect("write project");
        std::fs::create_dir_all(dir.join("scenes")).expect("mkdir");
        std::fs::write(
            dir.join("scenes").join("cell.scene"),
            br#"
SCENE {
    NAME = "cell"
    SIZE = 320, 200
    ENTITY {
        NAME = "cot"
        POS = 40, 120
    }
}
"#,
        )
        .expect("write scene");
        std::fs::create_dir_all(dir.join("scripts")).expect("mkdir");
        std::fs::write(
            dir.join("scripts").join("boot.script"),
            br#"
booted = true;
var cot = Scene.GetEntity("cot");
cot_found = cot != null;
"#,
        )
        .expect("write script");
    }

    fn booted_runtime(dir: &Path) -> GameRuntime {
        write_project(dir);
        let config = RuntimeConfig::new(dir.join("demo.game"));
        let mut runtime = GameRuntime::boot(&config).expect("boot");
        // The boot script reaches the scene through a global.
        let scene = runtime
            .world
            .find_by_name(runtime.world.root(), "cell")
            .expect("scene");
        runtime
            .scheduler
            .globals_mut()
            .set("Scene", wintermute_core::Value::Object(scene));
        runtime
    }

    #[test]
    fn boot_builds_world_and_runs_the_boot_script() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut runtime = booted_runtime(dir.path());

        let mut renderer = HeadlessRender::new();
        let mut mixer = SilentMixer::new();
        let running = runtime
            .frame(&[], 16, &mut renderer, &mut mixer)
            .expect("frame");
        assert!(running);
        assert!(runtime
            .scheduler
            .globals()
            .get("booted")
            .equals(&wintermute_core::Value::Bool(true)));
        assert!(runtime
            .scheduler
            .globals()
            .get("cot_found")
            .equals(&wintermute_core::Value::Bool(true)));
        assert_eq!(renderer.frames_presented, 1);
    }

    #[test]
    fn missing_project_is_a_startup_error() {
        let config = RuntimeConfig::new("/definitely/not/here.game");
        assert!(matches!(
            GameRuntime::boot(&config),
            Err(RuntimeError::ProjectMissing(_))
        ));
    }

    #[test]
    fn save_and_load_through_slots() {
        let dir = tempfile::tempdir().expect("tempdir");
        std::env::remove_var(SAVEDIR_ENV);
        let mut runtime = booted_runtime(dir.path());
        let mut renderer = HeadlessRender::new();
        let mut mixer = SilentMixer::new();

        for _ in 0..5 {
            runtime
                .frame(&[], 16, &mut renderer, &mut mixer)
                .expect("frame");
        }
        runtime.save_to_slot(1, "five frames in").expect("save");
        let clock_at_save = runtime.scheduler.clock_ms();

        for _ in 0..5 {
            runtime
                .frame(&[], 16, &mut renderer, &mut mixer)
                .expect("frame");
        }
        assert!(runtime.scheduler.clock_ms() > clock_at_save);

        runtime.load_from_slot(1).expect("load");
        assert_eq!(runtime.scheduler.clock_ms(), clock_at_save);
    }

    #[test]
    fn quit_command_stops_the_loop() {
        let dir = tempfile::tempdir().expect("tempdir");
        write_project(dir.path());
        std::fs::write(
            dir.path().join("scripts").join("boot.script"),
            b"QuitGame();",
        )
        .expect("rewrite boot script");
        let config = RuntimeConfig::new(dir.path().join("demo.game"));
        let mut runtime = GameRuntime::boot(&config).expect("boot");
        let mut renderer = HeadlessRender::new();
        let mut mixer = SilentMixer::new();

        let running = runtime
            .frame(&[], 16, &mut renderer, &mut mixer)
            .expect("frame");
        assert!(!running);
        assert!(runtime.quit_requested());
    }
}
