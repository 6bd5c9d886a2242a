//! Host function registry and the per-engine services scripts reach
//! through it.
//!
//! A host function never blocks the thread. Anything that must wait
//! returns [`HostResult::Suspend`] and the scheduler parks the calling
//! script until the condition clears.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::info;
use wintermute_assets::ResourceCache;

use crate::object::World;
use crate::scriptable::WaitKind;
use crate::value::{ObjectHandle, SharedStr, Value};

/// Deterministic pseudo-random stream. Plain LCG so the state is one u64
/// and persists byte-for-byte in saves.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Lcg {
    state: u64,
}

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Self {
            state: seed | 1,
        }
    }

    pub fn state(&self) -> u64 {
        self.state
    }

    pub fn restore(state: u64) -> Self {
        Self { state }
    }

    pub fn next_u32(&mut self) -> u32 {
        // Knuth's MMIX multiplier.
        self.state = self
            .state
            .wrapping_mul(6_364_136_223_846_793_005)
            .wrapping_add(1_442_695_040_888_963_407);
        (self.state >> 32) as u32
    }

    /// Uniform value in `[low, high]` inclusive.
    pub fn range(&mut self, low: i32, high: i32) -> i32 {
        if high <= low {
            return low;
        }
        let span = (i64::from(high) - i64::from(low) + 1) as u64;
        low.wrapping_add((u64::from(self.next_u32()) % span) as i32)
    }
}

/// Side effects queued for the frame loop's collaborators.
#[derive(Clone, Debug, PartialEq)]
pub enum HostCommand {
    PlaySound { path: SharedStr },
    Speech {
        actor: ObjectHandle,
        text: SharedStr,
        duration_ms: u64,
    },
    Quit,
}

/// Mutable engine services available during a tick: the wall clock, the
/// deterministic RNG, captured `Print` output, queued collaborator
/// commands, and (when wired) the resource cache.
pub struct HostServices {
    pub clock_ms: u64,
    pub rng: Lcg,
    pub printed: Vec<String>,
    pub commands: Vec<HostCommand>,
    pub cache: Option<Arc<ResourceCache>>,
}

impl std::fmt::Debug for HostServices {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostServices")
            .field("clock_ms", &self.clock_ms)
            .field("printed", &self.printed.len())
            .field("commands", &self.commands.len())
            .field("cache", &self.cache.is_some())
            .finish()
    }
}

impl HostServices {
    pub fn new(seed: u64) -> Self {
        Self {
            clock_ms: 0,
            rng: Lcg::new(seed),
            printed: Vec::new(),
            commands: Vec::new(),
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResourceCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn drain_printed(&mut self) -> Vec<String> {
        std::mem::take(&mut self.printed)
    }

    pub fn drain_commands(&mut self) -> Vec<HostCommand> {
        std::mem::take(&mut self.commands)
    }
}

/// Outcome of one host call.
#[derive(Clone, Debug)]
pub enum HostResult {
    Value(Value),
    Suspend(WaitKind),
    Error(String),
}

pub type HostFn = fn(&mut World, &mut HostServices, &[Value]) -> HostResult;

/// Named host functions scripts call as externals. Lookup is
/// case-insensitive; a miss at call time is a script runtime error.
pub struct HostRegistry {
    fns: HashMap<String, HostFn>,
}

impl HostRegistry {
    pub fn new() -> Self {
        Self {
            fns: HashMap::new(),
        }
    }

    /// Registry preloaded with the engine built-ins.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register("Print", host_print);
        registry.register("Abs", host_abs);
        registry.register("Random", host_random);
        registry.register("ToString", host_to_string);
        registry.register("ToInt", host_to_int);
        registry.register("ToFloat", host_to_float);
        registry.register("GetMilliseconds", host_get_milliseconds);
        registry.register("PlaySound", host_play_sound);
        registry.register("QuitGame", host_quit_game);
        registry
    }

    pub fn register(&mut self, name: &str, function: HostFn) {
        self.fns.insert(name.to_ascii_lowercase(), function);
    }

    pub fn lookup(&self, name: &str) -> Option<HostFn> {
        self.fns.get(&name.to_ascii_lowercase()).copied()
    }
}

impl Default for HostRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

fn host_print(_world: &mut World, services: &mut HostServices, args: &[Value]) -> HostResult {
    let mut line = String::new();
    for arg in args {
        line.push_str(&arg.to_display_string());
    }
    info!(target: "script", "{line}");
    services.printed.push(line);
    HostResult::Value(Value::Null)
}

fn host_abs(_world: &mut World, _services: &mut HostServices, args: &[Value]) -> HostResult {
    match args.first() {
        Some(Value::Float(value)) => HostResult::Value(Value::Float(value.abs())),
        Some(other) => HostResult::Value(Value::Int(other.as_int().wrapping_abs())),
        None => HostResult::Error("Abs expects one argument".to_string()),
    }
}

fn host_random(_world: &mut World, services: &mut HostServices, args: &[Value]) -> HostResult {
    let (low, high) = match args {
        [low, high] => (low.as_int(), high.as_int()),
        [high] => (0, high.as_int()),
        _ => return HostResult::Error("Random expects (min, max) or (max)".to_string()),
    };
    HostResult::Value(Value::Int(services.rng.range(low, high)))
}

fn host_to_string(_world: &mut World, _services: &mut HostServices, args: &[Value]) -> HostResult {
    match args.first() {
        Some(value) => HostResult::Value(Value::string(value.to_display_string())),
        None => HostResult::Value(Value::string("")),
    }
}

fn host_to_int(_world: &mut World, _services: &mut HostServices, args: &[Value]) -> HostResult {
    HostResult::Value(Value::Int(args.first().map(Value::as_int).unwrap_or(0)))
}

fn host_to_float(_world: &mut World, _services: &mut HostServices, args: &[Value]) -> HostResult {
    HostResult::Value(Value::Float(args.first().map(Value::as_float).unwrap_or(0.0)))
}

fn host_get_milliseconds(
    _world: &mut World,
    services: &mut HostServices,
    _args: &[Value],
) -> HostResult {
    HostResult::Value(Value::Int(services.clock_ms as i32))
}

fn host_play_sound(_world: &mut World, services: &mut HostServices, args: &[Value]) -> HostResult {
    match args.first() {
        Some(Value::String(path)) => {
            services.commands.push(HostCommand::PlaySound {
                path: path.clone(),
            });
            HostResult::Value(Value::Bool(true))
        }
        _ => HostResult::Error("PlaySound expects a path string".to_string()),
    }
}

fn host_quit_game(_world: &mut World, services: &mut HostServices, _args: &[Value]) -> HostResult {
    services.commands.push(HostCommand::Quit);
    HostResult::Value(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rng_is_deterministic_and_bounded() {
        let mut a = Lcg::new(42);
        let mut b = Lcg::new(42);
        for _ in 0..100 {
            let roll = a.range(1, 6);
            assert_eq!(roll, b.range(1, 6));
            assert!((1..=6).contains(&roll));
        }
        assert_eq!(a.range(5, 5), 5);
        assert_eq!(a.range(9, 3), 9);
    }

    #[test]
    fn registry_lookup_ignores_case() {
        let registry = HostRegistry::with_builtins();
        assert!(registry.lookup("print").is_some());
        assert!(registry.lookup("PRINT").is_some());
        assert!(registry.lookup("NoSuchFn").is_none());
    }

    #[test]
    fn print_captures_joined_arguments() {
        let registry = HostRegistry::with_builtins();
        let mut world = World::new();
        let mut services = HostServices::new(1);
        let print = registry.lookup("Print").expect("builtin");
        print(
            &mut world,
            &mut services,
            &[Value::string("hp="), Value::Int(10)],
        );
        assert_eq!(services.drain_printed(), ["hp=10"]);
    }
}
