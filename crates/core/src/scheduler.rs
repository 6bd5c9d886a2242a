//! Owns every live script and hands out per-frame time slices.
//!
//! One tick is four phases: advance the clock and wake satisfied waits,
//! run each runnable script round-robin for its instruction budget,
//! collect finished and errored scripts, then drain queued events into
//! fresh handler instances. Handlers spawned by a tick first run in the
//! next tick, which keeps in-tick ordering independent of event volume.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use tracing::{debug, warn};
use wintermute_assets::ResourceCache;

use crate::error::{EngineError, EngineResult};
use crate::host::{HostRegistry, HostServices};
use crate::object::World;
use crate::script::image::ScriptImage;
use crate::value::{ObjectHandle, Value};
use crate::vm::{self, GlobalStore, ScriptInstance, ScriptState, StepOutcome, VmContext};

/// Event raised against a script's owner when that script faults.
pub const SCRIPT_ERROR_EVENT: &str = "ScriptError";

const DEFAULT_BUDGET_PER_SCRIPT: u32 = 1000;

/// A script image attached to an object for event dispatch. With an
/// event filter only that handler fires; without one, every handler in
/// the image's event table does.
#[derive(Clone, Debug)]
pub struct Attachment {
    pub object: ObjectHandle,
    pub image: Arc<ScriptImage>,
    pub event: Option<String>,
}

#[derive(Clone, Debug)]
pub(crate) struct QueuedEvent {
    pub(crate) object: ObjectHandle,
    pub(crate) name: String,
    pub(crate) payload: Vec<Value>,
}

#[derive(Debug)]
pub struct Scheduler {
    scripts: Vec<ScriptInstance>,
    attachments: Vec<Attachment>,
    queue: VecDeque<QueuedEvent>,
    globals: GlobalStore,
    services: HostServices,
    next_thread: u64,
    budget_per_script: u32,
}

impl Scheduler {
    pub fn new(seed: u64) -> Self {
        Self {
            scripts: Vec::new(),
            attachments: Vec::new(),
            queue: VecDeque::new(),
            globals: GlobalStore::new(),
            services: HostServices::new(seed),
            next_thread: 1,
            budget_per_script: DEFAULT_BUDGET_PER_SCRIPT,
        }
    }

    pub fn with_cache(mut self, cache: Arc<ResourceCache>) -> Self {
        self.services.cache = Some(cache);
        self
    }

    pub fn set_budget_per_script(&mut self, budget: u32) {
        self.budget_per_script = budget.max(1);
    }

    pub fn clock_ms(&self) -> u64 {
        self.services.clock_ms
    }

    pub fn globals(&self) -> &GlobalStore {
        &self.globals
    }

    pub fn globals_mut(&mut self) -> &mut GlobalStore {
        &mut self.globals
    }

    pub fn services_mut(&mut self) -> &mut HostServices {
        &mut self.services
    }

    pub fn script(&self, thread: u64) -> Option<&ScriptInstance> {
        self.scripts.iter().find(|script| script.thread == thread)
    }

    pub fn scripts(&self) -> &[ScriptInstance] {
        &self.scripts
    }

    pub fn live_count(&self) -> usize {
        self.scripts.len()
    }

    /// Loads a script through the cache (source or container form) and
    /// starts an instance at its file-level entry.
    pub fn load(
        &mut self,
        cache: &ResourceCache,
        path: &str,
        owner: Option<ObjectHandle>,
    ) -> EngineResult<u64> {
        let handle = cache.acquire::<ScriptImage>(path)?;
        let image = handle.get().map_err(EngineError::from)?;
        Ok(self.spawn(image, owner))
    }

    /// Starts an instance of an already-loaded image.
    pub fn spawn(&mut self, image: Arc<ScriptImage>, owner: Option<ObjectHandle>) -> u64 {
        let thread = self.next_thread;
        self.next_thread += 1;
        self.scripts
            .push(ScriptInstance::new(image, thread, owner));
        thread
    }

    /// Attaches every event handler in the image to the object.
    pub fn attach(&mut self, object: ObjectHandle, image: Arc<ScriptImage>) {
        self.attachments.push(Attachment {
            object,
            image,
            event: None,
        });
    }

    /// Attaches one named handler. Returns false (and attaches nothing)
    /// when the image has no handler for that event.
    pub fn attach_event(
        &mut self,
        object: ObjectHandle,
        event_name: &str,
        image: Arc<ScriptImage>,
    ) -> bool {
        if image.find_event(event_name).is_none() {
            warn!(
                script = %image.source_path,
                event = event_name,
                "attach_event: image has no such handler"
            );
            return false;
        }
        self.attachments.push(Attachment {
            object,
            image,
            event: Some(event_name.to_ascii_lowercase()),
        });
        true
    }

    /// Queues an event; dispatch happens in this tick's drain phase,
    /// FIFO relative to other events of the same tick.
    pub fn emit_event(&mut self, object: ObjectHandle, name: &str, payload: Vec<Value>) {
        self.queue.push_back(QueuedEvent {
            object,
            name: name.to_string(),
            payload,
        });
    }

    /// Starts a script-defined method on the object's attached script.
    /// Returns the new thread, or `None` when no attachment defines it.
    pub fn call_script_method(
        &mut self,
        object: ObjectHandle,
        name: &str,
        args: Vec<Value>,
    ) -> Option<u64> {
        let (image, entry) = self.attachments.iter().find_map(|attachment| {
            if attachment.object != object {
                return None;
            }
            attachment
                .image
                .find_method(name)
                .map(|method| (attachment.image.clone(), method.entry))
        })?;
        let thread = self.next_thread;
        self.next_thread += 1;
        self.scripts
            .push(ScriptInstance::at_method(image, thread, object, entry, args));
        Some(thread)
    }

    pub fn pause(&mut self, thread: u64) -> bool {
        match self.scripts.iter_mut().find(|script| script.thread == thread) {
            Some(script) => {
                script.paused = true;
                true
            }
            None => false,
        }
    }

    pub fn resume(&mut self, thread: u64) -> bool {
        match self.scripts.iter_mut().find(|script| script.thread == thread) {
            Some(script) => {
                script.paused = false;
                true
            }
            None => false,
        }
    }

    /// Finishes a script at its next instruction boundary and signals any
    /// in-flight blocking host call through the cancellation token.
    pub fn kill(&mut self, thread: u64) -> bool {
        match self.scripts.iter_mut().find(|script| script.thread == thread) {
            Some(script) => {
                script.cancel.cancel();
                script.state = ScriptState::Finished;
                true
            }
            None => false,
        }
    }

    /// Split-borrow access for the persistence traversal.
    #[allow(clippy::type_complexity)]
    pub(crate) fn persist_parts(
        &mut self,
    ) -> (
        &mut Vec<ScriptInstance>,
        &mut Vec<Attachment>,
        &mut VecDeque<QueuedEvent>,
        &mut GlobalStore,
        &mut HostServices,
        &mut u64,
    ) {
        let Scheduler {
            scripts,
            attachments,
            queue,
            globals,
            services,
            next_thread,
            ..
        } = self;
        (scripts, attachments, queue, globals, services, next_thread)
    }

    /// One frame's worth of script execution.
    pub fn tick(&mut self, world: &mut World, host: &HostRegistry, delta_ms: u64) {
        self.services.clock_ms += delta_ms;

        // Phase 1: wake scripts whose wait condition cleared.
        let live: HashSet<u64> = self
            .scripts
            .iter()
            .filter(|script| !script.is_terminal())
            .map(|script| script.thread)
            .collect();
        let clock = self.services.clock_ms;
        for script in &mut self.scripts {
            match script.state {
                ScriptState::Sleeping { until_ms } if until_ms <= clock => {
                    script.state = ScriptState::Ready;
                }
                ScriptState::WaitingForObject { object } if world.is_ready(object) => {
                    script.state = ScriptState::Ready;
                }
                ScriptState::WaitingForScript { thread } if !live.contains(&thread) => {
                    script.state = ScriptState::Ready;
                }
                _ => {}
            }
        }

        // Phase 2: round-robin slices in ascending thread order (spawn
        // order is never re-sorted, so the Vec is already ascending).
        let budget = self.budget_per_script;
        for script in &mut self.scripts {
            if script.paused || script.state != ScriptState::Ready {
                continue;
            }
            let mut ctx = VmContext {
                world,
                globals: &mut self.globals,
                host,
                services: &mut self.services,
            };
            let outcome = vm::run_slice(script, &mut ctx, budget);
            if outcome == StepOutcome::Running {
                // Budget exhausted; carry on next tick.
                script.state = ScriptState::Ready;
            }
        }

        // Phase 3: collect the dead, notifying owners of faults.
        let mut error_events = Vec::new();
        for script in &self.scripts {
            if script.state == ScriptState::Error {
                if let Some(owner) = script.owner.filter(|owner| world.is_alive(*owner)) {
                    error_events.push((owner, script.image.source_path.clone()));
                }
            }
        }
        for (owner, path) in error_events {
            self.emit_event(owner, SCRIPT_ERROR_EVENT, vec![Value::String(path)]);
        }
        self.scripts.retain(|script| !script.is_terminal());
        self.attachments
            .retain(|attachment| world.is_alive(attachment.object));

        // Phase 4: drain queued events into handler instances. They run
        // starting next tick.
        while let Some(event) = self.queue.pop_front() {
            if !world.is_alive(event.object) {
                debug!(event = %event.name, "event dropped, target object gone");
                continue;
            }
            let lowered = event.name.to_ascii_lowercase();
            let mut spawned = Vec::new();
            for attachment in &self.attachments {
                if attachment.object != event.object {
                    continue;
                }
                if let Some(filter) = &attachment.event {
                    if *filter != lowered {
                        continue;
                    }
                }
                let Some(handler) = attachment.image.find_event(&event.name) else {
                    continue;
                };
                let thread = self.next_thread;
                self.next_thread += 1;
                spawned.push(ScriptInstance::at_event(
                    attachment.image.clone(),
                    thread,
                    event.object,
                    handler.entry,
                    &event.payload,
                ));
            }
            self.scripts.extend(spawned);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{ActorData, ObjectKind};
    use crate::script::compiler::compile;

    fn image_of(source: &str) -> Arc<ScriptImage> {
        Arc::new(compile("test.script", source).expect("compile"))
    }

    #[test]
    fn sleep_wakes_by_wall_time_not_tick_count() {
        let mut world = World::new();
        let host = HostRegistry::with_builtins();
        let mut scheduler = Scheduler::new(1);
        scheduler.spawn(image_of("Print(\"A\"); Sleep(100); Print(\"B\");"), None);

        scheduler.tick(&mut world, &host, 16);
        assert_eq!(scheduler.services_mut().drain_printed(), ["A"]);

        // The sleep started at clock 16, so the deadline is 116. Six more
        // 16ms ticks reach 112: still sleeping.
        for _ in 0..6 {
            scheduler.tick(&mut world, &host, 16);
        }
        assert!(scheduler.services_mut().drain_printed().is_empty());

        // Crossing the deadline wakes it regardless of tick size.
        scheduler.tick(&mut world, &host, 16);
        assert_eq!(scheduler.services_mut().drain_printed(), ["B"]);
        assert_eq!(scheduler.live_count(), 0, "finished scripts are collected");
    }

    #[test]
    fn round_robin_is_deterministic_in_spawn_order() {
        let mut world = World::new();
        let host = HostRegistry::with_builtins();
        let mut scheduler = Scheduler::new(1);
        scheduler.spawn(image_of("order = order + \"a\"; Yield(); order = order + \"c\";"), None);
        scheduler.spawn(image_of("order = order + \"b\"; Yield(); order = order + \"d\";"), None);
        scheduler.globals_mut().set("order", Value::string(""));

        scheduler.tick(&mut world, &host, 16);
        scheduler.tick(&mut world, &host, 16);
        assert!(scheduler.globals().get("order").equals(&Value::string("abcd")));
    }

    #[test]
    fn events_dispatch_fifo_after_the_runnable_pass() {
        let mut world = World::new();
        let root = world.root();
        let host = HostRegistry::with_builtins();
        let mut scheduler = Scheduler::new(1);

        let handler = image_of(
            "on \"Poke\" { count = count + 1; }\non \"Prod\" { count = count + 10; }",
        );
        scheduler.globals_mut().set("count", Value::Int(0));
        scheduler.attach(root, handler.clone());

        scheduler.emit_event(root, "Poke", Vec::new());
        scheduler.emit_event(root, "Prod", Vec::new());
        scheduler.emit_event(root, "Poke", Vec::new());

        // Tick 1 drains the queue into handler instances.
        scheduler.tick(&mut world, &host, 16);
        assert!(scheduler.globals().get("count").equals(&Value::Int(0)));
        assert_eq!(scheduler.live_count(), 3);

        // Tick 2 runs them.
        scheduler.tick(&mut world, &host, 16);
        assert!(scheduler.globals().get("count").equals(&Value::Int(12)));
        assert_eq!(scheduler.live_count(), 0);
    }

    #[test]
    fn attach_event_filters_to_one_handler() {
        let mut world = World::new();
        let root = world.root();
        let host = HostRegistry::with_builtins();
        let mut scheduler = Scheduler::new(1);

        let handler = image_of(
            "on \"Poke\" { poked = true; }\non \"Prod\" { prodded = true; }",
        );
        assert!(scheduler.attach_event(root, "Poke", handler.clone()));
        assert!(!scheduler.attach_event(root, "Missing", handler.clone()));

        scheduler.emit_event(root, "Prod", Vec::new());
        scheduler.emit_event(root, "Poke", Vec::new());
        scheduler.tick(&mut world, &host, 16);
        scheduler.tick(&mut world, &host, 16);

        assert!(scheduler.globals().get("poked").equals(&Value::Bool(true)));
        assert!(scheduler.globals().get("prodded").is_null());
    }

    #[test]
    fn blocking_walk_resumes_after_arrival() {
        let mut world = World::new();
        let actor = world.create(ObjectKind::Actor(ActorData::default()), Some("hero"), None);
        let host = HostRegistry::with_builtins();
        let mut scheduler = Scheduler::new(1);
        scheduler.globals_mut().set("hero", Value::Object(actor));
        scheduler.spawn(image_of("hero.WalkTo(20, 0); arrived = hero.X;"), None);

        // 100 px/s: 20 px takes 200 ms.
        for _ in 0..14 {
            scheduler.tick(&mut world, &host, 16);
            world.update(16, scheduler.services_mut());
        }
        assert!(
            scheduler.globals().get("arrived").equals(&Value::Int(20)),
            "script resumed after the actor reported ready, got {:?}",
            scheduler.globals().get("arrived")
        );
    }

    #[test]
    fn kill_finishes_scripts_and_fires_cancellation() {
        let mut world = World::new();
        let host = HostRegistry::with_builtins();
        let mut scheduler = Scheduler::new(1);
        let thread = scheduler.spawn(image_of("Sleep(100000); never = true;"), None);

        scheduler.tick(&mut world, &host, 16);
        let cancel = scheduler.script(thread).expect("live").cancel.clone();
        assert!(scheduler.kill(thread));
        assert!(cancel.is_cancelled());

        scheduler.tick(&mut world, &host, 16);
        assert_eq!(scheduler.live_count(), 0);
        assert!(scheduler.globals().get("never").is_null());
    }

    #[test]
    fn faulting_script_notifies_its_owner() {
        let mut world = World::new();
        let root = world.root();
        let host = HostRegistry::with_builtins();
        let mut scheduler = Scheduler::new(1);

        let watcher = image_of("on \"ScriptError\" { saw_error = true; }");
        scheduler.attach(root, watcher);
        scheduler.spawn(image_of("NoSuchFunction();"), Some(root));

        scheduler.tick(&mut world, &host, 16); // faults, queues the event
        scheduler.tick(&mut world, &host, 16); // drained last tick? handler spawned at tick 1 drain
        scheduler.tick(&mut world, &host, 16); // handler runs
        assert!(scheduler.globals().get("saw_error").equals(&Value::Bool(true)));
    }

    #[test]
    fn paused_scripts_keep_their_slice() {
        let mut world = World::new();
        let host = HostRegistry::with_builtins();
        let mut scheduler = Scheduler::new(1);
        let thread = scheduler.spawn(image_of("ran = true;"), None);
        scheduler.pause(thread);

        scheduler.tick(&mut world, &host, 16);
        assert!(scheduler.globals().get("ran").is_null());

        scheduler.resume(thread);
        scheduler.tick(&mut world, &host, 16);
        assert!(scheduler.globals().get("ran").equals(&Value::Bool(true)));
    }

    #[test]
    fn script_methods_start_with_the_receiver_bound() {
        let mut world = World::new();
        let root = world.root();
        let host = HostRegistry::with_builtins();
        let mut scheduler = Scheduler::new(1);

        let image = image_of("method Describe(tag) { described = tag + \":\" + this.Name; }");
        scheduler.attach(root, image);
        let thread =
            scheduler.call_script_method(root, "Describe", vec![Value::string("root")]);
        assert!(thread.is_some());
        scheduler.tick(&mut world, &host, 16);
        assert!(scheduler
            .globals()
            .get("described")
            .equals(&Value::string("root:game")));
    }
}
