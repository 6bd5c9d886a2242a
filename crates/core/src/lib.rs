//! Wintermute engine core: the script engine, the game object model, and
//! the persistence layer that ties them together.
//!
//! The engine is single-threaded and cooperative: one frame loop drives
//! the [`scheduler`], scripts yield only at explicit suspension points,
//! and the VM touches game state exclusively through the scriptable
//! protocol. Assets arrive through the layered filesystem and typed
//! cache in `wintermute-assets`.

pub mod definition;
pub mod error;
pub mod host;
pub mod object;
pub mod persist;
pub mod scheduler;
pub mod script;
pub mod scriptable;
pub mod value;
pub mod version;
pub mod vm;

pub use definition::{DefBlock, DefEntry, DefValue, DefinitionFile};
pub use error::{EngineError, EngineResult};
pub use host::{HostCommand, HostFn, HostRegistry, HostResult, HostServices};
pub use object::{GameObject, ObjectKind, Point, Rect, World};
pub use persist::{
    load_game, save_game, Persist, PersistError, Persistor, SaveHeader, SaveLoadResult,
    SaveSlotStore, SlotEntry, SlotMetadata,
};
pub use scheduler::{Scheduler, SCRIPT_ERROR_EVENT};
pub use script::{compile, ScriptImage};
pub use scriptable::{MethodOutcome, PropertyBag, Scriptable, WaitKind};
pub use value::{ObjectHandle, SharedStr, Value};
pub use vm::{GlobalStore, ScriptInstance, ScriptState, StepOutcome, VmContext};
