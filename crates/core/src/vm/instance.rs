//! Per-script execution state.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::script::image::ScriptImage;
use crate::value::{ObjectHandle, Value};
use crate::vm::stack::{CallStack, Frame, OperandStack};

/// Cooperative cancellation flag shared with in-flight blocking host
/// calls, so a killed script's pending waits stop waiting instead of
/// pushing a result nobody will read.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScriptState {
    /// Runnable next slice.
    Ready,
    /// Currently executing inside `run_slice`.
    Running,
    Sleeping {
        until_ms: u64,
    },
    WaitingForObject {
        object: ObjectHandle,
    },
    WaitingForScript {
        thread: u64,
    },
    Finished,
    Error,
}

impl ScriptState {
    pub fn is_terminal(self) -> bool {
        matches!(self, ScriptState::Finished | ScriptState::Error)
    }
}

/// One live script: an immutable image plus everything mutable about its
/// execution. Plain data, which is what makes cooperative scheduling and
/// persistence of running scripts straightforward.
#[derive(Clone, Debug)]
pub struct ScriptInstance {
    pub image: Arc<ScriptImage>,
    pub ip: u32,
    pub stack: OperandStack,
    pub calls: CallStack,
    pub this: Value,
    pub owner: Option<ObjectHandle>,
    pub state: ScriptState,
    pub thread: u64,
    pub paused: bool,
    pub cancel: CancelToken,
}

impl ScriptInstance {
    /// A fresh instance starting at the file-level entry.
    pub fn new(image: Arc<ScriptImage>, thread: u64, owner: Option<ObjectHandle>) -> Self {
        let mut calls = CallStack::new();
        calls
            .push(Frame::new(0, Value::Null, Vec::new(), 0))
            .expect("first frame always fits");
        Self {
            image,
            ip: 0,
            stack: OperandStack::new(),
            calls,
            this: owner.map(Value::Object).unwrap_or(Value::Null),
            owner,
            state: ScriptState::Ready,
            thread,
            paused: false,
            cancel: CancelToken::new(),
        }
    }

    /// An instance positioned at an event handler entry with the payload
    /// already on its operand stack.
    pub fn at_event(
        image: Arc<ScriptImage>,
        thread: u64,
        owner: ObjectHandle,
        entry: u32,
        payload: &[Value],
    ) -> Self {
        let mut instance = Self::new(image, thread, Some(owner));
        instance.ip = entry;
        instance.this = Value::Object(owner);
        for value in payload {
            let _ = instance.stack.push(value.clone());
        }
        instance
    }

    /// An instance positioned at a method entry. The receiver sits on the
    /// operand stack for the method prologue to bind; arguments are the
    /// frame's locals.
    pub fn at_method(
        image: Arc<ScriptImage>,
        thread: u64,
        receiver: ObjectHandle,
        entry: u32,
        args: Vec<Value>,
    ) -> Self {
        let mut calls = CallStack::new();
        calls
            .push(Frame::new(0, Value::Null, args, 0))
            .expect("first frame always fits");
        let mut stack = OperandStack::new();
        let _ = stack.push(Value::Object(receiver));
        Self {
            image,
            ip: entry,
            stack,
            calls,
            this: Value::Object(receiver),
            owner: Some(receiver),
            state: ScriptState::Ready,
            thread,
            paused: false,
            cancel: CancelToken::new(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }
}
