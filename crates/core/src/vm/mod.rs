//! The cooperative bytecode interpreter.
//!
//! `step` executes exactly one instruction. Scripts leave the VM only at
//! suspension points (Sleep, Yield, blocking host methods) or when they
//! finish or fault. Runtime faults never unwind into the host: they log a
//! diagnostic with the script's file and source line and park the script
//! in its error state.

pub mod instance;
pub mod stack;

use std::collections::BTreeMap;

use tracing::warn;

pub use instance::{CancelToken, ScriptInstance, ScriptState};
pub use stack::{CallStack, Frame, OperandStack, VmFault};

use crate::host::{HostRegistry, HostResult, HostServices};
use crate::object::World;
use crate::script::opcode::{decode, Instr, VarRef};
use crate::scriptable::{MethodOutcome, WaitKind};
use crate::value::Value;

/// Named globals shared by every script. Keys are case-insensitive;
/// storage is ordered so persistence round-trips byte-for-byte.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct GlobalStore {
    map: BTreeMap<String, Value>,
}

impl GlobalStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Value {
        self.map
            .get(&name.to_ascii_lowercase())
            .cloned()
            .unwrap_or(Value::Null)
    }

    pub fn set(&mut self, name: &str, value: Value) {
        self.map.insert(name.to_ascii_lowercase(), value);
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.map.iter().map(|(key, value)| (key.as_str(), value))
    }

    pub(crate) fn entries_mut(&mut self) -> &mut BTreeMap<String, Value> {
        &mut self.map
    }
}

/// Everything a script touches while executing. The world is reached only
/// through the scriptable protocol calls below.
pub struct VmContext<'a> {
    pub world: &'a mut World,
    pub globals: &'a mut GlobalStore,
    pub host: &'a HostRegistry,
    pub services: &'a mut HostServices,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepOutcome {
    /// The script can take another step this slice.
    Running,
    /// The script left the running state at a suspension point.
    Suspended,
    Finished,
    Errored,
}

enum Flow {
    Continue,
    Suspend,
    Finish,
}

/// Executes exactly one instruction.
pub fn step(inst: &mut ScriptInstance, ctx: &mut VmContext<'_>) -> StepOutcome {
    match inst.state {
        ScriptState::Running | ScriptState::Ready => {}
        ScriptState::Finished => return StepOutcome::Finished,
        ScriptState::Error => return StepOutcome::Errored,
        _ => return StepOutcome::Suspended,
    }
    if inst.cancel.is_cancelled() {
        inst.state = ScriptState::Finished;
        return StepOutcome::Finished;
    }
    inst.state = ScriptState::Running;
    let fault_ip = inst.ip;
    match exec(inst, ctx) {
        Ok(Flow::Continue) => StepOutcome::Running,
        Ok(Flow::Suspend) => StepOutcome::Suspended,
        Ok(Flow::Finish) => {
            inst.state = ScriptState::Finished;
            StepOutcome::Finished
        }
        Err(fault) => {
            let line = inst.image.line_for_offset(fault_ip);
            warn!(
                script = %inst.image.source_path,
                line,
                error = %fault.message,
                "script runtime error"
            );
            inst.state = ScriptState::Error;
            StepOutcome::Errored
        }
    }
}

/// Runs up to `budget` instructions or until the script leaves the
/// running state.
pub fn run_slice(
    inst: &mut ScriptInstance,
    ctx: &mut VmContext<'_>,
    budget: u32,
) -> StepOutcome {
    let mut outcome = StepOutcome::Running;
    for _ in 0..budget {
        outcome = step(inst, ctx);
        if outcome != StepOutcome::Running {
            break;
        }
    }
    outcome
}

/// Dead object references behave as null in comparisons and truth tests.
fn normalize(world: &World, value: Value) -> Value {
    match value {
        Value::Object(handle) if !world.is_alive(handle) => Value::Null,
        other => other,
    }
}

fn exec(inst: &mut ScriptInstance, ctx: &mut VmContext<'_>) -> Result<Flow, VmFault> {
    let (instr, next) = decode(&inst.image.code, inst.ip)
        .map_err(|err| VmFault::new(format!("bad instruction at offset {}", err.offset)))?;
    inst.ip = next;

    match instr {
        Instr::PushInt(value) => inst.stack.push(Value::Int(value))?,
        Instr::PushFloat(value) => inst.stack.push(Value::Float(value))?,
        Instr::PushString(symbol) => {
            let text = inst
                .image
                .symbol(symbol)
                .ok_or_else(|| VmFault::new("bad symbol index"))?
                .clone();
            inst.stack.push(Value::String(text))?;
        }
        Instr::PushBool(value) => inst.stack.push(Value::Bool(value))?,
        Instr::PushNull => inst.stack.push(Value::Null)?,
        Instr::PushVar(var) => {
            let value = match var {
                VarRef::Local(slot) => inst.calls.top()?.local(slot),
                VarRef::Global(symbol) => ctx.globals.get(inst.image.symbol_text(symbol)),
            };
            inst.stack.push(value)?;
        }
        Instr::PopVar(var) => {
            let value = inst.stack.pop()?;
            match var {
                VarRef::Local(slot) => inst.calls.top_mut()?.set_local(slot, value),
                VarRef::Global(symbol) => {
                    ctx.globals.set(inst.image.symbol_text(symbol), value);
                }
            }
        }
        Instr::PopEmpty => {
            inst.stack.pop()?;
        }
        Instr::PushThis => {
            let this = inst.this.clone();
            inst.stack.push(this)?;
        }
        Instr::PopThis => {
            inst.this = inst.stack.pop()?;
        }

        Instr::Add => binary(inst, |a, b| a.add(b))?,
        Instr::Sub => binary(inst, |a, b| a.sub(b))?,
        Instr::Mul => binary(inst, |a, b| a.mul(b))?,
        Instr::Div => binary(inst, |a, b| a.div(b))?,
        Instr::Mod => binary(inst, |a, b| a.modulo(b))?,
        Instr::Neg => {
            let value = inst.stack.pop()?;
            inst.stack.push(value.neg())?;
        }

        Instr::Eq => comparison(inst, ctx, |a, b| a.equals(b))?,
        Instr::Ne => comparison(inst, ctx, |a, b| !a.equals(b))?,
        Instr::StrictEq => comparison(inst, ctx, |a, b| a.strict_equals(b))?,
        Instr::StrictNe => comparison(inst, ctx, |a, b| !a.strict_equals(b))?,
        Instr::Lt => comparison(inst, ctx, |a, b| a.compare(b).is_lt())?,
        Instr::Gt => comparison(inst, ctx, |a, b| a.compare(b).is_gt())?,
        Instr::Le => comparison(inst, ctx, |a, b| a.compare(b).is_le())?,
        Instr::Ge => comparison(inst, ctx, |a, b| a.compare(b).is_ge())?,
        Instr::Not => {
            let value = normalize(ctx.world, inst.stack.pop()?);
            inst.stack.push(Value::Bool(!value.is_truthy()))?;
        }

        Instr::Jump(target) => inst.ip = target,
        Instr::JumpIfFalse(target) => {
            let top = normalize(ctx.world, inst.stack.peek()?.clone());
            if top.is_truthy() {
                inst.stack.pop()?;
            } else {
                // Branch taken: the tested value stays as the result.
                inst.stack.replace_top(top)?;
                inst.ip = target;
            }
        }
        Instr::JumpIfTrue(target) => {
            let top = normalize(ctx.world, inst.stack.peek()?.clone());
            if top.is_truthy() {
                inst.stack.replace_top(top)?;
                inst.ip = target;
            } else {
                inst.stack.pop()?;
            }
        }

        Instr::Call { name, argc } => {
            let args = inst.stack.pop_args(argc as usize)?;
            let name_text = inst.image.symbol_text(name).to_string();
            if let Some(function) = inst.image.find_function(&name_text) {
                let mut locals = args;
                locals.resize(
                    locals.len().max(function.param_count as usize),
                    Value::Null,
                );
                let frame = Frame::new(
                    inst.ip,
                    inst.this.clone(),
                    locals,
                    inst.stack.depth(),
                );
                inst.calls.push(frame)?;
                inst.ip = function.entry;
            } else if let Some(host_fn) = ctx.host.lookup(&name_text) {
                match host_fn(ctx.world, ctx.services, &args) {
                    HostResult::Value(value) => inst.stack.push(value)?,
                    HostResult::Suspend(wait) => {
                        inst.stack.push(Value::Null)?;
                        suspend(inst, ctx, wait);
                        return Ok(Flow::Suspend);
                    }
                    HostResult::Error(message) => return Err(VmFault::new(message)),
                }
            } else if inst.image.find_external(&name_text).is_some() {
                return Err(VmFault::new(format!(
                    "external function '{name_text}' is not provided by the host"
                )));
            } else {
                return Err(VmFault::new(format!("unknown function '{name_text}'")));
            }
        }
        Instr::CallMethod { name, argc } => {
            let args = inst.stack.pop_args(argc as usize)?;
            let receiver = inst.stack.pop()?;
            let name_text = inst.image.symbol_text(name).to_string();
            match receiver {
                Value::Object(handle) if ctx.world.is_alive(handle) => {
                    match ctx.world.call_method(handle, &name_text, &args, ctx.services) {
                        MethodOutcome::Value(value) => inst.stack.push(value)?,
                        MethodOutcome::Suspend(wait) => {
                            inst.stack.push(Value::Null)?;
                            suspend(inst, ctx, wait);
                            return Ok(Flow::Suspend);
                        }
                        MethodOutcome::NotHandled => {
                            return Err(VmFault::new(format!(
                                "object does not handle method '{name_text}'"
                            )))
                        }
                    }
                }
                Value::Object(_) => {
                    warn!(
                        script = %inst.image.source_path,
                        method = %name_text,
                        "method call on a destroyed object"
                    );
                    inst.stack.push(Value::Null)?;
                }
                Value::Null => {
                    return Err(VmFault::new(format!(
                        "method '{name_text}' called on null"
                    )))
                }
                other => {
                    return Err(VmFault::new(format!(
                        "method '{name_text}' called on a {}",
                        other.type_name()
                    )))
                }
            }
        }
        Instr::Return => {
            let frame = inst.calls.pop()?;
            let result = if inst.stack.depth() > frame.watermark {
                inst.stack.pop()?
            } else {
                Value::Null
            };
            inst.stack.truncate(frame.watermark);
            if inst.calls.is_empty() {
                return Ok(Flow::Finish);
            }
            inst.stack.push(result)?;
            inst.ip = frame.return_ip;
            inst.this = frame.saved_this;
        }
        Instr::ReturnEvent => return Ok(Flow::Finish),

        Instr::GetProperty(symbol) => {
            let receiver = inst.stack.pop()?;
            let name_text = inst.image.symbol_text(symbol);
            let value = match receiver {
                Value::Object(handle) => match ctx.world.get_property(handle, name_text) {
                    Some(value) => value,
                    None => {
                        warn!(
                            script = %inst.image.source_path,
                            property = %name_text,
                            "property read on a destroyed object"
                        );
                        Value::Null
                    }
                },
                Value::String(text) if name_text.eq_ignore_ascii_case("length") => {
                    Value::Int(text.chars().count() as i32)
                }
                Value::Array(items) if name_text.eq_ignore_ascii_case("length") => {
                    Value::Int(items.len() as i32)
                }
                other => {
                    warn!(
                        script = %inst.image.source_path,
                        property = %name_text,
                        receiver = other.type_name(),
                        "property read on a non-object"
                    );
                    Value::Null
                }
            };
            inst.stack.push(value)?;
        }
        Instr::SetProperty(symbol) => {
            let value = inst.stack.pop()?;
            let receiver = inst.stack.pop()?;
            let name_text = inst.image.symbol_text(symbol);
            match receiver {
                Value::Object(handle) => {
                    if !ctx.world.set_property(handle, name_text, value) {
                        warn!(
                            script = %inst.image.source_path,
                            property = %name_text,
                            "property write on a destroyed object dropped"
                        );
                    }
                }
                other => {
                    warn!(
                        script = %inst.image.source_path,
                        property = %name_text,
                        receiver = other.type_name(),
                        "property write on a non-object dropped"
                    );
                }
            }
        }
        Instr::NewObject { class, argc } => {
            let args = inst.stack.pop_args(argc as usize)?;
            let class_text = inst.image.symbol_text(class).to_string();
            match ctx.world.construct(&class_text, &args) {
                Some(handle) => inst.stack.push(Value::Object(handle))?,
                None => {
                    return Err(VmFault::new(format!("unknown object class '{class_text}'")))
                }
            }
        }
        Instr::GetElem => {
            let index = inst.stack.pop()?;
            let array = inst.stack.pop()?;
            let value = match array {
                Value::Array(items) => {
                    let at = index.as_int();
                    if at >= 0 {
                        items.get(at as usize).cloned().unwrap_or(Value::Null)
                    } else {
                        Value::Null
                    }
                }
                other => {
                    warn!(
                        script = %inst.image.source_path,
                        receiver = other.type_name(),
                        "indexing a non-array"
                    );
                    Value::Null
                }
            };
            inst.stack.push(value)?;
        }
        Instr::SetElem(var) => {
            let value = inst.stack.pop()?;
            let index = inst.stack.pop()?.as_int();
            if index < 0 {
                return Err(VmFault::new("negative array index"));
            }
            let current = match var {
                VarRef::Local(slot) => inst.calls.top()?.local(slot),
                VarRef::Global(symbol) => ctx.globals.get(inst.image.symbol_text(symbol)),
            };
            let mut items = match current {
                Value::Array(items) => items,
                Value::Null => Vec::new(),
                other => {
                    return Err(VmFault::new(format!(
                        "element assignment into a {}",
                        other.type_name()
                    )))
                }
            };
            let at = index as usize;
            if at >= items.len() {
                items.resize(at + 1, Value::Null);
            }
            items[at] = value;
            match var {
                VarRef::Local(slot) => {
                    inst.calls.top_mut()?.set_local(slot, Value::Array(items));
                }
                VarRef::Global(symbol) => {
                    ctx.globals
                        .set(inst.image.symbol_text(symbol), Value::Array(items));
                }
            }
        }
        Instr::NewArray(count) => {
            let items = inst.stack.pop_args(count as usize)?;
            inst.stack.push(Value::Array(items))?;
        }

        Instr::Sleep => {
            let duration = inst.stack.pop()?.as_int().max(0) as u64;
            inst.state = ScriptState::Sleeping {
                until_ms: ctx.services.clock_ms + duration,
            };
            return Ok(Flow::Suspend);
        }
        Instr::Yield => {
            inst.state = ScriptState::Ready;
            return Ok(Flow::Suspend);
        }
    }
    Ok(Flow::Continue)
}

fn suspend(inst: &mut ScriptInstance, ctx: &VmContext<'_>, wait: WaitKind) {
    inst.state = match wait {
        WaitKind::SleepMs(duration) => ScriptState::Sleeping {
            until_ms: ctx.services.clock_ms + duration,
        },
        WaitKind::Tick => ScriptState::Ready,
        WaitKind::Object(object) => ScriptState::WaitingForObject { object },
        WaitKind::Script(thread) => ScriptState::WaitingForScript { thread },
    };
}

fn binary(
    inst: &mut ScriptInstance,
    op: impl FnOnce(&Value, &Value) -> Value,
) -> Result<(), VmFault> {
    let rhs = inst.stack.pop()?;
    let lhs = inst.stack.pop()?;
    inst.stack.push(op(&lhs, &rhs))
}

fn comparison(
    inst: &mut ScriptInstance,
    ctx: &VmContext<'_>,
    op: impl FnOnce(&Value, &Value) -> bool,
) -> Result<(), VmFault> {
    let rhs = normalize(ctx.world, inst.stack.pop()?);
    let lhs = normalize(ctx.world, inst.stack.pop()?);
    inst.stack.push(Value::Bool(op(&lhs, &rhs)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{EntityData, ObjectKind};
    use crate::script::compiler::compile;
    use std::sync::Arc;

    struct Fixture {
        world: World,
        globals: GlobalStore,
        host: HostRegistry,
        services: HostServices,
    }

    impl Fixture {
        fn new() -> Self {
            Self {
                world: World::new(),
                globals: GlobalStore::new(),
                host: HostRegistry::with_builtins(),
                services: HostServices::new(99),
            }
        }

        fn ctx(&mut self) -> VmContext<'_> {
            VmContext {
                world: &mut self.world,
                globals: &mut self.globals,
                host: &self.host,
                services: &mut self.services,
            }
        }

        fn run(&mut self, source: &str) -> (ScriptInstance, StepOutcome) {
            let image = Arc::new(compile("test.script", source).expect("compile"));
            let mut inst = ScriptInstance::new(image, 1, None);
            let outcome = run_slice(&mut inst, &mut self.ctx(), 100_000);
            (inst, outcome)
        }
    }

    #[test]
    fn arithmetic_lands_in_globals() {
        let mut fixture = Fixture::new();
        let (_, outcome) = fixture.run("total = 2 + 3 * 4; label = \"n=\" + total;");
        assert_eq!(outcome, StepOutcome::Finished);
        assert!(fixture.globals.get("total").equals(&Value::Int(14)));
        assert!(fixture.globals.get("LABEL").equals(&Value::string("n=14")));
    }

    #[test]
    fn short_circuit_skips_side_effects() {
        let mut fixture = Fixture::new();
        let source = r#"
x = 0;
function touch() { x = x + 1; return true; }
r1 = false && touch();
r2 = true || touch();
"#;
        let (_, outcome) = fixture.run(source);
        assert_eq!(outcome, StepOutcome::Finished);
        assert!(fixture.globals.get("x").equals(&Value::Int(0)));
        assert!(fixture.globals.get("r1").equals(&Value::Bool(false)));
        assert!(fixture.globals.get("r2").equals(&Value::Bool(true)));
    }

    #[test]
    fn function_calls_return_values_and_clean_the_stack() {
        let mut fixture = Fixture::new();
        let source = r#"
function add(a, b) { return a + b; }
function pass(v) { return v; }
r = add(pass(1), add(2, 3));
"#;
        let (inst, outcome) = fixture.run(source);
        assert_eq!(outcome, StepOutcome::Finished);
        assert!(fixture.globals.get("r").equals(&Value::Int(6)));
        assert_eq!(inst.stack.depth(), 0, "stack drains at finish");
    }

    #[test]
    fn loops_and_switch_run_to_completion() {
        let mut fixture = Fixture::new();
        let source = r#"
sum = 0;
for (var i = 0; i < 5; i += 1) {
    if (i == 3) continue;
    sum += i;
}
switch (sum) {
    case 7:
        label = "seven";
        break;
    default:
        label = "other";
}
"#;
        let (_, outcome) = fixture.run(source);
        assert_eq!(outcome, StepOutcome::Finished);
        assert!(fixture.globals.get("sum").equals(&Value::Int(7)));
        assert!(fixture.globals.get("label").equals(&Value::string("seven")));
    }

    #[test]
    fn arrays_index_grow_and_copy() {
        let mut fixture = Fixture::new();
        let source = r#"
a = [1, 2, 3];
a[5] = 9;
b = a;
b[0] = 100;
first = a[0];
len = a.Length;
hole = a[4];
"#;
        let (_, outcome) = fixture.run(source);
        assert_eq!(outcome, StepOutcome::Finished);
        assert!(fixture.globals.get("first").equals(&Value::Int(1)), "copy-on-assign");
        assert!(fixture.globals.get("len").equals(&Value::Int(6)));
        assert!(fixture.globals.get("hole").is_null());
    }

    #[test]
    fn sleep_suspends_with_a_deadline() {
        let mut fixture = Fixture::new();
        fixture.services.clock_ms = 400;
        let (inst, outcome) = fixture.run("Sleep(100); done = true;");
        assert_eq!(outcome, StepOutcome::Suspended);
        assert_eq!(inst.state, ScriptState::Sleeping { until_ms: 500 });
        assert!(fixture.globals.get("done").is_null(), "code after Sleep not yet run");
    }

    #[test]
    fn gone_object_reads_null_and_compares_equal_to_null() {
        let mut fixture = Fixture::new();
        let door = fixture.world.create(
            ObjectKind::Entity(EntityData::default()),
            Some("door"),
            None,
        );
        fixture.globals.set("door", Value::Object(door));
        fixture.world.destroy(door);

        let source = r#"
name = door.Name;
gone = door == null;
alive = door != null;
"#;
        let (_, outcome) = fixture.run(source);
        assert_eq!(outcome, StepOutcome::Finished, "gone access is not an error");
        assert!(fixture.globals.get("name").is_null());
        assert!(fixture.globals.get("gone").equals(&Value::Bool(true)));
        assert!(fixture.globals.get("alive").equals(&Value::Bool(false)));
    }

    #[test]
    fn unknown_method_faults_the_script_only() {
        let mut fixture = Fixture::new();
        let door = fixture.world.create(
            ObjectKind::Entity(EntityData::default()),
            Some("door"),
            None,
        );
        fixture.globals.set("door", Value::Object(door));
        let (inst, outcome) = fixture.run("door.Frobnicate();");
        assert_eq!(outcome, StepOutcome::Errored);
        assert_eq!(inst.state, ScriptState::Error);
        assert!(fixture.world.is_alive(door), "host state is untouched");
    }

    #[test]
    fn unknown_function_and_missing_external_fault() {
        let mut fixture = Fixture::new();
        let (_, outcome) = fixture.run("NoSuchFn();");
        assert_eq!(outcome, StepOutcome::Errored);

        let (_, outcome) = fixture.run("external \"gamelib\" Special(x);\nSpecial(1);");
        assert_eq!(outcome, StepOutcome::Errored);
    }

    #[test]
    fn division_by_zero_folds_not_faults() {
        let mut fixture = Fixture::new();
        let (_, outcome) = fixture.run("q = 7 / 0; m = 7 % 0;");
        assert_eq!(outcome, StepOutcome::Finished);
        assert!(fixture.globals.get("q").equals(&Value::Int(0)));
        assert!(fixture.globals.get("m").equals(&Value::Int(0)));
    }

    #[test]
    fn deep_recursion_overflows_the_call_stack_cleanly() {
        let mut fixture = Fixture::new();
        let (_, outcome) = fixture.run("function f(n) { return f(n + 1); } f(0);");
        assert_eq!(outcome, StepOutcome::Errored);
    }

    #[test]
    fn object_construction_and_property_roundtrip() {
        let mut fixture = Fixture::new();
        let source = r#"
e = new Entity("crate");
e.X = 40;
e.CustomTag = "wood";
x = e.X;
tag = e.CustomTag;
kind = e.Type;
"#;
        let (_, outcome) = fixture.run(source);
        assert_eq!(outcome, StepOutcome::Finished);
        assert!(fixture.globals.get("x").equals(&Value::Int(40)));
        assert!(fixture.globals.get("tag").equals(&Value::string("wood")));
        assert!(fixture.globals.get("kind").equals(&Value::string("entity")));
        assert!(fixture.world.find_by_name(fixture.world.root(), "crate").is_some());
    }

    #[test]
    fn ternary_and_string_length() {
        let mut fixture = Fixture::new();
        let (_, outcome) =
            fixture.run("n = \"hello\".Length; pick = n > 3 ? \"big\" : \"small\";");
        assert_eq!(outcome, StepOutcome::Finished);
        assert!(fixture.globals.get("n").equals(&Value::Int(5)));
        assert!(fixture.globals.get("pick").equals(&Value::string("big")));
    }

    #[test]
    fn print_builtin_reaches_services() {
        let mut fixture = Fixture::new();
        let (_, outcome) = fixture.run("Print(\"hp=\", 3 + 4);");
        assert_eq!(outcome, StepOutcome::Finished);
        assert_eq!(fixture.services.drain_printed(), ["hp=7"]);
    }

    #[test]
    fn yield_returns_control_but_stays_ready() {
        let mut fixture = Fixture::new();
        let (mut inst, outcome) = fixture.run("Yield(); after = 1;");
        assert_eq!(outcome, StepOutcome::Suspended);
        assert_eq!(inst.state, ScriptState::Ready);

        let outcome = run_slice(&mut inst, &mut fixture.ctx(), 100);
        assert_eq!(outcome, StepOutcome::Finished);
        assert!(fixture.globals.get("after").equals(&Value::Int(1)));
    }
}
