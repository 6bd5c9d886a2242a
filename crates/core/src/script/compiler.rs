//! Bytecode emitter: AST → executable script image.
//!
//! Name resolution order is locals (including parameters), file-level
//! constants, then named globals; an identifier that resolves to nothing
//! compiles as a global reference so scripts can share globals declared
//! elsewhere. Jumps use the keep-on-branch convention: `JumpIfFalse` /
//! `JumpIfTrue` leave the tested value on the stack when they branch and
//! pop it when they fall through, which is what makes `&&`/`||` yield
//! their deciding operand without ever re-evaluating it.

use std::collections::HashMap;

use crate::error::{EngineError, EngineResult};
use crate::script::ast::*;
use crate::script::image::{EventEntry, ExternalEntry, FunctionEntry, ScriptImage};
use crate::script::opcode::{encode, patch_jump, Instr, VarRef};
use crate::script::parser;
use crate::value::SharedStr;

/// Compiles one source file into an image.
pub fn compile(path: &str, source: &str) -> EngineResult<ScriptImage> {
    let ast = parser::parse(path, source)?;
    let mut compiler = Compiler::new(path);
    compiler.compile(&ast)
}

#[derive(Clone, Copy, PartialEq)]
enum FrameKind {
    Loop,
    Switch,
}

struct ControlFrame {
    kind: FrameKind,
    break_jumps: Vec<u32>,
    continue_jumps: Vec<u32>,
}

/// A compile-time constant value; substituted at its use sites.
#[derive(Clone)]
enum ConstValue {
    Null,
    Bool(bool),
    Int(i32),
    Float(f64),
    Str(String),
}

struct Compiler<'a> {
    path: &'a str,
    code: Vec<u8>,
    symbols: Vec<SharedStr>,
    symbol_index: HashMap<String, u32>,
    functions: Vec<FunctionEntry>,
    methods: Vec<FunctionEntry>,
    events: Vec<EventEntry>,
    externals: Vec<ExternalEntry>,
    lines: Vec<(u32, u32)>,
    last_line: u32,
    /// Names of script-declared functions; they shadow the intrinsic
    /// lowering of `Sleep`/`Yield`.
    declared_functions: Vec<String>,
    /// Constants declared at file level, visible everywhere.
    file_consts: HashMap<String, ConstValue>,
    // Per-function state.
    scopes: Vec<HashMap<String, u16>>,
    local_consts: Vec<HashMap<String, ConstValue>>,
    next_slot: u16,
    control: Vec<ControlFrame>,
    at_file_level: bool,
}

impl<'a> Compiler<'a> {
    fn new(path: &'a str) -> Self {
        Self {
            path,
            code: Vec::new(),
            symbols: Vec::new(),
            symbol_index: HashMap::new(),
            functions: Vec::new(),
            methods: Vec::new(),
            events: Vec::new(),
            externals: Vec::new(),
            lines: Vec::new(),
            last_line: 0,
            declared_functions: Vec::new(),
            file_consts: HashMap::new(),
            scopes: Vec::new(),
            local_consts: Vec::new(),
            next_slot: 0,
            control: Vec::new(),
            at_file_level: false,
        }
    }

    fn compile(&mut self, ast: &Script) -> EngineResult<ScriptImage> {
        for external in &ast.externals {
            self.externals.push(ExternalEntry {
                name: SharedStr::from(external.name.as_str()),
                library: SharedStr::from(external.library.as_str()),
                param_count: external.params.len() as u8,
            });
        }
        self.declared_functions = ast
            .functions
            .iter()
            .map(|function| function.name.to_ascii_lowercase())
            .collect();

        // File-level code sits at offset 0: a fresh instance starts here.
        self.begin_function(&[]);
        self.at_file_level = true;
        for stmt in &ast.body {
            self.stmt(stmt)?;
        }
        self.at_file_level = false;
        self.emit(&Instr::PushNull);
        self.emit(&Instr::Return);
        self.end_function();

        for function in &ast.functions {
            let entry = self.code.len() as u32;
            self.mark_line(function.line);
            self.begin_function(&function.params);
            for stmt in &function.body {
                self.stmt(stmt)?;
            }
            self.emit(&Instr::PushNull);
            self.emit(&Instr::Return);
            self.end_function();
            self.functions.push(FunctionEntry {
                name: SharedStr::from(function.name.as_str()),
                entry,
                param_count: function.params.len() as u8,
            });
        }

        for method in &ast.methods {
            let entry = self.code.len() as u32;
            self.mark_line(method.line);
            self.begin_function(&method.params);
            // The caller pushes the receiver; bind it as `this`.
            self.emit(&Instr::PopThis);
            for stmt in &method.body {
                self.stmt(stmt)?;
            }
            self.emit(&Instr::PushNull);
            self.emit(&Instr::Return);
            self.end_function();
            self.methods.push(FunctionEntry {
                name: SharedStr::from(method.name.as_str()),
                entry,
                param_count: method.params.len() as u8,
            });
        }

        for event in &ast.events {
            let entry = self.code.len() as u32;
            self.mark_line(event.line);
            self.begin_function(&[]);
            for stmt in &event.body {
                self.stmt(stmt)?;
            }
            self.emit(&Instr::ReturnEvent);
            self.end_function();
            self.events.push(EventEntry {
                name: SharedStr::from(event.name.as_str()),
                entry,
            });
        }

        Ok(ScriptImage {
            source_path: SharedStr::from(self.path),
            code: std::mem::take(&mut self.code),
            symbols: std::mem::take(&mut self.symbols),
            functions: std::mem::take(&mut self.functions),
            methods: std::mem::take(&mut self.methods),
            events: std::mem::take(&mut self.events),
            externals: std::mem::take(&mut self.externals),
            lines: std::mem::take(&mut self.lines),
        })
    }

    // ----- emission helpers -----

    fn emit(&mut self, instr: &Instr) -> u32 {
        encode(&mut self.code, instr)
    }

    fn here(&self) -> u32 {
        self.code.len() as u32
    }

    fn patch(&mut self, at: u32, target: u32) {
        patch_jump(&mut self.code, at, target);
    }

    fn intern(&mut self, text: &str) -> u32 {
        if let Some(&index) = self.symbol_index.get(text) {
            return index;
        }
        let index = self.symbols.len() as u32;
        self.symbols.push(SharedStr::from(text));
        self.symbol_index.insert(text.to_string(), index);
        index
    }

    fn mark_line(&mut self, line: u32) {
        if line != 0 && line != self.last_line {
            self.lines.push((self.here(), line));
            self.last_line = line;
        }
    }

    fn error(&self, line: u32, column: u32, message: impl Into<String>) -> EngineError {
        EngineError::compile(self.path, line, column, message)
    }

    // ----- scopes -----

    fn begin_function(&mut self, params: &[String]) {
        self.scopes.clear();
        self.local_consts.clear();
        self.scopes.push(HashMap::new());
        self.local_consts.push(HashMap::new());
        self.next_slot = 0;
        for param in params {
            let slot = self.next_slot;
            self.next_slot += 1;
            self.scopes
                .last_mut()
                .expect("function scope")
                .insert(param.clone(), slot);
        }
    }

    fn end_function(&mut self) {
        self.scopes.clear();
        self.local_consts.clear();
        self.last_line = 0;
    }

    fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
        self.local_consts.push(HashMap::new());
    }

    fn pop_scope(&mut self) {
        self.scopes.pop();
        self.local_consts.pop();
    }

    fn declare_local(&mut self, name: &str) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        self.scopes
            .last_mut()
            .expect("active scope")
            .insert(name.to_string(), slot);
        slot
    }

    fn fresh_temp(&mut self) -> u16 {
        let slot = self.next_slot;
        self.next_slot += 1;
        slot
    }

    fn resolve_local(&self, name: &str) -> Option<u16> {
        self.scopes
            .iter()
            .rev()
            .find_map(|scope| scope.get(name).copied())
    }

    fn resolve_const(&self, name: &str) -> Option<ConstValue> {
        self.local_consts
            .iter()
            .rev()
            .find_map(|scope| scope.get(name))
            .or_else(|| self.file_consts.get(name))
            .cloned()
    }

    /// A variable reference for reads and writes: local if declared,
    /// otherwise a named global.
    fn resolve_var(&mut self, name: &str) -> VarRef {
        match self.resolve_local(name) {
            Some(slot) => VarRef::Local(slot),
            None => VarRef::Global(self.intern(name)),
        }
    }

    // ----- statements -----

    fn stmt(&mut self, stmt: &Stmt) -> EngineResult<()> {
        match stmt {
            Stmt::Expr(expr) => {
                self.mark_line(expr.line);
                self.expr(expr)?;
                self.emit(&Instr::PopEmpty);
            }
            Stmt::VarDecl { decls, line } => {
                self.mark_line(*line);
                for (name, init) in decls {
                    let slot = self.declare_local(name);
                    match init {
                        Some(init) => self.expr(init)?,
                        None => {
                            self.emit(&Instr::PushNull);
                        }
                    }
                    self.emit(&Instr::PopVar(VarRef::Local(slot)));
                }
            }
            Stmt::GlobalDecl { decls, line } => {
                self.mark_line(*line);
                for (name, init) in decls {
                    if let Some(init) = init {
                        let symbol = self.intern(name);
                        self.expr(init)?;
                        self.emit(&Instr::PopVar(VarRef::Global(symbol)));
                    }
                }
            }
            Stmt::ConstDecl { name, value, line } => {
                let constant = match &value.kind {
                    ExprKind::Null => ConstValue::Null,
                    ExprKind::Bool(v) => ConstValue::Bool(*v),
                    ExprKind::Int(v) => ConstValue::Int(*v),
                    ExprKind::Float(v) => ConstValue::Float(*v),
                    ExprKind::Str(v) => ConstValue::Str(v.clone()),
                    _ => {
                        return Err(self.error(
                            *line,
                            value.column,
                            "constant initializer must be a literal",
                        ))
                    }
                };
                if self.at_file_level && self.scopes.len() == 1 {
                    self.file_consts.insert(name.clone(), constant);
                } else {
                    self.local_consts
                        .last_mut()
                        .expect("active scope")
                        .insert(name.clone(), constant);
                }
            }
            Stmt::If {
                cond,
                then_branch,
                else_branch,
            } => {
                self.mark_line(cond.line);
                self.expr(cond)?;
                let to_else = self.emit(&Instr::JumpIfFalse(0));
                self.block(then_branch)?;
                let to_end = self.emit(&Instr::Jump(0));
                let else_label = self.here();
                self.patch(to_else, else_label);
                // The branch-taken path kept the condition value.
                self.emit(&Instr::PopEmpty);
                if let Some(else_branch) = else_branch {
                    self.block(else_branch)?;
                }
                let end = self.here();
                self.patch(to_end, end);
            }
            Stmt::While { cond, body } => {
                let cond_label = self.here();
                self.mark_line(cond.line);
                self.expr(cond)?;
                let to_exit = self.emit(&Instr::JumpIfFalse(0));
                self.control.push(ControlFrame {
                    kind: FrameKind::Loop,
                    break_jumps: Vec::new(),
                    continue_jumps: Vec::new(),
                });
                self.block(body)?;
                self.emit(&Instr::Jump(cond_label));
                let exit = self.here();
                self.patch(to_exit, exit);
                self.emit(&Instr::PopEmpty);
                let end = self.here();
                let frame = self.control.pop().expect("loop frame");
                for jump in frame.break_jumps {
                    self.patch(jump, end);
                }
                for jump in frame.continue_jumps {
                    self.patch(jump, cond_label);
                }
            }
            Stmt::For {
                init,
                cond,
                update,
                body,
            } => {
                self.push_scope();
                if let Some(init) = init {
                    self.stmt(init)?;
                }
                let cond_label = self.here();
                match cond {
                    Some(cond) => {
                        self.mark_line(cond.line);
                        self.expr(cond)?;
                    }
                    None => {
                        self.emit(&Instr::PushBool(true));
                    }
                }
                let to_exit = self.emit(&Instr::JumpIfFalse(0));
                self.control.push(ControlFrame {
                    kind: FrameKind::Loop,
                    break_jumps: Vec::new(),
                    continue_jumps: Vec::new(),
                });
                self.block(body)?;
                let continue_label = self.here();
                if let Some(update) = update {
                    self.expr(update)?;
                    self.emit(&Instr::PopEmpty);
                }
                self.emit(&Instr::Jump(cond_label));
                let exit = self.here();
                self.patch(to_exit, exit);
                self.emit(&Instr::PopEmpty);
                let end = self.here();
                let frame = self.control.pop().expect("loop frame");
                for jump in frame.break_jumps {
                    self.patch(jump, end);
                }
                for jump in frame.continue_jumps {
                    self.patch(jump, continue_label);
                }
                self.pop_scope();
            }
            Stmt::Switch {
                discriminant,
                cases,
                line,
            } => self.switch(discriminant, cases, *line)?,
            Stmt::Return { value, line } => {
                self.mark_line(*line);
                match value {
                    Some(value) => self.expr(value)?,
                    None => {
                        self.emit(&Instr::PushNull);
                    }
                }
                self.emit(&Instr::Return);
            }
            Stmt::Break { line } => {
                let jump = self.emit(&Instr::Jump(0));
                match self.control.last_mut() {
                    Some(frame) => frame.break_jumps.push(jump),
                    None => return Err(self.error(*line, 0, "break outside loop or switch")),
                }
            }
            Stmt::Continue { line } => {
                let jump = self.emit(&Instr::Jump(0));
                match self
                    .control
                    .iter_mut()
                    .rev()
                    .find(|frame| frame.kind == FrameKind::Loop)
                {
                    Some(frame) => frame.continue_jumps.push(jump),
                    None => return Err(self.error(*line, 0, "continue outside loop")),
                }
            }
            Stmt::Block(body) => self.block(body)?,
        }
        Ok(())
    }

    fn block(&mut self, body: &[Stmt]) -> EngineResult<()> {
        self.push_scope();
        for stmt in body {
            self.stmt(stmt)?;
        }
        self.pop_scope();
        Ok(())
    }

    /// Linear chain of equality tests against the discriminant held in a
    /// temporary; bodies run in source order with C fall-through.
    fn switch(&mut self, discriminant: &Expr, cases: &[SwitchCase], line: u32) -> EngineResult<()> {
        self.mark_line(line);
        let temp = self.fresh_temp();
        self.expr(discriminant)?;
        self.emit(&Instr::PopVar(VarRef::Local(temp)));

        self.control.push(ControlFrame {
            kind: FrameKind::Switch,
            break_jumps: Vec::new(),
            continue_jumps: Vec::new(),
        });

        let mut body_jumps: Vec<(usize, u32)> = Vec::new();
        for (index, case) in cases.iter().enumerate() {
            let Some(test) = &case.test else { continue };
            self.emit(&Instr::PushVar(VarRef::Local(temp)));
            self.expr(test)?;
            self.emit(&Instr::Eq);
            let to_fail = self.emit(&Instr::JumpIfFalse(0));
            let to_body = self.emit(&Instr::Jump(0));
            body_jumps.push((index, to_body));
            let fail = self.here();
            self.patch(to_fail, fail);
            self.emit(&Instr::PopEmpty);
        }
        let default_index = cases.iter().position(|case| case.test.is_none());
        let no_match = self.emit(&Instr::Jump(0));

        let mut body_labels = vec![0u32; cases.len()];
        for (index, case) in cases.iter().enumerate() {
            body_labels[index] = self.here();
            for stmt in &case.body {
                self.stmt(stmt)?;
            }
        }
        let end = self.here();

        for (index, jump) in body_jumps {
            self.patch(jump, body_labels[index]);
        }
        match default_index {
            Some(index) => self.patch(no_match, body_labels[index]),
            None => self.patch(no_match, end),
        }
        let frame = self.control.pop().expect("switch frame");
        for jump in frame.break_jumps {
            self.patch(jump, end);
        }
        debug_assert!(frame.continue_jumps.is_empty());
        Ok(())
    }

    // ----- expressions -----

    fn expr(&mut self, expr: &Expr) -> EngineResult<()> {
        match &expr.kind {
            ExprKind::Null => {
                self.emit(&Instr::PushNull);
            }
            ExprKind::Bool(value) => {
                self.emit(&Instr::PushBool(*value));
            }
            ExprKind::Int(value) => {
                self.emit(&Instr::PushInt(*value));
            }
            ExprKind::Float(value) => {
                self.emit(&Instr::PushFloat(*value));
            }
            ExprKind::Str(value) => {
                let symbol = self.intern(value);
                self.emit(&Instr::PushString(symbol));
            }
            ExprKind::This => {
                self.emit(&Instr::PushThis);
            }
            ExprKind::Ident(name) => match self.resolve_local(name) {
                Some(slot) => {
                    self.emit(&Instr::PushVar(VarRef::Local(slot)));
                }
                None => match self.resolve_const(name) {
                    Some(constant) => self.push_const(&constant),
                    None => {
                        let symbol = self.intern(name);
                        self.emit(&Instr::PushVar(VarRef::Global(symbol)));
                    }
                },
            },
            ExprKind::ArrayLit(items) => {
                for item in items {
                    self.expr(item)?;
                }
                self.emit(&Instr::NewArray(items.len() as u16));
            }
            ExprKind::Unary { op, operand } => {
                self.expr(operand)?;
                self.emit(&match op {
                    UnOp::Neg => Instr::Neg,
                    UnOp::Not => Instr::Not,
                });
            }
            ExprKind::Binary { op, lhs, rhs } => {
                self.expr(lhs)?;
                self.expr(rhs)?;
                self.emit(&binary_instr(*op));
            }
            ExprKind::Logical { op, lhs, rhs } => {
                self.expr(lhs)?;
                // Short-circuit: branch over the right side keeping the
                // left value as the result.
                let skip = match op {
                    LogOp::And => self.emit(&Instr::JumpIfFalse(0)),
                    LogOp::Or => self.emit(&Instr::JumpIfTrue(0)),
                };
                self.expr(rhs)?;
                let end = self.here();
                self.patch(skip, end);
            }
            ExprKind::Ternary {
                cond,
                then_branch,
                else_branch,
            } => {
                self.expr(cond)?;
                let to_else = self.emit(&Instr::JumpIfFalse(0));
                self.expr(then_branch)?;
                let to_end = self.emit(&Instr::Jump(0));
                let else_label = self.here();
                self.patch(to_else, else_label);
                self.emit(&Instr::PopEmpty);
                self.expr(else_branch)?;
                let end = self.here();
                self.patch(to_end, end);
            }
            ExprKind::Assign { target, op, value } => {
                self.assignment(expr, target, *op, value)?;
            }
            ExprKind::Member { object, name } => {
                self.expr(object)?;
                let symbol = self.intern(name);
                self.mark_line(expr.line);
                self.emit(&Instr::GetProperty(symbol));
            }
            ExprKind::Index { object, index } => {
                self.expr(object)?;
                self.expr(index)?;
                self.emit(&Instr::GetElem);
            }
            ExprKind::Call { name, args } => {
                let lowered = name.to_ascii_lowercase();
                let is_declared = self.declared_functions.contains(&lowered);
                if !is_declared && lowered == "sleep" && args.len() == 1 {
                    self.expr(&args[0])?;
                    self.mark_line(expr.line);
                    self.emit(&Instr::Sleep);
                    // Sleep yields no value; expressions expect one.
                    self.emit(&Instr::PushNull);
                } else if !is_declared && lowered == "yield" && args.is_empty() {
                    self.mark_line(expr.line);
                    self.emit(&Instr::Yield);
                    self.emit(&Instr::PushNull);
                } else {
                    for arg in args {
                        self.expr(arg)?;
                    }
                    let symbol = self.intern(name);
                    self.mark_line(expr.line);
                    self.emit(&Instr::Call {
                        name: symbol,
                        argc: args.len() as u8,
                    });
                }
            }
            ExprKind::MethodCall { object, name, args } => {
                self.expr(object)?;
                for arg in args {
                    self.expr(arg)?;
                }
                let symbol = self.intern(name);
                self.mark_line(expr.line);
                self.emit(&Instr::CallMethod {
                    name: symbol,
                    argc: args.len() as u8,
                });
            }
            ExprKind::New { class, args } => {
                for arg in args {
                    self.expr(arg)?;
                }
                let symbol = self.intern(class);
                self.mark_line(expr.line);
                self.emit(&Instr::NewObject {
                    class: symbol,
                    argc: args.len() as u8,
                });
            }
        }
        Ok(())
    }

    fn push_const(&mut self, constant: &ConstValue) {
        match constant {
            ConstValue::Null => {
                self.emit(&Instr::PushNull);
            }
            ConstValue::Bool(value) => {
                self.emit(&Instr::PushBool(*value));
            }
            ConstValue::Int(value) => {
                self.emit(&Instr::PushInt(*value));
            }
            ConstValue::Float(value) => {
                self.emit(&Instr::PushFloat(*value));
            }
            ConstValue::Str(value) => {
                let symbol = self.intern(value);
                self.emit(&Instr::PushString(symbol));
            }
        }
    }

    /// Every assignment leaves the assigned value on the stack; statement
    /// context pops it.
    fn assignment(
        &mut self,
        whole: &Expr,
        target: &Expr,
        op: Option<BinOp>,
        value: &Expr,
    ) -> EngineResult<()> {
        match &target.kind {
            ExprKind::Ident(name) => {
                if self.resolve_local(name).is_none() && self.resolve_const(name).is_some() {
                    return Err(self.error(
                        whole.line,
                        whole.column,
                        format!("cannot assign to constant '{name}'"),
                    ));
                }
                let var = self.resolve_var(name);
                if let Some(op) = op {
                    self.emit(&Instr::PushVar(var));
                    self.expr(value)?;
                    self.emit(&binary_instr(op));
                } else {
                    self.expr(value)?;
                }
                self.emit(&Instr::PopVar(var));
                self.emit(&Instr::PushVar(var));
            }
            ExprKind::Member { object, name } => {
                let symbol = self.intern(name);
                let temp = self.fresh_temp();
                match op {
                    Some(op) => {
                        // Hold the receiver so its expression runs once.
                        let receiver = self.fresh_temp();
                        self.expr(object)?;
                        self.emit(&Instr::PopVar(VarRef::Local(receiver)));
                        self.emit(&Instr::PushVar(VarRef::Local(receiver)));
                        self.emit(&Instr::GetProperty(symbol));
                        self.expr(value)?;
                        self.emit(&binary_instr(op));
                        self.emit(&Instr::PopVar(VarRef::Local(temp)));
                        self.emit(&Instr::PushVar(VarRef::Local(receiver)));
                        self.emit(&Instr::PushVar(VarRef::Local(temp)));
                        self.mark_line(whole.line);
                        self.emit(&Instr::SetProperty(symbol));
                    }
                    None => {
                        self.expr(value)?;
                        self.emit(&Instr::PopVar(VarRef::Local(temp)));
                        self.expr(object)?;
                        self.emit(&Instr::PushVar(VarRef::Local(temp)));
                        self.mark_line(whole.line);
                        self.emit(&Instr::SetProperty(symbol));
                    }
                }
                self.emit(&Instr::PushVar(VarRef::Local(temp)));
            }
            ExprKind::Index { object, index } => {
                // Element writes go through the owning variable so arrays
                // keep copy-on-assign semantics everywhere else.
                let ExprKind::Ident(name) = &object.kind else {
                    return Err(self.error(
                        whole.line,
                        whole.column,
                        "indexed assignment requires an array variable",
                    ));
                };
                let var = self.resolve_var(name);
                let temp = self.fresh_temp();
                match op {
                    Some(op) => {
                        let index_temp = self.fresh_temp();
                        self.expr(index)?;
                        self.emit(&Instr::PopVar(VarRef::Local(index_temp)));
                        self.emit(&Instr::PushVar(var));
                        self.emit(&Instr::PushVar(VarRef::Local(index_temp)));
                        self.emit(&Instr::GetElem);
                        self.expr(value)?;
                        self.emit(&binary_instr(op));
                        self.emit(&Instr::PopVar(VarRef::Local(temp)));
                        self.emit(&Instr::PushVar(VarRef::Local(index_temp)));
                        self.emit(&Instr::PushVar(VarRef::Local(temp)));
                        self.mark_line(whole.line);
                        self.emit(&Instr::SetElem(var));
                    }
                    None => {
                        self.expr(value)?;
                        self.emit(&Instr::PopVar(VarRef::Local(temp)));
                        self.expr(index)?;
                        self.emit(&Instr::PushVar(VarRef::Local(temp)));
                        self.mark_line(whole.line);
                        self.emit(&Instr::SetElem(var));
                    }
                }
                self.emit(&Instr::PushVar(VarRef::Local(temp)));
            }
            _ => {
                return Err(self.error(
                    whole.line,
                    whole.column,
                    "left side of assignment is not assignable",
                ))
            }
        }
        Ok(())
    }
}

fn binary_instr(op: BinOp) -> Instr {
    match op {
        BinOp::Add => Instr::Add,
        BinOp::Sub => Instr::Sub,
        BinOp::Mul => Instr::Mul,
        BinOp::Div => Instr::Div,
        BinOp::Mod => Instr::Mod,
        BinOp::Eq => Instr::Eq,
        BinOp::Ne => Instr::Ne,
        BinOp::StrictEq => Instr::StrictEq,
        BinOp::StrictNe => Instr::StrictNe,
        BinOp::Lt => Instr::Lt,
        BinOp::Gt => Instr::Gt,
        BinOp::Le => Instr::Le,
        BinOp::Ge => Instr::Ge,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::script::opcode::decode;

    fn instructions(image: &ScriptImage) -> Vec<Instr> {
        let mut out = Vec::new();
        let mut cursor = 0u32;
        while (cursor as usize) < image.code.len() {
            let (instr, next) = decode(&image.code, cursor).expect("decode");
            out.push(instr);
            cursor = next;
        }
        out
    }

    #[test]
    fn short_circuit_and_branches_over_rhs() {
        let image = compile("t.script", "var r = false && Touch();").expect("compile");
        let code = instructions(&image);
        let and_jump = code
            .iter()
            .find_map(|instr| match instr {
                Instr::JumpIfFalse(target) => Some(*target),
                _ => None,
            })
            .expect("short-circuit jump");
        // The branch target must land after the call, so a false left
        // operand never evaluates the right side.
        let call_offset = {
            let mut cursor = 0u32;
            let mut found = None;
            while (cursor as usize) < image.code.len() {
                let (instr, next) = decode(&image.code, cursor).expect("decode");
                if matches!(instr, Instr::Call { .. }) {
                    found = Some(cursor);
                    break;
                }
                cursor = next;
            }
            found.expect("call emitted")
        };
        assert!(and_jump > call_offset);
        assert!(code.contains(&Instr::PushBool(false)));
    }

    #[test]
    fn for_loop_lowering_shape() {
        let image =
            compile("t.script", "for (var i = 0; i < 2; i += 1) { Print(i); }").expect("compile");
        let code = instructions(&image);
        // init + cond + exit-jump + body + update + back-jump, then the
        // cleanup pop for the branch-taken residue.
        assert!(code.iter().any(|i| matches!(i, Instr::JumpIfFalse(_))));
        let back_jump = code
            .iter()
            .filter_map(|instr| match instr {
                Instr::Jump(target) => Some(*target),
                _ => None,
            })
            .min()
            .expect("back jump");
        assert!(back_jump > 0, "jumps back to the condition label");
        assert!(code.contains(&Instr::PopEmpty));
    }

    #[test]
    fn functions_methods_events_get_table_entries() {
        let source = r#"
function helper(a) { return a; }
method Use(item) { return item; }
on "Look" { Print("hm"); }
"#;
        let image = compile("t.script", source).expect("compile");
        assert_eq!(image.functions.len(), 1);
        assert_eq!(image.functions[0].param_count, 1);
        assert_eq!(image.methods.len(), 1);
        assert_eq!(image.events.len(), 1);
        assert!(image.functions[0].entry > 0, "file-level code sits first");

        // Method prologue binds the pushed receiver.
        let (instr, _) = decode(&image.code, image.methods[0].entry).expect("decode");
        assert_eq!(instr, Instr::PopThis);
    }

    #[test]
    fn consts_fold_into_literals() {
        let image = compile(
            "t.script",
            "const LIMIT = 3; var x = LIMIT + 1;",
        )
        .expect("compile");
        let code = instructions(&image);
        assert!(code.contains(&Instr::PushInt(3)), "const use folds");
        assert!(
            !code.iter().any(|i| matches!(i, Instr::PushVar(VarRef::Global(_)))),
            "no global lookup for a folded const"
        );

        let err = compile("t.script", "const A = 1; A = 2;").expect_err("assign to const");
        assert!(err.to_string().contains("constant"));
    }

    #[test]
    fn undeclared_identifiers_compile_as_globals() {
        let image = compile("t.script", "score = score + 1;").expect("compile");
        let code = instructions(&image);
        assert!(code
            .iter()
            .any(|i| matches!(i, Instr::PushVar(VarRef::Global(_)))));
        assert!(code
            .iter()
            .any(|i| matches!(i, Instr::PopVar(VarRef::Global(_)))));
    }

    #[test]
    fn sleep_lowers_to_the_opcode_unless_shadowed() {
        let image = compile("t.script", "Sleep(100);").expect("compile");
        assert!(instructions(&image).contains(&Instr::Sleep));

        let shadowed = compile(
            "t.script",
            "function Sleep(ms) { return ms; } Sleep(100);",
        )
        .expect("compile");
        let top: Vec<Instr> = {
            let mut out = Vec::new();
            let mut cursor = 0u32;
            while (cursor as usize) < shadowed.code.len() {
                let (instr, next) = decode(&shadowed.code, cursor).expect("decode");
                out.push(instr);
                if matches!(instr, Instr::Return) {
                    break;
                }
                cursor = next;
            }
            out
        };
        assert!(
            top.iter().any(|i| matches!(i, Instr::Call { .. })),
            "a declared function wins over the intrinsic"
        );
    }

    #[test]
    fn break_and_continue_need_context() {
        assert!(compile("t.script", "break;").is_err());
        assert!(compile("t.script", "continue;").is_err());
        assert!(compile("t.script", "while (true) { break; }").is_ok());
        assert!(compile("t.script", "switch (x) { case 1: continue; }").is_err());
        assert!(compile("t.script", "while (x) { switch (y) { case 1: break; } }").is_ok());
    }

    #[test]
    fn line_table_is_monotonic_and_nonempty() {
        let image = compile("t.script", "var a = 1;\nvar b = 2;\nPrint(a + b);").expect("compile");
        assert!(!image.lines.is_empty());
        for pair in image.lines.windows(2) {
            assert!(pair[0].0 < pair[1].0, "offsets ascend");
        }
        assert_eq!(image.line_for_offset(0), 1);
    }
}
