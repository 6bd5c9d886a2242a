//! Opcode set and instruction encoding.
//!
//! Code is a flat byte array: one opcode byte followed by little-endian
//! operands. The VM decodes one instruction per step; the compiler emits
//! through [`encode`] and backpatches jump targets in place.

/// A variable reference operand: a frame-local slot or a named global
/// resolved through the symbol table at run time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VarRef {
    Local(u16),
    Global(u32),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    PushInt = 0x01,
    PushFloat = 0x02,
    PushString = 0x03,
    PushBool = 0x04,
    PushNull = 0x05,
    PushVar = 0x06,
    PopVar = 0x07,
    PopEmpty = 0x08,
    PushThis = 0x09,
    PopThis = 0x0A,

    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    Div = 0x13,
    Mod = 0x14,
    Neg = 0x15,

    Eq = 0x20,
    Ne = 0x21,
    StrictEq = 0x22,
    StrictNe = 0x23,
    Lt = 0x24,
    Gt = 0x25,
    Le = 0x26,
    Ge = 0x27,
    Not = 0x28,

    Jump = 0x30,
    JumpIfFalse = 0x31,
    JumpIfTrue = 0x32,
    Call = 0x33,
    CallMethod = 0x34,
    Return = 0x35,
    ReturnEvent = 0x36,

    GetProperty = 0x40,
    SetProperty = 0x41,
    NewObject = 0x42,
    GetElem = 0x43,
    SetElem = 0x44,
    NewArray = 0x45,

    Sleep = 0x50,
    Yield = 0x51,
}

impl Opcode {
    pub fn from_byte(byte: u8) -> Option<Self> {
        use Opcode::*;
        Some(match byte {
            0x01 => PushInt,
            0x02 => PushFloat,
            0x03 => PushString,
            0x04 => PushBool,
            0x05 => PushNull,
            0x06 => PushVar,
            0x07 => PopVar,
            0x08 => PopEmpty,
            0x09 => PushThis,
            0x0A => PopThis,
            0x10 => Add,
            0x11 => Sub,
            0x12 => Mul,
            0x13 => Div,
            0x14 => Mod,
            0x15 => Neg,
            0x20 => Eq,
            0x21 => Ne,
            0x22 => StrictEq,
            0x23 => StrictNe,
            0x24 => Lt,
            0x25 => Gt,
            0x26 => Le,
            0x27 => Ge,
            0x28 => Not,
            0x30 => Jump,
            0x31 => JumpIfFalse,
            0x32 => JumpIfTrue,
            0x33 => Call,
            0x34 => CallMethod,
            0x35 => Return,
            0x36 => ReturnEvent,
            0x40 => GetProperty,
            0x41 => SetProperty,
            0x42 => NewObject,
            0x43 => GetElem,
            0x44 => SetElem,
            0x45 => NewArray,
            0x50 => Sleep,
            0x51 => Yield,
            _ => return None,
        })
    }
}

/// One decoded instruction. Symbol operands index the image's symbol
/// table; jump targets are byte offsets into the code array.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum Instr {
    PushInt(i32),
    PushFloat(f64),
    PushString(u32),
    PushBool(bool),
    PushNull,
    PushVar(VarRef),
    PopVar(VarRef),
    PopEmpty,
    PushThis,
    PopThis,

    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Neg,

    Eq,
    Ne,
    StrictEq,
    StrictNe,
    Lt,
    Gt,
    Le,
    Ge,
    Not,

    Jump(u32),
    JumpIfFalse(u32),
    JumpIfTrue(u32),
    Call { name: u32, argc: u8 },
    CallMethod { name: u32, argc: u8 },
    Return,
    ReturnEvent,

    GetProperty(u32),
    SetProperty(u32),
    NewObject { class: u32, argc: u8 },
    GetElem,
    SetElem(VarRef),
    NewArray(u16),

    Sleep,
    Yield,
}

const SCOPE_LOCAL: u8 = 0;
const SCOPE_GLOBAL: u8 = 1;

fn push_var_ref(out: &mut Vec<u8>, var: VarRef) {
    match var {
        VarRef::Local(slot) => {
            out.push(SCOPE_LOCAL);
            out.extend_from_slice(&u32::from(slot).to_le_bytes());
        }
        VarRef::Global(symbol) => {
            out.push(SCOPE_GLOBAL);
            out.extend_from_slice(&symbol.to_le_bytes());
        }
    }
}

/// Appends one instruction; returns its start offset.
pub fn encode(out: &mut Vec<u8>, instr: &Instr) -> u32 {
    let at = out.len() as u32;
    match *instr {
        Instr::PushInt(value) => {
            out.push(Opcode::PushInt as u8);
            out.extend_from_slice(&value.to_le_bytes());
        }
        Instr::PushFloat(value) => {
            out.push(Opcode::PushFloat as u8);
            out.extend_from_slice(&value.to_le_bytes());
        }
        Instr::PushString(symbol) => {
            out.push(Opcode::PushString as u8);
            out.extend_from_slice(&symbol.to_le_bytes());
        }
        Instr::PushBool(value) => {
            out.push(Opcode::PushBool as u8);
            out.push(u8::from(value));
        }
        Instr::PushNull => out.push(Opcode::PushNull as u8),
        Instr::PushVar(var) => {
            out.push(Opcode::PushVar as u8);
            push_var_ref(out, var);
        }
        Instr::PopVar(var) => {
            out.push(Opcode::PopVar as u8);
            push_var_ref(out, var);
        }
        Instr::PopEmpty => out.push(Opcode::PopEmpty as u8),
        Instr::PushThis => out.push(Opcode::PushThis as u8),
        Instr::PopThis => out.push(Opcode::PopThis as u8),
        Instr::Add => out.push(Opcode::Add as u8),
        Instr::Sub => out.push(Opcode::Sub as u8),
        Instr::Mul => out.push(Opcode::Mul as u8),
        Instr::Div => out.push(Opcode::Div as u8),
        Instr::Mod => out.push(Opcode::Mod as u8),
        Instr::Neg => out.push(Opcode::Neg as u8),
        Instr::Eq => out.push(Opcode::Eq as u8),
        Instr::Ne => out.push(Opcode::Ne as u8),
        Instr::StrictEq => out.push(Opcode::StrictEq as u8),
        Instr::StrictNe => out.push(Opcode::StrictNe as u8),
        Instr::Lt => out.push(Opcode::Lt as u8),
        Instr::Gt => out.push(Opcode::Gt as u8),
        Instr::Le => out.push(Opcode::Le as u8),
        Instr::Ge => out.push(Opcode::Ge as u8),
        Instr::Not => out.push(Opcode::Not as u8),
        Instr::Jump(target) => {
            out.push(Opcode::Jump as u8);
            out.extend_from_slice(&target.to_le_bytes());
        }
        Instr::JumpIfFalse(target) => {
            out.push(Opcode::JumpIfFalse as u8);
            out.extend_from_slice(&target.to_le_bytes());
        }
        Instr::JumpIfTrue(target) => {
            out.push(Opcode::JumpIfTrue as u8);
            out.extend_from_slice(&target.to_le_bytes());
        }
        Instr::Call { name, argc } => {
            out.push(Opcode::Call as u8);
            out.extend_from_slice(&name.to_le_bytes());
            out.push(argc);
        }
        Instr::CallMethod { name, argc } => {
            out.push(Opcode::CallMethod as u8);
            out.extend_from_slice(&name.to_le_bytes());
            out.push(argc);
        }
        Instr::Return => out.push(Opcode::Return as u8),
        Instr::ReturnEvent => out.push(Opcode::ReturnEvent as u8),
        Instr::GetProperty(symbol) => {
            out.push(Opcode::GetProperty as u8);
            out.extend_from_slice(&symbol.to_le_bytes());
        }
        Instr::SetProperty(symbol) => {
            out.push(Opcode::SetProperty as u8);
            out.extend_from_slice(&symbol.to_le_bytes());
        }
        Instr::NewObject { class, argc } => {
            out.push(Opcode::NewObject as u8);
            out.extend_from_slice(&class.to_le_bytes());
            out.push(argc);
        }
        Instr::GetElem => out.push(Opcode::GetElem as u8),
        Instr::SetElem(var) => {
            out.push(Opcode::SetElem as u8);
            push_var_ref(out, var);
        }
        Instr::NewArray(count) => {
            out.push(Opcode::NewArray as u8);
            out.extend_from_slice(&count.to_le_bytes());
        }
        Instr::Sleep => out.push(Opcode::Sleep as u8),
        Instr::Yield => out.push(Opcode::Yield as u8),
    }
    at
}

/// Patches the u32 operand of a jump previously emitted at `at`.
pub fn patch_jump(code: &mut [u8], at: u32, target: u32) {
    let operand = at as usize + 1;
    code[operand..operand + 4].copy_from_slice(&target.to_le_bytes());
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DecodeError {
    pub offset: u32,
}

fn take<const N: usize>(code: &[u8], at: usize) -> Result<[u8; N], DecodeError> {
    code.get(at..at + N)
        .and_then(|bytes| bytes.try_into().ok())
        .ok_or(DecodeError { offset: at as u32 })
}

fn take_var_ref(code: &[u8], at: usize) -> Result<(VarRef, usize), DecodeError> {
    let scope = *code.get(at).ok_or(DecodeError { offset: at as u32 })?;
    let raw = u32::from_le_bytes(take::<4>(code, at + 1)?);
    let var = match scope {
        SCOPE_LOCAL => VarRef::Local(raw as u16),
        SCOPE_GLOBAL => VarRef::Global(raw),
        _ => return Err(DecodeError { offset: at as u32 }),
    };
    Ok((var, at + 5))
}

/// Decodes the instruction at `offset`; returns it and the next offset.
pub fn decode(code: &[u8], offset: u32) -> Result<(Instr, u32), DecodeError> {
    let at = offset as usize;
    let opcode = code
        .get(at)
        .copied()
        .and_then(Opcode::from_byte)
        .ok_or(DecodeError { offset })?;
    let operand = at + 1;
    let (instr, next) = match opcode {
        Opcode::PushInt => (
            Instr::PushInt(i32::from_le_bytes(take::<4>(code, operand)?)),
            operand + 4,
        ),
        Opcode::PushFloat => (
            Instr::PushFloat(f64::from_le_bytes(take::<8>(code, operand)?)),
            operand + 8,
        ),
        Opcode::PushString => (
            Instr::PushString(u32::from_le_bytes(take::<4>(code, operand)?)),
            operand + 4,
        ),
        Opcode::PushBool => {
            let value = *code.get(operand).ok_or(DecodeError { offset })?;
            (Instr::PushBool(value != 0), operand + 1)
        }
        Opcode::PushNull => (Instr::PushNull, operand),
        Opcode::PushVar => {
            let (var, next) = take_var_ref(code, operand)?;
            (Instr::PushVar(var), next)
        }
        Opcode::PopVar => {
            let (var, next) = take_var_ref(code, operand)?;
            (Instr::PopVar(var), next)
        }
        Opcode::PopEmpty => (Instr::PopEmpty, operand),
        Opcode::PushThis => (Instr::PushThis, operand),
        Opcode::PopThis => (Instr::PopThis, operand),
        Opcode::Add => (Instr::Add, operand),
        Opcode::Sub => (Instr::Sub, operand),
        Opcode::Mul => (Instr::Mul, operand),
        Opcode::Div => (Instr::Div, operand),
        Opcode::Mod => (Instr::Mod, operand),
        Opcode::Neg => (Instr::Neg, operand),
        Opcode::Eq => (Instr::Eq, operand),
        Opcode::Ne => (Instr::Ne, operand),
        Opcode::StrictEq => (Instr::StrictEq, operand),
        Opcode::StrictNe => (Instr::StrictNe, operand),
        Opcode::Lt => (Instr::Lt, operand),
        Opcode::Gt => (Instr::Gt, operand),
        Opcode::Le => (Instr::Le, operand),
        Opcode::Ge => (Instr::Ge, operand),
        Opcode::Not => (Instr::Not, operand),
        Opcode::Jump => (
            Instr::Jump(u32::from_le_bytes(take::<4>(code, operand)?)),
            operand + 4,
        ),
        Opcode::JumpIfFalse => (
            Instr::JumpIfFalse(u32::from_le_bytes(take::<4>(code, operand)?)),
            operand + 4,
        ),
        Opcode::JumpIfTrue => (
            Instr::JumpIfTrue(u32::from_le_bytes(take::<4>(code, operand)?)),
            operand + 4,
        ),
        Opcode::Call | Opcode::CallMethod | Opcode::NewObject => {
            let name = u32::from_le_bytes(take::<4>(code, operand)?);
            let argc = *code.get(operand + 4).ok_or(DecodeError { offset })?;
            let instr = match opcode {
                Opcode::Call => Instr::Call { name, argc },
                Opcode::CallMethod => Instr::CallMethod { name, argc },
                _ => Instr::NewObject { class: name, argc },
            };
            (instr, operand + 5)
        }
        Opcode::Return => (Instr::Return, operand),
        Opcode::ReturnEvent => (Instr::ReturnEvent, operand),
        Opcode::GetProperty => (
            Instr::GetProperty(u32::from_le_bytes(take::<4>(code, operand)?)),
            operand + 4,
        ),
        Opcode::SetProperty => (
            Instr::SetProperty(u32::from_le_bytes(take::<4>(code, operand)?)),
            operand + 4,
        ),
        Opcode::GetElem => (Instr::GetElem, operand),
        Opcode::SetElem => {
            let (var, next) = take_var_ref(code, operand)?;
            (Instr::SetElem(var), next)
        }
        Opcode::NewArray => (
            Instr::NewArray(u16::from_le_bytes(take::<2>(code, operand)?)),
            operand + 2,
        ),
        Opcode::Sleep => (Instr::Sleep, operand),
        Opcode::Yield => (Instr::Yield, operand),
    };
    Ok((instr, next as u32))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_instruction_roundtrips() {
        let samples = [
            Instr::PushInt(-42),
            Instr::PushFloat(2.75),
            Instr::PushString(7),
            Instr::PushBool(true),
            Instr::PushNull,
            Instr::PushVar(VarRef::Local(3)),
            Instr::PopVar(VarRef::Global(11)),
            Instr::PopEmpty,
            Instr::PushThis,
            Instr::PopThis,
            Instr::Add,
            Instr::Neg,
            Instr::StrictNe,
            Instr::Jump(0xDEAD),
            Instr::JumpIfFalse(1),
            Instr::JumpIfTrue(2),
            Instr::Call { name: 5, argc: 2 },
            Instr::CallMethod { name: 6, argc: 0 },
            Instr::Return,
            Instr::ReturnEvent,
            Instr::GetProperty(9),
            Instr::SetProperty(10),
            Instr::NewObject { class: 4, argc: 1 },
            Instr::GetElem,
            Instr::SetElem(VarRef::Local(1)),
            Instr::NewArray(3),
            Instr::Sleep,
            Instr::Yield,
        ];
        let mut code = Vec::new();
        let offsets: Vec<u32> = samples
            .iter()
            .map(|instr| encode(&mut code, instr))
            .collect();

        let mut cursor = 0u32;
        for (instr, offset) in samples.iter().zip(offsets) {
            assert_eq!(cursor, offset);
            let (decoded, next) = decode(&code, cursor).expect("decode");
            assert_eq!(&decoded, instr);
            cursor = next;
        }
        assert_eq!(cursor as usize, code.len());
    }

    #[test]
    fn truncated_and_unknown_bytes_fail_cleanly() {
        let mut code = Vec::new();
        encode(&mut code, &Instr::PushInt(5));
        assert!(decode(&code[..2], 0).is_err());
        assert!(decode(&[0xFF], 0).is_err());
        assert!(decode(&code, 99).is_err());
    }

    #[test]
    fn jump_patching_rewrites_the_operand() {
        let mut code = Vec::new();
        let at = encode(&mut code, &Instr::JumpIfFalse(0));
        encode(&mut code, &Instr::PushNull);
        patch_jump(&mut code, at, 1234);
        let (decoded, _) = decode(&code, 0).expect("decode");
        assert_eq!(decoded, Instr::JumpIfFalse(1234));
    }
}
