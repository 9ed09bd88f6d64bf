// AVM2 instruction decoding
// Operands are decoded eagerly; getlocal_n/setlocal_n fold into their indexed forms

use std::sync::Arc;

use super::reader::AbcReader;
use crate::error::{unsupported, VmError, VmResult};

/// Branch condition for the two-operand conditional jumps
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Condition {
    NotLessThan,
    NotLessEqual,
    NotGreaterThan,
    NotGreaterEqual,
    Equal,
    NotEqual,
    LessThan,
    LessEqual,
    GreaterThan,
    GreaterEqual,
    StrictEqual,
    StrictNotEqual,
}

/// Shared operand layout of the call family: multiname or method index plus argument count
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallSite {
    pub index: u32,
    pub argc: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Instr {
    Nop,
    Throw,
    GetSuper(u32),
    SetSuper(u32),
    Kill(u32),
    Label,
    /// Relative offsets are measured from the end of the instruction
    Jump(i32),
    IfTrue(i32),
    IfFalse(i32),
    If(Condition, i32),
    /// Offsets are measured from the start of the instruction
    LookupSwitch {
        default: i32,
        cases: Arc<[i32]>,
    },
    PushWith,
    PopScope,
    NextName,
    HasNext,
    PushNull,
    PushUndefined,
    NextValue,
    PushByte(i8),
    PushShort(i32),
    PushTrue,
    PushFalse,
    PushNan,
    Pop,
    Dup,
    Swap,
    PushString(u32),
    PushInt(u32),
    PushUint(u32),
    PushDouble(u32),
    PushScope,
    PushNamespace(u32),
    HasNext2 { object_reg: u32, index_reg: u32 },
    NewFunction(u32),
    Call(u32),
    Construct(u32),
    CallSuper(CallSite),
    CallProperty(CallSite),
    ReturnVoid,
    ReturnValue,
    ConstructSuper(u32),
    ConstructProp(CallSite),
    CallPropLex(CallSite),
    CallSuperVoid(CallSite),
    CallPropVoid(CallSite),
    /// Parameterize a generic type with the given number of type arguments
    ApplyType(u32),
    NewObject(u32),
    NewArray(u32),
    NewActivation,
    NewClass(u32),
    NewCatch(u32),
    FindPropStrict(u32),
    FindProperty(u32),
    GetLex(u32),
    SetProperty(u32),
    GetLocal(u32),
    SetLocal(u32),
    GetGlobalScope,
    GetScopeObject(u8),
    GetProperty(u32),
    InitProperty(u32),
    DeleteProperty(u32),
    GetSlot(u32),
    SetSlot(u32),
    GetGlobalSlot(u32),
    SetGlobalSlot(u32),
    ConvertString,
    ConvertInt,
    ConvertUint,
    ConvertDouble,
    ConvertBoolean,
    ConvertObject,
    Coerce(u32),
    CoerceAny,
    CoerceString,
    CoerceBoolean,
    CoerceInt,
    CoerceDouble,
    CoerceUint,
    CoerceObject,
    AsType(u32),
    AsTypeLate,
    Negate,
    Increment,
    IncLocal(u32),
    Decrement,
    DecLocal(u32),
    TypeOf,
    Not,
    BitNot,
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    LShift,
    RShift,
    URShift,
    BitAnd,
    BitOr,
    BitXor,
    Equals,
    StrictEquals,
    LessThan,
    LessEquals,
    GreaterThan,
    GreaterEquals,
    InstanceOf,
    IsType(u32),
    IsTypeLate,
    In,
    IncrementI,
    DecrementI,
    IncLocalI(u32),
    DecLocalI(u32),
    NegateI,
    AddI,
    SubtractI,
    MultiplyI,
    Debug,
    DebugLine(u32),
    DebugFile(u32),
}

impl Instr {
    /// Absolute targets this instruction may transfer control to
    pub fn branch_targets(&self, pc: usize, next: usize) -> Vec<i64> {
        match self {
            Instr::Jump(off) | Instr::IfTrue(off) | Instr::IfFalse(off) | Instr::If(_, off) => {
                vec![next as i64 + *off as i64]
            }
            Instr::LookupSwitch { default, cases } => std::iter::once(default)
                .chain(cases.iter())
                .map(|off| pc as i64 + *off as i64)
                .collect(),
            _ => Vec::new(),
        }
    }
}

fn u30(r: &mut AbcReader<'_>) -> VmResult<u32> {
    Ok(r.read_u30()?)
}

fn s24(r: &mut AbcReader<'_>) -> VmResult<i32> {
    Ok(r.read_s24()?)
}

fn call_site(r: &mut AbcReader<'_>) -> VmResult<CallSite> {
    Ok(CallSite {
        index: r.read_u30()?,
        argc: r.read_u30()?,
    })
}

fn truncated_code(pc: usize, err: VmError) -> VmError {
    VmError::new(err.kind, format!("{} in instruction at {}", err.message, pc))
}

/// Decode the instruction starting at `pc`, returning it with the offset of the next one
pub fn decode(code: &[u8], pc: usize) -> VmResult<(Instr, usize)> {
    let mut r = AbcReader::at(code, pc);
    let op = r.read_u8().map_err(|e| truncated_code(pc, e.into()))?;
    let instr = decode_operands(op, &mut r).map_err(|e| {
        if e.kind == crate::error::ErrorKind::CorruptAbc {
            truncated_code(pc, e)
        } else {
            e
        }
    })?;
    Ok((instr, r.position()))
}

fn decode_operands(op: u8, r: &mut AbcReader<'_>) -> VmResult<Instr> {
    use Condition::*;
    Ok(match op {
        0x02 => Instr::Nop,
        0x03 => Instr::Throw,
        0x04 => Instr::GetSuper(u30(r)?),
        0x05 => Instr::SetSuper(u30(r)?),
        0x08 => Instr::Kill(u30(r)?),
        0x09 => Instr::Label,
        0x0c => Instr::If(NotLessThan, s24(r)?),
        0x0d => Instr::If(NotLessEqual, s24(r)?),
        0x0e => Instr::If(NotGreaterThan, s24(r)?),
        0x0f => Instr::If(NotGreaterEqual, s24(r)?),
        0x10 => Instr::Jump(s24(r)?),
        0x11 => Instr::IfTrue(s24(r)?),
        0x12 => Instr::IfFalse(s24(r)?),
        0x13 => Instr::If(Equal, s24(r)?),
        0x14 => Instr::If(NotEqual, s24(r)?),
        0x15 => Instr::If(LessThan, s24(r)?),
        0x16 => Instr::If(LessEqual, s24(r)?),
        0x17 => Instr::If(GreaterThan, s24(r)?),
        0x18 => Instr::If(GreaterEqual, s24(r)?),
        0x19 => Instr::If(StrictEqual, s24(r)?),
        0x1a => Instr::If(StrictNotEqual, s24(r)?),
        0x1b => {
            let default = s24(r)?;
            let count = r.read_u30()?;
            let mut cases = Vec::with_capacity(count.min(256) as usize + 1);
            for _ in 0..=count {
                cases.push(s24(r)?);
            }
            Instr::LookupSwitch {
                default,
                cases: cases.into(),
            }
        }
        0x1c => Instr::PushWith,
        0x1d => Instr::PopScope,
        0x1e => Instr::NextName,
        0x1f => Instr::HasNext,
        0x20 => Instr::PushNull,
        0x21 => Instr::PushUndefined,
        0x23 => Instr::NextValue,
        0x24 => Instr::PushByte(r.read_u8()? as i8),
        // pushshort carries a u30 whose low 16 bits are sign-extended
        0x25 => Instr::PushShort((r.read_u30()? as u16) as i16 as i32),
        0x26 => Instr::PushTrue,
        0x27 => Instr::PushFalse,
        0x28 => Instr::PushNan,
        0x29 => Instr::Pop,
        0x2a => Instr::Dup,
        0x2b => Instr::Swap,
        0x2c => Instr::PushString(u30(r)?),
        0x2d => Instr::PushInt(u30(r)?),
        0x2e => Instr::PushUint(u30(r)?),
        0x2f => Instr::PushDouble(u30(r)?),
        0x30 => Instr::PushScope,
        0x31 => Instr::PushNamespace(u30(r)?),
        0x32 => Instr::HasNext2 {
            object_reg: u30(r)?,
            index_reg: u30(r)?,
        },
        0x40 => Instr::NewFunction(u30(r)?),
        0x41 => Instr::Call(u30(r)?),
        0x42 => Instr::Construct(u30(r)?),
        0x45 => Instr::CallSuper(call_site(r)?),
        0x46 => Instr::CallProperty(call_site(r)?),
        0x47 => Instr::ReturnVoid,
        0x48 => Instr::ReturnValue,
        0x49 => Instr::ConstructSuper(u30(r)?),
        0x4a => Instr::ConstructProp(call_site(r)?),
        0x4c => Instr::CallPropLex(call_site(r)?),
        0x4e => Instr::CallSuperVoid(call_site(r)?),
        0x4f => Instr::CallPropVoid(call_site(r)?),
        0x53 => Instr::ApplyType(u30(r)?),
        0x55 => Instr::NewObject(u30(r)?),
        0x56 => Instr::NewArray(u30(r)?),
        0x57 => Instr::NewActivation,
        0x58 => Instr::NewClass(u30(r)?),
        0x5a => Instr::NewCatch(u30(r)?),
        0x5d => Instr::FindPropStrict(u30(r)?),
        0x5e => Instr::FindProperty(u30(r)?),
        0x60 => Instr::GetLex(u30(r)?),
        0x61 => Instr::SetProperty(u30(r)?),
        0x62 => Instr::GetLocal(u30(r)?),
        0x63 => Instr::SetLocal(u30(r)?),
        0x64 => Instr::GetGlobalScope,
        0x65 => Instr::GetScopeObject(r.read_u8()?),
        0x66 => Instr::GetProperty(u30(r)?),
        0x68 => Instr::InitProperty(u30(r)?),
        0x6a => Instr::DeleteProperty(u30(r)?),
        0x6c => Instr::GetSlot(u30(r)?),
        0x6d => Instr::SetSlot(u30(r)?),
        0x6e => Instr::GetGlobalSlot(u30(r)?),
        0x6f => Instr::SetGlobalSlot(u30(r)?),
        0x70 => Instr::ConvertString,
        0x73 => Instr::ConvertInt,
        0x74 => Instr::ConvertUint,
        0x75 => Instr::ConvertDouble,
        0x76 => Instr::ConvertBoolean,
        0x77 => Instr::ConvertObject,
        0x80 => Instr::Coerce(u30(r)?),
        0x81 => Instr::CoerceBoolean,
        0x82 => Instr::CoerceAny,
        0x83 => Instr::CoerceInt,
        0x84 => Instr::CoerceDouble,
        0x85 => Instr::CoerceString,
        0x86 => Instr::AsType(u30(r)?),
        0x87 => Instr::AsTypeLate,
        0x88 => Instr::CoerceUint,
        0x89 => Instr::CoerceObject,
        0x90 => Instr::Negate,
        0x91 => Instr::Increment,
        0x92 => Instr::IncLocal(u30(r)?),
        0x93 => Instr::Decrement,
        0x94 => Instr::DecLocal(u30(r)?),
        0x95 => Instr::TypeOf,
        0x96 => Instr::Not,
        0x97 => Instr::BitNot,
        0xa0 => Instr::Add,
        0xa1 => Instr::Subtract,
        0xa2 => Instr::Multiply,
        0xa3 => Instr::Divide,
        0xa4 => Instr::Modulo,
        0xa5 => Instr::LShift,
        0xa6 => Instr::RShift,
        0xa7 => Instr::URShift,
        0xa8 => Instr::BitAnd,
        0xa9 => Instr::BitOr,
        0xaa => Instr::BitXor,
        0xab => Instr::Equals,
        0xac => Instr::StrictEquals,
        0xad => Instr::LessThan,
        0xae => Instr::LessEquals,
        0xaf => Instr::GreaterThan,
        0xb0 => Instr::GreaterEquals,
        0xb1 => Instr::InstanceOf,
        0xb2 => Instr::IsType(u30(r)?),
        0xb3 => Instr::IsTypeLate,
        0xb4 => Instr::In,
        0xc0 => Instr::IncrementI,
        0xc1 => Instr::DecrementI,
        0xc2 => Instr::IncLocalI(u30(r)?),
        0xc3 => Instr::DecLocalI(u30(r)?),
        0xc4 => Instr::NegateI,
        0xc5 => Instr::AddI,
        0xc6 => Instr::SubtractI,
        0xc7 => Instr::MultiplyI,
        0xd0..=0xd3 => Instr::GetLocal((op - 0xd0) as u32),
        0xd4..=0xd7 => Instr::SetLocal((op - 0xd4) as u32),
        0xef => {
            // debug_type, index, reg, extra
            r.read_u8()?;
            r.read_u30()?;
            r.read_u8()?;
            r.read_u30()?;
            Instr::Debug
        }
        0xf0 => Instr::DebugLine(u30(r)?),
        0xf1 => Instr::DebugFile(u30(r)?),
        other => return Err(unsupported(format!("Opcode 0x{:02x} not implemented", other))),
    })
}
