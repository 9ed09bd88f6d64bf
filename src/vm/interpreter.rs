// Bytecode interpreter
// Executes one method body; the compiled tier feeds the same loop pre-decoded instructions

use std::sync::Arc;

use log::{debug, error};

use super::frame::CallFrame;
use super::multiname::{ResolvedName, RuntimeOperands};
use super::object::{Binding, ScriptObject};
use super::runtime::Runtime;
use super::value::{FunctionRef, Value};
use super::context::AbcContext;
use super::function::{Closure, Function, MethodHandle};
use super::interner::intern;
use crate::abc::opcode::{self, Condition, Instr};
use crate::abc::MethodBody;
use crate::error::{corrupt, reference_error, type_error, ErrorKind, StackFrame, VmError, VmResult};

/// Supplies the instruction at a byte offset
pub trait CodeSource {
    fn fetch(&self, pc: usize) -> VmResult<(Instr, usize)>;

    /// Code length in bytes
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Raw bytecode decoded on every fetch
pub struct Bytecode<'a>(pub &'a [u8]);

impl CodeSource for Bytecode<'_> {
    fn fetch(&self, pc: usize) -> VmResult<(Instr, usize)> {
        opcode::decode(self.0, pc)
    }

    fn len(&self) -> usize {
        self.0.len()
    }
}

/// Run `body` to completion, handling exceptions raised inside it
pub fn execute(
    rt: &mut Runtime,
    function: &FunctionRef,
    context: &Arc<AbcContext>,
    body: &MethodBody,
    locals: Vec<Value>,
    code: &dyn CodeSource,
) -> VmResult<Value> {
    let mut frame = CallFrame::new(function, context, body, locals);
    loop {
        match run(rt, &mut frame, code) {
            Ok(value) => {
                frame.check_clean();
                return Ok(value);
            }
            Err(mut err) => {
                if err.is_catchable() {
                    let thrown = match &err.thrown {
                        Some(v) => v.clone(),
                        None => {
                            let v = rt.materialize_error(&err);
                            err.thrown = Some(v.clone());
                            v
                        }
                    };
                    if let Some(target) = find_handler(rt, &frame, &thrown) {
                        debug!("Caught {} in {} at {}", err.kind, function.name, frame.pc);
                        frame.enter_handler(target, thrown);
                        continue;
                    }
                } else if err.kind == ErrorKind::Unsupported && err.stack_trace.is_empty() {
                    error!("{}", err.message);
                }
                err.push_frame(StackFrame::new(function.name.to_string(), frame.pc));
                return Err(err);
            }
        }
    }
}

/// Handler covering the current instruction whose type accepts `thrown`
fn find_handler(rt: &mut Runtime, frame: &CallFrame<'_>, thrown: &Value) -> Option<usize> {
    for exc in &frame.body.exceptions {
        if frame.pc < exc.from as usize || frame.pc >= exc.to as usize {
            continue;
        }
        if exc.exc_type == 0 {
            return Some(exc.target as usize);
        }
        let Ok(name) = frame.context.resolve(exc.exc_type, RuntimeOperands::None) else {
            continue;
        };
        match rt.find_class(&name) {
            Ok(class) if rt.is_type(thrown, class) => return Some(exc.target as usize),
            Ok(_) => {}
            Err(e) => debug!("Skipping handler for unknown type {}: {}", name, e.message),
        }
    }
    None
}

fn branch(base: usize, offset: i32, code: &dyn CodeSource) -> VmResult<usize> {
    let target = base as i64 + offset as i64;
    if target < 0 || target as usize >= code.len() {
        return Err(corrupt(format!("Branch target {} outside of {} code bytes", target, code.len())));
    }
    Ok(target as usize)
}

/// Integral results stay `int` when they fit
fn number(n: f64) -> Value {
    if n.fract() == 0.0
        && n >= i32::MIN as f64
        && n <= i32::MAX as f64
        && !(n == 0.0 && n.is_sign_negative())
    {
        Value::Integer(n as i32)
    } else {
        Value::Number(n)
    }
}

fn is_number_like(v: &Value) -> bool {
    matches!(
        v,
        Value::Undefined | Value::Null | Value::Boolean(_) | Value::Integer(_) | Value::UInteger(_) | Value::Number(_)
    )
}

fn add(rt: &Runtime, a: &Value, b: &Value) -> Value {
    match (a, b) {
        (Value::Integer(x), Value::Integer(y)) => match x.checked_add(*y) {
            Some(r) => Value::Integer(r),
            None => Value::Number(*x as f64 + *y as f64),
        },
        _ if is_number_like(a) && is_number_like(b) => number(a.to_number() + b.to_number()),
        _ => {
            let mut s = rt.string_of(a).to_string();
            s.push_str(&rt.string_of(b));
            Value::String(Arc::from(s))
        }
    }
}

fn compare(cond: Condition, a: &Value, b: &Value) -> bool {
    match cond {
        Condition::LessThan => a.less_than(b) == Some(true),
        Condition::NotLessThan => a.less_than(b) != Some(true),
        Condition::LessEqual => b.less_than(a) == Some(false),
        Condition::NotLessEqual => b.less_than(a) != Some(false),
        Condition::GreaterThan => b.less_than(a) == Some(true),
        Condition::NotGreaterThan => b.less_than(a) != Some(true),
        Condition::GreaterEqual => a.less_than(b) == Some(false),
        Condition::NotGreaterEqual => a.less_than(b) != Some(false),
        Condition::Equal => a.loose_equals(b),
        Condition::NotEqual => !a.loose_equals(b),
        Condition::StrictEqual => a.strict_equals(b),
        Condition::StrictNotEqual => !a.strict_equals(b),
    }
}

/// Resolve multiname `index`, popping the runtime operands it needs
fn resolve(frame: &mut CallFrame<'_>, index: u32) -> VmResult<Arc<ResolvedName>> {
    let operands = match frame.context.runtime_operands(index)? {
        (false, false) => RuntimeOperands::None,
        (true, false) => RuntimeOperands::Name(frame.pop()?),
        (false, true) => RuntimeOperands::Namespace(frame.pop()?),
        (true, true) => {
            let name = frame.pop()?;
            let ns = frame.pop()?;
            RuntimeOperands::NameAndNamespace { name, ns }
        }
    };
    frame.context.resolve(index, operands)
}

/// Innermost scope object carrying `name`, then the global object
fn find_property(rt: &mut Runtime, frame: &CallFrame<'_>, name: &ResolvedName, strict: bool) -> VmResult<Value> {
    for scope in frame.scope_chain().iter().rev() {
        if rt.has_property(scope, name)? {
            return Ok(scope.clone());
        }
    }
    let global = rt.global_value();
    if rt.has_property(&global, name)? || !strict {
        return Ok(global);
    }
    Err(reference_error(format!("Variable {} is not defined", name)))
}

fn resolve_type(rt: &mut Runtime, frame: &CallFrame<'_>, index: u32) -> VmResult<super::class::ClassId> {
    let name = frame.context.resolve(index, RuntimeOperands::None)?;
    rt.find_class(&name)
}

fn class_operand(value: &Value) -> VmResult<super::class::ClassId> {
    match value {
        Value::Class(id) => Ok(*id),
        other => Err(type_error(format!("{} is not a class", other.type_name()))),
    }
}

fn run(rt: &mut Runtime, frame: &mut CallFrame<'_>, code: &dyn CodeSource) -> VmResult<Value> {
    loop {
        let pc = frame.pc;
        let (instr, next) = code.fetch(pc)?;
        let mut jump = None;

        match instr {
            Instr::Nop | Instr::Label | Instr::Debug | Instr::DebugLine(_) | Instr::DebugFile(_) => {}
            Instr::Throw => {
                let value = frame.pop()?;
                let mut err = VmError::thrown(value.clone());
                err.message = rt.string_of(&value).to_string();
                return Err(err);
            }
            Instr::Kill(i) => frame.set_local(i, Value::Undefined)?,

            // Control flow
            Instr::Jump(off) => jump = Some(branch(next, off, code)?),
            Instr::IfTrue(off) => {
                if frame.pop()?.to_boolean() {
                    jump = Some(branch(next, off, code)?);
                }
            }
            Instr::IfFalse(off) => {
                if !frame.pop()?.to_boolean() {
                    jump = Some(branch(next, off, code)?);
                }
            }
            Instr::If(cond, off) => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                if compare(cond, &a, &b) {
                    jump = Some(branch(next, off, code)?);
                }
            }
            Instr::LookupSwitch { default, cases } => {
                let index = frame.pop()?.to_number();
                let offset = if index >= 0.0 && index.fract() == 0.0 && (index as usize) < cases.len() {
                    cases[index as usize]
                } else {
                    default
                };
                jump = Some(branch(pc, offset, code)?);
            }
            Instr::ReturnVoid => return Ok(Value::Undefined),
            Instr::ReturnValue => return frame.pop(),

            // Stack
            Instr::PushNull => frame.push(Value::Null)?,
            Instr::PushUndefined => frame.push(Value::Undefined)?,
            Instr::PushTrue => frame.push(Value::Boolean(true))?,
            Instr::PushFalse => frame.push(Value::Boolean(false))?,
            Instr::PushNan => frame.push(Value::Number(f64::NAN))?,
            Instr::PushByte(b) => frame.push(Value::Integer(b as i32))?,
            Instr::PushShort(s) => frame.push(Value::Integer(s))?,
            Instr::PushString(i) => frame.push(Value::String(frame.context.string(i)))?,
            Instr::PushInt(i) => {
                let v = frame.context.constant(crate::abc::ConstantKind::Int, i);
                frame.push(v)?
            }
            Instr::PushUint(i) => {
                let v = frame.context.constant(crate::abc::ConstantKind::UInt, i);
                frame.push(v)?
            }
            Instr::PushDouble(i) => {
                let v = frame.context.constant(crate::abc::ConstantKind::Double, i);
                frame.push(v)?
            }
            Instr::PushNamespace(i) => {
                let ns = frame.context.namespace(i);
                frame.push(Value::Namespace(ns))?
            }
            Instr::Pop => {
                frame.pop()?;
            }
            Instr::Dup => {
                let v = frame.peek()?.clone();
                frame.push(v)?;
            }
            Instr::Swap => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(b)?;
                frame.push(a)?;
            }

            // Locals
            Instr::GetLocal(i) => {
                let v = frame.local(i)?;
                frame.push(v)?;
            }
            Instr::SetLocal(i) => {
                let v = frame.pop()?;
                frame.set_local(i, v)?;
            }
            Instr::IncLocal(i) => {
                let v = number(frame.local(i)?.to_number() + 1.0);
                frame.set_local(i, v)?;
            }
            Instr::DecLocal(i) => {
                let v = number(frame.local(i)?.to_number() - 1.0);
                frame.set_local(i, v)?;
            }
            Instr::IncLocalI(i) => {
                let v = frame.local(i)?.to_int32().wrapping_add(1);
                frame.set_local(i, Value::Integer(v))?;
            }
            Instr::DecLocalI(i) => {
                let v = frame.local(i)?.to_int32().wrapping_sub(1);
                frame.set_local(i, Value::Integer(v))?;
            }

            // Scopes
            Instr::PushScope | Instr::PushWith => {
                let v = frame.pop()?;
                if v.is_nullish() {
                    return Err(type_error(format!("Cannot push {} onto the scope chain", v.type_name())));
                }
                frame.push_scope(v, matches!(instr, Instr::PushWith));
            }
            Instr::PopScope => {
                frame.pop_scope()?;
            }
            Instr::GetGlobalScope => {
                let v = frame.global_scope().unwrap_or_else(|| rt.global_value());
                frame.push(v)?;
            }
            Instr::GetScopeObject(i) => {
                let v = frame
                    .scope_stack
                    .get(i as usize)
                    .map(|s| s.value.clone())
                    .ok_or_else(|| corrupt(format!("Scope index {} out of range", i)))?;
                frame.push(v)?;
            }

            // Names
            Instr::FindPropStrict(i) | Instr::FindProperty(i) => {
                let name = resolve(frame, i)?;
                let found = find_property(rt, frame, &name, matches!(instr, Instr::FindPropStrict(_)))?;
                frame.push(found)?;
            }
            Instr::GetLex(i) => {
                let name = frame.context.resolve(i, RuntimeOperands::None)?;
                let holder = find_property(rt, frame, &name, true)?;
                let v = rt.get_property(&holder, &name)?;
                frame.push(v)?;
            }
            Instr::GetProperty(i) => {
                let name = resolve(frame, i)?;
                let obj = frame.pop()?;
                let v = rt.get_property(&obj, &name)?;
                frame.push(v)?;
            }
            Instr::SetProperty(i) | Instr::InitProperty(i) => {
                let value = frame.pop()?;
                let name = resolve(frame, i)?;
                let obj = frame.pop()?;
                if matches!(instr, Instr::InitProperty(_)) {
                    rt.init_property(&obj, &name, value)?;
                } else {
                    rt.set_property(&obj, &name, value)?;
                }
            }
            Instr::DeleteProperty(i) => {
                let name = resolve(frame, i)?;
                let obj = frame.pop()?;
                let deleted = rt.delete_property(&obj, &name)?;
                frame.push(Value::Boolean(deleted))?;
            }
            Instr::In => {
                let obj = frame.pop()?;
                let key = frame.pop()?;
                let name = ResolvedName::public(&rt.string_of(&key));
                let found = rt.has_property(&obj, &name)?;
                frame.push(Value::Boolean(found))?;
            }
            Instr::GetSlot(i) => {
                let obj = frame.pop()?;
                let v = rt.get_slot(&obj, i)?;
                frame.push(v)?;
            }
            Instr::SetSlot(i) => {
                let value = frame.pop()?;
                let obj = frame.pop()?;
                rt.set_slot(&obj, i, value)?;
            }
            Instr::GetGlobalSlot(i) => {
                let global = frame.global_scope().unwrap_or_else(|| rt.global_value());
                let v = rt.get_slot(&global, i)?;
                frame.push(v)?;
            }
            Instr::SetGlobalSlot(i) => {
                let value = frame.pop()?;
                let global = frame.global_scope().unwrap_or_else(|| rt.global_value());
                rt.set_slot(&global, i, value)?;
            }
            Instr::GetSuper(i) => {
                let name = resolve(frame, i)?;
                let obj = frame.pop()?;
                let v = rt.get_super(frame.function.closure.level, &obj, &name)?;
                frame.push(v)?;
            }
            Instr::SetSuper(i) => {
                let value = frame.pop()?;
                let name = resolve(frame, i)?;
                let obj = frame.pop()?;
                rt.set_super(frame.function.closure.level, &obj, &name, value)?;
            }

            // Calls
            Instr::Call(argc) => {
                let args = frame.pop_n(argc as usize)?;
                let this = frame.pop()?;
                let callee = frame.pop()?;
                let v = rt.call_value(&callee, this, &args)?;
                frame.push(v)?;
            }
            Instr::CallProperty(site) | Instr::CallPropLex(site) | Instr::CallPropVoid(site) => {
                let args = frame.pop_n(site.argc as usize)?;
                let name = resolve(frame, site.index)?;
                let receiver = frame.pop()?;
                let callee = rt.get_property(&receiver, &name)?;
                if !matches!(callee, Value::Function(_) | Value::Class(_)) {
                    return Err(type_error(format!("{} is not a function", name)));
                }
                let this = if matches!(instr, Instr::CallPropLex(_)) {
                    Value::Null
                } else {
                    receiver
                };
                let v = rt.call_value(&callee, this, &args)?;
                if !matches!(instr, Instr::CallPropVoid(_)) {
                    frame.push(v)?;
                }
            }
            Instr::CallSuper(site) | Instr::CallSuperVoid(site) => {
                let args = frame.pop_n(site.argc as usize)?;
                let name = resolve(frame, site.index)?;
                let receiver = frame.pop()?;
                let v = rt.call_super(frame.function.closure.level, &receiver, &name, &args)?;
                if matches!(instr, Instr::CallSuper(_)) {
                    frame.push(v)?;
                }
            }
            Instr::Construct(argc) => {
                let args = frame.pop_n(argc as usize)?;
                let ctor = frame.pop()?;
                let v = rt.construct(&ctor, &args)?;
                frame.push(v)?;
            }
            // Type arguments are dropped, so Vector.<T> stays Vector
            Instr::ApplyType(argc) => {
                frame.pop_n(argc as usize)?;
                let base = frame.pop()?;
                frame.push(base)?;
            }
            Instr::ConstructProp(site) => {
                let args = frame.pop_n(site.argc as usize)?;
                let name = resolve(frame, site.index)?;
                let obj = frame.pop()?;
                let ctor = rt.get_property(&obj, &name)?;
                let v = rt.construct(&ctor, &args)?;
                frame.push(v)?;
            }
            Instr::ConstructSuper(argc) => {
                let args = frame.pop_n(argc as usize)?;
                let receiver = frame.pop()?;
                let base = frame
                    .function
                    .closure
                    .level
                    .and_then(|level| rt.classes.get(level).super_class);
                if let Some(base) = base {
                    rt.run_constructor(base, &receiver, &args)?;
                }
            }

            // Object creation
            Instr::NewObject(count) => {
                let pairs = frame.pop_n(count as usize * 2)?;
                let object = rt.new_object();
                if let Value::Object(o) = &object {
                    let mut o = o.lock();
                    for pair in pairs.chunks(2) {
                        o.set_public(rt.string_of(&pair[0]), pair[1].clone());
                    }
                }
                frame.push(object)?;
            }
            Instr::NewArray(count) => {
                let elements = frame.pop_n(count as usize)?;
                let array = rt.new_array(elements);
                frame.push(array)?;
            }
            Instr::NewActivation => {
                let scope = frame.captured_scope();
                let object = rt.new_trait_object(frame.context, &frame.body.traits, &scope)?;
                frame.push(Value::Object(object))?;
            }
            Instr::NewFunction(method) => {
                let info = frame.context.method(method)?;
                let name = match info.name {
                    0 => intern("anonymous"),
                    n => frame.context.string(n),
                };
                let f = Function::synthetic(
                    name,
                    MethodHandle::new(frame.context.clone(), method),
                    Closure {
                        this: None,
                        scope: frame.captured_scope(),
                        level: None,
                    },
                );
                frame.push(Value::Function(f))?;
            }
            Instr::NewClass(index) => {
                let base = match frame.pop()? {
                    Value::Null => None,
                    other => Some(class_operand(&other)?),
                };
                let scope = frame.scope_chain();
                let id = rt.new_class(frame.context, index, base, scope)?;
                frame.push(Value::Class(id))?;
            }
            Instr::NewCatch(index) => {
                let exc = frame
                    .body
                    .exceptions
                    .get(index as usize)
                    .ok_or_else(|| corrupt(format!("Exception index {} out of range", index)))?;
                let mut object = ScriptObject::new(None);
                if exc.var_name != 0 {
                    let name = frame.context.resolve(exc.var_name, RuntimeOperands::None)?;
                    let slot = object.allocate_slot(1, Value::Undefined);
                    object.vars.insert(
                        name.key(),
                        name.first_namespace(),
                        Binding::Slot {
                            index: slot,
                            constant: false,
                        },
                    );
                }
                frame.push(Value::object(object))?;
            }

            // Enumeration
            Instr::HasNext => {
                let index = frame.pop()?.to_uint32();
                let obj = frame.pop()?;
                let next = rt.next_index(&obj, index);
                frame.push(Value::Integer(next as i32))?;
            }
            Instr::HasNext2 { object_reg, index_reg } => {
                let obj = frame.local(object_reg)?;
                let index = frame.local(index_reg)?.to_uint32();
                let next = rt.next_index(&obj, index);
                if next == 0 {
                    frame.set_local(object_reg, Value::Null)?;
                }
                frame.set_local(index_reg, Value::Integer(next as i32))?;
                frame.push(Value::Boolean(next != 0))?;
            }
            Instr::NextName => {
                let index = frame.pop()?.to_uint32();
                let obj = frame.pop()?;
                let v = rt.enumerate_name(&obj, index);
                frame.push(v)?;
            }
            Instr::NextValue => {
                let index = frame.pop()?.to_uint32();
                let obj = frame.pop()?;
                let v = rt.enumerate_value(&obj, index)?;
                frame.push(v)?;
            }

            // Conversions
            Instr::ConvertString => {
                let v = frame.pop()?;
                frame.push(Value::String(rt.string_of(&v)))?;
            }
            Instr::CoerceString => {
                let v = frame.pop()?;
                let v = if v.is_nullish() { Value::Null } else { Value::String(rt.string_of(&v)) };
                frame.push(v)?;
            }
            Instr::ConvertInt | Instr::CoerceInt => {
                let v = frame.pop()?.to_int32();
                frame.push(Value::Integer(v))?;
            }
            Instr::ConvertUint | Instr::CoerceUint => {
                let v = frame.pop()?.to_uint32();
                frame.push(Value::UInteger(v))?;
            }
            Instr::ConvertDouble | Instr::CoerceDouble => {
                let v = frame.pop()?.to_number();
                frame.push(Value::Number(v))?;
            }
            Instr::ConvertBoolean | Instr::CoerceBoolean => {
                let v = frame.pop()?.to_boolean();
                frame.push(Value::Boolean(v))?;
            }
            Instr::ConvertObject => {
                let v = frame.pop()?;
                if v.is_nullish() {
                    return Err(type_error(format!("Cannot convert {} to an object", v.type_name())));
                }
                frame.push(v)?;
            }
            Instr::CoerceObject => {
                let v = frame.pop()?;
                frame.push(if v.is_nullish() { Value::Null } else { v })?;
            }
            Instr::CoerceAny => {}
            Instr::Coerce(i) => {
                let class = resolve_type(rt, frame, i)?;
                let v = frame.pop()?;
                let v = rt.coerce(v, class)?;
                frame.push(v)?;
            }
            Instr::AsType(i) => {
                let class = resolve_type(rt, frame, i)?;
                let v = frame.pop()?;
                frame.push(if rt.is_type(&v, class) { v } else { Value::Null })?;
            }
            Instr::AsTypeLate => {
                let class = class_operand(&frame.pop()?)?;
                let v = frame.pop()?;
                frame.push(if rt.is_type(&v, class) { v } else { Value::Null })?;
            }
            Instr::IsType(i) => {
                let class = resolve_type(rt, frame, i)?;
                let v = frame.pop()?;
                frame.push(Value::Boolean(rt.is_type(&v, class)))?;
            }
            Instr::IsTypeLate | Instr::InstanceOf => {
                let class = class_operand(&frame.pop()?)?;
                let v = frame.pop()?;
                frame.push(Value::Boolean(rt.is_type(&v, class)))?;
            }
            Instr::TypeOf => {
                let v = frame.pop()?;
                frame.push(Value::String(intern(v.typeof_name())))?;
            }

            // Arithmetic
            Instr::Negate => {
                let v = frame.pop()?.to_number();
                frame.push(number(-v))?;
            }
            Instr::Increment => {
                let v = frame.pop()?.to_number();
                frame.push(number(v + 1.0))?;
            }
            Instr::Decrement => {
                let v = frame.pop()?.to_number();
                frame.push(number(v - 1.0))?;
            }
            Instr::Not => {
                let v = frame.pop()?.to_boolean();
                frame.push(Value::Boolean(!v))?;
            }
            Instr::BitNot => {
                let v = frame.pop()?.to_int32();
                frame.push(Value::Integer(!v))?;
            }
            Instr::Add => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                frame.push(add(rt, &a, &b))?;
            }
            Instr::Subtract | Instr::Multiply | Instr::Divide | Instr::Modulo => {
                let b = frame.pop()?.to_number();
                let a = frame.pop()?.to_number();
                let r = match instr {
                    Instr::Subtract => a - b,
                    Instr::Multiply => a * b,
                    Instr::Divide => a / b,
                    _ => a % b,
                };
                frame.push(number(r))?;
            }
            Instr::LShift | Instr::RShift | Instr::URShift | Instr::BitAnd | Instr::BitOr | Instr::BitXor => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let v = match instr {
                    Instr::LShift => Value::Integer(a.to_int32().wrapping_shl(b.to_uint32() & 31)),
                    Instr::RShift => Value::Integer(a.to_int32() >> (b.to_uint32() & 31)),
                    Instr::URShift => Value::UInteger(a.to_uint32() >> (b.to_uint32() & 31)),
                    Instr::BitAnd => Value::Integer(a.to_int32() & b.to_int32()),
                    Instr::BitOr => Value::Integer(a.to_int32() | b.to_int32()),
                    _ => Value::Integer(a.to_int32() ^ b.to_int32()),
                };
                frame.push(v)?;
            }
            Instr::IncrementI | Instr::DecrementI | Instr::NegateI => {
                let v = frame.pop()?.to_int32();
                let r = match instr {
                    Instr::IncrementI => v.wrapping_add(1),
                    Instr::DecrementI => v.wrapping_sub(1),
                    _ => v.wrapping_neg(),
                };
                frame.push(Value::Integer(r))?;
            }
            Instr::AddI | Instr::SubtractI | Instr::MultiplyI => {
                let b = frame.pop()?.to_int32();
                let a = frame.pop()?.to_int32();
                let r = match instr {
                    Instr::AddI => a.wrapping_add(b),
                    Instr::SubtractI => a.wrapping_sub(b),
                    _ => a.wrapping_mul(b),
                };
                frame.push(Value::Integer(r))?;
            }

            // Comparison
            Instr::Equals
            | Instr::StrictEquals
            | Instr::LessThan
            | Instr::LessEquals
            | Instr::GreaterThan
            | Instr::GreaterEquals => {
                let b = frame.pop()?;
                let a = frame.pop()?;
                let cond = match instr {
                    Instr::Equals => Condition::Equal,
                    Instr::StrictEquals => Condition::StrictEqual,
                    Instr::LessThan => Condition::LessThan,
                    Instr::LessEquals => Condition::LessEqual,
                    Instr::GreaterThan => Condition::GreaterThan,
                    _ => Condition::GreaterEqual,
                };
                frame.push(Value::Boolean(compare(cond, &a, &b)))?;
            }
        }

        frame.pc = jump.unwrap_or(next);
    }
}
