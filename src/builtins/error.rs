// Error built-in classes
// Error and the four runtime error subclasses the VM itself raises

use super::{arg, string_arg};
use crate::error::VmResult;
use crate::vm::class::ClassId;
use crate::vm::interner::intern;
use crate::vm::runtime::Runtime;
use crate::vm::value::Value;

pub struct ErrorClasses {
    pub error: ClassId,
    pub type_error: ClassId,
    pub argument_error: ClassId,
    pub reference_error: ClassId,
    pub range_error: ClassId,
}

pub fn register_errors(rt: &mut Runtime, object: ClassId) -> ErrorClasses {
    let error = rt.register_native_class("", "Error", Some(object));
    rt.set_native_constructor(error, error_construct);
    rt.add_native_method(error, "toString", error_to_string);
    rt.add_native_method(error, "getStackTrace", error_get_stack_trace);

    // Subclasses inherit the native constructor through the chain
    ErrorClasses {
        error,
        type_error: rt.register_native_class("", "TypeError", Some(error)),
        argument_error: rt.register_native_class("", "ArgumentError", Some(error)),
        reference_error: rt.register_native_class("", "ReferenceError", Some(error)),
        range_error: rt.register_native_class("", "RangeError", Some(error)),
    }
}

/// `new Error(message = "", id = 0)`; `name` comes from the constructed class
fn error_construct(rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let Value::Object(object) = this else {
        return Ok(Value::Undefined);
    };
    let message = match arg(args, 0) {
        Value::Undefined => intern(""),
        _ => string_arg(rt, args, 0),
    };
    let id = arg(args, 1).to_int32();
    let mut o = object.lock();
    let name = o
        .class
        .map(|c| rt.classes.get(c).name.clone())
        .unwrap_or_else(|| intern("Error"));
    o.set_public(intern("message"), Value::String(message));
    o.set_public(intern("name"), Value::String(name));
    o.set_public(intern("errorID"), Value::Integer(id));
    Ok(Value::Undefined)
}

fn error_to_string(rt: &mut Runtime, this: &Value, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::String(rt.string_of(this)))
}

/// No debugger is attached, so there is never a stack trace
fn error_get_stack_trace(_rt: &mut Runtime, _this: &Value, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::vm::multiname::ResolvedName;

    #[test]
    fn test_subclass_construction() {
        let mut rt = Runtime::new(VmConfig::default());
        let class = Value::Class(rt.builtins.range_error);
        let err = rt
            .construct(&class, &[Value::string("out of bounds"), Value::Integer(1125)])
            .unwrap();
        let s = rt.call_property(&err, &ResolvedName::public("toString"), &[]).unwrap();
        assert_eq!(&*s.to_str(), "RangeError: out of bounds");
        let id = rt.get_property(&err, &ResolvedName::public("errorID")).unwrap();
        assert_eq!(id.to_int32(), 1125);
        assert!(rt.is_type(&err, rt.builtins.error));
    }

    #[test]
    fn test_empty_message() {
        let mut rt = Runtime::new(VmConfig::default());
        let class = Value::Class(rt.builtins.error);
        let err = rt.construct(&class, &[]).unwrap();
        assert_eq!(&*rt.string_of(&err), "Error");
        let trace = rt
            .call_property(&err, &ResolvedName::public("getStackTrace"), &[])
            .unwrap();
        assert!(matches!(trace, Value::Null));
    }
}
