// Boolean built-in class
// Instance methods for boolean operations

use crate::error::{type_error, VmResult};
use crate::vm::class::ClassId;
use crate::vm::runtime::Runtime;
use crate::vm::value::Value;

pub fn register_boolean(rt: &mut Runtime, object: ClassId) -> ClassId {
    let boolean = rt.register_native_class("", "Boolean", Some(object));
    rt.set_native_constructor(boolean, boolean_construct);
    rt.add_native_method(boolean, "toString", boolean_to_string);
    rt.add_native_method(boolean, "valueOf", boolean_value_of);
    boolean
}

fn boolean_construct(_rt: &mut Runtime, _this: &Value, args: &[Value]) -> VmResult<Value> {
    Ok(Value::Boolean(args.first().is_some_and(|v| v.to_boolean())))
}

fn receiver_boolean(this: &Value) -> VmResult<bool> {
    match this {
        Value::Boolean(b) => Ok(*b),
        other => Err(type_error(format!("Boolean method called on {}", other.type_name()))),
    }
}

fn boolean_to_string(_rt: &mut Runtime, this: &Value, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::string(if receiver_boolean(this)? { "true" } else { "false" }))
}

fn boolean_value_of(_rt: &mut Runtime, this: &Value, _args: &[Value]) -> VmResult<Value> {
    receiver_boolean(this).map(Value::Boolean)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::vm::multiname::ResolvedName;

    #[test]
    fn test_to_string() {
        let mut rt = Runtime::new(VmConfig::default());
        let s = rt
            .call_property(&Value::Boolean(false), &ResolvedName::public("toString"), &[])
            .unwrap();
        assert_eq!(&*s.to_str(), "false");
        let b = rt
            .construct(&Value::Class(rt.builtins.boolean), &[Value::string("x")])
            .unwrap();
        assert!(matches!(b, Value::Boolean(true)));
    }
}
