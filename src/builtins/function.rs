// Function built-in class
// Provides: call, apply

use super::arg;
use crate::error::{type_error, VmResult};
use crate::vm::class::ClassId;
use crate::vm::runtime::Runtime;
use crate::vm::value::{FunctionRef, Value};

pub fn register_function(rt: &mut Runtime, object: ClassId) -> ClassId {
    let function = rt.register_native_class("", "Function", Some(object));
    rt.add_native_method(function, "call", function_call);
    rt.add_native_method(function, "apply", function_apply);
    function
}

fn receiver_function(this: &Value) -> VmResult<&FunctionRef> {
    match this {
        Value::Function(f) => Ok(f),
        other => Err(type_error(format!("Function method called on {}", other.type_name()))),
    }
}

fn function_call(rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let f = receiver_function(this)?;
    rt.call(f, arg(args, 0), args.get(1..).unwrap_or(&[]), false)
}

fn function_apply(rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let f = receiver_function(this)?;
    let list = match arg(args, 1) {
        Value::Undefined | Value::Null => Vec::new(),
        Value::Object(o) => {
            let o = o.lock();
            if !o.is_array() {
                return Err(type_error("Function.apply expects an Array of arguments"));
            }
            o.elements.to_vec()
        }
        other => {
            return Err(type_error(format!(
                "Function.apply expects an Array of arguments, got {}",
                other.type_name()
            )))
        }
    };
    rt.call(f, arg(args, 0), &list, false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::vm::function::Function;
    use crate::vm::multiname::ResolvedName;

    #[test]
    fn test_call_and_apply() {
        let mut rt = Runtime::new(VmConfig::default());
        let sum = Value::Function(Function::native("sum", |_rt, this, args| {
            let base = if this.is_nullish() { 0 } else { this.to_int32() };
            Ok(Value::Integer(base + args.iter().map(|a| a.to_int32()).sum::<i32>()))
        }));

        let r = rt
            .call_property(
                &sum,
                &ResolvedName::public("call"),
                &[Value::Integer(100), Value::Integer(1), Value::Integer(2)],
            )
            .unwrap();
        assert_eq!(r.to_int32(), 103);

        let list = rt.new_array(vec![Value::Integer(3), Value::Integer(4)]);
        let r = rt
            .call_property(&sum, &ResolvedName::public("apply"), &[Value::Null, list])
            .unwrap();
        assert_eq!(r.to_int32(), 7);

        let err = rt
            .call_property(&sum, &ResolvedName::public("apply"), &[Value::Null, Value::Integer(1)])
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::TypeError);
    }
}
