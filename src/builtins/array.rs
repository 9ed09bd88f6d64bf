// Array built-in class
// Provides: push, pop, join, indexOf; length and indices are handled by the
// property layer

use super::{arg, string_arg};
use crate::error::{range_error, type_error, VmResult};
use crate::vm::class::ClassId;
use crate::vm::object::{ArrayElements, ObjectKind};
use crate::vm::runtime::Runtime;
use crate::vm::value::{ObjectRef, Value};

pub fn register_array(rt: &mut Runtime, object: ClassId) -> ClassId {
    let array = rt.register_native_class("", "Array", Some(object));
    rt.set_native_constructor(array, array_construct);
    rt.add_native_method(array, "push", array_push);
    rt.add_native_method(array, "pop", array_pop);
    rt.add_native_method(array, "join", array_join);
    rt.add_native_method(array, "indexOf", array_index_of);
    array
}

fn receiver_array(this: &Value) -> VmResult<&ObjectRef> {
    if let Value::Object(o) = this {
        if o.lock().is_array() {
            return Ok(o);
        }
    }
    Err(type_error(format!("Array method called on {}", this.type_name())))
}

/// `new Array(n)` makes an array of length n with no stored elements; any
/// other argument list becomes the elements
fn array_construct(_rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let elements = match args {
        [n] if n.is_numeric() => {
            let len = n.to_number();
            if len < 0.0 || len.fract() != 0.0 || len > u32::MAX as f64 {
                return Err(range_error(format!("Array index is not a positive integer ({})", len)));
            }
            let mut elements = ArrayElements::new();
            elements.set_len(len as usize);
            elements
        }
        _ => ArrayElements::from(args.to_vec()),
    };
    if let Value::Object(o) = this {
        let mut o = o.lock();
        o.kind = ObjectKind::Array;
        o.elements = elements;
    }
    Ok(Value::Undefined)
}

fn array_push(_rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let array = receiver_array(this)?;
    let mut array = array.lock();
    for value in args {
        array.elements.push(value.clone());
    }
    Ok(Value::UInteger(array.elements.len() as u32))
}

fn array_pop(_rt: &mut Runtime, this: &Value, _args: &[Value]) -> VmResult<Value> {
    let array = receiver_array(this)?;
    let popped = array.lock().elements.pop();
    Ok(popped.unwrap_or_default())
}

fn array_join(rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let elements = receiver_array(this)?.lock().elements.to_vec();
    let separator = match arg(args, 0) {
        Value::Undefined => ",".into(),
        _ => string_arg(rt, args, 0),
    };
    let parts: Vec<String> = elements
        .iter()
        .map(|v| if v.is_nullish() { String::new() } else { rt.string_of(v).to_string() })
        .collect();
    Ok(Value::string(&parts.join(&*separator)))
}

fn array_index_of(_rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let needle = arg(args, 0);
    let array = receiver_array(this)?.lock();
    let found = array
        .elements
        .indices()
        .into_iter()
        .find(|&i| array.elements.value_at(i).strict_equals(&needle));
    Ok(match found {
        Some(i) => i32::try_from(i).map(Value::Integer).unwrap_or(Value::Number(i as f64)),
        None => Value::Integer(-1),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::error::ErrorKind;
    use crate::vm::multiname::ResolvedName;

    fn runtime() -> Runtime {
        Runtime::new(VmConfig::default())
    }

    #[test]
    fn test_constructor_forms() {
        let mut rt = runtime();
        let array = Value::Class(rt.builtins.array);
        let sized = rt.construct(&array, &[Value::Integer(3)]).unwrap();
        assert_eq!(sized.as_object().unwrap().lock().elements.len(), 3);

        let huge = rt.construct(&array, &[Value::UInteger(u32::MAX)]).unwrap();
        let huge = huge.as_object().unwrap().lock();
        assert_eq!(huge.elements.len(), u32::MAX as usize);
        assert_eq!(huge.elements.stored().count(), 0);

        let listed = rt.construct(&array, &[Value::string("a"), Value::string("b")]).unwrap();
        assert_eq!(&*rt.string_of(&listed), "a,b");

        let err = rt.construct(&array, &[Value::Number(1.5)]).unwrap_err();
        assert_eq!(err.kind, ErrorKind::RangeError);
    }

    #[test]
    fn test_push_pop_join() {
        let mut rt = runtime();
        let arr = rt.new_array(Vec::new());
        let n = rt
            .call_property(&arr, &ResolvedName::public("push"), &[Value::Integer(1), Value::Null, Value::Integer(3)])
            .unwrap();
        assert_eq!(n.to_int32(), 3);
        let joined = rt
            .call_property(&arr, &ResolvedName::public("join"), &[Value::string("-")])
            .unwrap();
        assert_eq!(&*joined.to_str(), "1--3");
        let popped = rt.call_property(&arr, &ResolvedName::public("pop"), &[]).unwrap();
        assert_eq!(popped.to_int32(), 3);
        let index = rt
            .call_property(&arr, &ResolvedName::public("indexOf"), &[Value::Number(1.0)])
            .unwrap();
        assert_eq!(index.to_int32(), 0);
    }
}
