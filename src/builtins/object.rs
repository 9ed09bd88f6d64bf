// Object, Class and Namespace built-in classes
// Object provides: hasOwnProperty, toString, valueOf

use super::string_arg;
use crate::vm::class::ClassId;
use crate::vm::multiname::{NsNameAndKind, ResolvedName};
use crate::vm::runtime::Runtime;
use crate::vm::value::Value;
use crate::error::VmResult;

pub fn register_object(rt: &mut Runtime) -> ClassId {
    let object = rt.register_native_class("", "Object", None);
    rt.add_native_method(object, "hasOwnProperty", object_has_own_property);
    rt.add_native_method(object, "toString", object_to_string);
    rt.add_native_method(object, "valueOf", object_value_of);
    object
}

pub fn register_class(rt: &mut Runtime, object: ClassId) -> ClassId {
    rt.register_native_class("", "Class", Some(object))
}

pub fn register_namespace(rt: &mut Runtime, object: ClassId) -> ClassId {
    let namespace = rt.register_native_class("", "Namespace", Some(object));
    rt.add_native_method(namespace, "toString", namespace_to_string);
    namespace
}

fn object_has_own_property(rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let name = string_arg(rt, args, 0);
    let own = match this {
        Value::Object(o) => {
            let o = o.lock();
            let index = ResolvedName::public(&name).name.as_index();
            o.vars.contains(&name, &[NsNameAndKind::public()])
                || (o.is_array() && index.is_some_and(|i| i < o.elements.len()))
        }
        Value::Class(id) => rt
            .classes
            .get(*id)
            .object
            .lock()
            .vars
            .contains(&name, &[NsNameAndKind::public()]),
        _ => false,
    };
    Ok(Value::Boolean(own))
}

fn object_to_string(rt: &mut Runtime, this: &Value, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::String(rt.string_of(this)))
}

fn object_value_of(_rt: &mut Runtime, this: &Value, _args: &[Value]) -> VmResult<Value> {
    Ok(this.clone())
}

fn namespace_to_string(_rt: &mut Runtime, this: &Value, _args: &[Value]) -> VmResult<Value> {
    match this {
        Value::Namespace(ns) => Ok(Value::String(ns.uri.clone())),
        other => Ok(Value::String(other.to_str())),
    }
}
