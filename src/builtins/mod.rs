// abcvm Built-in Classes
// The core classes every runtime needs to link and run scripts, registered
// natively before any ABC is loaded

pub mod array;
pub mod boolean;
pub mod error;
pub mod function;
pub mod global;
pub mod number;
pub mod object;
pub mod string;

use std::sync::Arc;

use crate::vm::runtime::{Builtins, Runtime};
use crate::vm::value::Value;

/// Argument `i`, undefined when missing
pub(crate) fn arg(args: &[Value], i: usize) -> Value {
    args.get(i).cloned().unwrap_or_default()
}

pub(crate) fn number_arg(args: &[Value], i: usize, default: f64) -> f64 {
    match args.get(i) {
        Some(Value::Undefined) | None => default,
        Some(v) => v.to_number(),
    }
}

pub(crate) fn string_arg(rt: &Runtime, args: &[Value], i: usize) -> Arc<str> {
    rt.string_of(&arg(args, i))
}

/// Register the core classes and global functions, in dependency order
pub fn register_all(rt: &mut Runtime) -> Builtins {
    let object = object::register_object(rt);
    let class = object::register_class(rt, object);
    let function = function::register_function(rt, object);
    let namespace = object::register_namespace(rt, object);
    let array = array::register_array(rt, object);
    let string = string::register_string(rt, object);
    let boolean = boolean::register_boolean(rt, object);
    let (int, uint, number) = number::register_numbers(rt, object);
    let errors = error::register_errors(rt, object);
    global::register_globals(rt);

    Builtins {
        object,
        class,
        function,
        namespace,
        array,
        string,
        boolean,
        int,
        uint,
        number,
        error: errors.error,
        type_error: errors.type_error,
        argument_error: errors.argument_error,
        reference_error: errors.reference_error,
        range_error: errors.range_error,
    }
}
