// String built-in class
// Methods operate on the primitive receiver; indices count characters

use std::sync::Arc;

use super::{arg, number_arg, string_arg};
use crate::error::{type_error, VmResult};
use crate::vm::class::ClassId;
use crate::vm::runtime::Runtime;
use crate::vm::value::Value;

pub fn register_string(rt: &mut Runtime, object: ClassId) -> ClassId {
    let string = rt.register_native_class("", "String", Some(object));
    rt.set_native_constructor(string, string_construct);
    rt.add_static_method(string, "fromCharCode", string_from_char_code);

    rt.add_native_method(string, "charAt", string_char_at);
    rt.add_native_method(string, "charCodeAt", string_char_code_at);
    rt.add_native_method(string, "indexOf", string_index_of);
    rt.add_native_method(string, "lastIndexOf", string_last_index_of);
    rt.add_native_method(string, "substring", string_substring);
    rt.add_native_method(string, "slice", string_slice);
    rt.add_native_method(string, "split", string_split);
    rt.add_native_method(string, "toUpperCase", string_to_upper_case);
    rt.add_native_method(string, "toLowerCase", string_to_lower_case);
    rt.add_native_method(string, "toString", string_value_of);
    rt.add_native_method(string, "valueOf", string_value_of);
    string
}

fn receiver_string(this: &Value) -> VmResult<Arc<str>> {
    match this {
        Value::String(s) => Ok(s.clone()),
        other => Err(type_error(format!("String method called on {}", other.type_name()))),
    }
}

/// Clamp a possibly negative or fractional index into `0..=len`
fn clamp_index(n: f64, len: usize) -> usize {
    if n.is_nan() || n <= 0.0 {
        0
    } else if n >= len as f64 {
        len
    } else {
        n as usize
    }
}

/// `slice` semantics: negative offsets count from the end
fn relative_index(n: f64, len: usize) -> usize {
    if n < 0.0 {
        clamp_index(len as f64 + n, len)
    } else {
        clamp_index(n, len)
    }
}

fn char_range(s: &str, start: usize, end: usize) -> String {
    s.chars().skip(start).take(end.saturating_sub(start)).collect()
}

/// Character index of the first match of `needle` at or after `from`
fn find_from(haystack: &[char], needle: &[char], from: usize) -> Option<usize> {
    if needle.is_empty() {
        return Some(from.min(haystack.len()));
    }
    (from..haystack.len()).find(|&i| haystack[i..].starts_with(needle))
}

fn string_construct(rt: &mut Runtime, _this: &Value, args: &[Value]) -> VmResult<Value> {
    let s = match args.first() {
        None => Arc::from(""),
        Some(_) => string_arg(rt, args, 0),
    };
    Ok(Value::String(s))
}

fn string_from_char_code(_rt: &mut Runtime, _this: &Value, args: &[Value]) -> VmResult<Value> {
    let s: String = args
        .iter()
        .filter_map(|code| char::from_u32(code.to_uint32() & 0xFFFF))
        .collect();
    Ok(Value::string(&s))
}

fn string_char_at(_rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let s = receiver_string(this)?;
    let index = number_arg(args, 0, 0.0);
    let c = if index < 0.0 { None } else { s.chars().nth(index as usize) };
    Ok(Value::string(&c.map(String::from).unwrap_or_default()))
}

fn string_char_code_at(_rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let s = receiver_string(this)?;
    let index = number_arg(args, 0, 0.0);
    let c = if index < 0.0 { None } else { s.chars().nth(index as usize) };
    Ok(match c {
        Some(c) => Value::Integer(c as i32),
        None => Value::Number(f64::NAN),
    })
}

fn string_index_of(rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let s = receiver_string(this)?;
    let needle: Vec<char> = string_arg(rt, args, 0).chars().collect();
    let haystack: Vec<char> = s.chars().collect();
    let from = clamp_index(number_arg(args, 1, 0.0), haystack.len());
    let found = find_from(&haystack, &needle, from);
    Ok(Value::Integer(found.map(|i| i as i32).unwrap_or(-1)))
}

fn string_last_index_of(rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let s = receiver_string(this)?;
    let needle: Vec<char> = string_arg(rt, args, 0).chars().collect();
    let haystack: Vec<char> = s.chars().collect();
    let last_start = haystack.len().saturating_sub(needle.len());
    let from = clamp_index(number_arg(args, 1, f64::INFINITY), last_start);
    let found = (0..=from).rev().find(|&i| haystack[i..].starts_with(&needle));
    Ok(Value::Integer(found.map(|i| i as i32).unwrap_or(-1)))
}

fn string_substring(_rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let s = receiver_string(this)?;
    let len = s.chars().count();
    let a = clamp_index(number_arg(args, 0, 0.0), len);
    let b = clamp_index(number_arg(args, 1, len as f64), len);
    // substring swaps reversed bounds
    let (start, end) = if a <= b { (a, b) } else { (b, a) };
    Ok(Value::string(&char_range(&s, start, end)))
}

fn string_slice(_rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let s = receiver_string(this)?;
    let len = s.chars().count();
    let start = relative_index(number_arg(args, 0, 0.0), len);
    let end = relative_index(number_arg(args, 1, len as f64), len);
    Ok(Value::string(&char_range(&s, start, end)))
}

fn string_split(rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let s = receiver_string(this)?;
    let parts: Vec<Value> = match arg(args, 0) {
        Value::Undefined => vec![Value::String(s.clone())],
        _ => {
            let separator = string_arg(rt, args, 0);
            if separator.is_empty() {
                s.chars().map(|c| Value::string(&c.to_string())).collect()
            } else {
                s.split(&*separator).map(Value::string).collect()
            }
        }
    };
    let limit = match arg(args, 1) {
        Value::Undefined => usize::MAX,
        n => n.to_uint32() as usize,
    };
    Ok(rt.new_array(parts.into_iter().take(limit).collect()))
}

fn string_to_upper_case(_rt: &mut Runtime, this: &Value, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::string(&receiver_string(this)?.to_uppercase()))
}

fn string_to_lower_case(_rt: &mut Runtime, this: &Value, _args: &[Value]) -> VmResult<Value> {
    Ok(Value::string(&receiver_string(this)?.to_lowercase()))
}

fn string_value_of(_rt: &mut Runtime, this: &Value, _args: &[Value]) -> VmResult<Value> {
    receiver_string(this).map(Value::String)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use crate::vm::multiname::ResolvedName;

    fn call(rt: &mut Runtime, s: &str, method: &str, args: &[Value]) -> Value {
        rt.call_property(&Value::string(s), &ResolvedName::public(method), args)
            .unwrap()
    }

    #[test]
    fn test_char_access() {
        let mut rt = Runtime::new(VmConfig::default());
        assert_eq!(&*call(&mut rt, "héllo", "charAt", &[Value::Integer(1)]).to_str(), "é");
        assert_eq!(&*call(&mut rt, "abc", "charAt", &[Value::Integer(9)]).to_str(), "");
        assert_eq!(call(&mut rt, "abc", "charCodeAt", &[]).to_int32(), 97);
        assert!(call(&mut rt, "abc", "charCodeAt", &[Value::Integer(5)]).to_number().is_nan());
    }

    #[test]
    fn test_search_and_slice() {
        let mut rt = Runtime::new(VmConfig::default());
        assert_eq!(call(&mut rt, "abcabc", "indexOf", &[Value::string("c")]).to_int32(), 2);
        assert_eq!(
            call(&mut rt, "abcabc", "indexOf", &[Value::string("c"), Value::Integer(3)]).to_int32(),
            5
        );
        assert_eq!(call(&mut rt, "abcabc", "lastIndexOf", &[Value::string("ab")]).to_int32(), 3);
        assert_eq!(call(&mut rt, "abc", "indexOf", &[Value::string("z")]).to_int32(), -1);
        assert_eq!(
            &*call(&mut rt, "abcdef", "substring", &[Value::Integer(4), Value::Integer(1)]).to_str(),
            "bcd"
        );
        assert_eq!(&*call(&mut rt, "abcdef", "slice", &[Value::Integer(-2)]).to_str(), "ef");
        assert_eq!(&*call(&mut rt, "MiXed", "toLowerCase", &[]).to_str(), "mixed");
    }

    #[test]
    fn test_split_and_from_char_code() {
        let mut rt = Runtime::new(VmConfig::default());
        let parts = call(&mut rt, "a,b,c", "split", &[Value::string(",")]);
        assert_eq!(&*rt.string_of(&parts), "a,b,c");
        assert_eq!(parts.as_object().unwrap().lock().elements.len(), 3);

        let string_class = Value::Class(rt.builtins.string);
        let s = rt
            .call_property(
                &string_class,
                &ResolvedName::public("fromCharCode"),
                &[Value::Integer(104), Value::Integer(105)],
            )
            .unwrap();
        assert_eq!(&*s.to_str(), "hi");
    }

    #[test]
    fn test_constructor_yields_primitive() {
        let mut rt = Runtime::new(VmConfig::default());
        let string_class = Value::Class(rt.builtins.string);
        let s = rt.construct(&string_class, &[Value::Integer(42)]).unwrap();
        assert!(matches!(s, Value::String(ref v) if &**v == "42"));
    }
}
