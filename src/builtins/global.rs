// Global functions and constants
// trace, isNaN, isFinite, parseInt, parseFloat, NaN, Infinity

use log::trace;

use super::{arg, number_arg, string_arg};
use crate::error::VmResult;
use crate::vm::runtime::Runtime;
use crate::vm::value::Value;

pub fn register_globals(rt: &mut Runtime) {
    rt.register_native_function("trace", global_trace);
    rt.register_native_function("isNaN", |_rt, _this, args| {
        Ok(Value::Boolean(number_arg(args, 0, f64::NAN).is_nan()))
    });
    rt.register_native_function("isFinite", |_rt, _this, args| {
        Ok(Value::Boolean(number_arg(args, 0, f64::NAN).is_finite()))
    });
    rt.register_native_function("parseInt", global_parse_int);
    rt.register_native_function("parseFloat", global_parse_float);
    rt.define_global("NaN", Value::Number(f64::NAN));
    rt.define_global("Infinity", Value::Number(f64::INFINITY));
}

/// Print the arguments separated by spaces
fn global_trace(rt: &mut Runtime, _this: &Value, args: &[Value]) -> VmResult<Value> {
    let parts: Vec<String> = args.iter().map(|v| rt.string_of(v).to_string()).collect();
    let line = parts.join(" ");
    trace!("trace: {}", line);
    rt.emit_trace(line);
    Ok(Value::Undefined)
}

fn global_parse_int(rt: &mut Runtime, _this: &Value, args: &[Value]) -> VmResult<Value> {
    let text = string_arg(rt, args, 0);
    let radix = match arg(args, 1) {
        Value::Undefined => 0,
        r => r.to_int32(),
    };
    Ok(Value::Number(parse_int(&text, radix)))
}

fn global_parse_float(rt: &mut Runtime, _this: &Value, args: &[Value]) -> VmResult<Value> {
    let text = string_arg(rt, args, 0);
    Ok(Value::Number(parse_float(&text)))
}

/// Leading-prefix integer parse; radix 0 means decimal unless the text has a 0x prefix
pub(crate) fn parse_int(text: &str, radix: i32) -> f64 {
    let mut s = text.trim_start();
    let mut sign = 1.0;
    if let Some(rest) = s.strip_prefix('-') {
        sign = -1.0;
        s = rest;
    } else if let Some(rest) = s.strip_prefix('+') {
        s = rest;
    }

    let mut radix = radix;
    if radix == 0 || radix == 16 {
        if let Some(rest) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            s = rest;
            radix = 16;
        }
    }
    if radix == 0 {
        radix = 10;
    }
    if !(2..=36).contains(&radix) {
        return f64::NAN;
    }

    let mut result = 0.0;
    let mut any = false;
    for c in s.chars() {
        match c.to_digit(radix as u32) {
            Some(d) => {
                result = result * radix as f64 + d as f64;
                any = true;
            }
            None => break,
        }
    }
    if any {
        sign * result
    } else {
        f64::NAN
    }
}

/// Longest decimal literal prefix
pub(crate) fn parse_float(text: &str) -> f64 {
    let s = text.trim_start();
    let unsigned = s.trim_start_matches(&['+', '-'][..]);
    if unsigned.starts_with("Infinity") && s.len() - unsigned.len() <= 1 {
        return if s.starts_with('-') { f64::NEG_INFINITY } else { f64::INFINITY };
    }

    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+' | b'-')) {
        end = 1;
    }
    let digits_start = end;
    while end < bytes.len() && bytes[end].is_ascii_digit() {
        end += 1;
    }
    if end < bytes.len() && bytes[end] == b'.' {
        end += 1;
        while end < bytes.len() && bytes[end].is_ascii_digit() {
            end += 1;
        }
    }
    if end == digits_start || &s[digits_start..end] == "." {
        return f64::NAN;
    }
    // Exponent only counts when followed by digits
    if end < bytes.len() && matches!(bytes[end], b'e' | b'E') {
        let mut exp_end = end + 1;
        if matches!(bytes.get(exp_end), Some(b'+' | b'-')) {
            exp_end += 1;
        }
        let exp_digits = exp_end;
        while exp_end < bytes.len() && bytes[exp_end].is_ascii_digit() {
            exp_end += 1;
        }
        if exp_end > exp_digits {
            end = exp_end;
        }
    }
    s[..end].parse::<f64>().unwrap_or(f64::NAN)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VmConfig;
    use parking_lot::Mutex;
    use std::sync::Arc;

    #[test]
    fn test_parse_int() {
        assert_eq!(parse_int("42px", 0), 42.0);
        assert_eq!(parse_int("  -0x1F", 0), -31.0);
        assert_eq!(parse_int("777", 8), 511.0);
        assert_eq!(parse_int("z", 36), 35.0);
        assert!(parse_int("abc", 10).is_nan());
        assert!(parse_int("1", 40).is_nan());
    }

    #[test]
    fn test_parse_float() {
        assert_eq!(parse_float("3.5kg"), 3.5);
        assert_eq!(parse_float("-.25"), -0.25);
        assert_eq!(parse_float("1e3x"), 1000.0);
        assert_eq!(parse_float("2e"), 2.0);
        assert_eq!(parse_float("-Infinity"), f64::NEG_INFINITY);
        assert!(parse_float(".").is_nan());
        assert!(parse_float("x1").is_nan());
    }

    #[test]
    fn test_trace_joins_with_spaces() {
        let mut rt = Runtime::new(VmConfig::default());
        let sink = Arc::new(Mutex::new(Vec::new()));
        rt.set_trace_sink(sink.clone());
        let trace = rt.global.lock().get_public("trace").unwrap();
        let arr = rt.new_array(vec![Value::Integer(1), Value::Integer(2)]);
        rt.call_value(&trace, Value::Undefined, &[Value::string("a"), Value::Number(1.5), arr])
            .unwrap();
        assert_eq!(*sink.lock(), vec!["a 1.5 1,2".to_string()]);
    }

    #[test]
    fn test_is_nan_and_finite() {
        let mut rt = Runtime::new(VmConfig::default());
        let is_nan = rt.global.lock().get_public("isNaN").unwrap();
        let r = rt.call_value(&is_nan, Value::Undefined, &[Value::string("x")]).unwrap();
        assert!(r.to_boolean());
        let is_finite = rt.global.lock().get_public("isFinite").unwrap();
        let r = rt.call_value(&is_finite, Value::Undefined, &[Value::Integer(3)]).unwrap();
        assert!(r.to_boolean());
    }
}
