// int, uint and Number built-in classes
// All three share toString(radix), toFixed and valueOf; the constructors
// convert rather than allocate

use super::number_arg;
use crate::error::{range_error, type_error, VmResult};
use crate::vm::class::ClassId;
use crate::vm::runtime::Runtime;
use crate::vm::value::{number_to_string, Value};

const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
/// Fraction digits emitted for non-decimal radixes
const MAX_FRACTION_DIGITS: usize = 20;

/// Returns `(int, uint, Number)`
pub fn register_numbers(rt: &mut Runtime, object: ClassId) -> (ClassId, ClassId, ClassId) {
    let int = rt.register_native_class("", "int", Some(object));
    rt.set_native_constructor(int, |_rt, _this, args| {
        Ok(Value::Integer(args.first().map(|v| v.to_int32()).unwrap_or(0)))
    });
    rt.add_static_constant(int, "MAX_VALUE", Value::Integer(i32::MAX));
    rt.add_static_constant(int, "MIN_VALUE", Value::Integer(i32::MIN));

    let uint = rt.register_native_class("", "uint", Some(object));
    rt.set_native_constructor(uint, |_rt, _this, args| {
        Ok(Value::UInteger(args.first().map(|v| v.to_uint32()).unwrap_or(0)))
    });
    rt.add_static_constant(uint, "MAX_VALUE", Value::UInteger(u32::MAX));
    rt.add_static_constant(uint, "MIN_VALUE", Value::UInteger(0));

    let number = rt.register_native_class("", "Number", Some(object));
    rt.set_native_constructor(number, |_rt, _this, args| {
        Ok(Value::Number(args.first().map(|v| v.to_number()).unwrap_or(0.0)))
    });
    rt.add_static_constant(number, "MAX_VALUE", Value::Number(f64::MAX));
    rt.add_static_constant(number, "MIN_VALUE", Value::Number(f64::from_bits(1)));
    rt.add_static_constant(number, "NaN", Value::Number(f64::NAN));
    rt.add_static_constant(number, "POSITIVE_INFINITY", Value::Number(f64::INFINITY));
    rt.add_static_constant(number, "NEGATIVE_INFINITY", Value::Number(f64::NEG_INFINITY));

    for class in [int, uint, number] {
        rt.add_native_method(class, "toString", number_to_string_method);
        rt.add_native_method(class, "toFixed", number_to_fixed);
        rt.add_native_method(class, "valueOf", number_value_of);
    }
    (int, uint, number)
}

fn receiver_number(this: &Value) -> VmResult<f64> {
    if this.is_numeric() {
        Ok(this.to_number())
    } else {
        Err(type_error(format!("Number method called on {}", this.type_name())))
    }
}

/// Format `n` in `radix`, fraction included
pub(crate) fn to_radix_string(n: f64, radix: u32) -> String {
    if radix == 10 || !n.is_finite() {
        return number_to_string(n);
    }
    let negative = n < 0.0;
    let n = n.abs();
    let mut int_part = n.trunc();
    let mut fraction = n - int_part;

    let mut digits = Vec::new();
    loop {
        let d = (int_part % radix as f64) as usize;
        digits.push(DIGITS[d]);
        int_part = (int_part / radix as f64).trunc();
        if int_part < 1.0 {
            break;
        }
    }
    if negative {
        digits.push(b'-');
    }
    digits.reverse();

    if fraction > 0.0 {
        digits.push(b'.');
        for _ in 0..MAX_FRACTION_DIGITS {
            fraction *= radix as f64;
            let d = fraction.trunc() as usize;
            digits.push(DIGITS[d]);
            fraction -= d as f64;
            if fraction <= 0.0 {
                break;
            }
        }
    }
    String::from_utf8_lossy(&digits).into_owned()
}

fn number_to_string_method(_rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let n = receiver_number(this)?;
    let radix = number_arg(args, 0, 10.0);
    if !(2.0..=36.0).contains(&radix) {
        return Err(range_error(format!("The radix argument must be between 2 and 36; got {}", radix)));
    }
    Ok(Value::string(&to_radix_string(n, radix as u32)))
}

fn number_to_fixed(_rt: &mut Runtime, this: &Value, args: &[Value]) -> VmResult<Value> {
    let n = receiver_number(this)?;
    let digits = number_arg(args, 0, 0.0);
    if !(0.0..=20.0).contains(&digits) {
        return Err(range_error(format!(
            "The precision argument must be between 0 and 20; got {}",
            digits
        )));
    }
    if !n.is_finite() {
        return Ok(Value::string(&number_to_string(n)));
    }
    Ok(Value::string(&format!("{:.*}", digits as usize, n)))
}

fn number_value_of(_rt: &mut Runtime, this: &Value, _args: &[Value]) -> VmResult<Value> {
    receiver_number(this)?;
    Ok(this.clone())
}
