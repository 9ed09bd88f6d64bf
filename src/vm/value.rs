// abcvm Runtime Values
// Primitives are stored inline; objects and functions are shared through Arc
// and protected by parking_lot mutexes so events can carry them across threads

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use super::class::ClassId;
use super::function::Function;
use super::interner::intern;
use super::multiname::NsNameAndKind;
use super::object::ScriptObject;

pub type ObjectRef = Arc<Mutex<ScriptObject>>;
pub type FunctionRef = Arc<Function>;

#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Undefined,
    Null,
    Boolean(bool),
    Integer(i32),
    UInteger(u32),
    Number(f64),
    String(Arc<str>),
    Namespace(NsNameAndKind),
    Object(ObjectRef),
    Function(FunctionRef),
    Class(ClassId),
}

impl Value {
    pub fn string(s: &str) -> Self {
        Value::String(Arc::from(s))
    }

    pub fn object(object: ScriptObject) -> Self {
        Value::Object(Arc::new(Mutex::new(object)))
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "null",
            Value::Boolean(_) => "Boolean",
            Value::Integer(_) => "int",
            Value::UInteger(_) => "uint",
            Value::Number(_) => "Number",
            Value::String(_) => "String",
            Value::Namespace(_) => "Namespace",
            Value::Object(_) => "Object",
            Value::Function(_) => "Function",
            Value::Class(_) => "Class",
        }
    }

    /// Result of the `typeof` operator
    pub fn typeof_name(&self) -> &'static str {
        match self {
            Value::Undefined => "undefined",
            Value::Null => "object",
            Value::Boolean(_) => "boolean",
            Value::Integer(_) | Value::UInteger(_) | Value::Number(_) => "number",
            Value::String(_) => "string",
            Value::Function(_) => "function",
            Value::Namespace(_) | Value::Object(_) | Value::Class(_) => "object",
        }
    }

    pub fn is_nullish(&self) -> bool {
        matches!(self, Value::Undefined | Value::Null)
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Integer(_) | Value::UInteger(_) | Value::Number(_))
    }

    pub fn as_object(&self) -> Option<&ObjectRef> {
        match self {
            Value::Object(o) => Some(o),
            _ => None,
        }
    }

    pub fn to_boolean(&self) -> bool {
        match self {
            Value::Undefined | Value::Null => false,
            Value::Boolean(b) => *b,
            Value::Integer(i) => *i != 0,
            Value::UInteger(u) => *u != 0,
            Value::Number(n) => *n != 0.0 && !n.is_nan(),
            Value::String(s) => !s.is_empty(),
            _ => true,
        }
    }

    pub fn to_number(&self) -> f64 {
        match self {
            Value::Undefined => f64::NAN,
            Value::Null => 0.0,
            Value::Boolean(b) => {
                if *b {
                    1.0
                } else {
                    0.0
                }
            }
            Value::Integer(i) => *i as f64,
            Value::UInteger(u) => *u as f64,
            Value::Number(n) => *n,
            Value::String(s) => string_to_number(s),
            _ => f64::NAN,
        }
    }

    pub fn to_int32(&self) -> i32 {
        match self {
            Value::Integer(i) => *i,
            Value::UInteger(u) => *u as i32,
            other => number_to_int32(other.to_number()),
        }
    }

    pub fn to_uint32(&self) -> u32 {
        match self {
            Value::Integer(i) => *i as u32,
            Value::UInteger(u) => *u,
            other => number_to_int32(other.to_number()) as u32,
        }
    }

    /// String conversion that needs no runtime state
    pub fn to_str(&self) -> Arc<str> {
        match self {
            Value::Undefined => intern("undefined"),
            Value::Null => intern("null"),
            Value::Boolean(true) => intern("true"),
            Value::Boolean(false) => intern("false"),
            Value::Integer(i) => Arc::from(i.to_string()),
            Value::UInteger(u) => Arc::from(u.to_string()),
            Value::Number(n) => Arc::from(number_to_string(*n)),
            Value::String(s) => s.clone(),
            Value::Namespace(ns) => ns.uri.clone(),
            Value::Object(o) => {
                let object = o.lock();
                if object.is_array() {
                    let parts: Vec<String> = (0..object.elements.len())
                        .map(|i| object.elements.value_at(i))
                        .map(|v| if v.is_nullish() { String::new() } else { v.to_str().to_string() })
                        .collect();
                    Arc::from(parts.join(","))
                } else {
                    intern("[object Object]")
                }
            }
            Value::Function(_) => intern("function Function() {}"),
            Value::Class(id) => Arc::from(format!("[class {}]", id.0)),
        }
    }

    /// Identity for reference types, value equality for primitives
    pub fn same_reference(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            (Value::Function(a), Value::Function(b)) => Arc::ptr_eq(a, b),
            (Value::Class(a), Value::Class(b)) => a == b,
            _ => false,
        }
    }

    pub fn strict_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Undefined, Value::Undefined) | (Value::Null, Value::Null) => true,
            (a, b) if a.is_numeric() && b.is_numeric() => a.to_number() == b.to_number(),
            (Value::Boolean(a), Value::Boolean(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Namespace(a), Value::Namespace(b)) => a.uri == b.uri,
            (a, b) => a.same_reference(b),
        }
    }

    /// The `==` operator
    pub fn loose_equals(&self, other: &Value) -> bool {
        match (self, other) {
            (a, b) if a.is_nullish() && b.is_nullish() => true,
            (a, b) if a.is_nullish() || b.is_nullish() => false,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Boolean(_), _) | (_, Value::Boolean(_)) => self.to_number() == other.to_number(),
            (a, b) if a.is_numeric() || b.is_numeric() => {
                if a.same_reference(b) {
                    return true;
                }
                a.to_number() == b.to_number()
            }
            (a, b) => a.strict_equals(b),
        }
    }

    /// Abstract relational comparison; `None` when either side is NaN
    pub fn less_than(&self, other: &Value) -> Option<bool> {
        if let (Value::String(a), Value::String(b)) = (self, other) {
            return Some(a < b);
        }
        let (a, b) = (self.to_number(), other.to_number());
        if a.is_nan() || b.is_nan() {
            None
        } else {
            Some(a < b)
        }
    }
}

pub fn number_to_string(n: f64) -> String {
    if n.is_nan() {
        "NaN".to_string()
    } else if n.is_infinite() {
        if n > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else if n == 0.0 {
        "0".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e21 {
        format!("{}", n as i64)
    } else {
        format!("{}", n)
    }
}

pub fn string_to_number(s: &str) -> f64 {
    let t = s.trim();
    if t.is_empty() {
        return 0.0;
    }
    match t {
        "Infinity" | "+Infinity" => return f64::INFINITY,
        "-Infinity" => return f64::NEG_INFINITY,
        _ => {}
    }
    if let Some(hex) = t.strip_prefix("0x").or_else(|| t.strip_prefix("0X")) {
        return i64::from_str_radix(hex, 16).map(|v| v as f64).unwrap_or(f64::NAN);
    }
    if !t.chars().all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | 'e' | 'E')) {
        return f64::NAN;
    }
    t.parse::<f64>().unwrap_or(f64::NAN)
}

/// ECMAScript ToInt32
pub fn number_to_int32(n: f64) -> i32 {
    if !n.is_finite() {
        return 0;
    }
    let m = n.trunc().rem_euclid(4294967296.0);
    m as u32 as i32
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Undefined => write!(f, "undefined"),
            Value::Null => write!(f, "null"),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::Integer(i) => write!(f, "{}i", i),
            Value::UInteger(u) => write!(f, "{}u", u),
            Value::Number(n) => write!(f, "{}", number_to_string(*n)),
            Value::String(s) => write!(f, "{:?}", s),
            Value::Namespace(ns) => write!(f, "namespace {:?}", ns.uri),
            Value::Object(o) => write!(f, "<object {:p}>", Arc::as_ptr(o)),
            Value::Function(func) => write!(f, "<function {}>", func.name),
            Value::Class(id) => write!(f, "<class {}>", id.0),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_str())
    }
}

impl From<i32> for Value {
    fn from(i: i32) -> Self {
        Value::Integer(i)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Number(n)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_number_formatting() {
        assert_eq!(number_to_string(3.0), "3");
        assert_eq!(number_to_string(-0.0), "0");
        assert_eq!(number_to_string(1.5), "1.5");
        assert_eq!(number_to_string(f64::NAN), "NaN");
        assert_eq!(number_to_string(f64::NEG_INFINITY), "-Infinity");
    }

    #[test]
    fn test_string_conversion() {
        assert_eq!(string_to_number("  42 "), 42.0);
        assert_eq!(string_to_number(""), 0.0);
        assert_eq!(string_to_number("0x1F"), 31.0);
        assert!(string_to_number("inf").is_nan());
        assert!(string_to_number("abc").is_nan());
    }

    #[test]
    fn test_int32_wraps() {
        assert_eq!(number_to_int32(4294967297.0), 1);
        assert_eq!(number_to_int32(-1.5), -1);
        assert_eq!(number_to_int32(f64::NAN), 0);
        assert_eq!(Value::Number(2147483648.0).to_int32(), i32::MIN);
        assert_eq!(Value::Integer(-1).to_uint32(), u32::MAX);
    }

    #[test]
    fn test_equality() {
        assert!(Value::Integer(1).strict_equals(&Value::Number(1.0)));
        assert!(!Value::Integer(1).strict_equals(&Value::string("1")));
        assert!(Value::Integer(1).loose_equals(&Value::string("1")));
        assert!(Value::Null.loose_equals(&Value::Undefined));
        assert!(!Value::Null.strict_equals(&Value::Undefined));
        assert!(!Value::Number(f64::NAN).strict_equals(&Value::Number(f64::NAN)));
    }

    #[test]
    fn test_truthiness() {
        assert!(!Value::Number(f64::NAN).to_boolean());
        assert!(!Value::string("").to_boolean());
        assert!(Value::string("0").to_boolean());
        assert!(!Value::UInteger(0).to_boolean());
    }

    #[test]
    fn test_comparison_with_nan() {
        assert_eq!(Value::Integer(1).less_than(&Value::Integer(2)), Some(true));
        assert_eq!(Value::Undefined.less_than(&Value::Integer(2)), None);
        assert_eq!(Value::string("a").less_than(&Value::string("b")), Some(true));
    }
}
