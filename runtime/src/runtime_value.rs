use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use strata::instruction::value::FunctionBody;

use crate::block::BlockRef;
use crate::engine::Engine;
use crate::environment::Environment;
use crate::error::{Control, RenderError, RuntimeError};

/// Largest count a number may request for a loop, a list or an indent.
pub const MAX_COUNT: usize = 1_000_000;

/// A runtime value produced by evaluating an expression.
#[derive(Debug, Clone)]
pub enum RuntimeValue {
    Null,
    Boolean(bool),
    Number(f64),
    String(String),
    Array(Rc<Vec<RuntimeValue>>),
    Object(Rc<BTreeMap<String, RuntimeValue>>),
    Function(Function),
    Block(BlockRef),
    /// An error handed to template code, e.g. the first argument of an async callback.
    Error(RenderError),
}

type NativeFn = dyn Fn(&Engine, &RuntimeValue, Vec<RuntimeValue>) -> Result<RuntimeValue, Control>;

/// A host function callable from template code. Receives the engine, the
/// receiver (`Null` for plain calls) and the arguments.
pub struct NativeFunction {
    pub name: String,
    call: Box<NativeFn>,
}

impl NativeFunction {
    pub fn new(
        name: impl Into<String>,
        call: impl Fn(&Engine, &RuntimeValue, Vec<RuntimeValue>) -> Result<RuntimeValue, Control> + 'static,
    ) -> Self {
        NativeFunction {
            name: name.into(),
            call: Box::new(call),
        }
    }

    pub fn call(
        &self,
        engine: &Engine,
        this: &RuntimeValue,
        args: Vec<RuntimeValue>,
    ) -> Result<RuntimeValue, Control> {
        (self.call)(engine, this, args)
    }
}

/// An anonymous `fn(...) ... end` with the environment it was created in.
pub struct Closure {
    pub body: Rc<FunctionBody>,
    pub env: Environment,
}

#[derive(Clone)]
pub enum Function {
    Native(Rc<NativeFunction>),
    Closure(Rc<Closure>),
}

impl Function {
    pub fn native(
        name: impl Into<String>,
        call: impl Fn(&Engine, &RuntimeValue, Vec<RuntimeValue>) -> Result<RuntimeValue, Control> + 'static,
    ) -> Self {
        Function::Native(Rc::new(NativeFunction::new(name, call)))
    }

    pub fn ptr_eq(&self, other: &Function) -> bool {
        match (self, other) {
            (Function::Native(a), Function::Native(b)) => Rc::ptr_eq(a, b),
            (Function::Closure(a), Function::Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Function {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Function::Native(n) => write!(f, "Native({})", n.name),
            Function::Closure(c) => write!(f, "Closure(line {})", c.body.line),
        }
    }
}

impl RuntimeValue {
    pub fn string(s: impl Into<String>) -> Self {
        RuntimeValue::String(s.into())
    }

    pub fn object(entries: impl IntoIterator<Item = (String, RuntimeValue)>) -> Self {
        RuntimeValue::Object(Rc::new(entries.into_iter().collect()))
    }

    pub fn array(items: impl IntoIterator<Item = RuntimeValue>) -> Self {
        RuntimeValue::Array(Rc::new(items.into_iter().collect()))
    }

    /// This number as a repetition count for `what`. Negative numbers and
    /// NaN count as zero; anything above [`MAX_COUNT`] is an error.
    pub fn to_count(&self, what: &str) -> Result<usize, RuntimeError> {
        match self {
            RuntimeValue::Number(n) if n.is_nan() || *n <= 0.0 => Ok(0),
            RuntimeValue::Number(n) if *n <= MAX_COUNT as f64 => Ok(*n as usize),
            RuntimeValue::Number(n) => Err(RuntimeError::Custom(format!(
                "{} out of range: {} exceeds {}",
                what, n, MAX_COUNT
            ))),
            other => Err(RuntimeError::TypeError {
                expected: "Number".into(),
                got: other.type_name().into(),
            }),
        }
    }

    pub fn is_truthy(&self) -> bool {
        !self.is_falsy()
    }

    pub fn is_falsy(&self) -> bool {
        match self {
            RuntimeValue::Null | RuntimeValue::Boolean(false) => true,
            RuntimeValue::Number(n) => *n == 0.0 || n.is_nan(),
            RuntimeValue::String(s) => s.is_empty(),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, RuntimeValue::Null)
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            RuntimeValue::Null => "Null",
            RuntimeValue::Boolean(_) => "Boolean",
            RuntimeValue::Number(_) => "Number",
            RuntimeValue::String(_) => "String",
            RuntimeValue::Array(_) => "Array",
            RuntimeValue::Object(_) => "Object",
            RuntimeValue::Function(_) => "Function",
            RuntimeValue::Block(_) => "Block",
            RuntimeValue::Error(_) => "Error",
        }
    }

    /// Look up a key of an object value.
    pub fn get(&self, key: &str) -> Option<&RuntimeValue> {
        match self {
            RuntimeValue::Object(map) => map.get(key),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<&Function> {
        match self {
            RuntimeValue::Function(f) => Some(f),
            _ => None,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        use serde_json::Value as Json;
        match self {
            RuntimeValue::Null => Json::Null,
            RuntimeValue::Boolean(b) => Json::Bool(*b),
            RuntimeValue::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => {
                Json::Number((*n as i64).into())
            }
            RuntimeValue::Number(n) => serde_json::Number::from_f64(*n)
                .map(Json::Number)
                .unwrap_or(Json::Null),
            RuntimeValue::String(s) => Json::String(s.clone()),
            RuntimeValue::Array(items) => Json::Array(items.iter().map(|v| v.to_json()).collect()),
            RuntimeValue::Object(map) => Json::Object(
                map.iter().map(|(k, v)| (k.clone(), v.to_json())).collect(),
            ),
            RuntimeValue::Function(_) | RuntimeValue::Block(_) | RuntimeValue::Error(_) => {
                Json::String(self.to_string())
            }
        }
    }
}

impl From<serde_json::Value> for RuntimeValue {
    fn from(value: serde_json::Value) -> Self {
        use serde_json::Value as Json;
        match value {
            Json::Null => RuntimeValue::Null,
            Json::Bool(b) => RuntimeValue::Boolean(b),
            Json::Number(n) => RuntimeValue::Number(n.as_f64().unwrap_or(f64::NAN)),
            Json::String(s) => RuntimeValue::String(s),
            Json::Array(items) => RuntimeValue::array(items.into_iter().map(RuntimeValue::from)),
            Json::Object(map) => {
                RuntimeValue::object(map.into_iter().map(|(k, v)| (k, RuntimeValue::from(v))))
            }
        }
    }
}

impl From<&str> for RuntimeValue {
    fn from(s: &str) -> Self {
        RuntimeValue::String(s.to_string())
    }
}

impl From<String> for RuntimeValue {
    fn from(s: String) -> Self {
        RuntimeValue::String(s)
    }
}

impl From<f64> for RuntimeValue {
    fn from(n: f64) -> Self {
        RuntimeValue::Number(n)
    }
}

impl From<bool> for RuntimeValue {
    fn from(b: bool) -> Self {
        RuntimeValue::Boolean(b)
    }
}

impl PartialEq for RuntimeValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (RuntimeValue::Null, RuntimeValue::Null) => true,
            (RuntimeValue::Boolean(a), RuntimeValue::Boolean(b)) => a == b,
            (RuntimeValue::Number(a), RuntimeValue::Number(b)) => a == b,
            (RuntimeValue::String(a), RuntimeValue::String(b)) => a == b,
            (RuntimeValue::Array(a), RuntimeValue::Array(b)) => a == b,
            (RuntimeValue::Object(a), RuntimeValue::Object(b)) => a == b,
            (RuntimeValue::Function(a), RuntimeValue::Function(b)) => a.ptr_eq(b),
            (RuntimeValue::Block(a), RuntimeValue::Block(b)) => a.ptr_eq(b),
            _ => false,
        }
    }
}

impl fmt::Display for RuntimeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeValue::Null => write!(f, "null"),
            RuntimeValue::Number(n) => {
                if n.is_finite() && *n == n.floor() && n.abs() < 1e15 {
                    write!(f, "{}", *n as i64)
                } else if n.is_infinite() {
                    write!(f, "{}Infinity", if *n < 0.0 { "-" } else { "" })
                } else {
                    write!(f, "{}", n)
                }
            }
            RuntimeValue::Boolean(b) => write!(f, "{}", b),
            RuntimeValue::String(s) => write!(f, "{}", s),
            RuntimeValue::Array(_) | RuntimeValue::Object(_) => write!(f, "{}", self.to_json()),
            RuntimeValue::Function(Function::Native(n)) => write!(f, "[function {}]", n.name),
            RuntimeValue::Function(Function::Closure(_)) => write!(f, "[function]"),
            RuntimeValue::Block(b) => match b.name() {
                Some(name) => write!(f, "[block {}]", name),
                None => write!(f, "[block]"),
            },
            RuntimeValue::Error(e) => write!(f, "{}", e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_are_bounded() {
        assert_eq!(RuntimeValue::Number(3.7).to_count("n").unwrap(), 3);
        assert_eq!(RuntimeValue::Number(-2.0).to_count("n").unwrap(), 0);
        assert_eq!(RuntimeValue::Number(f64::NAN).to_count("n").unwrap(), 0);
        assert!(RuntimeValue::Number(1e20).to_count("n").is_err());
        assert!(RuntimeValue::Number(f64::INFINITY).to_count("n").is_err());
        assert!(RuntimeValue::string("3").to_count("n").is_err());
    }

    #[test]
    fn falsy_values() {
        for v in [
            RuntimeValue::Null,
            RuntimeValue::Boolean(false),
            RuntimeValue::Number(0.0),
            RuntimeValue::Number(f64::NAN),
            RuntimeValue::string(""),
        ] {
            assert!(v.is_falsy(), "{:?} should be falsy", v);
        }
        assert!(RuntimeValue::array([]).is_truthy());
    }

    #[test]
    fn numbers_display_without_trailing_zero() {
        assert_eq!(RuntimeValue::Number(4.0).to_string(), "4");
        assert_eq!(RuntimeValue::Number(1.5).to_string(), "1.5");
        assert_eq!(RuntimeValue::Number(f64::INFINITY).to_string(), "Infinity");
    }

    #[test]
    fn collections_display_as_json() {
        let v = RuntimeValue::from(serde_json::json!({"a": [1, "x"]}));
        assert_eq!(v.to_string(), r#"{"a":[1,"x"]}"#);
    }
}
