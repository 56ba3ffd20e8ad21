//! Functions available to every template.

use tracing::warn;

use crate::engine::Engine;
use crate::error::{Control, RuntimeError};
use crate::executor::call_function;
use crate::runtime_value::RuntimeValue;

pub(crate) fn install(engine: &Engine) {
    engine.register_function("escape", |engine, _, args| {
        Ok(RuntimeValue::String(engine.escape(&first(args))))
    });
    engine.register_function("len", |_, _, args| {
        let n = match &first(args) {
            RuntimeValue::String(s) => s.chars().count(),
            RuntimeValue::Array(items) => items.len(),
            RuntimeValue::Object(map) => map.len(),
            RuntimeValue::Null => 0,
            other => return Err(type_error("String, Array or Object", other).into()),
        };
        Ok(RuntimeValue::Number(n as f64))
    });
    engine.register_function("str", |_, _, args| {
        Ok(RuntimeValue::String(first(args).to_string()))
    });
    engine.register_function("upper", |_, _, args| {
        Ok(RuntimeValue::String(first(args).to_string().to_uppercase()))
    });
    engine.register_function("lower", |_, _, args| {
        Ok(RuntimeValue::String(first(args).to_string().to_lowercase()))
    });
    engine.register_function("trim", |_, _, args| {
        Ok(RuntimeValue::String(first(args).to_string().trim().to_string()))
    });
    engine.register_function("range", |_, _, args| {
        let n = first(args).to_count("range")?;
        Ok(RuntimeValue::array((0..n).map(|i| RuntimeValue::Number(i as f64))))
    });
    engine.register_function("keys", |_, _, args| match first(args) {
        RuntimeValue::Object(map) => Ok(RuntimeValue::array(
            map.keys().map(|k| RuntimeValue::String(k.clone())),
        )),
        other => Err(type_error("Object", &other).into()),
    });
    engine.register_function("json", |_, _, args| {
        Ok(RuntimeValue::String(first(args).to_json().to_string()))
    });
    engine.register_function("defer", defer);
}

/// `defer(ticks, values..., callback)`: call `callback(null, values...)`
/// after `ticks` turns of the run queue.
fn defer(
    engine: &Engine,
    _: &RuntimeValue,
    mut args: Vec<RuntimeValue>,
) -> Result<RuntimeValue, Control> {
    let callback = match args.pop() {
        Some(RuntimeValue::Function(f)) => f,
        _ => return Err(RuntimeError::Usage("defer() requires a callback".into()).into()),
    };
    if args.is_empty() {
        return Err(RuntimeError::Usage("defer() requires a tick count".into()).into());
    }
    let ticks = args.remove(0).to_count("defer ticks")?;
    let mut values = vec![RuntimeValue::Null];
    values.extend(args);
    engine.schedule_after(ticks, move |engine| {
        match call_function(engine, &callback, &RuntimeValue::Null, values) {
            Ok(_) | Err(Control::Abort) => {}
            Err(Control::Error(error)) => warn!(%error, "deferred callback failed"),
        }
    });
    Ok(RuntimeValue::Null)
}

fn first(args: Vec<RuntimeValue>) -> RuntimeValue {
    args.into_iter().next().unwrap_or(RuntimeValue::Null)
}

fn type_error(expected: &str, got: &RuntimeValue) -> RuntimeError {
    RuntimeError::TypeError {
        expected: expected.into(),
        got: got.type_name().into(),
    }
}
