use crate::block::{BlockRef, compose, inherit};
use crate::coordinator;
use crate::engine::Engine;
use crate::error::{Control, RuntimeError};
use crate::executor::call_function;
use crate::runtime_value::{Function, RuntimeValue};

/// Dispatch a method call on a Block value.
pub fn call_method(
    engine: &Engine,
    block: &BlockRef,
    method: &str,
    args: Vec<RuntimeValue>,
) -> Result<RuntimeValue, Control> {
    let this = RuntimeValue::Block(block.clone());
    match method {
        "print" => {
            block.print(args)?;
            Ok(this)
        }
        "block" | "beginBlock" => open_named(engine, block, args, false),
        "extendBlock" => open_named(engine, block, args, true),
        "filter" | "beginFilter" => open_filter(engine, block, args),
        "end" => {
            block.end();
            Ok(this)
        }
        "insertSuper" => {
            block.insert_super();
            Ok(this)
        }
        "find" => {
            let name = string_arg(&args, 0, "find")?;
            Ok(block.find(&name).map(RuntimeValue::Block).unwrap_or(RuntimeValue::Null))
        }
        "root" => Ok(RuntimeValue::Block(block.root())),
        "name" => Ok(block.name().map(RuntimeValue::String).unwrap_or(RuntimeValue::Null)),
        "linkLocal" => {
            let relative = string_arg(&args, 0, "linkLocal")?;
            let request = args.get(1).filter(|r| !r.is_null());
            Ok(RuntimeValue::String(block.link_local(&relative, request)))
        }
        "escape" => {
            let value = args.into_iter().next().unwrap_or(RuntimeValue::Null);
            Ok(RuntimeValue::String(engine.escape(&value)))
        }
        "abort" => Err(Control::Abort),
        "async" => coordinator::async_call(engine, block, args),
        "embed" => compose::embed(engine, block, args),
        "extend" => inherit::extend(engine, block, args),
        _ => Err(RuntimeError::UnknownMethod {
            target: "Block".into(),
            method: method.into(),
        }
        .into()),
    }
}

fn string_arg(args: &[RuntimeValue], index: usize, method: &str) -> Result<String, RuntimeError> {
    match args.get(index) {
        Some(RuntimeValue::String(s)) => Ok(s.clone()),
        Some(other) => Err(RuntimeError::TypeError {
            expected: "String".into(),
            got: other.type_name().into(),
        }),
        None => Err(RuntimeError::Usage(format!("{}() requires an argument", method))),
    }
}

/// `block(name[, body])` and `extendBlock(name[, body])`.
fn open_named(
    engine: &Engine,
    block: &BlockRef,
    args: Vec<RuntimeValue>,
    insert_super: bool,
) -> Result<RuntimeValue, Control> {
    let mut args = args.into_iter();
    let name = match args.next() {
        Some(RuntimeValue::String(name)) if !name.is_empty() => name,
        Some(RuntimeValue::Number(n)) => RuntimeValue::Number(n).to_string(),
        _ => return Err(RuntimeError::Usage("Template block must have name".into()).into()),
    };
    let body = args.next().and_then(|v| v.as_function().cloned());

    block.open(Some(name), None);
    if insert_super {
        block.insert_super();
    }
    run_body(engine, block, body)
}

/// `filter(fn[, body])`.
fn open_filter(
    engine: &Engine,
    block: &BlockRef,
    args: Vec<RuntimeValue>,
) -> Result<RuntimeValue, Control> {
    let mut args = args.into_iter();
    let filter = match args.next() {
        Some(RuntimeValue::Function(f)) => f,
        other => {
            return Err(RuntimeError::TypeError {
                expected: "Function".into(),
                got: other.map(|v| v.type_name()).unwrap_or("nothing").into(),
            }
            .into());
        }
    };
    let body = args.next().and_then(|v| v.as_function().cloned());

    block.open(None, Some(filter));
    run_body(engine, block, body)
}

/// Run `body` with the freshly opened child as insertion point and close
/// it. Without a body the child stays open until `end()`.
fn run_body(
    engine: &Engine,
    block: &BlockRef,
    body: Option<Function>,
) -> Result<RuntimeValue, Control> {
    let this = RuntimeValue::Block(block.clone());
    if let Some(body) = body {
        let result = call_function(engine, &body, &this, Vec::new());
        block.end();
        result?;
    }
    Ok(this)
}
