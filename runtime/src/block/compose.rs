//! Template composition: resolving other templates and `embed`.

use std::collections::BTreeMap;
use std::rc::Rc;

use crate::block::{BlockRef, Entry};
use crate::coordinator::{AsyncSlot, RunOutcome, open_async, run_block};
use crate::engine::Engine;
use crate::error::{Control, RenderError, RuntimeError};
use crate::executor::call_function;
use crate::path;
use crate::runtime_value::{Function, RuntimeValue};

/// Parameters for an embedded or base template: the forwarded keys of the
/// current run parameters, overlaid with `extra`.
pub(crate) fn forward_params(
    engine: &Engine,
    block: &BlockRef,
    extra: RuntimeValue,
) -> Result<RuntimeValue, RuntimeError> {
    let current = block.borrow().params.clone();
    let mut params = BTreeMap::new();
    for key in &engine.config().forwarded_params {
        if let Some(value) = current.get(key) {
            params.insert(key.clone(), value.clone());
        }
    }
    match extra {
        RuntimeValue::Null => {}
        RuntimeValue::Object(extra) => {
            params.extend(extra.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        other => {
            return Err(RuntimeError::TypeError {
                expected: "Object".into(),
                got: other.type_name().into(),
            });
        }
    }
    Ok(RuntimeValue::Object(Rc::new(params)))
}

/// Load `target` relative to the template `block` runs and produce the
/// Block to run it with. The new Block inherits a server path derived
/// from the parent's when it has none of its own.
pub(crate) fn get_template(
    engine: &Engine,
    block: &BlockRef,
    target: &str,
    params: RuntimeValue,
    done: impl FnOnce(&Engine, Result<BlockRef, RenderError>) + 'static,
) {
    let identity = engine.reader().resolve(block.identity().as_deref(), target);
    let parent_server_path = block.server_path();
    let target = target.to_string();
    engine.load(&identity, move |engine, loaded| {
        let result = loaded.map(|template| {
            let inner = template.runtime(engine, Some(&params));
            if inner.server_path().is_none()
                && let Some(parent) = &parent_server_path
            {
                inner.set_server_path(path::join(&path::dirname(parent), &target));
            }
            inner
        });
        done(engine, result);
    });
}

/// `this.embed(target[, params][, indent][, callback])`
pub(crate) fn embed(
    engine: &Engine,
    block: &BlockRef,
    args: Vec<RuntimeValue>,
) -> Result<RuntimeValue, Control> {
    let mut args = args.into_iter();
    let target = match args.next() {
        Some(RuntimeValue::String(target)) => target,
        other => {
            return Err(RuntimeError::TypeError {
                expected: "String".into(),
                got: other.map(|v| v.type_name()).unwrap_or("nothing").into(),
            }
            .into());
        }
    };

    // Optional arguments shift left when the callback comes early.
    let mut params = RuntimeValue::Null;
    let mut indent = None;
    let mut callback = None;
    for (position, arg) in args.enumerate() {
        match (position, arg) {
            (_, RuntimeValue::Function(f)) => {
                callback = Some(f);
                break;
            }
            (0, value) => params = value,
            (1, value) => indent = indent_prefix(value)?,
            _ => {}
        }
    }

    let params = forward_params(engine, block, params)?;
    let slot = open_async(block);
    let owner = block.clone();
    get_template(engine, block, &target, params.clone(), move |engine, result| {
        let inner = match result {
            Ok(inner) => inner,
            Err(error) => return settle(engine, slot, owner, None, Some(error), indent, callback),
        };
        inner.borrow_mut().outer = owner.downgrade();
        run_block(
            engine,
            &inner,
            params,
            Box::new(move |engine, outcome| match outcome {
                RunOutcome::Done(inner, error) => {
                    settle(engine, slot, owner, Some(inner), error, indent, callback)
                }
                RunOutcome::Failed(error) => {
                    settle(engine, slot, owner, None, Some(error), indent, callback)
                }
                RunOutcome::Aborted => {}
            }),
        );
    });
    Ok(RuntimeValue::Block(block.clone()))
}

fn indent_prefix(value: RuntimeValue) -> Result<Option<String>, RuntimeError> {
    match value {
        RuntimeValue::Null => Ok(None),
        RuntimeValue::String(s) if s.is_empty() => Ok(None),
        RuntimeValue::String(s) => Ok(Some(s)),
        n @ RuntimeValue::Number(_) => match n.to_count("indent")? {
            0 => Ok(None),
            width => Ok(Some(" ".repeat(width))),
        },
        other => Err(RuntimeError::TypeError {
            expected: "String or Number".into(),
            got: other.type_name().into(),
        }),
    }
}

/// Insert a copy of the completed inner Block at the embed position and
/// hand the outcome to the embed callback.
fn settle(
    engine: &Engine,
    slot: AsyncSlot,
    owner: BlockRef,
    inner: Option<BlockRef>,
    error: Option<RenderError>,
    indent: Option<String>,
    callback: Option<Function>,
) {
    let argument = error.clone().map(RuntimeValue::Error).unwrap_or(RuntimeValue::Null);
    let succeeded = error.is_none();
    // An abort is already reported to the render driver.
    let _ = slot.complete(engine, error, |engine| {
        if succeeded && let Some(inner) = inner {
            let copy = inner.deep_copy();
            copy.borrow_mut().indent = indent;
            owner.current().borrow_mut().body.push(Entry::Block(copy));
        }
        if let Some(callback) = callback {
            call_function(engine, &callback, &RuntimeValue::Block(owner.clone()), vec![argument])?;
        }
        Ok(())
    });
}
