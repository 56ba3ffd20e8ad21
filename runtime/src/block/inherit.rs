//! Template inheritance: `extend`, block maps and override application.

use std::collections::HashMap;

use crate::block::compose::{forward_params, get_template};
use crate::block::{BlockRef, Entry};
use crate::coordinator::{AsyncSlot, RunOutcome, open_async, run_block};
use crate::engine::Engine;
use crate::error::{Control, RenderError, RuntimeError};
use crate::executor::call_function;
use crate::runtime_value::{Function, RuntimeValue};

/// Named Blocks reachable from `block`, depth-first. A later definition of
/// a name replaces an earlier one.
pub(crate) fn block_map(block: &BlockRef) -> HashMap<String, BlockRef> {
    let mut map = HashMap::new();
    collect_named(block, &mut map);
    map
}

fn collect_named(block: &BlockRef, map: &mut HashMap<String, BlockRef>) {
    for child in children(block) {
        if let Some(name) = child.name() {
            map.insert(name, child.clone());
        }
        collect_named(&child, map);
    }
}

fn children(block: &BlockRef) -> Vec<BlockRef> {
    block
        .borrow()
        .body
        .iter()
        .filter_map(|e| match e {
            Entry::Block(b) => Some(b.clone()),
            Entry::Text(_) => None,
        })
        .collect()
}

/// Replace every named child of `block` that has an entry in `overrides`,
/// then recurse into the result. Blocks already on the current path are
/// never entered again.
pub(crate) fn apply_override(
    block: &BlockRef,
    overrides: &HashMap<String, BlockRef>,
    path: &mut Vec<BlockRef>,
) {
    let len = block.borrow().body.len();
    for index in 0..len {
        let child = match &block.borrow().body[index] {
            Entry::Block(b) => b.clone(),
            Entry::Text(_) => continue,
        };
        let on_path = |b: &BlockRef| path.iter().any(|p| p.ptr_eq(b));

        let next = match child.name().and_then(|n| overrides.get(&n)) {
            Some(replacement) if !on_path(replacement) => {
                block.borrow_mut().body[index] = Entry::Block(replacement.clone());
                replacement.clone()
            }
            _ => child,
        };
        if on_path(&next) {
            continue;
        }
        path.push(next.clone());
        apply_override(&next, overrides, path);
        path.pop();
    }
}

/// `this.extend(target[, params], callback)`
pub(crate) fn extend(
    engine: &Engine,
    block: &BlockRef,
    args: Vec<RuntimeValue>,
) -> Result<RuntimeValue, Control> {
    if block.borrow().extended {
        return Err(RuntimeError::Usage("Can not extend twice".into()).into());
    }
    block.borrow_mut().extended = true;

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
    let mut params = RuntimeValue::Null;
    let mut callback = None;
    for arg in args {
        match arg {
            RuntimeValue::Function(f) => {
                callback = Some(f);
                break;
            }
            other if callback.is_none() => params = other,
            _ => {}
        }
    }
    let Some(callback) = callback else {
        return Err(RuntimeError::Usage("Must provide callback to extend".into()).into());
    };

    let params = forward_params(engine, block, params)?;
    let slot = open_async(block);
    let owner = block.clone();
    get_template(engine, block, &target, params.clone(), move |engine, result| {
        let base = match result {
            Ok(base) => base,
            Err(error) => return settle(engine, slot, owner, None, Some(error), callback),
        };
        base.borrow_mut().outer = owner.downgrade();
        run_block(
            engine,
            &base,
            params,
            Box::new(move |engine, outcome| match outcome {
                RunOutcome::Done(base, None) => settle(engine, slot, owner, Some(base), None, callback),
                RunOutcome::Done(_, Some(error)) | RunOutcome::Failed(error) => {
                    settle(engine, slot, owner, None, Some(error), callback)
                }
                RunOutcome::Aborted => {}
            }),
        );
    });
    Ok(RuntimeValue::Block(block.clone()))
}

/// Run the extend callback against the completed base, then rebuild the
/// derived body from a copy of the base with the derived overrides applied.
fn settle(
    engine: &Engine,
    slot: AsyncSlot,
    owner: BlockRef,
    base: Option<BlockRef>,
    error: Option<RenderError>,
    callback: Function,
) {
    let argument = error.clone().map(RuntimeValue::Error).unwrap_or(RuntimeValue::Null);
    // An abort is already reported to the render driver.
    let _ = slot.complete(engine, error, |engine| {
        if let Some(base) = &base {
            owner.borrow_mut().base = Some(base.clone());
        }
        call_function(engine, &callback, &RuntimeValue::Block(owner.clone()), vec![argument])?;
        if let Some(base) = base {
            let overrides = block_map(&owner);
            let body = base.deep_copy().borrow().body.clone();
            owner.borrow_mut().body = body;
            apply_override(&owner, &overrides, &mut vec![owner.clone()]);
        }
        Ok(())
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::Block;

    fn named(name: &str) -> BlockRef {
        BlockRef::new(Block::new(Some(name.into()), None, None))
    }

    fn text(block: &BlockRef) -> String {
        block
            .borrow()
            .body
            .iter()
            .map(|e| match e {
                Entry::Text(t) => t.to_string(),
                Entry::Block(b) => format!("[{}]", text(b)),
            })
            .collect()
    }

    #[test]
    fn later_names_win_in_block_map() {
        let root = BlockRef::new(Block::new(None, None, None));
        let first = root.open(Some("a".into()), None);
        root.end();
        let second = root.open(Some("a".into()), None);
        root.end();
        let map = block_map(&root);
        assert!(map["a"].ptr_eq(&second));
        assert!(!map["a"].ptr_eq(&first));
    }

    #[test]
    fn overrides_replace_nested_blocks() {
        let base = BlockRef::new(Block::new(None, None, None));
        base.print(vec!["<".into()]).unwrap();
        base.open(Some("outer".into()), None);
        base.print(vec!["o".into()]).unwrap();
        base.open(Some("inner".into()), None);
        base.print(vec!["base".into()]).unwrap();
        base.end();
        base.end();
        base.print(vec![">".into()]).unwrap();

        let replacement = named("inner");
        replacement.print(vec!["derived".into()]).unwrap();
        let overrides = HashMap::from([("inner".to_string(), replacement)]);
        apply_override(&base, &overrides, &mut vec![base.clone()]);
        assert_eq!(text(&base), "<[o[derived]]>");
    }

    #[test]
    fn self_containing_override_terminates() {
        let base = BlockRef::new(Block::new(None, None, None));
        base.open(Some("a".into()), None);
        base.end();

        let a = named("a");
        a.print(vec!["x".into()]).unwrap();
        a.borrow_mut().body.push(Entry::Block(a.clone()));
        let overrides = HashMap::from([("a".to_string(), a.clone())]);
        apply_override(&base, &overrides, &mut vec![base.clone()]);
        assert!(base.find("a").unwrap().ptr_eq(&a));
        // break the cycle so the test does not leak
        a.borrow_mut().body.pop();
    }
}
