//! Async bookkeeping for a running Block: placeholders, the pending
//! counter, error collection, completion and abort.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::debug;

use crate::block::{Block, BlockRef, Entry};
use crate::engine::Engine;
use crate::error::{Control, RenderError, RuntimeError};
use crate::executor::{call_function, execute_template};
use crate::runtime_value::{Function, RuntimeValue};

/// How a Block run ended.
#[derive(Debug)]
pub enum RunOutcome {
    /// The program and every async callback finished. Errors raised by
    /// callbacks are aggregated.
    Done(BlockRef, Option<RenderError>),
    /// The program itself failed before returning.
    Failed(RenderError),
    Aborted,
}

pub type Completion = Box<dyn FnOnce(&Engine, RunOutcome)>;

/// One outstanding async operation of a Block.
pub struct AsyncSlot {
    owner: BlockRef,
    placeholder: BlockRef,
}

/// Reserve the output position for an async operation at the current
/// insertion point and count it as pending.
pub fn open_async(owner: &BlockRef) -> AsyncSlot {
    let placeholder = BlockRef::new(Block::new(None, None, owner.template()));
    owner
        .current()
        .borrow_mut()
        .body
        .push(Entry::Block(placeholder.clone()));
    owner.borrow_mut().pending += 1;
    AsyncSlot {
        owner: owner.clone(),
        placeholder,
    }
}

impl AsyncSlot {
    pub fn owner(&self) -> &BlockRef {
        &self.owner
    }

    /// Record `error`, run `body` with the placeholder as insertion point
    /// and release the slot. The last slot to complete finishes the owner.
    ///
    /// Returns `Err(Control::Abort)` when `body` aborts the render; every
    /// other failure goes to the owner's error list.
    pub fn complete(
        self,
        engine: &Engine,
        error: Option<RenderError>,
        body: impl FnOnce(&Engine) -> Result<(), Control>,
    ) -> Result<(), Control> {
        let owner = self.owner;
        if owner.is_aborted() {
            return Ok(());
        }
        if let Some(error) = error {
            owner.borrow_mut().errors.extend(error.flatten());
        }

        owner.borrow_mut().stack.push(self.placeholder);
        let result = body(engine);
        owner.borrow_mut().stack.pop();

        match result {
            Ok(()) => {}
            Err(Control::Error(error)) => owner.borrow_mut().errors.push(error.into()),
            Err(Control::Abort) => {
                abort_render(engine, &owner);
                return Err(Control::Abort);
            }
        }

        let ready = {
            let mut b = owner.borrow_mut();
            b.pending -= 1;
            b.pending == 0 && !b.running
        };
        if ready {
            finish(engine, &owner);
        }
        Ok(())
    }
}

/// Hand the collected errors to the Block's completion callback.
pub(crate) fn finish(engine: &Engine, block: &BlockRef) {
    if block.is_aborted() {
        return;
    }
    let (done, errors) = {
        let mut b = block.borrow_mut();
        (b.on_complete.take(), std::mem::take(&mut b.errors))
    };
    if let Some(done) = done {
        done(engine, RunOutcome::Done(block.clone(), RenderError::aggregate(errors)));
    }
}

/// Stop the whole render `block` belongs to. The driver sees
/// [`RunOutcome::Aborted`]; later callbacks of the render are ignored.
pub(crate) fn abort_render(engine: &Engine, block: &BlockRef) {
    let root = block.root();
    if root.borrow().aborted {
        return;
    }
    block.borrow_mut().aborted = true;
    let done = {
        let mut r = root.borrow_mut();
        r.aborted = true;
        r.on_complete.take()
    };
    debug!(identity = ?root.identity(), "render aborted");
    if let Some(done) = done {
        engine.schedule(move |engine| done(engine, RunOutcome::Aborted));
    }
}

/// Run the template program of `block` with `params` and report the
/// outcome to `done`, possibly after pending async work completes.
///
/// A Block that already ran to completion (a cache hit) reports itself
/// without running again.
pub fn run_block(engine: &Engine, block: &BlockRef, params: RuntimeValue, done: Completion) {
    if block.is_materialized() {
        let block = block.clone();
        engine.schedule(move |engine| done(engine, RunOutcome::Done(block, None)));
        return;
    }

    {
        let mut b = block.borrow_mut();
        b.params = params.clone();
        b.on_complete = Some(Box::new(move |engine: &Engine, outcome: RunOutcome| {
            if let RunOutcome::Done(block, None) = &outcome {
                block.borrow_mut().materialized = true;
                if let Some(template) = block.template() {
                    template.update_cache(engine, block);
                }
                debug!(identity = ?block.identity(), "render complete");
            }
            done(engine, outcome)
        }));
        b.running = true;
    }
    let result = execute_template(engine, block, params);
    block.borrow_mut().running = false;

    match result {
        Ok(_) => {
            if block.borrow().pending == 0 {
                let block = block.clone();
                engine.schedule(move |engine| finish(engine, &block));
            }
        }
        Err(Control::Error(error)) => {
            let done = block.borrow_mut().on_complete.take();
            if let Some(done) = done {
                let error = RenderError::from(error);
                engine.schedule(move |engine| done(engine, RunOutcome::Failed(error)));
            }
        }
        Err(Control::Abort) => abort_render(engine, block),
    }
}

/// Run the template program of `block` without waiting for async work.
/// Returns `Ok(false)` when the program aborted.
pub fn run_block_sync(engine: &Engine, block: &BlockRef, params: RuntimeValue) -> Result<bool, RenderError> {
    if block.is_materialized() {
        return Ok(true);
    }
    {
        let mut b = block.borrow_mut();
        b.params = params.clone();
        b.running = true;
    }
    let result = execute_template(engine, block, params);
    block.borrow_mut().running = false;

    match result {
        Ok(_) => {}
        Err(Control::Abort) => {
            block.borrow_mut().aborted = true;
            debug!(identity = ?block.identity(), "render aborted");
            return Ok(false);
        }
        Err(Control::Error(error)) => return Err(error.into()),
    }
    if block.borrow().pending != 0 {
        // Ignore the callbacks still queued for this run.
        block.borrow_mut().aborted = true;
        return Err(RenderError::Usage("Async calls not supported in sync run".into()));
    }
    let errors = std::mem::take(&mut block.borrow_mut().errors);
    match RenderError::aggregate(errors) {
        Some(error) => Err(error),
        None => Ok(true),
    }
}

/// `this.async([receiver,] fn, args..., callback)`: call `fn` with the
/// arguments, the last function argument replaced by a wrapper that
/// completes an [`AsyncSlot`] and invokes the callback with `this` bound
/// to the owner.
pub(crate) fn async_call(
    engine: &Engine,
    owner: &BlockRef,
    mut args: Vec<RuntimeValue>,
) -> Result<RuntimeValue, Control> {
    let (receiver, callee) = match args.first() {
        Some(RuntimeValue::Function(f)) => {
            let f = f.clone();
            args.remove(0);
            (RuntimeValue::Null, f)
        }
        Some(_) if args.len() >= 2 => {
            let receiver = args.remove(0);
            match args.remove(0) {
                RuntimeValue::Function(f) => (receiver, f),
                other => {
                    return Err(RuntimeError::NotCallable(other.type_name().into()).into());
                }
            }
        }
        _ => return Err(RuntimeError::Usage("async requires a function to call".into()).into()),
    };

    let Some((index, callback)) = args.iter().enumerate().rev().find_map(|(i, a)| match a {
        RuntimeValue::Function(f) => Some((i, f.clone())),
        _ => None,
    }) else {
        return Err(RuntimeError::Usage(
            "No callback function parameter found to the async call".into(),
        )
        .into());
    };

    let slot = Rc::new(RefCell::new(Some(open_async(owner))));
    let wrapper_slot = slot.clone();
    let this = RuntimeValue::Block(owner.clone());
    args[index] = RuntimeValue::Function(Function::native("async callback", move |engine, _, cb_args| {
        let Some(slot) = wrapper_slot.borrow_mut().take() else {
            return Err(RuntimeError::Usage("async callback invoked more than once".into()).into());
        };
        let error = cb_args.first().and_then(callback_error);
        slot.complete(engine, error, |engine| {
            call_function(engine, &callback, &this, cb_args).map(|_| ())
        })?;
        Ok(RuntimeValue::Null)
    }));

    match call_function(engine, &callee, &receiver, args) {
        Ok(_) => {}
        Err(Control::Error(error)) => {
            // The callback will never run; the failure settles the slot.
            let pending = slot.borrow_mut().take();
            match pending {
                Some(pending) => pending.complete(engine, Some(error.into()), |_| Ok(()))?,
                None => return Err(Control::Error(error)),
            }
        }
        Err(Control::Abort) => return Err(Control::Abort),
    }
    Ok(RuntimeValue::Block(owner.clone()))
}

/// The error carried by the first argument of an async callback, if any.
fn callback_error(value: &RuntimeValue) -> Option<RenderError> {
    match value {
        RuntimeValue::Error(error) => Some(error.clone()),
        v if v.is_falsy() => None,
        RuntimeValue::String(message) => Some(RenderError::Custom(message.clone())),
        other => Some(RenderError::Custom(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn slots_keep_source_order_and_finish_once() {
        let engine = Engine::new();
        let owner = BlockRef::new(Block::new(None, None, None));
        let finished = Rc::new(Cell::new(0));
        let seen = finished.clone();
        owner.borrow_mut().on_complete = Some(Box::new(move |_, outcome| {
            assert!(matches!(outcome, RunOutcome::Done(_, None)));
            seen.set(seen.get() + 1);
        }));

        let first = open_async(&owner);
        let second = open_async(&owner);
        second
            .complete(&engine, None, |_| {
                owner.print(vec!["2".into()]).map_err(Control::from)
            })
            .unwrap();
        assert_eq!(finished.get(), 0);
        first
            .complete(&engine, None, |_| {
                owner.print(vec!["1".into()]).map_err(Control::from)
            })
            .unwrap();
        assert_eq!(finished.get(), 1);
        assert_eq!(owner.join(&engine).unwrap(), "12");
    }

    #[test]
    fn callback_errors_are_collected() {
        let engine = Engine::new();
        let owner = BlockRef::new(Block::new(None, None, None));
        let reported = Rc::new(RefCell::new(None));
        let sink = reported.clone();
        owner.borrow_mut().on_complete = Some(Box::new(move |_, outcome| {
            if let RunOutcome::Done(_, error) = outcome {
                *sink.borrow_mut() = error;
            }
        }));

        let a = open_async(&owner);
        let b = open_async(&owner);
        a.complete(&engine, Some(RenderError::Custom("a".into())), |_| Ok(()))
            .unwrap();
        b.complete(&engine, None, |_| Err(RuntimeError::Custom("b".into()).into()))
            .unwrap();
        let error = reported.borrow_mut().take().unwrap();
        assert_eq!(error.len(), 2);
    }

    #[test]
    fn falsy_callback_arguments_are_not_errors() {
        assert!(callback_error(&RuntimeValue::Null).is_none());
        assert!(callback_error(&RuntimeValue::Boolean(false)).is_none());
        assert!(matches!(
            callback_error(&"boom".into()),
            Some(RenderError::Custom(m)) if m == "boom"
        ));
    }
}
