use std::cell::RefCell;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::rc::Rc;

use strata::{CacheKey, Directives, Program};
use tracing::{trace, warn};

use crate::block::BlockRef;
use crate::engine::Engine;
use crate::environment::Environment;
use crate::error::Control;
use crate::evaluator::evaluate;
use crate::runtime_value::RuntimeValue;

/// A compiled template plus its memoized renders.
#[derive(Debug)]
pub struct Template {
    program: Program,
    /// Completed Blocks of a cached template, by cache key.
    run_cache: RefCell<HashMap<String, BlockRef>>,
    server_path: RefCell<Option<String>>,
}

impl Template {
    pub fn new(program: Program) -> Self {
        Template {
            program,
            run_cache: RefCell::new(HashMap::new()),
            server_path: RefCell::new(None),
        }
    }

    pub fn identity(&self) -> Option<&str> {
        self.program.identity.as_deref()
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    pub fn directives(&self) -> &Directives {
        &self.program.directives
    }

    pub fn server_path(&self) -> Option<String> {
        self.server_path.borrow().clone()
    }

    pub fn set_server_path(&self, path: impl Into<String>) {
        *self.server_path.borrow_mut() = Some(path.into());
    }

    /// A Block to run this template with. For a cached template and known
    /// parameters, a previously completed Block with the same key is
    /// returned instead of a fresh one.
    pub fn runtime(self: &Rc<Self>, engine: &Engine, params: Option<&RuntimeValue>) -> BlockRef {
        if let Some(params) = params
            && let Some(key) = self.cache_key(engine, params)
            && let Some(block) = self.run_cache.borrow().get(&key)
        {
            trace!(identity = ?self.identity(), key = %key, "render cache hit");
            return block.clone();
        }
        BlockRef::for_template(self)
    }

    /// Memoize a completed Block under the key computed from its run parameters.
    pub(crate) fn update_cache(&self, engine: &Engine, block: &BlockRef) {
        if self.program.cache.is_none() || block.borrow().cached {
            return;
        }
        let params = block.borrow().params.clone();
        let Some(key) = self.cache_key(engine, &params) else {
            return;
        };
        // The first completed render for a key stays; later ones are not stored.
        if let Entry::Vacant(slot) = self.run_cache.borrow_mut().entry(key) {
            block.borrow_mut().cached = true;
            slot.insert(block.clone());
        }
    }

    pub(crate) fn clear_run_cache(&self) {
        self.run_cache.borrow_mut().clear();
    }

    fn cache_key(&self, engine: &Engine, params: &RuntimeValue) -> Option<String> {
        match self.program.cache.as_ref()? {
            CacheKey::Default => Some(String::new()),
            CacheKey::Expression(expr) => {
                let env = Environment::new(
                    params.clone(),
                    RuntimeValue::Null,
                    self.identity().map(Rc::from),
                );
                match evaluate(engine, expr, &env, 0) {
                    Ok(key) => Some(key.to_string()),
                    Err(Control::Error(error)) => {
                        warn!(identity = ?self.identity(), %error, "cannot compute cache key");
                        None
                    }
                    Err(Control::Abort) => None,
                }
            }
        }
    }
}
