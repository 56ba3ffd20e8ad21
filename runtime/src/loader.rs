//! The compiled-template cache, with coalescing of concurrent loads.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use tracing::{debug, trace, warn};

use crate::engine::Engine;
use crate::error::RenderError;
use crate::template::Template;

pub type LoadCallback = Box<dyn FnOnce(&Engine, Result<Rc<Template>, RenderError>)>;

enum Slot {
    /// A read is in flight; callers that arrived meanwhile wait here.
    Loading(Vec<LoadCallback>),
    Ready(Rc<Template>),
}

#[derive(Default)]
pub struct Loader {
    slots: RefCell<HashMap<String, Slot>>,
}

impl Loader {
    /// Deliver the compiled template for `identity` to `done`, reading and
    /// compiling it at most once while a load is in flight. Failures are
    /// reported to every waiting caller and not cached.
    pub fn load(&self, engine: &Engine, identity: &str, done: LoadCallback) {
        let mut slots = self.slots.borrow_mut();
        match slots.get_mut(identity) {
            Some(Slot::Ready(template)) => {
                let template = template.clone();
                drop(slots);
                trace!(identity, "template cache hit");
                engine.schedule(move |engine| done(engine, Ok(template)));
            }
            Some(Slot::Loading(queue)) => queue.push(done),
            None => {
                slots.insert(identity.to_string(), Slot::Loading(Vec::new()));
                drop(slots);
                debug!(identity, "loading template");
                let owned = identity.to_string();
                engine.reader().read(
                    engine,
                    identity,
                    Box::new(move |engine, source| {
                        engine.loader().finish_load(engine, &owned, source, done)
                    }),
                );
            }
        }
    }

    fn finish_load(
        &self,
        engine: &Engine,
        identity: &str,
        source: io::Result<String>,
        first: LoadCallback,
    ) {
        let result = match source {
            Ok(source) => engine
                .compiler()
                .compile(&source, Some(identity))
                .map(|program| Rc::new(Template::new(program)))
                .map_err(|error| {
                    warn!(identity, %error, "template failed to compile");
                    RenderError::Compile(error)
                }),
            Err(error) => {
                warn!(identity, %error, "template could not be read");
                Err(RenderError::Read {
                    identity: identity.to_string(),
                    message: error.to_string(),
                })
            }
        };

        // Settle the slot before any callback runs; callbacks may load again.
        let queue = {
            let mut slots = self.slots.borrow_mut();
            let queue = match slots.remove(identity) {
                Some(Slot::Loading(queue)) => queue,
                _ => Vec::new(),
            };
            if let Ok(template) = &result {
                slots.insert(identity.to_string(), Slot::Ready(template.clone()));
            }
            queue
        };

        first(engine, result.clone());
        for waiting in queue {
            waiting(engine, result.clone());
        }
    }

    /// Forget compiled templates and their memoized renders. Loads in
    /// flight complete normally.
    pub fn clear(&self) {
        self.slots.borrow_mut().retain(|_, slot| match slot {
            Slot::Loading(_) => true,
            Slot::Ready(template) => {
                template.clear_run_cache();
                false
            }
        });
    }

    pub fn len(&self) -> usize {
        self.slots
            .borrow()
            .values()
            .filter(|slot| matches!(slot, Slot::Ready(_)))
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
