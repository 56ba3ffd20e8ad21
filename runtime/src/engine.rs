use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use strata::parser::DialectCompiler;
use strata::{CompileError, Compiler};

use crate::block::BlockRef;
use crate::builtins;
use crate::config::EngineConfig;
use crate::coordinator::{RunOutcome, run_block, run_block_sync};
use crate::error::{Control, RenderError, RuntimeError};
use crate::loader::Loader;
use crate::reader::{FileReader, ResourceReader};
use crate::runtime_value::{Function, RuntimeValue};
use crate::scheduler::Scheduler;
use crate::template::Template;

/// Nested function calls allowed before a render fails with a stack overflow.
const MAX_CALL_DEPTH: usize = 100;

type Escaper = dyn Fn(&str) -> String;

/// Result of a render.
#[derive(Debug, Clone, Default)]
pub struct Rendered {
    pub content: String,
    pub error: Option<RenderError>,
    /// The template called `abort()`. Content holds what was printed before.
    pub aborted: bool,
}

impl Rendered {
    fn failed(error: RenderError) -> Self {
        Rendered {
            content: String::new(),
            error: Some(error),
            aborted: false,
        }
    }

    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }

    pub fn into_result(self) -> Result<String, RenderError> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.content),
        }
    }
}

struct EngineInner {
    config: EngineConfig,
    compiler: Compiler,
    reader: Box<dyn ResourceReader>,
    scheduler: Scheduler,
    loader: Loader,
    globals: RefCell<HashMap<String, RuntimeValue>>,
    escaper: Box<Escaper>,
    depth: Cell<usize>,
}

/// Compiles, loads and renders templates. Cheap to clone; clones share
/// caches and the run queue.
#[derive(Clone)]
pub struct Engine {
    inner: Rc<EngineInner>,
}

pub struct EngineBuilder {
    config: EngineConfig,
    reader: Option<Box<dyn ResourceReader>>,
    escaper: Option<Box<Escaper>>,
    dialect: Option<Box<dyn FnOnce(Compiler) -> Compiler>>,
}

impl EngineBuilder {
    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn reader(mut self, reader: impl ResourceReader + 'static) -> Self {
        self.reader = Some(Box::new(reader));
        self
    }

    /// Replace the function used by `escape()` and the escape shortcut.
    pub fn escaper(mut self, escaper: impl Fn(&str) -> String + 'static) -> Self {
        self.escaper = Some(Box::new(escaper));
        self
    }

    /// Replace the translator of the indentation-sensitive dialect.
    pub fn dialect(mut self, dialect: impl DialectCompiler + 'static) -> Self {
        self.dialect = Some(Box::new(move |compiler: Compiler| compiler.with_dialect(dialect)));
        self
    }

    pub fn build(self) -> Engine {
        let mut compiler = Compiler::new(self.config.syntax.clone());
        if let Some(dialect) = self.dialect {
            compiler = dialect(compiler);
        }
        let engine = Engine {
            inner: Rc::new(EngineInner {
                config: self.config,
                compiler,
                reader: self.reader.unwrap_or_else(|| Box::new(FileReader::new())),
                scheduler: Scheduler::default(),
                loader: Loader::default(),
                globals: RefCell::new(HashMap::new()),
                escaper: self.escaper.unwrap_or_else(|| Box::new(escape_html)),
                depth: Cell::new(0),
            }),
        };
        builtins::install(&engine);
        engine
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

impl Engine {
    pub fn new() -> Self {
        Self::builder().build()
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder {
            config: EngineConfig::default(),
            reader: None,
            escaper: None,
            dialect: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn compiler(&self) -> &Compiler {
        &self.inner.compiler
    }

    pub fn reader(&self) -> &dyn ResourceReader {
        self.inner.reader.as_ref()
    }

    pub(crate) fn scheduler(&self) -> &Scheduler {
        &self.inner.scheduler
    }

    pub(crate) fn loader(&self) -> &Loader {
        &self.inner.loader
    }

    /// Make a host function callable from template code under `name`.
    pub fn register_function(
        &self,
        name: &str,
        call: impl Fn(&Engine, &RuntimeValue, Vec<RuntimeValue>) -> Result<RuntimeValue, Control> + 'static,
    ) {
        self.set_global(name, RuntimeValue::Function(Function::native(name, call)));
    }

    pub fn set_global(&self, name: &str, value: RuntimeValue) {
        self.inner.globals.borrow_mut().insert(name.to_string(), value);
    }

    pub(crate) fn global(&self, name: &str) -> Option<RuntimeValue> {
        self.inner.globals.borrow().get(name).cloned()
    }

    pub fn escape(&self, value: &RuntimeValue) -> String {
        match value {
            RuntimeValue::Null => String::new(),
            other => (self.inner.escaper)(&other.to_string()),
        }
    }

    pub fn schedule(&self, task: impl FnOnce(&Engine) + 'static) {
        self.inner.scheduler.schedule(task);
    }

    pub fn schedule_after(&self, ticks: usize, task: impl FnOnce(&Engine) + 'static) {
        self.inner.scheduler.schedule_after(ticks, task);
    }

    /// Pump the run queue until nothing is left. Returns the number of tasks run.
    pub fn run_until_idle(&self) -> usize {
        self.inner.scheduler.run_until_idle(self)
    }

    pub(crate) fn enter_call(&self) -> Result<CallGuard<'_>, RuntimeError> {
        let depth = self.inner.depth.get();
        if depth >= MAX_CALL_DEPTH {
            return Err(RuntimeError::StackOverflow);
        }
        self.inner.depth.set(depth + 1);
        Ok(CallGuard(&self.inner.depth))
    }

    /// Compile anonymous template source.
    pub fn compile(&self, source: &str) -> Result<Rc<Template>, CompileError> {
        let program = self.compiler().compile(source, None)?;
        Ok(Rc::new(Template::new(program)))
    }

    /// Load `identity` through the template cache.
    pub fn load(
        &self,
        identity: &str,
        done: impl FnOnce(&Engine, Result<Rc<Template>, RenderError>) + 'static,
    ) {
        self.inner.loader.load(self, identity, Box::new(done));
    }

    /// Drop compiled templates and memoized renders.
    pub fn clear_cache(&self) {
        self.inner.loader.clear();
    }

    pub fn cached_templates(&self) -> usize {
        self.inner.loader.len()
    }

    /// Run `block` with `params` and deliver the joined output.
    pub fn run(
        &self,
        block: &BlockRef,
        params: RuntimeValue,
        done: impl FnOnce(&Engine, Rendered) + 'static,
    ) {
        if block.server_path().is_none()
            && let Some(path) = &self.config().server_path
        {
            block.set_server_path(path.clone());
        }
        let driver = block.clone();
        run_block(
            self,
            block,
            params,
            Box::new(move |engine, outcome| {
                let rendered = match outcome {
                    RunOutcome::Done(block, error) => joined(engine, &block, error),
                    RunOutcome::Failed(error) => Rendered::failed(error),
                    RunOutcome::Aborted => Rendered {
                        aborted: true,
                        ..joined(engine, &driver, None)
                    },
                };
                done(engine, rendered)
            }),
        );
    }

    /// Compile and render anonymous source. Compile errors are delivered
    /// through `done` as well.
    pub fn run_source(
        &self,
        source: &str,
        params: RuntimeValue,
        done: impl FnOnce(&Engine, Rendered) + 'static,
    ) {
        match self.compile(source) {
            Ok(template) => self.run(&template.runtime(self, None), params, done),
            Err(error) => {
                let error = RenderError::Compile(error);
                self.schedule(move |engine| done(engine, Rendered::failed(error)));
            }
        }
    }

    /// Load `identity` and render it. Cached templates reuse a completed
    /// render with the same cache key.
    pub fn run_url(
        &self,
        identity: &str,
        params: RuntimeValue,
        done: impl FnOnce(&Engine, Rendered) + 'static,
    ) {
        let identity = self.reader().resolve(None, identity);
        self.load(&identity, move |engine, loaded| match loaded {
            Ok(template) => {
                let block = template.runtime(engine, Some(&params));
                engine.run(&block, params, done);
            }
            Err(error) => done(engine, Rendered::failed(error)),
        });
    }

    /// Render anonymous source without a run queue. Any async call fails
    /// the render with a usage error.
    pub fn run_source_sync(&self, source: &str, params: RuntimeValue) -> Rendered {
        let template = match self.compile(source) {
            Ok(template) => template,
            Err(error) => return Rendered::failed(error.into()),
        };
        let block = template.runtime(self, None);
        if let Some(path) = &self.config().server_path {
            block.set_server_path(path.clone());
        }
        match run_block_sync(self, &block, params) {
            Ok(true) => joined(self, &block, None),
            Ok(false) => Rendered {
                aborted: true,
                ..joined(self, &block, None)
            },
            Err(error) => Rendered::failed(error),
        }
    }

    /// [`Engine::run_url`], pumping the run queue until the render completes.
    pub fn render_blocking(&self, identity: &str, params: RuntimeValue) -> Rendered {
        let slot = Rc::new(RefCell::new(None));
        let sink = slot.clone();
        self.run_url(identity, params, move |_, rendered| *sink.borrow_mut() = Some(rendered));
        self.settle(slot)
    }

    /// [`Engine::run_source`], pumping the run queue until the render completes.
    pub fn render_source_blocking(&self, source: &str, params: RuntimeValue) -> Rendered {
        let slot = Rc::new(RefCell::new(None));
        let sink = slot.clone();
        self.run_source(source, params, move |_, rendered| *sink.borrow_mut() = Some(rendered));
        self.settle(slot)
    }

    fn settle(&self, slot: Rc<RefCell<Option<Rendered>>>) -> Rendered {
        self.run_until_idle();
        let rendered = slot.borrow_mut().take();
        rendered.unwrap_or_else(|| {
            Rendered::failed(RenderError::Usage(
                "render never completed: an async callback was not invoked".into(),
            ))
        })
    }
}

/// Decrements the call depth when dropped.
pub(crate) struct CallGuard<'a>(&'a Cell<usize>);

impl Drop for CallGuard<'_> {
    fn drop(&mut self) {
        self.0.set(self.0.get().saturating_sub(1));
    }
}

fn joined(engine: &Engine, block: &BlockRef, error: Option<RenderError>) -> Rendered {
    match block.join(engine) {
        Ok(content) => Rendered {
            content,
            error,
            aborted: false,
        },
        Err(Control::Error(join_error)) => {
            let mut errors = error.map(RenderError::flatten).unwrap_or_default();
            errors.push(join_error.into());
            Rendered {
                content: String::new(),
                error: RenderError::aggregate(errors),
                aborted: false,
            }
        }
        Err(Control::Abort) => Rendered {
            content: String::new(),
            error,
            aborted: true,
        },
    }
}

/// HTML escaping of `& < > " ' /`.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            '/' => out.push_str("&#x2F;"),
            c => out.push(c),
        }
    }
    out
}
