//! Where template sources come from.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use camino::{Utf8Path, Utf8PathBuf};

use crate::engine::Engine;
use crate::path;

pub type ReadCallback = Box<dyn FnOnce(&Engine, io::Result<String>)>;

/// Resolves template references to identities and reads their sources.
pub trait ResourceReader {
    /// Identity of `reference` as seen from the template `base`, or from
    /// the top level when `base` is `None`.
    fn resolve(&self, base: Option<&str>, reference: &str) -> String {
        match base {
            Some(base) => path::join(&path::dirname(base), reference),
            None => path::normalize(Utf8Path::new(reference)).into_string(),
        }
    }

    /// Read the source of `identity`. `done` may be called later, from a
    /// scheduled task.
    fn read(&self, engine: &Engine, identity: &str, done: ReadCallback);
}

/// Reads templates from the filesystem. Top-level references resolve
/// against the working directory captured at construction.
#[derive(Debug, Clone)]
pub struct FileReader {
    root: Utf8PathBuf,
}

impl FileReader {
    pub fn new() -> Self {
        let root = std::env::current_dir()
            .ok()
            .and_then(|dir| Utf8PathBuf::from_path_buf(dir).ok())
            .unwrap_or_else(|| Utf8PathBuf::from("."));
        FileReader { root }
    }

    pub fn with_root(root: impl Into<Utf8PathBuf>) -> Self {
        FileReader { root: root.into() }
    }
}

impl Default for FileReader {
    fn default() -> Self {
        Self::new()
    }
}

impl ResourceReader for FileReader {
    fn resolve(&self, base: Option<&str>, reference: &str) -> String {
        match base {
            Some(base) => path::join(&path::dirname(base), reference),
            None => path::join(self.root.as_str(), reference),
        }
    }

    fn read(&self, engine: &Engine, identity: &str, done: ReadCallback) {
        let result = std::fs::read_to_string(identity);
        engine.schedule(move |engine| done(engine, result));
    }
}

/// Templates held in memory, keyed by identity. Clones share storage.
#[derive(Debug, Clone, Default)]
pub struct MemoryReader {
    sources: Rc<RefCell<HashMap<String, String>>>,
    reads: Rc<Cell<usize>>,
}

impl MemoryReader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(self, identity: impl Into<String>, source: impl Into<String>) -> Self {
        self.insert(identity, source);
        self
    }

    pub fn insert(&self, identity: impl Into<String>, source: impl Into<String>) {
        self.sources.borrow_mut().insert(identity.into(), source.into());
    }

    /// Number of reads issued so far.
    pub fn reads(&self) -> usize {
        self.reads.get()
    }
}

impl ResourceReader for MemoryReader {
    fn read(&self, engine: &Engine, identity: &str, done: ReadCallback) {
        self.reads.set(self.reads.get() + 1);
        let result = self.sources.borrow().get(identity).cloned().ok_or_else(|| {
            io::Error::new(io::ErrorKind::NotFound, format!("no template named '{}'", identity))
        });
        engine.schedule(move |engine| done(engine, result));
    }
}
