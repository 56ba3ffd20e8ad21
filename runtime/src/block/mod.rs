//! The runtime tree: ordered text and child Blocks, built by template code.

pub mod compose;
pub mod inherit;
pub mod join;
pub mod methods;

use std::cell::{Ref, RefCell, RefMut};
use std::fmt;
use std::rc::{Rc, Weak};

use crate::coordinator::Completion;
use crate::error::{RenderError, RuntimeError};
use crate::path;
use crate::runtime_value::{Function, RuntimeValue};
use crate::template::Template;

/// One body element. Adjacent text is coalesced on insertion.
#[derive(Debug, Clone)]
pub(crate) enum Entry {
    /// Shared between copies; `Rc::make_mut` detaches on append.
    Text(Rc<String>),
    Block(BlockRef),
}

impl Entry {
    /// Copy of the entry with child Blocks copied recursively.
    pub(crate) fn deep_copy(&self) -> Entry {
        match self {
            Entry::Text(t) => Entry::Text(t.clone()),
            Entry::Block(b) => Entry::Block(b.deep_copy()),
        }
    }
}

pub struct Block {
    pub(crate) name: Option<String>,
    pub(crate) filter: Option<Function>,
    pub(crate) body: Vec<Entry>,
    /// Open children; the last one is the current insertion point.
    pub(crate) stack: Vec<BlockRef>,
    pub(crate) indent: Option<String>,
    pub(crate) template: Option<Rc<Template>>,
    /// The Block that embeds or extends this one.
    pub(crate) outer: Weak<RefCell<Block>>,
    /// The completed Block this one extends.
    pub(crate) base: Option<BlockRef>,
    pub(crate) pending: usize,
    pub(crate) errors: Vec<RenderError>,
    pub(crate) on_complete: Option<Completion>,
    pub(crate) params: RuntimeValue,
    /// The program is executing; completion waits until it returns.
    pub(crate) running: bool,
    pub(crate) materialized: bool,
    pub(crate) extended: bool,
    pub(crate) cached: bool,
    pub(crate) aborted: bool,
    pub(crate) server_path: Option<String>,
}

impl Block {
    pub(crate) fn new(name: Option<String>, filter: Option<Function>, template: Option<Rc<Template>>) -> Self {
        Block {
            name,
            filter,
            body: Vec::new(),
            stack: Vec::new(),
            indent: None,
            template,
            outer: Weak::new(),
            base: None,
            pending: 0,
            errors: Vec::new(),
            on_complete: None,
            params: RuntimeValue::Null,
            running: false,
            materialized: false,
            extended: false,
            cached: false,
            aborted: false,
            server_path: None,
        }
    }

    pub(crate) fn push_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        if let Some(Entry::Text(last)) = self.body.last_mut() {
            Rc::make_mut(last).push_str(text);
        } else {
            self.body.push(Entry::Text(Rc::new(text.to_string())));
        }
    }
}

/// Shared handle to a [`Block`].
#[derive(Clone)]
pub struct BlockRef(Rc<RefCell<Block>>);

impl fmt::Debug for BlockRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.try_borrow() {
            Ok(b) => f
                .debug_struct("Block")
                .field("name", &b.name)
                .field("entries", &b.body.len())
                .field("pending", &b.pending)
                .finish(),
            Err(_) => f.write_str("Block(<borrowed>)"),
        }
    }
}

impl BlockRef {
    pub(crate) fn new(block: Block) -> Self {
        BlockRef(Rc::new(RefCell::new(block)))
    }

    /// A fresh top-level Block for running `template`.
    pub(crate) fn for_template(template: &Rc<Template>) -> Self {
        let mut block = Block::new(None, None, Some(template.clone()));
        block.server_path = template.server_path();
        BlockRef::new(block)
    }

    pub(crate) fn borrow(&self) -> Ref<'_, Block> {
        self.0.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, Block> {
        self.0.borrow_mut()
    }

    pub(crate) fn downgrade(&self) -> Weak<RefCell<Block>> {
        Rc::downgrade(&self.0)
    }

    /// Reference identity.
    pub fn ptr_eq(&self, other: &BlockRef) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub fn name(&self) -> Option<String> {
        self.0.borrow().name.clone()
    }

    pub fn template(&self) -> Option<Rc<Template>> {
        self.0.borrow().template.clone()
    }

    /// Identity of the template this Block runs, if it has one.
    pub fn identity(&self) -> Option<String> {
        self.template().and_then(|t| t.identity().map(str::to_string))
    }

    pub fn server_path(&self) -> Option<String> {
        self.0.borrow().server_path.clone()
    }

    pub fn set_server_path(&self, path: impl Into<String>) {
        self.0.borrow_mut().server_path = Some(path.into());
    }

    pub fn is_materialized(&self) -> bool {
        self.0.borrow().materialized
    }

    /// The current insertion point: the innermost open child, or the Block itself.
    pub(crate) fn current(&self) -> BlockRef {
        self.0
            .borrow()
            .stack
            .last()
            .cloned()
            .unwrap_or_else(|| self.clone())
    }

    /// Append values at the current insertion point. Null is skipped,
    /// Blocks are inserted as children, everything else as text.
    pub fn print(&self, values: Vec<RuntimeValue>) -> Result<(), RuntimeError> {
        let target = self.current();
        let mut entries = Vec::with_capacity(values.len());
        for value in values {
            match value {
                RuntimeValue::Null => {}
                RuntimeValue::Block(child) => {
                    if child.contains(&target) {
                        return Err(RuntimeError::Usage(
                            "cannot print a block into itself or one of its descendants".into(),
                        ));
                    }
                    entries.push(Entry::Block(child));
                }
                other => entries.push(Entry::Text(Rc::new(other.to_string()))),
            }
        }
        let mut block = target.borrow_mut();
        for entry in entries {
            match entry {
                Entry::Text(text) => block.push_text(&text),
                child => block.body.push(child),
            }
        }
        Ok(())
    }

    /// Whether `other` is this Block or appears anywhere below it.
    fn contains(&self, other: &BlockRef) -> bool {
        if self.ptr_eq(other) {
            return true;
        }
        let children: Vec<BlockRef> = self
            .borrow()
            .body
            .iter()
            .filter_map(|entry| match entry {
                Entry::Block(child) => Some(child.clone()),
                Entry::Text(_) => None,
            })
            .collect();
        children.iter().any(|child| child.contains(other))
    }

    /// Insert a new child at the current insertion point and make it current.
    pub(crate) fn open(&self, name: Option<String>, filter: Option<Function>) -> BlockRef {
        let child = BlockRef::new(Block::new(name, filter, self.template()));
        self.current().borrow_mut().body.push(Entry::Block(child.clone()));
        self.0.borrow_mut().stack.push(child.clone());
        child
    }

    /// Close the innermost open child.
    pub fn end(&self) {
        self.0.borrow_mut().stack.pop();
    }

    /// Depth-first search of the body for a child named `name`.
    pub fn find(&self, name: &str) -> Option<BlockRef> {
        let children: Vec<BlockRef> = self
            .0
            .borrow()
            .body
            .iter()
            .filter_map(|e| match e {
                Entry::Block(b) => Some(b.clone()),
                Entry::Text(_) => None,
            })
            .collect();
        for child in children {
            if child.name().as_deref() == Some(name) {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// The outermost Block of the embed/extend chain.
    pub fn root(&self) -> BlockRef {
        let mut block = self.clone();
        loop {
            let outer = block.0.borrow().outer.upgrade();
            match outer {
                Some(outer) => block = BlockRef(outer),
                None => return block,
            }
        }
    }

    /// Whether the render this Block belongs to was aborted.
    pub(crate) fn is_aborted(&self) -> bool {
        self.0.borrow().aborted || self.root().0.borrow().aborted
    }

    /// Append the body of the base's same-named Block at the current insertion point.
    pub fn insert_super(&self) {
        let base = self.0.borrow().base.clone();
        let Some(base) = base else { return };
        let target = self.current();
        let Some(name) = target.name() else { return };
        if let Some(found) = base.find(&name) {
            let copies: Vec<Entry> = found.borrow().body.iter().map(Entry::deep_copy).collect();
            target.borrow_mut().body.extend(copies);
        }
    }

    /// Resolve `relative` against this Block's server path. Without a
    /// server path the input comes back unchanged.
    pub fn link_local(&self, relative: &str, request: Option<&RuntimeValue>) -> String {
        let server_path = self
            .server_path()
            .or_else(|| self.template().and_then(|t| t.server_path()));
        let Some(server_path) = server_path else {
            return relative.to_string();
        };
        let resolved = path::resolve_link(&server_path, relative);
        match request.and_then(request_origin) {
            Some(origin) => format!("{}{}", origin, resolved),
            None => resolved,
        }
    }

    /// Copy of this Block: body copied recursively, text shared, naming,
    /// filter, indent and template kept. Runtime state starts fresh.
    pub(crate) fn deep_copy(&self) -> BlockRef {
        let b = self.0.borrow();
        let mut copy = Block::new(b.name.clone(), b.filter.clone(), b.template.clone());
        copy.indent = b.indent.clone();
        copy.body = b.body.iter().map(Entry::deep_copy).collect();
        BlockRef::new(copy)
    }
}

/// `scheme://host` of a request object.
fn request_origin(request: &RuntimeValue) -> Option<String> {
    let host = request
        .get("host")
        .or_else(|| request.get("headers").and_then(|h| h.get("host")))?;
    let scheme = request
        .get("scheme")
        .map(|s| s.to_string())
        .unwrap_or_else(|| "http".to_string());
    Some(format!("{}://{}", scheme, host))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text_of(block: &BlockRef) -> String {
        block
            .borrow()
            .body
            .iter()
            .map(|e| match e {
                Entry::Text(t) => t.to_string(),
                Entry::Block(b) => format!("[{}]", b.name().unwrap_or_default()),
            })
            .collect()
    }

    fn block() -> BlockRef {
        BlockRef::new(Block::new(None, None, None))
    }

    #[test]
    fn print_coalesces_text_and_skips_null() {
        let b = block();
        b.print(vec!["a".into(), RuntimeValue::Null, RuntimeValue::Number(1.0)])
            .unwrap();
        b.print(vec!["b".into()]).unwrap();
        assert_eq!(b.borrow().body.len(), 1);
        assert_eq!(text_of(&b), "a1b");
    }

    #[test]
    fn open_children_receive_prints() {
        let b = block();
        b.print(vec!["x".into()]).unwrap();
        let child = b.open(Some("inner".into()), None);
        b.print(vec!["y".into()]).unwrap();
        b.end();
        b.print(vec!["z".into()]).unwrap();
        assert_eq!(text_of(&b), "x[inner]z");
        assert_eq!(text_of(&child), "y");
    }

    #[test]
    fn find_searches_depth_first() {
        let b = block();
        b.open(Some("outer".into()), None);
        let inner = b.open(Some("inner".into()), None);
        b.end();
        b.end();
        assert!(b.find("inner").unwrap().ptr_eq(&inner));
        assert!(b.find("missing").is_none());
    }

    #[test]
    fn root_follows_outer_links() {
        let top = block();
        let mid = block();
        let leaf = block();
        mid.borrow_mut().outer = top.downgrade();
        leaf.borrow_mut().outer = mid.downgrade();
        assert!(leaf.root().ptr_eq(&top));
    }

    #[test]
    fn printing_a_block_into_itself_fails() {
        let b = block();
        assert!(b.print(vec![RuntimeValue::Block(b.clone())]).is_err());
    }

    #[test]
    fn printing_an_ancestor_into_an_open_child_fails() {
        let b = block();
        let child = b.open(Some("a".into()), None);
        b.open(Some("b".into()), None);
        assert!(b.print(vec![RuntimeValue::Block(b.clone())]).is_err());
        assert!(b.print(vec![RuntimeValue::Block(child)]).is_err());
        b.end();
        b.end();
        let sibling = block();
        sibling.print(vec!["s".into()]).unwrap();
        assert!(b.print(vec![RuntimeValue::Block(sibling)]).is_ok());
    }

    #[test]
    fn deep_copy_detaches_text() {
        let b = block();
        b.print(vec!["shared".into()]).unwrap();
        let copy = b.deep_copy();
        copy.print(vec![" more".into()]).unwrap();
        assert_eq!(text_of(&b), "shared");
        assert_eq!(text_of(&copy), "shared more");
    }

    #[test]
    fn link_local_without_server_path_is_identity() {
        assert_eq!(block().link_local("../a.css", None), "../a.css");
    }

    #[test]
    fn link_local_with_request_origin() {
        let b = block();
        b.set_server_path("/site/docs/page.html");
        assert_eq!(b.link_local("../img/x.png", None), "/site/img/x.png");
        let req = RuntimeValue::from(serde_json::json!({"headers": {"host": "example.org"}}));
        assert_eq!(b.link_local("./", Some(&req)), "http://example.org/site/docs/");
    }
}
