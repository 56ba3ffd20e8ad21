pub mod directive;
pub mod instruction;
pub mod parser;
pub mod syntax;

pub use directive::{CacheKey, Directives};
pub use parser::{CompileError, Compiler};
pub use syntax::Syntax;

use crate::instruction::Instruction;

/// A compiled template program.
#[derive(Debug, Clone)]
pub struct Program {
    /// Resolved identity of the source, `None` for anonymous templates.
    pub identity: Option<String>,
    pub statements: Vec<Instruction>,
    pub directives: Directives,
    /// The generated host code the statements were parsed from.
    pub code: String,
    /// Present when the template carries a cache directive.
    pub cache: Option<CacheKey>,
}

impl Program {
    /// Whether completed renders of this program are memoized.
    pub fn is_cached(&self) -> bool {
        self.cache.is_some()
    }
}
