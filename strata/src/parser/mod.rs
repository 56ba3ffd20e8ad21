pub mod dialect;
pub mod error;
pub mod expression;
pub(crate) mod lexer;
mod lines;
mod text;

pub use dialect::{DialectCompiler, DialectError, OffsideTranslator};
pub use error::CompileError;

use std::ops::Range;

use tracing::trace;

use crate::Program;
use crate::directive::{self, CacheKey};
use crate::syntax::Syntax;

const BOM: char = '\u{feff}';

/// Host code generated from a template, before parsing.
#[derive(Debug, Clone)]
pub struct Generated {
    pub code: String,
    pub directives: directive::Directives,
    /// Whether the code went through the dialect translator.
    pub translated: bool,
}

/// Compiler entry point.
pub struct Compiler {
    syntax: Syntax,
    dialect: Box<dyn DialectCompiler>,
}

impl Default for Compiler {
    fn default() -> Self {
        Compiler::new(Syntax::default())
    }
}

impl Compiler {
    pub fn new(syntax: Syntax) -> Self {
        Compiler {
            syntax,
            dialect: Box::new(OffsideTranslator),
        }
    }

    /// Replace the translator used for the indentation-sensitive dialect.
    pub fn with_dialect(mut self, dialect: impl DialectCompiler + 'static) -> Self {
        self.dialect = Box::new(dialect);
        self
    }

    pub fn syntax(&self) -> &Syntax {
        &self.syntax
    }

    /// Compile template source into a [`Program`].
    pub fn compile(&self, source: &str, identity: Option<&str>) -> Result<Program, CompileError> {
        let (body, offset) = strip_bom(source);
        let spans = line_spans(body, offset);
        let generated = self.generate(source, identity)?;

        let statements = expression::parse_program(&generated.code).map_err(|e| {
            CompileError::error(e.message, span_of(&spans, e.line), e.line)
                .with_identity(identity)
                .with_intermediate(generated.code.clone())
        })?;

        let cache = match generated.directives.get(directive::CACHE) {
            None => None,
            Some("") => Some(CacheKey::Default),
            Some(value) => {
                let line = directive_line(body, &self.syntax, directive::CACHE);
                let key = expression::parse_expression(value).map_err(|e| {
                    CompileError::error(
                        format!("invalid cache key expression: {}", e.message),
                        span_of(&spans, line),
                        line,
                    )
                    .with_identity(identity)
                })?;
                Some(CacheKey::Expression(key))
            }
        };

        trace!(
            identity,
            translated = generated.translated,
            statements = statements.len(),
            "template compiled"
        );
        Ok(Program {
            identity: identity.map(str::to_string),
            statements,
            directives: generated.directives,
            code: generated.code,
            cache,
        })
    }

    /// Produce the host code for `source` without parsing it.
    pub fn generate(&self, source: &str, identity: Option<&str>) -> Result<Generated, CompileError> {
        let (body, offset) = strip_bom(source);
        let classified =
            lines::classify(body, offset, &self.syntax).map_err(|e| e.with_identity(identity))?;
        let intermediate = lines::emit(&classified, &self.syntax);

        if !classified.indent_mode {
            return Ok(Generated {
                code: intermediate,
                directives: classified.directives,
                translated: false,
            });
        }

        let spans = line_spans(body, offset);
        let code = self.dialect.translate(&intermediate, &self.syntax).map_err(|e| {
            CompileError::error(e.message, span_of(&spans, e.line), e.line)
                .with_identity(identity)
                .with_intermediate(intermediate.clone())
        })?;
        Ok(Generated {
            code,
            directives: classified.directives,
            translated: true,
        })
    }
}

fn strip_bom(source: &str) -> (&str, usize) {
    match source.strip_prefix(BOM) {
        Some(rest) => (rest, BOM.len_utf8()),
        None => (source, 0),
    }
}

fn line_spans(body: &str, offset: usize) -> Vec<Range<usize>> {
    let mut spans = Vec::new();
    let mut start = offset;
    for line in body.split('\n') {
        spans.push(start..start + line.len());
        start += line.len() + 1;
    }
    spans
}

/// Byte span of a 1-based line, clamped to the last line.
fn span_of(spans: &[Range<usize>], line: usize) -> Range<usize> {
    spans
        .get(line.saturating_sub(1))
        .or_else(|| spans.last())
        .cloned()
        .unwrap_or(0..0)
}

fn directive_line(body: &str, syntax: &Syntax, key: &str) -> usize {
    lines::classify(body, 0, syntax)
        .ok()
        .and_then(|c| {
            c.directive_lines
                .into_iter()
                .rev()
                .find(|(k, _)| k == key)
                .map(|(_, index)| index + 1)
        })
        .unwrap_or(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::instruction::Instruction;

    fn compile(source: &str) -> Result<Program, CompileError> {
        Compiler::default().compile(source, Some("/t/page.tpl"))
    }

    #[test]
    fn plain_text_compiles_to_prints() {
        let program = compile("hello\nworld").unwrap();
        assert_eq!(program.statements.len(), 2);
        assert!(program.cache.is_none());
    }

    #[test]
    fn bom_is_stripped() {
        let program = compile("\u{feff}--x = 1").unwrap();
        assert!(matches!(program.statements[0], Instruction::Assignment { .. }));
    }

    #[test]
    fn code_errors_point_at_the_template_line() {
        let err = compile("ok\n--x = (1\nmore").unwrap_err();
        assert_eq!(err.line, 3);
        assert!(err.intermediate.is_some());
        assert_eq!(err.identity.as_deref(), Some("/t/page.tpl"));
    }

    #[test]
    fn cache_directive_forms() {
        assert!(matches!(compile("--@(cache)\na").unwrap().cache, Some(CacheKey::Default)));
        assert!(matches!(compile("--@(cache:)\na").unwrap().cache, Some(CacheKey::Default)));
        assert!(matches!(
            compile("--@(cache: param.id)\na").unwrap().cache,
            Some(CacheKey::Expression(_))
        ));
    }

    #[test]
    fn malformed_cache_expression_is_a_compile_error() {
        let err = compile("a\n--@(cache: param.)").unwrap_err();
        assert_eq!(err.line, 2);
    }

    #[test]
    fn invalid_directive_carries_identity() {
        let err = compile("--@(cache 1)\na").unwrap_err();
        assert!(err.to_string().contains("/t/page.tpl:1"));
    }

    #[test]
    fn indent_dialect_translates() {
        let generated = Compiler::default()
            .generate("--@(indent)\n--if true\n  yes\n    #{'a'}", None)
            .unwrap();
        assert!(generated.translated);
        assert!(generated.code.ends_with("; end"));
        assert!(compile("--@(indent)\n--if true\n  yes\n    #{'a'}").is_ok());
    }

    #[test]
    fn dialect_errors_carry_intermediate_source() {
        let err = compile("--@(indent)\n--x = 1\n  --y = 2").unwrap_err();
        assert_eq!(err.line, 2);
        assert!(err.intermediate.unwrap().contains("x = 1"));
    }

    struct Upper;

    impl DialectCompiler for Upper {
        fn translate(&self, source: &str, _syntax: &Syntax) -> Result<String, DialectError> {
            Ok(source.replace("this.print('a\\n')", "this.print('A\\n')"))
        }
    }

    #[test]
    fn custom_dialect_is_used() {
        let generated = Compiler::default()
            .with_dialect(Upper)
            .generate("--@(indent)\na", None)
            .unwrap();
        assert!(generated.code.contains("'A\\n'"));
    }
}
