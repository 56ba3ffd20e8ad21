use serde::Deserialize;

/// The reconfigurable tokens of the template surface.
///
/// Every field has a default, so a partial `[syntax]` table in a config
/// file only overrides what it names.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Syntax {
    /// Marks a code line when it starts a line (after leading whitespace).
    pub line_marker: String,
    /// Introduces a directive right after the line marker: `--@(key: value)`.
    pub directive_char: char,
    /// Opens an embedded expression inside a text line.
    pub expr_open: String,
    /// Closes an embedded expression.
    pub expr_close: String,
    /// First character of an embedded expression that requests escaping.
    pub escape_char: char,
    /// Directive key that selects the indentation-sensitive code dialect.
    pub indent_directive: String,
    /// Trailing word that opens a scope in the indentation-sensitive dialect.
    pub scope_marker: String,
}

impl Default for Syntax {
    fn default() -> Self {
        Syntax {
            line_marker: "--".to_string(),
            directive_char: '@',
            expr_open: "#{".to_string(),
            expr_close: "}".to_string(),
            escape_char: '!',
            indent_directive: "indent".to_string(),
            scope_marker: "do".to_string(),
        }
    }
}
