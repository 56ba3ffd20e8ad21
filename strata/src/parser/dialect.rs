//! The indentation-sensitive code dialect.
//!
//! Under `--@(indent)` blocks are written by indentation instead of `end`.
//! A [`DialectCompiler`] turns that intermediate form into host code with
//! explicit closers. Closers are attached to existing lines, so line numbers
//! in the host code still match the template.

use std::fmt;

use crate::syntax::Syntax;

/// A translation failure on a 1-based line of the intermediate source.
#[derive(Debug, Clone)]
pub struct DialectError {
    pub message: String,
    pub line: usize,
}

impl fmt::Display for DialectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (line {})", self.message, self.line)
    }
}

impl std::error::Error for DialectError {}

/// Translates an alternate code dialect into host code.
pub trait DialectCompiler {
    fn translate(&self, source: &str, syntax: &Syntax) -> Result<String, DialectError>;
}

/// The built-in offside-rule translator.
#[derive(Debug, Default, Clone, Copy)]
pub struct OffsideTranslator;

const HEADERS: [&str; 5] = ["if", "elif", "else", "for", "do"];

struct Frame {
    /// Indentation of the body lines.
    indent: usize,
    /// Text that closes the frame; `None` for the root.
    closer: Option<String>,
    /// Opened by `if`/`elif`, so a following `elif`/`else` continues it.
    conditional: bool,
}

struct Line<'a> {
    indent: usize,
    content: &'a str,
}

impl DialectCompiler for OffsideTranslator {
    fn translate(&self, source: &str, syntax: &Syntax) -> Result<String, DialectError> {
        let lines: Vec<Line> = source
            .split('\n')
            .map(|raw| {
                let content = raw.trim();
                let indent = raw.len() - raw.trim_start().len();
                Line { indent, content }
            })
            .collect();

        let mut out: Vec<String> = Vec::with_capacity(lines.len());
        let mut stack: Vec<Frame> = Vec::new();
        let mut last_code: Option<usize> = None;

        for (i, line) in lines.iter().enumerate() {
            let number = i + 1;
            if line.content.is_empty() {
                out.push(String::new());
                continue;
            }
            let root = stack.first().map(|f| f.indent);
            if root.is_none() {
                stack.push(Frame {
                    indent: line.indent,
                    closer: None,
                    conditional: false,
                });
            }

            // Dedent: close every frame deeper than this line.
            let mut closers: Vec<(String, bool)> = Vec::new();
            while stack.len() > 1 && stack.last().is_some_and(|f| f.indent > line.indent) {
                if let Some(frame) = stack.pop() {
                    closers.push((frame.closer.unwrap_or_default(), frame.conditional));
                }
            }
            let top = stack.len() - 1;
            if line.indent < stack[top].indent {
                if top == 0 {
                    stack[0].indent = line.indent;
                } else {
                    return Err(error("inconsistent dedent", number));
                }
            } else if line.indent > stack[top].indent {
                if top == 0 && last_code.is_none() {
                    stack[0].indent = line.indent;
                } else {
                    return Err(error("unexpected indent", number));
                }
            }

            let (head, marked) = strip_marker(line.content, &syntax.scope_marker);
            let keyword = first_word(head);
            let continues = keyword == "elif" || keyword == "else";
            if continues {
                match closers.pop() {
                    Some((_, true)) => {}
                    _ => {
                        return Err(error(
                            format!("'{}' without a matching 'if'", keyword),
                            number,
                        ));
                    }
                }
            }

            let mut text = String::new();
            for (closer, _) in &closers {
                text.push_str(closer);
                text.push_str("; ");
            }

            let opens = lines[i + 1..]
                .iter()
                .find(|l| !l.content.is_empty())
                .filter(|next| next.indent > line.indent);

            let is_header = HEADERS.contains(&keyword);
            let fn_closer = open_function_closer(head);
            match opens {
                Some(next) => {
                    let (closer, conditional) = if is_header {
                        text.push_str(head);
                        ("end".to_string(), keyword == "if" || keyword == "elif")
                    } else if let Some(closer) = fn_closer {
                        text.push_str(head);
                        (closer, false)
                    } else if marked {
                        text.push_str(head);
                        text.push_str("; do");
                        ("end".to_string(), false)
                    } else {
                        return Err(error(
                            format!(
                                "a line followed by an indented block must end with '{}'",
                                syntax.scope_marker
                            ),
                            number,
                        ));
                    };
                    stack.push(Frame {
                        indent: next.indent,
                        closer: Some(closer),
                        conditional,
                    });
                }
                None if is_header => {
                    return Err(error(
                        format!("expected an indented block after '{}'", keyword),
                        number,
                    ));
                }
                None => {
                    text.push_str(head);
                    if let Some(closer) = fn_closer {
                        text.push(' ');
                        text.push_str(&closer);
                    }
                }
            }

            out.push(text);
            last_code = Some(out.len() - 1);
        }

        // Close whatever is still open on the last line.
        if let Some(last) = last_code {
            while stack.len() > 1 {
                if let Some(Frame {
                    closer: Some(closer),
                    ..
                }) = stack.pop()
                {
                    out[last].push_str("; ");
                    out[last].push_str(&closer);
                }
            }
        }

        Ok(out.join("\n"))
    }
}

fn error(message: impl Into<String>, line: usize) -> DialectError {
    DialectError {
        message: message.into(),
        line,
    }
}

/// Split a trailing scope marker off `content`.
fn strip_marker<'a>(content: &'a str, marker: &str) -> (&'a str, bool) {
    if marker.is_empty() {
        return (content, false);
    }
    if content == marker {
        // A bare `do` is itself a header.
        return (content, false);
    }
    match content.strip_suffix(marker) {
        Some(head) if head.ends_with(|c: char| c.is_whitespace() || c == ')' || c == ';') => {
            (head.trim_end().trim_end_matches(';').trim_end(), true)
        }
        _ => (content, false),
    }
}

fn first_word(content: &str) -> &str {
    let end = content
        .find(|c: char| !(c.is_alphanumeric() || c == '_' || c == '$'))
        .unwrap_or(content.len());
    &content[..end]
}

/// If `head` ends with an unclosed `fn(params)`, the text that closes the
/// function body and every bracket the line left open.
fn open_function_closer(head: &str) -> Option<String> {
    let params_start = head.strip_suffix(')')?.rfind('(')?;
    let before = &head[..params_start];
    let keyword = before.strip_suffix("fn")?;
    if keyword.ends_with(|c: char| c.is_alphanumeric() || c == '_' || c == '$') {
        return None;
    }
    let params = &head[params_start + 1..head.len() - 1];
    if !params
        .chars()
        .all(|c| c.is_alphanumeric() || c == '_' || c == '$' || c == ',' || c.is_whitespace())
    {
        return None;
    }

    let mut closer = "end".to_string();
    for open in unclosed_brackets(keyword).into_iter().rev() {
        closer.push(match open {
            '(' => ')',
            '[' => ']',
            _ => '}',
        });
    }
    Some(closer)
}

/// Brackets left open at the end of `code`, outermost first. String
/// literals are skipped.
fn unclosed_brackets(code: &str) -> Vec<char> {
    let mut stack = Vec::new();
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in code.chars() {
        if let Some(q) = quote {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == q {
                quote = None;
            }
            continue;
        }
        match c {
            '\'' | '"' => quote = Some(c),
            '(' | '[' | '{' => stack.push(c),
            ')' | ']' | '}' => {
                stack.pop();
            }
            _ => {}
        }
    }
    stack
}

#[cfg(test)]
mod tests {
    use super::*;

    fn translate(source: &str) -> Result<String, DialectError> {
        OffsideTranslator.translate(source, &Syntax::default())
    }

    #[test]
    fn header_bodies_are_closed_at_eof() {
        assert_eq!(translate("if x\n  a\n  b").unwrap(), "if x\n  a\n  b; end");
    }

    #[test]
    fn dedent_prefixes_closers() {
        assert_eq!(
            translate("for c in cs\n  if c\n    a\nb").unwrap(),
            "for c in cs\n  if c\n    a\nend; end; b"
        );
    }

    #[test]
    fn else_continues_the_conditional() {
        assert_eq!(
            translate("if x\n  a\nelse\n  b\nc").unwrap(),
            "if x\n  a\nelse\n  b\nend; c"
        );
    }

    #[test]
    fn function_header_closes_open_brackets() {
        assert_eq!(
            translate("this.async(f, 1, fn(err, rows)\n  this.print(rows)\nx").unwrap(),
            "this.async(f, 1, fn(err, rows)\n  this.print(rows)\nend); x"
        );
    }

    #[test]
    fn marker_opens_a_scope() {
        assert_eq!(
            translate("this.print('a') do\n  b").unwrap(),
            "this.print('a'); do\n  b; end"
        );
        // Redundant on headers, dropped when nothing is indented below.
        assert_eq!(translate("if x do\n  a").unwrap(), "if x\n  a; end");
        assert_eq!(translate("this.print('a') do\nb").unwrap(), "this.print('a')\nb");
    }

    #[test]
    fn blank_lines_keep_their_place() {
        assert_eq!(translate("if x\n\n  a").unwrap(), "if x\n\n  a; end");
    }

    #[test]
    fn unmarked_indent_is_an_error() {
        let err = translate("a\n  b").unwrap_err();
        assert_eq!(err.line, 1);
    }

    #[test]
    fn inconsistent_dedent_is_an_error() {
        let err = translate("if x\n  if y\n      a\n    b").unwrap_err();
        assert_eq!(err.line, 4);
    }
}
