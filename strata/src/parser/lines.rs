//! Two-pass line processing: classify every template line, then emit one
//! host code line per template line.

use crate::directive::Directives;
use crate::parser::error::CompileError;
use crate::parser::text;
use crate::syntax::Syntax;

#[derive(Debug, PartialEq)]
pub(crate) enum LineKind {
    /// A bare line marker: enters or leaves a code block.
    Toggle,
    Directive,
    /// Marker line. `indent` is the whitespace before the marker, `body` all after it.
    Code { indent: String, body: String },
    /// A line inside a code block, kept verbatim.
    Verbatim(String),
    /// Output text, with one escaping backslash already removed.
    Text(String),
}

/// Source position of a template line.
#[derive(Debug, Clone)]
pub(crate) struct LineInfo {
    pub start: usize,
    pub end: usize,
}

#[derive(Debug)]
pub(crate) struct Classified {
    pub lines: Vec<(LineKind, LineInfo)>,
    pub directives: Directives,
    /// Line index of each directive, for error reporting.
    pub directive_lines: Vec<(String, usize)>,
    pub indent_mode: bool,
}

/// First pass. `offset` is the byte position of `source` within the
/// original text (non-zero when a byte-order mark was stripped).
pub(crate) fn classify(source: &str, offset: usize, syntax: &Syntax) -> Result<Classified, CompileError> {
    let mut lines = Vec::new();
    let mut directives = Directives::new();
    let mut directive_lines = Vec::new();
    let mut indent_mode = false;
    let mut in_code_block = false;

    let mut start = 0;
    let mut raw_lines: Vec<&str> = source.split('\n').collect();
    // The empty remainder after a final terminator is not a line.
    if raw_lines.len() > 1 && raw_lines.last().is_some_and(|l| l.is_empty()) {
        raw_lines.pop();
    }

    for (index, raw) in raw_lines.into_iter().enumerate() {
        let info = LineInfo {
            start: offset + start,
            end: offset + start + raw.len(),
        };
        start += raw.len() + 1;

        let kind = match split_marker(raw, &syntax.line_marker) {
            Some(marker) if marker.backslashes > 0 => {
                // `\--` is text: drop the backslash right before the marker.
                let mut unescaped = String::with_capacity(raw.len());
                unescaped.push_str(&raw[..marker.marker_at - 1]);
                unescaped.push_str(&raw[marker.marker_at..]);
                if in_code_block {
                    LineKind::Verbatim(unescaped)
                } else {
                    LineKind::Text(unescaped)
                }
            }
            Some(marker) => {
                let remainder = marker.remainder;
                let content = remainder.trim();
                if content.is_empty() {
                    in_code_block = !in_code_block;
                    LineKind::Toggle
                } else {
                    in_code_block = false;
                    match parse_directive(content, syntax.directive_char) {
                        Some(Ok((key, value))) => {
                            if key == syntax.indent_directive {
                                indent_mode = true;
                            }
                            directive_lines.push((key.clone(), index));
                            directives.insert(key, value);
                            LineKind::Directive
                        }
                        Some(Err(())) => {
                            return Err(CompileError::error(
                                format!("invalid directive: {}", content),
                                info.start..info.end,
                                index + 1,
                            )
                            .with_note("expected `@(key)` or `@(key: value)`"));
                        }
                        None => LineKind::Code {
                            indent: marker.indent.to_string(),
                            body: remainder.to_string(),
                        },
                    }
                }
            }
            None if in_code_block => LineKind::Verbatim(raw.to_string()),
            None => LineKind::Text(raw.to_string()),
        };
        lines.push((kind, info));
    }

    Ok(Classified {
        lines,
        directives,
        directive_lines,
        indent_mode,
    })
}

struct Marker<'a> {
    indent: &'a str,
    backslashes: usize,
    marker_at: usize,
    remainder: &'a str,
}

/// Match `^(\s*)(\\*)<marker>(.*)$`.
fn split_marker<'a>(line: &'a str, marker: &str) -> Option<Marker<'a>> {
    if marker.is_empty() {
        return None;
    }
    let rest = line.trim_start();
    let indent = &line[..line.len() - rest.len()];
    let unslashed = rest.trim_start_matches('\\');
    let backslashes = rest.len() - unslashed.len();
    let remainder = unslashed.strip_prefix(marker)?;
    Some(Marker {
        indent,
        backslashes,
        marker_at: indent.len() + backslashes,
        remainder,
    })
}

/// `Some(Ok(..))` for a directive, `Some(Err(()))` for a malformed one and
/// `None` when the content is ordinary code.
fn parse_directive(content: &str, directive_char: char) -> Option<Result<(String, String), ()>> {
    let inner = content.strip_prefix(directive_char)?.trim();
    let inner = inner.strip_prefix('(')?.strip_suffix(')')?.trim_start();

    let key_len = inner
        .find(|c: char| !(c.is_alphanumeric() || c == '_'))
        .unwrap_or(inner.len());
    if key_len == 0 {
        return Some(Err(()));
    }
    let (key, rest) = inner.split_at(key_len);
    let rest = rest.trim_start();
    if rest.is_empty() {
        return Some(Ok((key.to_string(), String::new())));
    }
    match rest.strip_prefix(':') {
        Some(value) => Some(Ok((key.to_string(), value.trim().to_string()))),
        None => Some(Err(())),
    }
}

/// Second pass: one host line per template line.
pub(crate) fn emit(classified: &Classified, syntax: &Syntax) -> String {
    let indent_mode = classified.indent_mode;
    let mut out: Vec<String> = Vec::with_capacity(classified.lines.len());
    // Indentation of the first line of the current text run.
    let mut run_indent: Option<usize> = None;
    let mut last_text: Option<usize> = None;
    // Host line and indentation of the code line right before a text run.
    let mut last_code: Option<(usize, usize)> = None;

    for (kind, _) in &classified.lines {
        match kind {
            LineKind::Toggle | LineKind::Directive => {
                out.push(String::new());
                run_indent = None;
            }
            LineKind::Code { indent, body } => {
                let code = format!("{}{}", indent, body);
                let code_indent = leading_whitespace(&code);
                if indent_mode
                    && let (Some(run), Some(text_line)) = (run_indent, last_text)
                    && code_indent > run
                {
                    mark_scope(&mut out[text_line], syntax);
                }
                out.push(code);
                last_code = Some((out.len() - 1, code_indent));
                run_indent = None;
            }
            LineKind::Verbatim(code) => {
                out.push(code.clone());
                last_code = Some((out.len() - 1, leading_whitespace(code)));
            }
            LineKind::Text(line) => {
                if indent_mode && line.trim().is_empty() {
                    out.push(String::new());
                    continue;
                }
                let own = leading_whitespace(line);
                if indent_mode
                    && run_indent.is_none()
                    && let Some((code_line, code_indent)) = last_code
                    && own > code_indent
                {
                    mark_scope(&mut out[code_line], syntax);
                }
                let run = *run_indent.get_or_insert(own);
                let width = own.min(run);
                let prefix: String = line.chars().take(width).collect();
                out.push(format!(
                    "{}{}",
                    prefix,
                    text::print_call(&format!("{}\n", line), syntax)
                ));
                last_text = Some(out.len() - 1);
                last_code = None;
            }
        }
    }

    out.join("\n")
}

fn mark_scope(line: &mut String, syntax: &Syntax) {
    line.push(' ');
    line.push_str(&syntax.scope_marker);
}

fn leading_whitespace(s: &str) -> usize {
    s.chars().take_while(|c| c.is_whitespace()).count()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<LineKind> {
        classify(source, 0, &Syntax::default())
            .unwrap()
            .lines
            .into_iter()
            .map(|(k, _)| k)
            .collect()
    }

    fn host(source: &str) -> String {
        let syntax = Syntax::default();
        emit(&classify(source, 0, &syntax).unwrap(), &syntax)
    }

    #[test]
    fn classifies_code_and_text() {
        assert_eq!(
            kinds("  -- x = 1\nhello"),
            vec![
                LineKind::Code {
                    indent: "  ".into(),
                    body: " x = 1".into()
                },
                LineKind::Text("hello".into()),
            ]
        );
    }

    #[test]
    fn escaped_marker_drops_one_backslash() {
        assert_eq!(kinds("\\--abc"), vec![LineKind::Text("--abc".into())]);
        assert_eq!(kinds("\\\\--abc"), vec![LineKind::Text("\\--abc".into())]);
    }

    #[test]
    fn bare_marker_toggles_code_block() {
        assert_eq!(
            kinds("--\nx = 1\n--\ntext"),
            vec![
                LineKind::Toggle,
                LineKind::Verbatim("x = 1".into()),
                LineKind::Toggle,
                LineKind::Text("text".into()),
            ]
        );
    }

    #[test]
    fn code_with_content_ends_code_block() {
        assert_eq!(
            kinds("--\na\n--b\nc")[3],
            LineKind::Text("c".into())
        );
    }

    #[test]
    fn directives_are_recorded() {
        let classified = classify("--@(cache: param.id)\n--@(indent)", 0, &Syntax::default()).unwrap();
        assert_eq!(classified.directives.get("cache"), Some("param.id"));
        assert_eq!(classified.directives.get("indent"), Some(""));
        assert!(classified.indent_mode);
    }

    #[test]
    fn malformed_directive_fails() {
        let err = classify("a\n--@(cache 1)", 0, &Syntax::default()).unwrap_err();
        assert_eq!(err.line, 2);
        assert_eq!(err.span, 2..14);
    }

    #[test]
    fn trailing_terminator_is_not_a_line() {
        assert_eq!(kinds("a\n").len(), 1);
        assert_eq!(kinds("a\n\n").len(), 2);
    }

    #[test]
    fn one_host_line_per_template_line() {
        assert_eq!(host("a\n--x = 1\n--@(cache)\nb").lines().count(), 4);
    }

    #[test]
    fn indent_mode_marks_scopes() {
        let code = host("--@(indent)\n--this.print('x')\n  text\n--y = 1\n  more");
        let lines: Vec<&str> = code.lines().collect();
        assert_eq!(lines[1], "this.print('x') do");
        assert_eq!(lines[3], "y = 1 do");
        assert!(lines[2].starts_with("  this.print("));
    }

    #[test]
    fn indent_mode_caps_text_indentation_to_run_start() {
        let code = host("--@(indent)\n--if true\n  yes\n    #{'a'}");
        let lines: Vec<&str> = code.lines().collect();
        assert_eq!(lines[1], "if true do");
        assert!(lines[3].starts_with("  this.print('    '"));
    }
}
