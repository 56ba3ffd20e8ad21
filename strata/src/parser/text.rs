//! Text line emission: literal runs, embedded expressions and relative links.

use crate::syntax::Syntax;

#[derive(Debug, PartialEq)]
enum Segment {
    Literal(String),
    /// `./` or `../` right after a quote.
    Link(String),
    /// `.../` right after a quote: resolved against the request host.
    AbsoluteLink,
    Expression(String),
    Escaped(String),
}

/// Render one text line (terminator included) as the argument list of a
/// single `this.print(...)` call.
pub(crate) fn print_call(text: &str, syntax: &Syntax) -> String {
    let args: Vec<String> = segments(text, syntax)
        .into_iter()
        .filter_map(|segment| match segment {
            Segment::Literal(s) if s.is_empty() => None,
            Segment::Literal(s) => Some(quote(&s)),
            Segment::Link(rel) => Some(format!("this.linkLocal({})", quote(&rel))),
            Segment::AbsoluteLink => Some("this.linkLocal('./', param.req)".to_string()),
            Segment::Expression(e) if e.trim().is_empty() => None,
            Segment::Expression(e) => Some(format!("({})", e)),
            Segment::Escaped(e) => Some(format!("this.escape({})", e)),
        })
        .collect();
    format!("this.print({})", args.join(", "))
}

/// Quote `s` as a single-quoted host string literal.
pub(crate) fn quote(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 2);
    out.push('\'');
    for c in s.chars() {
        match c {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\r' => out.push_str("\\r"),
            '\n' => out.push_str("\\n"),
            c => out.push(c),
        }
    }
    out.push('\'');
    out
}

fn segments(text: &str, syntax: &Syntax) -> Vec<Segment> {
    let open = syntax.expr_open.as_str();
    let close = syntax.expr_close.as_str();
    let mut out = Vec::new();
    let mut literal = String::new();
    let mut rest = text;

    while let Some((before, content, after)) = find_expression(rest, open, close) {
        if let Some(kept) = before.strip_suffix('\\') {
            // `\#{` is literal text minus one backslash.
            literal.push_str(kept);
            literal.push_str(open);
            literal.push_str(content);
            literal.push_str(close);
        } else {
            literal.push_str(before);
            split_links(&std::mem::take(&mut literal), &mut out);
            match content.strip_prefix(syntax.escape_char) {
                Some(inner) => out.push(Segment::Escaped(inner.to_string())),
                None => out.push(Segment::Expression(content.to_string())),
            }
        }
        rest = after;
    }
    literal.push_str(rest);
    split_links(&literal, &mut out);
    out
}

/// Locate the first `open content close` where `content` spans no line break
/// and no closing marker. Returns (text before, content, text after).
fn find_expression<'a>(text: &'a str, open: &str, close: &str) -> Option<(&'a str, &'a str, &'a str)> {
    if open.is_empty() || close.is_empty() {
        return None;
    }
    let mut from = 0;
    while let Some(rel) = text[from..].find(open) {
        let start = from + rel;
        let body_start = start + open.len();
        let body = &text[body_start..];
        let close_at = body.find(close);
        let newline_at = body.find('\n');
        match (close_at, newline_at) {
            (Some(c), Some(n)) if n < c => {}
            (Some(c), _) => {
                return Some((
                    &text[..start],
                    &body[..c],
                    &body[c + close.len()..],
                ));
            }
            (None, _) => return None,
        }
        from = start + open.chars().next().map_or(1, char::len_utf8);
    }
    None
}

/// Split `./`, `../` and `.../` following a quote out of a literal run.
fn split_links(text: &str, out: &mut Vec<Segment>) {
    let mut rest = text;
    'scan: loop {
        for (i, c) in rest.char_indices() {
            if c != '"' && c != '\'' {
                continue;
            }
            let after = &rest[i + 1..];
            let dots = after.chars().take_while(|&d| d == '.').count();
            if (1..=3).contains(&dots) && after[dots..].starts_with('/') {
                out.push(Segment::Literal(rest[..=i].to_string()));
                if dots == 3 {
                    out.push(Segment::AbsoluteLink);
                } else {
                    out.push(Segment::Link(after[..=dots].to_string()));
                }
                rest = &after[dots + 1..];
                continue 'scan;
            }
        }
        break;
    }
    out.push(Segment::Literal(rest.to_string()));
}
