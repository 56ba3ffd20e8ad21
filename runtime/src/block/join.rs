use crate::block::{BlockRef, Entry};
use crate::engine::Engine;
use crate::error::Control;
use crate::executor::call_function;
use crate::runtime_value::RuntimeValue;

impl BlockRef {
    /// Concatenate the body depth-first, then apply the indent prefix and
    /// the filter. Not memoized.
    pub fn join(&self, engine: &Engine) -> Result<String, Control> {
        let (body, indent, filter) = {
            let b = self.borrow();
            (b.body.clone(), b.indent.clone(), b.filter.clone())
        };

        let mut content = String::new();
        for entry in &body {
            match entry {
                Entry::Text(text) => content.push_str(text),
                Entry::Block(child) => content.push_str(&child.join(engine)?),
            }
        }

        if let Some(indent) = indent.as_deref() {
            content = indent_lines(&content, indent);
        }

        match filter {
            Some(filter) => {
                let filtered = call_function(
                    engine,
                    &filter,
                    &RuntimeValue::Block(self.clone()),
                    vec![RuntimeValue::String(content)],
                )?;
                Ok(match filtered {
                    RuntimeValue::Null => String::new(),
                    other => other.to_string(),
                })
            }
            None => Ok(content),
        }
    }
}

/// Prefix every line with `indent`; the result always ends with a line terminator.
fn indent_lines(content: &str, indent: &str) -> String {
    let mut out = String::with_capacity(content.len());
    for line in content.split_inclusive('\n') {
        out.push_str(indent);
        out.push_str(line);
    }
    if !out.is_empty() && !out.ends_with('\n') {
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::block::Block;
    use crate::runtime_value::Function;

    #[test]
    fn filter_sees_indented_content() {
        let engine = Engine::new();
        let wrap = Function::native("wrap", |_, _, args| {
            let content = args.into_iter().next().unwrap_or(RuntimeValue::Null);
            Ok(RuntimeValue::String(format!("[{}]", content)))
        });
        let block = BlockRef::new(Block::new(None, Some(wrap), None));
        block.borrow_mut().indent = Some("  ".into());
        block.print(vec!["a\nb".into()]).unwrap();
        assert_eq!(block.join(&engine).unwrap(), "[  a\n  b\n]");
    }

    #[test]
    fn indent_prefixes_each_line() {
        assert_eq!(indent_lines("a\nb\n", "  "), "  a\n  b\n");
        assert_eq!(indent_lines("a\nb", "\t"), "\ta\n\tb\n");
        assert_eq!(indent_lines("", "  "), "");
    }
}
