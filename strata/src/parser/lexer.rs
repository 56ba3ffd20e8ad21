// ---------------------------------------------------------------------------
// Host code tokenizer: generated source → Token stream
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Token {
    // Literals
    Number(f64),
    StringLit(String),
    True,
    False,
    Null,

    Ident(String),

    // Keywords
    If,
    Elif,
    Else,
    For,
    In,
    Do,
    End,
    Fn,

    // Operators
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,       // =
    EqEq,     // ==
    BangEq,   // !=
    Gt,
    Lt,
    GtEq,
    LtEq,
    AmpAmp,   // &&
    PipePipe, // ||
    Bang,     // !
    Question, // ?
    Colon,    // :
    Comma,
    Dot,

    // Grouping
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,

    // Separators
    Semicolon,
    Newline,
}

/// A token with the 1-based line it starts on.
#[derive(Debug, Clone)]
pub(crate) struct Spanned {
    pub token: Token,
    pub line: usize,
}

#[derive(Debug)]
pub(crate) struct LexError {
    pub message: String,
    pub line: usize,
}

pub(crate) fn tokenize(source: &str) -> Result<Vec<Spanned>, LexError> {
    let chars: Vec<char> = source.chars().collect();
    let len = chars.len();
    let mut tokens = Vec::new();
    let mut line = 1;
    let mut i = 0;

    while i < len {
        let c = chars[i];
        let start_line = line;
        let mut push = |token: Token| tokens.push(Spanned { token, line: start_line });
        match c {
            ' ' | '\t' | '\r' => {
                i += 1;
            }
            '\n' => {
                push(Token::Newline);
                line += 1;
                i += 1;
            }
            '"' | '\'' => {
                let quote = c;
                i += 1;
                let mut s = String::new();
                loop {
                    if i >= len || chars[i] == '\n' {
                        return Err(LexError {
                            message: "unterminated string literal".to_string(),
                            line: start_line,
                        });
                    }
                    let ch = chars[i];
                    i += 1;
                    if ch == quote {
                        break;
                    }
                    if ch == '\\' && i < len {
                        let escaped = chars[i];
                        i += 1;
                        s.push(match escaped {
                            'n' => '\n',
                            't' => '\t',
                            'r' => '\r',
                            '0' => '\0',
                            other => other,
                        });
                    } else {
                        s.push(ch);
                    }
                }
                push(Token::StringLit(s));
            }
            '0'..='9' => {
                let start = i;
                while i < len && chars[i].is_ascii_digit() {
                    i += 1;
                }
                // A dot only continues the number when a digit follows (`1.5` vs `xs.0`).
                if i + 1 < len && chars[i] == '.' && chars[i + 1].is_ascii_digit() {
                    i += 1;
                    while i < len && chars[i].is_ascii_digit() {
                        i += 1;
                    }
                }
                let num_str: String = chars[start..i].iter().collect();
                match num_str.parse::<f64>() {
                    Ok(n) => push(Token::Number(n)),
                    Err(_) => {
                        return Err(LexError {
                            message: format!("invalid number literal '{}'", num_str),
                            line: start_line,
                        });
                    }
                }
            }
            'a'..='z' | 'A'..='Z' | '_' | '$' => {
                let start = i;
                while i < len && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$') {
                    i += 1;
                }
                let ident: String = chars[start..i].iter().collect();
                push(match ident.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" => Token::Null,
                    "if" => Token::If,
                    "elif" => Token::Elif,
                    "else" => Token::Else,
                    "for" => Token::For,
                    "in" => Token::In,
                    "do" => Token::Do,
                    "end" => Token::End,
                    "fn" => Token::Fn,
                    _ => Token::Ident(ident),
                });
            }
            _ => {
                let next = chars.get(i + 1).copied();
                let (token, width) = match (c, next) {
                    ('=', Some('=')) => (Token::EqEq, 2),
                    ('!', Some('=')) => (Token::BangEq, 2),
                    ('>', Some('=')) => (Token::GtEq, 2),
                    ('<', Some('=')) => (Token::LtEq, 2),
                    ('&', Some('&')) => (Token::AmpAmp, 2),
                    ('|', Some('|')) => (Token::PipePipe, 2),
                    ('=', _) => (Token::Eq, 1),
                    ('!', _) => (Token::Bang, 1),
                    ('>', _) => (Token::Gt, 1),
                    ('<', _) => (Token::Lt, 1),
                    ('+', _) => (Token::Plus, 1),
                    ('-', _) => (Token::Minus, 1),
                    ('*', _) => (Token::Star, 1),
                    ('/', _) => (Token::Slash, 1),
                    ('%', _) => (Token::Percent, 1),
                    ('?', _) => (Token::Question, 1),
                    (':', _) => (Token::Colon, 1),
                    (',', _) => (Token::Comma, 1),
                    ('.', _) => (Token::Dot, 1),
                    (';', _) => (Token::Semicolon, 1),
                    ('(', _) => (Token::LParen, 1),
                    (')', _) => (Token::RParen, 1),
                    ('[', _) => (Token::LBracket, 1),
                    (']', _) => (Token::RBracket, 1),
                    ('{', _) => (Token::LBrace, 1),
                    ('}', _) => (Token::RBrace, 1),
                    _ => {
                        return Err(LexError {
                            message: format!("unexpected character '{}'", c),
                            line: start_line,
                        });
                    }
                };
                push(token);
                i += width;
            }
        }
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<Token> {
        tokenize(source).unwrap().into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn strings_accept_both_quotes() {
        assert_eq!(
            kinds(r#"'a\'b' "c""#),
            vec![Token::StringLit("a'b".into()), Token::StringLit("c".into())]
        );
    }

    #[test]
    fn member_access_after_number_is_not_a_float() {
        assert_eq!(
            kinds("1.5 xs.0"),
            vec![
                Token::Number(1.5),
                Token::Ident("xs".into()),
                Token::Dot,
                Token::Number(0.0)
            ]
        );
    }

    #[test]
    fn newlines_carry_line_numbers() {
        let tokens = tokenize("a\n\nb").unwrap();
        assert_eq!(tokens.last().unwrap().line, 3);
    }

    #[test]
    fn unterminated_string_is_an_error() {
        let err = tokenize("x = 'abc\ny").unwrap_err();
        assert_eq!(err.line, 1);
    }
}
