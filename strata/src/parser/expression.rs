use std::rc::Rc;

use crate::instruction::Instruction;
use crate::instruction::value::{BinaryOperator, FunctionBody, UnaryOperator, Value};
use crate::parser::lexer::{self, Spanned, Token};

/// A parse failure located on a line of the generated host code.
#[derive(Debug)]
pub struct SyntaxError {
    pub message: String,
    pub line: usize,
}

/// Parse generated host code into statements.
pub fn parse_program(code: &str) -> Result<Vec<Instruction>, SyntaxError> {
    let tokens = tokenize(code)?;
    let mut parser = ExprParser::new(tokens);
    let body = parser.parse_statements(&[])?;
    if let Some(token) = parser.peek() {
        return Err(parser.error(format!("unexpected {}", describe(token))));
    }
    Ok(body)
}

/// Parse a standalone expression, as used by directive values.
pub fn parse_expression(code: &str) -> Result<Value, SyntaxError> {
    let tokens = tokenize(code)?;
    let mut parser = ExprParser::new(tokens);
    parser.skip_newlines();
    let value = parser.parse_expr(0)?;
    parser.skip_newlines();
    if let Some(token) = parser.peek() {
        return Err(parser.error(format!("unexpected {} after expression", describe(token))));
    }
    Ok(value)
}

fn tokenize(code: &str) -> Result<Vec<Spanned>, SyntaxError> {
    lexer::tokenize(code).map_err(|e| SyntaxError {
        message: e.message,
        line: e.line,
    })
}

// ---------------------------------------------------------------------------
// Pratt parser
// ---------------------------------------------------------------------------

struct ExprParser {
    tokens: Vec<Spanned>,
    pos: usize,
}

// Binding powers (precedence). Higher = tighter binding.
// Left bp, right bp. For left-assoc: right = left + 1. For right-assoc: right = left.
const BP_CONDITIONAL: u8 = 2; // ? :
const BP_OR: u8 = 4; // ||
const BP_AND: u8 = 6; // &&
const BP_EQUALITY: u8 = 8; // == !=
const BP_COMPARISON: u8 = 10; // < > <= >=
const BP_ADDITIVE: u8 = 12; // + -
const BP_MULTIPLICATIVE: u8 = 14; // * / %
const BP_UNARY: u8 = 16; // ! -
const BP_POSTFIX: u8 = 18; // . [] ()

fn infix_bp(token: &Token) -> Option<(u8, u8)> {
    match token {
        Token::Question => Some((BP_CONDITIONAL, BP_CONDITIONAL)),
        Token::PipePipe => Some((BP_OR, BP_OR + 1)),
        Token::AmpAmp => Some((BP_AND, BP_AND + 1)),
        Token::EqEq | Token::BangEq => Some((BP_EQUALITY, BP_EQUALITY + 1)),
        Token::Lt | Token::Gt | Token::LtEq | Token::GtEq => {
            Some((BP_COMPARISON, BP_COMPARISON + 1))
        }
        Token::Plus | Token::Minus => Some((BP_ADDITIVE, BP_ADDITIVE + 1)),
        Token::Star | Token::Slash | Token::Percent => {
            Some((BP_MULTIPLICATIVE, BP_MULTIPLICATIVE + 1))
        }
        Token::Dot | Token::LParen | Token::LBracket => Some((BP_POSTFIX, BP_POSTFIX + 1)),
        _ => None,
    }
}

fn binary_operator(token: &Token) -> Option<BinaryOperator> {
    Some(match token {
        Token::Plus => BinaryOperator::Addition,
        Token::Minus => BinaryOperator::Subtraction,
        Token::Star => BinaryOperator::Multiplication,
        Token::Slash => BinaryOperator::Division,
        Token::Percent => BinaryOperator::Modulo,
        Token::EqEq => BinaryOperator::Equality,
        Token::BangEq => BinaryOperator::Inequality,
        Token::Gt => BinaryOperator::GreaterThan,
        Token::Lt => BinaryOperator::LessThan,
        Token::GtEq => BinaryOperator::GreaterThanOrEqual,
        Token::LtEq => BinaryOperator::LessThanOrEqual,
        Token::AmpAmp => BinaryOperator::LogicalAnd,
        Token::PipePipe => BinaryOperator::LogicalOr,
        _ => return None,
    })
}

fn describe(token: &Token) -> String {
    match token {
        Token::Newline => "end of line".to_string(),
        Token::Ident(name) => format!("identifier '{}'", name),
        Token::StringLit(s) => format!("string \"{}\"", s),
        Token::Number(n) => format!("number {}", n),
        other => format!("{:?}", other).to_lowercase(),
    }
}

impl ExprParser {
    fn new(tokens: Vec<Spanned>) -> Self {
        ExprParser { tokens, pos: 0 }
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.pos + offset).map(|t| &t.token)
    }

    fn line(&self) -> usize {
        self.tokens
            .get(self.pos)
            .or_else(|| self.tokens.last())
            .map(|t| t.line)
            .unwrap_or(1)
    }

    fn advance(&mut self) -> Option<Token> {
        let t = self.tokens.get(self.pos).map(|t| t.token.clone());
        if t.is_some() {
            self.pos += 1;
        }
        t
    }

    fn at_end(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn error(&self, msg: impl Into<String>) -> SyntaxError {
        SyntaxError {
            message: msg.into(),
            line: self.line(),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), SyntaxError> {
        match self.peek() {
            Some(t) if *t == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(t) => Err(self.error(format!(
                "expected {}, found {}",
                describe(&expected),
                describe(t)
            ))),
            None => Err(self.error(format!(
                "expected {}, found end of input",
                describe(&expected)
            ))),
        }
    }

    fn expect_ident(&mut self) -> Result<String, SyntaxError> {
        match self.peek() {
            Some(Token::Ident(_)) => match self.advance() {
                Some(Token::Ident(name)) => Ok(name),
                _ => unreachable!(),
            },
            _ => Err(self.error("expected identifier")),
        }
    }

    fn skip_newlines(&mut self) {
        while matches!(self.peek(), Some(Token::Newline)) {
            self.pos += 1;
        }
    }

    fn skip_separators(&mut self) {
        while matches!(self.peek(), Some(Token::Newline | Token::Semicolon)) {
            self.pos += 1;
        }
    }

    // ------------------------------------------------------------------
    // Statements
    // ------------------------------------------------------------------

    /// Parse statements until end of input or one of `terminators` is next.
    /// The terminator is left in place.
    fn parse_statements(&mut self, terminators: &[Token]) -> Result<Vec<Instruction>, SyntaxError> {
        let mut body = Vec::new();
        loop {
            self.skip_separators();
            match self.peek() {
                None => break,
                Some(t) if terminators.contains(t) => break,
                Some(Token::End | Token::Elif | Token::Else) => {
                    let token = self.peek().cloned().unwrap_or(Token::End);
                    return Err(self.error(format!("unexpected '{}'", keyword(&token))));
                }
                _ => {}
            }
            body.push(self.parse_statement()?);
            match self.peek() {
                None | Some(Token::Newline | Token::Semicolon) => {}
                Some(t) if terminators.contains(t) => {}
                Some(t) => {
                    return Err(self.error(format!("unexpected {} after statement", describe(t))));
                }
            }
        }
        Ok(body)
    }

    fn parse_statement(&mut self) -> Result<Instruction, SyntaxError> {
        let line = self.line();
        match self.peek() {
            Some(Token::If) => self.parse_conditional(),
            Some(Token::For) => self.parse_loop(),
            Some(Token::Do) => {
                self.advance();
                let body = self.parse_statements(&[Token::End])?;
                self.expect(Token::End)?;
                Ok(Instruction::Scope { body, line })
            }
            Some(Token::Ident(_)) if self.peek_at(1) == Some(&Token::Eq) => {
                let variable = self.expect_ident()?;
                self.expect(Token::Eq)?;
                let value = self.parse_expr(0)?;
                Ok(Instruction::Assignment {
                    variable,
                    value,
                    line,
                })
            }
            _ => {
                let value = self.parse_expr(0)?;
                Ok(Instruction::Expression { value, line })
            }
        }
    }

    fn parse_conditional(&mut self) -> Result<Instruction, SyntaxError> {
        let line = self.line();
        self.expect(Token::If)?;
        let mut branches = Vec::new();
        let mut otherwise = None;
        let terminators = [Token::Elif, Token::Else, Token::End];

        let condition = self.parse_expr(0)?;
        let body = self.parse_statements(&terminators)?;
        branches.push((condition, body));

        loop {
            match self.advance() {
                Some(Token::Elif) => {
                    let condition = self.parse_expr(0)?;
                    let body = self.parse_statements(&terminators)?;
                    branches.push((condition, body));
                }
                Some(Token::Else) => {
                    otherwise = Some(self.parse_statements(&[Token::End])?);
                    self.expect(Token::End)?;
                    break;
                }
                Some(Token::End) => break,
                _ => return Err(self.error("unterminated 'if': expected 'end'")),
            }
        }

        Ok(Instruction::Conditional {
            branches,
            otherwise,
            line,
        })
    }

    fn parse_loop(&mut self) -> Result<Instruction, SyntaxError> {
        let line = self.line();
        self.expect(Token::For)?;
        let first = self.expect_ident()?;
        let (key, item) = if self.peek() == Some(&Token::Comma) {
            self.advance();
            (Some(first), self.expect_ident()?)
        } else {
            (None, first)
        };
        self.expect(Token::In)?;
        let iterable = self.parse_expr(0)?;
        let body = self.parse_statements(&[Token::End])?;
        if self.at_end() {
            return Err(self.error("unterminated 'for': expected 'end'"));
        }
        self.expect(Token::End)?;
        Ok(Instruction::Loop {
            key,
            item,
            iterable,
            body,
            line,
        })
    }

    // ------------------------------------------------------------------
    // Pratt parser core
    // ------------------------------------------------------------------

    fn parse_expr(&mut self, min_bp: u8) -> Result<Value, SyntaxError> {
        let mut left = self.parse_prefix()?;

        loop {
            let Some(token) = self.peek().cloned() else { break };
            let Some((l_bp, r_bp)) = infix_bp(&token) else { break };
            if l_bp < min_bp {
                break;
            }
            self.advance();

            left = match token {
                // Special case: conditional operator (?)
                Token::Question => {
                    let true_branch = self.parse_expr(0)?;
                    self.skip_newlines();
                    self.expect(Token::Colon)?;
                    let false_branch = self.parse_expr(r_bp)?;
                    Value::Conditional {
                        condition: Box::new(left),
                        true_branch: Box::new(true_branch),
                        false_branch: Box::new(false_branch),
                    }
                }
                Token::Dot => {
                    let property = match self.advance() {
                        Some(Token::Ident(name)) => name,
                        Some(Token::Number(n)) if n.fract() == 0.0 => format!("{}", n as i64),
                        // Keywords are valid property names: `this.end()`.
                        Some(t) if !keyword(&t).is_empty() => keyword(&t).to_string(),
                        _ => return Err(self.error("expected property name after '.'")),
                    };
                    Value::Member {
                        object: Box::new(left),
                        property,
                    }
                }
                Token::LBracket => {
                    self.skip_newlines();
                    let index = self.parse_expr(0)?;
                    self.skip_newlines();
                    self.expect(Token::RBracket)?;
                    Value::Index {
                        object: Box::new(left),
                        index: Box::new(index),
                    }
                }
                Token::LParen => {
                    let arguments = self.parse_list(Token::RParen)?;
                    Value::Call {
                        callee: Box::new(left),
                        arguments,
                    }
                }
                op => {
                    let operator = binary_operator(&op)
                        .ok_or_else(|| self.error("unexpected infix operator"))?;
                    self.skip_newlines();
                    let right = self.parse_expr(r_bp)?;
                    Value::BinaryOperation {
                        operator,
                        left: Box::new(left),
                        right: Box::new(right),
                    }
                }
            };
        }

        Ok(left)
    }

    fn parse_prefix(&mut self) -> Result<Value, SyntaxError> {
        let line = self.line();
        let token = self
            .advance()
            .ok_or_else(|| self.error("unexpected end of expression"))?;
        match token {
            // Literals
            Token::Number(n) => Ok(Value::NumberLiteral(n)),
            Token::StringLit(s) => Ok(Value::StringLiteral(s)),
            Token::True => Ok(Value::BooleanLiteral(true)),
            Token::False => Ok(Value::BooleanLiteral(false)),
            Token::Null => Ok(Value::NullLiteral),

            // References
            Token::Ident(name) if name == "this" => Ok(Value::This),
            Token::Ident(name) => Ok(Value::VariableReference(name)),

            // Unary operators
            Token::Bang => {
                let operand = self.parse_expr(BP_UNARY)?;
                Ok(Value::UnaryOperation {
                    operator: UnaryOperator::LogicalNot,
                    operand: Box::new(operand),
                })
            }
            Token::Minus => {
                let operand = self.parse_expr(BP_UNARY)?;
                Ok(Value::UnaryOperation {
                    operator: UnaryOperator::Negation,
                    operand: Box::new(operand),
                })
            }

            // Parenthesized expression
            Token::LParen => {
                self.skip_newlines();
                let expr = self.parse_expr(0)?;
                self.skip_newlines();
                self.expect(Token::RParen)?;
                Ok(expr)
            }

            Token::LBracket => Ok(Value::ArrayLiteral(self.parse_list(Token::RBracket)?)),
            Token::LBrace => self.parse_object(),

            Token::Fn => {
                self.expect(Token::LParen)?;
                let mut params = Vec::new();
                self.skip_newlines();
                while self.peek() != Some(&Token::RParen) {
                    params.push(self.expect_ident()?);
                    self.skip_newlines();
                    if self.peek() == Some(&Token::Comma) {
                        self.advance();
                        self.skip_newlines();
                    } else {
                        break;
                    }
                }
                self.expect(Token::RParen)?;
                let body = self.parse_statements(&[Token::End])?;
                if self.at_end() {
                    return Err(SyntaxError {
                        message: "unterminated 'fn': expected 'end'".to_string(),
                        line,
                    });
                }
                self.expect(Token::End)?;
                Ok(Value::Function(Rc::new(FunctionBody { params, body, line })))
            }

            other => Err(SyntaxError {
                message: format!("unexpected {}", describe(&other)),
                line,
            }),
        }
    }

    /// Comma separated expressions up to `close`, newlines allowed between items.
    fn parse_list(&mut self, close: Token) -> Result<Vec<Value>, SyntaxError> {
        let mut items = Vec::new();
        self.skip_newlines();
        while self.peek() != Some(&close) {
            items.push(self.parse_expr(0)?);
            self.skip_newlines();
            if self.peek() == Some(&Token::Comma) {
                self.advance();
                self.skip_newlines();
            } else {
                break;
            }
        }
        self.expect(close)?;
        Ok(items)
    }

    fn parse_object(&mut self) -> Result<Value, SyntaxError> {
        let mut entries = Vec::new();
        self.skip_newlines();
        while self.peek() != Some(&Token::RBrace) {
            let key = match self.advance() {
                Some(Token::Ident(name)) => name,
                Some(Token::StringLit(s)) => s,
                _ => return Err(self.error("expected object key")),
            };
            self.expect(Token::Colon)?;
            self.skip_newlines();
            let value = self.parse_expr(0)?;
            entries.push((key, value));
            self.skip_newlines();
            if self.peek() == Some(&Token::Comma) {
                self.advance();
                self.skip_newlines();
            } else {
                break;
            }
        }
        self.expect(Token::RBrace)?;
        Ok(Value::ObjectLiteral(entries))
    }
}

fn keyword(token: &Token) -> &'static str {
    match token {
        Token::If => "if",
        Token::Elif => "elif",
        Token::Else => "else",
        Token::For => "for",
        Token::In => "in",
        Token::Do => "do",
        Token::End => "end",
        Token::Fn => "fn",
        Token::True => "true",
        Token::False => "false",
        Token::Null => "null",
        _ => "",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn single(code: &str) -> Instruction {
        let mut body = parse_program(code).unwrap();
        assert_eq!(body.len(), 1, "expected one statement in {:?}", code);
        body.remove(0)
    }

    #[test]
    fn precedence_binds_multiplication_tighter() {
        let Instruction::Expression { value, .. } = single("1 + 2 * 3") else {
            panic!("expected expression");
        };
        let Value::BinaryOperation { operator, right, .. } = value else {
            panic!("expected binary operation");
        };
        assert_eq!(operator, BinaryOperator::Addition);
        assert!(matches!(
            *right,
            Value::BinaryOperation {
                operator: BinaryOperator::Multiplication,
                ..
            }
        ));
    }

    #[test]
    fn method_call_on_this() {
        let Instruction::Expression { value, .. } = single("this.print('a', x)") else {
            panic!("expected expression");
        };
        let Value::Call { callee, arguments } = value else {
            panic!("expected call");
        };
        assert_eq!(arguments.len(), 2);
        assert!(matches!(*callee, Value::Member { ref property, .. } if property == "print"));
    }

    #[test]
    fn keyword_property_names() {
        assert!(parse_program("this.end()").is_ok());
    }

    #[test]
    fn if_elif_else_chain() {
        let Instruction::Conditional {
            branches, otherwise, ..
        } = single("if a\nx\nelif b\ny\nelse\nz\nend")
        else {
            panic!("expected conditional");
        };
        assert_eq!(branches.len(), 2);
        assert_eq!(otherwise.map(|o| o.len()), Some(1));
    }

    #[test]
    fn lambda_argument_spans_lines() {
        let Instruction::Expression { value, .. } =
            single("this.async(fetch, 1, fn(err, rows)\nthis.print(rows)\nend)")
        else {
            panic!("expected expression");
        };
        let Value::Call { arguments, .. } = value else {
            panic!("expected call");
        };
        assert!(matches!(&arguments[2], Value::Function(f) if f.params == ["err", "rows"] && f.body.len() == 1));
    }

    #[test]
    fn semicolons_separate_statements() {
        assert_eq!(parse_program("a = 1; b = 2;; c").unwrap().len(), 3);
    }

    #[test]
    fn for_with_key() {
        assert!(matches!(
            single("for i, c in coordinates\nc\nend"),
            Instruction::Loop { key: Some(_), .. }
        ));
    }

    #[test]
    fn stray_end_reports_line() {
        let err = parse_program("a\n\nend").unwrap_err();
        assert_eq!(err.line, 3);
    }

    #[test]
    fn unterminated_if() {
        assert!(parse_program("if x\ny").is_err());
    }

    #[test]
    fn standalone_expression() {
        assert!(matches!(
            parse_expression("param.page + 1").unwrap(),
            Value::BinaryOperation { .. }
        ));
        assert!(parse_expression("1 2").is_err());
    }
}
