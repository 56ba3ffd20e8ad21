pub mod value;

use crate::instruction::value::Value;

/// A single executable statement of the host code.
///
/// `line` is the 1-based template line the statement starts on.
#[derive(Debug, Clone)]
pub enum Instruction {
    /// Variable assignment: `variable = expression`
    Assignment {
        variable: String,
        value: Value,
        line: usize,
    },
    /// Expression evaluation; the value becomes the statement's result.
    Expression { value: Value, line: usize },
    /// `if` / `elif` / `else` chain.
    Conditional {
        branches: Vec<(Value, Vec<Instruction>)>,
        otherwise: Option<Vec<Instruction>>,
        line: usize,
    },
    /// `for item in iterable` or `for key, item in iterable`.
    Loop {
        key: Option<String>,
        item: String,
        iterable: Value,
        body: Vec<Instruction>,
        line: usize,
    },
    /// `do ... end`: a nested scope.
    Scope { body: Vec<Instruction>, line: usize },
}

impl Instruction {
    pub fn line(&self) -> usize {
        match self {
            Instruction::Assignment { line, .. }
            | Instruction::Expression { line, .. }
            | Instruction::Conditional { line, .. }
            | Instruction::Loop { line, .. }
            | Instruction::Scope { line, .. } => *line,
        }
    }
}
