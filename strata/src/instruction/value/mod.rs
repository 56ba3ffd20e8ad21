use std::rc::Rc;

use crate::instruction::Instruction;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOperator {
    /// Arithmetic negation: -x
    Negation,
    /// Logical not: !x
    LogicalNot,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOperator {
    Addition,
    Subtraction,
    Multiplication,
    Division,
    Modulo,
    LogicalAnd,
    LogicalOr,
    Equality,
    Inequality,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
}

/// An expression AST node.
#[derive(Debug, Clone)]
pub enum Value {
    // Literals
    StringLiteral(String),
    NumberLiteral(f64),
    BooleanLiteral(bool),
    NullLiteral,
    ArrayLiteral(Vec<Value>),
    ObjectLiteral(Vec<(String, Value)>),

    // References
    VariableReference(String),
    /// The receiver Block of the running template.
    This,

    // Access
    Member {
        object: Box<Value>,
        property: String,
    },
    Index {
        object: Box<Value>,
        index: Box<Value>,
    },
    /// `callee(args)`; a `Member` callee makes this a method call.
    Call {
        callee: Box<Value>,
        arguments: Vec<Value>,
    },

    /// `fn(params) ... end`
    Function(Rc<FunctionBody>),

    // Operations
    UnaryOperation {
        operator: UnaryOperator,
        operand: Box<Value>,
    },
    BinaryOperation {
        operator: BinaryOperator,
        left: Box<Value>,
        right: Box<Value>,
    },

    /// cond ? expr : expr
    Conditional {
        condition: Box<Value>,
        true_branch: Box<Value>,
        false_branch: Box<Value>,
    },
}

/// Parameters and statements of an anonymous function.
#[derive(Debug)]
pub struct FunctionBody {
    pub params: Vec<String>,
    pub body: Vec<Instruction>,
    /// 1-based line of the `fn` keyword.
    pub line: usize,
}
