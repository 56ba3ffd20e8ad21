use std::rc::Rc;

use strata::instruction::value::{BinaryOperator, UnaryOperator, Value};

use crate::block::methods::call_method;
use crate::engine::Engine;
use crate::environment::{Environment, VariableLookup};
use crate::error::{Control, RuntimeError};
use crate::executor::call_function;
use crate::runtime_value::{Closure, Function, RuntimeValue};

const MAX_DEPTH: usize = 256;

/// Evaluate a Value AST node to produce a RuntimeValue.
pub fn evaluate(
    engine: &Engine,
    value: &Value,
    env: &Environment,
    depth: usize,
) -> Result<RuntimeValue, Control> {
    if depth > MAX_DEPTH {
        return Err(RuntimeError::StackOverflow.into());
    }

    match value {
        // --- Literals ---
        Value::NumberLiteral(n) => Ok(RuntimeValue::Number(*n)),
        Value::StringLiteral(s) => Ok(RuntimeValue::String(s.clone())),
        Value::BooleanLiteral(b) => Ok(RuntimeValue::Boolean(*b)),
        Value::NullLiteral => Ok(RuntimeValue::Null),
        Value::ArrayLiteral(items) => {
            let items = items
                .iter()
                .map(|item| evaluate(engine, item, env, depth + 1))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(RuntimeValue::array(items))
        }
        Value::ObjectLiteral(entries) => {
            let mut map = Vec::with_capacity(entries.len());
            for (key, item) in entries {
                map.push((key.clone(), evaluate(engine, item, env, depth + 1)?));
            }
            Ok(RuntimeValue::object(map))
        }

        // --- References ---
        Value::VariableReference(name) => lookup(engine, env, name),
        Value::This => Ok(env.this.clone()),

        // --- Access ---
        Value::Member { object, property } => {
            let target = evaluate(engine, object, env, depth + 1)?;
            Ok(member(&target, property)?)
        }
        Value::Index { object, index } => {
            let target = evaluate(engine, object, env, depth + 1)?;
            let index = evaluate(engine, index, env, depth + 1)?;
            Ok(index_value(&target, &index)?)
        }
        Value::Call { callee, arguments } => call(engine, callee, arguments, env, depth),

        Value::Function(body) => Ok(RuntimeValue::Function(Function::Closure(Rc::new(
            Closure {
                body: body.clone(),
                env: env.clone(),
            },
        )))),

        // --- Operations ---
        Value::UnaryOperation { operator, operand } => {
            let val = evaluate(engine, operand, env, depth + 1)?;
            match operator {
                UnaryOperator::Negation => Ok(RuntimeValue::Number(-coerce_number(&val)?)),
                UnaryOperator::LogicalNot => Ok(RuntimeValue::Boolean(val.is_falsy())),
            }
        }

        // Short-circuit: the deciding operand is the result.
        Value::BinaryOperation {
            operator: BinaryOperator::LogicalAnd,
            left,
            right,
        } => {
            let l = evaluate(engine, left, env, depth + 1)?;
            if l.is_falsy() {
                Ok(l)
            } else {
                evaluate(engine, right, env, depth + 1)
            }
        }
        Value::BinaryOperation {
            operator: BinaryOperator::LogicalOr,
            left,
            right,
        } => {
            let l = evaluate(engine, left, env, depth + 1)?;
            if l.is_truthy() {
                Ok(l)
            } else {
                evaluate(engine, right, env, depth + 1)
            }
        }
        Value::BinaryOperation {
            operator,
            left,
            right,
        } => {
            let l = evaluate(engine, left, env, depth + 1)?;
            let r = evaluate(engine, right, env, depth + 1)?;
            Ok(eval_binary_op(operator, &l, &r)?)
        }

        Value::Conditional {
            condition,
            true_branch,
            false_branch,
        } => {
            let cond = evaluate(engine, condition, env, depth + 1)?;
            if cond.is_truthy() {
                evaluate(engine, true_branch, env, depth + 1)
            } else {
                evaluate(engine, false_branch, env, depth + 1)
            }
        }
    }
}

/// Locals, then the run parameters, then engine globals.
fn lookup(engine: &Engine, env: &Environment, name: &str) -> Result<RuntimeValue, Control> {
    match env.lookup(name) {
        VariableLookup::Found(value) => Ok(value),
        VariableLookup::NotFound => engine
            .global(name)
            .ok_or_else(|| RuntimeError::UndefinedVariable(name.to_string()).into()),
    }
}

fn member(target: &RuntimeValue, property: &str) -> Result<RuntimeValue, RuntimeError> {
    Ok(match target {
        RuntimeValue::Object(map) => map.get(property).cloned().unwrap_or(RuntimeValue::Null),
        RuntimeValue::Array(items) => match property {
            "length" => RuntimeValue::Number(items.len() as f64),
            _ => property
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i).cloned())
                .unwrap_or(RuntimeValue::Null),
        },
        RuntimeValue::String(s) => match property {
            "length" => RuntimeValue::Number(s.chars().count() as f64),
            _ => property
                .parse::<usize>()
                .ok()
                .and_then(|i| s.chars().nth(i))
                .map(|c| RuntimeValue::String(c.to_string()))
                .unwrap_or(RuntimeValue::Null),
        },
        RuntimeValue::Block(block) => {
            let block = block.clone();
            let method = property.to_string();
            RuntimeValue::Function(Function::native(property, move |engine, _, args| {
                call_method(engine, &block, &method, args)
            }))
        }
        RuntimeValue::Error(error) => match property {
            "message" => RuntimeValue::String(error.to_string()),
            "length" => RuntimeValue::Number(error.len() as f64),
            _ => RuntimeValue::Null,
        },
        RuntimeValue::Null => {
            return Err(RuntimeError::TypeError {
                expected: "Object".to_string(),
                got: format!("Null (reading '{}')", property),
            });
        }
        _ => RuntimeValue::Null,
    })
}

fn index_value(target: &RuntimeValue, index: &RuntimeValue) -> Result<RuntimeValue, RuntimeError> {
    match (target, index) {
        (RuntimeValue::Array(items), RuntimeValue::Number(n)) => Ok(if *n >= 0.0 {
            items.get(*n as usize).cloned().unwrap_or(RuntimeValue::Null)
        } else {
            RuntimeValue::Null
        }),
        (RuntimeValue::Object(map), key) => Ok(map
            .get(&key.to_string())
            .cloned()
            .unwrap_or(RuntimeValue::Null)),
        (RuntimeValue::String(_) | RuntimeValue::Array(_), RuntimeValue::String(property)) => {
            member(target, property)
        }
        (RuntimeValue::String(s), RuntimeValue::Number(n)) if *n >= 0.0 => Ok(s
            .chars()
            .nth(*n as usize)
            .map(|c| RuntimeValue::String(c.to_string()))
            .unwrap_or(RuntimeValue::Null)),
        (RuntimeValue::Null, _) => Err(RuntimeError::TypeError {
            expected: "Array or Object".to_string(),
            got: "Null".to_string(),
        }),
        _ => Ok(RuntimeValue::Null),
    }
}

fn call(
    engine: &Engine,
    callee: &Value,
    arguments: &[Value],
    env: &Environment,
    depth: usize,
) -> Result<RuntimeValue, Control> {
    let evaluate_args = || {
        arguments
            .iter()
            .map(|arg| evaluate(engine, arg, env, depth + 1))
            .collect::<Result<Vec<_>, _>>()
    };

    // Method call: the receiver becomes `this`.
    if let Value::Member { object, property } = callee {
        let target = evaluate(engine, object, env, depth + 1)?;
        let args = evaluate_args()?;
        return match &target {
            RuntimeValue::Block(block) => call_method(engine, block, property, args),
            other => match member(other, property)? {
                RuntimeValue::Function(f) => call_function(engine, &f, other, args),
                RuntimeValue::Null => Err(RuntimeError::UnknownMethod {
                    target: other.type_name().to_string(),
                    method: property.clone(),
                }
                .into()),
                value => Err(RuntimeError::NotCallable(value.type_name().to_string()).into()),
            },
        };
    }

    let function = evaluate(engine, callee, env, depth + 1)?;
    let args = evaluate_args()?;
    match function {
        RuntimeValue::Function(f) => call_function(engine, &f, &RuntimeValue::Null, args),
        other => Err(RuntimeError::NotCallable(other.type_name().to_string()).into()),
    }
}

fn coerce_number(val: &RuntimeValue) -> Result<f64, RuntimeError> {
    match val {
        RuntimeValue::Number(n) => Ok(*n),
        other => Err(RuntimeError::TypeError {
            expected: "Number".to_string(),
            got: other.type_name().to_string(),
        }),
    }
}

fn eval_binary_op(
    op: &BinaryOperator,
    left: &RuntimeValue,
    right: &RuntimeValue,
) -> Result<RuntimeValue, RuntimeError> {
    match op {
        BinaryOperator::Addition => match (left, right) {
            (RuntimeValue::Number(a), RuntimeValue::Number(b)) => {
                Ok(RuntimeValue::Number(a + b))
            }
            (RuntimeValue::String(_), _) | (_, RuntimeValue::String(_)) => {
                Ok(RuntimeValue::String(format!("{}{}", left, right)))
            }
            _ => Err(RuntimeError::TypeError {
                expected: "matching numeric or string types".to_string(),
                got: format!("{} + {}", left.type_name(), right.type_name()),
            }),
        },
        BinaryOperator::Subtraction => numeric_binop(left, right, |a, b| a - b),
        BinaryOperator::Multiplication => numeric_binop(left, right, |a, b| a * b),
        BinaryOperator::Division => {
            let a = coerce_number(left)?;
            let b = coerce_number(right)?;
            if b == 0.0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(RuntimeValue::Number(a / b))
        }
        BinaryOperator::Modulo => {
            let a = coerce_number(left)?;
            let b = coerce_number(right)?;
            if b == 0.0 {
                return Err(RuntimeError::DivisionByZero);
            }
            Ok(RuntimeValue::Number(a % b))
        }
        BinaryOperator::Equality => Ok(RuntimeValue::Boolean(left == right)),
        BinaryOperator::Inequality => Ok(RuntimeValue::Boolean(left != right)),
        BinaryOperator::GreaterThan => compare(left, right, |o| o.is_gt()),
        BinaryOperator::LessThan => compare(left, right, |o| o.is_lt()),
        BinaryOperator::GreaterThanOrEqual => compare(left, right, |o| o.is_ge()),
        BinaryOperator::LessThanOrEqual => compare(left, right, |o| o.is_le()),
        // Short-circuited in `evaluate`.
        BinaryOperator::LogicalAnd => Ok(RuntimeValue::Boolean(left.is_truthy() && right.is_truthy())),
        BinaryOperator::LogicalOr => Ok(RuntimeValue::Boolean(left.is_truthy() || right.is_truthy())),
    }
}

fn numeric_binop(
    left: &RuntimeValue,
    right: &RuntimeValue,
    f: impl Fn(f64, f64) -> f64,
) -> Result<RuntimeValue, RuntimeError> {
    let a = coerce_number(left)?;
    let b = coerce_number(right)?;
    Ok(RuntimeValue::Number(f(a, b)))
}

/// Numbers compare numerically, strings lexically. NaN compares false.
fn compare(
    left: &RuntimeValue,
    right: &RuntimeValue,
    f: impl Fn(std::cmp::Ordering) -> bool,
) -> Result<RuntimeValue, RuntimeError> {
    let ordering = match (left, right) {
        (RuntimeValue::Number(a), RuntimeValue::Number(b)) => a.partial_cmp(b),
        (RuntimeValue::String(a), RuntimeValue::String(b)) => Some(a.cmp(b)),
        _ => {
            return Err(RuntimeError::TypeError {
                expected: "two Numbers or two Strings".to_string(),
                got: format!("{} and {}", left.type_name(), right.type_name()),
            });
        }
    };
    Ok(RuntimeValue::Boolean(ordering.is_some_and(f)))
}
