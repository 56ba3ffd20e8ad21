use std::rc::Rc;

use strata::instruction::Instruction;

use crate::block::BlockRef;
use crate::engine::Engine;
use crate::environment::Environment;
use crate::error::{Control, RuntimeError};
use crate::evaluator::evaluate;
use crate::runtime_value::{Function, RuntimeValue};

/// Run the program of the template `block` belongs to, with `block` as
/// `this` and `params` as the parameter context.
pub fn execute_template(
    engine: &Engine,
    block: &BlockRef,
    params: RuntimeValue,
) -> Result<RuntimeValue, Control> {
    let Some(template) = block.template() else {
        return Ok(RuntimeValue::Null);
    };
    let params = match params {
        RuntimeValue::Null => RuntimeValue::object([]),
        params => params,
    };
    let env = Environment::new(
        params,
        RuntimeValue::Block(block.clone()),
        template.identity().map(Rc::from),
    );
    execute_program(engine, &template.program().statements, &env)
}

/// Execute statements in order. The value of the last one is the result.
pub fn execute_program(
    engine: &Engine,
    statements: &[Instruction],
    env: &Environment,
) -> Result<RuntimeValue, Control> {
    let mut last = RuntimeValue::Null;
    for statement in statements {
        last = execute_statement(engine, statement, env)?;
    }
    Ok(last)
}

fn execute_statement(
    engine: &Engine,
    statement: &Instruction,
    env: &Environment,
) -> Result<RuntimeValue, Control> {
    let result = match statement {
        Instruction::Assignment {
            variable, value, ..
        } => evaluate(engine, value, env, 0).map(|v| {
            env.assign(variable, v);
            RuntimeValue::Null
        }),
        Instruction::Expression { value, .. } => evaluate(engine, value, env, 0),
        Instruction::Conditional {
            branches,
            otherwise,
            ..
        } => execute_conditional(engine, branches, otherwise.as_deref(), env),
        Instruction::Loop {
            key,
            item,
            iterable,
            body,
            ..
        } => execute_loop(engine, key.as_deref(), item, iterable, body, env),
        Instruction::Scope { body, .. } => execute_program(engine, body, &env.nested()),
    };
    result.map_err(|control| match control {
        Control::Error(error) => Control::Error(error.at(env.identity(), statement.line())),
        Control::Abort => Control::Abort,
    })
}

fn execute_conditional(
    engine: &Engine,
    branches: &[(strata::instruction::value::Value, Vec<Instruction>)],
    otherwise: Option<&[Instruction]>,
    env: &Environment,
) -> Result<RuntimeValue, Control> {
    for (condition, body) in branches {
        if evaluate(engine, condition, env, 0)?.is_truthy() {
            return execute_program(engine, body, env);
        }
    }
    match otherwise {
        Some(body) => execute_program(engine, body, env),
        None => Ok(RuntimeValue::Null),
    }
}

/// Arrays give (index, item), objects (key, value), numbers (i, i) for
/// `0..n`. Each iteration gets its own scope.
fn execute_loop(
    engine: &Engine,
    key: Option<&str>,
    item: &str,
    iterable: &strata::instruction::value::Value,
    body: &[Instruction],
    env: &Environment,
) -> Result<RuntimeValue, Control> {
    let pairs: Vec<(RuntimeValue, RuntimeValue)> = match evaluate(engine, iterable, env, 0)? {
        RuntimeValue::Array(items) => items
            .iter()
            .enumerate()
            .map(|(i, v)| (RuntimeValue::Number(i as f64), v.clone()))
            .collect(),
        RuntimeValue::Object(map) => map
            .iter()
            .map(|(k, v)| (RuntimeValue::String(k.clone()), v.clone()))
            .collect(),
        n @ RuntimeValue::Number(_) => (0..n.to_count("loop count")?)
            .map(|i| (RuntimeValue::Number(i as f64), RuntimeValue::Number(i as f64)))
            .collect(),
        RuntimeValue::Null => Vec::new(),
        other => {
            return Err(RuntimeError::TypeError {
                expected: "Array, Object or Number".to_string(),
                got: other.type_name().to_string(),
            }
            .into());
        }
    };

    for (k, v) in pairs {
        let scope = env.nested();
        if let Some(key) = key {
            scope.define(key, k);
        }
        scope.define(item, v);
        execute_program(engine, body, &scope)?;
    }
    Ok(RuntimeValue::Null)
}

/// Call a template or host function. Closures see `this` as the receiver
/// when one is given, and the `this` they were created with otherwise.
pub fn call_function(
    engine: &Engine,
    function: &Function,
    this: &RuntimeValue,
    args: Vec<RuntimeValue>,
) -> Result<RuntimeValue, Control> {
    let _guard = engine.enter_call()?;
    match function {
        Function::Native(native) => native.call(engine, this, args),
        Function::Closure(closure) => {
            let mut env = closure.env.nested();
            if !this.is_null() {
                env.this = this.clone();
            }
            let mut args = args.into_iter();
            for param in &closure.body.params {
                env.define(param, args.next().unwrap_or(RuntimeValue::Null));
            }
            execute_program(engine, &closure.body.body, &env)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use strata::parser::expression::parse_program;

    fn run(source: &str) -> Result<(RuntimeValue, Environment), Control> {
        let engine = Engine::new();
        let program = parse_program(source).unwrap();
        let env = Environment::new(RuntimeValue::Null, RuntimeValue::Null, Some(Rc::from("t.tpl")));
        let value = execute_program(&engine, &program, &env)?;
        Ok((value, env))
    }

    fn var(env: &Environment, name: &str) -> RuntimeValue {
        match env.lookup(name) {
            crate::environment::VariableLookup::Found(v) => v,
            crate::environment::VariableLookup::NotFound => panic!("{} is not bound", name),
        }
    }

    #[test]
    fn loops_over_arrays_objects_and_numbers() {
        let (_, env) = run(
            "total = 0\nfor x in [1, 2, 3]\ntotal = total + x\nend\n\
             keys = ''\nfor k, v in {a: 1, b: 2}\nkeys = keys + k\nend\n\
             count = 0\nfor i in 4\ncount = count + i\nend",
        )
        .unwrap();
        assert_eq!(var(&env, "total"), RuntimeValue::Number(6.0));
        assert_eq!(var(&env, "keys"), RuntimeValue::string("ab"));
        assert_eq!(var(&env, "count"), RuntimeValue::Number(6.0));
    }

    #[test]
    fn huge_numeric_loops_fail() {
        match run("for i in 100000000000000000000\nx = i\nend").unwrap_err() {
            Control::Error(e) => assert!(e.to_string().contains("out of range")),
            Control::Abort => panic!("unexpected abort"),
        }
    }

    #[test]
    fn conditional_chains() {
        let (_, env) = run("x = 5\nif x > 10\ny = 'big'\nelif x > 3\ny = 'mid'\nelse\ny = 'small'\nend").unwrap();
        assert_eq!(var(&env, "y"), RuntimeValue::string("mid"));
    }

    #[test]
    fn closures_capture_their_scope() {
        let (value, _) = run("base = 10\nadd = fn(n) base + n end\nadd(5)").unwrap();
        assert_eq!(value, RuntimeValue::Number(15.0));
    }

    #[test]
    fn errors_carry_the_statement_line() {
        let err = run("a = 1\n\nb = missing + 1").unwrap_err();
        match err {
            Control::Error(e) => {
                assert_eq!(e.line, Some(3));
                assert_eq!(e.identity.as_deref(), Some("t.tpl"));
            }
            Control::Abort => panic!("unexpected abort"),
        }
    }

    #[test]
    fn scope_locals_do_not_leak() {
        let (_, env) = run("do\ninner = 1\nend").unwrap();
        assert!(matches!(
            env.lookup("inner"),
            crate::environment::VariableLookup::NotFound
        ));
    }
}
