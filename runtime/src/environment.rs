use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::runtime_value::RuntimeValue;

/// One level of local bindings: a function call, a loop iteration or a `do` scope.
#[derive(Debug, Default)]
pub struct Scope {
    variables: RefCell<HashMap<String, RuntimeValue>>,
    parent: Option<Rc<Scope>>,
}

impl Scope {
    pub fn child(parent: &Rc<Scope>) -> Rc<Scope> {
        Rc::new(Scope {
            variables: RefCell::new(HashMap::new()),
            parent: Some(parent.clone()),
        })
    }

    fn lookup(&self, name: &str) -> Option<RuntimeValue> {
        if let Some(v) = self.variables.borrow().get(name) {
            return Some(v.clone());
        }
        self.parent.as_ref().and_then(|p| p.lookup(name))
    }

    /// Overwrite the nearest binding of `name`. Returns false when none exists.
    fn assign_existing(&self, name: &str, value: &RuntimeValue) -> bool {
        if let Some(slot) = self.variables.borrow_mut().get_mut(name) {
            *slot = value.clone();
            return true;
        }
        match &self.parent {
            Some(parent) => parent.assign_existing(name, value),
            None => false,
        }
    }

    pub fn define(&self, name: &str, value: RuntimeValue) {
        self.variables.borrow_mut().insert(name.to_string(), value);
    }
}

/// Where identifiers resolve while template code runs: local scopes, then
/// the run parameters, then engine globals.
#[derive(Debug, Clone)]
pub struct Environment {
    scope: Rc<Scope>,
    /// The run parameter object, also reachable as `param`.
    pub params: RuntimeValue,
    /// The receiver Block, `this` in template code.
    pub this: RuntimeValue,
    /// Identity of the template the code belongs to, for error locations.
    pub identity: Option<Rc<str>>,
}

/// Result of resolving an identifier outside the engine globals.
pub enum VariableLookup {
    Found(RuntimeValue),
    NotFound,
}

impl Environment {
    pub fn new(params: RuntimeValue, this: RuntimeValue, identity: Option<Rc<str>>) -> Self {
        Environment {
            scope: Rc::new(Scope::default()),
            params,
            this,
            identity,
        }
    }

    /// A copy of this environment with a fresh innermost scope.
    pub fn nested(&self) -> Self {
        Environment {
            scope: Scope::child(&self.scope),
            params: self.params.clone(),
            this: self.this.clone(),
            identity: self.identity.clone(),
        }
    }

    pub fn lookup(&self, name: &str) -> VariableLookup {
        if let Some(v) = self.scope.lookup(name) {
            return VariableLookup::Found(v);
        }
        if name == "param" {
            return VariableLookup::Found(self.params.clone());
        }
        match self.params.get(name) {
            Some(v) => VariableLookup::Found(v.clone()),
            None => VariableLookup::NotFound,
        }
    }

    /// Assign to the nearest local binding, or create one in the innermost scope.
    pub fn assign(&self, name: &str, value: RuntimeValue) {
        if !self.scope.assign_existing(name, &value) {
            self.scope.define(name, value);
        }
    }

    /// Bind `name` in the innermost scope, shadowing outer bindings.
    pub fn define(&self, name: &str, value: RuntimeValue) {
        self.scope.define(name, value);
    }

    pub fn identity(&self) -> Option<&str> {
        self.identity.as_deref()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_with(params: RuntimeValue) -> Environment {
        Environment::new(params, RuntimeValue::Null, None)
    }

    fn found(env: &Environment, name: &str) -> Option<RuntimeValue> {
        match env.lookup(name) {
            VariableLookup::Found(v) => Some(v),
            VariableLookup::NotFound => None,
        }
    }

    #[test]
    fn locals_shadow_params() {
        let env = env_with(RuntimeValue::object([("x".to_string(), RuntimeValue::Number(1.0))]));
        assert_eq!(found(&env, "x"), Some(RuntimeValue::Number(1.0)));
        env.assign("x", RuntimeValue::Number(2.0));
        assert_eq!(found(&env, "x"), Some(RuntimeValue::Number(2.0)));
        assert!(matches!(found(&env, "param"), Some(RuntimeValue::Object(_))));
    }

    #[test]
    fn assignment_updates_outer_binding() {
        let env = env_with(RuntimeValue::Null);
        env.assign("total", RuntimeValue::Number(0.0));
        let inner = env.nested();
        inner.assign("total", RuntimeValue::Number(5.0));
        inner.assign("temp", RuntimeValue::Boolean(true));
        assert_eq!(found(&env, "total"), Some(RuntimeValue::Number(5.0)));
        assert!(found(&env, "temp").is_none());
    }

    #[test]
    fn define_shadows() {
        let env = env_with(RuntimeValue::Null);
        env.assign("i", RuntimeValue::Number(0.0));
        let inner = env.nested();
        inner.define("i", RuntimeValue::Number(9.0));
        assert_eq!(found(&inner, "i"), Some(RuntimeValue::Number(9.0)));
        assert_eq!(found(&env, "i"), Some(RuntimeValue::Number(0.0)));
    }
}
