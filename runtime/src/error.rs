use std::fmt;

use strata::CompileError;

#[derive(Debug, Clone)]
pub enum RuntimeError {
    TypeError { expected: String, got: String },
    UndefinedVariable(String),
    UnknownMethod { target: String, method: String },
    NotCallable(String),
    DivisionByZero,
    StackOverflow,
    /// A programming mistake at a call site: a block without a name, a
    /// second `extend`, an `async` call without a callback.
    Usage(String),
    Custom(String),
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuntimeError::TypeError { expected, got } => {
                write!(f, "type error: expected {}, got {}", expected, got)
            }
            RuntimeError::UndefinedVariable(name) => write!(f, "undefined variable: {}", name),
            RuntimeError::UnknownMethod { target, method } => {
                write!(f, "unknown method '{}' on {}", method, target)
            }
            RuntimeError::NotCallable(what) => write!(f, "{} is not callable", what),
            RuntimeError::DivisionByZero => write!(f, "division by zero"),
            RuntimeError::StackOverflow => write!(f, "stack overflow"),
            RuntimeError::Usage(msg) => write!(f, "usage error: {}", msg),
            RuntimeError::Custom(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for RuntimeError {}

/// A runtime error enriched with the template line it was raised on.
#[derive(Debug, Clone)]
pub struct DiagnosticError {
    pub error: RuntimeError,
    pub identity: Option<String>,
    /// 1-based template line.
    pub line: Option<usize>,
}

impl DiagnosticError {
    pub fn at(mut self, identity: Option<&str>, line: usize) -> Self {
        if self.line.is_none() {
            self.line = Some(line);
            self.identity = identity.map(str::to_string);
        }
        self
    }
}

impl From<RuntimeError> for DiagnosticError {
    fn from(error: RuntimeError) -> Self {
        DiagnosticError {
            error,
            identity: None,
            line: None,
        }
    }
}

impl fmt::Display for DiagnosticError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.error.fmt(f)?;
        if let Some(line) = self.line {
            write!(
                f,
                " at {}:{}",
                self.identity.as_deref().unwrap_or("<anonymous>"),
                line
            )?;
        }
        Ok(())
    }
}

impl std::error::Error for DiagnosticError {}

/// How evaluation leaves a statement early.
#[derive(Debug, Clone)]
pub enum Control {
    Error(DiagnosticError),
    /// `this.abort()`: unwinds to the render driver. Not an error.
    Abort,
}

impl From<RuntimeError> for Control {
    fn from(error: RuntimeError) -> Self {
        Control::Error(error.into())
    }
}

impl From<DiagnosticError> for Control {
    fn from(error: DiagnosticError) -> Self {
        Control::Error(error)
    }
}

/// The error a render callback receives.
#[derive(Debug, Clone)]
pub enum RenderError {
    Compile(CompileError),
    Read { identity: String, message: String },
    Runtime(DiagnosticError),
    Usage(String),
    /// Raised by host code, usually an async function reporting failure.
    Custom(String),
    /// Several errors collected from async callbacks, in arrival order.
    Many(Vec<RenderError>),
}

impl RenderError {
    /// Collapse a list the way completion callbacks report it: nothing, the
    /// single error, or all of them.
    pub fn aggregate(mut errors: Vec<RenderError>) -> Option<RenderError> {
        match errors.len() {
            0 => None,
            1 => errors.pop(),
            _ => Some(RenderError::Many(errors)),
        }
    }

    /// Number of individual errors.
    pub fn len(&self) -> usize {
        match self {
            RenderError::Many(errors) => errors.iter().map(RenderError::len).sum(),
            _ => 1,
        }
    }

    /// Individual errors, with aggregates flattened.
    pub fn flatten(self) -> Vec<RenderError> {
        match self {
            RenderError::Many(errors) => errors.into_iter().flat_map(RenderError::flatten).collect(),
            other => vec![other],
        }
    }
}

impl From<DiagnosticError> for RenderError {
    fn from(error: DiagnosticError) -> Self {
        match error.error {
            RuntimeError::Usage(_) if error.line.is_none() => RenderError::Usage(error.to_string()),
            _ => RenderError::Runtime(error),
        }
    }
}

impl From<CompileError> for RenderError {
    fn from(error: CompileError) -> Self {
        RenderError::Compile(error)
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RenderError::Compile(e) => write!(f, "compile error: {}", e),
            RenderError::Read { identity, message } => {
                write!(f, "cannot read '{}': {}", identity, message)
            }
            RenderError::Runtime(e) => write!(f, "{}", e),
            RenderError::Usage(msg) => write!(f, "{}", msg),
            RenderError::Custom(msg) => write!(f, "{}", msg),
            RenderError::Many(errors) => {
                write!(f, "{} errors: ", errors.len())?;
                for (i, e) in errors.iter().enumerate() {
                    if i > 0 {
                        write!(f, "; ")?;
                    }
                    write!(f, "{}", e)?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for RenderError {}
