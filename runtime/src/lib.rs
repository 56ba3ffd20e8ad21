pub mod block;
mod builtins;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod environment;
pub mod error;
pub mod evaluator;
pub mod executor;
pub mod loader;
pub mod path;
pub mod reader;
pub mod runtime_value;
pub mod scheduler;
pub mod template;

pub use block::BlockRef;
pub use config::EngineConfig;
pub use coordinator::{AsyncSlot, RunOutcome};
pub use engine::{Engine, EngineBuilder, Rendered, escape_html};
pub use error::{Control, DiagnosticError, RenderError, RuntimeError};
pub use reader::{FileReader, MemoryReader, ResourceReader};
pub use runtime_value::{Function, RuntimeValue};
pub use template::Template;
