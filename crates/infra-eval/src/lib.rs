// Testrig Infra-Eval - expression-based scripting adapter

pub mod evaluator;
pub mod parse;
pub mod shell;

#[cfg(unix)]
pub mod signal_source;

pub use evaluator::{ScriptingEvaluator, ShellFactory};
pub use parse::{CmpOp, OutputTemplate, ParsedInput, TemplateArg};
pub use shell::ShellEvaluator;
