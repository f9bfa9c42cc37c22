// Port Layer - Interfaces for external dependencies

pub mod adapter;
pub mod evaluator;
pub mod event_source;

// Re-exports
pub use adapter::{Adapter, AdapterError};
pub use evaluator::{EvalError, ExpressionEvaluator, Namespace, Value};
pub use event_source::{event_channel, Event, EventReceiver, EventSender};
