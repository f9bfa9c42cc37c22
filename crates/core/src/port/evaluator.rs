// Expression Evaluator Port
// Pluggable capability: the core does not prescribe the expression
// language, only `evaluate(source, namespace) -> value | error`.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

/// Values flowing through expression evaluation and the capture
/// namespace. JSON values cover the literal types the comparison
/// cascade needs (numbers, strings, booleans, arrays).
pub type Value = serde_json::Value;

/// Evaluation errors
#[derive(Error, Debug)]
pub enum EvalError {
    #[error("Evaluation raised: {0}")]
    Raised(String),

    #[error("Syntax error in expression: {0}")]
    Syntax(String),

    #[error("Evaluator unavailable: {0}")]
    Unavailable(String),
}

impl EvalError {
    /// Textual representation matched against `Error(pattern)` actions.
    pub fn text(&self) -> String {
        match self {
            EvalError::Raised(s) | EvalError::Syntax(s) | EvalError::Unavailable(s) => {
                s.clone()
            }
        }
    }
}

/// Persistent evaluation namespace for one evaluator instance.
///
/// Holds captured variables ("store-as" bindings) and assignment
/// results; exclusively owned by one ScriptingEvaluator, passed by
/// reference into every evaluation and listener callback. Lifetime of
/// a binding is the rest of the test run unless overwritten.
#[derive(Debug, Clone, Default)]
pub struct Namespace {
    bindings: HashMap<String, Value>,
}

impl Namespace {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Value> {
        self.bindings.get(name)
    }

    /// Bind `name`, overwriting any previous value.
    pub fn bind(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), value);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

/// Expression evaluator capability.
///
/// Implementations:
/// - ShellEvaluator (infra): runs the source as a shell command
/// - MockEvaluator (tests): scripted values and call counting
#[async_trait]
pub trait ExpressionEvaluator: Send {
    /// Evaluate `source` against live SUT bindings.
    ///
    /// The namespace is read for variable references and may be written
    /// by assignment-style expressions. Side effects of evaluation
    /// happen exactly as often as `evaluate` is called - the caller is
    /// responsible for evaluating shared expressions only once.
    async fn evaluate(&mut self, source: &str, ns: &mut Namespace) -> Result<Value, EvalError>;
}

// ============================================================================
// Mock Implementations for Testing
// ============================================================================

pub mod mocks {
    use super::*;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    /// Scripted evaluator outcome
    #[derive(Debug, Clone)]
    pub enum MockOutcome {
        Ok(Value),
        Err(String),
    }

    /// Shared call-count handle, readable after the mock itself has
    /// been boxed into an adapter (drives the evaluate-exactly-once
    /// tests).
    #[derive(Clone, Default)]
    pub struct MockCallCounts {
        inner: Arc<Mutex<HashMap<String, usize>>>,
    }

    impl MockCallCounts {
        /// How many times `source` was evaluated.
        pub fn of(&self, source: &str) -> usize {
            self.inner
                .lock()
                .map(|m| m.get(source).copied().unwrap_or(0))
                .unwrap_or(0)
        }

        fn bump(&self, source: &str) {
            if let Ok(mut m) = self.inner.lock() {
                *m.entry(source.to_string()).or_insert(0) += 1;
            }
        }
    }

    /// Mock evaluator: maps expression source text to scripted
    /// outcomes and counts calls per source string.
    pub struct MockEvaluator {
        outcomes: HashMap<String, MockOutcome>,
        calls: MockCallCounts,
    }

    impl MockEvaluator {
        pub fn new() -> Self {
            Self {
                outcomes: HashMap::new(),
                calls: MockCallCounts::default(),
            }
        }

        pub fn returns(mut self, source: impl Into<String>, value: Value) -> Self {
            self.outcomes
                .insert(source.into(), MockOutcome::Ok(value));
            self
        }

        pub fn raises(mut self, source: impl Into<String>, msg: impl Into<String>) -> Self {
            self.outcomes
                .insert(source.into(), MockOutcome::Err(msg.into()));
            self
        }

        /// Handle to the call counters; stays valid after the mock is
        /// moved into a boxed adapter.
        pub fn counts(&self) -> MockCallCounts {
            self.calls.clone()
        }

        /// How many times `source` was evaluated.
        pub fn call_count(&self, source: &str) -> usize {
            self.calls.of(source)
        }
    }

    impl Default for MockEvaluator {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl ExpressionEvaluator for MockEvaluator {
        async fn evaluate(
            &mut self,
            source: &str,
            ns: &mut Namespace,
        ) -> Result<Value, EvalError> {
            self.calls.bump(source);

            match self.outcomes.get(source) {
                Some(MockOutcome::Ok(v)) => Ok(v.clone()),
                Some(MockOutcome::Err(msg)) => Err(EvalError::Raised(msg.clone())),
                None => {
                    // Unscripted sources: resolve namespace variables,
                    // then JSON literals, else evaluate to null.
                    if let Some(v) = ns.get(source) {
                        return Ok(v.clone());
                    }
                    Ok(serde_json::from_str(source).unwrap_or(json!(null)))
                }
            }
        }
    }
}
