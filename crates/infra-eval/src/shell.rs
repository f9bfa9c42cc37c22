// Shell Evaluator
// ExpressionEvaluator implementation that runs the expression source
// as a shell command. The value of an expression is its exit status;
// namespace bindings are exported as environment variables so captured
// variables are visible to later commands.

use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use testrig_core::port::{EvalError, ExpressionEvaluator, Namespace, Value};

pub struct ShellEvaluator;

fn env_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl ExpressionEvaluator for ShellEvaluator {
    async fn evaluate(&mut self, source: &str, ns: &mut Namespace) -> Result<Value, EvalError> {
        let mut cmd = tokio::process::Command::new("sh");
        cmd.arg("-c").arg(source);
        for (name, value) in ns.iter() {
            cmd.env(name, env_string(value));
        }

        let output = cmd
            .output()
            .await
            .map_err(|e| EvalError::Unavailable(format!("cannot run sh: {e}")))?;

        match output.status.code() {
            Some(code) => {
                debug!(command = %source, code, "Shell expression evaluated");
                Ok(json!(code))
            }
            None => Err(EvalError::Raised(format!(
                "command terminated by signal: {source}"
            ))),
        }
    }
}
