// Scripting Evaluator - expression-based adapter
//
// Each input action's name is an expression, optionally with a
// top-level comparison. Actions sharing byte-identical left-hand-side
// text form one comparison cascade: the LHS is evaluated exactly once,
// then candidates are matched in declaration order.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use testrig_core::application::{AdapterFactory, AdapterRegistry};
use testrig_core::domain::{ActionCatalog, ActionIndex, UNIDENTIFIED};
use testrig_core::port::{
    event_channel, Adapter, AdapterError, EvalError, Event, EventReceiver, EventSender,
    ExpressionEvaluator, Namespace,
};

use crate::parse::{parse_input, parse_output, CmpOp, OutputTemplate, ParsedInput, TemplateArg};
use crate::shell::ShellEvaluator;

/// Expression-based adapter over a pluggable evaluator.
///
/// Owns the evaluation namespace exclusively; expression evaluation
/// and event matching run on the control thread only (`&mut self`),
/// so listener callbacks can never pre-empt an in-flight evaluation -
/// sources hand events off through the channel instead.
pub struct ScriptingEvaluator {
    catalog: ActionCatalog,
    eval: Box<dyn ExpressionEvaluator>,
    ns: Namespace,
    inputs: HashMap<ActionIndex, ParsedInput>,
    /// LHS source text -> action indices, declaration order.
    groups: HashMap<String, Vec<ActionIndex>>,
    templates: Vec<OutputTemplate>,
    events: EventReceiver,
    pending: VecDeque<ActionIndex>,
}

impl ScriptingEvaluator {
    /// Build the adapter; the returned sender is for event sources
    /// (signal bridges, callbacks) to feed observations through.
    pub fn new(
        catalog: ActionCatalog,
        eval: Box<dyn ExpressionEvaluator>,
    ) -> (Self, EventSender) {
        let mut inputs = HashMap::new();
        let mut groups: HashMap<String, Vec<ActionIndex>> = HashMap::new();
        let mut templates = Vec::new();

        for action in catalog.actions() {
            if action.is_input() {
                let parsed = parse_input(&action.name);
                groups
                    .entry(parsed.lhs.clone())
                    .or_default()
                    .push(action.index);
                inputs.insert(action.index, parsed);
            } else {
                templates.push(parse_output(action.index, &action.name));
            }
        }

        let (tx, rx) = event_channel();
        (
            Self {
                catalog,
                eval,
                ns: Namespace::new(),
                inputs,
                groups,
                templates,
                events: rx,
                pending: VecDeque::new(),
            },
            tx,
        )
    }

    /// Read access to captured variables (tests, diagnostics).
    pub fn namespace(&self) -> &Namespace {
        &self.ns
    }

    /// Find the first declared `lhs == Error(pattern)` action whose
    /// pattern matches the raised error's text.
    fn match_error_action(&self, lhs: &str, err: &EvalError) -> ActionIndex {
        let text = err.text();
        let Some(group) = self.groups.get(lhs) else {
            return UNIDENTIFIED;
        };
        for &candidate in group {
            if let Some(parsed) = self.inputs.get(&candidate) {
                if let Some(re) = &parsed.error_pattern {
                    if re.is_match(&text) {
                        debug!(candidate, error = %text, "Evaluation fault matched Error action");
                        return candidate;
                    }
                }
            }
        }
        warn!(lhs, error = %text, "Unmatched evaluation fault");
        UNIDENTIFIED
    }

    /// Run the comparison cascade for one already-evaluated LHS value.
    async fn run_cascade(
        &mut self,
        lhs: &str,
        lhs_value: Value,
    ) -> Result<ActionIndex, AdapterError> {
        let candidates = self.groups.get(lhs).cloned().unwrap_or_default();

        for candidate in candidates {
            let Some(parsed) = self.inputs.get(&candidate).cloned() else {
                continue;
            };
            let Some((op, rhs)) = parsed.cmp else {
                // A bare action sharing the LHS text is not a cascade
                // candidate.
                continue;
            };
            if parsed.error_pattern.is_some() {
                // Error candidates only match raised faults.
                continue;
            }

            // RHS is a literal or an expression: literals are used
            // as-is, anything else goes through the evaluator.
            let rhs_value = match serde_json::from_str::<Value>(&rhs) {
                Ok(literal) => literal,
                Err(_) => match self.eval.evaluate(&rhs, &mut self.ns).await {
                    Ok(v) => v,
                    Err(e) => {
                        debug!(candidate, rhs = %rhs, error = %e, "RHS evaluation failed; skipping candidate");
                        continue;
                    }
                },
            };

            if compare(op, &lhs_value, &rhs_value) {
                debug!(candidate, op = %op, "Cascade candidate matched");
                return Ok(candidate);
            }
        }
        Ok(UNIDENTIFIED)
    }

    /// Match one event against the declared output templates and queue
    /// the matching action. Templates with only concrete literal
    /// arguments are tried first, then store-as templates, each pass in
    /// declaration order.
    fn match_event(&mut self, event: Event) {
        for placeholder_pass in [false, true] {
            for t in &self.templates {
                if t.has_placeholder() != placeholder_pass {
                    continue;
                }
                if t.name != event.name || t.args.len() != event.args.len() {
                    continue;
                }
                let matches = t
                    .args
                    .iter()
                    .zip(&event.args)
                    .all(|(arg, observed)| match arg {
                        TemplateArg::Literal(expected) => expected == observed,
                        TemplateArg::StoreAs(_) => true,
                    });
                if !matches {
                    continue;
                }

                for (arg, observed) in t.args.iter().zip(&event.args) {
                    if let TemplateArg::StoreAs(name) = arg {
                        debug!(name = %name, value = %observed, "Store-as capture");
                        self.ns.bind(name.clone(), observed.clone());
                    }
                }
                debug!(action = t.index, event = %event.name, "Output action queued");
                self.pending.push_back(t.index);
                return;
            }
        }
        warn!(event = %event.name, "Event matched no output template");
    }

    fn drain_events(&mut self) {
        while let Ok(event) = self.events.try_recv() {
            self.match_event(event);
        }
    }
}

#[async_trait]
impl Adapter for ScriptingEvaluator {
    fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    async fn execute(&mut self, suggested: ActionIndex) -> Result<ActionIndex, AdapterError> {
        // Bind captures from events that already arrived before the
        // command runs; the matched output actions stay queued for the
        // next observe.
        self.drain_events();

        let Some(parsed) = self.inputs.get(&suggested).cloned() else {
            return Ok(UNIDENTIFIED);
        };

        match parsed.cmp {
            None => match self.eval.evaluate(&parsed.lhs, &mut self.ns).await {
                // No top-level comparison: a clean evaluation reports
                // the action executed as-is.
                Ok(_) => Ok(suggested),
                Err(e) => Ok(self.match_error_action(&parsed.lhs, &e)),
            },
            Some(_) => {
                // Shared LHS evaluated exactly once; side effects are
                // never repeated per candidate.
                match self.eval.evaluate(&parsed.lhs, &mut self.ns).await {
                    Ok(value) => self.run_cascade(&parsed.lhs, value).await,
                    Err(e) => Ok(self.match_error_action(&parsed.lhs, &e)),
                }
            }
        }
    }

    async fn observe(&mut self, block: bool) -> Result<Option<ActionIndex>, AdapterError> {
        loop {
            self.drain_events();
            if let Some(index) = self.pending.pop_front() {
                return Ok(Some(index));
            }
            if !block {
                return Ok(None);
            }
            match self.events.recv().await {
                Some(event) => self.match_event(event),
                // All senders gone: torn down.
                None => return Ok(None),
            }
        }
    }

    async fn stop(&mut self) -> Result<(), AdapterError> {
        self.events.close();
        Ok(())
    }
}

/// Compare an evaluated LHS value against a candidate RHS value.
fn compare(op: CmpOp, lhs: &Value, rhs: &Value) -> bool {
    match op {
        CmpOp::Eq => lhs == rhs,
        CmpOp::Ne => lhs != rhs,
        CmpOp::In => match rhs {
            Value::Array(items) => items.contains(lhs),
            Value::String(s) => lhs.as_str().is_some_and(|needle| s.contains(needle)),
            _ => false,
        },
        CmpOp::Lt | CmpOp::Le | CmpOp::Gt | CmpOp::Ge => {
            let ord = match (lhs, rhs) {
                (Value::Number(a), Value::Number(b)) => {
                    match (a.as_f64(), b.as_f64()) {
                        (Some(a), Some(b)) => a.partial_cmp(&b),
                        _ => None,
                    }
                }
                (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
                _ => None,
            };
            match (op, ord) {
                (CmpOp::Lt, Some(std::cmp::Ordering::Less)) => true,
                (CmpOp::Gt, Some(std::cmp::Ordering::Greater)) => true,
                (CmpOp::Le, Some(o)) => o != std::cmp::Ordering::Greater,
                (CmpOp::Ge, Some(o)) => o != std::cmp::Ordering::Less,
                _ => false,
            }
        }
    }
}

/// Factory for `shell(<signal>=<event>,...)` specs: a scripting
/// evaluator over the shell evaluator, optionally bridging Unix
/// signals into output events.
pub struct ShellFactory;

#[async_trait]
impl AdapterFactory for ShellFactory {
    async fn create(
        &self,
        _registry: &AdapterRegistry,
        param: &str,
        catalog: ActionCatalog,
    ) -> Result<Box<dyn Adapter>, AdapterError> {
        let (adapter, sender) = ScriptingEvaluator::new(catalog, Box::new(ShellEvaluator));

        for mapping in param.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            let (signal, event) = mapping.split_once('=').ok_or_else(|| {
                AdapterError::Config(format!("bad signal mapping: {mapping}"))
            })?;
            #[cfg(unix)]
            crate::signal_source::spawn(signal.trim(), event.trim().to_string(), sender.clone())
                .map_err(AdapterError::Config)?;
            #[cfg(not(unix))]
            return Err(AdapterError::Config(format!(
                "signal sources are unix-only: {signal}={event}"
            )));
        }

        Ok(Box::new(adapter))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use testrig_core::port::evaluator::mocks::MockEvaluator;

    fn evaluator_with(
        names: Vec<&str>,
        mock: MockEvaluator,
    ) -> (ScriptingEvaluator, EventSender) {
        let catalog = ActionCatalog::from_names(names).unwrap();
        ScriptingEvaluator::new(catalog, Box::new(mock))
    }

    #[tokio::test]
    async fn plain_expression_reports_itself() {
        let mock = MockEvaluator::new().returns("touch('/tmp/x')", json!(null));
        let (mut adapter, _tx) = evaluator_with(vec!["touch('/tmp/x')"], mock);

        assert_eq!(adapter.execute(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn cascade_evaluates_lhs_exactly_once_and_first_match_wins() {
        // Both candidates share the LHS; result 0 satisfies the first
        // predicate, so the first declared action is reported and the
        // shared command runs exactly once.
        let mock = MockEvaluator::new()
            .returns("os.system(cmd)", json!(0))
            .returns("0", json!(0))
            .returns("range(1,255)", json!([1, 2, 3]));
        let counts = mock.counts();
        let (mut adapter, _tx) = evaluator_with(
            vec!["os.system(cmd) == 0", "os.system(cmd) in range(1,255)"],
            mock,
        );

        assert_eq!(adapter.execute(1).await.unwrap(), 1);
        assert_eq!(counts.of("os.system(cmd)"), 1);
    }

    #[tokio::test]
    async fn leading_lowercase_o_expression_is_a_cascade_input() {
        // `open(...)` starts with `o` but is an input expression, not
        // an output template; only `o` + uppercase names observations.
        let mock = MockEvaluator::new().returns("open(path)", json!(0));
        let (mut adapter, _tx) =
            evaluator_with(vec!["open(path) == 0", "oOpened"], mock);

        assert_eq!(adapter.execute(1).await.unwrap(), 1);
        assert!(adapter.catalog().action(2).unwrap().is_output());
    }

    #[tokio::test]
    async fn cascade_falls_through_to_later_candidate() {
        let mock = MockEvaluator::new().returns("probe()", json!(9));
        let counts = mock.counts();
        let (mut adapter, _tx) =
            evaluator_with(vec!["probe() == 0", "probe() == 9"], mock);

        // Suggesting the first candidate reports the matching second
        // one; the shared LHS still ran only once.
        assert_eq!(adapter.execute(1).await.unwrap(), 2);
        assert_eq!(counts.of("probe()"), 1);
    }

    #[tokio::test]
    async fn cascade_without_match_is_unidentified() {
        let mock = MockEvaluator::new().returns("probe()", json!(5));
        let (mut adapter, _tx) =
            evaluator_with(vec!["probe() == 0", "probe() == 9"], mock);

        assert_eq!(adapter.execute(1).await.unwrap(), UNIDENTIFIED);
    }

    #[tokio::test]
    async fn declaration_order_wins_over_suggestion_order() {
        let mock = MockEvaluator::new()
            .returns("val()", json!(3))
            .returns("3", json!(3))
            .returns("[3]", json!([3]));
        let (mut adapter, _tx) =
            evaluator_with(vec!["val() == 3", "val() in [3]"], mock);

        // The value satisfies both predicates; suggesting the second
        // still reports the first declared match.
        assert_eq!(adapter.execute(2).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn evaluation_fault_matches_error_action() {
        let mock = MockEvaluator::new().raises("open(path)", "No such file or directory");
        let (mut adapter, _tx) = evaluator_with(
            vec!["open(path) == 0", "open(path) == Error(No such file.*)"],
            mock,
        );

        assert_eq!(adapter.execute(1).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn unmatched_fault_is_unidentified() {
        let mock = MockEvaluator::new().raises("boom()", "kaboom");
        let (mut adapter, _tx) = evaluator_with(vec!["boom()"], mock);

        assert_eq!(adapter.execute(1).await.unwrap(), UNIDENTIFIED);
    }

    #[tokio::test]
    async fn store_as_capture_binds_and_is_visible_later() {
        // Unscripted mock sources resolve namespace variables and JSON
        // literals, so "value == 42" works once the capture happened.
        let mock = MockEvaluator::new();
        let (mut adapter, tx) = evaluator_with(
            vec!["value == 42", "oReading(?value)"],
            mock,
        );

        tx.send(Event::new("oReading", vec![json!(42)])).await.unwrap();

        assert_eq!(adapter.observe(false).await.unwrap(), Some(2));
        assert_eq!(adapter.namespace().get("value"), Some(&json!(42)));

        // A later input evaluation referencing the captured variable.
        assert_eq!(adapter.execute(1).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn literal_templates_match_before_placeholders() {
        let mock = MockEvaluator::new();
        let (mut adapter, tx) = evaluator_with(
            vec!["oReading(?any)", "oReading(42)"],
            mock,
        );

        tx.send(Event::new("oReading", vec![json!(42)])).await.unwrap();

        // The literal template (declared second) wins over the earlier
        // placeholder template.
        assert_eq!(adapter.observe(false).await.unwrap(), Some(2));
        assert!(adapter.namespace().get("any").is_none());
    }

    #[tokio::test]
    async fn placeholder_template_matches_any_value() {
        let mock = MockEvaluator::new();
        let (mut adapter, tx) = evaluator_with(vec!["oReading(0)", "oReading(?x)"], mock);

        tx.send(Event::new("oReading", vec![json!(7)])).await.unwrap();

        assert_eq!(adapter.observe(false).await.unwrap(), Some(2));
        assert_eq!(adapter.namespace().get("x"), Some(&json!(7)));
    }

    #[tokio::test]
    async fn unmatched_event_is_dropped() {
        let mock = MockEvaluator::new();
        let (mut adapter, tx) = evaluator_with(vec!["oKnown"], mock);

        tx.send(Event::new("oOther", vec![])).await.unwrap();
        assert_eq!(adapter.observe(false).await.unwrap(), None);
    }

    #[tokio::test]
    async fn blocking_observe_wakes_on_event() {
        let mock = MockEvaluator::new();
        let (mut adapter, tx) = evaluator_with(vec!["oPing"], mock);

        let sender = tx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            sender.send(Event::new("oPing", vec![])).await.unwrap();
        });

        assert_eq!(adapter.observe(true).await.unwrap(), Some(1));
    }

    #[test]
    fn compare_covers_ordering_and_membership() {
        assert!(compare(CmpOp::Eq, &json!(1), &json!(1)));
        assert!(compare(CmpOp::Ne, &json!(1), &json!(2)));
        assert!(compare(CmpOp::Lt, &json!(1), &json!(2)));
        assert!(compare(CmpOp::Ge, &json!(2.0), &json!(2)));
        assert!(compare(CmpOp::In, &json!(2), &json!([1, 2, 3])));
        assert!(compare(CmpOp::In, &json!("bc"), &json!("abcd")));
        assert!(!compare(CmpOp::Lt, &json!("a"), &json!(1)));
    }
}
