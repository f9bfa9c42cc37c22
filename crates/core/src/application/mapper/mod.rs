// Mapper Adapter - routes and renames actions among child adapters

pub mod config;

pub use config::{ChildId, ConfigError, MapperConfig, MappingRule, Requirement, RuleTarget};

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use crate::application::registry::{AdapterFactory, AdapterRegistry};
use crate::domain::{ActionCatalog, ActionIndex, UNIDENTIFIED};
use crate::port::{Adapter, AdapterError};

/// Poll interval for blocking `observe` sweeps over children. A mapper
/// cannot block on one child's queue without starving its siblings'.
const OBSERVE_POLL_INTERVAL: Duration = Duration::from_millis(20);

/// A routed target resolved against its child's catalog.
#[derive(Debug, Clone)]
struct ResolvedTarget {
    child_pos: usize,
    child_id: ChildId,
    requirement: Requirement,
    action_name: String,
    action_index: ActionIndex,
}

struct ChildSlot {
    id: ChildId,
    adapter: Box<dyn Adapter>,
}

/// An adapter that owns a set of child adapters and a pattern-based
/// routing table, forming an n-ary tree (children may themselves be
/// mappers; configs are acyclic by construction, built bottom-up).
///
/// Route resolution happens once at construction: the parent catalog
/// is fixed, so every capture substitution is computable up front and
/// each child's catalog is exactly the set of concrete expressions
/// routed to it. The mapper exclusively owns its children's lifecycle.
pub struct MapperAdapter {
    catalog: ActionCatalog,
    children: Vec<ChildSlot>,
    routes: HashMap<ActionIndex, Vec<ResolvedTarget>>,
    // (child id, child index) -> parent index, unambiguous routes only.
    // A mapper never fabricates an index: anything absent here is
    // reported as unidentified.
    reverse: HashMap<(ChildId, ActionIndex), ActionIndex>,
}

impl MapperAdapter {
    /// Build a mapper and its children from a parsed configuration.
    ///
    /// Rules are tried in declaration order against each parent input
    /// action's name; the first full match wins. Children are
    /// constructed through the registry from their declared spec
    /// strings.
    pub async fn build(
        config: MapperConfig,
        catalog: ActionCatalog,
        registry: &AdapterRegistry,
    ) -> Result<Self, AdapterError> {
        // Concrete child action names, first-use order, deduplicated.
        let mut child_names: HashMap<ChildId, Vec<String>> =
            config.children.iter().map(|(id, _)| (*id, Vec::new())).collect();
        // parent index -> (child id, requirement, concrete name)
        let mut pending: HashMap<ActionIndex, Vec<(ChildId, Requirement, String)>> =
            HashMap::new();

        for action in catalog.inputs() {
            let Some((rule, caps)) = config
                .rules
                .iter()
                .find_map(|r| r.captures(&action.name).map(|c| (r, c)))
            else {
                debug!(action = %action.name, "No mapping rule; action will report unidentified");
                continue;
            };

            let mut targets = Vec::new();
            for t in &rule.targets {
                let mut concrete = String::new();
                caps.expand(&t.template, &mut concrete);

                let names = child_names
                    .get_mut(&t.child)
                    .ok_or_else(|| AdapterError::Config(format!("undeclared child {}", t.child)))?;
                if !names.iter().any(|n| n == &concrete) {
                    names.push(concrete.clone());
                }
                targets.push((t.child, t.requirement, concrete));
            }
            pending.insert(action.index, targets);
        }

        // Construct children in declaration order.
        let mut children = Vec::new();
        for (id, spec) in &config.children {
            let names = child_names.remove(id).unwrap_or_default();
            let child_catalog = ActionCatalog::from_names(names)
                .map_err(|e| AdapterError::Config(e.to_string()))?;
            let adapter = registry.create(spec, child_catalog).await?;
            children.push(ChildSlot { id: *id, adapter });
        }

        let pos_of = |id: ChildId| children.iter().position(|s| s.id == id);

        // Resolve target indices against the built child catalogs.
        let mut routes = HashMap::new();
        let mut reverse = HashMap::new();
        let mut ambiguous: HashSet<(ChildId, ActionIndex)> = HashSet::new();

        for (parent_index, targets) in pending {
            let mut resolved = Vec::new();
            for (child_id, requirement, name) in targets {
                let child_pos = pos_of(child_id)
                    .ok_or_else(|| AdapterError::Config(format!("undeclared child {child_id}")))?;
                let action_index = children[child_pos]
                    .adapter
                    .catalog()
                    .index_of(&name)
                    .ok_or_else(|| {
                        AdapterError::Config(format!("child {child_id} missing action {name}"))
                    })?;
                resolved.push(ResolvedTarget {
                    child_pos,
                    child_id,
                    requirement,
                    action_name: name,
                    action_index,
                });
            }

            // Reverse mapping only for unambiguous single-target routes.
            if let [only] = resolved.as_slice() {
                let key = (only.child_id, only.action_index);
                if !ambiguous.contains(&key) {
                    match reverse.entry(key) {
                        std::collections::hash_map::Entry::Vacant(e) => {
                            e.insert(parent_index);
                        }
                        std::collections::hash_map::Entry::Occupied(e) => {
                            // Two parent actions produced the same child
                            // expression; neither side can be translated.
                            e.remove();
                            ambiguous.insert(key);
                        }
                    }
                }
            }

            routes.insert(parent_index, resolved);
        }

        Ok(Self {
            catalog,
            children,
            routes,
            reverse,
        })
    }

    fn translate_back(&self, child_id: ChildId, index: ActionIndex) -> ActionIndex {
        match self.reverse.get(&(child_id, index)) {
            Some(parent) => *parent,
            None => {
                warn!(
                    child = child_id,
                    child_index = index,
                    "No reverse mapping for child result"
                );
                UNIDENTIFIED
            }
        }
    }
}

#[async_trait]
impl Adapter for MapperAdapter {
    fn catalog(&self) -> &ActionCatalog {
        &self.catalog
    }

    async fn execute(&mut self, suggested: ActionIndex) -> Result<ActionIndex, AdapterError> {
        let Some(route) = self.routes.get(&suggested).cloned() else {
            debug!(suggested, "No route for suggested action");
            return Ok(UNIDENTIFIED);
        };

        // Dispatch to every listed target, in order. Fatal child faults
        // propagate untouched; Required failures decide the outcome
        // after all targets have run.
        let mut required_ok = true;
        let mut single_executed = UNIDENTIFIED;

        for target in &route {
            let executed = self.children[target.child_pos]
                .adapter
                .execute(target.action_index)
                .await?;
            let success = executed != UNIDENTIFIED && executed == target.action_index;

            debug!(
                child = target.child_id,
                action = %target.action_name,
                executed,
                success,
                requirement = %target.requirement,
                "Dispatched routed action"
            );

            match target.requirement {
                Requirement::Required if !success => required_ok = false,
                Requirement::Optional if !success => {
                    // Swallowed: optional outcomes are logged but never
                    // part of the success predicate.
                    warn!(
                        child = target.child_id,
                        action = %target.action_name,
                        "Optional target failed (ignored)"
                    );
                }
                _ => {}
            }
            single_executed = executed;
        }

        if let [only] = route.as_slice() {
            // Single target: translate a diverging child result back to
            // this level if a reverse mapping exists.
            if single_executed != UNIDENTIFIED && single_executed != only.action_index {
                return Ok(self.translate_back(only.child_id, single_executed));
            }
        }

        if required_ok {
            Ok(suggested)
        } else {
            Ok(UNIDENTIFIED)
        }
    }

    async fn observe(&mut self, block: bool) -> Result<Option<ActionIndex>, AdapterError> {
        loop {
            for pos in 0..self.children.len() {
                let child_id = self.children[pos].id;
                if let Some(index) = self.children[pos].adapter.observe(false).await? {
                    return Ok(Some(self.translate_back(child_id, index)));
                }
            }
            if !block {
                return Ok(None);
            }
            tokio::time::sleep(OBSERVE_POLL_INTERVAL).await;
        }
    }

    async fn stop(&mut self) -> Result<(), AdapterError> {
        let mut first_err = None;
        for slot in &mut self.children {
            if let Err(e) = slot.adapter.stop().await {
                warn!(child = slot.id, error = %e, "Child teardown failed");
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Factory for `mapper(<config path>)` specs.
pub struct MapperFactory;

#[async_trait]
impl AdapterFactory for MapperFactory {
    async fn create(
        &self,
        registry: &AdapterRegistry,
        param: &str,
        catalog: ActionCatalog,
    ) -> Result<Box<dyn Adapter>, AdapterError> {
        let text = tokio::fs::read_to_string(param)
            .await
            .map_err(|e| AdapterError::Config(format!("cannot read mapper config {param}: {e}")))?;
        let config = MapperConfig::parse(&text).map_err(|e| AdapterError::Config(e.to_string()))?;
        let mapper = MapperAdapter::build(config, catalog, registry).await?;
        Ok(Box::new(mapper))
    }
}
