// Action Catalog - name<->index bijection for one adapter boundary

use std::collections::HashMap;

use super::action::{Action, ActionIndex, Direction};
use super::error::DomainError;

/// Bidirectional name<->index table, one per adapter boundary.
///
/// Built once at adapter-tree initialization from the full action list
/// supplied by the generator; immutable thereafter. Indices are 1-based;
/// index 0 is reserved for "unidentified".
#[derive(Debug, Clone)]
pub struct ActionCatalog {
    actions: Vec<Action>,
    by_name: HashMap<String, ActionIndex>,
}

impl ActionCatalog {
    /// Build a catalog from an ordered name list.
    ///
    /// # Errors
    /// - `DomainError::DuplicateAction` if two actions share a name
    ///   (fatal configuration error per the construction contract)
    pub fn from_names<S: Into<String>>(
        names: impl IntoIterator<Item = S>,
    ) -> Result<Self, DomainError> {
        let mut actions = Vec::new();
        let mut by_name = HashMap::new();

        for (i, name) in names.into_iter().enumerate() {
            let action = Action::new(i + 1, name);
            if by_name
                .insert(action.name.clone(), action.index)
                .is_some()
            {
                return Err(DomainError::DuplicateAction(action.name));
            }
            actions.push(action);
        }

        Ok(Self { actions, by_name })
    }

    /// Look up an action's index by name.
    pub fn index_of(&self, name: &str) -> Option<ActionIndex> {
        self.by_name.get(name).copied()
    }

    /// Look up an action's name by (1-based) index.
    pub fn name_of(&self, index: ActionIndex) -> Option<&str> {
        self.action(index).map(|a| a.name.as_str())
    }

    /// Look up the full action record by (1-based) index.
    pub fn action(&self, index: ActionIndex) -> Option<&Action> {
        index
            .checked_sub(1)
            .and_then(|i| self.actions.get(i))
    }

    /// True if `index` names an action in this catalog.
    pub fn contains(&self, index: ActionIndex) -> bool {
        index >= 1 && index <= self.actions.len()
    }

    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// All actions in declaration order.
    pub fn actions(&self) -> impl Iterator<Item = &Action> {
        self.actions.iter()
    }

    /// Input actions in declaration order.
    pub fn inputs(&self) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(|a| a.direction == Direction::Input)
    }

    /// Output actions in declaration order.
    pub fn outputs(&self) -> impl Iterator<Item = &Action> {
        self.actions
            .iter()
            .filter(|a| a.direction == Direction::Output)
    }

    /// Action names in declaration order (handshake payload).
    pub fn names(&self) -> impl ExactSizeIterator<Item = &str> {
        self.actions.iter().map(|a| a.name.as_str())
    }
}
