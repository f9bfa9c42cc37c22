// Action Domain Model

use serde::{Deserialize, Serialize};

/// Action index. Catalog indices are 1-based; 0 is reserved.
pub type ActionIndex = usize;

/// Reserved index meaning "no matching action / unidentified".
pub const UNIDENTIFIED: ActionIndex = 0;

/// Action direction: input (interaction with the SUT) or
/// output (observation from the SUT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Direction {
    Input,
    Output,
}

impl Direction {
    /// Derive direction from the generator naming convention: output
    /// names are `o` followed by an uppercase letter (`oReading`,
    /// `oDone`), everything else is an input. Requiring the uppercase
    /// letter keeps expression-style input names like `os.system(cmd)`
    /// or `open(path)` on the input side.
    pub fn from_name(name: &str) -> Self {
        let mut chars = name.chars();
        if chars.next() == Some('o') && chars.next().is_some_and(|c| c.is_ascii_uppercase()) {
            Direction::Output
        } else {
            Direction::Input
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Input => write!(f, "INPUT"),
            Direction::Output => write!(f, "OUTPUT"),
        }
    }
}

/// An indexed, named unit of input or output.
///
/// Indices are stable for the lifetime of a test run; names are unique
/// within one catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub index: ActionIndex,
    pub name: String,
    pub direction: Direction,
}

impl Action {
    pub fn new(index: ActionIndex, name: impl Into<String>) -> Self {
        let name = name.into();
        let direction = Direction::from_name(&name);
        Self {
            index,
            name,
            direction,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == Direction::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == Direction::Output
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn direction_follows_naming_convention() {
        assert_eq!(Direction::from_name("iInstantiate"), Direction::Input);
        assert_eq!(Direction::from_name("oFileChanged(?x)"), Direction::Output);
        assert_eq!(Direction::from_name("touch /tmp/x"), Direction::Input);
    }

    #[test]
    fn lowercase_second_letter_is_not_an_output() {
        // Expression-style names happen to start with `o` too.
        assert_eq!(Direction::from_name("os.system(cmd) == 0"), Direction::Input);
        assert_eq!(Direction::from_name("open(path)"), Direction::Input);
        assert_eq!(Direction::from_name("o"), Direction::Input);
        assert_eq!(Direction::from_name("oDone"), Direction::Output);
    }

    #[test]
    fn action_carries_derived_direction() {
        let a = Action::new(1, "oSignal");
        assert!(a.is_output());
        let b = Action::new(2, "iBar=0");
        assert!(b.is_input());
    }
}
