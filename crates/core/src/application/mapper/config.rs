// Mapper Configuration
// Line format:
//   1 = "remote(./child --flag)"          child adapter declaration
//   "iReset" -> (1, "reset_all()")        routing rule, parens = Required
//   "iDrop(.*)" -> [2, "drop $1"]         brackets = Optional, $1 capture
// Comments start with '#'; blank lines are ignored.

use regex::Regex;
use thiserror::Error;

/// Child adapter identifier within one mapper config.
pub type ChildId = u32;

/// Whether a routed target's success is part of the parent's success
/// predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Requirement {
    Required,
    Optional,
}

impl std::fmt::Display for Requirement {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Requirement::Required => write!(f, "REQUIRED"),
            Requirement::Optional => write!(f, "OPTIONAL"),
        }
    }
}

/// One target of a routing rule: child id, requirement, expression
/// template with `$1`-style capture substitutions.
#[derive(Debug, Clone)]
pub struct RuleTarget {
    pub child: ChildId,
    pub requirement: Requirement,
    pub template: String,
}

/// A routing rule: pattern over input-action names plus an ordered
/// target list.
#[derive(Debug, Clone)]
pub struct MappingRule {
    pub pattern_src: String,
    pub pattern: Regex,
    pub targets: Vec<RuleTarget>,
}

impl MappingRule {
    /// Full-match captures for an action name, or None.
    pub fn captures<'a>(&self, name: &'a str) -> Option<regex::Captures<'a>> {
        self.pattern.captures(name)
    }
}

/// Parsed mapper configuration: child declarations (in declaration
/// order) and routing rules (evaluated in declaration order, first
/// match wins).
#[derive(Debug, Clone, Default)]
pub struct MapperConfig {
    pub children: Vec<(ChildId, String)>,
    pub rules: Vec<MappingRule>,
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Line {line}: unrecognized syntax: {text}")]
    Syntax { line: usize, text: String },

    #[error("Line {line}: bad pattern {pattern:?}: {source}")]
    Pattern {
        line: usize,
        pattern: String,
        source: regex::Error,
    },

    #[error("Line {line}: duplicate child id {id}")]
    DuplicateChild { line: usize, id: ChildId },

    #[error("Line {line}: rule references undeclared child {id}")]
    UnknownChild { line: usize, id: ChildId },

    #[error("Line {line}: mismatched target brackets: {text}")]
    Brackets { line: usize, text: String },
}

impl MapperConfig {
    /// Parse a mapper configuration.
    ///
    /// # Errors
    /// Any `ConfigError` is a fatal configuration error; a mapper is
    /// never built from a partially parsed config.
    pub fn parse(text: &str) -> Result<Self, ConfigError> {
        // Compiled per parse; mapper configs are read once at tree init.
        let child_re = Regex::new(r#"^\s*(\d+)\s*=\s*"([^"]*)"\s*$"#).expect("static regex");
        let rule_re = Regex::new(r#"^\s*"([^"]*)"\s*->\s*(.*)$"#).expect("static regex");
        let target_re =
            Regex::new(r#"([(\[])\s*(\d+)\s*,\s*"([^"]*)"\s*([)\]])"#).expect("static regex");

        let mut config = MapperConfig::default();

        for (lineno, raw) in text.lines().enumerate() {
            let line = lineno + 1;
            let trimmed = raw.trim();
            if trimmed.is_empty() || trimmed.starts_with('#') {
                continue;
            }

            if let Some(cap) = child_re.captures(trimmed) {
                let id: ChildId = cap[1].parse().map_err(|_| ConfigError::Syntax {
                    line,
                    text: trimmed.to_string(),
                })?;
                if config.children.iter().any(|(c, _)| *c == id) {
                    return Err(ConfigError::DuplicateChild { line, id });
                }
                config.children.push((id, cap[2].to_string()));
                continue;
            }

            if let Some(cap) = rule_re.captures(trimmed) {
                let pattern_src = cap[1].to_string();
                let target_text = cap[2].to_string();

                // Patterns match the whole action name.
                let pattern = Regex::new(&format!("^(?:{pattern_src})$")).map_err(|e| {
                    ConfigError::Pattern {
                        line,
                        pattern: pattern_src.clone(),
                        source: e,
                    }
                })?;

                let mut targets = Vec::new();
                for tcap in target_re.captures_iter(&target_text) {
                    let requirement = match (&tcap[1], &tcap[4]) {
                        ("(", ")") => Requirement::Required,
                        ("[", "]") => Requirement::Optional,
                        _ => {
                            return Err(ConfigError::Brackets {
                                line,
                                text: target_text.clone(),
                            })
                        }
                    };
                    let id: ChildId = tcap[2].parse().map_err(|_| ConfigError::Syntax {
                        line,
                        text: trimmed.to_string(),
                    })?;
                    if !config.children.iter().any(|(c, _)| *c == id) {
                        return Err(ConfigError::UnknownChild { line, id });
                    }
                    targets.push(RuleTarget {
                        child: id,
                        requirement,
                        template: tcap[3].to_string(),
                    });
                }

                if targets.is_empty() {
                    return Err(ConfigError::Syntax {
                        line,
                        text: trimmed.to_string(),
                    });
                }

                config.rules.push(MappingRule {
                    pattern_src,
                    pattern,
                    targets,
                });
                continue;
            }

            return Err(ConfigError::Syntax {
                line,
                text: trimmed.to_string(),
            });
        }

        Ok(config)
    }
}
