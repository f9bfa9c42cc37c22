// Action-name parsing for the scripting adapter
//
// Input actions are expression strings, optionally followed by a
// top-level comparison operator and a right-hand side. "Top-level"
// means outside any quotes, parentheses or brackets:
//   os.system(cmd) == 0
//   status() in range(1,255)
//   get("a==b")                  <- no top-level comparison
//
// Output actions are templates `name(arg, ...)` where each argument is
// a JSON literal or a `?var` store-as placeholder.

use regex::Regex;

use testrig_core::port::Value;

/// Top-level comparison operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Le,
    Ge,
    Lt,
    Gt,
    In,
}

impl std::fmt::Display for CmpOp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            CmpOp::Eq => "==",
            CmpOp::Ne => "!=",
            CmpOp::Le => "<=",
            CmpOp::Ge => ">=",
            CmpOp::Lt => "<",
            CmpOp::Gt => ">",
            CmpOp::In => "in",
        };
        write!(f, "{s}")
    }
}

/// A parsed input action.
#[derive(Debug, Clone)]
pub struct ParsedInput {
    /// Left-hand side expression source, trimmed. Grouping key for the
    /// comparison cascade (byte-identical LHS text = one group).
    pub lhs: String,
    /// Top-level comparison, if any.
    pub cmp: Option<(CmpOp, String)>,
    /// Compiled `Error(pattern)` matcher when the RHS has that form.
    pub error_pattern: Option<Regex>,
}

/// Split an expression at its leftmost top-level comparison operator.
pub fn split_top_level(source: &str) -> Option<(&str, CmpOp, &str)> {
    let bytes = source.as_bytes();
    let mut depth = 0usize;
    let mut in_str: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];

        if let Some(quote) = in_str {
            if c == b'\\' {
                i += 2;
                continue;
            }
            if c == quote {
                in_str = None;
            }
            i += 1;
            continue;
        }

        match c {
            b'\'' | b'"' => in_str = Some(c),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            _ if depth == 0 => {
                let rest = &bytes[i..];
                let two: Option<CmpOp> = match rest {
                    [b'=', b'=', ..] => Some(CmpOp::Eq),
                    [b'!', b'=', ..] => Some(CmpOp::Ne),
                    [b'<', b'=', ..] => Some(CmpOp::Le),
                    [b'>', b'=', ..] => Some(CmpOp::Ge),
                    _ => None,
                };
                if let Some(op) = two {
                    return Some((&source[..i], op, &source[i + 2..]));
                }
                if c == b'<' {
                    return Some((&source[..i], CmpOp::Lt, &source[i + 1..]));
                }
                if c == b'>' {
                    return Some((&source[..i], CmpOp::Gt, &source[i + 1..]));
                }
                // ` in ` must be whitespace-delimited to avoid matching
                // identifiers like "main".
                if rest.starts_with(b"in")
                    && i > 0
                    && bytes[i - 1].is_ascii_whitespace()
                    && rest.get(2).is_some_and(|b| b.is_ascii_whitespace())
                {
                    return Some((&source[..i], CmpOp::In, &source[i + 2..]));
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

/// Recognize an `Error(pattern)` right-hand side and compile the
/// pattern. A pattern that is not a valid regex is matched literally.
pub fn error_pattern(rhs: &str) -> Option<Regex> {
    let rhs = rhs.trim();
    let inner = rhs.strip_prefix("Error(")?.strip_suffix(')')?;
    match Regex::new(inner) {
        Ok(re) => Some(re),
        Err(_) => Regex::new(&regex::escape(inner)).ok(),
    }
}

/// Parse one input action name.
pub fn parse_input(name: &str) -> ParsedInput {
    match split_top_level(name) {
        Some((lhs, op, rhs)) => {
            let rhs = rhs.trim().to_string();
            let error_pattern = if op == CmpOp::Eq {
                error_pattern(&rhs)
            } else {
                None
            };
            ParsedInput {
                lhs: lhs.trim().to_string(),
                cmp: Some((op, rhs)),
                error_pattern,
            }
        }
        None => ParsedInput {
            lhs: name.trim().to_string(),
            cmp: None,
            error_pattern: None,
        },
    }
}

/// One argument position of an output template.
#[derive(Debug, Clone)]
pub enum TemplateArg {
    /// Concrete literal; the observed value must equal it.
    Literal(Value),
    /// Store-as placeholder: matches unconditionally for its position
    /// and binds the name in the namespace to the observed value.
    StoreAs(String),
}

/// A declared output action parsed as an event template.
#[derive(Debug, Clone)]
pub struct OutputTemplate {
    pub index: usize,
    pub name: String,
    pub args: Vec<TemplateArg>,
}

impl OutputTemplate {
    pub fn has_placeholder(&self) -> bool {
        self.args
            .iter()
            .any(|a| matches!(a, TemplateArg::StoreAs(_)))
    }
}

/// Split template arguments at top-level commas.
fn split_args(argtext: &str) -> Vec<&str> {
    let bytes = argtext.as_bytes();
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_str: Option<u8> = None;
    let mut start = 0;

    for (i, &c) in bytes.iter().enumerate() {
        if let Some(quote) = in_str {
            if c == quote && bytes.get(i.wrapping_sub(1)) != Some(&b'\\') {
                in_str = None;
            }
            continue;
        }
        match c {
            b'\'' | b'"' => in_str = Some(c),
            b'(' | b'[' | b'{' => depth += 1,
            b')' | b']' | b'}' => depth = depth.saturating_sub(1),
            b',' if depth == 0 => {
                parts.push(&argtext[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&argtext[start..]);
    parts
}

/// Parse one output action name into an event template.
pub fn parse_output(index: usize, name: &str) -> OutputTemplate {
    let template_re = Regex::new(r"^\s*([A-Za-z_][A-Za-z0-9_]*)\s*\((.*)\)\s*$")
        .expect("static regex");

    let Some(cap) = template_re.captures(name) else {
        // Bare name: zero-argument template.
        return OutputTemplate {
            index,
            name: name.trim().to_string(),
            args: Vec::new(),
        };
    };

    let event_name = cap[1].to_string();
    let argtext = cap[2].trim();
    let args = if argtext.is_empty() {
        Vec::new()
    } else {
        split_args(argtext)
            .into_iter()
            .map(|raw| {
                let raw = raw.trim();
                if let Some(var) = raw.strip_prefix('?') {
                    TemplateArg::StoreAs(var.to_string())
                } else {
                    // Literal: JSON if it parses, else the raw text.
                    let value = serde_json::from_str(raw)
                        .unwrap_or_else(|_| Value::String(raw.to_string()));
                    TemplateArg::Literal(value)
                }
            })
            .collect()
    };

    OutputTemplate {
        index,
        name: event_name,
        args,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn splits_at_the_leftmost_top_level_operator() {
        let (lhs, op, rhs) = split_top_level("os.system(cmd) == 0").unwrap();
        assert_eq!(lhs.trim(), "os.system(cmd)");
        assert_eq!(op, CmpOp::Eq);
        assert_eq!(rhs.trim(), "0");

        let (lhs, op, rhs) = split_top_level("status() in range(1,255)").unwrap();
        assert_eq!(lhs.trim(), "status()");
        assert_eq!(op, CmpOp::In);
        assert_eq!(rhs.trim(), "range(1,255)");
    }

    #[test]
    fn operators_inside_quotes_or_parens_do_not_split() {
        assert!(split_top_level("get(\"a == b\")").is_none());
        assert!(split_top_level("check(x == 1)").is_none());
        assert!(split_top_level("lookup('in')").is_none());
        assert!(split_top_level("print('x')").is_none());
    }

    #[test]
    fn two_char_operators_win_over_one_char() {
        let (_, op, rhs) = split_top_level("x <= 3").unwrap();
        assert_eq!(op, CmpOp::Le);
        assert_eq!(rhs.trim(), "3");
    }

    #[test]
    fn in_requires_word_boundaries() {
        // "main" must not split at its embedded "in".
        assert!(split_top_level("main()").is_none());
        assert!(split_top_level("login").is_none());
    }

    #[test]
    fn single_equals_is_not_a_comparison() {
        assert!(split_top_level("iBar=0").is_none());
    }

    #[test]
    fn error_rhs_is_recognized_and_compiled() {
        let p = parse_input("open(path) == Error(No such file.*)");
        assert!(p.error_pattern.is_some());
        assert!(p.error_pattern.unwrap().is_match("No such file or directory"));

        let q = parse_input("open(path) == 0");
        assert!(q.error_pattern.is_none());
    }

    #[test]
    fn invalid_error_pattern_matches_literally() {
        let p = parse_input("f() == Error([unclosed)");
        assert!(p.error_pattern.unwrap().is_match("got [unclosed here"));
    }

    #[test]
    fn output_template_literals_and_placeholders() {
        let t = parse_output(3, "oReading(\"sensor\", ?value)");
        assert_eq!(t.name, "oReading");
        assert_eq!(t.args.len(), 2);
        assert!(matches!(&t.args[0], TemplateArg::Literal(v) if *v == json!("sensor")));
        assert!(matches!(&t.args[1], TemplateArg::StoreAs(n) if n == "value"));
        assert!(t.has_placeholder());
    }

    #[test]
    fn bare_output_name_is_a_zero_arg_template() {
        let t = parse_output(1, "oDone");
        assert_eq!(t.name, "oDone");
        assert!(t.args.is_empty());
        assert!(!t.has_placeholder());
    }

    #[test]
    fn nested_commas_stay_in_one_argument() {
        let t = parse_output(1, "oPair([1,2], 3)");
        assert_eq!(t.args.len(), 2);
        assert!(matches!(&t.args[0], TemplateArg::Literal(v) if *v == json!([1, 2])));
    }
}
