//! Next-step resolution.
//!
//! A step's transition is one of four shapes: a fixed target, a binary
//! branch on a context condition, a multi-way switch on a context field, or
//! an arbitrary function. Declarative workflows can only express the first
//! three; [`TransitionSpec`] is their serialized form and rejects anything
//! else when the definition is loaded.

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::state::WorkflowState;

pub type TransitionFn = Arc<dyn Fn(&WorkflowState) -> String + Send + Sync>;

#[derive(Clone)]
pub enum Transition {
    Fixed(String),
    Binary {
        condition: Condition,
        then: String,
        otherwise: String,
    },
    MultiWay {
        field: String,
        cases: BTreeMap<String, String>,
        default: String,
    },
    Arbitrary(TransitionFn),
}

impl fmt::Debug for Transition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transition::Fixed(to) => f.debug_tuple("Fixed").field(to).finish(),
            Transition::Binary {
                condition,
                then,
                otherwise,
            } => f
                .debug_struct("Binary")
                .field("condition", &condition.to_string())
                .field("then", then)
                .field("otherwise", otherwise)
                .finish(),
            Transition::MultiWay { field, cases, default } => f
                .debug_struct("MultiWay")
                .field("field", field)
                .field("cases", cases)
                .field("default", default)
                .finish(),
            Transition::Arbitrary(_) => f.write_str("Arbitrary(<fn>)"),
        }
    }
}

impl Transition {
    pub fn to(target: impl Into<String>) -> Self {
        Transition::Fixed(target.into())
    }

    pub fn arbitrary(f: impl Fn(&WorkflowState) -> String + Send + Sync + 'static) -> Self {
        Transition::Arbitrary(Arc::new(f))
    }

    /// Name of the step to run after the current one succeeded.
    pub fn resolve(&self, state: &WorkflowState) -> String {
        match self {
            Transition::Fixed(to) => to.clone(),
            Transition::Binary {
                condition,
                then,
                otherwise,
            } => {
                if condition.evaluate(state) {
                    then.clone()
                } else {
                    otherwise.clone()
                }
            }
            Transition::MultiWay { field, cases, default } => state
                .lookup(field)
                .and_then(|value| cases.get(&stringify(value)))
                .unwrap_or(default)
                .clone(),
            Transition::Arbitrary(f) => f(state),
        }
    }

    /// Every target this transition can name, or `None` when it is computed
    /// at run time and cannot be known statically.
    pub fn static_targets(&self) -> Option<Vec<&str>> {
        match self {
            Transition::Fixed(to) => Some(vec![to.as_str()]),
            Transition::Binary { then, otherwise, .. } => Some(vec![then.as_str(), otherwise.as_str()]),
            Transition::MultiWay { cases, default, .. } => {
                let mut targets: Vec<&str> = cases.values().map(String::as_str).collect();
                targets.push(default.as_str());
                Some(targets)
            }
            Transition::Arbitrary(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Eq,
    Ne,
}

/// `[!]path[ (==|!=) literal]`, evaluated against the workflow context.
///
/// Without a comparison the value at `path` is tested for truthiness.
/// Comparisons match on the stringified value, so `count == 3` and
/// `count == "3"` are the same test.
#[derive(Debug, Clone, PartialEq)]
pub struct Condition {
    pub path: String,
    pub negate: bool,
    pub comparison: Option<(Comparison, Value)>,
}

impl Condition {
    pub fn parse(input: &str) -> Result<Self, String> {
        let trimmed = input.trim();
        let (negate, rest) = match trimmed.strip_prefix('!') {
            Some(rest) => (true, rest.trim_start()),
            None => (false, trimmed),
        };

        let (path, comparison) = if let Some((lhs, rhs)) = rest.split_once("!=") {
            (lhs, Some((Comparison::Ne, parse_literal(rhs))))
        } else if let Some((lhs, rhs)) = rest.split_once("==") {
            (lhs, Some((Comparison::Eq, parse_literal(rhs))))
        } else {
            (rest, None)
        };

        let path = path.trim();
        if path.is_empty() || path.contains(char::is_whitespace) {
            return Err(format!("invalid condition '{input}': expected a context field path"));
        }
        Ok(Self {
            path: path.to_string(),
            negate,
            comparison,
        })
    }

    pub fn evaluate(&self, state: &WorkflowState) -> bool {
        let value = state.lookup(&self.path);
        let result = match &self.comparison {
            None => is_truthy(value),
            Some((op, literal)) => {
                let actual = stringify(value.unwrap_or(&Value::Null));
                let equal = actual == stringify(literal);
                match op {
                    Comparison::Eq => equal,
                    Comparison::Ne => !equal,
                }
            }
        };
        result != self.negate
    }
}

/// Quoted text, a JSON scalar, or otherwise the bare word as a string.
fn parse_literal(raw: &str) -> Value {
    let raw = raw.trim();
    if let Some(inner) = raw
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
    {
        return Value::String(inner.to_string());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

impl FromStr for Condition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Condition {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Condition> for String {
    fn from(condition: Condition) -> Self {
        condition.to_string()
    }
}

impl fmt::Display for Condition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negate {
            f.write_str("!")?;
        }
        f.write_str(&self.path)?;
        match &self.comparison {
            Some((Comparison::Eq, literal)) => write!(f, " == {literal}"),
            Some((Comparison::Ne, literal)) => write!(f, " != {literal}"),
            None => Ok(()),
        }
    }
}

/// Missing, null, false, 0, NaN and "" are false; everything else is true.
pub fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Strings as-is, everything else as compact JSON.
pub fn stringify(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Serialized transition: a bare step name, or a table tagged by `type`.
///
/// ```toml
/// next = "review"
/// next = { type = "binary", condition = "review.approved", then = "merge", else = "fix" }
/// next = { type = "multi_way", field = "verdict", cases = { ship = "END" }, default = "ERROR" }
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TransitionSpec {
    Target(String),
    Rule(TransitionRule),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TransitionRule {
    Fixed {
        to: String,
    },
    Binary {
        condition: ConditionSpec,
        then: String,
        #[serde(rename = "else")]
        otherwise: String,
    },
    MultiWay {
        field: String,
        #[serde(default)]
        cases: BTreeMap<String, String>,
        default: String,
    },
}

/// [`Condition`] in its string form, parsed while deserializing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ConditionSpec(pub Condition);

impl TryFrom<String> for ConditionSpec {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Condition::parse(&value).map(ConditionSpec)
    }
}

impl From<ConditionSpec> for String {
    fn from(spec: ConditionSpec) -> Self {
        spec.0.to_string()
    }
}

impl From<TransitionSpec> for Transition {
    fn from(spec: TransitionSpec) -> Self {
        match spec {
            TransitionSpec::Target(to) | TransitionSpec::Rule(TransitionRule::Fixed { to }) => {
                Transition::Fixed(to)
            }
            TransitionSpec::Rule(TransitionRule::Binary {
                condition,
                then,
                otherwise,
            }) => Transition::Binary {
                condition: condition.0,
                then,
                otherwise,
            },
            TransitionSpec::Rule(TransitionRule::MultiWay { field, cases, default }) => {
                Transition::MultiWay { field, cases, default }
            }
        }
    }
}
