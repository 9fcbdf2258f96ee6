//! Leaf matchers: plain needles and `key:value` comparisons.

use std::cell::OnceCell;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::filter::FilterError;
use crate::message::Message;

/// Flags shared by every leaf of one expression.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchOptions {
    #[serde(default)]
    pub case_sensitive: bool,
    #[serde(default)]
    pub regex: bool,
}

/// Comparator of a `key:value` leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparator {
    /// No operator: prefix match for strings, equality otherwise.
    Prefix,
    Eq,
    StrictEq,
    Gt,
    Ge,
    Lt,
    Le,
}

impl Comparator {
    /// Longest operators first so `===` is not read as `==` + `=`.
    const OPERATORS: [(&'static str, Comparator); 6] = [
        ("===", Comparator::StrictEq),
        ("==", Comparator::Eq),
        (">=", Comparator::Ge),
        ("<=", Comparator::Le),
        (">", Comparator::Gt),
        ("<", Comparator::Lt),
    ];

    fn split(raw: &str) -> (Comparator, &str) {
        for (op, comparator) in Self::OPERATORS {
            if let Some(rest) = raw.strip_prefix(op) {
                return (comparator, rest.trim());
            }
        }
        (Comparator::Prefix, raw)
    }

    fn is_equality(&self) -> bool {
        matches!(self, Comparator::Prefix | Comparator::Eq | Comparator::StrictEq)
    }

    fn order(&self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::*;
        match self {
            Comparator::Prefix | Comparator::Eq | Comparator::StrictEq => ordering == Equal,
            Comparator::Gt => ordering == Greater,
            Comparator::Ge => ordering != Less,
            Comparator::Lt => ordering == Less,
            Comparator::Le => ordering != Greater,
        }
    }
}

/// Parsed `key:value` part of a leaf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyValue {
    pub key: String,
    pub comparator: Comparator,
    pub value: String,
}

impl KeyValue {
    /// Split at the rightmost `:`. Both sides must be non-empty.
    pub fn parse(text: &str) -> Option<Self> {
        let idx = text.rfind(':')?;
        let key = text[..idx].trim();
        let (comparator, value) = Comparator::split(text[idx + 1..].trim());
        if key.is_empty() || value.is_empty() {
            return None;
        }
        Some(Self {
            key: key.to_string(),
            comparator,
            value: value.to_string(),
        })
    }

    fn compare(&self, actual: &Value, case_sensitive: bool) -> bool {
        if self.value == "*" {
            return true;
        }
        let op = self.comparator;
        match actual {
            Value::Number(n) => match (n.as_f64(), self.value.parse::<f64>()) {
                (Some(a), Ok(b)) => a.partial_cmp(&b).is_some_and(|o| op.order(o)),
                _ => false,
            },
            Value::Bool(b) => {
                let literal = if *b { "true" } else { "false" };
                op.is_equality()
                    && if op == Comparator::StrictEq {
                        self.value == literal
                    } else {
                        self.value.eq_ignore_ascii_case(literal)
                    }
            }
            Value::String(s) => self.compare_str(s, case_sensitive),
            Value::Null => op.is_equality() && self.value == "null",
            Value::Array(_) | Value::Object(_) => false,
        }
    }

    fn compare_str(&self, actual: &str, case_sensitive: bool) -> bool {
        let op = self.comparator;
        if op == Comparator::StrictEq {
            return actual == self.value;
        }
        if !op.is_equality() {
            if let (Ok(a), Ok(b)) = (actual.trim().parse::<f64>(), self.value.parse::<f64>()) {
                return a.partial_cmp(&b).is_some_and(|o| op.order(o));
            }
        }
        let (actual, expected) = if case_sensitive {
            (actual.to_string(), self.value.clone())
        } else {
            (actual.to_lowercase(), self.value.to_lowercase())
        };
        match op {
            Comparator::Prefix => actual.starts_with(&expected),
            Comparator::Eq => actual == expected,
            other => other.order(actual.as_str().cmp(expected.as_str())),
        }
    }
}

#[derive(Debug, Clone)]
enum Needle {
    Text(String),
    Pattern(Regex),
}

/// One compiled leaf.
#[derive(Debug, Clone)]
pub struct Leaf {
    needle: Needle,
    key_value: Option<KeyValue>,
    case_sensitive: bool,
}

impl Leaf {
    pub fn new(text: &str, options: MatchOptions) -> Result<Self, FilterError> {
        let needle = if options.regex {
            let pattern = RegexBuilder::new(text)
                .case_insensitive(!options.case_sensitive)
                .build()
                .map_err(|e| FilterError::InvalidRegex {
                    pattern: text.to_string(),
                    reason: e.to_string(),
                })?;
            Needle::Pattern(pattern)
        } else if options.case_sensitive {
            Needle::Text(text.to_string())
        } else {
            Needle::Text(text.to_lowercase())
        };
        Ok(Self {
            needle,
            key_value: KeyValue::parse(text),
            case_sensitive: options.case_sensitive,
        })
    }

    pub fn key_value(&self) -> Option<&KeyValue> {
        self.key_value.as_ref()
    }

    pub fn matches(&self, subject: &Subject<'_>) -> bool {
        self.matches_needle(subject) || self.matches_key_value(subject)
    }

    fn matches_needle(&self, subject: &Subject<'_>) -> bool {
        match &self.needle {
            Needle::Pattern(re) => subject.haystacks().iter().any(|h| re.is_match(h)),
            Needle::Text(needle) if self.case_sensitive => {
                subject.haystacks().iter().any(|h| h.contains(needle.as_str()))
            }
            Needle::Text(needle) => subject
                .lowered_haystacks()
                .iter()
                .any(|h| h.contains(needle.as_str())),
        }
    }

    fn matches_key_value(&self, subject: &Subject<'_>) -> bool {
        let Some(kv) = &self.key_value else {
            return false;
        };
        let mut found = Vec::new();
        for root in subject.roots() {
            if kv.key == "*" {
                collect_scalars(root, &mut found);
            } else {
                resolve_path(root, &kv.key.split('.').collect::<Vec<_>>(), &mut found);
            }
        }
        found.iter().any(|v| kv.compare(v, self.case_sensitive))
    }
}

/// Resolve a dotted path, fanning out over arrays at every level.
fn resolve_path<'v>(value: &'v Value, path: &[&str], out: &mut Vec<&'v Value>) {
    match value {
        Value::Array(items) => {
            for item in items {
                resolve_path(item, path, out);
            }
        }
        _ if path.is_empty() => out.push(value),
        Value::Object(map) => {
            if let Some(child) = map.get(path[0]) {
                resolve_path(child, &path[1..], out);
            }
        }
        _ => {}
    }
}

fn collect_scalars<'v>(value: &'v Value, out: &mut Vec<&'v Value>) {
    match value {
        Value::Array(items) => items.iter().for_each(|v| collect_scalars(v, out)),
        Value::Object(map) => map.values().for_each(|v| collect_scalars(v, out)),
        scalar => out.push(scalar),
    }
}

/// A Message prepared for leaf tests. Haystacks and derived fields are
/// computed on first use and shared by every leaf of one evaluation.
pub struct Subject<'a> {
    message: &'a Message,
    haystacks: OnceCell<Vec<String>>,
    lowered: OnceCell<Vec<String>>,
    derived: OnceCell<Value>,
}

impl<'a> Subject<'a> {
    pub fn new(message: &'a Message) -> Self {
        Self {
            message,
            haystacks: OnceCell::new(),
            lowered: OnceCell::new(),
            derived: OnceCell::new(),
        }
    }

    fn haystacks(&self) -> &[String] {
        self.haystacks.get_or_init(|| {
            let m = self.message;
            vec![
                m.proxy_config.protocol.to_string(),
                m.protocol.clone(),
                m.summary_line(),
                m.endpoint.clone(),
                serde_json::to_string(&m.request_headers).unwrap_or_default(),
                serde_json::to_string(&m.response_headers).unwrap_or_default(),
                m.request_body.text().into_owned(),
                m.response_body.text().into_owned(),
                m.note.clone(),
            ]
        })
    }

    fn lowered_haystacks(&self) -> &[String] {
        self.lowered
            .get_or_init(|| self.haystacks().iter().map(|h| h.to_lowercase()).collect())
    }

    /// JSON roots searched by `key:value` leaves, in priority order.
    fn roots(&self) -> Vec<&Value> {
        let mut roots = Vec::with_capacity(3);
        if let Some(v) = self.message.response_body.json() {
            roots.push(v);
        }
        if let Some(v) = self.message.request_body.json() {
            roots.push(v);
        }
        roots.push(self.derived.get_or_init(|| self.message.derived_fields()));
        roots
    }
}
