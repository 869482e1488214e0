//! Structured filter, update and sort vocabulary.
//!
//! # Responsibility
//! - Express document predicates as a tree, never as raw query text.
//! - Express single-document mutations as an ordered list of operations.
//! - Render both as Mongo-style JSON for logs and diagnostics.
//!
//! # Invariants
//! - Equality is type-exact: strings equal only strings, booleans only
//!   booleans; numbers compare numerically across integer and real.
//! - Case-insensitive predicates fold ASCII case only.
//! - Field paths are dot-separated; validation happens when a backend
//!   translates the tree (see [`FieldPath::parse`]).

use crate::model::id::Identifier;
use crate::store::{StoreError, StoreResult, ID_FIELD, LAST_MODIFIED_FIELD};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{json, Map, Value};
use std::fmt::{Display, Formatter};
use std::ops::{BitAnd, BitOr};

static SEGMENT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^[^$."\\\x00-\x1f][^."\\\x00-\x1f]*$"#).expect("valid segment regex"));

/// Validated dot-separated document path.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<String>,
}

impl FieldPath {
    /// Parses `a.b.c`; rejects empty segments, quotes, backslashes, control
    /// characters and segments starting with `$`.
    pub fn parse(path: &str) -> StoreResult<Self> {
        let segments = path.split('.').map(str::to_string).collect::<Vec<_>>();
        if segments.iter().any(|segment| !SEGMENT_RE.is_match(segment)) {
            return Err(StoreError::InvalidPath(path.to_string()));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// SQLite JSON path, e.g. `$."model"."method"`.
    pub fn to_json_path(&self) -> String {
        let mut out = String::from("$");
        for segment in &self.segments {
            out.push_str(".\"");
            out.push_str(segment);
            out.push('"');
        }
        out
    }
}

impl Display for FieldPath {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.segments.join("."))
    }
}

///
/// CompareOp
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum CompareOp {
    Eq,
    Ne,
    Lt,
    Lte,
    Gt,
    Gte,
}

impl CompareOp {
    fn mongo_operator(self) -> &'static str {
        match self {
            Self::Eq => "$eq",
            Self::Ne => "$ne",
            Self::Lt => "$lt",
            Self::Lte => "$lte",
            Self::Gt => "$gt",
            Self::Gte => "$gte",
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ComparePredicate {
    pub path: String,
    pub op: CompareOp,
    pub value: Value,
}

///
/// Filter
///

#[derive(Clone, Debug, Default, PartialEq)]
pub enum Filter {
    /// Matches every document.
    #[default]
    All,
    Compare(ComparePredicate),
    /// Field equals one of `values`; an empty list matches nothing.
    In { path: String, values: Vec<Value> },
    Exists { path: String, present: bool },
    /// Array field holds an element equal to `value`.
    Contains { path: String, value: Value },
    EqIgnoreCase { path: String, value: String },
    InIgnoreCase { path: String, values: Vec<String> },
    /// Empty conjunction matches everything.
    And(Vec<Filter>),
    /// Empty disjunction matches nothing.
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    pub fn by_id(id: Identifier) -> Self {
        Self::eq(ID_FIELD, id)
    }

    pub fn by_ids(ids: impl IntoIterator<Item = Identifier>) -> Self {
        Self::is_in(ID_FIELD, ids)
    }

    fn compare(path: impl Into<String>, op: CompareOp, value: impl Into<Value>) -> Self {
        Self::Compare(ComparePredicate {
            path: path.into(),
            op,
            value: value.into(),
        })
    }

    pub fn eq(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Eq, value)
    }

    pub fn ne(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Ne, value)
    }

    pub fn lt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Lt, value)
    }

    pub fn lte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Lte, value)
    }

    pub fn gt(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Gt, value)
    }

    pub fn gte(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::compare(path, CompareOp::Gte, value)
    }

    pub fn is_in<I, V>(path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        Self::In {
            path: path.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn exists(path: impl Into<String>) -> Self {
        Self::Exists {
            path: path.into(),
            present: true,
        }
    }

    pub fn missing(path: impl Into<String>) -> Self {
        Self::Exists {
            path: path.into(),
            present: false,
        }
    }

    pub fn contains(path: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::Contains {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn eq_ignore_case(path: impl Into<String>, value: impl Into<String>) -> Self {
        Self::EqIgnoreCase {
            path: path.into(),
            value: value.into(),
        }
    }

    pub fn in_ignore_case<I, S>(path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::InIgnoreCase {
            path: path.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    /// Conjunction; collapses to the single clause or to `All` when possible.
    pub fn and(clauses: impl IntoIterator<Item = Filter>) -> Self {
        let mut clauses = clauses
            .into_iter()
            .filter(|clause| *clause != Filter::All)
            .collect::<Vec<_>>();
        match clauses.len() {
            0 => Self::All,
            1 => clauses.remove(0),
            _ => Self::And(clauses),
        }
    }

    pub fn or(clauses: impl IntoIterator<Item = Filter>) -> Self {
        let mut clauses = clauses.into_iter().collect::<Vec<_>>();
        if clauses.len() == 1 {
            return clauses.remove(0);
        }
        Self::Or(clauses)
    }

    #[allow(clippy::should_implement_trait)]
    pub fn not(filter: Filter) -> Self {
        Self::Not(Box::new(filter))
    }

    /// Mongo-style rendering of the tree.
    pub fn to_json(&self) -> Value {
        match self {
            Self::All => json!({}),
            Self::Compare(predicate) if predicate.op == CompareOp::Eq => {
                single(&predicate.path, predicate.value.clone())
            }
            Self::Compare(predicate) => single(
                &predicate.path,
                single(predicate.op.mongo_operator(), predicate.value.clone()),
            ),
            Self::In { path, values } => single(path, json!({ "$in": values })),
            Self::Exists { path, present } => single(path, json!({ "$exists": present })),
            Self::Contains { path, value } => {
                single(path, json!({ "$elemMatch": { "$eq": value } }))
            }
            Self::EqIgnoreCase { path, value } => single(path, case_insensitive_regex(value)),
            Self::InIgnoreCase { path, values } => json!({
                "$or": values
                    .iter()
                    .map(|value| single(path, case_insensitive_regex(value)))
                    .collect::<Vec<_>>()
            }),
            Self::And(clauses) => {
                json!({ "$and": clauses.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Self::Or(clauses) => {
                json!({ "$or": clauses.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Self::Not(inner) => json!({ "$nor": [inner.to_json()] }),
        }
    }
}

impl BitAnd for Filter {
    type Output = Self;

    fn bitand(self, rhs: Self) -> Self::Output {
        Filter::and([self, rhs])
    }
}

impl BitOr for Filter {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self::Output {
        Filter::Or(vec![self, rhs])
    }
}

fn single(key: &str, value: Value) -> Value {
    let mut map = Map::new();
    map.insert(key.to_string(), value);
    Value::Object(map)
}

fn case_insensitive_regex(value: &str) -> Value {
    json!({ "$regex": format!("^{}$", regex::escape(value)), "$options": "i" })
}

///
/// Update
///

#[derive(Clone, Debug, PartialEq)]
pub enum UpdateOp {
    /// Creates intermediate objects as needed.
    Set { path: String, value: Value },
    Unset { path: String },
    /// Appends; a missing path becomes a one-element array.
    Push { path: String, value: Value },
    PushAll { path: String, values: Vec<Value> },
    /// Removes every equal element. An object `value` matches array
    /// elements holding all of its keys with equal values.
    Pull { path: String, value: Value },
    /// Adds to a numeric field; a missing field counts as zero.
    Inc { path: String, amount: i64 },
}

/// Ordered list of mutations applied atomically to one document.
///
/// Every applied update also bumps `_lastmodified`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Update {
    ops: Vec<UpdateOp>,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    pub fn unset(mut self, path: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset { path: path.into() });
        self
    }

    pub fn push(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Push {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    pub fn push_all<I, V>(mut self, path: impl Into<String>, values: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<Value>,
    {
        self.ops.push(UpdateOp::PushAll {
            path: path.into(),
            values: values.into_iter().map(Into::into).collect(),
        });
        self
    }

    pub fn pull(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Pull {
            path: path.into(),
            value: value.into(),
        });
        self
    }

    pub fn inc(mut self, path: impl Into<String>, amount: i64) -> Self {
        self.ops.push(UpdateOp::Inc {
            path: path.into(),
            amount,
        });
        self
    }

    pub fn ops(&self) -> &[UpdateOp] {
        &self.ops
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Mongo-style rendering, including the implicit `$currentDate`.
    pub fn to_json(&self) -> Value {
        let mut sections: Map<String, Value> = Map::new();
        for op in &self.ops {
            let (section, path, value) = match op {
                UpdateOp::Set { path, value } => ("$set", path, value.clone()),
                UpdateOp::Unset { path } => ("$unset", path, Value::from("")),
                UpdateOp::Push { path, value } => ("$push", path, value.clone()),
                UpdateOp::PushAll { path, values } => ("$push", path, json!({ "$each": values })),
                UpdateOp::Pull { path, value } => ("$pull", path, value.clone()),
                UpdateOp::Inc { path, amount } => ("$inc", path, Value::from(*amount)),
            };
            if let Value::Object(entries) = sections
                .entry(section)
                .or_insert_with(|| Value::Object(Map::new()))
            {
                entries.insert(path.clone(), value);
            }
        }
        sections.insert(
            "$currentDate".to_string(),
            single(LAST_MODIFIED_FIELD, Value::Bool(true)),
        );
        Value::Object(sections)
    }
}

///
/// Sort
///

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Ordered sort keys; ties fall back to insertion order.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Sort {
    keys: Vec<(String, SortOrder)>,
}

impl Sort {
    pub fn ascending(path: impl Into<String>) -> Self {
        Self::default().then_ascending(path)
    }

    pub fn descending(path: impl Into<String>) -> Self {
        Self::default().then_descending(path)
    }

    pub fn then_ascending(mut self, path: impl Into<String>) -> Self {
        self.keys.push((path.into(), SortOrder::Ascending));
        self
    }

    pub fn then_descending(mut self, path: impl Into<String>) -> Self {
        self.keys.push((path.into(), SortOrder::Descending));
        self
    }

    pub fn keys(&self) -> &[(String, SortOrder)] {
        &self.keys
    }
}

/// Which state a find-and-modify returns.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum ReturnDocument {
    Before,
    #[default]
    After,
}

#[cfg(test)]
mod tests {
    use super::{FieldPath, Filter, Sort, SortOrder, Update};
    use serde_json::json;

    #[test]
    fn field_path_rejects_unsafe_segments() {
        assert!(FieldPath::parse("model.method").is_ok());
        assert!(FieldPath::parse("properties.electronic energy").is_ok());
        for bad in ["", "a..b", "a.", "$where", "a.$b", "a\"b", "a\\b"] {
            assert!(FieldPath::parse(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn json_path_quotes_every_segment() {
        let path = FieldPath::parse("results.structures").unwrap();
        assert_eq!(path.to_json_path(), "$.\"results\".\"structures\"");
    }

    #[test]
    fn and_collapses_trivial_clauses() {
        assert_eq!(Filter::and(Vec::new()), Filter::All);
        assert_eq!(
            Filter::and([Filter::All, Filter::eq("status", "new")]),
            Filter::eq("status", "new")
        );
        let combined = Filter::eq("a", 1) & Filter::eq("b", 2);
        assert!(matches!(combined, Filter::And(ref clauses) if clauses.len() == 2));
    }

    #[test]
    fn filter_renders_mongo_style_json() {
        let filter = Filter::and([
            Filter::eq("status", "new"),
            Filter::lte("priority", 10),
            Filter::not(Filter::exists("executor")),
        ]);
        assert_eq!(
            filter.to_json(),
            json!({ "$and": [
                { "status": "new" },
                { "priority": { "$lte": 10 } },
                { "$nor": [ { "executor": { "$exists": true } } ] }
            ]})
        );
    }

    #[test]
    fn case_insensitive_rendering_escapes_regex_metacharacters() {
        let rendered = Filter::eq_ignore_case("model.basis_set", "def2*").to_json();
        assert_eq!(rendered["model.basis_set"]["$regex"], json!("^def2\\*$"));
    }

    #[test]
    fn update_renders_sections_and_current_date() {
        let update = Update::new()
            .set("status", "pending")
            .push("structures", "abc")
            .unset("executor");
        let rendered = update.to_json();
        assert_eq!(rendered["$set"]["status"], json!("pending"));
        assert_eq!(rendered["$push"]["structures"], json!("abc"));
        assert!(rendered["$unset"].get("executor").is_some());
        assert_eq!(rendered["$currentDate"]["_lastmodified"], json!(true));
    }

    #[test]
    fn sort_keeps_key_order() {
        let sort = Sort::ascending("priority").then_descending("_created");
        assert_eq!(sort.keys()[0], ("priority".to_string(), SortOrder::Ascending));
        assert_eq!(sort.keys()[1].1, SortOrder::Descending);
    }
}
