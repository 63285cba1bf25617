/// Query filters
///
/// Filters are Mongo-style query documents. Keys are (dotted) field paths,
/// values are either a literal for equality or an operator document such as
/// `{"$in": [...]}`. The `_id` field is always compared by its string key so
/// that the identifiers recorded in the cache can be used to re-fetch bodies.

use crate::error::{CacheError, CacheResult};
use crate::types::{id_key, Document, ID_FIELD};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Mongo-style query document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Filter(Document);

/// Comparison operator of a single clause
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Eq,
    Ne,
    In,
    Nin,
    Gt,
    Gte,
    Lt,
    Lte,
    Exists,
}

impl Operator {
    fn parse(name: &str) -> CacheResult<Self> {
        Ok(match name {
            "$eq" => Operator::Eq,
            "$ne" => Operator::Ne,
            "$in" => Operator::In,
            "$nin" => Operator::Nin,
            "$gt" => Operator::Gt,
            "$gte" => Operator::Gte,
            "$lt" => Operator::Lt,
            "$lte" => Operator::Lte,
            "$exists" => Operator::Exists,
            other => return Err(CacheError::InvalidFilter(format!("unsupported operator {}", other))),
        })
    }
}

/// One validated predicate on a field path
#[derive(Debug, Clone, PartialEq)]
pub struct Clause {
    pub path: String,
    pub op: Operator,
    pub value: Value,
}

impl Clause {
    /// Whether the clause targets the document identifier
    pub fn is_id(&self) -> bool {
        self.path == ID_FIELD
    }

    /// Path split into its segments
    pub fn segments(&self) -> Vec<String> {
        self.path.split('.').map(str::to_string).collect()
    }
}

impl Filter {
    /// Empty filter matching every document
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a filter from a JSON object
    pub fn from_value(value: Value) -> CacheResult<Self> {
        match value {
            Value::Object(map) => {
                let filter = Filter(map);
                filter.clauses()?;
                Ok(filter)
            }
            other => Err(CacheError::InvalidFilter(format!("filter must be an object, got {}", other))),
        }
    }

    /// Filter selecting exactly the given identifiers
    pub fn by_ids(ids: &[String]) -> Self {
        Self::new().is_in(ID_FIELD, ids.iter().cloned())
    }

    /// Equality on a field path
    pub fn eq(mut self, path: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(path.into(), value.into());
        self
    }

    /// Membership on a field path
    pub fn is_in<V: Into<Value>>(self, path: impl Into<String>, values: impl IntoIterator<Item = V>) -> Self {
        let values: Vec<Value> = values.into_iter().map(Into::into).collect();
        self.with_operator(path, "$in", Value::Array(values))
    }

    /// Add an operator clause, merging with operators already set on the path
    pub fn with_operator(mut self, path: impl Into<String>, op: &str, value: impl Into<Value>) -> Self {
        let path = path.into();
        let mut ops = match self.0.remove(&path) {
            Some(Value::Object(ops)) if is_operator_map(&ops) => ops,
            Some(literal) => {
                let mut ops = Map::new();
                ops.insert("$eq".to_string(), literal);
                ops
            }
            None => Map::new(),
        };
        ops.insert(op.to_string(), value.into());
        self.0.insert(path, Value::Object(ops));
        self
    }

    /// Raw query document
    pub fn as_document(&self) -> &Document {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parse the query document into validated clauses
    pub fn clauses(&self) -> CacheResult<Vec<Clause>> {
        let mut clauses = Vec::new();
        for (path, value) in &self.0 {
            if path.is_empty() || path.starts_with('$') {
                return Err(CacheError::InvalidFilter(format!("unsupported field path {:?}", path)));
            }

            if !is_operator_document(value) {
                clauses.push(Clause {
                    path: path.clone(),
                    op: Operator::Eq,
                    value: value.clone(),
                });
                continue;
            }

            if let Value::Object(ops) = value {
                for (name, operand) in ops {
                    let op = Operator::parse(name)?;
                    match op {
                        Operator::In | Operator::Nin if !operand.is_array() => {
                            return Err(CacheError::InvalidFilter(format!("{} on {} expects an array", name, path)));
                        }
                        Operator::Exists if !operand.is_boolean() => {
                            return Err(CacheError::InvalidFilter(format!("$exists on {} expects a boolean", path)));
                        }
                        _ => {}
                    }
                    clauses.push(Clause {
                        path: path.clone(),
                        op,
                        value: operand.clone(),
                    });
                }
            }
        }
        Ok(clauses)
    }

    /// Evaluate the filter against a document
    pub fn matches(&self, doc: &Document) -> CacheResult<bool> {
        for clause in self.clauses()? {
            if !clause_matches(&clause, doc) {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn is_operator_document(value: &Value) -> bool {
    match value {
        Value::Object(map) => is_operator_map(map),
        _ => false,
    }
}

fn is_operator_map(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.starts_with('$') && k != "$oid")
}

/// Resolve a dotted path inside a document
pub fn lookup<'a>(doc: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let mut current = doc.get(segments.next()?)?;
    for segment in segments {
        current = current.as_object()?.get(segment)?;
    }
    Some(current)
}

fn clause_matches(clause: &Clause, doc: &Document) -> bool {
    let field = lookup(doc, &clause.path);
    if clause.is_id() {
        return id_clause_matches(clause, field);
    }

    match clause.op {
        Operator::Eq => field.is_some_and(|f| values_equal(f, &clause.value)),
        Operator::Ne => !field.is_some_and(|f| values_equal(f, &clause.value)),
        Operator::In => field.is_some_and(|f| in_list(f, &clause.value)),
        Operator::Nin => !field.is_some_and(|f| in_list(f, &clause.value)),
        Operator::Gt => compare(field, &clause.value) == Some(Ordering::Greater),
        Operator::Gte => matches!(compare(field, &clause.value), Some(Ordering::Greater | Ordering::Equal)),
        Operator::Lt => compare(field, &clause.value) == Some(Ordering::Less),
        Operator::Lte => matches!(compare(field, &clause.value), Some(Ordering::Less | Ordering::Equal)),
        Operator::Exists => field.is_some() == clause.value.as_bool().unwrap_or(true),
    }
}

fn id_clause_matches(clause: &Clause, field: Option<&Value>) -> bool {
    let key = field.and_then(id_key);
    let operand_keys = || -> Vec<String> {
        clause
            .value
            .as_array()
            .map(|values| values.iter().filter_map(id_key).collect())
            .unwrap_or_default()
    };

    match clause.op {
        Operator::Eq => key.is_some() && key == id_key(&clause.value),
        Operator::Ne => key.is_none() || key != id_key(&clause.value),
        Operator::In => key.is_some_and(|k| operand_keys().contains(&k)),
        Operator::Nin => !key.is_some_and(|k| operand_keys().contains(&k)),
        Operator::Exists => key.is_some() == clause.value.as_bool().unwrap_or(true),
        Operator::Gt | Operator::Gte | Operator::Lt | Operator::Lte => {
            let (Some(k), Some(operand)) = (key, id_key(&clause.value)) else {
                return false;
            };
            let ordering = k.cmp(&operand);
            match clause.op {
                Operator::Gt => ordering == Ordering::Greater,
                Operator::Gte => ordering != Ordering::Less,
                Operator::Lt => ordering == Ordering::Less,
                _ => ordering != Ordering::Greater,
            }
        }
    }
}

/// Equality with array-element matching for scalar operands
fn values_equal(field: &Value, operand: &Value) -> bool {
    if same_value(field, operand) {
        return true;
    }
    match (field, operand) {
        (Value::Array(items), operand) if !operand.is_array() => items.iter().any(|item| same_value(item, operand)),
        _ => false,
    }
}

fn same_value(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

fn in_list(field: &Value, list: &Value) -> bool {
    list.as_array()
        .is_some_and(|items| items.iter().any(|item| values_equal(field, item)))
}

fn compare(field: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (field?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn type_rank(value: Option<&Value>) -> u8 {
    match value {
        None | Some(Value::Null) => 0,
        Some(Value::Number(_)) => 1,
        Some(Value::String(_)) => 2,
        Some(Value::Object(_)) => 3,
        Some(Value::Array(_)) => 4,
        Some(Value::Bool(_)) => 5,
    }
}

/// Total order used when sorting documents by a field.
///
/// Values of different types are ordered null < number < string < object <
/// array < bool; values of the same type compare naturally.
pub fn sort_order(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    let rank = type_rank(a).cmp(&type_rank(b));
    if rank != Ordering::Equal {
        return rank;
    }
    match (a, b) {
        (Some(x), Some(y)) => compare(Some(x), y).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}
