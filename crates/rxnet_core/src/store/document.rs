//! In-process document manipulation: path access, projection, updates.
//!
//! # Invariants
//! - Updates either apply completely or leave the document untouched.
//! - `Set` creates missing intermediate objects; writing through a
//!   non-object intermediate fails with `InvalidUpdate`.

use crate::store::filter::{FieldPath, Update, UpdateOp};
use crate::store::{Document, Projection, StoreError, StoreResult, ID_FIELD};
use serde_json::{Map, Value};

/// Value at `path`, if every segment resolves.
pub fn get_path<'a>(document: &'a Document, path: &FieldPath) -> Option<&'a Value> {
    let (last, parents) = path.segments().split_last()?;
    let mut current = document;
    for segment in parents {
        current = current.get(segment)?.as_object()?;
    }
    current.get(last)
}

/// Reads a dotted path without validation; used on trusted internal paths.
pub fn get_dotted<'a>(document: &'a Document, path: &str) -> Option<&'a Value> {
    let mut segments = path.split('.');
    let first = segments.next()?;
    segments.try_fold(document.get(first)?, |value, segment| {
        value.as_object()?.get(segment)
    })
}

fn parent_mut<'a>(
    document: &'a mut Document,
    path: &FieldPath,
    create: bool,
) -> StoreResult<Option<&'a mut Map<String, Value>>> {
    let Some((_, parents)) = path.segments().split_last() else {
        return Ok(None);
    };
    let mut current = document;
    for segment in parents {
        if !current.contains_key(segment) {
            if !create {
                return Ok(None);
            }
            current.insert(segment.clone(), Value::Object(Map::new()));
        }
        current = match current.get_mut(segment) {
            Some(Value::Object(next)) => next,
            Some(_) => {
                return Err(StoreError::InvalidUpdate(format!(
                    "`{path}` traverses a non-object value at `{segment}`"
                )))
            }
            None => return Ok(None),
        };
    }
    Ok(Some(current))
}

fn leaf(path: &FieldPath) -> &str {
    path.segments().last().map_or("", String::as_str)
}

/// Sets `path` to `value`, creating intermediate objects.
pub fn set_path(document: &mut Document, path: &FieldPath, value: Value) -> StoreResult<()> {
    if let Some(parent) = parent_mut(document, path, true)? {
        parent.insert(leaf(path).to_string(), value);
    }
    Ok(())
}

/// Removes `path`; returns the removed value.
pub fn remove_path(document: &mut Document, path: &FieldPath) -> StoreResult<Option<Value>> {
    Ok(parent_mut(document, path, false)?.and_then(|parent| parent.remove(leaf(path))))
}

fn array_at<'a>(document: &'a mut Document, path: &FieldPath) -> StoreResult<&'a mut Vec<Value>> {
    let parent = parent_mut(document, path, true)?.ok_or_else(|| {
        StoreError::InvalidUpdate(format!("`{path}` cannot hold an array"))
    })?;
    let slot = parent
        .entry(leaf(path).to_string())
        .or_insert_with(|| Value::Array(Vec::new()));
    match slot {
        Value::Array(items) => Ok(items),
        _ => Err(StoreError::InvalidUpdate(format!("`{path}` is not an array"))),
    }
}

/// Array-element match used by `Pull`: objects match when the element holds
/// every key of `pattern` with an equal value.
fn pull_matches(element: &Value, pattern: &Value) -> bool {
    match (element, pattern) {
        (Value::Object(element), Value::Object(pattern)) => pattern
            .iter()
            .all(|(key, expected)| element.get(key) == Some(expected)),
        _ => values_equal(element, pattern),
    }
}

/// Type-exact equality; numbers compare numerically.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Number(left), Value::Number(right)) => left.as_f64() == right.as_f64(),
        _ => left == right,
    }
}

/// Applies every operation of `update` to a copy and commits on success.
pub fn apply_update(document: &mut Document, update: &Update) -> StoreResult<()> {
    let mut working = document.clone();
    for op in update.ops() {
        match op {
            UpdateOp::Set { path, value } => {
                set_path(&mut working, &writable(path)?, value.clone())?;
            }
            UpdateOp::Unset { path } => {
                remove_path(&mut working, &writable(path)?)?;
            }
            UpdateOp::Push { path, value } => {
                array_at(&mut working, &writable(path)?)?.push(value.clone());
            }
            UpdateOp::PushAll { path, values } => {
                array_at(&mut working, &writable(path)?)?.extend(values.iter().cloned());
            }
            UpdateOp::Pull { path, value } => {
                let path = writable(path)?;
                if get_path(&working, &path).is_some() {
                    array_at(&mut working, &path)?.retain(|element| !pull_matches(element, value));
                }
            }
            UpdateOp::Inc { path, amount } => {
                let path = writable(path)?;
                let next = match get_path(&working, &path) {
                    None => Value::from(*amount),
                    Some(Value::Number(number)) => match number.as_i64() {
                        Some(current) => Value::from(current.saturating_add(*amount)),
                        None => Value::from(number.as_f64().unwrap_or(0.0) + *amount as f64),
                    },
                    Some(_) => {
                        return Err(StoreError::InvalidUpdate(format!(
                            "`{path}` is not numeric"
                        )))
                    }
                };
                set_path(&mut working, &path, next)?;
            }
        }
    }
    *document = working;
    Ok(())
}

fn writable(path: &str) -> StoreResult<FieldPath> {
    let parsed = FieldPath::parse(path)?;
    if parsed.segments().first().is_some_and(|first| first == ID_FIELD) {
        return Err(StoreError::InvalidUpdate("`_id` is immutable".to_string()));
    }
    Ok(parsed)
}

/// Restricts `document` to the projected paths plus `_id`.
pub fn project(document: Document, projection: &Projection) -> StoreResult<Document> {
    let Projection::Fields(fields) = projection else {
        return Ok(document);
    };
    let mut projected = Document::new();
    if let Some(id) = document.get(ID_FIELD) {
        projected.insert(ID_FIELD.to_string(), id.clone());
    }
    for field in fields {
        let path = FieldPath::parse(field)?;
        if let Some(value) = get_path(&document, &path) {
            set_path(&mut projected, &path, value.clone())?;
        }
    }
    Ok(projected)
}
