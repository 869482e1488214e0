//! Typed field handles and the accessor tables built on them.
//!
//! # Responsibility
//! - Implement the has/get/set/clear (and add/remove) contract once per
//!   field shape: scalar, list, keyed mapping, keyed list.
//! - Generate per-kind accessor methods from declarative tables.
//!
//! # Invariants
//! - Each accessor is exactly one store call: a read projected to the
//!   field, or one atomic update touching only the field.
//! - Access and key checks run before the store is touched.
//! - An absent or `null` scalar is "not set"; `get` fails with `FieldNotSet`.

use crate::entity::object::{access, read, write, Entity};
use crate::error::{EntityError, EntityResult};
use crate::model::id::Identifier;
use crate::store::document::{get_dotted, values_equal};
use crate::store::filter::FieldPath;
use crate::store::Update;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::marker::PhantomData;

fn encode<E: Entity, T: Serialize>(field: &str, value: &T) -> EntityResult<Value> {
    serde_json::to_value(value)
        .map_err(|err| EntityError::invalid_data(E::KIND, field, None, err))
}

fn decode<E: Entity, T: DeserializeOwned>(
    field: &str,
    id: Identifier,
    value: Value,
) -> EntityResult<T> {
    serde_json::from_value(value)
        .map_err(|err| EntityError::invalid_data(E::KIND, field, Some(id), err))
}

/// Value at `path`, treating `null` as absent.
fn read_value<E: Entity>(entity: &E, path: &str) -> EntityResult<(Identifier, Option<Value>)> {
    let (id, document) = read(entity, &[path])?;
    let value = get_dotted(&document, path)
        .filter(|value| !value.is_null())
        .cloned();
    Ok((id, value))
}

/// `path.key`, rejecting keys that would address a nested field.
fn keyed_path<E: Entity>(path: &str, key: &str) -> EntityResult<String> {
    if key.contains('.') || FieldPath::parse(key).is_err() {
        return Err(EntityError::validation(
            E::KIND,
            path,
            format!("`{key}` is not a valid key"),
        ));
    }
    Ok(format!("{path}.{key}"))
}

fn as_array<E: Entity>(field: &str, id: Identifier, value: Option<Value>) -> EntityResult<Vec<Value>> {
    match value {
        None => Ok(Vec::new()),
        Some(Value::Array(items)) => Ok(items),
        Some(_) => Err(EntityError::FieldMismatch {
            kind: E::KIND,
            field: field.to_string(),
            id,
            message: "expected a list".to_string(),
        }),
    }
}

fn as_object<E: Entity>(
    field: &str,
    id: Identifier,
    value: Option<Value>,
) -> EntityResult<Map<String, Value>> {
    match value {
        None => Ok(Map::new()),
        Some(Value::Object(entries)) => Ok(entries),
        Some(_) => Err(EntityError::FieldMismatch {
            kind: E::KIND,
            field: field.to_string(),
            id,
            message: "expected a keyed mapping".to_string(),
        }),
    }
}

/// Optional scalar field at a dotted path.
pub struct Field<T> {
    path: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> Field<T> {
    pub const fn new(path: &'static str) -> Self {
        Self {
            path,
            _value: PhantomData,
        }
    }

    pub fn path(&self) -> &'static str {
        self.path
    }

    pub fn has<E: Entity>(&self, entity: &E) -> EntityResult<bool> {
        Ok(read_value(entity, self.path)?.1.is_some())
    }

    /// # Errors
    /// - `FieldNotSet` when the field is absent or `null`.
    pub fn get<E: Entity>(&self, entity: &E) -> EntityResult<T> {
        match read_value(entity, self.path)? {
            (id, Some(value)) => decode::<E, T>(self.path, id, value),
            (id, None) => Err(EntityError::FieldNotSet {
                kind: E::KIND,
                field: self.path.to_string(),
                id,
            }),
        }
    }

    pub fn get_opt<E: Entity>(&self, entity: &E) -> EntityResult<Option<T>> {
        match read_value(entity, self.path)? {
            (id, Some(value)) => decode::<E, T>(self.path, id, value).map(Some),
            (_, None) => Ok(None),
        }
    }

    pub fn set<E: Entity>(&self, entity: &E, value: &T) -> EntityResult<()> {
        access(entity)?;
        let value = encode::<E, T>(self.path, value)?;
        write(entity, &Update::new().set(self.path, value))
    }

    pub fn clear<E: Entity>(&self, entity: &E) -> EntityResult<()> {
        write(entity, &Update::new().unset(self.path))
    }
}

/// Ordered list field; absent reads as empty.
pub struct ListField<T> {
    path: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> ListField<T> {
    pub const fn new(path: &'static str) -> Self {
        Self {
            path,
            _value: PhantomData,
        }
    }

    pub fn count<E: Entity>(&self, entity: &E) -> EntityResult<usize> {
        let (id, value) = read_value(entity, self.path)?;
        Ok(as_array::<E>(self.path, id, value)?.len())
    }

    pub fn get<E: Entity>(&self, entity: &E) -> EntityResult<Vec<T>> {
        let (id, value) = read_value(entity, self.path)?;
        as_array::<E>(self.path, id, value)?
            .into_iter()
            .map(|item| decode::<E, T>(self.path, id, item))
            .collect()
    }

    /// Element at `index`, if the list is that long.
    pub fn get_at<E: Entity>(&self, entity: &E, index: usize) -> EntityResult<Option<T>> {
        let (id, value) = read_value(entity, self.path)?;
        as_array::<E>(self.path, id, value)?
            .into_iter()
            .nth(index)
            .map(|item| decode::<E, T>(self.path, id, item))
            .transpose()
    }

    pub fn contains<E: Entity>(&self, entity: &E, value: &T) -> EntityResult<bool> {
        access(entity)?;
        let needle = encode::<E, T>(self.path, value)?;
        let (id, stored) = read_value(entity, self.path)?;
        Ok(as_array::<E>(self.path, id, stored)?
            .iter()
            .any(|item| values_equal(item, &needle)))
    }

    pub fn set<E: Entity>(&self, entity: &E, values: &[T]) -> EntityResult<()> {
        access(entity)?;
        let values = values
            .iter()
            .map(|value| encode::<E, T>(self.path, value))
            .collect::<EntityResult<Vec<_>>>()?;
        write(entity, &Update::new().set(self.path, Value::Array(values)))
    }

    /// Appends one element.
    pub fn add<E: Entity>(&self, entity: &E, value: &T) -> EntityResult<()> {
        access(entity)?;
        let value = encode::<E, T>(self.path, value)?;
        write(entity, &Update::new().push(self.path, value))
    }

    /// Appends every element in order.
    pub fn extend<E: Entity>(&self, entity: &E, values: &[T]) -> EntityResult<()> {
        access(entity)?;
        let values = values
            .iter()
            .map(|value| encode::<E, T>(self.path, value))
            .collect::<EntityResult<Vec<_>>>()?;
        write(entity, &Update::new().push_all(self.path, values))
    }

    /// Removes every element equal to `value`.
    pub fn remove<E: Entity>(&self, entity: &E, value: &T) -> EntityResult<()> {
        access(entity)?;
        let value = encode::<E, T>(self.path, value)?;
        write(entity, &Update::new().pull(self.path, value))
    }

    pub fn clear<E: Entity>(&self, entity: &E) -> EntityResult<()> {
        write(entity, &Update::new().set(self.path, Value::Array(Vec::new())))
    }
}

/// Keyed mapping field: label → value.
pub struct MapField<T> {
    path: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> MapField<T> {
    pub const fn new(path: &'static str) -> Self {
        Self {
            path,
            _value: PhantomData,
        }
    }

    pub fn count<E: Entity>(&self, entity: &E) -> EntityResult<usize> {
        let (id, value) = read_value(entity, self.path)?;
        Ok(as_object::<E>(self.path, id, value)?.len())
    }

    pub fn has<E: Entity>(&self, entity: &E, key: &str) -> EntityResult<bool> {
        access(entity)?;
        let path = keyed_path::<E>(self.path, key)?;
        Ok(read_value(entity, &path)?.1.is_some())
    }

    /// # Errors
    /// - `FieldNotSet` naming `path.key` when the key is absent.
    pub fn get<E: Entity>(&self, entity: &E, key: &str) -> EntityResult<T> {
        access(entity)?;
        let path = keyed_path::<E>(self.path, key)?;
        match read_value(entity, &path)? {
            (id, Some(value)) => decode::<E, T>(&path, id, value),
            (id, None) => Err(EntityError::FieldNotSet {
                kind: E::KIND,
                field: path,
                id,
            }),
        }
    }

    pub fn set<E: Entity>(&self, entity: &E, key: &str, value: &T) -> EntityResult<()> {
        access(entity)?;
        let path = keyed_path::<E>(self.path, key)?;
        let value = encode::<E, T>(&path, value)?;
        write(entity, &Update::new().set(path, value))
    }

    pub fn remove<E: Entity>(&self, entity: &E, key: &str) -> EntityResult<()> {
        access(entity)?;
        let path = keyed_path::<E>(self.path, key)?;
        write(entity, &Update::new().unset(path))
    }

    pub fn get_all<E: Entity>(&self, entity: &E) -> EntityResult<BTreeMap<String, T>> {
        let (id, value) = read_value(entity, self.path)?;
        as_object::<E>(self.path, id, value)?
            .into_iter()
            .map(|(key, item)| Ok((key, decode::<E, T>(self.path, id, item)?)))
            .collect()
    }

    pub fn set_all<E: Entity>(&self, entity: &E, entries: &BTreeMap<String, T>) -> EntityResult<()> {
        access(entity)?;
        let mut encoded = Map::new();
        for (key, value) in entries {
            keyed_path::<E>(self.path, key)?;
            encoded.insert(key.clone(), encode::<E, T>(self.path, value)?);
        }
        write(entity, &Update::new().set(self.path, Value::Object(encoded)))
    }

    pub fn clear<E: Entity>(&self, entity: &E) -> EntityResult<()> {
        write(entity, &Update::new().set(self.path, Value::Object(Map::new())))
    }
}

/// Keyed mapping of ordered lists: label → `[T]`.
pub struct KeyedListField<T> {
    path: &'static str,
    _value: PhantomData<fn() -> T>,
}

impl<T: Serialize + DeserializeOwned> KeyedListField<T> {
    pub const fn new(path: &'static str) -> Self {
        Self {
            path,
            _value: PhantomData,
        }
    }

    /// Stored labels in key order.
    pub fn labels<E: Entity>(&self, entity: &E) -> EntityResult<Vec<String>> {
        let (id, value) = read_value(entity, self.path)?;
        Ok(as_object::<E>(self.path, id, value)?.into_iter().map(|(key, _)| key).collect())
    }

    pub fn get<E: Entity>(&self, entity: &E, key: &str) -> EntityResult<Vec<T>> {
        access(entity)?;
        let path = keyed_path::<E>(self.path, key)?;
        let (id, value) = read_value(entity, &path)?;
        as_array::<E>(&path, id, value)?
            .into_iter()
            .map(|item| decode::<E, T>(&path, id, item))
            .collect()
    }

    pub fn count<E: Entity>(&self, entity: &E, key: &str) -> EntityResult<usize> {
        access(entity)?;
        let path = keyed_path::<E>(self.path, key)?;
        let (id, value) = read_value(entity, &path)?;
        Ok(as_array::<E>(&path, id, value)?.len())
    }

    pub fn add<E: Entity>(&self, entity: &E, key: &str, value: &T) -> EntityResult<()> {
        access(entity)?;
        let path = keyed_path::<E>(self.path, key)?;
        let value = encode::<E, T>(&path, value)?;
        write(entity, &Update::new().push(path, value))
    }

    /// Removes every element equal to `value` under `key`.
    pub fn remove<E: Entity>(&self, entity: &E, key: &str, value: &T) -> EntityResult<()> {
        access(entity)?;
        let path = keyed_path::<E>(self.path, key)?;
        let value = encode::<E, T>(&path, value)?;
        write(entity, &Update::new().pull(path, value))
    }

    pub fn set<E: Entity>(&self, entity: &E, key: &str, values: &[T]) -> EntityResult<()> {
        access(entity)?;
        let path = keyed_path::<E>(self.path, key)?;
        let values = values
            .iter()
            .map(|value| encode::<E, T>(&path, value))
            .collect::<EntityResult<Vec<_>>>()?;
        write(entity, &Update::new().set(path, Value::Array(values)))
    }

    /// Removes the whole label.
    pub fn clear<E: Entity>(&self, entity: &E, key: &str) -> EntityResult<()> {
        access(entity)?;
        let path = keyed_path::<E>(self.path, key)?;
        write(entity, &Update::new().unset(path))
    }

    pub fn get_all<E: Entity>(&self, entity: &E) -> EntityResult<BTreeMap<String, Vec<T>>> {
        let (id, value) = read_value(entity, self.path)?;
        as_object::<E>(self.path, id, value)?
            .into_iter()
            .map(|(key, items)| {
                let values = as_array::<E>(self.path, id, Some(items))?
                    .into_iter()
                    .map(|item| decode::<E, T>(self.path, id, item))
                    .collect::<EntityResult<Vec<_>>>()?;
                Ok((key, values))
            })
            .collect()
    }

    pub fn set_all<E: Entity>(
        &self,
        entity: &E,
        entries: &BTreeMap<String, Vec<T>>,
    ) -> EntityResult<()> {
        access(entity)?;
        let mut encoded = Map::new();
        for (key, values) in entries {
            keyed_path::<E>(self.path, key)?;
            let values = values
                .iter()
                .map(|value| encode::<E, T>(self.path, value))
                .collect::<EntityResult<Vec<_>>>()?;
            encoded.insert(key.clone(), Value::Array(values));
        }
        write(entity, &Update::new().set(self.path, Value::Object(encoded)))
    }

    pub fn clear_all<E: Entity>(&self, entity: &E) -> EntityResult<()> {
        write(entity, &Update::new().set(self.path, Value::Object(Map::new())))
    }

    /// Whether `value` appears under any label.
    pub fn contains_anywhere<E: Entity>(&self, entity: &E, value: &T) -> EntityResult<bool> {
        access(entity)?;
        let needle = encode::<E, T>(self.path, value)?;
        let (id, stored) = read_value(entity, self.path)?;
        for (key, items) in as_object::<E>(self.path, id, stored)? {
            let items = as_array::<E>(&format!("{}.{key}", self.path), id, Some(items))?;
            if items.iter().any(|item| values_equal(item, &needle)) {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

/// Generates `has_/get_/set_/clear_` methods for optional scalar fields.
macro_rules! scalar_fields {
    ($entity:ident { $($fields:tt)* }) => {
        $crate::entity::field::scalar_fields!([] $entity { $($fields)* });
    };
    ([$($generics:tt)*] $entity:ty {
        $( $(#[$meta:meta])* $path:literal : $ty:ty => $has:ident, $get:ident, $set:ident, $clear:ident; )*
    }) => {
        impl<$($generics)*> $entity {
            $(
                $(#[$meta])*
                pub fn $has(&self) -> $crate::error::EntityResult<bool> {
                    $crate::entity::field::Field::<$ty>::new($path).has(self)
                }

                $(#[$meta])*
                pub fn $get(&self) -> $crate::error::EntityResult<$ty> {
                    $crate::entity::field::Field::<$ty>::new($path).get(self)
                }

                $(#[$meta])*
                pub fn $set(&self, value: impl Into<$ty>) -> $crate::error::EntityResult<()> {
                    $crate::entity::field::Field::<$ty>::new($path).set(self, &value.into())
                }

                $(#[$meta])*
                pub fn $clear(&self) -> $crate::error::EntityResult<()> {
                    $crate::entity::field::Field::<$ty>::new($path).clear(self)
                }
            )*
        }
    };
}

/// Generates count/get/set/add/remove/contains/clear methods for list fields.
macro_rules! list_fields {
    ($entity:ty {
        $( $path:literal : $ty:ty => $count:ident, $get:ident, $set:ident, $add:ident,
           $remove:ident, $contains:ident, $clear:ident; )*
    }) => {
        impl $entity {
            $(
                /// Number of stored elements.
                pub fn $count(&self) -> $crate::error::EntityResult<usize> {
                    $crate::entity::field::ListField::<$ty>::new($path).count(self)
                }

                pub fn $get(&self) -> $crate::error::EntityResult<Vec<$ty>> {
                    $crate::entity::field::ListField::<$ty>::new($path).get(self)
                }

                pub fn $set(&self, values: &[$ty]) -> $crate::error::EntityResult<()> {
                    $crate::entity::field::ListField::<$ty>::new($path).set(self, values)
                }

                pub fn $add(&self, value: $ty) -> $crate::error::EntityResult<()> {
                    $crate::entity::field::ListField::<$ty>::new($path).add(self, &value)
                }

                /// Removes every occurrence.
                pub fn $remove(&self, value: $ty) -> $crate::error::EntityResult<()> {
                    $crate::entity::field::ListField::<$ty>::new($path).remove(self, &value)
                }

                pub fn $contains(&self, value: $ty) -> $crate::error::EntityResult<bool> {
                    $crate::entity::field::ListField::<$ty>::new($path).contains(self, &value)
                }

                pub fn $clear(&self) -> $crate::error::EntityResult<()> {
                    $crate::entity::field::ListField::<$ty>::new($path).clear(self)
                }
            )*
        }
    };
}

/// Generates count/has/get/set/remove and bulk methods for keyed mappings.
macro_rules! map_fields {
    ($entity:ty {
        $( $path:literal : $ty:ty => $count:ident, $has:ident, $get:ident, $set:ident,
           $remove:ident, $get_all:ident, $set_all:ident, $clear:ident; )*
    }) => {
        impl $entity {
            $(
                /// Number of stored keys.
                pub fn $count(&self) -> $crate::error::EntityResult<usize> {
                    $crate::entity::field::MapField::<$ty>::new($path).count(self)
                }

                pub fn $has(&self, key: &str) -> $crate::error::EntityResult<bool> {
                    $crate::entity::field::MapField::<$ty>::new($path).has(self, key)
                }

                pub fn $get(&self, key: &str) -> $crate::error::EntityResult<$ty> {
                    $crate::entity::field::MapField::<$ty>::new($path).get(self, key)
                }

                pub fn $set(&self, key: &str, value: impl Into<$ty>) -> $crate::error::EntityResult<()> {
                    $crate::entity::field::MapField::<$ty>::new($path).set(self, key, &value.into())
                }

                pub fn $remove(&self, key: &str) -> $crate::error::EntityResult<()> {
                    $crate::entity::field::MapField::<$ty>::new($path).remove(self, key)
                }

                pub fn $get_all(
                    &self,
                ) -> $crate::error::EntityResult<std::collections::BTreeMap<String, $ty>> {
                    $crate::entity::field::MapField::<$ty>::new($path).get_all(self)
                }

                pub fn $set_all(
                    &self,
                    entries: &std::collections::BTreeMap<String, $ty>,
                ) -> $crate::error::EntityResult<()> {
                    $crate::entity::field::MapField::<$ty>::new($path).set_all(self, entries)
                }

                pub fn $clear(&self) -> $crate::error::EntityResult<()> {
                    $crate::entity::field::MapField::<$ty>::new($path).clear(self)
                }
            )*
        }
    };
}

pub(crate) use {list_fields, map_fields, scalar_fields};
