//! Property family: computed observables with a typed payload.
//!
//! # Responsibility
//! - Share one accessor set (name, model, back-references, comment) across
//!   every payload kind.
//! - Encode each payload kind into its `data`/shape fields.
//!
//! # Invariants
//! - Every property document carries `_propertytype`; typed handles only
//!   ever resolve documents of their own payload kind.
//! - A payload is written in one atomic update together with its shape.

use crate::entity::field::{scalar_fields, Field};
use crate::entity::object::{access, base_document, create, entity_kind, read, write, Entity, Object};
use crate::entity::PROPERTY_TYPE_FIELD;
use crate::error::{EntityError, EntityResult};
use crate::model::descriptor::ModelDescriptor;
use crate::model::id::Identifier;
use crate::model::layout::EntityKind;
use crate::model::payload::{DenseMatrix, SparseMatrix};
use crate::repo::CollectionHandle;
use crate::store::{Document, Filter, Update, OBJECT_TYPE_FIELD};
use serde_json::{Map, Value};
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;

const DATA: &str = "data";
const ROWS: &str = "rows";
const COLS: &str = "cols";
const SIZE: &str = "size";

/// Payload kind of a property.
pub trait PropertyKind: 'static {
    type Data;

    /// Persisted `_propertytype` spelling.
    const PROPERTY_TYPE: &'static str;

    /// Fields holding the payload and its shape.
    const DATA_FIELDS: &'static [&'static str];

    fn encode(data: &Self::Data) -> Result<Map<String, Value>, String>;
    fn decode(document: &Document) -> Result<Self::Data, String>;
}

fn data_only(value: Value) -> Map<String, Value> {
    let mut fields = Map::new();
    fields.insert(DATA.to_string(), value);
    fields
}

fn field<'a>(document: &'a Document, name: &str) -> Result<&'a Value, String> {
    document.get(name).ok_or_else(|| format!("`{name}` is missing"))
}

fn usize_field(document: &Document, name: &str) -> Result<usize, String> {
    field(document, name)?
        .as_u64()
        .and_then(|value| usize::try_from(value).ok())
        .ok_or_else(|| format!("`{name}` is not a size"))
}

fn typed<T: serde::de::DeserializeOwned>(value: &Value, name: &str) -> Result<T, String> {
    serde_json::from_value(value.clone()).map_err(|err| format!("`{name}`: {err}"))
}

pub struct NumberKind;
pub struct BoolKind;
pub struct StringKind;
pub struct VectorKind;
pub struct DenseMatrixKind;
pub struct SparseMatrixKind;

impl PropertyKind for NumberKind {
    type Data = f64;
    const PROPERTY_TYPE: &'static str = "number_property";
    const DATA_FIELDS: &'static [&'static str] = &[DATA];

    fn encode(data: &f64) -> Result<Map<String, Value>, String> {
        if !data.is_finite() {
            return Err("number must be finite".to_string());
        }
        Ok(data_only(Value::from(*data)))
    }

    fn decode(document: &Document) -> Result<f64, String> {
        field(document, DATA)?
            .as_f64()
            .ok_or_else(|| "`data` is not a number".to_string())
    }
}

impl PropertyKind for BoolKind {
    type Data = bool;
    const PROPERTY_TYPE: &'static str = "bool_property";
    const DATA_FIELDS: &'static [&'static str] = &[DATA];

    fn encode(data: &bool) -> Result<Map<String, Value>, String> {
        Ok(data_only(Value::Bool(*data)))
    }

    fn decode(document: &Document) -> Result<bool, String> {
        field(document, DATA)?
            .as_bool()
            .ok_or_else(|| "`data` is not a boolean".to_string())
    }
}

impl PropertyKind for StringKind {
    type Data = String;
    const PROPERTY_TYPE: &'static str = "string_property";
    const DATA_FIELDS: &'static [&'static str] = &[DATA];

    fn encode(data: &String) -> Result<Map<String, Value>, String> {
        Ok(data_only(Value::String(data.clone())))
    }

    fn decode(document: &Document) -> Result<String, String> {
        typed(field(document, DATA)?, DATA)
    }
}

impl PropertyKind for VectorKind {
    type Data = Vec<f64>;
    const PROPERTY_TYPE: &'static str = "vector_property";
    const DATA_FIELDS: &'static [&'static str] = &[DATA, SIZE];

    fn encode(data: &Vec<f64>) -> Result<Map<String, Value>, String> {
        let mut fields = data_only(Value::from(data.clone()));
        fields.insert(SIZE.to_string(), Value::from(data.len()));
        Ok(fields)
    }

    fn decode(document: &Document) -> Result<Vec<f64>, String> {
        let data: Vec<f64> = typed(field(document, DATA)?, DATA)?;
        if data.len() != usize_field(document, SIZE)? {
            return Err("`size` disagrees with `data`".to_string());
        }
        Ok(data)
    }
}

impl PropertyKind for DenseMatrixKind {
    type Data = DenseMatrix;
    const PROPERTY_TYPE: &'static str = "dense_matrix_property";
    const DATA_FIELDS: &'static [&'static str] = &[DATA, ROWS, COLS];

    fn encode(data: &DenseMatrix) -> Result<Map<String, Value>, String> {
        let mut fields = data_only(Value::from(data.data.clone()));
        fields.insert(ROWS.to_string(), Value::from(data.rows));
        fields.insert(COLS.to_string(), Value::from(data.cols));
        Ok(fields)
    }

    fn decode(document: &Document) -> Result<DenseMatrix, String> {
        let rows = usize_field(document, ROWS)?;
        let cols = usize_field(document, COLS)?;
        let data: Vec<f64> = typed(field(document, DATA)?, DATA)?;
        DenseMatrix::new(rows, cols, data)
            .ok_or_else(|| format!("`data` does not hold {rows}x{cols} values"))
    }
}

impl PropertyKind for SparseMatrixKind {
    type Data = SparseMatrix;
    const PROPERTY_TYPE: &'static str = "sparse_matrix_property";
    const DATA_FIELDS: &'static [&'static str] = &[DATA, ROWS, COLS, SIZE];

    fn encode(data: &SparseMatrix) -> Result<Map<String, Value>, String> {
        if !data.is_consistent() {
            return Err("sparse matrix indices are inconsistent".to_string());
        }
        let mut triplets = Map::new();
        triplets.insert("row_idxs".to_string(), Value::from(data.row_idxs.clone()));
        triplets.insert("col_idxs".to_string(), Value::from(data.col_idxs.clone()));
        triplets.insert("values".to_string(), Value::from(data.values.clone()));
        let mut fields = data_only(Value::Object(triplets));
        fields.insert(ROWS.to_string(), Value::from(data.rows));
        fields.insert(COLS.to_string(), Value::from(data.cols));
        fields.insert(SIZE.to_string(), Value::from(data.non_zeros()));
        Ok(fields)
    }

    fn decode(document: &Document) -> Result<SparseMatrix, String> {
        let triplets = field(document, DATA)?
            .as_object()
            .ok_or_else(|| "`data` is not an object".to_string())?;
        let part = |name: &str| {
            triplets
                .get(name)
                .ok_or_else(|| format!("`data.{name}` is missing"))
        };
        let matrix = SparseMatrix {
            rows: usize_field(document, ROWS)?,
            cols: usize_field(document, COLS)?,
            row_idxs: typed(part("row_idxs")?, "data.row_idxs")?,
            col_idxs: typed(part("col_idxs")?, "data.col_idxs")?,
            values: typed(part("values")?, "data.values")?,
        };
        if !matrix.is_consistent() || matrix.non_zeros() != usize_field(document, SIZE)? {
            return Err("sparse matrix triplets are inconsistent".to_string());
        }
        Ok(matrix)
    }
}

/// Handle to a property of payload kind `K`.
pub struct TypedProperty<K> {
    object: Object,
    _kind: PhantomData<fn() -> K>,
}

pub type NumberProperty = TypedProperty<NumberKind>;
pub type BoolProperty = TypedProperty<BoolKind>;
pub type StringProperty = TypedProperty<StringKind>;
pub type VectorProperty = TypedProperty<VectorKind>;
pub type DenseMatrixProperty = TypedProperty<DenseMatrixKind>;
pub type SparseMatrixProperty = TypedProperty<SparseMatrixKind>;

impl<K> Clone for TypedProperty<K> {
    fn clone(&self) -> Self {
        Self {
            object: self.object.clone(),
            _kind: PhantomData,
        }
    }
}

impl<K> Default for TypedProperty<K> {
    fn default() -> Self {
        Self {
            object: Object::default(),
            _kind: PhantomData,
        }
    }
}

impl<K: PropertyKind> Debug for TypedProperty<K> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TypedProperty")
            .field("property_type", &K::PROPERTY_TYPE)
            .field("object", &self.object)
            .finish()
    }
}

impl<K: PropertyKind> Entity for TypedProperty<K> {
    const KIND: EntityKind = EntityKind::Property;

    fn from_object(object: Object) -> Self {
        Self {
            object,
            _kind: PhantomData,
        }
    }

    fn object(&self) -> &Object {
        &self.object
    }

    fn object_mut(&mut self) -> &mut Object {
        &mut self.object
    }

    fn kind_filter() -> Filter {
        Filter::and([
            Filter::eq(OBJECT_TYPE_FIELD, EntityKind::Property.as_str()),
            Filter::eq(PROPERTY_TYPE_FIELD, K::PROPERTY_TYPE),
        ])
    }

    fn matches_kind(document: &Document) -> bool {
        Property::matches_kind(document)
            && document.get(PROPERTY_TYPE_FIELD).and_then(Value::as_str) == Some(K::PROPERTY_TYPE)
    }
}

impl<K: PropertyKind> TypedProperty<K> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn linked(id: Identifier, collection: CollectionHandle) -> Self {
        Self::from_object(Object::new(Some(id), Some(collection)))
    }

    pub fn in_collection(collection: CollectionHandle) -> Self {
        Self::from_object(Object::new(None, Some(collection)))
    }

    /// Creates the property document; payload shape errors fail with
    /// `Validation` before the store is touched.
    pub fn create(
        &mut self,
        property_name: &str,
        model: &ModelDescriptor,
        data: &K::Data,
        structure: Option<Identifier>,
        calculation: Option<Identifier>,
    ) -> EntityResult<Identifier> {
        let payload = K::encode(data)
            .map_err(|message| EntityError::validation(Self::KIND, DATA, message))?;
        let mut document = base_document(Self::KIND);
        document.insert(PROPERTY_TYPE_FIELD.to_string(), Value::from(K::PROPERTY_TYPE));
        document.insert("property_name".to_string(), Value::from(property_name));
        document.insert(
            "model".to_string(),
            serde_json::to_value(model)
                .map_err(|err| EntityError::invalid_data(Self::KIND, "model", None, err))?,
        );
        if let Some(structure) = structure {
            document.insert("structure".to_string(), Value::from(structure));
        }
        if let Some(calculation) = calculation {
            document.insert("calculation".to_string(), Value::from(calculation));
        }
        document.extend(payload);
        create(self, document)
    }

    pub fn make(
        property_name: &str,
        model: &ModelDescriptor,
        data: &K::Data,
        structure: Option<Identifier>,
        calculation: Option<Identifier>,
        collection: CollectionHandle,
    ) -> EntityResult<Self> {
        let mut property = Self::in_collection(collection);
        property.create(property_name, model, data, structure, calculation)?;
        Ok(property)
    }

    /// Payload, decoded and shape-checked.
    pub fn get_data(&self) -> EntityResult<K::Data> {
        let (id, document) = read(self, K::DATA_FIELDS)?;
        if document.get(DATA).map_or(true, Value::is_null) {
            return Err(EntityError::FieldNotSet {
                kind: Self::KIND,
                field: DATA.to_string(),
                id,
            });
        }
        K::decode(&document).map_err(|message| EntityError::FieldMismatch {
            kind: Self::KIND,
            field: DATA.to_string(),
            id,
            message,
        })
    }

    /// Replaces payload and shape fields in one update.
    pub fn set_data(&self, data: &K::Data) -> EntityResult<()> {
        access(self)?;
        let payload = K::encode(data)
            .map_err(|message| EntityError::validation(Self::KIND, DATA, message))?;
        let update = payload
            .into_iter()
            .fold(Update::new(), |update, (field, value)| update.set(field, value));
        write(self, &update)
    }

    /// Untyped view of the same document.
    pub fn as_property(&self) -> Property {
        Property::from_object(self.object.clone())
    }
}

entity_kind!(
    /// Property handle of unknown payload kind.
    Property => EntityKind::Property
);

impl Property {
    /// Persisted `_propertytype`.
    pub fn get_property_type(&self) -> EntityResult<String> {
        Field::<String>::new(PROPERTY_TYPE_FIELD).get(self)
    }

    /// Whether the stored payload is of kind `P`.
    pub fn is_of_type<P: PropertyKind>(&self) -> EntityResult<bool> {
        Ok(self.get_property_type()? == P::PROPERTY_TYPE)
    }

    /// Typed view; `ObjectTypeMismatch` when the payload kind differs.
    pub fn typed<P: PropertyKind>(&self) -> EntityResult<TypedProperty<P>> {
        let (id, document) = read(self, &[OBJECT_TYPE_FIELD, PROPERTY_TYPE_FIELD])?;
        if !TypedProperty::<P>::matches_kind(&document) {
            let found = document
                .get(PROPERTY_TYPE_FIELD)
                .and_then(Value::as_str)
                .unwrap_or("<untyped>")
                .to_string();
            return Err(EntityError::ObjectTypeMismatch {
                expected: Self::KIND,
                found,
                id,
            });
        }
        Ok(TypedProperty::from_object(self.object.clone()))
    }
}

scalar_fields!(Property {
    "property_name": String => has_property_name, get_property_name, set_property_name, clear_property_name;
    "model": ModelDescriptor => has_model, get_model, set_model, clear_model;
    "structure": Identifier => has_structure, get_structure, set_structure, clear_structure;
    "calculation": Identifier => has_calculation, get_calculation, set_calculation, clear_calculation;
    "comment": String => has_comment, get_comment, set_comment, clear_comment;
});

scalar_fields!([K: PropertyKind] TypedProperty<K> {
    "property_name": String => has_property_name, get_property_name, set_property_name, clear_property_name;
    "model": ModelDescriptor => has_model, get_model, set_model, clear_model;
    "structure": Identifier => has_structure, get_structure, set_structure, clear_structure;
    "calculation": Identifier => has_calculation, get_calculation, set_calculation, clear_calculation;
    "comment": String => has_comment, get_comment, set_comment, clear_comment;
});

#[cfg(test)]
mod tests {
    use super::{
        DenseMatrixProperty, NumberKind, NumberProperty, Property, SparseMatrixProperty,
        StringProperty, VectorKind, VectorProperty,
    };
    use crate::entity::Entity;
    use crate::error::EntityError;
    use crate::model::descriptor::ModelDescriptor;
    use crate::model::id::Identifier;
    use crate::model::payload::{DenseMatrix, SparseMatrix};
    use crate::repo::{Collection, CollectionHandle};
    use crate::store::{SqliteStore, Store};
    use std::sync::Arc;

    fn properties() -> CollectionHandle {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_collection("properties").unwrap();
        Collection::new("properties", Arc::new(store), 10)
    }

    fn pbe() -> ModelDescriptor {
        ModelDescriptor::new("dft", "pbe", "def2-svp")
    }

    #[test]
    fn number_property_round_trips_payload_and_back_references() {
        let structure = Identifier::generate();
        let energy = NumberProperty::make(
            "electronic_energy",
            &pbe(),
            &-76.25,
            Some(structure),
            None,
            properties(),
        )
        .unwrap();
        assert_eq!(energy.get_data().unwrap(), -76.25);
        assert_eq!(energy.get_structure().unwrap(), structure);
        assert!(!energy.has_calculation().unwrap());
        energy.set_data(&-76.5).unwrap();
        assert_eq!(energy.get_data().unwrap(), -76.5);
        assert_eq!(energy.get_property_name().unwrap(), "electronic_energy");
    }

    #[test]
    fn typed_lookup_rejects_other_payload_kinds() {
        let collection = properties();
        let text = StringProperty::make("note", &pbe(), &"x".to_string(), None, None, collection.clone())
            .unwrap();
        let id = text.id().unwrap();

        assert!(matches!(
            collection.fetch::<NumberProperty>(id).unwrap_err(),
            EntityError::ObjectTypeMismatch { .. }
        ));
        let untyped: Property = collection.fetch(id).unwrap();
        assert!(!untyped.is_of_type::<NumberKind>().unwrap());
        assert_eq!(untyped.get_property_type().unwrap(), "string_property");
        assert!(untyped.typed::<VectorKind>().is_err());
    }

    #[test]
    fn matrices_persist_shape_alongside_data() {
        let collection = properties();
        let dense = DenseMatrix::new(2, 3, vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let property =
            DenseMatrixProperty::make("hessian", &pbe(), &dense, None, None, collection.clone())
                .unwrap();
        assert_eq!(property.get_data().unwrap(), dense);

        let sparse = SparseMatrix::from_triplets(3, 3, &[(0, 0, 1.0), (2, 1, -0.5)]).unwrap();
        let property =
            SparseMatrixProperty::make("overlap", &pbe(), &sparse, None, None, collection.clone())
                .unwrap();
        assert_eq!(property.get_data().unwrap(), sparse);

        let vector =
            VectorProperty::make("charges", &pbe(), &vec![0.25, -0.5], None, None, collection)
                .unwrap();
        assert_eq!(vector.get_data().unwrap(), vec![0.25, -0.5]);
    }

    #[test]
    fn non_finite_numbers_are_rejected_before_the_store() {
        let mut property = NumberProperty::in_collection(properties());
        let err = property
            .create("electronic_energy", &pbe(), &f64::NAN, None, None)
            .unwrap_err();
        assert!(matches!(err, EntityError::Validation { .. }));
        assert!(!property.has_id());
    }
}
