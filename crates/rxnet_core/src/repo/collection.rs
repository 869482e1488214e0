//! Typed handle to one named document collection.
//!
//! # Responsibility
//! - Be the only gateway through which entities reach the store.
//! - Turn store documents into entity handles of the requested kind.
//!
//! # Invariants
//! - A handle holds no document state; cloning it never copies data.
//! - Kind-typed lookups never return a handle whose `_objecttype` differs.
//! - Every method is exactly one store operation, except cursor paging.

use crate::entity::object::Object;
use crate::entity::Entity;
use crate::error::{EntityError, EntityResult};
use crate::model::id::Identifier;
use crate::model::layout::EntityKind;
use crate::store::{
    CursorId, Document, Filter, Projection, ReturnDocument, Sort, Store, Update, ID_FIELD,
    OBJECT_TYPE_FIELD,
};
use log::{debug, warn};
use serde_json::Value;
use std::collections::VecDeque;
use std::fmt::{Debug, Formatter};
use std::marker::PhantomData;
use std::sync::Arc;

/// Shared, cheap-to-clone collection reference held by entities.
pub type CollectionHandle = Arc<Collection>;

/// Fields needed to decide whether a document is of a given kind.
pub(crate) const KIND_FIELDS: [&str; 2] = [OBJECT_TYPE_FIELD, crate::entity::PROPERTY_TYPE_FIELD];

pub struct Collection {
    name: String,
    store: Arc<dyn Store>,
    batch_size: usize,
}

impl Debug for Collection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("batch_size", &self.batch_size)
            .finish()
    }
}

impl Collection {
    /// Wraps `name` on `store`. No store call is made; an unknown name
    /// surfaces as `CollectionUnavailable` on first use.
    pub fn new(name: impl Into<String>, store: Arc<dyn Store>, batch_size: usize) -> CollectionHandle {
        Arc::new(Self {
            name: name.into(),
            store,
            batch_size: batch_size.max(1),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    /// Whether a document with `id` exists, without fetching it.
    pub fn has(&self, id: Identifier) -> EntityResult<bool> {
        Ok(self.store.count(&self.name, &Filter::by_id(id))? > 0)
    }

    /// Inserts `document` under a freshly generated id.
    pub fn insert(&self, document: Document) -> EntityResult<Identifier> {
        let id = Identifier::generate();
        self.store.insert(&self.name, id, document)?;
        debug!(
            "event=entity_insert module=repo status=ok collection={} id={id}",
            self.name
        );
        Ok(id)
    }

    /// Point lookup of an entity of kind `E`.
    ///
    /// # Errors
    /// - `NotFound` when no document has `id`.
    /// - `ObjectTypeMismatch` when the document is of another kind.
    pub fn fetch<E: Entity>(self: &Arc<Self>, id: Identifier) -> EntityResult<E> {
        let document = self
            .store
            .find_one(
                &self.name,
                &Filter::by_id(id),
                None,
                &Projection::fields(KIND_FIELDS),
            )?
            .ok_or(EntityError::NotFound {
                kind: E::KIND,
                id: Some(id),
            })?;
        self.expect_kind::<E>(&document, id)?;
        Ok(self.handle(id))
    }

    /// Id of the first match, if any.
    pub fn find(&self, filter: &Filter) -> EntityResult<Option<Identifier>> {
        self.store
            .find_one(&self.name, filter, None, &Projection::id_only())?
            .map(|document| document_id(&document, None))
            .transpose()
    }

    /// First document matching `filter`, optionally ordered.
    ///
    /// # Errors
    /// - `NotFound` on an empty result.
    /// - `ObjectTypeMismatch` when the first match is of another kind.
    pub fn fetch_one<E: Entity>(
        self: &Arc<Self>,
        filter: &Filter,
        sort: Option<&Sort>,
    ) -> EntityResult<E> {
        let document = self
            .store
            .find_one(&self.name, filter, sort, &Projection::fields(KIND_FIELDS))?
            .ok_or(EntityError::NotFound {
                kind: E::KIND,
                id: None,
            })?;
        let id = document_id(&document, Some(E::KIND))?;
        self.expect_kind::<E>(&document, id)?;
        Ok(self.handle(id))
    }

    /// Atomically applies `update` to the first `E` matching `filter`.
    ///
    /// At most one concurrent caller observes a given pre-update state;
    /// `None` means nothing matched at the time of the call.
    pub fn fetch_and_update_one<E: Entity>(
        self: &Arc<Self>,
        filter: &Filter,
        update: &Update,
        sort: Option<&Sort>,
        return_document: ReturnDocument,
    ) -> EntityResult<Option<E>> {
        let scoped = Filter::and([filter.clone(), E::kind_filter()]);
        let updated = self
            .store
            .find_one_and_update(&self.name, &scoped, update, sort, return_document)?;
        match updated {
            Some(document) => {
                let id = document_id(&document, Some(E::KIND))?;
                debug!(
                    "event=entity_claim module=repo status=ok collection={} id={id}",
                    self.name
                );
                Ok(Some(self.handle(id)))
            }
            None => Ok(None),
        }
    }

    /// Lazy, forward-only sequence of every `E` matching `filter`.
    pub fn query<E: Entity>(self: &Arc<Self>, filter: &Filter) -> EntityResult<EntityCursor<E>> {
        let scoped = Filter::and([filter.clone(), E::kind_filter()]);
        let cursor =
            self.store
                .open_cursor(&self.name, &scoped, &Projection::id_only(), self.batch_size)?;
        Ok(EntityCursor {
            collection: Arc::clone(self),
            cursor: Some(cursor),
            buffer: VecDeque::new(),
            _kind: PhantomData,
        })
    }

    /// Same sequence as [`query`](Self::query).
    pub fn iterate_all<E: Entity>(
        self: &Arc<Self>,
        filter: &Filter,
    ) -> EntityResult<EntityCursor<E>> {
        self.query(filter)
    }

    /// Ids of every document matching `filter`, regardless of kind.
    pub fn query_ids(&self, filter: &Filter) -> EntityResult<Vec<Identifier>> {
        self.read_matching(filter, &[])?
            .iter()
            .map(|document| document_id(document, None))
            .collect()
    }

    pub fn count(&self, filter: &Filter) -> EntityResult<u64> {
        Ok(self.store.count(&self.name, filter)?)
    }

    /// Up to `size` distinct entities of kind `E` in random order.
    pub fn random_sample<E: Entity>(self: &Arc<Self>, size: usize) -> EntityResult<Vec<E>> {
        self.store
            .sample(&self.name, &E::kind_filter(), size)?
            .iter()
            .map(|document| document_id(document, Some(E::KIND)).map(|id| self.handle(id)))
            .collect()
    }

    pub(crate) fn read_fields(
        &self,
        kind: EntityKind,
        id: Identifier,
        fields: &[&str],
    ) -> EntityResult<Document> {
        self.store
            .find_one(
                &self.name,
                &Filter::by_id(id),
                None,
                &Projection::fields(fields.iter().copied()),
            )?
            .ok_or(EntityError::NotFound { kind, id: Some(id) })
    }

    /// Every match projected to `fields`, drained through one cursor.
    pub(crate) fn read_matching(
        &self,
        filter: &Filter,
        fields: &[&str],
    ) -> EntityResult<Vec<Document>> {
        let projection = Projection::fields(fields.iter().copied());
        let cursor = self
            .store
            .open_cursor(&self.name, filter, &projection, self.batch_size)?;
        let mut documents = Vec::new();
        let outcome = self.drain(cursor, &mut documents);
        self.store.close_cursor(cursor);
        outcome.map(|()| documents)
    }

    fn drain(&self, cursor: CursorId, documents: &mut Vec<Document>) -> EntityResult<()> {
        loop {
            let batch = self.store.next_batch(cursor)?;
            let last = batch.len() < self.batch_size;
            documents.extend(batch);
            if last {
                return Ok(());
            }
        }
    }

    pub(crate) fn read_document(&self, kind: EntityKind, id: Identifier) -> EntityResult<Document> {
        self.store
            .find_one(&self.name, &Filter::by_id(id), None, &Projection::All)?
            .ok_or(EntityError::NotFound { kind, id: Some(id) })
    }

    /// Applies `update` to the document `id` in one atomic store call.
    pub(crate) fn update_by_id(
        &self,
        kind: EntityKind,
        id: Identifier,
        update: &Update,
    ) -> EntityResult<()> {
        self.store
            .find_one_and_update(
                &self.name,
                &Filter::by_id(id),
                update,
                None,
                ReturnDocument::After,
            )?
            .map(|_| ())
            .ok_or(EntityError::NotFound { kind, id: Some(id) })
    }

    pub(crate) fn delete_by_id(&self, id: Identifier) -> EntityResult<bool> {
        Ok(self.store.delete_one(&self.name, &Filter::by_id(id))?)
    }

    fn handle<E: Entity>(self: &Arc<Self>, id: Identifier) -> E {
        E::from_object(Object::new(Some(id), Some(Arc::clone(self))))
    }

    fn expect_kind<E: Entity>(&self, document: &Document, id: Identifier) -> EntityResult<()> {
        if E::matches_kind(document) {
            return Ok(());
        }
        let found = document
            .get(OBJECT_TYPE_FIELD)
            .and_then(Value::as_str)
            .unwrap_or("<untyped>")
            .to_string();
        warn!(
            "event=kind_mismatch module=repo status=error collection={} id={id} expected={} found={found}",
            self.name,
            E::KIND
        );
        Err(EntityError::ObjectTypeMismatch {
            expected: E::KIND,
            found,
            id,
        })
    }
}

fn document_id(document: &Document, kind: Option<EntityKind>) -> EntityResult<Identifier> {
    let raw = document.get(ID_FIELD).and_then(Value::as_str).unwrap_or_default();
    Identifier::parse_str(raw).map_err(|err| EntityError::invalid_data(kind, ID_FIELD, None, err))
}

/// Cursor-backed lazy sequence of entity handles.
///
/// Paging is driven by iteration; the server-side cursor is released when
/// the sequence is exhausted, fails, or is dropped.
pub struct EntityCursor<E> {
    collection: CollectionHandle,
    cursor: Option<CursorId>,
    buffer: VecDeque<Document>,
    _kind: PhantomData<fn() -> E>,
}

impl<E: Entity> EntityCursor<E> {
    fn refill(&mut self, cursor: CursorId) -> EntityResult<()> {
        let batch_size = self.collection.batch_size;
        let batch = self.collection.store.next_batch(cursor)?;
        if batch.len() < batch_size {
            // A short batch means the store already released the cursor.
            self.cursor = None;
        }
        self.buffer.extend(batch);
        Ok(())
    }
}

impl<E: Entity> Iterator for EntityCursor<E> {
    type Item = EntityResult<E>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(document) = self.buffer.pop_front() {
                return Some(
                    document_id(&document, Some(E::KIND))
                        .map(|id| self.collection.handle(id)),
                );
            }
            let cursor = self.cursor?;
            if let Err(err) = self.refill(cursor) {
                self.cursor = None;
                return Some(Err(err));
            }
            if self.buffer.is_empty() {
                self.cursor = None;
                return None;
            }
        }
    }
}

impl<E> Drop for EntityCursor<E> {
    fn drop(&mut self) {
        if let Some(cursor) = self.cursor.take() {
            self.collection.store.close_cursor(cursor);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Collection;
    use crate::entity::{Compound, Entity, Structure};
    use crate::error::EntityError;
    use crate::model::id::Identifier;
    use crate::store::{Filter, SqliteStore, Store};
    use serde_json::json;
    use std::sync::Arc;

    fn collection(name: &str) -> Arc<Collection> {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_collection(name).unwrap();
        Collection::new(name, Arc::new(store), 2)
    }

    fn typed(kind: &str) -> crate::store::Document {
        json!({ "_objecttype": kind }).as_object().cloned().unwrap()
    }

    #[test]
    fn fetch_checks_presence_and_kind() {
        let structures = collection("structures");
        let id = structures.insert(typed("structure")).unwrap();

        let structure: Structure = structures.fetch(id).unwrap();
        assert_eq!(structure.id().unwrap(), id);

        let err = structures.fetch::<Compound>(id).unwrap_err();
        assert!(matches!(err, EntityError::ObjectTypeMismatch { .. }));

        let missing = Identifier::generate();
        let err = structures.fetch::<Structure>(missing).unwrap_err();
        assert!(matches!(err, EntityError::NotFound { id: Some(found), .. } if found == missing));
    }

    #[test]
    fn query_pages_transparently_and_skips_other_kinds() {
        let structures = collection("structures");
        let mut expected = Vec::new();
        for index in 0..5 {
            expected.push(structures.insert(typed("structure")).unwrap());
            if index % 2 == 0 {
                structures.insert(typed("compound")).unwrap();
            }
        }
        let ids = structures
            .query::<Structure>(&Filter::All)
            .unwrap()
            .map(|structure| structure.unwrap().id().unwrap())
            .collect::<Vec<_>>();
        assert_eq!(ids, expected);
        assert_eq!(structures.query_ids(&Filter::All).unwrap().len(), 8);
    }

    #[test]
    fn find_returns_only_the_id() {
        let structures = collection("structures");
        assert_eq!(structures.find(&Filter::All).unwrap(), None);
        let id = structures.insert(typed("structure")).unwrap();
        assert_eq!(structures.find(&Filter::All).unwrap(), Some(id));
        assert!(structures.has(id).unwrap());
    }

    #[test]
    fn unknown_collection_is_unavailable() {
        let store = Arc::new(SqliteStore::open_in_memory().unwrap());
        let ghosts = Collection::new("ghosts", store, 10);
        let err = ghosts.count(&Filter::All).unwrap_err();
        assert!(matches!(err, EntityError::CollectionUnavailable { collection } if collection == "ghosts"));
    }
}
