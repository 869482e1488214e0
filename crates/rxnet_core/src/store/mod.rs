//! Document store capability and its SQLite-backed implementation.
//!
//! # Responsibility
//! - Define the `Store` contract every collection and entity calls into.
//! - Keep backend query details behind that contract.
//!
//! # Invariants
//! - Every method is one blocking round trip with no client-side caching.
//! - Single-document operations are atomic; `find_one_and_update` never
//!   interleaves with another caller's update of the same document.
//! - `_id`, `_created` and `_lastmodified` are owned by the store.
//! - No operation retries on failure.

use crate::db::DbError;
use crate::model::id::Identifier;
use serde_json::{Map, Value};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub mod document;
pub mod filter;
pub mod sqlite;

pub use filter::{Filter, ReturnDocument, Sort, SortOrder, Update};
pub use sqlite::SqliteStore;

pub const ID_FIELD: &str = "_id";
pub const CREATED_FIELD: &str = "_created";
pub const LAST_MODIFIED_FIELD: &str = "_lastmodified";
pub const OBJECT_TYPE_FIELD: &str = "_objecttype";

/// One stored document.
pub type Document = Map<String, Value>;

/// Unix-epoch microseconds.
pub type Timestamp = i64;

/// Handle of a server-side cursor.
pub type CursorId = u64;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug)]
pub enum StoreError {
    Db(DbError),
    Serialization(serde_json::Error),
    /// The collection is not registered with the store.
    CollectionUnavailable(String),
    /// The cursor outlived its lifetime or was never opened.
    CursorExpired(CursorId),
    InvalidPath(String),
    /// The filter cannot be evaluated, e.g. ordering on a boolean.
    InvalidQuery(String),
    /// The update conflicts with the stored document shape.
    InvalidUpdate(String),
    DuplicateId {
        collection: String,
        id: Identifier,
    },
    /// Connection closed, locked past the busy timeout, or unreachable.
    Unavailable(String),
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Serialization(err) => write!(f, "document serialization failed: {err}"),
            Self::CollectionUnavailable(name) => write!(f, "collection `{name}` is unavailable"),
            Self::CursorExpired(cursor) => write!(f, "cursor {cursor} expired"),
            Self::InvalidPath(path) => write!(f, "invalid field path `{path}`"),
            Self::InvalidQuery(message) => write!(f, "invalid query: {message}"),
            Self::InvalidUpdate(message) => write!(f, "invalid update: {message}"),
            Self::DuplicateId { collection, id } => {
                write!(f, "document {id} already exists in `{collection}`")
            }
            Self::Unavailable(message) => write!(f, "store unavailable: {message}"),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Serialization(err) => Some(err),
            _ => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        use rusqlite::ErrorCode;
        match value.sqlite_error_code() {
            Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked | ErrorCode::CannotOpen) => {
                Self::Unavailable(value.to_string())
            }
            _ => Self::Db(DbError::Sqlite(value)),
        }
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(value: serde_json::Error) -> Self {
        Self::Serialization(value)
    }
}

/// Fields returned by a read. `_id` is always included.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Projection {
    #[default]
    All,
    Fields(Vec<String>),
}

impl Projection {
    pub fn fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Fields(fields.into_iter().map(Into::into).collect())
    }

    pub fn id_only() -> Self {
        Self::Fields(Vec::new())
    }
}

/// Document store capability.
///
/// Implementations must be shareable across threads; entities and
/// collections hold it as `Arc<dyn Store>`.
pub trait Store: Send + Sync {
    fn has_collection(&self, name: &str) -> StoreResult<bool>;
    /// Returns `false` when the collection already existed.
    fn create_collection(&self, name: &str) -> StoreResult<bool>;
    /// Drops the collection and its documents; `false` when it was absent.
    fn drop_collection(&self, name: &str) -> StoreResult<bool>;
    fn collection_names(&self) -> StoreResult<Vec<String>>;

    /// Inserts `document` under `id`, stamping both timestamps.
    fn insert(&self, collection: &str, id: Identifier, document: Document) -> StoreResult<()>;
    fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
        projection: &Projection,
    ) -> StoreResult<Option<Document>>;
    /// Atomically applies `update` to the first match and returns the
    /// state selected by `return_document`.
    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        sort: Option<&Sort>,
        return_document: ReturnDocument,
    ) -> StoreResult<Option<Document>>;
    /// Deletes the first match; `false` when nothing matched.
    fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<bool>;
    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64>;

    /// Registers a forward-only cursor over matches in insertion order.
    fn open_cursor(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
        batch_size: usize,
    ) -> StoreResult<CursorId>;
    /// Next batch; an empty batch means the cursor is exhausted and closed.
    fn next_batch(&self, cursor: CursorId) -> StoreResult<Vec<Document>>;
    fn close_cursor(&self, cursor: CursorId);

    /// Up to `size` distinct matches in random order.
    fn sample(&self, collection: &str, filter: &Filter, size: usize) -> StoreResult<Vec<Document>>;
    fn server_time(&self) -> StoreResult<Timestamp>;
    /// Drops every collection.
    fn drop_all(&self) -> StoreResult<()>;
    /// Releases the connection; later calls fail with `Unavailable`.
    fn close(&self);
}
