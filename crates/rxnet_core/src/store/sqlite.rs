//! SQLite-backed document store.
//!
//! # Responsibility
//! - Persist JSON documents per collection in one `documents` table.
//! - Translate `Filter`/`Sort` trees into parameterized SQL.
//! - Serve keyset-paged server-side cursors with an idle lifetime.
//!
//! # Invariants
//! - Values never reach SQL text; only `?` placeholders are emitted.
//! - Every mutation runs in one `BEGIN IMMEDIATE` transaction, so a
//!   find-and-modify is never interleaved with another writer.
//! - Lock order is connection first, cursor registry second; the two are
//!   never held in the opposite order.
//! - Timestamps come from a per-store clock that never repeats or goes back.

use crate::config::{StoreConfig, StoreLocation};
use crate::db::{open_db, open_db_in_memory};
use crate::model::id::Identifier;
use crate::store::document::{apply_update, project};
use crate::store::filter::{CompareOp, FieldPath, Filter, ReturnDocument, Sort, SortOrder, Update};
use crate::store::{
    CursorId, Document, Projection, Store, StoreError, StoreResult, Timestamp, CREATED_FIELD,
    ID_FIELD, LAST_MODIFIED_FIELD,
};
use log::{debug, info, warn};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, TransactionBehavior};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

/// Strictly increasing microsecond clock.
#[derive(Debug, Default)]
struct MonotonicClock {
    last: AtomicI64,
}

impl MonotonicClock {
    fn now(&self) -> Timestamp {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |elapsed| elapsed.as_micros() as i64);
        let mut previous = self.last.load(Ordering::Relaxed);
        loop {
            let next = wall.max(previous + 1);
            match self
                .last
                .compare_exchange_weak(previous, next, Ordering::AcqRel, Ordering::Relaxed)
            {
                Ok(_) => return next,
                Err(actual) => previous = actual,
            }
        }
    }
}

#[derive(Debug)]
struct CursorState {
    collection: String,
    filter: Filter,
    projection: Projection,
    batch_size: usize,
    last_seq: i64,
    touched_at: Instant,
}

/// SQLite document store; share it as `Arc<dyn Store>`.
#[derive(Debug)]
pub struct SqliteStore {
    conn: Mutex<Option<Connection>>,
    cursors: Mutex<HashMap<CursorId, CursorState>>,
    next_cursor: AtomicU64,
    cursor_lifetime: Duration,
    clock: MonotonicClock,
}

impl SqliteStore {
    /// Opens the store described by `config`.
    pub fn open(config: &StoreConfig) -> StoreResult<Self> {
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let conn = match &config.location {
            StoreLocation::File(path) => open_db(path, busy_timeout)?,
            StoreLocation::Memory => open_db_in_memory(busy_timeout)?,
        };
        Ok(Self::from_connection(
            conn,
            Duration::from_millis(config.cursor_lifetime_ms),
        ))
    }

    /// Fresh private in-memory store with default settings.
    pub fn open_in_memory() -> StoreResult<Self> {
        Self::open(&StoreConfig::in_memory())
    }

    /// Wraps a connection that already has migrations applied.
    pub fn from_connection(conn: Connection, cursor_lifetime: Duration) -> Self {
        Self {
            conn: Mutex::new(Some(conn)),
            cursors: Mutex::new(HashMap::new()),
            next_cursor: AtomicU64::new(1),
            cursor_lifetime,
            clock: MonotonicClock::default(),
        }
    }

    fn with_conn<T>(&self, f: impl FnOnce(&mut Connection) -> StoreResult<T>) -> StoreResult<T> {
        let mut guard = self
            .conn
            .lock()
            .map_err(|_| StoreError::Unavailable("connection lock poisoned".to_string()))?;
        let conn = guard
            .as_mut()
            .ok_or_else(|| StoreError::Unavailable("store is closed".to_string()))?;
        f(conn)
    }

    fn cursors(&self) -> StoreResult<std::sync::MutexGuard<'_, HashMap<CursorId, CursorState>>> {
        self.cursors
            .lock()
            .map_err(|_| StoreError::Unavailable("cursor registry lock poisoned".to_string()))
    }
}

fn ensure_collection(conn: &Connection, name: &str) -> StoreResult<()> {
    if collection_exists(conn, name)? {
        return Ok(());
    }
    Err(StoreError::CollectionUnavailable(name.to_string()))
}

fn collection_exists(conn: &Connection, name: &str) -> StoreResult<bool> {
    let exists: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM collections WHERE name = ?1);",
        [name],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

fn parse_body(body: &str) -> StoreResult<Document> {
    Ok(serde_json::from_str::<Document>(body)?)
}

/// One `SELECT` over a collection.
struct Select<'a> {
    collection: &'a str,
    filter: &'a Filter,
    sort: Option<&'a Sort>,
    after_seq: Option<i64>,
    limit: Option<usize>,
    random: bool,
}

impl<'a> Select<'a> {
    fn new(collection: &'a str, filter: &'a Filter) -> Self {
        Self {
            collection,
            filter,
            sort: None,
            after_seq: None,
            limit: None,
            random: false,
        }
    }

    fn run(&self, conn: &Connection) -> StoreResult<Vec<(i64, Document)>> {
        let mut builder = SqlBuilder::default();
        builder.push("SELECT seq, body FROM documents WHERE collection = ");
        builder.bind(self.collection.to_string());
        builder.push(" AND ");
        builder.filter(self.filter)?;
        if let Some(after) = self.after_seq {
            builder.push(" AND seq > ");
            builder.bind(after);
        }
        builder.push(" ORDER BY ");
        if self.random {
            builder.push("random()");
        } else {
            if let Some(sort) = self.sort {
                builder.sort(sort)?;
            }
            builder.push("seq ASC");
        }
        if let Some(limit) = self.limit {
            builder.push(" LIMIT ");
            builder.bind(i64::try_from(limit).unwrap_or(i64::MAX));
        }

        let mut stmt = conn.prepare(&builder.sql)?;
        let mut rows = stmt.query(params_from_iter(builder.params.iter()))?;
        let mut documents = Vec::new();
        while let Some(row) = rows.next()? {
            let seq: i64 = row.get(0)?;
            let body: String = row.get(1)?;
            documents.push((seq, parse_body(&body)?));
        }
        Ok(documents)
    }
}

/// Either a document field or the current `json_each` element.
#[derive(Clone, Copy)]
enum Operand<'a> {
    Field(&'a str),
    Element,
}

#[derive(Default)]
struct SqlBuilder {
    sql: String,
    params: Vec<SqlValue>,
}

impl SqlBuilder {
    fn push(&mut self, text: &str) {
        self.sql.push_str(text);
    }

    fn bind(&mut self, value: impl Into<SqlValue>) {
        self.sql.push('?');
        self.params.push(value.into());
    }

    fn operand_type(&mut self, operand: Operand<'_>) {
        match operand {
            Operand::Field(path) => {
                self.push("json_type(body, ");
                self.bind(path.to_string());
                self.push(")");
            }
            Operand::Element => self.push("e.type"),
        }
    }

    fn operand_value(&mut self, operand: Operand<'_>) {
        match operand {
            Operand::Field(path) => {
                self.push("json_extract(body, ");
                self.bind(path.to_string());
                self.push(")");
            }
            Operand::Element => self.push("e.value"),
        }
    }

    fn filter(&mut self, filter: &Filter) -> StoreResult<()> {
        match filter {
            Filter::All => self.push("1"),
            Filter::Compare(predicate) => {
                if predicate.path == ID_FIELD && predicate.op == CompareOp::Eq {
                    if let Value::String(id) = &predicate.value {
                        self.push("(id = ");
                        self.bind(id.clone());
                        self.push(")");
                        return Ok(());
                    }
                }
                let path = json_path(&predicate.path)?;
                match predicate.op {
                    CompareOp::Eq => self.equality(Operand::Field(&path), &predicate.value),
                    CompareOp::Ne => {
                        self.push("NOT ");
                        self.equality(Operand::Field(&path), &predicate.value);
                    }
                    op => self.ordering(&path, op, &predicate.value)?,
                }
            }
            Filter::In { path, values } => {
                let path = json_path(path)?;
                self.any_of(values, |builder, value| {
                    builder.equality(Operand::Field(&path), value)
                });
            }
            Filter::Exists { path, present } => {
                let path = json_path(path)?;
                self.push("(json_type(body, ");
                self.bind(path);
                self.push(if *present {
                    ") IS NOT NULL)"
                } else {
                    ") IS NULL)"
                });
            }
            Filter::Contains { path, value } => {
                let path = json_path(path)?;
                self.push("EXISTS (SELECT 1 FROM json_each(body, ");
                self.bind(path);
                self.push(") AS e WHERE ");
                self.equality(Operand::Element, value);
                self.push(")");
            }
            Filter::EqIgnoreCase { path, value } => {
                let path = json_path(path)?;
                self.eq_ignore_case(&path, value);
            }
            Filter::InIgnoreCase { path, values } => {
                let path = json_path(path)?;
                self.any_of(values, |builder, value| builder.eq_ignore_case(&path, value));
            }
            Filter::And(clauses) => self.join(clauses, " AND ", "1")?,
            Filter::Or(clauses) => self.join(clauses, " OR ", "0")?,
            Filter::Not(inner) => {
                self.push("NOT (");
                self.filter(inner)?;
                self.push(")");
            }
        }
        Ok(())
    }

    fn join(&mut self, clauses: &[Filter], separator: &str, empty: &str) -> StoreResult<()> {
        if clauses.is_empty() {
            self.push(empty);
            return Ok(());
        }
        self.push("(");
        for (index, clause) in clauses.iter().enumerate() {
            if index > 0 {
                self.push(separator);
            }
            self.filter(clause)?;
        }
        self.push(")");
        Ok(())
    }

    fn any_of<T>(&mut self, values: &[T], mut leaf: impl FnMut(&mut Self, &T)) {
        if values.is_empty() {
            self.push("0");
            return;
        }
        self.push("(");
        for (index, value) in values.iter().enumerate() {
            if index > 0 {
                self.push(" OR ");
            }
            leaf(self, value);
        }
        self.push(")");
    }

    /// Type-exact equality, always 0 or 1 (never NULL).
    fn equality(&mut self, operand: Operand<'_>, value: &Value) {
        self.push("COALESCE((");
        self.operand_type(operand);
        match value {
            Value::Null => self.push(" = 'null'"),
            Value::Bool(true) => self.push(" = 'true'"),
            Value::Bool(false) => self.push(" = 'false'"),
            Value::Number(number) => {
                self.push(" IN ('integer', 'real') AND ");
                self.operand_value(operand);
                self.push(" = ");
                self.bind(number_param(number));
            }
            Value::String(text) => {
                self.push(" = 'text' AND ");
                self.operand_value(operand);
                self.push(" = ");
                self.bind(text.clone());
            }
            Value::Array(_) | Value::Object(_) => {
                self.push(" IN ('array', 'object') AND ");
                self.operand_value(operand);
                self.push(" = json(");
                self.bind(value.to_string());
                self.push(")");
            }
        }
        self.push("), 0)");
    }

    fn ordering(&mut self, path: &str, op: CompareOp, value: &Value) -> StoreResult<()> {
        let operator = match op {
            CompareOp::Lt => " < ",
            CompareOp::Lte => " <= ",
            CompareOp::Gt => " > ",
            CompareOp::Gte => " >= ",
            CompareOp::Eq | CompareOp::Ne => {
                return Err(StoreError::InvalidQuery(format!("{op:?} is not an ordering")))
            }
        };
        let (type_check, param) = match value {
            Value::Number(number) => (" IN ('integer', 'real') AND ", number_param(number)),
            Value::String(text) => (" = 'text' AND ", SqlValue::Text(text.clone())),
            other => {
                return Err(StoreError::InvalidQuery(format!(
                    "cannot order by a {} value",
                    json_kind(other)
                )))
            }
        };
        self.push("COALESCE((");
        self.operand_type(Operand::Field(path));
        self.push(type_check);
        self.operand_value(Operand::Field(path));
        self.push(operator);
        self.bind(param);
        self.push("), 0)");
        Ok(())
    }

    fn eq_ignore_case(&mut self, path: &str, value: &str) {
        self.push("COALESCE((");
        self.operand_type(Operand::Field(path));
        self.push(" = 'text' AND lower(");
        self.operand_value(Operand::Field(path));
        self.push(") = lower(");
        self.bind(value.to_string());
        self.push(")), 0)");
    }

    fn sort(&mut self, sort: &Sort) -> StoreResult<()> {
        for (path, order) in sort.keys() {
            let path = json_path(path)?;
            self.operand_value(Operand::Field(&path));
            self.push(match order {
                SortOrder::Ascending => " ASC, ",
                SortOrder::Descending => " DESC, ",
            });
        }
        Ok(())
    }
}

fn json_path(path: &str) -> StoreResult<String> {
    Ok(FieldPath::parse(path)?.to_json_path())
}

fn number_param(number: &serde_json::Number) -> SqlValue {
    match number.as_i64() {
        Some(integer) => SqlValue::Integer(integer),
        None => SqlValue::Real(number.as_f64().unwrap_or(f64::NAN)),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl Store for SqliteStore {
    fn has_collection(&self, name: &str) -> StoreResult<bool> {
        self.with_conn(|conn| collection_exists(conn, name))
    }

    fn create_collection(&self, name: &str) -> StoreResult<bool> {
        let now = self.clock.now();
        self.with_conn(|conn| {
            let changed = conn.execute(
                "INSERT OR IGNORE INTO collections (name, created_at) VALUES (?1, ?2);",
                params![name, now],
            )?;
            if changed == 1 {
                info!("event=collection_create module=store status=ok collection={name}");
            }
            Ok(changed == 1)
        })
    }

    fn drop_collection(&self, name: &str) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let changed = conn.execute("DELETE FROM collections WHERE name = ?1;", [name])?;
            Ok(changed == 1)
        })
    }

    fn collection_names(&self) -> StoreResult<Vec<String>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT name FROM collections ORDER BY name;")?;
            let names = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(names)
        })
    }

    fn insert(&self, collection: &str, id: Identifier, mut document: Document) -> StoreResult<()> {
        let now = self.clock.now();
        document.insert(ID_FIELD.to_string(), Value::from(id));
        document.insert(CREATED_FIELD.to_string(), Value::from(now));
        document.insert(LAST_MODIFIED_FIELD.to_string(), Value::from(now));
        let body = serde_json::to_string(&document)?;

        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            ensure_collection(&tx, collection)?;
            let taken = tx
                .query_row(
                    "SELECT 1 FROM documents WHERE collection = ?1 AND id = ?2;",
                    params![collection, id.to_string()],
                    |_| Ok(()),
                )
                .optional()?;
            if taken.is_some() {
                return Err(StoreError::DuplicateId {
                    collection: collection.to_string(),
                    id,
                });
            }
            tx.execute(
                "INSERT INTO documents (collection, id, body) VALUES (?1, ?2, ?3);",
                params![collection, id.to_string(), body],
            )?;
            tx.commit()?;
            debug!("event=document_insert module=store status=ok collection={collection}");
            Ok(())
        })
    }

    fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
        projection: &Projection,
    ) -> StoreResult<Option<Document>> {
        self.with_conn(|conn| {
            ensure_collection(conn, collection)?;
            let select = Select {
                sort,
                limit: Some(1),
                ..Select::new(collection, filter)
            };
            select
                .run(conn)?
                .into_iter()
                .next()
                .map(|(_, document)| project(document, projection))
                .transpose()
        })
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        sort: Option<&Sort>,
        return_document: ReturnDocument,
    ) -> StoreResult<Option<Document>> {
        let started_at = Instant::now();
        let result = self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            ensure_collection(&tx, collection)?;
            let select = Select {
                sort,
                limit: Some(1),
                ..Select::new(collection, filter)
            };
            let Some((seq, mut document)) = select.run(&tx)?.into_iter().next() else {
                tx.commit()?;
                return Ok(None);
            };

            let before = (return_document == ReturnDocument::Before).then(|| document.clone());
            apply_update(&mut document, update)?;
            document.insert(
                LAST_MODIFIED_FIELD.to_string(),
                Value::from(self.clock.now()),
            );
            tx.execute(
                "UPDATE documents SET body = ?1 WHERE seq = ?2;",
                params![serde_json::to_string(&document)?, seq],
            )?;
            tx.commit()?;
            Ok(Some(before.unwrap_or(document)))
        });

        match &result {
            Ok(found) => debug!(
                "event=document_update module=store status=ok collection={} matched={} duration_ms={}",
                collection,
                found.is_some(),
                started_at.elapsed().as_millis()
            ),
            Err(err) => warn!(
                "event=document_update module=store status=error collection={} duration_ms={} error={}",
                collection,
                started_at.elapsed().as_millis(),
                err
            ),
        }
        result
    }

    fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<bool> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            ensure_collection(&tx, collection)?;
            let select = Select {
                limit: Some(1),
                ..Select::new(collection, filter)
            };
            let deleted = match select.run(&tx)?.into_iter().next() {
                Some((seq, _)) => tx.execute("DELETE FROM documents WHERE seq = ?1;", [seq])? == 1,
                None => false,
            };
            tx.commit()?;
            Ok(deleted)
        })
    }

    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.with_conn(|conn| {
            ensure_collection(conn, collection)?;
            let mut builder = SqlBuilder::default();
            builder.push("SELECT COUNT(*) FROM documents WHERE collection = ");
            builder.bind(collection.to_string());
            builder.push(" AND ");
            builder.filter(filter)?;
            let count: i64 = conn.query_row(
                &builder.sql,
                params_from_iter(builder.params.iter()),
                |row| row.get(0),
            )?;
            Ok(count.max(0) as u64)
        })
    }

    fn open_cursor(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
        batch_size: usize,
    ) -> StoreResult<CursorId> {
        if batch_size == 0 {
            return Err(StoreError::InvalidQuery("cursor batch size must be positive".to_string()));
        }
        self.with_conn(|conn| ensure_collection(conn, collection))?;
        SqlBuilder::default().filter(filter)?;

        let cursor = self.next_cursor.fetch_add(1, Ordering::Relaxed);
        let mut cursors = self.cursors()?;
        let lifetime = self.cursor_lifetime;
        cursors.retain(|_, state| state.touched_at.elapsed() <= lifetime);
        cursors.insert(
            cursor,
            CursorState {
                collection: collection.to_string(),
                filter: filter.clone(),
                projection: projection.clone(),
                batch_size,
                last_seq: 0,
                touched_at: Instant::now(),
            },
        );
        Ok(cursor)
    }

    fn next_batch(&self, cursor: CursorId) -> StoreResult<Vec<Document>> {
        let (collection, filter, projection, batch_size, last_seq) = {
            let mut cursors = self.cursors()?;
            let Some(state) = cursors.get(&cursor) else {
                return Err(StoreError::CursorExpired(cursor));
            };
            if state.touched_at.elapsed() > self.cursor_lifetime {
                cursors.remove(&cursor);
                warn!("event=cursor_expired module=store status=error cursor={cursor}");
                return Err(StoreError::CursorExpired(cursor));
            }
            (
                state.collection.clone(),
                state.filter.clone(),
                state.projection.clone(),
                state.batch_size,
                state.last_seq,
            )
        };

        let rows = self.with_conn(|conn| {
            ensure_collection(conn, &collection)?;
            let select = Select {
                after_seq: Some(last_seq),
                limit: Some(batch_size),
                ..Select::new(&collection, &filter)
            };
            select.run(conn)
        })?;

        let mut cursors = self.cursors()?;
        match rows.last() {
            Some((seq, _)) if rows.len() == batch_size => {
                if let Some(state) = cursors.get_mut(&cursor) {
                    state.last_seq = *seq;
                    state.touched_at = Instant::now();
                }
            }
            _ => {
                cursors.remove(&cursor);
            }
        }
        drop(cursors);

        rows.into_iter()
            .map(|(_, document)| project(document, &projection))
            .collect()
    }

    fn close_cursor(&self, cursor: CursorId) {
        if let Ok(mut cursors) = self.cursors() {
            cursors.remove(&cursor);
        }
    }

    fn sample(&self, collection: &str, filter: &Filter, size: usize) -> StoreResult<Vec<Document>> {
        self.with_conn(|conn| {
            ensure_collection(conn, collection)?;
            let select = Select {
                limit: Some(size),
                random: true,
                ..Select::new(collection, filter)
            };
            Ok(select
                .run(conn)?
                .into_iter()
                .map(|(_, document)| document)
                .collect())
        })
    }

    fn server_time(&self) -> StoreResult<Timestamp> {
        self.with_conn(|_| Ok(self.clock.now()))
    }

    fn drop_all(&self) -> StoreResult<()> {
        self.with_conn(|conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            tx.execute("DELETE FROM collections;", [])?;
            tx.commit()?;
            info!("event=store_wipe module=store status=ok");
            Ok(())
        })?;
        if let Ok(mut cursors) = self.cursors() {
            cursors.clear();
        }
        Ok(())
    }

    fn close(&self) {
        if let Ok(mut guard) = self.conn.lock() {
            if guard.take().is_some() {
                info!("event=store_close module=store status=ok");
            }
        }
        if let Ok(mut cursors) = self.cursors() {
            cursors.clear();
        }
    }
}
