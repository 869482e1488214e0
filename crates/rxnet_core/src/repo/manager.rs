//! Store connection owner and layout bootstrap.
//!
//! # Responsibility
//! - Open the configured store and hand out collection handles.
//! - Create the default layout and its version document.
//! - Report the persisted layout version against the compiled-in one.
//!
//! # Invariants
//! - `init` is idempotent and never removes data.
//! - The metadata collection holds at most one version document; it lives
//!   under a fixed id, so concurrent `init` calls cannot both insert it.

use crate::config::StoreConfig;
use crate::error::{EntityError, EntityResult};
use crate::model::id::Identifier;
use crate::model::layout::{EntityKind, Version, DEFAULT_COLLECTIONS, LAYOUT_VERSION, META_DATA};
use crate::repo::collection::{Collection, CollectionHandle};
use crate::store::{Document, Filter, Projection, SqliteStore, Store, StoreError, Timestamp};
use log::{debug, info};
use serde_json::Value;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use std::time::Instant;

const VERSION_FIELD: &str = "version";
const VERSION_DOCUMENT_ID: Identifier = Identifier::from_bytes([0; 12]);

pub struct Manager {
    config: StoreConfig,
    store: Option<Arc<dyn Store>>,
}

impl Debug for Manager {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Manager")
            .field("config", &self.config)
            .field("connected", &self.store.is_some())
            .finish()
    }
}

impl Manager {
    /// Validates `config` without connecting.
    pub fn new(config: StoreConfig) -> EntityResult<Self> {
        config.validate().map_err(EntityError::Config)?;
        Ok(Self {
            config,
            store: None,
        })
    }

    /// Validates `config` and connects.
    pub fn open(config: StoreConfig) -> EntityResult<Self> {
        let mut manager = Self::new(config)?;
        manager.connect()?;
        Ok(manager)
    }

    /// Uses an already opened store.
    pub fn with_store(config: StoreConfig, store: Arc<dyn Store>) -> EntityResult<Self> {
        config.validate().map_err(EntityError::Config)?;
        Ok(Self {
            config,
            store: Some(store),
        })
    }

    /// Opens the configured store; a no-op when already connected.
    pub fn connect(&mut self) -> EntityResult<()> {
        if self.store.is_some() {
            return Ok(());
        }
        let started_at = Instant::now();
        let store = SqliteStore::open(&self.config)?;
        self.store = Some(Arc::new(store));
        info!(
            "event=manager_connect module=repo status=ok database={} duration_ms={}",
            self.config.database_name,
            started_at.elapsed().as_millis()
        );
        if self.config.init_on_open {
            self.init()?;
        }
        Ok(())
    }

    /// Closes the store; handles obtained earlier fail with `StoreUnavailable`.
    pub fn disconnect(&mut self) {
        if let Some(store) = self.store.take() {
            store.close();
            info!(
                "event=manager_disconnect module=repo status=ok database={}",
                self.config.database_name
            );
        }
    }

    pub fn connected(&self) -> bool {
        self.store.is_some()
    }

    pub fn database_name(&self) -> &str {
        &self.config.database_name
    }

    pub fn config(&self) -> &StoreConfig {
        &self.config
    }

    /// Creates the default collections and the version document.
    pub fn init(&self) -> EntityResult<()> {
        let store = self.store()?;
        for name in DEFAULT_COLLECTIONS {
            store.create_collection(name)?;
        }
        store.create_collection(META_DATA)?;

        let has_version = store.count(META_DATA, &Filter::exists(VERSION_FIELD))? > 0;
        if !has_version {
            write_version_document(&**store)?;
        }
        info!(
            "event=manager_init module=repo status=ok database={} version={LAYOUT_VERSION}",
            self.config.database_name
        );
        Ok(())
    }

    /// Drops every collection, the metadata collection included.
    pub fn wipe(&self) -> EntityResult<()> {
        self.store()?.drop_all()?;
        info!(
            "event=manager_wipe module=repo status=ok database={}",
            self.config.database_name
        );
        Ok(())
    }

    pub fn has_collection(&self, name: &str) -> EntityResult<bool> {
        Ok(self.store()?.has_collection(name)?)
    }

    /// Handle to `name`. Creates the collection unless `expect_present`,
    /// in which case an unknown name fails with `CollectionUnavailable`.
    pub fn collection(&self, name: &str, expect_present: bool) -> EntityResult<CollectionHandle> {
        let store = self.store()?;
        if expect_present {
            if !store.has_collection(name)? {
                return Err(EntityError::CollectionUnavailable {
                    collection: name.to_string(),
                });
            }
        } else {
            store.create_collection(name)?;
        }
        Ok(Collection::new(
            name,
            Arc::clone(store),
            self.config.cursor_batch_size,
        ))
    }

    /// Handle to the default collection of `kind`, which must exist.
    pub fn collection_for(&self, kind: EntityKind) -> EntityResult<CollectionHandle> {
        self.collection(kind.default_collection(), true)
    }

    pub fn server_time(&self) -> EntityResult<Timestamp> {
        Ok(self.store()?.server_time()?)
    }

    /// Persisted layout version; `0.0.0` when no version document exists.
    pub fn db_version(&self) -> EntityResult<Version> {
        let store = self.store()?;
        if !store.has_collection(META_DATA)? {
            return Ok(Version::new(0, 0, 0));
        }
        let document = store.find_one(
            META_DATA,
            &Filter::exists(VERSION_FIELD),
            None,
            &Projection::fields([VERSION_FIELD]),
        )?;
        match document.and_then(|mut document| document.remove(VERSION_FIELD)) {
            Some(value) => parse_version(value),
            None => Ok(Version::new(0, 0, 0)),
        }
    }

    /// Whether the persisted layout is compatible with this build.
    pub fn version_matches(&self) -> EntityResult<bool> {
        Ok(self.db_version()?.is_compatible_with(&LAYOUT_VERSION))
    }

    fn store(&self) -> EntityResult<&Arc<dyn Store>> {
        self.store.as_ref().ok_or_else(|| {
            EntityError::StoreUnavailable(format!(
                "database `{}` is not connected",
                self.config.database_name
            ))
        })
    }
}

impl Drop for Manager {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Inserts the version document under its fixed id.
///
/// Returns `false` when a concurrent `init` already wrote it.
fn write_version_document(store: &dyn Store) -> EntityResult<bool> {
    let version = serde_json::to_value(LAYOUT_VERSION)
        .map_err(|err| EntityError::invalid_data(None, VERSION_FIELD, None, err))?;
    let mut document = Document::new();
    document.insert(VERSION_FIELD.to_string(), version);
    match store.insert(META_DATA, VERSION_DOCUMENT_ID, document) {
        Ok(()) => Ok(true),
        Err(StoreError::DuplicateId { .. }) => {
            debug!("event=manager_init module=repo status=skipped reason=version_present");
            Ok(false)
        }
        Err(err) => Err(err.into()),
    }
}

fn parse_version(value: Value) -> EntityResult<Version> {
    serde_json::from_value(value)
        .map_err(|err| EntityError::invalid_data(None, VERSION_FIELD, None, err))
}

#[cfg(test)]
mod tests {
    use super::{write_version_document, Manager, VERSION_DOCUMENT_ID};
    use crate::config::StoreConfig;
    use crate::model::layout::META_DATA;
    use crate::store::{Filter, Projection, SqliteStore, Store};
    use crate::error::EntityError;
    use crate::model::layout::{Version, LAYOUT_VERSION};

    #[test]
    fn version_is_zero_before_init() {
        let manager = Manager::open(StoreConfig::in_memory()).unwrap();
        assert_eq!(manager.db_version().unwrap(), Version::new(0, 0, 0));
        assert!(!manager.version_matches().unwrap());
    }

    #[test]
    fn init_writes_one_version_document() {
        let manager = Manager::open(StoreConfig::in_memory()).unwrap();
        manager.init().unwrap();
        manager.init().unwrap();
        assert_eq!(manager.db_version().unwrap(), LAYOUT_VERSION);
        assert!(manager.version_matches().unwrap());
        let meta = manager.collection(META_DATA, true).unwrap();
        assert_eq!(meta.count(&Filter::All).unwrap(), 1);
    }

    #[test]
    fn version_document_is_written_once_under_its_fixed_id() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.create_collection(META_DATA).unwrap();
        assert!(write_version_document(&store).unwrap());
        assert!(!write_version_document(&store).unwrap());
        assert_eq!(store.count(META_DATA, &Filter::All).unwrap(), 1);
        assert!(store
            .find_one(
                META_DATA,
                &Filter::by_id(VERSION_DOCUMENT_ID),
                None,
                &Projection::All
            )
            .unwrap()
            .is_some());
    }

    #[test]
    fn disconnected_manager_reports_unavailable_store() {
        let mut manager = Manager::open(StoreConfig::in_memory()).unwrap();
        manager.disconnect();
        assert!(!manager.connected());
        assert!(matches!(
            manager.server_time().unwrap_err(),
            EntityError::StoreUnavailable(_)
        ));
    }

    #[test]
    fn invalid_config_is_rejected_before_connecting() {
        let config = StoreConfig {
            database_name: "bad name".to_string(),
            ..StoreConfig::in_memory()
        };
        assert!(matches!(
            Manager::new(config).unwrap_err(),
            EntityError::Config(_)
        ));
    }
}
