use rxnet_core::store::{CursorId, Timestamp};
use rxnet_core::{
    AccessCause, Atom, AtomCollection, Calculation, CollectionHandle, Compound, Document,
    ElementaryStep, Entity, EntityError, EntityKind, Filter, Flask, Identifier, Job, Manager,
    ModelDescriptor, NumberProperty, Projection, Reaction, ReturnDocument, Sort, SqliteStore,
    Store, StoreConfig, StoreResult, Structure, Update,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

fn manager() -> Manager {
    let manager = Manager::open(StoreConfig::in_memory()).unwrap();
    manager.init().unwrap();
    manager
}

fn structures(manager: &Manager) -> CollectionHandle {
    manager.collection_for(EntityKind::Structure).unwrap()
}

fn argon() -> AtomCollection {
    AtomCollection::new(vec![Atom::new("Ar", [0.0, 0.0, 0.0])])
}

fn assert_cause<T: std::fmt::Debug>(result: Result<T, EntityError>, expected: AccessCause) {
    match result.unwrap_err() {
        EntityError::NotAccessible { cause, .. } => assert_eq!(cause, expected),
        other => panic!("unexpected error: {other}"),
    }
}

/// Delegating store that counts every call reaching the backend.
struct CountingStore {
    inner: SqliteStore,
    calls: AtomicUsize,
}

impl CountingStore {
    fn new() -> Self {
        Self {
            inner: SqliteStore::open_in_memory().unwrap(),
            calls: AtomicUsize::new(0),
        }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn tick(&self) -> &SqliteStore {
        self.calls.fetch_add(1, Ordering::SeqCst);
        &self.inner
    }
}

impl Store for CountingStore {
    fn has_collection(&self, name: &str) -> StoreResult<bool> {
        self.tick().has_collection(name)
    }

    fn create_collection(&self, name: &str) -> StoreResult<bool> {
        self.tick().create_collection(name)
    }

    fn drop_collection(&self, name: &str) -> StoreResult<bool> {
        self.tick().drop_collection(name)
    }

    fn collection_names(&self) -> StoreResult<Vec<String>> {
        self.tick().collection_names()
    }

    fn insert(&self, collection: &str, id: Identifier, document: Document) -> StoreResult<()> {
        self.tick().insert(collection, id, document)
    }

    fn find_one(
        &self,
        collection: &str,
        filter: &Filter,
        sort: Option<&Sort>,
        projection: &Projection,
    ) -> StoreResult<Option<Document>> {
        self.tick().find_one(collection, filter, sort, projection)
    }

    fn find_one_and_update(
        &self,
        collection: &str,
        filter: &Filter,
        update: &Update,
        sort: Option<&Sort>,
        return_document: ReturnDocument,
    ) -> StoreResult<Option<Document>> {
        self.tick()
            .find_one_and_update(collection, filter, update, sort, return_document)
    }

    fn delete_one(&self, collection: &str, filter: &Filter) -> StoreResult<bool> {
        self.tick().delete_one(collection, filter)
    }

    fn count(&self, collection: &str, filter: &Filter) -> StoreResult<u64> {
        self.tick().count(collection, filter)
    }

    fn open_cursor(
        &self,
        collection: &str,
        filter: &Filter,
        projection: &Projection,
        batch_size: usize,
    ) -> StoreResult<CursorId> {
        self.tick().open_cursor(collection, filter, projection, batch_size)
    }

    fn next_batch(&self, cursor: CursorId) -> StoreResult<Vec<Document>> {
        self.tick().next_batch(cursor)
    }

    fn close_cursor(&self, cursor: CursorId) {
        self.tick().close_cursor(cursor)
    }

    fn sample(&self, collection: &str, filter: &Filter, size: usize) -> StoreResult<Vec<Document>> {
        self.tick().sample(collection, filter, size)
    }

    fn server_time(&self) -> StoreResult<Timestamp> {
        self.tick().server_time()
    }

    fn drop_all(&self) -> StoreResult<()> {
        self.tick().drop_all()
    }

    fn close(&self) {
        self.tick().close()
    }
}

#[test]
fn unlinked_or_unidentified_handles_never_reach_the_store() {
    let store = Arc::new(CountingStore::new());
    let manager = Manager::with_store(StoreConfig::in_memory(), store.clone()).unwrap();
    manager.init().unwrap();
    let structures = structures(&manager);
    let calculations = manager.collection_for(EntityKind::Calculation).unwrap();
    let before = store.calls();

    assert_cause(Structure::new().get_charge(), AccessCause::MissingCollection);
    assert_cause(
        Structure::with_id(Identifier::generate()).get_charge(),
        AccessCause::MissingCollection,
    );
    assert_cause(
        Structure::in_collection(structures.clone()).get_charge(),
        AccessCause::MissingId,
    );
    assert_cause(
        Structure::in_collection(structures.clone()).set_charge(1),
        AccessCause::MissingId,
    );
    assert_cause(
        Structure::in_collection(structures).get_aggregate(true),
        AccessCause::MissingId,
    );

    assert_cause(Calculation::new().get_priority(), AccessCause::MissingCollection);
    assert_cause(Compound::new().get_structures(), AccessCause::MissingCollection);
    assert_cause(Flask::new().get_compounds(), AccessCause::MissingCollection);
    assert_cause(Reaction::new().has_reactants(), AccessCause::MissingCollection);
    assert_cause(ElementaryStep::new().get_path(), AccessCause::MissingCollection);
    assert_cause(NumberProperty::new().get_data(), AccessCause::MissingCollection);
    assert_cause(Structure::new().exists(), AccessCause::MissingCollection);
    assert_cause(
        Calculation::in_collection(calculations.clone()).set_priority(500),
        AccessCause::MissingId,
    );
    assert_cause(
        Calculation::in_collection(calculations).set_setting("max_iterations", 5),
        AccessCause::MissingId,
    );

    assert_eq!(store.calls(), before);
}

#[test]
fn link_assign_create_and_wipe_walk_the_state_machine() {
    let manager = manager();
    let mut structure = Structure::new();
    assert!(!structure.has_link() && !structure.has_id());

    assert_cause(structure.create(&argon(), 0, 1), AccessCause::MissingCollection);

    structure.link(structures(&manager));
    let id = structure.create(&argon(), 0, 1).unwrap();
    assert!(structure.has_id());
    assert!(structure.exists().unwrap());

    let copy = structure.clone();
    copy.set_charge(2).unwrap();
    assert_eq!(structure.get_charge().unwrap(), 2);

    structure.wipe(true).unwrap();
    assert!(!structure.has_id());
    assert!(structure.has_link());
    assert!(!copy.exists().unwrap());
    assert!(matches!(
        copy.get_charge().unwrap_err(),
        EntityError::NotFound { id: Some(found), .. } if found == id
    ));

    let mut stale = copy.clone();
    assert!(matches!(stale.clone().wipe(true).unwrap_err(), EntityError::NotFound { .. }));
    stale.wipe(false).unwrap();
    assert!(!stale.has_id());

    structure.detach();
    assert!(!structure.has_link());
}

#[test]
fn timestamps_track_creation_and_modification() {
    let manager = manager();
    let first = Structure::make(
        &argon(),
        0,
        1,
        &ModelDescriptor::wildcard(),
        rxnet_core::StructureLabel::UserGuess,
        structures(&manager),
    )
    .unwrap();
    let mut second = Structure::in_collection(structures(&manager));
    second.create(&argon(), 1, 2).unwrap();

    assert!(first.has_created_timestamp().unwrap());
    assert!(first.older_than(&second, true).unwrap());
    assert!(!second.older_than(&first, true).unwrap());

    let before = first.last_modified().unwrap();
    first.touch().unwrap();
    assert!(first.last_modified().unwrap() > before);
    assert!(second.older_than(&first, false).unwrap());
    assert!(first.created().unwrap() <= first.last_modified().unwrap());
}

#[test]
fn analysis_and_exploration_flags_default_to_enabled() {
    let manager = manager();
    let compounds = manager.collection_for(EntityKind::Compound).unwrap();
    let compound = Compound::make(&[Identifier::generate()], compounds).unwrap();

    assert!(compound.analyze().unwrap());
    assert!(compound.explore().unwrap());
    compound.disable_analysis().unwrap();
    compound.disable_exploration().unwrap();
    assert!(!compound.analyze().unwrap());
    assert!(!compound.explore().unwrap());
    compound.enable_exploration().unwrap();
    assert!(compound.explore().unwrap());

    let json: serde_json::Value = serde_json::from_str(&compound.json().unwrap()).unwrap();
    assert_eq!(json["_objecttype"], "compound");
    assert_eq!(json["analysis_disabled"], true);
}

#[test]
fn fetching_through_the_wrong_kind_is_a_type_mismatch() {
    let manager = manager();
    let calculations = manager.collection_for(EntityKind::Calculation).unwrap();
    let calculation = Calculation::make(
        &ModelDescriptor::new("dft", "pbe", "def2-svp"),
        &Job::new("sp"),
        &[],
        calculations.clone(),
    )
    .unwrap();

    let err = calculations
        .fetch::<Structure>(calculation.id().unwrap())
        .unwrap_err();
    match err {
        EntityError::ObjectTypeMismatch { expected, found, .. } => {
            assert_eq!(expected, EntityKind::Structure);
            assert_eq!(found, "calculation");
        }
        other => panic!("unexpected error: {other}"),
    }
}
