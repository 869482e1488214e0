use rxnet_core::{
    Atom, AtomCollection, Compound, Entity, EntityError, Filter, Manager, ModelDescriptor,
    ReturnDocument, Sort, StoreConfig, Structure, StructureLabel, Update,
};
use std::collections::HashSet;
use std::thread;
use std::time::Duration;

fn initialized(config: StoreConfig) -> Manager {
    let manager = Manager::open(config).unwrap();
    manager.init().unwrap();
    manager
}

fn hydrogen() -> AtomCollection {
    AtomCollection::new(vec![
        Atom::new("H", [0.0, 0.0, 0.0]),
        Atom::new("H", [0.0, 0.0, 1.4]),
    ])
}

fn structure_with_charge(manager: &Manager, charge: i32) -> Structure {
    Structure::make(
        &hydrogen(),
        charge,
        1,
        &ModelDescriptor::new("dft", "pbe", "def2-svp"),
        StructureLabel::MinimumOptimized,
        manager.collection("structures", true).unwrap(),
    )
    .unwrap()
}

#[test]
fn fetch_one_honors_filter_and_sort() {
    let manager = initialized(StoreConfig::in_memory());
    let structures = manager.collection("structures", true).unwrap();
    for charge in [0, 2, -1, 1] {
        structure_with_charge(&manager, charge);
    }

    let highest: Structure = structures
        .fetch_one(&Filter::gte("charge", 0), Some(&Sort::descending("charge")))
        .unwrap();
    assert_eq!(highest.get_charge().unwrap(), 2);

    let err = structures
        .fetch_one::<Structure>(&Filter::gt("charge", 5), None)
        .unwrap_err();
    assert!(matches!(err, EntityError::NotFound { id: None, .. }));
    assert_eq!(structures.count(&Filter::lt("charge", 1)).unwrap(), 2);
}

#[test]
fn fetch_and_update_one_returns_requested_state() {
    let manager = initialized(StoreConfig::in_memory());
    let structures = manager.collection("structures", true).unwrap();
    let original = structure_with_charge(&manager, 0);

    let after: Structure = structures
        .fetch_and_update_one(
            &Filter::eq("charge", 0),
            &Update::new().set("charge", 3),
            None,
            ReturnDocument::After,
        )
        .unwrap()
        .unwrap();
    assert_eq!(after.id().unwrap(), original.id().unwrap());
    assert_eq!(original.get_charge().unwrap(), 3);

    let none = structures
        .fetch_and_update_one::<Structure>(
            &Filter::eq("charge", 0),
            &Update::new().set("charge", 4),
            None,
            ReturnDocument::Before,
        )
        .unwrap();
    assert!(none.is_none());

    // Kind scoping: compounds never match a structure-typed claim.
    let compounds = manager.collection("compounds", true).unwrap();
    Compound::make(&[], compounds.clone()).unwrap();
    let claimed = compounds
        .fetch_and_update_one::<Structure>(
            &Filter::All,
            &Update::new().set("comment", "x"),
            None,
            ReturnDocument::After,
        )
        .unwrap();
    assert!(claimed.is_none());
}

#[test]
fn random_sample_is_bounded_and_distinct() {
    let manager = initialized(StoreConfig::in_memory());
    let structures = manager.collection("structures", true).unwrap();
    for charge in 0..6 {
        structure_with_charge(&manager, charge);
    }

    let sample: Vec<Structure> = structures.random_sample(4).unwrap();
    let ids: HashSet<_> = sample.iter().map(|s| s.id().unwrap()).collect();
    assert_eq!(ids.len(), 4);

    let all: Vec<Structure> = structures.random_sample(50).unwrap();
    assert_eq!(all.len(), 6);
}

#[test]
fn iteration_past_cursor_lifetime_fails_with_cursor_expired() {
    let config = StoreConfig {
        cursor_batch_size: 1,
        cursor_lifetime_ms: 20,
        ..StoreConfig::in_memory()
    };
    let manager = initialized(config);
    for charge in 0..3 {
        structure_with_charge(&manager, charge);
    }
    let structures = manager.collection("structures", true).unwrap();

    let mut cursor = structures.query::<Structure>(&Filter::All).unwrap();
    assert!(cursor.next().unwrap().is_ok());
    thread::sleep(Duration::from_millis(80));
    assert!(matches!(
        cursor.next().unwrap().unwrap_err(),
        EntityError::CursorExpired { .. }
    ));
    assert!(cursor.next().is_none());
}

#[test]
fn handles_obtained_before_init_are_unavailable() {
    let manager = Manager::open(StoreConfig::in_memory()).unwrap();
    assert!(matches!(
        manager.collection("structures", true).unwrap_err(),
        EntityError::CollectionUnavailable { .. }
    ));

    manager.init().unwrap();
    let structures = manager.collection("structures", true).unwrap();
    let structure = structure_with_charge(&manager, 0);
    manager.wipe().unwrap();

    assert!(matches!(
        structures.count(&Filter::All).unwrap_err(),
        EntityError::CollectionUnavailable { .. }
    ));
    assert!(matches!(
        structure.get_charge().unwrap_err(),
        EntityError::CollectionUnavailable { .. }
    ));
}

#[test]
fn query_ids_and_iterate_all_agree() {
    let manager = initialized(StoreConfig {
        cursor_batch_size: 2,
        ..StoreConfig::in_memory()
    });
    let structures = manager.collection("structures", true).unwrap();
    let created: Vec<_> = (0..5)
        .map(|charge| structure_with_charge(&manager, charge).id().unwrap())
        .collect();

    let iterated: Vec<_> = structures
        .iterate_all::<Structure>(&Filter::All)
        .unwrap()
        .map(|structure| structure.unwrap().id().unwrap())
        .collect();
    assert_eq!(iterated, created);
    assert_eq!(structures.query_ids(&Filter::gte("charge", 3)).unwrap(), created[3..].to_vec());
}
