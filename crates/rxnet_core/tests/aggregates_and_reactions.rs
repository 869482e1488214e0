use rxnet_core::{
    Atom, AtomCollection, Compound, ElementaryStep, Entity, EntityError, EntityKind, Identifier,
    Manager, ModelDescriptor, ReactantType, Reaction, Side, StoreConfig, Structure,
    StructureLabel,
};
use rxnet_core::entity::structure::MAX_DUPLICATE_HOPS;

fn manager() -> Manager {
    let manager = Manager::open(StoreConfig::in_memory()).unwrap();
    manager.init().unwrap();
    manager
}

fn helium(manager: &Manager) -> Structure {
    Structure::make(
        &AtomCollection::new(vec![Atom::new("He", [0.0, 0.0, 0.0])]),
        0,
        1,
        &ModelDescriptor::new("dft", "pbe", "def2-svp"),
        StructureLabel::MinimumOptimized,
        manager.collection_for(EntityKind::Structure).unwrap(),
    )
    .unwrap()
}

#[test]
fn compound_keeps_member_order_and_centroid() {
    let manager = manager();
    let compounds = manager.collection_for(EntityKind::Compound).unwrap();
    let [s1, s2, s3, s4] = [(); 4].map(|_| Identifier::generate());

    let compound = Compound::make(&[s1, s2, s3], compounds).unwrap();
    assert_eq!(compound.get_centroid().unwrap(), s1);

    compound.add_structure(s4).unwrap();
    compound.remove_structure(s1).unwrap();
    assert_eq!(compound.get_structures().unwrap(), vec![s2, s3, s4]);
    assert_eq!(compound.get_centroid().unwrap(), s2);
    assert_eq!(compound.has_structures().unwrap(), 3);
}

#[test]
fn reactant_side_both_edits_both_lists() {
    let manager = manager();
    let reactions = manager.collection_for(EntityKind::Reaction).unwrap();
    let steps = manager.collection_for(EntityKind::ElementaryStep).unwrap();
    let (a, b, shared) = (Identifier::generate(), Identifier::generate(), Identifier::generate());

    let reaction = Reaction::make(&[a], &[b], reactions).unwrap();
    reaction.add_reactant(shared, Side::Both, ReactantType::Flask).unwrap();
    let (lhs, rhs) = reaction.has_reactants().unwrap();
    assert_eq!((lhs, rhs), (2, 2));
    assert_eq!(reaction.has_reactant(shared).unwrap(), Side::Both);
    assert_eq!(
        reaction.get_reactants(Side::Both).unwrap(),
        (vec![a, shared], vec![b, shared])
    );
    reaction.remove_reactant(shared, Side::Both).unwrap();
    assert_eq!(reaction.has_reactants().unwrap(), (1, 1));

    let step = ElementaryStep::make(&[a], &[b], steps).unwrap();
    step.add_reactant(shared, Side::Both).unwrap();
    assert_eq!(step.has_reactants().unwrap(), (2, 2));
    assert_eq!(step.has_reactant(shared).unwrap(), Side::Both);
    step.set_reactants(&[shared], Side::Both).unwrap();
    assert_eq!(step.get_reactants(Side::Both).unwrap(), (vec![shared], vec![shared]));
    step.remove_reactant(shared, Side::Lhs).unwrap();
    assert_eq!(step.has_reactant(shared).unwrap(), Side::Rhs);

    let reaction_id = reaction.id().unwrap();
    step.set_reaction(reaction_id).unwrap();
    reaction.add_elementary_step(step.id().unwrap()).unwrap();
    assert_eq!(step.get_reaction().unwrap(), reaction_id);
    assert!(reaction.has_elementary_step(step.id().unwrap()).unwrap());
}

#[test]
fn elementary_step_path_is_ordered() {
    let manager = manager();
    let steps = manager.collection_for(EntityKind::ElementaryStep).unwrap();
    let step = ElementaryStep::make(&[], &[], steps).unwrap();
    let path: Vec<Identifier> = (0..3).map(|_| Identifier::generate()).collect();

    step.set_path(&path).unwrap();
    assert_eq!(step.get_path().unwrap(), path);
    assert!(step.has_structure_in_path(path[1]).unwrap());
    step.remove_from_path(path[1]).unwrap();
    assert!(!step.has_structure_in_path(path[1]).unwrap());
    assert_eq!(step.has_path().unwrap(), 2);
}

#[test]
fn duplicate_of_a_duplicate_resolves_recursively() {
    let manager = manager();
    let original = helium(&manager);
    let duplicate = helium(&manager);
    let second_order = helium(&manager);
    let compound = Identifier::generate();

    original.set_aggregate(compound).unwrap();
    duplicate.set_original(original.id().unwrap()).unwrap();
    second_order.set_original(duplicate.id().unwrap()).unwrap();

    assert!(!second_order.has_aggregate(false).unwrap());
    assert!(matches!(
        second_order.get_aggregate(false).unwrap_err(),
        EntityError::FieldNotSet { .. }
    ));
    assert_eq!(second_order.get_aggregate(true).unwrap(), compound);
    assert_eq!(duplicate.get_aggregate(true).unwrap(), compound);

    // An own aggregate wins over the chain.
    let own = Identifier::generate();
    duplicate.set_aggregate(own).unwrap();
    assert_eq!(second_order.get_aggregate(true).unwrap(), own);
}

#[test]
fn chain_without_aggregate_reports_not_set() {
    let manager = manager();
    let original = helium(&manager);
    let duplicate = helium(&manager);
    duplicate.set_original(original.id().unwrap()).unwrap();

    assert!(!duplicate.has_aggregate(true).unwrap());
    assert!(matches!(
        duplicate.get_aggregate(true).unwrap_err(),
        EntityError::FieldNotSet { .. }
    ));
}

#[test]
fn duplicate_cycles_and_overlong_chains_are_rejected() {
    let manager = manager();
    let first = helium(&manager);
    let second = helium(&manager);
    first.set_original(second.id().unwrap()).unwrap();
    second.set_original(first.id().unwrap()).unwrap();
    assert!(matches!(
        first.get_aggregate(true).unwrap_err(),
        EntityError::DuplicateCycle { .. }
    ));
    // Non-recursive lookups never follow the chain.
    assert!(!first.has_aggregate(false).unwrap());

    let chain: Vec<Structure> = (0..=MAX_DUPLICATE_HOPS + 1).map(|_| helium(&manager)).collect();
    for pair in chain.windows(2) {
        pair[0].set_original(pair[1].id().unwrap()).unwrap();
    }
    chain
        .last()
        .unwrap()
        .set_aggregate(Identifier::generate())
        .unwrap();
    assert!(matches!(
        chain[0].has_aggregate(true).unwrap_err(),
        EntityError::DuplicateCycle { .. }
    ));
    assert!(chain[2].has_aggregate(true).unwrap());
}
