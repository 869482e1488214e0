use rxnet_core::{
    CalculationQueue, Calculation, Entity, EntityKind, Identifier, Job, Manager, ModelDescriptor,
    StoreConfig,
};
use std::collections::HashSet;
use std::sync::{Arc, Barrier};
use std::thread;

const CALCULATIONS: usize = 24;
const WORKERS: usize = 4;

#[test]
fn concurrent_workers_never_share_a_claim() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("queue.sqlite3");

    let seeding = Manager::open(StoreConfig::file(&path)).unwrap();
    seeding.init().unwrap();
    let queue = CalculationQueue::new(
        seeding.collection_for(EntityKind::Calculation).unwrap(),
        "seeder",
    );
    let mut submitted = HashSet::new();
    for _ in 0..CALCULATIONS {
        let calculation = Calculation::make(
            &ModelDescriptor::new("dft", "pbe", "def2-svp"),
            &Job::new("sp"),
            &[Identifier::generate()],
            seeding.collection_for(EntityKind::Calculation).unwrap(),
        )
        .unwrap();
        queue.submit(&calculation).unwrap();
        submitted.insert(calculation.id().unwrap());
    }

    // Each worker owns its own connection, like separate processes would.
    let workers: Vec<Manager> = (0..WORKERS)
        .map(|_| Manager::open(StoreConfig::file(&path)).unwrap())
        .collect();
    let barrier = Arc::new(Barrier::new(WORKERS));
    let handles: Vec<_> = workers
        .into_iter()
        .enumerate()
        .map(|(index, manager)| {
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let queue = CalculationQueue::new(
                    manager.collection_for(EntityKind::Calculation).unwrap(),
                    format!("worker-{index}"),
                );
                barrier.wait();
                let mut claimed = Vec::new();
                while let Some(calculation) = queue.claim_next(None).unwrap() {
                    assert_eq!(calculation.get_executor().unwrap(), queue.executor());
                    claimed.push(calculation.id().unwrap());
                }
                claimed
            })
        })
        .collect();

    let mut claimed = Vec::new();
    for handle in handles {
        claimed.extend(handle.join().unwrap());
    }
    let unique: HashSet<_> = claimed.iter().copied().collect();
    assert_eq!(claimed.len(), CALCULATIONS);
    assert_eq!(unique, submitted);
    assert_eq!(queue.pending_count(None).unwrap(), 0);
}
