//! End-to-end scenarios over a real rocksdb store: restart recovery,
//! tampering, and cross-version verification.

use balloon::{Balloon, Error, Snapshot};
use hashing::{Hasher, Sha256Hasher};
use storage::{Mutation, Store, Table};
use testutil::open_rocksdb_store;

#[test]
fn restart_preserves_version_and_proofs() {
    let (store, _dir) = open_rocksdb_store("balloon_restart");

    let mut balloon = Balloon::new(store.clone(), Sha256Hasher::new()).unwrap();

    let mut last_snapshot = None;
    for i in 0u64..100 {
        let (snapshot, mutations) = balloon.add(&i.to_be_bytes()).unwrap();
        store.mutate(&mutations).unwrap();
        last_snapshot = Some(snapshot);
    }
    let last_snapshot = last_snapshot.unwrap();

    balloon.close();

    // a fresh balloon over the same store resumes at the next version and
    // serves proofs for everything appended before the restart
    let balloon = Balloon::new(store.clone(), Sha256Hasher::new()).unwrap();
    assert_eq!(balloon.version(), 100);

    for i in 0u64..100 {
        let event = i.to_be_bytes();
        let proof = balloon
            .query_membership(&event, last_snapshot.version)
            .unwrap();
        assert!(
            proof.verify(&event, &last_snapshot),
            "event {i} should verify after reopening"
        );
    }
}

#[test]
fn tampered_index_row_breaks_the_query() {
    let (store, _dir) = open_rocksdb_store("balloon_tamper");

    let mut balloon = Balloon::new(store.clone(), Sha256Hasher::new()).unwrap();

    let event = b"Never knows best";
    let event_digest = Sha256Hasher::new().digest(&[event]);

    let (snapshot, mutations) = balloon.add(event).unwrap();
    store.mutate(&mutations).unwrap();

    let proof = balloon.query_membership(event, snapshot.version).unwrap();
    assert!(proof.verify(event, &snapshot));

    // flip the stored version to all-ones
    store
        .mutate(&[Mutation::set(
            Table::Index,
            event_digest.as_bytes().to_vec(),
            vec![0xff; 10],
        )])
        .unwrap();
    assert!(balloon.query_membership(event, snapshot.version).is_err());

    // remove the row outright and the event is gone
    store
        .delete(Table::Index, event_digest.as_bytes())
        .unwrap();
    assert!(matches!(
        balloon.query_membership(event, snapshot.version),
        Err(Error::NotFound)
    ));
}

#[test]
fn proofs_span_versions_and_restarts() {
    let (store, _dir) = open_rocksdb_store("balloon_span");

    let mut balloon = Balloon::new(store.clone(), Sha256Hasher::new()).unwrap();

    let events: Vec<Vec<u8>> = (0..10)
        .map(|i| format!("event {i}").into_bytes())
        .collect();
    let mut snapshots = Vec::new();
    for event in &events {
        let (snapshot, mutations) = balloon.add(event).unwrap();
        store.mutate(&mutations).unwrap();
        snapshots.push(snapshot);
    }

    // membership of every event at every later version; the hyper check
    // always runs against the latest root, so splice it into the snapshot
    let latest = snapshots.last().unwrap().clone();
    for (i, event) in events.iter().enumerate() {
        for j in i..events.len() {
            let proof = balloon.query_membership(event, j as u64).unwrap();
            let snapshot = Snapshot {
                hyper_digest: latest.hyper_digest.clone(),
                ..snapshots[j].clone()
            };
            assert!(
                proof.verify(event, &snapshot),
                "event {i} should verify at version {j}"
            );
        }
    }

    // consistency between every pair of versions
    for start in 0..snapshots.len() {
        for end in start..snapshots.len() {
            let proof = balloon
                .query_consistency(start as u64, end as u64)
                .unwrap();
            assert!(
                proof.verify(&snapshots[start], &snapshots[end]),
                "consistency ({start}, {end}) should verify"
            );
        }
    }

    // and the consistency checks still hold after a restart
    balloon.close();
    let balloon = Balloon::new(store.clone(), Sha256Hasher::new()).unwrap();
    let proof = balloon.query_consistency(3, 9).unwrap();
    assert!(proof.verify(&snapshots[3], &snapshots[9]));
}
