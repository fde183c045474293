//! Integration test: split assignment through the coordinator's
//! task-facing API, including restore after a coordinator restart.

use std::collections::HashSet;

use laminar_source_coordinator::split::{AssignmentEntry, AssignmentStatus};
use laminar_source_coordinator::{
    CoordinatorConfig, CoordinatorError, EnumeratorCheckpoint, SourceCoordinator, Split,
    SplitAssignMode, SplitId,
};

fn splits(prefix: &str, n: usize) -> Vec<Split> {
    (0..n)
        .map(|i| Split::new(format!("{prefix}{i}"), i as u64))
        .collect()
}

fn coordinator(parallelism: usize, batch: usize, mode: SplitAssignMode) -> SourceCoordinator {
    SourceCoordinator::new(CoordinatorConfig {
        parallelism,
        split_batch_size: batch,
        assign_mode: mode,
        ..CoordinatorConfig::default()
    })
    .unwrap()
}

/// Has every task request until it gets nothing back; returns what each got.
fn drain(coord: &SourceCoordinator, parallelism: usize) -> Vec<Vec<SplitId>> {
    let mut held = vec![Vec::new(); parallelism];
    loop {
        let mut progressed = false;
        for (task, got) in held.iter_mut().enumerate() {
            let batch = coord.request_splits(task, usize::MAX).unwrap();
            progressed |= !batch.is_empty();
            got.extend(batch.into_iter().map(|s| s.id));
        }
        if !progressed {
            return held;
        }
    }
}

#[test]
fn test_fair_three_tasks_ten_splits() {
    let coord = coordinator(3, 2, SplitAssignMode::Fair);
    coord.add_splits(splits("s", 10)).unwrap();

    let held = drain(&coord, 3);
    for got in &held {
        assert!((3..=4).contains(&got.len()), "task holds {}", got.len());
    }

    let union: HashSet<_> = held.iter().flatten().cloned().collect();
    let total: usize = held.iter().map(Vec::len).sum();
    assert_eq!(total, 10);
    assert_eq!(union.len(), 10);
    assert_eq!(coord.unassigned_len(), 0);
}

#[test]
fn test_fair_loads_stay_within_one_batch() {
    let parallelism = 4;
    let batch = 3;
    let coord = coordinator(parallelism, batch, SplitAssignMode::Fair);

    // Deterministic interleaving of discoveries and uneven requests.
    for round in 0..20_usize {
        coord
            .add_splits(splits(&format!("r{round}-"), round % 7 + 1))
            .unwrap();
        let task = round % parallelism;
        coord.request_splits(task, round % batch + 1).unwrap();

        let totals: Vec<usize> = (0..parallelism)
            .map(|t| coord.task_load(t).unwrap().total())
            .collect();
        let max = totals.iter().max().unwrap();
        let min = totals.iter().min().unwrap();
        assert!(max - min <= batch, "round {round}: loads {totals:?}");
    }
}

#[test]
fn test_preemptive_requester_takes_next_batch() {
    let coord = coordinator(3, 2, SplitAssignMode::Preemptive);
    coord.add_splits(splits("s", 7)).unwrap();

    let ids = |v: Vec<Split>| v.into_iter().map(|s| s.id.0).collect::<Vec<_>>();
    assert_eq!(ids(coord.request_splits(2, 10).unwrap()), vec!["s0", "s1"]);
    assert_eq!(ids(coord.request_splits(0, 10).unwrap()), vec!["s2", "s3"]);
    // Task 2 drained its backlog first and comes back for more.
    assert_eq!(ids(coord.request_splits(2, 10).unwrap()), vec!["s4", "s5"]);
    assert_eq!(ids(coord.request_splits(1, 10).unwrap()), vec!["s6"]);
    assert!(coord.request_splits(0, 10).unwrap().is_empty());
}

#[test]
fn test_preemptive_waiting_tasks_tie_break_on_lowest_index() {
    let coord = coordinator(2, 2, SplitAssignMode::Preemptive);
    assert!(coord.request_splits(1, 10).unwrap().is_empty());
    assert!(coord.request_splits(0, 10).unwrap().is_empty());

    coord.add_splits(splits("s", 2)).unwrap();
    assert_eq!(coord.task_load(0).unwrap().pending, 2);
    assert!(coord.request_splits(1, 10).unwrap().is_empty());
    assert_eq!(coord.request_splits(0, 10).unwrap().len(), 2);
}

#[test]
fn test_duplicates_are_dropped_not_fatal() {
    let coord = coordinator(2, 5, SplitAssignMode::Fair);
    coord.add_splits(splits("s", 3)).unwrap();
    let outcome = coord.add_splits(splits("s", 5)).unwrap();
    assert_eq!(outcome.added, 2);
    assert_eq!(outcome.duplicates, 3);
    assert_eq!(coord.metrics().duplicate_splits, 3);

    let total: usize = drain(&coord, 2).iter().map(Vec::len).sum();
    assert_eq!(total, 5);
}

#[test]
fn test_finished_splits_never_return_to_pool() {
    let coord = coordinator(1, 5, SplitAssignMode::Fair);
    coord.add_splits(splits("s", 2)).unwrap();
    let batch = coord.request_splits(0, 5).unwrap();
    for split in &batch {
        assert!(coord.notify_task_finished_split(0, &split.id).unwrap());
    }
    assert!(coord.request_splits(0, 5).unwrap().is_empty());
    assert_eq!(coord.metrics().splits_finished, 2);
}

#[test]
fn test_failed_reader_gets_its_own_splits_back() {
    let coord = coordinator(2, 2, SplitAssignMode::Fair);
    coord.add_splits(splits("s", 4)).unwrap();
    let first = coord.request_splits(0, 2).unwrap();
    let ids: Vec<SplitId> = first.iter().map(|s| s.id.clone()).collect();

    // Task 1 cannot steal task 0's splits.
    assert_eq!(coord.add_splits_back(1, &ids).unwrap(), 0);
    assert_eq!(coord.add_splits_back(0, &ids).unwrap(), 2);

    let again = coord.request_splits(0, 2).unwrap();
    assert_eq!(again, first);
}

#[test]
fn test_restore_reproduces_assignment() {
    let config = CoordinatorConfig {
        parallelism: 3,
        split_batch_size: 2,
        ..CoordinatorConfig::default()
    };
    let coord = SourceCoordinator::new(config.clone()).unwrap();
    coord.add_splits(splits("s", 8)).unwrap();
    coord.request_splits(0, 2).unwrap();
    coord.request_splits(2, 1).unwrap();

    let before: Vec<Vec<SplitId>> = (0..3).map(|t| coord.assigned_splits(t)).collect();
    let bytes = coord.snapshot_state(11).to_bytes().unwrap();

    let restored = SourceCoordinator::restore_from_bytes(config, &bytes).unwrap();
    let after: Vec<Vec<SplitId>> = (0..3).map(|t| restored.assigned_splits(t)).collect();
    assert_eq!(before, after);

    // New splits after restore keep old owners untouched.
    restored.add_splits(splits("n", 3)).unwrap();
    for (task, owned) in before.iter().enumerate() {
        let now = restored.assigned_splits(task);
        assert_eq!(&now[..owned.len()], owned.as_slice());
    }

    // Delivered splits are not served again; pending ones are.
    let served: HashSet<SplitId> = drain(&restored, 3).into_iter().flatten().collect();
    for task in [0, 2] {
        let delivered = &before[task][0];
        assert!(!served.contains(delivered));
    }
}

#[test]
fn test_corrupt_state_aborts_startup() {
    let owned = |task| AssignmentEntry {
        split: Split::new("dup", 0),
        task,
        status: AssignmentStatus::Delivered,
    };
    let checkpoint = EnumeratorCheckpoint::new(1, Vec::new(), vec![owned(0), owned(1)], None);
    let config = CoordinatorConfig {
        parallelism: 2,
        ..CoordinatorConfig::default()
    };

    let err = SourceCoordinator::restore(config.clone(), checkpoint).unwrap_err();
    assert!(err.is_corrupt_state());
    assert!(matches!(err, CoordinatorError::DuplicateOwner { .. }));

    let both = EnumeratorCheckpoint::new(1, vec![Split::new("dup", 0)], vec![owned(1)], None);
    let err = SourceCoordinator::restore(config, both).unwrap_err();
    assert!(matches!(err, CoordinatorError::OwnedAndUnassigned { task: 1, .. }));
}

#[test]
fn test_unknown_task_is_an_error() {
    let coord = coordinator(2, 2, SplitAssignMode::Fair);
    assert!(matches!(
        coord.request_splits(2, 1),
        Err(CoordinatorError::UnknownTask {
            task: 2,
            parallelism: 2
        })
    ));
}
