use super::*;
use crate::config::Compression;
use crate::error::Stage;
use crate::report::WorkerOutcome;
use crate::testing::{ScriptedFactory, batch, converters, task};

use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam::channel;

fn started(task: LoadTask, factory: ScriptedFactory) -> LoadPool<ScriptedFactory> {
    let mut pool = LoadPool::new(task, converters(), factory).expect("pool");
    pool.start().expect("start");
    pool
}

fn wait_for_state(pool: &LoadPool<ScriptedFactory>, worker: usize, state: WorkerState) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while pool.worker_state(worker) != Some(state) {
        assert!(
            Instant::now() < deadline,
            "worker {worker} never reached {state:?}"
        );
        thread::sleep(Duration::from_millis(5));
    }
}

fn ids(lines: &[String]) -> Vec<i64> {
    lines
        .iter()
        .map(|l| {
            let v: serde_json::Value = serde_json::from_str(l).expect("json line");
            v["id"].as_i64().expect("id")
        })
        .collect()
}

#[test]
fn batches_are_routed_round_robin() {
    for n in 1..=8usize {
        for k in [0usize, 1, n, 2 * n + 1, 17] {
            let factory = ScriptedFactory::default();
            let recorded = Arc::clone(&factory.recorded);
            let pool = started(task(n), factory);

            for i in 0..k {
                pool.enqueue(batch(i as i64, 1)).expect("enqueue");
            }
            let report = pool.commit().expect("commit");
            assert_eq!(report.workers.len(), n);

            for w in 0..n {
                let expected: Vec<i64> = (0..k).filter(|i| i % n == w).map(|i| i as i64).collect();
                assert_eq!(
                    ids(&recorded.lines(w)),
                    expected,
                    "n={n} k={k} worker={w}"
                );
                assert_eq!(report.workers[w].num_batches, expected.len() as u64);
            }
        }
    }
}

#[test]
fn input_rows_add_up_with_and_without_compression() {
    let sizes = [3usize, 0, 7, 1, 12, 5, 2];
    let total: usize = sizes.iter().sum();

    for compression in [Compression::None, Compression::Gzip] {
        for n in 1..=4 {
            let factory = ScriptedFactory::default();
            let recorded = Arc::clone(&factory.recorded);
            let mut t = task(n);
            t.copy.compression = compression;
            // Small chunks exercise the split path.
            t.chunk_size = 16;
            let pool = started(t, factory);

            let mut next_id = 0;
            for size in sizes {
                pool.enqueue(batch(next_id, size)).expect("enqueue");
                next_id += size as i64;
            }
            let report = pool.commit().expect("commit");

            let label = format!("{compression:?} n={n}");
            assert_eq!(report.num_input_rows(), total as u64, "{label}");
            assert_eq!(report.num_output_rows(), total as u64, "{label}");
            assert_eq!(recorded.total_lines(), total, "{label}");
            assert!(report.success(), "{label}");
        }
    }
}

#[test]
fn full_queue_blocks_the_producer() {
    let (open, gate) = channel::bounded::<()>(0);
    let factory = ScriptedFactory {
        gate: Some(gate),
        ..Default::default()
    };
    let pool = started(task(1), factory);
    let returned = AtomicUsize::new(0);

    thread::scope(|s| {
        s.spawn(|| {
            for i in 0..3 {
                pool.enqueue(batch(i, 1)).expect("enqueue");
                returned.fetch_add(1, Ordering::SeqCst);
            }
        });

        // Batch 0 is held by the worker stuck in connect, batch 1 fills the
        // queue, batch 2 has nowhere to go.
        thread::sleep(Duration::from_millis(200));
        assert_eq!(returned.load(Ordering::SeqCst), 2);

        drop(open);
    });

    assert_eq!(returned.load(Ordering::SeqCst), 3);
    let report = pool.commit().expect("commit");
    assert_eq!(report.num_input_rows(), 3);
}

#[test]
fn single_worker_loads_three_records() {
    let factory = ScriptedFactory::default();
    let recorded = Arc::clone(&factory.recorded);
    let pool = started(task(1), factory);

    pool.enqueue(batch(0, 3)).expect("enqueue");
    let report = pool.commit().expect("commit");

    let w = &report.workers[0];
    assert_eq!(
        (w.num_input_rows, w.num_output_rows, w.num_rejected_rows),
        (3, 3, 0)
    );
    assert!(report.success());
    assert_eq!(
        recorded.lines(0)[0],
        r#"{"id":0,"name":"row-0"}"#
    );
    assert_eq!(recorded.commits.load(Ordering::SeqCst), 1);
    assert_eq!(recorded.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn rejected_rows_do_not_fail_the_load_by_default() {
    let factory = ScriptedFactory {
        reject: vec![1],
        ..Default::default()
    };
    let pool = started(task(1), factory);

    pool.enqueue(batch(0, 3)).expect("enqueue");
    let report = pool.commit().expect("commit");

    let w = &report.workers[0];
    assert_eq!(
        (w.num_input_rows, w.num_output_rows, w.num_rejected_rows),
        (3, 2, 1)
    );
    assert!(report.success());
}

#[test]
fn abort_on_reject_fails_and_rolls_back() {
    let factory = ScriptedFactory {
        reject: vec![0, 2],
        ..Default::default()
    };
    let recorded = Arc::clone(&factory.recorded);
    let mut t = task(1);
    t.abort_on_reject = true;
    let pool = started(t, factory);

    pool.enqueue(batch(0, 3)).expect("enqueue");
    let err = pool.commit().expect_err("should fail");

    let LoadError::PoolFailed(report) = err else {
        panic!("expected a pool failure, got {err:?}");
    };
    assert!(matches!(
        report.workers[0].error(),
        Some(LoadError::Rejected { count: 2, .. })
    ));
    assert_eq!(report.workers[0].num_output_rows, 0);
    assert_eq!(recorded.commits.load(Ordering::SeqCst), 0);
    assert_eq!(recorded.rollbacks.load(Ordering::SeqCst), 1);
}

#[test]
fn dequeue_timeout_fails_the_pool() {
    let mut t = task(1);
    t.timeouts.dequeue = Duration::from_millis(1);
    let pool = started(t, ScriptedFactory::default());

    wait_for_state(&pool, 0, WorkerState::Failed);
    let err = pool.commit().expect_err("should fail");

    let LoadError::PoolFailed(report) = err else {
        panic!("expected a pool failure, got {err:?}");
    };
    assert!(!report.success());
    let cause = report.workers[0].error().expect("worker error");
    assert_eq!(cause.timeout_stage(), Some(Stage::Dequeue));
}

#[test]
fn enqueue_to_dead_worker_is_rejected() {
    let mut t = task(1);
    t.timeouts.dequeue = Duration::from_millis(1);
    let pool = started(t, ScriptedFactory::default());

    wait_for_state(&pool, 0, WorkerState::Failed);
    let err = pool.enqueue(batch(0, 1)).expect_err("dead worker");
    assert!(matches!(err, LoadError::WorkerDead(0)), "{err:?}");
}

#[test]
fn enqueue_timeout_is_fatal() {
    let (open, gate) = channel::bounded::<()>(0);
    let factory = ScriptedFactory {
        gate: Some(gate),
        ..Default::default()
    };
    let mut t = task(1);
    t.timeouts.enqueue = Duration::from_millis(200);
    let pool = started(t, factory);

    // The worker holds batch 0 while stuck in connect and batch 1 fills
    // its queue.
    pool.enqueue(batch(0, 1)).expect("enqueue");
    pool.enqueue(batch(1, 1)).expect("enqueue");

    let err = pool.enqueue(batch(2, 1)).expect_err("queue stays full");
    assert_eq!(err.timeout_stage(), Some(Stage::Enqueue), "{err:?}");
    assert!(matches!(err, LoadError::Timeout { worker: 0, .. }), "{err:?}");

    drop(open);
    let report = pool.commit().expect("commit");
    assert_eq!(report.num_input_rows(), 2);
}

#[test]
fn slow_cleanup_keeps_the_original_failure() {
    let finalize = ScriptedFactory {
        stall_load: Some(Duration::from_millis(300)),
        ..Default::default()
    };
    let load_error = ScriptedFactory {
        load_error: Some("COPY failed".into()),
        stall_rollback: Some(Duration::from_millis(300)),
        ..Default::default()
    };

    for (factory, finalize_timeout) in [(finalize, true), (load_error, false)] {
        let mut t = task(1);
        t.timeouts.write = Duration::from_millis(20);
        t.timeouts.rollback = Duration::from_millis(10);
        t.timeouts.close = Duration::from_millis(10);
        let pool = started(t, factory);

        pool.enqueue(batch(0, 2)).expect("enqueue");
        let err = pool.commit().expect_err("should fail");

        let LoadError::PoolFailed(report) = err else {
            panic!("expected a pool failure, got {err:?}");
        };
        let w = &report.workers[0];
        assert!(matches!(w.outcome, WorkerOutcome::Failed(_)), "{:?}", w.outcome);

        let cause = w.error().expect("worker error");
        if finalize_timeout {
            assert_eq!(cause.timeout_stage(), Some(Stage::Finalize), "{cause:?}");
        } else {
            assert!(
                matches!(cause, LoadError::Session { worker: 0, .. }),
                "{cause:?}"
            );
        }
    }
}

#[test]
fn two_workers_keep_enqueue_order() {
    let factory = ScriptedFactory::default();
    let recorded = Arc::clone(&factory.recorded);
    let pool = started(task(2), factory);

    for b in 0..4 {
        pool.enqueue(batch(b * 10, 2)).expect("enqueue");
    }
    pool.commit().expect("commit");

    assert_eq!(ids(&recorded.lines(0)), [0, 1, 20, 21]);
    assert_eq!(ids(&recorded.lines(1)), [10, 11, 30, 31]);
}

#[test]
fn idle_worker_succeeds_without_connecting() {
    let factory = ScriptedFactory::default();
    let recorded = Arc::clone(&factory.recorded);
    let pool = started(task(3), factory);

    pool.enqueue(batch(0, 2)).expect("enqueue");
    let report = pool.commit().expect("commit");

    assert!(report.success());
    assert_eq!(recorded.connects.load(Ordering::SeqCst), 1);
    assert_eq!(report.workers[1].num_input_rows, 0);
    assert_eq!(report.workers[2].num_input_rows, 0);
}

#[test]
fn slow_commit_gets_the_worker_killed() {
    let factory = ScriptedFactory {
        stall_commit: Some(Duration::from_millis(500)),
        ..Default::default()
    };
    let mut t = task(1);
    t.timeouts.finish = Duration::from_millis(50);
    let pool = started(t, factory);

    pool.enqueue(batch(0, 1)).expect("enqueue");
    let err = pool.commit().expect_err("should fail");

    let LoadError::PoolFailed(report) = err else {
        panic!("expected a pool failure, got {err:?}");
    };
    assert!(matches!(report.workers[0].outcome, WorkerOutcome::Killed));
}

#[test]
fn load_errors_roll_back_and_fail() {
    let factory = ScriptedFactory {
        load_error: Some("Rejected by user-defined parser".into()),
        ..Default::default()
    };
    let recorded = Arc::clone(&factory.recorded);
    let mut t = task(1);
    t.copy.reject_on_materialized_type_error = true;
    let pool = started(t, factory);

    pool.enqueue(batch(0, 2)).expect("enqueue");
    let err = pool.commit().expect_err("should fail");

    let LoadError::PoolFailed(report) = err else {
        panic!("expected a pool failure, got {err:?}");
    };
    assert!(matches!(
        report.workers[0].error(),
        Some(LoadError::Session { worker: 0, .. })
    ));
    assert_eq!(recorded.rollbacks.load(Ordering::SeqCst), 1);
    assert_eq!(recorded.closes.load(Ordering::SeqCst), 1);
}

#[test]
fn finalize_timeout_dumps_diagnostics_once() {
    let factory = ScriptedFactory {
        stall_load: Some(Duration::from_millis(300)),
        ..Default::default()
    };
    let mut t = task(2);
    t.timeouts.write = Duration::from_millis(20);
    let pool = started(t, factory);

    pool.enqueue(batch(0, 1)).expect("enqueue");
    pool.enqueue(batch(1, 1)).expect("enqueue");

    let diagnostics = Arc::clone(&pool.diagnostics);
    let err = pool.commit().expect_err("should fail");

    let LoadError::PoolFailed(report) = err else {
        panic!("expected a pool failure, got {err:?}");
    };
    for w in &report.workers {
        let cause = w.error().expect("worker error");
        assert_eq!(cause.timeout_stage(), Some(Stage::Finalize));
    }
    assert!(!diagnostics.claim(), "dump flag should already be claimed");
}

#[test]
fn lifecycle_misuse_is_reported() {
    let pool = LoadPool::new(task(1), converters(), ScriptedFactory::default()).expect("pool");
    assert!(matches!(
        pool.enqueue(batch(0, 1)),
        Err(LoadError::NotStarted)
    ));
    assert!(matches!(pool.commit(), Err(LoadError::NotStarted)));

    let mut pool = started(task(1), ScriptedFactory::default());
    assert!(matches!(pool.start(), Err(LoadError::AlreadyStarted)));
    pool.commit().expect("commit");

    assert!(matches!(
        LoadPool::new(task(0), converters(), ScriptedFactory::default()),
        Err(LoadError::Config(_))
    ));
}

#[test]
fn concurrent_producers_deliver_every_batch() {
    let factory = ScriptedFactory::default();
    let recorded = Arc::clone(&factory.recorded);
    let pool = started(task(3), factory);

    thread::scope(|s| {
        for p in 0..4i64 {
            let pool = &pool;
            s.spawn(move || {
                for b in 0..10 {
                    pool.enqueue(batch(p * 1000 + b * 10, 3)).expect("enqueue");
                }
            });
        }
    });

    let report = pool.commit().expect("commit");
    assert_eq!(report.num_input_rows(), 120);
    assert_eq!(recorded.total_lines(), 120);

    // 40 batches over 3 workers: 14, 13, 13.
    let batches: Vec<u64> = report.workers.iter().map(|w| w.num_batches).collect();
    assert_eq!(batches, [14, 13, 13]);
}
