use super::*;
use std::sync::atomic::AtomicUsize;
use std::thread;

#[test]
fn only_one_concurrent_caller_dumps() {
    let diag = Diagnostics::new(8);
    let dumps = Arc::new(AtomicUsize::new(0));

    let handles: Vec<_> = (0..8)
        .map(|i| {
            let diag = Arc::clone(&diag);
            let dumps = Arc::clone(&dumps);
            thread::spawn(move || {
                if diag.dump_once(i, "test") {
                    dumps.fetch_add(1, Ordering::SeqCst);
                }
            })
        })
        .collect();
    for h in handles {
        h.join().expect("join");
    }

    assert_eq!(dumps.load(Ordering::SeqCst), 1);
    assert!(!diag.claim());
}

#[test]
fn states_are_tracked_per_worker() {
    let diag = Diagnostics::new(2);
    assert_eq!(diag.state(0), Some(WorkerState::Idle));

    diag.set_state(1, WorkerState::Draining);
    assert_eq!(diag.state(1), Some(WorkerState::Draining));
    assert_eq!(diag.state(0), Some(WorkerState::Idle));

    diag.set_state(9, WorkerState::Failed);
    assert_eq!(diag.state(9), None);
}
