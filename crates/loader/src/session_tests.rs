use super::*;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

struct Slow {
    delay: Duration,
    commits: Arc<AtomicUsize>,
}

impl Session for Slow {
    fn query(&mut self, _sql: &str) -> Result<Vec<Vec<String>>, SessionError> {
        Err(SessionError::Statement("unsupported".into()))
    }

    fn streaming_load(
        &mut self,
        _sql: &str,
        _stream: &mut CopyStream,
    ) -> Result<CopyOutcome, SessionError> {
        Ok(CopyOutcome::default())
    }

    fn commit(&mut self) -> Result<(), SessionError> {
        thread::sleep(self.delay);
        self.commits.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn rollback(&mut self) -> Result<(), SessionError> {
        Ok(())
    }

    fn close(&mut self) -> Result<(), SessionError> {
        Ok(())
    }
}

fn handle(delay: Duration) -> (SessionHandle<Slow>, Arc<AtomicUsize>) {
    let commits = Arc::new(AtomicUsize::new(0));
    let session = Slow {
        delay,
        commits: Arc::clone(&commits),
    };
    (SessionHandle::spawn(2, session).expect("spawn"), commits)
}

#[test]
fn call_returns_session_result() {
    let (h, commits) = handle(Duration::ZERO);
    h.call(Stage::Commit, Duration::from_secs(5), |s| s.commit())
        .expect("commit");
    assert_eq!(commits.load(Ordering::SeqCst), 1);

    let err = h
        .call(Stage::Commit, Duration::from_secs(5), |s| {
            s.query("SELECT 1").map(|_| ())
        })
        .expect_err("query fails");
    assert!(matches!(err, LoadError::Session { worker: 2, .. }), "{err:?}");
}

#[test]
fn slow_call_times_out() {
    let (h, _) = handle(Duration::from_millis(500));
    let err = h
        .call(Stage::Commit, Duration::from_millis(10), |s| s.commit())
        .expect_err("times out");
    assert_eq!(err.timeout_stage(), Some(Stage::Commit));
}

#[test]
fn quiet_call_returns_after_its_timeout() {
    let (h, commits) = handle(Duration::from_millis(500));
    let start = std::time::Instant::now();

    h.call_quietly(Stage::Rollback, Duration::from_millis(10), |s| s.commit());
    assert!(start.elapsed() < Duration::from_millis(400));
    assert_eq!(commits.load(Ordering::SeqCst), 0);
}

#[test]
fn panicking_job_reports_lost_session() {
    let (h, _) = handle(Duration::ZERO);
    let reply = h
        .submit(|_s: &mut Slow| -> u8 { panic!("boom") })
        .expect("submit");
    let err = h
        .wait(&reply, Stage::Close, Duration::from_secs(5))
        .expect_err("lost");
    assert!(matches!(err, LoadError::SessionLost(2)), "{err:?}");
}
