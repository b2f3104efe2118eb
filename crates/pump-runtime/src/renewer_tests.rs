//! Tests for background lock renewal.

use super::*;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

struct CountingHolder {
    window: Duration,
    renewals: AtomicU32,
}

impl CountingHolder {
    fn new(window: Duration) -> Arc<Self> {
        Arc::new(Self {
            window,
            renewals: AtomicU32::new(0),
        })
    }

    fn renewals(&self) -> u32 {
        self.renewals.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LockHolder for CountingHolder {
    fn describe(&self) -> String {
        "counting lock".to_string()
    }

    async fn renew(&self) -> Result<Timestamp, PumpError> {
        self.renewals.fetch_add(1, Ordering::SeqCst);
        Ok(Timestamp::from_now(self.window))
    }
}

/// Fails the first `failures` renew calls with a transient error
struct FlakyHolder {
    window: Duration,
    failures: u32,
    attempts: AtomicU32,
}

#[async_trait]
impl LockHolder for FlakyHolder {
    fn describe(&self) -> String {
        "flaky lock".to_string()
    }

    async fn renew(&self) -> Result<Timestamp, PumpError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        if attempt < self.failures {
            return Err(PumpError::Timeout {
                duration: Duration::from_millis(1),
            });
        }
        Ok(Timestamp::from_now(self.window))
    }
}

struct LockLostHolder {
    attempts: AtomicU32,
}

#[async_trait]
impl LockHolder for LockLostHolder {
    fn describe(&self) -> String {
        "lost lock".to_string()
    }

    async fn renew(&self) -> Result<Timestamp, PumpError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(PumpError::LockLost {
            lock_token: "token-1".to_string(),
        })
    }
}

struct RecordingSink {
    phases: Mutex<Vec<ExceptionPhase>>,
}

impl RecordingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            phases: Mutex::new(Vec::new()),
        })
    }

    fn phases(&self) -> Vec<ExceptionPhase> {
        self.phases.lock().unwrap().clone()
    }
}

#[async_trait]
impl ExceptionSink for RecordingSink {
    async fn notify_exception(&self, _error: &PumpError, phase: ExceptionPhase) {
        self.phases.lock().unwrap().push(phase);
    }
}

// ============================================================================
// Safety Margin Tests
// ============================================================================

#[test]
fn test_safety_margin_is_third_of_window() {
    assert_eq!(
        renewal_safety_margin(Duration::from_secs(3)),
        Duration::from_secs(1)
    );
}

#[test]
fn test_safety_margin_is_capped() {
    assert_eq!(
        renewal_safety_margin(Duration::from_secs(60)),
        Duration::from_secs(10)
    );
    assert_eq!(
        renewal_safety_margin(Duration::from_secs(30)),
        Duration::from_secs(10)
    );
}

// ============================================================================
// Renewal Loop Tests
// ============================================================================

#[tokio::test]
async fn test_renews_until_budget_exhausted() {
    let holder = CountingHolder::new(Duration::from_millis(40));
    let sink = RecordingSink::new();

    let renewer = LockRenewer::start(
        holder.clone(),
        Timestamp::from_now(Duration::from_millis(40)),
        Duration::from_millis(200),
        RetryPolicy::disabled(),
        sink.clone(),
    );

    // Well past the 200ms budget; the renewer must have stopped on its own.
    sleep(Duration::from_millis(400)).await;
    let after_budget = holder.renewals();
    assert!(after_budget >= 2, "expected several renewals, got {after_budget}");

    sleep(Duration::from_millis(150)).await;
    assert_eq!(holder.renewals(), after_budget, "renewer kept running past budget");
    assert!(sink.phases().is_empty());

    renewer.stop().await;
}

#[tokio::test]
async fn test_stop_halts_renewal() {
    let holder = CountingHolder::new(Duration::from_millis(60));
    let sink = RecordingSink::new();

    let renewer = LockRenewer::start(
        holder.clone(),
        Timestamp::from_now(Duration::from_millis(60)),
        Duration::from_secs(10),
        RetryPolicy::disabled(),
        sink,
    );

    sleep(Duration::from_millis(150)).await;
    renewer.stop().await;

    let at_stop = holder.renewals();
    assert!(at_stop >= 1, "expected at least one renewal before stop");

    sleep(Duration::from_millis(150)).await;
    assert_eq!(holder.renewals(), at_stop);
}

#[tokio::test]
async fn test_renewal_failure_reported_and_stops() {
    let holder = Arc::new(LockLostHolder {
        attempts: AtomicU32::new(0),
    });
    let sink = RecordingSink::new();

    let renewer = LockRenewer::start(
        holder.clone(),
        Timestamp::from_now(Duration::from_millis(30)),
        Duration::from_secs(10),
        RetryPolicy::disabled(),
        sink.clone(),
    );

    sleep(Duration::from_millis(150)).await;

    // Non-transient failure: one attempt, one report, renewer gone.
    assert_eq!(holder.attempts.load(Ordering::SeqCst), 1);
    assert_eq!(sink.phases(), vec![ExceptionPhase::RenewLock]);

    renewer.stop().await;
}

#[tokio::test]
async fn test_transient_failure_retried() {
    let holder = Arc::new(FlakyHolder {
        window: Duration::from_millis(60),
        failures: 2,
        attempts: AtomicU32::new(0),
    });
    let sink = RecordingSink::new();

    let retry = RetryPolicy::new(3, Duration::from_millis(5), Duration::from_millis(5))
        .without_jitter();
    let renewer = LockRenewer::start(
        holder.clone(),
        Timestamp::from_now(Duration::from_millis(60)),
        Duration::from_secs(10),
        retry,
        sink.clone(),
    );

    sleep(Duration::from_millis(150)).await;
    renewer.stop().await;

    // Two transient failures absorbed by retries, then success.
    assert!(holder.attempts.load(Ordering::SeqCst) >= 3);
    assert!(sink.phases().is_empty());
}

#[tokio::test]
async fn test_zero_budget_never_renews() {
    let holder = CountingHolder::new(Duration::from_millis(30));
    let sink = RecordingSink::new();

    let renewer = LockRenewer::start(
        holder.clone(),
        Timestamp::from_now(Duration::from_millis(30)),
        Duration::ZERO,
        RetryPolicy::disabled(),
        sink,
    );

    sleep(Duration::from_millis(100)).await;
    assert_eq!(holder.renewals(), 0);

    renewer.stop().await;
}
