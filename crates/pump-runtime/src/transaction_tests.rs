//! Tests for transaction contexts.

use super::*;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

struct FakeCoordinator {
    calls: Mutex<Vec<(String, bool)>>,
    fail: bool,
}

impl FakeCoordinator {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    fn calls(&self) -> Vec<(String, bool)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl TransactionCoordinator for FakeCoordinator {
    async fn end_transaction(
        &self,
        txn_id: &TransactionId,
        commit: bool,
    ) -> Result<(), PumpError> {
        self.calls
            .lock()
            .unwrap()
            .push((txn_id.as_str().to_string(), commit));
        if self.fail {
            return Err(PumpError::ConnectionFailed {
                message: "coordinator unreachable".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Null Transaction Tests
// ============================================================================

#[tokio::test]
async fn test_null_transaction_is_inert() {
    let txn = TransactionContext::null();

    assert!(txn.is_null());
    assert!(txn.id().is_none());
    assert!(txn.attach().is_err());
    assert!(txn.on_transaction_completed(|_| {}).is_err());
    assert!(matches!(
        txn.commit().await,
        Err(PumpError::InvalidTransactionState { .. })
    ));
    assert!(matches!(
        txn.rollback().await,
        Err(PumpError::InvalidTransactionState { .. })
    ));
}

// ============================================================================
// Lifecycle Tests
// ============================================================================

#[tokio::test]
async fn test_commit_calls_coordinator() {
    let coordinator = FakeCoordinator::new();
    let id = TransactionId::new();
    let txn = TransactionContext::new(id.clone(), coordinator.clone());

    assert_eq!(txn.status(), TransactionStatus::Active);
    txn.commit().await.unwrap();
    assert_eq!(txn.status(), TransactionStatus::Committed);

    assert_eq!(coordinator.calls(), vec![(id.as_str().to_string(), true)]);
}

#[tokio::test]
async fn test_rollback_calls_coordinator() {
    let coordinator = FakeCoordinator::new();
    let id = TransactionId::new();
    let txn = TransactionContext::new(id.clone(), coordinator.clone());

    txn.rollback().await.unwrap();
    assert_eq!(txn.status(), TransactionStatus::RolledBack);
    assert_eq!(coordinator.calls(), vec![(id.as_str().to_string(), false)]);
}

#[tokio::test]
async fn test_double_terminal_fails() {
    let txn = TransactionContext::new(TransactionId::new(), FakeCoordinator::new());

    txn.commit().await.unwrap();

    assert!(matches!(
        txn.commit().await,
        Err(PumpError::InvalidTransactionState { .. })
    ));
    assert!(matches!(
        txn.rollback().await,
        Err(PumpError::InvalidTransactionState { .. })
    ));
}

#[tokio::test]
async fn test_attach_after_terminal_fails() {
    let txn = TransactionContext::new(TransactionId::new(), FakeCoordinator::new());

    assert!(txn.attach().is_ok());
    txn.rollback().await.unwrap();
    assert!(matches!(
        txn.attach(),
        Err(PumpError::InvalidTransactionState { .. })
    ));
}

#[tokio::test]
async fn test_terminal_even_when_coordinator_fails() {
    let txn = TransactionContext::new(TransactionId::new(), FakeCoordinator::failing());

    let result = txn.commit().await;
    assert!(matches!(result, Err(PumpError::ConnectionFailed { .. })));

    // The context is single-use; even a failed end is terminal.
    assert_eq!(txn.status(), TransactionStatus::Committed);
    assert!(matches!(
        txn.commit().await,
        Err(PumpError::InvalidTransactionState { .. })
    ));
}

// ============================================================================
// Completion Handler Tests
// ============================================================================

#[tokio::test]
async fn test_completion_handler_fires_on_commit() {
    let txn = TransactionContext::new(TransactionId::new(), FakeCoordinator::new());

    let fired = Arc::new(AtomicBool::new(false));
    let committed = Arc::new(AtomicBool::new(false));
    {
        let fired = fired.clone();
        let committed = committed.clone();
        txn.on_transaction_completed(move |commit| {
            fired.store(true, Ordering::SeqCst);
            committed.store(commit, Ordering::SeqCst);
        })
        .unwrap();
    }

    txn.commit().await.unwrap();
    assert!(fired.load(Ordering::SeqCst));
    assert!(committed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_completion_handler_fires_on_rollback() {
    let txn = TransactionContext::new(TransactionId::new(), FakeCoordinator::new());

    let committed = Arc::new(AtomicBool::new(true));
    {
        let committed = committed.clone();
        txn.on_transaction_completed(move |commit| {
            committed.store(commit, Ordering::SeqCst);
        })
        .unwrap();
    }

    txn.rollback().await.unwrap();
    assert!(!committed.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_completion_handler_skipped_when_end_fails() {
    let txn = TransactionContext::new(TransactionId::new(), FakeCoordinator::failing());

    let fired = Arc::new(AtomicBool::new(false));
    {
        let fired = fired.clone();
        txn.on_transaction_completed(move |_| {
            fired.store(true, Ordering::SeqCst);
        })
        .unwrap();
    }

    assert!(txn.commit().await.is_err());
    assert!(!fired.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_register_handler_after_terminal_fails() {
    let txn = TransactionContext::new(TransactionId::new(), FakeCoordinator::new());
    txn.commit().await.unwrap();

    assert!(txn.on_transaction_completed(|_| {}).is_err());
}

#[tokio::test]
async fn test_clones_share_state() {
    let txn = TransactionContext::new(TransactionId::new(), FakeCoordinator::new());
    let clone = txn.clone();

    txn.commit().await.unwrap();
    assert_eq!(clone.status(), TransactionStatus::Committed);
    assert!(clone.attach().is_err());
}
