//! Broker-side transaction contexts.
//!
//! A [`TransactionContext`] represents an all-or-nothing unit of settlement
//! operations. Settlements issued with a context attach its id to the broker
//! call; committing or rolling back finalizes them atomically on the broker
//! side, so the client never compensates individually.

use crate::client::TransactionCoordinator;
use crate::error::PumpError;
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

#[cfg(test)]
#[path = "transaction_tests.rs"]
mod tests;

/// Opaque broker transaction identifier
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TransactionId(String);

impl TransactionId {
    /// Generate new random transaction ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Create transaction ID from a broker-issued value
    pub fn from_string(id: String) -> Self {
        Self(id)
    }

    /// Get transaction ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TransactionId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TransactionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a transaction context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    Committed,
    RolledBack,
}

impl std::fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self {
            Self::Active => "active",
            Self::Committed => "committed",
            Self::RolledBack => "rolled-back",
        };
        write!(f, "{}", label)
    }
}

/// One-shot callback invoked with the commit flag once the transaction
/// reaches a terminal state
type CompletionHandler = Box<dyn FnOnce(bool) + Send>;

struct TxnState {
    status: TransactionStatus,
    completion_handlers: Vec<CompletionHandler>,
}

struct TxnInner {
    id: Option<TransactionId>,
    coordinator: Option<Arc<dyn TransactionCoordinator>>,
    state: Mutex<TxnState>,
}

/// Client-side handle to a broker-side transaction.
///
/// States: `Active -> Committed` or `Active -> RolledBack`, terminal either
/// way. A second terminal call fails fast rather than silently succeeding,
/// since the broker-side transaction resource is single-use. The null
/// sentinel (no transaction) is permanently inert and rejects both.
///
/// Handles are cheap to clone; all clones share the same state.
#[derive(Clone)]
pub struct TransactionContext {
    inner: Arc<TxnInner>,
}

impl TransactionContext {
    /// Create an active transaction context owned by `coordinator`.
    ///
    /// Called by [`crate::client::EntityClient::begin_transaction`]
    /// implementations, not by application code.
    pub fn new(id: TransactionId, coordinator: Arc<dyn TransactionCoordinator>) -> Self {
        Self {
            inner: Arc::new(TxnInner {
                id: Some(id),
                coordinator: Some(coordinator),
                state: Mutex::new(TxnState {
                    status: TransactionStatus::Active,
                    completion_handlers: Vec::new(),
                }),
            }),
        }
    }

    /// The null sentinel representing "no transaction".
    ///
    /// Commit and rollback on it always fail with an invalid-state error.
    pub fn null() -> Self {
        Self {
            inner: Arc::new(TxnInner {
                id: None,
                coordinator: None,
                state: Mutex::new(TxnState {
                    status: TransactionStatus::Active,
                    completion_handlers: Vec::new(),
                }),
            }),
        }
    }

    /// Check whether this is the null sentinel
    pub fn is_null(&self) -> bool {
        self.inner.id.is_none()
    }

    /// Get the transaction ID, if any
    pub fn id(&self) -> Option<&TransactionId> {
        self.inner.id.as_ref()
    }

    /// Get the current lifecycle state
    pub fn status(&self) -> TransactionStatus {
        self.lock_state().status
    }

    /// Get the transaction ID for attaching a broker operation.
    ///
    /// Fails if the context is null or already terminal; a settlement must
    /// never enlist in a finished transaction.
    pub fn attach(&self) -> Result<&TransactionId, PumpError> {
        let id = self
            .inner
            .id
            .as_ref()
            .ok_or_else(|| PumpError::InvalidTransactionState {
                message: "cannot attach operations to the null transaction".to_string(),
            })?;

        let state = self.lock_state();
        if state.status != TransactionStatus::Active {
            return Err(PumpError::InvalidTransactionState {
                message: format!("transaction {} is already {}", id, state.status),
            });
        }

        Ok(id)
    }

    /// Register a one-shot handler fired with the commit flag once the
    /// transaction reaches a terminal state.
    ///
    /// # Errors
    ///
    /// Returns `PumpError::InvalidTransactionState` if the context is null or
    /// already terminal.
    pub fn on_transaction_completed(
        &self,
        handler: impl FnOnce(bool) + Send + 'static,
    ) -> Result<(), PumpError> {
        if self.is_null() {
            return Err(PumpError::InvalidTransactionState {
                message: "the null transaction never completes".to_string(),
            });
        }

        let mut state = self.lock_state();
        if state.status != TransactionStatus::Active {
            return Err(PumpError::InvalidTransactionState {
                message: format!("transaction is already {}", state.status),
            });
        }

        state.completion_handlers.push(Box::new(handler));
        Ok(())
    }

    /// Commit the transaction, applying all enlisted operations atomically
    pub async fn commit(&self) -> Result<(), PumpError> {
        self.end(true).await
    }

    /// Roll back the transaction, discarding all enlisted operations
    pub async fn rollback(&self) -> Result<(), PumpError> {
        self.end(false).await
    }

    async fn end(&self, commit: bool) -> Result<(), PumpError> {
        let (id, coordinator) = match (&self.inner.id, &self.inner.coordinator) {
            (Some(id), Some(coordinator)) => (id, Arc::clone(coordinator)),
            _ => {
                return Err(PumpError::InvalidTransactionState {
                    message: "cannot commit or roll back the null transaction".to_string(),
                })
            }
        };

        // Transition to terminal state before the broker call; the broker
        // resource is single-use, so even a failed end must not be retried
        // through this context.
        {
            let mut state = self.lock_state();
            if state.status != TransactionStatus::Active {
                return Err(PumpError::InvalidTransactionState {
                    message: format!("transaction {} is already {}", id, state.status),
                });
            }
            state.status = if commit {
                TransactionStatus::Committed
            } else {
                TransactionStatus::RolledBack
            };
        }

        debug!(txn_id = %id, commit, "ending transaction");
        coordinator.end_transaction(id, commit).await?;

        let handlers = {
            let mut state = self.lock_state();
            std::mem::take(&mut state.completion_handlers)
        };
        for handler in handlers {
            handler(commit);
        }

        Ok(())
    }

    fn lock_state(&self) -> MutexGuard<'_, TxnState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.inner.id)
            .field("status", &self.status())
            .finish()
    }
}
