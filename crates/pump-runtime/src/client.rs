//! Abstract entity client traits consumed by the pumps.
//!
//! The traits here are the boundary between the pump orchestration logic and
//! the transport that actually talks to the broker. Everything above this
//! boundary (pumps, renewers, browser, transactions) is transport-agnostic;
//! everything below it (AMQP links, frame codecs) is out of scope and lives
//! behind an [`EntityClient`] implementation.

use crate::error::PumpError;
use crate::message::{LockToken, Message, SessionId, Timestamp};
use crate::transaction::{TransactionContext, TransactionId};
use async_trait::async_trait;
use std::time::Duration;

/// Coordinator for broker-side transactions.
///
/// Supertrait of [`EntityClient`]; [`TransactionContext::commit`] and
/// [`TransactionContext::rollback`] delegate here through the coordinator
/// captured when the transaction was begun.
#[async_trait]
pub trait TransactionCoordinator: Send + Sync {
    /// Finalize a broker-side transaction, committing or rolling back all
    /// operations enlisted under it
    async fn end_transaction(
        &self,
        txn_id: &TransactionId,
        commit: bool,
    ) -> Result<(), PumpError>;
}

/// Transport-level gateway to a single queue/topic entity.
///
/// All operations are fallible and asynchronous. A receive returning
/// `Ok(None)` means the wait window elapsed without a message, which is not
/// an error.
#[async_trait]
pub trait EntityClient: TransactionCoordinator + Send + Sync {
    /// Receive the next available message, waiting up to `wait`
    async fn receive_next(&self, wait: Duration) -> Result<Option<Message>, PumpError>;

    /// Renew the lock on an in-flight message, returning the new expiry
    async fn renew_lock(&self, lock_token: &LockToken) -> Result<Timestamp, PumpError>;

    /// Mark message as successfully processed
    async fn complete(
        &self,
        lock_token: &LockToken,
        txn: Option<&TransactionContext>,
    ) -> Result<(), PumpError>;

    /// Return message to the entity for redelivery
    async fn abandon(
        &self,
        lock_token: &LockToken,
        txn: Option<&TransactionContext>,
    ) -> Result<(), PumpError>;

    /// Accept the next session with available messages, waiting up to `wait`
    async fn accept_next_session(
        &self,
        wait: Duration,
    ) -> Result<Option<Box<dyn SessionClient>>, PumpError>;

    /// List one page of session ids known to the entity.
    ///
    /// `last_updated` filters out sessions with no activity after the given
    /// instant; [`Timestamp::far_future`] means "all sessions". `continuation`
    /// carries the last session id of the previous page.
    async fn list_sessions(
        &self,
        last_updated: &Timestamp,
        skip: u32,
        page_size: u32,
        continuation: Option<&SessionId>,
    ) -> Result<SessionPage, PumpError>;

    /// Fetch metadata for a single session without locking it
    async fn session_state(&self, session_id: &SessionId) -> Result<SessionState, PumpError>;

    /// Begin a broker-side transaction scoped to this entity
    async fn begin_transaction(&self) -> Result<TransactionContext, PumpError>;

    /// Release underlying entity resources
    async fn close(&self) -> Result<(), PumpError>;
}

/// Client for a single accepted (locked) session.
///
/// Session affinity is enforced by the broker: while this client holds the
/// session lock, no other consumer receives messages from the session.
#[async_trait]
pub trait SessionClient: Send + Sync {
    /// Get session ID
    fn session_id(&self) -> &SessionId;

    /// Get current session lock expiry
    fn locked_until(&self) -> Timestamp;

    /// Receive the next message from this session, waiting up to `wait`
    async fn receive_next(&self, wait: Duration) -> Result<Option<Message>, PumpError>;

    /// Renew the session lock, returning the new expiry
    async fn renew_session_lock(&self) -> Result<Timestamp, PumpError>;

    /// Complete a message received from this session
    async fn complete(
        &self,
        lock_token: &LockToken,
        txn: Option<&TransactionContext>,
    ) -> Result<(), PumpError>;

    /// Abandon a message received from this session
    async fn abandon(
        &self,
        lock_token: &LockToken,
        txn: Option<&TransactionContext>,
    ) -> Result<(), PumpError>;

    /// Release the session lock
    async fn close(&self) -> Result<(), PumpError>;
}

/// One page of session ids plus the skip cursor for the next request
#[derive(Debug, Clone)]
pub struct SessionPage {
    pub session_ids: Vec<SessionId>,
    pub skip: u32,
}

/// Session metadata returned by non-locking inspection
#[derive(Debug, Clone)]
pub struct SessionState {
    pub session_id: SessionId,
    pub last_updated: Timestamp,
    pub available_message_count: u64,
    pub locked: bool,
}
