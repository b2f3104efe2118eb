//! In-memory entity client for testing and development.
//!
//! This module provides a fully functional in-memory entity that:
//! - Delivers messages under broker-style peek-lock with expiry and requeue
//! - Supports session accept/lock/renew/close with session-scoped streams
//! - Stages settlements under transactions, applied on commit and discarded
//!   on rollback
//! - Records settlement and renewal counts for assertions in tests
//!
//! This provider is intended for:
//! - Unit testing of pump-runtime consumers
//! - Development and prototyping
//! - Reference implementation for real transports

use crate::client::{
    EntityClient, SessionClient, SessionPage, SessionState, TransactionCoordinator,
};
use crate::error::PumpError;
use crate::message::{LockToken, Message, MessageId, SessionId, Timestamp};
use crate::transaction::{TransactionContext, TransactionId};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::sleep;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Configuration
// ============================================================================

/// Configuration for the in-memory entity
#[derive(Debug, Clone)]
pub struct InMemoryEntityConfig {
    /// Lock duration granted per message delivery and per renewal
    pub lock_duration: Duration,

    /// Lock duration granted per session accept and per renewal
    pub session_lock_duration: Duration,

    /// Polling interval used while waiting inside receive/accept calls
    pub poll_interval: Duration,
}

impl Default for InMemoryEntityConfig {
    fn default() -> Self {
        Self {
            lock_duration: Duration::from_secs(30),
            session_lock_duration: Duration::from_secs(60),
            poll_interval: Duration::from_millis(5),
        }
    }
}

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message stored in the entity with delivery metadata
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: Bytes,
    attributes: HashMap<String, String>,
    session_id: Option<SessionId>,
    delivery_count: u32,
}

/// A message currently locked by a consumer
struct InFlightMessage {
    stored: StoredMessage,
    locked_until: Timestamp,
}

/// Lock state for a single session
struct SessionRecord {
    locked: bool,
    locked_until: Option<Timestamp>,
    last_updated: Timestamp,
}

impl SessionRecord {
    fn new() -> Self {
        Self {
            locked: false,
            locked_until: None,
            last_updated: Timestamp::now(),
        }
    }

    fn is_locked(&self) -> bool {
        if !self.locked {
            return false;
        }
        match &self.locked_until {
            Some(expiry) => !expiry.is_past(),
            None => false,
        }
    }
}

/// A settlement staged under an active transaction
enum StagedSettlement {
    Complete { token: String },
    Abandon { token: String },
}

impl StagedSettlement {
    fn token(&self) -> &str {
        match self {
            Self::Complete { token } => token,
            Self::Abandon { token } => token,
        }
    }
}

/// Settlement and renewal counters consumed by tests
#[derive(Default)]
struct EntityStats {
    completed: u64,
    abandoned: u64,
    completed_messages: Vec<MessageId>,
    message_renewals: HashMap<MessageId, u32>,
    session_renewals: HashMap<SessionId, u32>,
}

struct EntityState {
    queue: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlightMessage>,
    sessions: HashMap<SessionId, SessionRecord>,
    transactions: HashMap<String, Vec<StagedSettlement>>,
    stats: EntityStats,
    closed: bool,
}

impl EntityState {
    fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            in_flight: HashMap::new(),
            sessions: HashMap::new(),
            transactions: HashMap::new(),
            stats: EntityStats::default(),
            closed: false,
        }
    }

    /// Return messages whose lock lapsed to the queue and release expired
    /// session locks
    fn reclaim_expired(&mut self) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, in_flight)| in_flight.locked_until.is_past())
            .map(|(token, _)| token.clone())
            .collect();

        for token in expired {
            if let Some(in_flight) = self.in_flight.remove(&token) {
                self.queue.push_back(in_flight.stored);
            }
        }

        for record in self.sessions.values_mut() {
            if record.locked && !record.is_locked() {
                record.locked = false;
                record.locked_until = None;
            }
        }
    }

    fn apply_complete(&mut self, token: &str) -> Result<(), PumpError> {
        let in_flight = self
            .in_flight
            .remove(token)
            .ok_or_else(|| PumpError::LockLost {
                lock_token: token.to_string(),
            })?;

        self.finish_complete(in_flight);
        Ok(())
    }

    fn apply_abandon(&mut self, token: &str) -> Result<(), PumpError> {
        let in_flight = self
            .in_flight
            .remove(token)
            .ok_or_else(|| PumpError::LockLost {
                lock_token: token.to_string(),
            })?;

        self.finish_abandon(in_flight);
        Ok(())
    }

    fn finish_complete(&mut self, in_flight: InFlightMessage) {
        self.stats.completed += 1;
        self.stats
            .completed_messages
            .push(in_flight.stored.message_id.clone());
        if let Some(session_id) = &in_flight.stored.session_id {
            if let Some(record) = self.sessions.get_mut(session_id) {
                record.last_updated = Timestamp::now();
            }
        }
    }

    fn finish_abandon(&mut self, in_flight: InFlightMessage) {
        self.stats.abandoned += 1;
        if let Some(session_id) = &in_flight.stored.session_id {
            if let Some(record) = self.sessions.get_mut(session_id) {
                record.last_updated = Timestamp::now();
            }
        }
        self.queue.push_back(in_flight.stored);
    }

    /// Take a queued message matching the filter into the in-flight map
    fn take_message(
        &mut self,
        session_filter: Option<&SessionId>,
        lock_duration: Duration,
    ) -> Option<Message> {
        let position = self.queue.iter().position(|stored| match session_filter {
            Some(session_id) => stored.session_id.as_ref() == Some(session_id),
            None => stored.session_id.is_none(),
        })?;

        let mut stored = self.queue.remove(position)?;
        stored.delivery_count += 1;

        let token = LockToken::new(uuid::Uuid::new_v4().to_string());
        let locked_until = Timestamp::from_now(lock_duration);
        let message = Message {
            message_id: stored.message_id.clone(),
            body: stored.body.clone(),
            attributes: stored.attributes.clone(),
            session_id: stored.session_id.clone(),
            lock_token: token.clone(),
            locked_until: locked_until.clone(),
            delivery_count: stored.delivery_count,
        };

        self.in_flight.insert(
            token.as_str().to_string(),
            InFlightMessage {
                stored,
                locked_until,
            },
        );

        Some(message)
    }

    fn settle(
        &mut self,
        token: &LockToken,
        txn: Option<&TransactionContext>,
        complete: bool,
    ) -> Result<(), PumpError> {
        if let Some(txn) = txn {
            let txn_id = txn.attach()?;
            if !self.in_flight.contains_key(token.as_str()) {
                return Err(PumpError::LockLost {
                    lock_token: token.as_str().to_string(),
                });
            }
            let staged = self
                .transactions
                .get_mut(txn_id.as_str())
                .ok_or_else(|| PumpError::InvalidTransactionState {
                    message: format!("transaction {} is not active on this entity", txn_id),
                })?;
            let token = token.as_str().to_string();
            staged.push(if complete {
                StagedSettlement::Complete { token }
            } else {
                StagedSettlement::Abandon { token }
            });
            return Ok(());
        }

        if complete {
            self.apply_complete(token.as_str())
        } else {
            self.apply_abandon(token.as_str())
        }
    }
}

fn lock_entity(state: &Mutex<EntityState>) -> MutexGuard<'_, EntityState> {
    state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn end_transaction_impl(
    state: &Mutex<EntityState>,
    txn_id: &TransactionId,
    commit: bool,
) -> Result<(), PumpError> {
    let mut state = lock_entity(state);
    let staged = state
        .transactions
        .remove(txn_id.as_str())
        .ok_or_else(|| PumpError::InvalidTransactionState {
            message: format!("transaction {} is not active on this entity", txn_id),
        })?;

    if !commit {
        // Staged settlements are discarded; the broker-side locks remain
        // held until they expire or are settled again.
        return Ok(());
    }

    // Commit is all-or-nothing: validate every staged token up front so no
    // settlement is applied if any lock has been lost or settled twice.
    let mut seen: HashSet<&str> = HashSet::new();
    for settlement in &staged {
        let token = settlement.token();
        if !seen.insert(token) || !state.in_flight.contains_key(token) {
            return Err(PumpError::LockLost {
                lock_token: token.to_string(),
            });
        }
    }

    for settlement in staged {
        match settlement {
            StagedSettlement::Complete { token } => {
                if let Some(in_flight) = state.in_flight.remove(&token) {
                    state.finish_complete(in_flight);
                }
            }
            StagedSettlement::Abandon { token } => {
                if let Some(in_flight) = state.in_flight.remove(&token) {
                    state.finish_abandon(in_flight);
                }
            }
        }
    }
    Ok(())
}

// ============================================================================
// InMemoryEntity
// ============================================================================

/// In-memory entity client implementation
#[derive(Clone)]
pub struct InMemoryEntity {
    state: Arc<Mutex<EntityState>>,
    config: InMemoryEntityConfig,
}

impl InMemoryEntity {
    /// Create new in-memory entity with configuration
    pub fn new(config: InMemoryEntityConfig) -> Self {
        Self {
            state: Arc::new(Mutex::new(EntityState::new())),
            config,
        }
    }

    /// Enqueue a sessionless message, returning its id
    pub fn send(&self, body: Bytes) -> MessageId {
        let message_id = MessageId::new();
        let mut state = lock_entity(&self.state);
        state.queue.push_back(StoredMessage {
            message_id: message_id.clone(),
            body,
            attributes: HashMap::new(),
            session_id: None,
            delivery_count: 0,
        });
        message_id
    }

    /// Enqueue a message onto a session, creating the session if needed
    pub fn send_to_session(&self, session_id: SessionId, body: Bytes) -> MessageId {
        let message_id = MessageId::new();
        let mut state = lock_entity(&self.state);
        state.queue.push_back(StoredMessage {
            message_id: message_id.clone(),
            body,
            attributes: HashMap::new(),
            session_id: Some(session_id.clone()),
            delivery_count: 0,
        });
        let record = state
            .sessions
            .entry(session_id)
            .or_insert_with(SessionRecord::new);
        record.last_updated = Timestamp::now();
        message_id
    }

    /// Register a session with no messages (visible to the browser)
    pub fn register_session(&self, session_id: SessionId) {
        let mut state = lock_entity(&self.state);
        state.sessions.entry(session_id).or_insert_with(SessionRecord::new);
    }

    /// Number of messages completed so far
    pub fn completed_count(&self) -> u64 {
        lock_entity(&self.state).stats.completed
    }

    /// Number of messages abandoned so far
    pub fn abandoned_count(&self) -> u64 {
        lock_entity(&self.state).stats.abandoned
    }

    /// Ids of completed messages, in settlement order
    pub fn completed_message_ids(&self) -> Vec<MessageId> {
        lock_entity(&self.state).stats.completed_messages.clone()
    }

    /// Number of renew-lock calls recorded for a message
    pub fn renewal_count(&self, message_id: &MessageId) -> u32 {
        lock_entity(&self.state)
            .stats
            .message_renewals
            .get(message_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of session-lock renewals recorded for a session
    pub fn session_renewal_count(&self, session_id: &SessionId) -> u32 {
        lock_entity(&self.state)
            .stats
            .session_renewals
            .get(session_id)
            .copied()
            .unwrap_or(0)
    }

    /// Number of messages currently queued
    pub fn queued_len(&self) -> usize {
        lock_entity(&self.state).queue.len()
    }

    /// Number of messages currently locked by consumers
    pub fn in_flight_len(&self) -> usize {
        lock_entity(&self.state).in_flight.len()
    }
}

impl Default for InMemoryEntity {
    fn default() -> Self {
        Self::new(InMemoryEntityConfig::default())
    }
}

#[async_trait]
impl TransactionCoordinator for InMemoryEntity {
    async fn end_transaction(
        &self,
        txn_id: &TransactionId,
        commit: bool,
    ) -> Result<(), PumpError> {
        end_transaction_impl(&self.state, txn_id, commit)
    }
}

#[async_trait]
impl EntityClient for InMemoryEntity {
    async fn receive_next(&self, wait: Duration) -> Result<Option<Message>, PumpError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            {
                let mut state = lock_entity(&self.state);
                if state.closed {
                    return Err(PumpError::EntityClosed);
                }
                state.reclaim_expired();
                if let Some(message) = state.take_message(None, self.config.lock_duration) {
                    return Ok(Some(message));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.config.poll_interval).await;
        }
    }

    async fn renew_lock(&self, lock_token: &LockToken) -> Result<Timestamp, PumpError> {
        let mut state = lock_entity(&self.state);
        let lock_duration = self.config.lock_duration;
        let in_flight = state
            .in_flight
            .get_mut(lock_token.as_str())
            .ok_or_else(|| PumpError::LockLost {
                lock_token: lock_token.as_str().to_string(),
            })?;

        let locked_until = Timestamp::from_now(lock_duration);
        in_flight.locked_until = locked_until.clone();
        let message_id = in_flight.stored.message_id.clone();
        *state
            .stats
            .message_renewals
            .entry(message_id)
            .or_insert(0) += 1;

        Ok(locked_until)
    }

    async fn complete(
        &self,
        lock_token: &LockToken,
        txn: Option<&TransactionContext>,
    ) -> Result<(), PumpError> {
        lock_entity(&self.state).settle(lock_token, txn, true)
    }

    async fn abandon(
        &self,
        lock_token: &LockToken,
        txn: Option<&TransactionContext>,
    ) -> Result<(), PumpError> {
        lock_entity(&self.state).settle(lock_token, txn, false)
    }

    async fn accept_next_session(
        &self,
        wait: Duration,
    ) -> Result<Option<Box<dyn SessionClient>>, PumpError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            {
                let mut state = lock_entity(&self.state);
                if state.closed {
                    return Err(PumpError::EntityClosed);
                }
                state.reclaim_expired();

                // Deterministic order so tests can rely on acceptance sequence
                let mut candidates: Vec<SessionId> = state
                    .sessions
                    .iter()
                    .filter(|(_, record)| !record.is_locked())
                    .map(|(session_id, _)| session_id.clone())
                    .collect();
                candidates.sort();

                let next = candidates.into_iter().find(|session_id| {
                    state
                        .queue
                        .iter()
                        .any(|stored| stored.session_id.as_ref() == Some(session_id))
                });

                if let Some(session_id) = next {
                    let locked_until = Timestamp::from_now(self.config.session_lock_duration);
                    if let Some(record) = state.sessions.get_mut(&session_id) {
                        record.locked = true;
                        record.locked_until = Some(locked_until.clone());
                    }
                    return Ok(Some(Box::new(InMemorySessionClient {
                        state: self.state.clone(),
                        config: self.config.clone(),
                        session_id,
                        locked_until: Mutex::new(locked_until),
                    })));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.config.poll_interval).await;
        }
    }

    async fn list_sessions(
        &self,
        last_updated: &Timestamp,
        skip: u32,
        page_size: u32,
        _continuation: Option<&SessionId>,
    ) -> Result<SessionPage, PumpError> {
        let state = lock_entity(&self.state);
        if state.closed {
            return Err(PumpError::EntityClosed);
        }

        let mut session_ids: Vec<SessionId> = state
            .sessions
            .iter()
            .filter(|(_, record)| record.last_updated <= *last_updated)
            .map(|(session_id, _)| session_id.clone())
            .collect();
        session_ids.sort();

        let page: Vec<SessionId> = session_ids
            .into_iter()
            .skip(skip as usize)
            .take(page_size as usize)
            .collect();
        let skip = skip + page.len() as u32;

        Ok(SessionPage {
            session_ids: page,
            skip,
        })
    }

    async fn session_state(&self, session_id: &SessionId) -> Result<SessionState, PumpError> {
        let state = lock_entity(&self.state);
        let record = state
            .sessions
            .get(session_id)
            .ok_or_else(|| PumpError::SessionNotFound {
                session_id: session_id.to_string(),
            })?;

        let available_message_count = state
            .queue
            .iter()
            .filter(|stored| stored.session_id.as_ref() == Some(session_id))
            .count() as u64;

        Ok(SessionState {
            session_id: session_id.clone(),
            last_updated: record.last_updated.clone(),
            available_message_count,
            locked: record.is_locked(),
        })
    }

    async fn begin_transaction(&self) -> Result<TransactionContext, PumpError> {
        let txn_id = TransactionId::new();
        let mut state = lock_entity(&self.state);
        if state.closed {
            return Err(PumpError::EntityClosed);
        }
        state
            .transactions
            .insert(txn_id.as_str().to_string(), Vec::new());

        let coordinator = Arc::new(InMemoryTransactionCoordinator {
            state: self.state.clone(),
        });
        Ok(TransactionContext::new(txn_id, coordinator))
    }

    async fn close(&self) -> Result<(), PumpError> {
        lock_entity(&self.state).closed = true;
        Ok(())
    }
}

/// Coordinator handle captured by transaction contexts
struct InMemoryTransactionCoordinator {
    state: Arc<Mutex<EntityState>>,
}

#[async_trait]
impl TransactionCoordinator for InMemoryTransactionCoordinator {
    async fn end_transaction(
        &self,
        txn_id: &TransactionId,
        commit: bool,
    ) -> Result<(), PumpError> {
        end_transaction_impl(&self.state, txn_id, commit)
    }
}

// ============================================================================
// InMemorySessionClient
// ============================================================================

/// Session client over the in-memory entity
struct InMemorySessionClient {
    state: Arc<Mutex<EntityState>>,
    config: InMemoryEntityConfig,
    session_id: SessionId,
    locked_until: Mutex<Timestamp>,
}

impl InMemorySessionClient {
    fn check_session_lock(&self, state: &EntityState) -> Result<(), PumpError> {
        let held = state
            .sessions
            .get(&self.session_id)
            .map(|record| record.is_locked())
            .unwrap_or(false);
        if !held {
            return Err(PumpError::SessionLockLost {
                session_id: self.session_id.to_string(),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl SessionClient for InMemorySessionClient {
    fn session_id(&self) -> &SessionId {
        &self.session_id
    }

    fn locked_until(&self) -> Timestamp {
        self.locked_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    async fn receive_next(&self, wait: Duration) -> Result<Option<Message>, PumpError> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            {
                let mut state = lock_entity(&self.state);
                if state.closed {
                    return Err(PumpError::EntityClosed);
                }
                state.reclaim_expired();
                self.check_session_lock(&state)?;
                if let Some(message) =
                    state.take_message(Some(&self.session_id), self.config.lock_duration)
                {
                    return Ok(Some(message));
                }
            }

            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(self.config.poll_interval).await;
        }
    }

    async fn renew_session_lock(&self) -> Result<Timestamp, PumpError> {
        let mut state = lock_entity(&self.state);
        self.check_session_lock(&state)?;

        let locked_until = Timestamp::from_now(self.config.session_lock_duration);
        if let Some(record) = state.sessions.get_mut(&self.session_id) {
            record.locked_until = Some(locked_until.clone());
        }
        *state
            .stats
            .session_renewals
            .entry(self.session_id.clone())
            .or_insert(0) += 1;

        *self
            .locked_until
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = locked_until.clone();
        Ok(locked_until)
    }

    async fn complete(
        &self,
        lock_token: &LockToken,
        txn: Option<&TransactionContext>,
    ) -> Result<(), PumpError> {
        lock_entity(&self.state).settle(lock_token, txn, true)
    }

    async fn abandon(
        &self,
        lock_token: &LockToken,
        txn: Option<&TransactionContext>,
    ) -> Result<(), PumpError> {
        lock_entity(&self.state).settle(lock_token, txn, false)
    }

    async fn close(&self) -> Result<(), PumpError> {
        let mut state = lock_entity(&self.state);
        if let Some(record) = state.sessions.get_mut(&self.session_id) {
            record.locked = false;
            record.locked_until = None;
        }
        Ok(())
    }
}
