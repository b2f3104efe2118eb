//! # Pump Runtime
//!
//! Client-side message and session delivery pump for broker-backed queue
//! entities.
//!
//! This library provides:
//! - Concurrent peek-lock message dispatch with bounded in-flight slots
//! - Automatic lock renewal within a configurable renewal budget
//! - Session pumps with per-session ordered dispatch and idle close
//! - Non-locking session browsing with paginated enumeration
//! - Broker-side transactions with atomic settlement semantics
//! - An in-memory entity for tests and development
//!
//! ## Module Organization
//!
//! - [browser] - Non-locking session enumeration and inspection
//! - [client] - Entity and session client traits
//! - [error] - Error types for all pump operations
//! - [handler] - Application callback traits and pump options
//! - [message] - Message structures and domain identifiers
//! - [providers] - Concrete entity client implementations
//! - [pump] - Sessionless message pump
//! - [renewer] - Background lock renewal
//! - [retry] - Bounded retry policies
//! - [session_pump] - Session-aware message pump
//! - [transaction] - Broker-side transaction contexts

// Module declarations
pub mod browser;
pub mod client;
pub mod error;
pub mod handler;
pub mod message;
pub mod providers;
pub mod pump;
pub mod renewer;
pub mod retry;
pub mod session_pump;
pub mod transaction;

// Re-export commonly used types at crate root for convenience
pub use browser::{BrowsableSession, SessionBrowser, SESSION_PAGE_SIZE};
pub use client::{EntityClient, SessionClient, SessionPage, SessionState, TransactionCoordinator};
pub use error::{ExceptionPhase, PumpError, ValidationError};
pub use handler::{
    MessageHandler, MessageHandlerOptions, SessionHandler, SessionHandlerOptions,
};
pub use message::{LockToken, Message, MessageId, SessionId, Timestamp};
pub use providers::{InMemoryEntity, InMemoryEntityConfig};
pub use pump::MessagePump;
pub use retry::RetryPolicy;
pub use session_pump::SessionPump;
pub use transaction::{TransactionContext, TransactionId, TransactionStatus};
