//! Application-facing handler traits and their configuration bags.

use crate::error::{ExceptionPhase, PumpError, ValidationError};
use crate::message::{Message, SessionId};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::time::Duration;

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;

// ============================================================================
// Handler Traits
// ============================================================================

/// User callback surface for the message pump.
///
/// `on_message` outcomes drive auto-settlement: with `auto_complete` enabled,
/// `Ok` completes the message and `Err` abandons it. Errors raised by the
/// pump itself (receive, renewal, settlement) are reported through
/// `notify_exception` and never terminate the pump.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Process one received message
    async fn on_message(&self, message: Message) -> Result<(), anyhow::Error>;

    /// Observe an error raised by a pump activity
    async fn notify_exception(&self, _error: &PumpError, _phase: ExceptionPhase) {}
}

/// User callback surface for the session pump.
#[async_trait]
pub trait SessionHandler: Send + Sync {
    /// Process one message received from a session
    async fn on_session_message(
        &self,
        session_id: SessionId,
        message: Message,
    ) -> Result<(), anyhow::Error>;

    /// Invoked exactly once when a session is closed after its idle window
    /// elapses with no new messages
    async fn on_session_closed(&self, session_id: &SessionId) -> Result<(), anyhow::Error>;

    /// Observe an error raised by a pump activity
    async fn notify_exception(&self, _error: &PumpError, _phase: ExceptionPhase) {}
}

// ============================================================================
// Handler Options
// ============================================================================

/// Configuration for the message pump.
///
/// `max_auto_renew_duration` must exceed the broker's message lock duration,
/// or renewal cannot keep the lock alive across a long-running callback.
#[derive(Debug, Clone)]
pub struct MessageHandlerOptions {
    /// Settle messages automatically based on the callback outcome
    pub auto_complete: bool,

    /// Maximum number of concurrently-executing callbacks
    pub max_concurrent_calls: u32,

    /// Total time a single message lock may be kept alive, regardless of how
    /// many renewals occur
    pub max_auto_renew_duration: Duration,

    /// Wait window for each individual receive call
    pub message_wait_duration: Duration,

    /// Retry policy for transient lock-renewal failures
    pub renew_retry: RetryPolicy,
}

impl Default for MessageHandlerOptions {
    fn default() -> Self {
        Self {
            auto_complete: true,
            max_concurrent_calls: 1,
            max_auto_renew_duration: Duration::from_secs(5 * 60),
            message_wait_duration: Duration::from_secs(30),
            renew_retry: RetryPolicy::default(),
        }
    }
}

impl MessageHandlerOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set automatic settlement based on callback outcome
    pub fn with_auto_complete(mut self, auto_complete: bool) -> Self {
        self.auto_complete = auto_complete;
        self
    }

    /// Set maximum concurrent callbacks
    pub fn with_max_concurrent_calls(mut self, max: u32) -> Self {
        self.max_concurrent_calls = max;
        self
    }

    /// Set total auto-renewal budget per lock
    pub fn with_max_auto_renew_duration(mut self, duration: Duration) -> Self {
        self.max_auto_renew_duration = duration;
        self
    }

    /// Set per-receive wait window
    pub fn with_message_wait_duration(mut self, duration: Duration) -> Self {
        self.message_wait_duration = duration;
        self
    }

    /// Set retry policy for transient renewal failures
    pub fn with_renew_retry(mut self, policy: RetryPolicy) -> Self {
        self.renew_retry = policy;
        self
    }

    /// Validate option invariants
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_calls < 1 {
            return Err(ValidationError::OutOfRange {
                field: "max_concurrent_calls".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.message_wait_duration.is_zero() {
            return Err(ValidationError::OutOfRange {
                field: "message_wait_duration".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}

/// Configuration for the session pump
#[derive(Debug, Clone)]
pub struct SessionHandlerOptions {
    /// Settle messages automatically based on the callback outcome
    pub auto_complete: bool,

    /// Maximum number of concurrently-open sessions
    pub max_concurrent_sessions: u32,

    /// Maximum concurrent callbacks within a single session
    pub max_concurrent_calls_per_session: u32,

    /// Total time a single session lock may be kept alive
    pub max_auto_renew_duration: Duration,

    /// Wait window for each individual receive/accept call; also the idle
    /// window after which a quiet session is closed
    pub message_wait_duration: Duration,

    /// Retry policy for transient lock-renewal failures
    pub renew_retry: RetryPolicy,
}

impl Default for SessionHandlerOptions {
    fn default() -> Self {
        Self {
            auto_complete: true,
            max_concurrent_sessions: 1,
            max_concurrent_calls_per_session: 1,
            max_auto_renew_duration: Duration::from_secs(5 * 60),
            message_wait_duration: Duration::from_secs(30),
            renew_retry: RetryPolicy::default(),
        }
    }
}

impl SessionHandlerOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set automatic settlement based on callback outcome
    pub fn with_auto_complete(mut self, auto_complete: bool) -> Self {
        self.auto_complete = auto_complete;
        self
    }

    /// Set maximum concurrently-open sessions
    pub fn with_max_concurrent_sessions(mut self, max: u32) -> Self {
        self.max_concurrent_sessions = max;
        self
    }

    /// Set maximum concurrent callbacks per session
    pub fn with_max_concurrent_calls_per_session(mut self, max: u32) -> Self {
        self.max_concurrent_calls_per_session = max;
        self
    }

    /// Set total auto-renewal budget per session lock
    pub fn with_max_auto_renew_duration(mut self, duration: Duration) -> Self {
        self.max_auto_renew_duration = duration;
        self
    }

    /// Set per-receive wait window
    pub fn with_message_wait_duration(mut self, duration: Duration) -> Self {
        self.message_wait_duration = duration;
        self
    }

    /// Set retry policy for transient renewal failures
    pub fn with_renew_retry(mut self, policy: RetryPolicy) -> Self {
        self.renew_retry = policy;
        self
    }

    /// Validate option invariants
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.max_concurrent_sessions < 1 {
            return Err(ValidationError::OutOfRange {
                field: "max_concurrent_sessions".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.max_concurrent_calls_per_session < 1 {
            return Err(ValidationError::OutOfRange {
                field: "max_concurrent_calls_per_session".to_string(),
                message: "must be at least 1".to_string(),
            });
        }

        if self.message_wait_duration.is_zero() {
            return Err(ValidationError::OutOfRange {
                field: "message_wait_duration".to_string(),
                message: "must be greater than zero".to_string(),
            });
        }

        Ok(())
    }
}
