//! Background lock renewal.
//!
//! A [`LockRenewer`] keeps exactly one lock token alive for as long as its
//! owning dispatch slot runs, without renewing forever: the renewer stops
//! when `stop()` is called or once `max_auto_renew_duration` has elapsed
//! since start, whichever comes first. The budget exists so a stuck callback
//! cannot renew a lock indefinitely and starve other consumers.

use crate::client::{EntityClient, SessionClient};
use crate::error::{ExceptionPhase, PumpError};
use crate::message::{LockToken, Timestamp};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, warn};

#[cfg(test)]
#[path = "renewer_tests.rs"]
mod tests;

/// Renewals are scheduled this far before lock expiry at most; shorter locks
/// use a third of the remaining window instead.
const MAX_RENEWAL_SAFETY_MARGIN: Duration = Duration::from_secs(10);

/// Sink for errors raised by background pump activities.
///
/// The pumps adapt their handler's `notify_exception` into this, so renewal
/// failures reach the application through the same funnel as every other
/// pump error.
#[async_trait]
pub trait ExceptionSink: Send + Sync {
    /// Observe an error raised by a pump activity
    async fn notify_exception(&self, error: &PumpError, phase: ExceptionPhase);
}

/// A renewable lock: one message lock or one session lock
#[async_trait]
pub trait LockHolder: Send + Sync {
    /// Short description used in log and error context
    fn describe(&self) -> String;

    /// Issue one renew call, returning the new lock expiry
    async fn renew(&self) -> Result<Timestamp, PumpError>;
}

/// Renews the lock on a single in-flight message
pub struct MessageLockHolder {
    entity: Arc<dyn EntityClient>,
    lock_token: LockToken,
}

impl MessageLockHolder {
    /// Create holder for a message lock
    pub fn new(entity: Arc<dyn EntityClient>, lock_token: LockToken) -> Self {
        Self { entity, lock_token }
    }
}

#[async_trait]
impl LockHolder for MessageLockHolder {
    fn describe(&self) -> String {
        format!("message lock {}", self.lock_token)
    }

    async fn renew(&self) -> Result<Timestamp, PumpError> {
        self.entity.renew_lock(&self.lock_token).await
    }
}

/// Renews the lock on a single accepted session
pub struct SessionLockHolder {
    session: Arc<dyn SessionClient>,
}

impl SessionLockHolder {
    /// Create holder for a session lock
    pub fn new(session: Arc<dyn SessionClient>) -> Self {
        Self { session }
    }
}

#[async_trait]
impl LockHolder for SessionLockHolder {
    fn describe(&self) -> String {
        format!("session lock {}", self.session.session_id())
    }

    async fn renew(&self) -> Result<Timestamp, PumpError> {
        self.session.renew_session_lock().await
    }
}

/// Background timer keeping a single lock alive until stopped or until the
/// auto-renew budget is exhausted.
///
/// A renewal failure is reported through the sink with
/// [`ExceptionPhase::RenewLock`] and stops the renewer; it does not cancel
/// the in-flight callback, which may still finish before noticing the lock
/// is gone.
pub struct LockRenewer {
    stop_tx: watch::Sender<bool>,
    handle: Option<JoinHandle<()>>,
}

impl LockRenewer {
    /// Start renewing the given lock.
    ///
    /// The first renewal is scheduled at `initial_locked_until` minus a
    /// safety margin; each successful renewal reschedules from the returned
    /// expiry.
    pub fn start(
        holder: Arc<dyn LockHolder>,
        initial_locked_until: Timestamp,
        max_auto_renew_duration: Duration,
        retry: RetryPolicy,
        sink: Arc<dyn ExceptionSink>,
    ) -> Self {
        let (stop_tx, stop_rx) = watch::channel(false);
        let handle = tokio::spawn(renewal_loop(
            holder,
            initial_locked_until,
            max_auto_renew_duration,
            retry,
            sink,
            stop_rx,
        ));

        Self {
            stop_tx,
            handle: Some(handle),
        }
    }

    /// Stop the renewer and wait for its task to finish
    pub async fn stop(mut self) {
        let _ = self.stop_tx.send(true);
        if let Some(handle) = self.handle.take() {
            let _ = handle.await;
        }
    }
}

impl Drop for LockRenewer {
    fn drop(&mut self) {
        // Signal the task even if stop() was never awaited
        let _ = self.stop_tx.send(true);
    }
}

async fn renewal_loop(
    holder: Arc<dyn LockHolder>,
    initial_locked_until: Timestamp,
    max_auto_renew_duration: Duration,
    retry: RetryPolicy,
    sink: Arc<dyn ExceptionSink>,
    mut stop_rx: watch::Receiver<bool>,
) {
    let started = Instant::now();
    let mut locked_until = initial_locked_until;

    loop {
        let remaining_budget = match max_auto_renew_duration.checked_sub(started.elapsed()) {
            Some(budget) if !budget.is_zero() => budget,
            _ => {
                debug!(lock = %holder.describe(), "auto-renew budget exhausted");
                return;
            }
        };

        let window = locked_until.duration_until();
        let sleep_for = window
            .saturating_sub(renewal_safety_margin(window))
            .min(remaining_budget);

        tokio::select! {
            _ = stop_rx.changed() => return,
            _ = sleep(sleep_for) => {}
        }

        // No renewal is issued once the budget has elapsed, even if the
        // renewer was never explicitly stopped.
        if started.elapsed() >= max_auto_renew_duration {
            debug!(lock = %holder.describe(), "auto-renew budget exhausted");
            return;
        }

        match renew_with_retry(holder.as_ref(), &retry).await {
            Ok(new_locked_until) => {
                debug!(lock = %holder.describe(), locked_until = %new_locked_until, "lock renewed");
                locked_until = new_locked_until;
            }
            Err(error) => {
                warn!(lock = %holder.describe(), error = %error, "lock renewal failed");
                sink.notify_exception(&error, ExceptionPhase::RenewLock).await;
                return;
            }
        }
    }
}

/// Renewal fires this far before expiry: a third of the remaining lock
/// window, capped so very long locks still renew with comfortable slack
fn renewal_safety_margin(window: Duration) -> Duration {
    (window / 3).min(MAX_RENEWAL_SAFETY_MARGIN)
}

async fn renew_with_retry(
    holder: &dyn LockHolder,
    retry: &RetryPolicy,
) -> Result<Timestamp, PumpError> {
    let mut attempt = 0;
    loop {
        match holder.renew().await {
            Ok(locked_until) => return Ok(locked_until),
            Err(error) if error.is_transient() && retry.should_retry(attempt) => {
                debug!(
                    lock = %holder.describe(),
                    attempt,
                    error = %error,
                    "transient renewal failure, retrying"
                );
                sleep(retry.delay_for(attempt)).await;
                attempt += 1;
            }
            Err(error) => return Err(error),
        }
    }
}
