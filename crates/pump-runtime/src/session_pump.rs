//! Session pump: bounded acceptance of sessions with nested per-session
//! message loops.
//!
//! Generalizes the message pump pattern across an outer session-acceptance
//! semaphore (`max_concurrent_sessions`) and an inner per-session dispatch
//! semaphore (`max_concurrent_calls_per_session`). Session affinity is
//! strict: one accepted slot owns a session until it is closed.

use crate::client::{EntityClient, SessionClient};
use crate::error::{ExceptionPhase, PumpError};
use crate::handler::{SessionHandler, SessionHandlerOptions};
use crate::message::Message;
use crate::renewer::{ExceptionSink, LockRenewer, SessionLockHolder};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "session_pump_tests.rs"]
mod tests;

/// Pause before retrying a failed accept when the error suggests no delay
const ACCEPT_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Accepts sessions under bounded concurrency and pumps each one through a
/// nested message loop until its idle window elapses.
pub struct SessionPump {
    entity: Arc<dyn EntityClient>,
    session_slots: Arc<Semaphore>,
    max_concurrent_sessions: u32,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: JoinHandle<()>,
}

impl SessionPump {
    /// Start accepting sessions from `entity` into `handler`.
    ///
    /// Probes `accept_next_session` before spawning the loop: a
    /// non-transient failure (entity missing, unauthorized) is returned as a
    /// hard error. A session yielded by the probe is pumped normally.
    pub async fn start(
        entity: Arc<dyn EntityClient>,
        handler: Arc<dyn SessionHandler>,
        options: SessionHandlerOptions,
    ) -> Result<Self, PumpError> {
        options.validate()?;

        let first = match entity
            .accept_next_session(options.message_wait_duration)
            .await
        {
            Ok(session) => session,
            Err(err) if err.is_transient() => {
                warn!(error = %err, "transient failure on probe accept, pump will retry");
                None
            }
            Err(err) => {
                error!(error = %err, "session pump startup failed");
                return Err(err);
            }
        };

        let session_slots = Arc::new(Semaphore::new(options.max_concurrent_sessions as usize));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if let Some(session) = first {
            if let Ok(permit) = session_slots.clone().try_acquire_owned() {
                tokio::spawn(run_session(
                    handler.clone(),
                    options.clone(),
                    Arc::from(session),
                    permit,
                    shutdown_rx.clone(),
                ));
            }
        }

        let max_concurrent_sessions = options.max_concurrent_sessions;
        let loop_handle = tokio::spawn(accept_loop(
            entity.clone(),
            handler,
            options,
            session_slots.clone(),
            shutdown_rx,
        ));

        info!(max_concurrent_sessions, "session pump started");
        Ok(Self {
            entity,
            session_slots,
            max_concurrent_sessions,
            shutdown_tx,
            loop_handle,
        })
    }

    /// Stop accepting sessions, drain open sessions (each still receives its
    /// close callback exactly once), then release entity resources.
    pub async fn close(self) -> Result<(), PumpError> {
        let _ = self.shutdown_tx.send(true);
        let _ = self.loop_handle.await;

        // Every open session holds one outer permit until it is closed.
        let _drained = self
            .session_slots
            .acquire_many(self.max_concurrent_sessions)
            .await
            .ok();

        info!("session pump closed");
        self.entity.close().await
    }
}

async fn accept_loop(
    entity: Arc<dyn EntityClient>,
    handler: Arc<dyn SessionHandler>,
    options: SessionHandlerOptions,
    session_slots: Arc<Semaphore>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        let permit = tokio::select! {
            _ = shutdown_rx.changed() => break,
            acquired = session_slots.clone().acquire_owned() => match acquired {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let accepted = tokio::select! {
            _ = shutdown_rx.changed() => {
                drop(permit);
                break;
            }
            accepted = entity.accept_next_session(options.message_wait_duration) => accepted,
        };

        match accepted {
            Ok(Some(session)) => {
                debug!(session_id = %session.session_id(), "session accepted");
                tokio::spawn(run_session(
                    handler.clone(),
                    options.clone(),
                    Arc::from(session),
                    permit,
                    shutdown_rx.clone(),
                ));
            }
            Ok(None) => {
                // No session available within the wait window; retry.
                drop(permit);
            }
            Err(err) => {
                warn!(error = %err, "accept session failed");
                handler
                    .notify_exception(&err, ExceptionPhase::AcceptSession)
                    .await;
                drop(permit);
                sleep(err.retry_after().unwrap_or(ACCEPT_RETRY_DELAY)).await;
            }
        }
    }

    debug!("accept loop stopped");
}

/// Drive one accepted session: session-lock renewal, an inner
/// bounded-concurrency message loop, and the close sequence once the idle
/// window elapses with nothing in flight.
///
/// The outer session permit is held for the lifetime of this task and
/// released when it returns; a failing close callback never leaks the slot.
async fn run_session(
    handler: Arc<dyn SessionHandler>,
    options: SessionHandlerOptions,
    session: Arc<dyn SessionClient>,
    permit: OwnedSemaphorePermit,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let _permit = permit;
    let session_id = session.session_id().clone();
    let per_session = options.max_concurrent_calls_per_session;

    let sink: Arc<dyn ExceptionSink> = Arc::new(SessionHandlerSink {
        handler: handler.clone(),
    });
    let renewer = LockRenewer::start(
        Arc::new(SessionLockHolder::new(session.clone())),
        session.locked_until(),
        options.max_auto_renew_duration,
        options.renew_retry.clone(),
        sink,
    );

    let call_slots = Arc::new(Semaphore::new(per_session as usize));

    loop {
        let call_permit = tokio::select! {
            _ = shutdown_rx.changed() => break,
            acquired = call_slots.clone().acquire_owned() => match acquired {
                Ok(p) => p,
                Err(_) => break,
            },
        };

        let received = tokio::select! {
            _ = shutdown_rx.changed() => {
                drop(call_permit);
                break;
            }
            received = session.receive_next(options.message_wait_duration) => received,
        };

        match received {
            Ok(Some(message)) => {
                debug!(session_id = %session_id, message_id = %message.message_id, "dispatching session message");
                tokio::spawn(dispatch_session_message(
                    session.clone(),
                    handler.clone(),
                    options.clone(),
                    message,
                    call_permit,
                ));
            }
            Ok(None) => {
                drop(call_permit);
                // Idle window elapsed; close only once nothing is in flight,
                // otherwise a slow callback could still produce settlements.
                if call_slots.available_permits() == per_session as usize {
                    debug!(session_id = %session_id, "session idle, closing");
                    break;
                }
            }
            Err(err) => {
                warn!(session_id = %session_id, error = %err, "session receive failed");
                handler.notify_exception(&err, ExceptionPhase::Receive).await;
                drop(call_permit);
                if err.is_transient() {
                    sleep(err.retry_after().unwrap_or(ACCEPT_RETRY_DELAY)).await;
                } else {
                    // Lock lost or entity gone; close out the session slot.
                    break;
                }
            }
        }
    }

    // Drain in-flight callbacks before the close callback runs.
    let _inflight = call_slots.acquire_many(per_session).await.ok();

    renewer.stop().await;

    if let Err(cause) = handler.on_session_closed(&session_id).await {
        let close_error = PumpError::Callback { cause };
        warn!(session_id = %session_id, error = %close_error, "session close callback failed");
        handler
            .notify_exception(&close_error, ExceptionPhase::CloseSession)
            .await;
    }

    if let Err(err) = session.close().await {
        warn!(session_id = %session_id, error = %err, "session close failed");
        handler
            .notify_exception(&err, ExceptionPhase::CloseSession)
            .await;
    }

    debug!(session_id = %session_id, "session released");
}

/// One dispatch within a session. Settlement goes through the session
/// client; lock renewal is session-scoped, so there is no per-message
/// renewer here.
async fn dispatch_session_message(
    session: Arc<dyn SessionClient>,
    handler: Arc<dyn SessionHandler>,
    options: SessionHandlerOptions,
    message: Message,
    permit: OwnedSemaphorePermit,
) {
    let _permit = permit;

    let lock_token = message.lock_token.clone();
    let outcome = handler
        .on_session_message(session.session_id().clone(), message)
        .await;

    match outcome {
        Ok(()) => {
            if options.auto_complete {
                if let Err(err) = session.complete(&lock_token, None).await {
                    error!(lock_token = %lock_token, error = %err, "complete failed");
                    handler.notify_exception(&err, ExceptionPhase::Complete).await;
                }
            }
        }
        Err(cause) => {
            let callback_error = PumpError::Callback { cause };
            warn!(lock_token = %lock_token, error = %callback_error, "session handler callback failed");
            handler
                .notify_exception(&callback_error, ExceptionPhase::UserCallback)
                .await;

            if options.auto_complete {
                if let Err(err) = session.abandon(&lock_token, None).await {
                    error!(lock_token = %lock_token, error = %err, "abandon failed");
                    handler.notify_exception(&err, ExceptionPhase::Abandon).await;
                }
            }
        }
    }
}

/// Adapts a session handler's `notify_exception` for the lock renewer
struct SessionHandlerSink {
    handler: Arc<dyn SessionHandler>,
}

#[async_trait]
impl ExceptionSink for SessionHandlerSink {
    async fn notify_exception(&self, error: &PumpError, phase: ExceptionPhase) {
        self.handler.notify_exception(error, phase).await;
    }
}
