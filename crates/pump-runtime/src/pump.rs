//! Message pump for non-sessionful entities.
//!
//! The pump maintains a steady-state loop that never has more than
//! `max_concurrent_calls` callbacks in flight. The single backpressure point
//! is the dispatch semaphore: a permit is acquired before each receive, so
//! the pump cannot over-fetch messages it cannot yet process.

use crate::client::EntityClient;
use crate::error::{ExceptionPhase, PumpError};
use crate::handler::{MessageHandler, MessageHandlerOptions};
use crate::message::Message;
use crate::renewer::{ExceptionSink, LockRenewer, MessageLockHolder};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

#[cfg(test)]
#[path = "pump_tests.rs"]
mod tests;

/// Pause before retrying a failed receive when the error suggests no delay
const RECEIVE_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Pulls messages from an entity and dispatches each to the registered
/// handler under bounded concurrency.
///
/// Created with [`MessagePump::start`]; runs until [`MessagePump::close`] is
/// called. One failing message never terminates the pump: every internal
/// error is funneled through the handler's `notify_exception`.
pub struct MessagePump {
    entity: Arc<dyn EntityClient>,
    dispatch_slots: Arc<Semaphore>,
    max_concurrent_calls: u32,
    shutdown_tx: watch::Sender<bool>,
    loop_handle: JoinHandle<()>,
}

impl MessagePump {
    /// Start pumping messages from `entity` into `handler`.
    ///
    /// Performs a probe receive before spawning the loop: failure to even
    /// start receiving (entity missing, unauthorized) is returned as a hard
    /// error to the caller. A message yielded by the probe is dispatched
    /// normally.
    ///
    /// # Errors
    ///
    /// Returns `ValidationError` (wrapped) for invalid options, or the probe
    /// error when the first receive fails non-transiently.
    pub async fn start(
        entity: Arc<dyn EntityClient>,
        handler: Arc<dyn MessageHandler>,
        options: MessageHandlerOptions,
    ) -> Result<Self, PumpError> {
        options.validate()?;

        let first = match entity.receive_next(options.message_wait_duration).await {
            Ok(message) => message,
            Err(err) if err.is_transient() => {
                warn!(error = %err, "transient failure on probe receive, pump will retry");
                None
            }
            Err(err) => {
                error!(error = %err, "pump startup failed");
                return Err(err);
            }
        };

        let dispatch_slots = Arc::new(Semaphore::new(options.max_concurrent_calls as usize));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        if let Some(message) = first {
            if let Ok(permit) = dispatch_slots.clone().try_acquire_owned() {
                tokio::spawn(dispatch_message(
                    entity.clone(),
                    handler.clone(),
                    options.clone(),
                    message,
                    permit,
                ));
            }
        }

        let max_concurrent_calls = options.max_concurrent_calls;
        let loop_handle = tokio::spawn(receive_loop(
            entity.clone(),
            handler,
            options,
            dispatch_slots.clone(),
            shutdown_rx,
        ));

        info!(max_concurrent_calls, "message pump started");
        Ok(Self {
            entity,
            dispatch_slots,
            max_concurrent_calls,
            shutdown_tx,
            loop_handle,
        })
    }

    /// Stop receiving, wait for in-flight dispatch slots to finish (their
    /// settlement included), then release entity resources.
    ///
    /// No message is abandoned merely because shutdown was requested;
    /// in-flight work runs to completion.
    pub async fn close(self) -> Result<(), PumpError> {
        let _ = self.shutdown_tx.send(true);
        let _ = self.loop_handle.await;

        // Every dispatch slot holds one permit until it finishes, so holding
        // all of them means the pump is drained.
        let _drained = self
            .dispatch_slots
            .acquire_many(self.max_concurrent_calls)
            .await
            .ok();

        info!("message pump closed");
        self.entity.close().await
    }
}

async fn receive_loop(
    entity: Arc<dyn EntityClient>,
    handler: Arc<dyn MessageHandler>,
    options: MessageHandlerOptions,
    dispatch_slots: Arc<Semaphore>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    loop {
        // Acquire a dispatch permit before receiving; this is the single
        // backpressure point.
        let permit = tokio::select! {
            _ = shutdown_rx.changed() => break,
            acquired = dispatch_slots.clone().acquire_owned() => match acquired {
                Ok(permit) => permit,
                Err(_) => break,
            },
        };

        let received = tokio::select! {
            _ = shutdown_rx.changed() => {
                drop(permit);
                break;
            }
            received = entity.receive_next(options.message_wait_duration) => received,
        };

        match received {
            Ok(Some(message)) => {
                debug!(message_id = %message.message_id, "dispatching message");
                tokio::spawn(dispatch_message(
                    entity.clone(),
                    handler.clone(),
                    options.clone(),
                    message,
                    permit,
                ));
            }
            Ok(None) => {
                // Wait window elapsed with no message; not an error.
                drop(permit);
            }
            Err(err) => {
                warn!(error = %err, "receive failed");
                handler.notify_exception(&err, ExceptionPhase::Receive).await;
                drop(permit);
                sleep(err.retry_after().unwrap_or(RECEIVE_RETRY_DELAY)).await;
            }
        }
    }

    debug!("receive loop stopped");
}

/// One bounded-concurrency dispatch: renewer start, callback, renewer stop,
/// settlement, permit release. The permit is released when this task ends,
/// success or failure, so the loop always makes progress.
async fn dispatch_message(
    entity: Arc<dyn EntityClient>,
    handler: Arc<dyn MessageHandler>,
    options: MessageHandlerOptions,
    message: Message,
    permit: OwnedSemaphorePermit,
) {
    let _permit = permit;

    let holder = Arc::new(MessageLockHolder::new(
        entity.clone(),
        message.lock_token.clone(),
    ));
    let sink: Arc<dyn ExceptionSink> = Arc::new(MessageHandlerSink {
        handler: handler.clone(),
    });
    let renewer = LockRenewer::start(
        holder,
        message.locked_until.clone(),
        options.max_auto_renew_duration,
        options.renew_retry.clone(),
        sink,
    );

    let lock_token = message.lock_token.clone();
    let outcome = handler.on_message(message).await;

    // Stop renewing the instant the callback returns; settlement races the
    // lock from here on.
    renewer.stop().await;

    match outcome {
        Ok(()) => {
            if options.auto_complete {
                if let Err(err) = entity.complete(&lock_token, None).await {
                    error!(lock_token = %lock_token, error = %err, "complete failed");
                    handler.notify_exception(&err, ExceptionPhase::Complete).await;
                }
            }
        }
        Err(cause) => {
            let callback_error = PumpError::Callback { cause };
            warn!(lock_token = %lock_token, error = %callback_error, "handler callback failed");
            handler
                .notify_exception(&callback_error, ExceptionPhase::UserCallback)
                .await;

            if options.auto_complete {
                if let Err(err) = entity.abandon(&lock_token, None).await {
                    error!(lock_token = %lock_token, error = %err, "abandon failed");
                    handler.notify_exception(&err, ExceptionPhase::Abandon).await;
                }
            }
        }
    }
}

/// Adapts a message handler's `notify_exception` for the lock renewer
struct MessageHandlerSink {
    handler: Arc<dyn MessageHandler>,
}

#[async_trait]
impl ExceptionSink for MessageHandlerSink {
    async fn notify_exception(&self, error: &PumpError, phase: ExceptionPhase) {
        self.handler.notify_exception(error, phase).await;
    }
}
