//! Event dispatcher
//!
//! Turns hub pushes into [`UpdateEvent`]s and fans them out to every
//! consumer: a typed broadcast channel for async consumers, plus registered
//! callbacks for code that prefers the observer style. Errors escalated by
//! the manager go to the error callbacks.
//!
//! The dispatcher does no filtering, ordering or buffering beyond the
//! broadcast channel itself. A slow channel receiver that falls more than the
//! channel capacity behind sees `RecvError::Lagged` and skips ahead; callbacks
//! run inline on the connection's event task and should return quickly.
//!
//! A panicking update callback is contained: the panic is reported to the
//! error callbacks as [`ClientError::CallbackPanicked`] and delivery carries
//! on, so the event task keeps handling connection closes.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{debug, error, trace, warn};

use scorelink_transport_traits::HubInvocation;

use crate::error::ClientError;
use crate::events::UpdateEvent;

/// Callback invoked for every update
pub type UpdateCallback = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

/// Callback invoked for every escalated error
pub type ErrorCallback = Arc<dyn Fn(&ClientError) + Send + Sync>;

pub(crate) struct EventDispatcher {
    sender: broadcast::Sender<UpdateEvent>,
    update_callbacks: RwLock<Vec<UpdateCallback>>,
    error_callbacks: RwLock<Vec<ErrorCallback>>,
}

impl std::fmt::Debug for EventDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventDispatcher")
            .field("receivers", &self.sender.receiver_count())
            .field("update_callbacks", &self.update_callbacks.read().len())
            .field("error_callbacks", &self.error_callbacks.read().len())
            .finish()
    }
}

impl EventDispatcher {
    pub(crate) fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            update_callbacks: RwLock::new(Vec::new()),
            error_callbacks: RwLock::new(Vec::new()),
        }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<UpdateEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn on_update(&self, callback: UpdateCallback) {
        self.update_callbacks.write().push(callback);
        debug!("Update callback registered");
    }

    pub(crate) fn on_error(&self, callback: ErrorCallback) {
        self.error_callbacks.write().push(callback);
        debug!("Error callback registered");
    }

    /// Routes one hub push. Returns `true` if it was an update event.
    pub(crate) fn dispatch(&self, invocation: HubInvocation) -> bool {
        let target = invocation.target.clone();
        match UpdateEvent::from_invocation(invocation) {
            Some(event) => {
                trace!(event = %target, "Dispatching update");
                self.publish(&event);
                true
            }
            None => {
                debug!(event = %target, "Dropping unhandled hub event");
                false
            }
        }
    }

    pub(crate) fn publish(&self, event: &UpdateEvent) {
        // Snapshot so callbacks may register further callbacks without deadlocking
        let callbacks = self.update_callbacks.read().clone();
        for callback in &callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(event))) {
                let failure = ClientError::CallbackPanicked(panic_message(payload.as_ref()));
                warn!(error = %failure, kind = %event.kind, "Update callback panicked");
                self.report_error(&failure);
            }
        }
        // No receivers is fine
        let _ = self.sender.send(event.clone());
    }

    pub(crate) fn report_error(&self, error: &ClientError) {
        let callbacks = self.error_callbacks.read().clone();
        for callback in &callbacks {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| callback(error))) {
                error!(panic = %panic_message(payload.as_ref()), %error, "Error callback panicked");
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
