//! The single consumer of a manager's progress stream.
//!
//! Callbacks run on the manager's background task. They must not block;
//! hand work off (e.g. through [`ChannelSubscriber`]) when it is slow.

use std::fmt;

use pulse_core::{ProgressError, ProgressEvent};
use tokio::sync::mpsc;

use crate::state::ConnectionState;

/// Receives progress, errors, and state transitions for one connection.
pub trait ProgressSubscriber: Send + Sync + 'static {
    /// A throttled progress update.
    fn on_progress(&self, event: ProgressEvent);

    /// A failure. Terminal errors (see [`ProgressError::is_terminal`]) mean
    /// no further reconnects will happen until `connect` is called again.
    fn on_error(&self, error: &ProgressError);

    /// The manager moved to a new lifecycle state.
    fn on_state_change(&self, _state: ConnectionState) {}
}

// ─────────────────────────────────────────────────────────────────────────────
// Closure adapter
// ─────────────────────────────────────────────────────────────────────────────

/// Subscriber built from two closures.
pub struct FnSubscriber<P, E> {
    on_progress: P,
    on_error: E,
}

impl<P, E> FnSubscriber<P, E>
where
    P: Fn(ProgressEvent) + Send + Sync + 'static,
    E: Fn(&ProgressError) + Send + Sync + 'static,
{
    /// Wrap the two callbacks.
    pub fn new(on_progress: P, on_error: E) -> Self {
        Self {
            on_progress,
            on_error,
        }
    }
}

impl<P, E> ProgressSubscriber for FnSubscriber<P, E>
where
    P: Fn(ProgressEvent) + Send + Sync + 'static,
    E: Fn(&ProgressError) + Send + Sync + 'static,
{
    fn on_progress(&self, event: ProgressEvent) {
        (self.on_progress)(event);
    }

    fn on_error(&self, error: &ProgressError) {
        (self.on_error)(error);
    }
}

impl<P, E> fmt::Debug for FnSubscriber<P, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnSubscriber").finish_non_exhaustive()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Channel adapter
// ─────────────────────────────────────────────────────────────────────────────

/// Everything a [`ChannelSubscriber`] forwards.
#[derive(Clone, Debug, PartialEq)]
pub enum SubscriberEvent {
    /// From [`ProgressSubscriber::on_progress`].
    Progress(ProgressEvent),
    /// From [`ProgressSubscriber::on_error`].
    Error(ProgressError),
    /// From [`ProgressSubscriber::on_state_change`].
    State(ConnectionState),
}

/// Subscriber that forwards every callback into an unbounded channel.
///
/// Sends after the receiver is dropped are discarded.
#[derive(Clone, Debug)]
pub struct ChannelSubscriber {
    tx: mpsc::UnboundedSender<SubscriberEvent>,
}

impl ChannelSubscriber {
    /// Create the subscriber and the receiving end.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SubscriberEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl ProgressSubscriber for ChannelSubscriber {
    fn on_progress(&self, event: ProgressEvent) {
        let _ = self.tx.send(SubscriberEvent::Progress(event));
    }

    fn on_error(&self, error: &ProgressError) {
        let _ = self.tx.send(SubscriberEvent::Error(error.clone()));
    }

    fn on_state_change(&self, state: ConnectionState) {
        let _ = self.tx.send(SubscriberEvent::State(state));
    }
}
