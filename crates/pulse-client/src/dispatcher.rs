//! Inbound frame decoding and throttled progress delivery.
//!
//! Progress is coalesced into a single slot. The first event of a window
//! arms a flush deadline `window` later; later events in the same window
//! overwrite the slot. When the deadline passes the manager takes the slot
//! and delivers it, so the subscriber sees at most one event per window and
//! always the most recent one.

use std::time::Duration;

use pulse_core::{InboundFrame, ProgressError, ProgressEvent};
use tokio::time::Instant;

/// What happened to a decoded frame.
#[derive(Clone, Debug, PartialEq)]
pub enum Received {
    /// A progress event was buffered for the next flush.
    Buffered,
    /// A control frame; not forwarded to the subscriber.
    Control(InboundFrame),
}

/// Decodes frames and holds the throttle slot.
#[derive(Debug)]
pub struct MessageDispatcher {
    window: Duration,
    pending: Option<ProgressEvent>,
    flush_at: Option<Instant>,
}

impl MessageDispatcher {
    /// Dispatcher delivering at most once per `window`.
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            pending: None,
            flush_at: None,
        }
    }

    /// Throttle window.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Decode a text frame and buffer it if it carries progress.
    pub fn receive(&mut self, text: &str, now: Instant) -> Result<Received, ProgressError> {
        match InboundFrame::decode(text)? {
            InboundFrame::Progress(event) => {
                self.offer(event, now);
                Ok(Received::Buffered)
            }
            control => Ok(Received::Control(control)),
        }
    }

    /// Put `event` in the slot, replacing anything pending.
    pub fn offer(&mut self, event: ProgressEvent, now: Instant) {
        self.pending = Some(event);
        if self.flush_at.is_none() {
            self.flush_at = Some(now + self.window);
        }
    }

    /// When the pending event is due, if one is pending.
    pub fn flush_deadline(&self) -> Option<Instant> {
        self.flush_at
    }

    /// Whether an event is waiting in the slot.
    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Take the pending event if its deadline has passed.
    pub fn take_due(&mut self, now: Instant) -> Option<ProgressEvent> {
        match self.flush_at {
            Some(at) if at <= now => self.flush(),
            _ => None,
        }
    }

    /// Take the pending event regardless of the deadline.
    pub fn flush(&mut self) -> Option<ProgressEvent> {
        self.flush_at = None;
        self.pending.take()
    }

    /// Drop the pending event.
    pub fn clear(&mut self) {
        self.flush_at = None;
        self.pending = None;
    }
}
