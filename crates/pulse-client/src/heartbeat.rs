//! Heartbeat probe/timeout liveness monitoring.
//!
//! One heartbeat task runs per open connection. Every `interval` it sends a
//! [`HeartbeatProbe`]. The first unanswered probe arms a `timeout` deadline;
//! any inbound traffic recorded in [`Liveness`] after that probe disarms it.
//! If the deadline passes first the connection is declared dead.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use pulse_core::HeartbeatProbe;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::transport::OutboundMessage;

/// Last time inbound traffic was seen on a connection.
#[derive(Debug)]
pub struct Liveness {
    last_seen: Mutex<Instant>,
}

impl Default for Liveness {
    fn default() -> Self {
        Self::new()
    }
}

impl Liveness {
    /// Start as seen now.
    #[must_use]
    pub fn new() -> Self {
        Self {
            last_seen: Mutex::new(Instant::now()),
        }
    }

    /// Record inbound traffic.
    pub fn mark(&self) {
        *self.last_seen.lock() = Instant::now();
    }

    /// Last recorded inbound traffic.
    pub fn last_seen(&self) -> Instant {
        *self.last_seen.lock()
    }

    /// Whether traffic was recorded at or after `instant`.
    pub fn seen_since(&self, instant: Instant) -> bool {
        self.last_seen() >= instant
    }
}

/// Outcome of the heartbeat loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatResult {
    /// No traffic arrived within the timeout of an unanswered probe.
    TimedOut,
    /// The heartbeat was cancelled externally.
    Cancelled,
    /// The outbound channel closed; the transport reports the close.
    TransportClosed,
}

/// Run heartbeat probes for one connection until it times out, is
/// cancelled, or the outbound side closes.
pub async fn run_heartbeat(
    liveness: Arc<Liveness>,
    outbound: mpsc::Sender<OutboundMessage>,
    interval: Duration,
    timeout: Duration,
    cancel: CancellationToken,
) -> HeartbeatResult {
    let mut ticker = time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut unanswered_since: Option<Instant> = None;

    loop {
        let deadline = unanswered_since.map(|sent| sent + timeout);
        tokio::select! {
            _ = ticker.tick() => {
                if unanswered_since.is_some_and(|sent| liveness.seen_since(sent)) {
                    unanswered_since = None;
                }
                let probe = HeartbeatProbe::now();
                trace!(timestamp = probe.timestamp, "sending heartbeat");
                match outbound.try_send(OutboundMessage::Text(probe.to_text())) {
                    Ok(()) => {}
                    Err(TrySendError::Full(_)) => {
                        debug!("outbound queue full, heartbeat skipped");
                    }
                    Err(TrySendError::Closed(_)) => return HeartbeatResult::TransportClosed,
                }
                if unanswered_since.is_none() {
                    unanswered_since = Some(Instant::now());
                }
            }
            () = expire(deadline) => {
                match unanswered_since {
                    Some(sent) if !liveness.seen_since(sent) => {
                        return HeartbeatResult::TimedOut;
                    }
                    _ => unanswered_since = None,
                }
            }
            () = cancel.cancelled() => {
                return HeartbeatResult::Cancelled;
            }
        }
    }
}

async fn expire(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Monitor
// ─────────────────────────────────────────────────────────────────────────────

/// Spawns heartbeat tasks and counts how many are alive.
#[derive(Clone, Debug)]
pub struct HeartbeatMonitor {
    interval: Duration,
    timeout: Duration,
    active: Arc<AtomicUsize>,
}

impl HeartbeatMonitor {
    /// Create a monitor with the given probe interval and timeout.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self {
            interval,
            timeout,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Configured timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Heartbeat tasks currently running.
    pub fn active(&self) -> usize {
        self.active.load(Ordering::SeqCst)
    }

    /// Spawn a heartbeat task. `on_timeout` runs once if the task times out.
    pub fn spawn<F>(
        &self,
        liveness: Arc<Liveness>,
        outbound: mpsc::Sender<OutboundMessage>,
        cancel: CancellationToken,
        on_timeout: F,
    ) -> JoinHandle<HeartbeatResult>
    where
        F: FnOnce() + Send + 'static,
    {
        let guard = ActiveGuard::enter(&self.active);
        let (interval, timeout) = (self.interval, self.timeout);
        tokio::spawn(async move {
            let _guard = guard;
            let result = run_heartbeat(liveness, outbound, interval, timeout, cancel).await;
            debug!(?result, "heartbeat stopped");
            if result == HeartbeatResult::TimedOut {
                on_timeout();
            }
            result
        })
    }
}

struct ActiveGuard(Arc<AtomicUsize>);

impl ActiveGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        let _ = counter.fetch_add(1, Ordering::SeqCst);
        Self(Arc::clone(counter))
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        let _ = self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    fn channel() -> (mpsc::Sender<OutboundMessage>, mpsc::Receiver<OutboundMessage>) {
        mpsc::channel(32)
    }

    // -- run_heartbeat --

    #[tokio::test(start_paused = true)]
    async fn heartbeat_cancelled() {
        let (tx, _rx) = channel();
        let cancel = CancellationToken::new();
        let cancel2 = cancel.clone();

        let handle = tokio::spawn(async move {
            run_heartbeat(
                Arc::new(Liveness::new()),
                tx,
                Duration::from_secs(60),
                Duration::from_secs(180),
                cancel2,
            )
            .await
        });

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn sends_probe_each_interval() {
        let (tx, mut rx) = channel();
        let cancel = CancellationToken::new();
        let liveness = Arc::new(Liveness::new());
        let _handle = tokio::spawn(run_heartbeat(
            liveness.clone(),
            tx,
            Duration::from_secs(60),
            Duration::from_secs(180),
            cancel.clone(),
        ));

        for _ in 0..3 {
            let OutboundMessage::Text(text) = rx.recv().await.unwrap() else {
                panic!("expected text probe");
            };
            let value: Value = serde_json::from_str(&text).unwrap();
            assert_eq!(value["type"], "heartbeat");
            assert!(value["timestamp"].is_i64());
            liveness.mark();
        }
        cancel.cancel();
    }

    #[tokio::test(start_paused = true)]
    async fn times_out_without_traffic() {
        let (tx, _rx) = channel();
        let start = Instant::now();
        let result = run_heartbeat(
            Arc::new(Liveness::new()),
            tx,
            Duration::from_secs(60),
            Duration::from_secs(180),
            CancellationToken::new(),
        )
        .await;

        assert_eq!(result, HeartbeatResult::TimedOut);
        // first probe at 60s, timeout armed then: dead at 240s
        assert_eq!(start.elapsed(), Duration::from_secs(240));
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_outbound_queue_still_times_out() {
        let (tx, _rx) = mpsc::channel(1);
        tx.try_send(OutboundMessage::Text("queued".into())).unwrap();

        let start = Instant::now();
        let result = time::timeout(
            Duration::from_secs(10),
            run_heartbeat(
                Arc::new(Liveness::new()),
                tx,
                Duration::from_secs(1),
                Duration::from_secs(3),
                CancellationToken::new(),
            ),
        )
        .await;

        assert_eq!(result, Ok(HeartbeatResult::TimedOut));
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test(start_paused = true)]
    async fn traffic_keeps_connection_alive() {
        let (tx, mut rx) = channel();
        let liveness = Arc::new(Liveness::new());
        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run_heartbeat(
            liveness.clone(),
            tx,
            Duration::from_millis(50),
            Duration::from_millis(200),
            cancel.clone(),
        ));

        // answer every probe for well past the timeout
        for _ in 0..20 {
            let _ = rx.recv().await.unwrap();
            liveness.mark();
        }

        cancel.cancel();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn closed_outbound_stops() {
        let (tx, rx) = channel();
        drop(rx);
        let result = run_heartbeat(
            Arc::new(Liveness::new()),
            tx,
            Duration::from_millis(10),
            Duration::from_millis(30),
            CancellationToken::new(),
        )
        .await;
        assert_eq!(result, HeartbeatResult::TransportClosed);
    }

    // -- HeartbeatMonitor --

    #[tokio::test(start_paused = true)]
    async fn monitor_counts_and_reports_timeout() {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(1), Duration::from_secs(3));
        let (tx, _rx) = channel();
        let (expired_tx, expired_rx) = tokio::sync::oneshot::channel();

        let handle = monitor.spawn(
            Arc::new(Liveness::new()),
            tx,
            CancellationToken::new(),
            move || {
                let _ = expired_tx.send(());
            },
        );
        assert_eq!(monitor.active(), 1);

        expired_rx.await.unwrap();
        assert_eq!(handle.await.unwrap(), HeartbeatResult::TimedOut);
        assert_eq!(monitor.active(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn monitor_cancel_skips_callback() {
        let monitor = HeartbeatMonitor::new(Duration::from_secs(1), Duration::from_secs(3));
        let (tx, _rx) = channel();
        let cancel = CancellationToken::new();
        let fired = Arc::new(AtomicUsize::new(0));
        let fired2 = fired.clone();

        let handle = monitor.spawn(Arc::new(Liveness::new()), tx, cancel.clone(), move || {
            let _ = fired2.fetch_add(1, Ordering::SeqCst);
        });
        cancel.cancel();

        assert_eq!(handle.await.unwrap(), HeartbeatResult::Cancelled);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert_eq!(monitor.active(), 0);
    }

    #[test]
    fn liveness_seen_since() {
        let liveness = Liveness::new();
        let before = liveness.last_seen();
        assert!(liveness.seen_since(before));
    }
}
