//! Change notifications for observers of the branch catalog.
//!
//! The engine emits events and never waits on anyone listening. Observers
//! that redraw on change put a [`RefreshDebouncer`] in between so a burst of
//! operations produces a single refresh.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::debug;

/// Event emitted after branch state changed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchEvent {
    /// Listings derived from the catalog are stale
    Refresh,
    /// The active branch label changed
    ActiveChanged(Option<String>),
    /// A fan-out operation completed (`partial` when some repositories failed)
    OperationFinished { operation: String, partial: bool },
}

/// Sending half handed to the engine; a detached bus drops everything
#[derive(Debug, Clone, Default)]
pub struct EventBus {
    tx: Option<mpsc::UnboundedSender<BranchEvent>>,
}

impl EventBus {
    pub fn new(tx: mpsc::UnboundedSender<BranchEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Bus plus the receiver observers read from
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<BranchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }

    pub fn detached() -> Self {
        Self::default()
    }

    pub fn emit(&self, event: BranchEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if tx.send(event).is_err() {
            debug!("Branch event dropped, no listener");
        }
    }
}

/// Coalesces `Refresh` events arriving within `window` of each other
pub struct RefreshDebouncer {
    rx: mpsc::UnboundedReceiver<BranchEvent>,
    window: Duration,
}

impl RefreshDebouncer {
    pub fn new(rx: mpsc::UnboundedReceiver<BranchEvent>, window: Duration) -> Self {
        Self { rx, window }
    }

    /// Forward events to `out` until the bus is dropped.
    ///
    /// Other events pass through immediately. A pending refresh is flushed
    /// when the bus closes.
    pub async fn run(mut self, out: mpsc::UnboundedSender<BranchEvent>) {
        let mut deadline: Option<Instant> = None;

        loop {
            let pending = deadline;
            let fire = async move {
                match pending {
                    Some(at) => tokio::time::sleep_until(at).await,
                    None => std::future::pending::<()>().await,
                }
            };

            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(BranchEvent::Refresh) => {
                        deadline = Some(Instant::now() + self.window);
                    }
                    Some(other) => {
                        if out.send(other).is_err() {
                            return;
                        }
                    }
                    None => {
                        if deadline.is_some() {
                            let _ = out.send(BranchEvent::Refresh);
                        }
                        return;
                    }
                },
                () = fire => {
                    deadline = None;
                    if out.send(BranchEvent::Refresh).is_err() {
                        return;
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detached_bus_ignores_events() {
        EventBus::detached().emit(BranchEvent::Refresh);
    }

    #[test]
    fn test_closed_listener_is_not_an_error() {
        let (bus, rx) = EventBus::channel();
        drop(rx);
        bus.emit(BranchEvent::ActiveChanged(Some("master-foo".into())));
    }

    #[tokio::test]
    async fn test_refresh_burst_is_coalesced() {
        let (bus, rx) = EventBus::channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(RefreshDebouncer::new(rx, Duration::from_millis(50)).run(out_tx));

        bus.emit(BranchEvent::Refresh);
        bus.emit(BranchEvent::Refresh);
        bus.emit(BranchEvent::OperationFinished {
            operation: "checkout".into(),
            partial: false,
        });
        bus.emit(BranchEvent::Refresh);

        assert!(matches!(
            out_rx.recv().await,
            Some(BranchEvent::OperationFinished { .. })
        ));
        assert_eq!(out_rx.recv().await, Some(BranchEvent::Refresh));

        drop(bus);
        handle.await.unwrap();
        assert_eq!(out_rx.recv().await, None);
    }

    #[tokio::test]
    async fn test_pending_refresh_flushed_on_close() {
        let (bus, rx) = EventBus::channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let handle = tokio::spawn(RefreshDebouncer::new(rx, Duration::from_secs(60)).run(out_tx));

        bus.emit(BranchEvent::Refresh);
        drop(bus);
        handle.await.unwrap();

        assert_eq!(out_rx.recv().await, Some(BranchEvent::Refresh));
        assert_eq!(out_rx.recv().await, None);
    }
}
