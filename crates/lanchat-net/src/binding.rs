//! Transport binding: owns at most one live connection.
//!
//! Connection attempts and inbound pumping run in a background tokio task.
//! That task never touches the binding directly; it reports through
//! [`TransportSignal`]s which the owner feeds back into
//! [`TransportBinding::handle_signal`]. Every attempt carries a generation
//! number so signals from a superseded connection are discarded.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::link::{Connector, Link, LinkEvent};

/// Raw output of the background connection task.
#[derive(Debug)]
pub enum TransportSignal {
    Connected {
        generation: u64,
        outbound: mpsc::Sender<String>,
    },
    ConnectFailed {
        generation: u64,
        error: String,
    },
    Frame {
        generation: u64,
        text: String,
    },
    LinkError {
        generation: u64,
        error: String,
    },
    Closed {
        generation: u64,
        reason: Option<String>,
    },
}

impl TransportSignal {
    fn generation(&self) -> u64 {
        match self {
            TransportSignal::Connected { generation, .. }
            | TransportSignal::ConnectFailed { generation, .. }
            | TransportSignal::Frame { generation, .. }
            | TransportSignal::LinkError { generation, .. }
            | TransportSignal::Closed { generation, .. } => *generation,
        }
    }
}

/// Events surfaced to observers of the binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Frame(String),
    Error(String),
    Closed { reason: Option<String> },
}

type Observer = Box<dyn Fn(&TransportEvent) + Send>;

pub struct TransportBinding {
    connector: Arc<dyn Connector>,
    signal_tx: mpsc::UnboundedSender<TransportSignal>,
    generation: u64,
    task: Option<JoinHandle<()>>,
    outbound: Option<mpsc::Sender<String>>,
    observers: Vec<Observer>,
}

impl TransportBinding {
    /// Create a binding and the receiver its background tasks report into.
    pub fn new(
        connector: Arc<dyn Connector>,
    ) -> (Self, mpsc::UnboundedReceiver<TransportSignal>) {
        let (signal_tx, signal_rx) = mpsc::unbounded_channel();
        let binding = Self {
            connector,
            signal_tx,
            generation: 0,
            task: None,
            outbound: None,
            observers: Vec::new(),
        };
        (binding, signal_rx)
    }

    /// Start a new connection attempt, tearing down any previous one first.
    ///
    /// Must be called from within a tokio runtime.
    pub fn open(&mut self) {
        self.teardown();
        self.generation += 1;

        let generation = self.generation;
        let connector = self.connector.clone();
        let signal_tx = self.signal_tx.clone();

        info!(
            generation,
            target = %connector.describe(),
            "Opening transport"
        );

        self.task = Some(tokio::spawn(async move {
            run_connection(generation, connector, signal_tx).await;
        }));
    }

    /// Close the current connection, if any.
    ///
    /// When `goodbye` is given and the link is open, it is queued ahead of
    /// the shutdown so the remote side learns about the departure. Closing
    /// an already-closed binding is a no-op.
    pub fn close(&mut self, goodbye: Option<&str>) {
        if let (Some(frame), Some(outbound)) = (goodbye, self.outbound.as_ref()) {
            if let Err(e) = outbound.try_send(frame.to_string()) {
                debug!(error = %e, "Goodbye frame not delivered");
            }
        }
        if self.task.is_some() || self.outbound.is_some() {
            info!(generation = self.generation, "Closing transport");
        }
        self.teardown();
        // Anything still in flight from this connection is now stale.
        self.generation += 1;
    }

    /// Whether a connection is established and accepting frames.
    pub fn is_open(&self) -> bool {
        self.outbound
            .as_ref()
            .map(|tx| !tx.is_closed())
            .unwrap_or(false)
    }

    /// Whether an attempt is in progress or a connection is live.
    pub fn is_active(&self) -> bool {
        self.task.is_some() || self.outbound.is_some()
    }

    /// Queue one frame. Returns `false`, after logging, when the frame was
    /// dropped because the connection is not open or its queue is full.
    pub fn send(&self, frame: &str) -> bool {
        let Some(outbound) = self.outbound.as_ref() else {
            warn!("Transport not open, dropping frame");
            return false;
        };
        match outbound.try_send(frame.to_string()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("Transport queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                warn!("Transport closed, dropping frame");
                false
            }
        }
    }

    /// Apply a signal from the background task, returning the resulting
    /// events. Every returned event has already been fanned out to the
    /// registered observers.
    pub fn handle_signal(&mut self, signal: TransportSignal) -> Vec<TransportEvent> {
        if signal.generation() != self.generation {
            debug!(
                signal_generation = signal.generation(),
                current = self.generation,
                "Discarding stale transport signal"
            );
            return Vec::new();
        }

        let events = match signal {
            TransportSignal::Connected { outbound, .. } => {
                self.outbound = Some(outbound);
                vec![TransportEvent::Opened]
            }
            TransportSignal::ConnectFailed { error, .. } => {
                self.task = None;
                self.outbound = None;
                vec![
                    TransportEvent::Error(error.clone()),
                    TransportEvent::Closed {
                        reason: Some(error),
                    },
                ]
            }
            TransportSignal::Frame { text, .. } => vec![TransportEvent::Frame(text)],
            TransportSignal::LinkError { error, .. } => vec![TransportEvent::Error(error)],
            TransportSignal::Closed { reason, .. } => {
                self.task = None;
                self.outbound = None;
                vec![TransportEvent::Closed { reason }]
            }
        };

        for event in &events {
            for observer in &self.observers {
                observer(event);
            }
        }
        events
    }

    /// Register an observer for every transport event.
    pub fn on_event(&mut self, observer: impl Fn(&TransportEvent) + Send + 'static) {
        self.observers.push(Box::new(observer));
    }

    pub fn on_frame(&mut self, handler: impl Fn(&str) + Send + 'static) {
        self.on_event(move |event| {
            if let TransportEvent::Frame(text) = event {
                handler(text);
            }
        });
    }

    pub fn on_open(&mut self, handler: impl Fn() + Send + 'static) {
        self.on_event(move |event| {
            if matches!(event, TransportEvent::Opened) {
                handler();
            }
        });
    }

    pub fn on_close(&mut self, handler: impl Fn(Option<&str>) + Send + 'static) {
        self.on_event(move |event| {
            if let TransportEvent::Closed { reason } = event {
                handler(reason.as_deref());
            }
        });
    }

    pub fn on_error(&mut self, handler: impl Fn(&str) + Send + 'static) {
        self.on_event(move |event| {
            if let TransportEvent::Error(error) = event {
                handler(error);
            }
        });
    }

    fn teardown(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
        // Dropping the sender lets the connector flush and close.
        self.outbound = None;
    }
}

impl Drop for TransportBinding {
    fn drop(&mut self) {
        self.teardown();
    }
}

async fn run_connection(
    generation: u64,
    connector: Arc<dyn Connector>,
    signal_tx: mpsc::UnboundedSender<TransportSignal>,
) {
    let Link {
        outbound,
        mut inbound,
    } = match connector.connect().await {
        Ok(link) => link,
        Err(e) => {
            warn!(generation, error = %e, "Transport connect failed");
            let _ = signal_tx.send(TransportSignal::ConnectFailed {
                generation,
                error: e.to_string(),
            });
            return;
        }
    };

    if signal_tx
        .send(TransportSignal::Connected {
            generation,
            outbound,
        })
        .is_err()
    {
        return;
    }

    let mut reason = None;
    while let Some(event) = inbound.recv().await {
        let signal = match event {
            LinkEvent::Frame(text) => TransportSignal::Frame { generation, text },
            LinkEvent::Error(error) => TransportSignal::LinkError { generation, error },
            LinkEvent::Closed(r) => {
                reason = r;
                break;
            }
        };
        if signal_tx.send(signal).is_err() {
            return;
        }
    }

    debug!(generation, reason = ?reason, "Transport link ended");
    let _ = signal_tx.send(TransportSignal::Closed { generation, reason });
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::loopback::LoopbackRelay;

    async fn next_events(
        binding: &mut TransportBinding,
        rx: &mut mpsc::UnboundedReceiver<TransportSignal>,
    ) -> Vec<TransportEvent> {
        loop {
            let signal = rx.recv().await.expect("signal channel open");
            let events = binding.handle_signal(signal);
            if !events.is_empty() {
                return events;
            }
        }
    }

    #[tokio::test]
    async fn test_send_before_open_is_dropped() {
        let (relay, _accepted) = LoopbackRelay::new();
        let (binding, _rx) = TransportBinding::new(Arc::new(relay));
        assert!(!binding.is_open());
        assert!(!binding.send("{}"));
    }

    #[tokio::test]
    async fn test_open_send_and_receive() {
        let (relay, mut accepted) = LoopbackRelay::new();
        let (mut binding, mut rx) = TransportBinding::new(Arc::new(relay));

        binding.open();
        let mut remote = accepted.recv().await.unwrap();
        assert_eq!(next_events(&mut binding, &mut rx).await, vec![TransportEvent::Opened]);
        assert!(binding.is_open());

        assert!(binding.send("ping"));
        assert_eq!(remote.next_text().await.as_deref(), Some("ping"));

        remote.push_text("pong").await;
        assert_eq!(
            next_events(&mut binding, &mut rx).await,
            vec![TransportEvent::Frame("pong".into())]
        );
    }

    #[tokio::test]
    async fn test_observers_fan_out() {
        let (relay, mut accepted) = LoopbackRelay::new();
        let (mut binding, mut rx) = TransportBinding::new(Arc::new(relay));

        let opened = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let opened = opened.clone();
            binding.on_open(move || {
                opened.fetch_add(1, Ordering::SeqCst);
            });
        }
        let frames = Arc::new(AtomicUsize::new(0));
        let f = frames.clone();
        binding.on_frame(move |_| {
            f.fetch_add(1, Ordering::SeqCst);
        });

        binding.open();
        let remote = accepted.recv().await.unwrap();
        next_events(&mut binding, &mut rx).await;
        remote.push_text("x").await;
        next_events(&mut binding, &mut rx).await;

        assert_eq!(opened.load(Ordering::SeqCst), 2);
        assert_eq!(frames.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_remote_close_is_reported() {
        let (relay, mut accepted) = LoopbackRelay::new();
        let (mut binding, mut rx) = TransportBinding::new(Arc::new(relay));

        let closed = Arc::new(AtomicUsize::new(0));
        let c = closed.clone();
        binding.on_close(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        binding.open();
        let remote = accepted.recv().await.unwrap();
        next_events(&mut binding, &mut rx).await;

        remote.close(Some("bye")).await;
        assert_eq!(
            next_events(&mut binding, &mut rx).await,
            vec![TransportEvent::Closed {
                reason: Some("bye".into())
            }]
        );
        assert!(!binding.is_open());
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_connect_failure_reports_error_then_close() {
        let (relay, _accepted) = LoopbackRelay::new();
        relay.set_reachable(false);
        let (mut binding, mut rx) = TransportBinding::new(Arc::new(relay));

        binding.open();
        let events = next_events(&mut binding, &mut rx).await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], TransportEvent::Error(_)));
        assert!(matches!(events[1], TransportEvent::Closed { .. }));
        assert!(!binding.is_active());
    }

    #[tokio::test]
    async fn test_error_observers_see_connect_failure() {
        let (relay, _accepted) = LoopbackRelay::new();
        relay.set_reachable(false);
        let (mut binding, mut rx) = TransportBinding::new(Arc::new(relay));

        let errors = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = errors.clone();
        binding.on_error(move |error| seen.lock().unwrap().push(error.to_string()));
        let closes = Arc::new(AtomicUsize::new(0));
        let c = closes.clone();
        binding.on_close(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        binding.open();
        next_events(&mut binding, &mut rx).await;

        let errors = errors.lock().unwrap();
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("unreachable"), "{}", errors[0]);
        assert_eq!(closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_close_sends_goodbye_and_is_idempotent() {
        let (relay, mut accepted) = LoopbackRelay::new();
        let (mut binding, mut rx) = TransportBinding::new(Arc::new(relay));

        binding.open();
        let mut remote = accepted.recv().await.unwrap();
        next_events(&mut binding, &mut rx).await;

        binding.close(Some("goodbye"));
        binding.close(Some("again"));
        assert!(!binding.is_open());
        assert_eq!(remote.next_text().await.as_deref(), Some("goodbye"));
        assert_eq!(remote.next_text().await, None);
    }

    #[tokio::test]
    async fn test_reopen_discards_previous_connection() {
        let (relay, mut accepted) = LoopbackRelay::new();
        let (mut binding, mut rx) = TransportBinding::new(Arc::new(relay));

        binding.open();
        let first = accepted.recv().await.unwrap();
        binding.open();
        let second = accepted.recv().await.unwrap();

        // Only the second attempt may surface as opened.
        assert_eq!(next_events(&mut binding, &mut rx).await, vec![TransportEvent::Opened]);
        first.push_text("late").await;
        second.push_text("fresh").await;
        assert_eq!(
            next_events(&mut binding, &mut rx).await,
            vec![TransportEvent::Frame("fresh".into())]
        );
    }
}
