//! The session: one identity, one transport, one presence table and the
//! message log, all mutated under a single lock.
//!
//! A driver task feeds transport signals, retry timers and the
//! housekeeping tick into [`SessionCore`]. UI intents arrive through the
//! [`Session`] handle and take the same lock, so every state change is
//! applied atomically.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lanchat_net::{Connector, FileStore, TransportBinding, TransportEvent, TransportSignal};
use lanchat_shared::protocol::{ChatFrame, WireFrame};
use lanchat_shared::{now_millis, ConnectionState, FileHandle, PeerId, Timestamp};
use lanchat_store::KeyValueStore;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::codec::{classify, compose_chat, compose_file, compose_receipt, Inbound};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::events::{EventBus, SessionEvent};
use crate::identity::{IdentityStore, LocalIdentity};
use crate::messages::{ChatMessage, Ingest, MessageLog, UnreadCounts};
use crate::presence::{PeerRecord, PresenceBackend, PresenceTable};
use crate::reconnect::ReconnectPolicy;

/// Floor for the housekeeping interval; `interval_at` rejects zero.
const MIN_TICK: Duration = Duration::from_millis(10);

struct PendingRetry {
    ticket: u64,
    task: JoinHandle<()>,
}

struct SessionCore {
    config: SessionConfig,
    identity: IdentityStore,
    me: LocalIdentity,
    backend: PresenceBackend,
    binding: TransportBinding,
    presence: PresenceTable,
    reconnect: ReconnectPolicy,
    messages: MessageLog,
    state: ConnectionState,
    selected: Option<PeerId>,
    rename_pending: bool,
    retry: Option<PendingRetry>,
    retry_tx: mpsc::UnboundedSender<u64>,
    next_ticket: u64,
    bus: EventBus,
}

impl SessionCore {
    fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected && self.binding.is_open()
    }

    fn set_state(&mut self, state: ConnectionState) {
        if self.state == state {
            return;
        }
        info!(from = %self.state, to = %state, "Connection state changed");
        self.state = state;
        self.bus.emit(SessionEvent::ConnectionStateChanged(state));
    }

    fn send_frame(&self, frame: &WireFrame) -> bool {
        match frame.encode() {
            Ok(text) => {
                debug!(kind = frame.kind(), "Sending frame");
                self.binding.send(&text)
            }
            Err(e) => {
                warn!(kind = frame.kind(), error = %e, "Failed to encode frame");
                false
            }
        }
    }

    fn emit_presence(&self) {
        self.bus
            .emit(SessionEvent::PresenceChanged(self.presence.peers()));
    }

    fn emit_unread(&self) {
        self.bus
            .emit(SessionEvent::UnreadChanged(self.messages.unread_counts()));
    }

    // -- Connection lifecycle --

    fn connect(&mut self) {
        self.cancel_retry();
        self.reconnect.manual_connect();
        // Whatever we knew came from the connection being replaced.
        if self.presence.clear() {
            self.emit_presence();
        }
        self.open_transport();
    }

    fn disconnect(&mut self) {
        self.cancel_retry();
        self.reconnect.manual_disconnect();

        let goodbye = if self.binding.is_open() {
            self.backend
                .departure(&self.me, now_millis())
                .encode()
                .map_err(|e| warn!(error = %e, "Failed to encode departure"))
                .ok()
        } else {
            None
        };
        self.binding.close(goodbye.as_deref());
        self.enter_disconnected();
    }

    fn open_transport(&mut self) {
        self.binding.open();
        self.set_state(ConnectionState::Connecting);
    }

    /// No relay means no presence information, not everyone offline.
    fn enter_disconnected(&mut self) {
        let was_connected = self.state == ConnectionState::Connected;
        self.set_state(ConnectionState::Disconnected);
        if self.presence.clear() || was_connected {
            self.emit_presence();
        }
    }

    fn schedule_retry(&mut self, delay: Duration) {
        self.cancel_retry();
        self.next_ticket += 1;
        let ticket = self.next_ticket;
        let retry_tx = self.retry_tx.clone();
        let task = tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = retry_tx.send(ticket);
        });
        self.retry = Some(PendingRetry { ticket, task });
    }

    fn cancel_retry(&mut self) {
        if let Some(retry) = self.retry.take() {
            debug!(ticket = retry.ticket, "Cancelling pending reconnect");
            retry.task.abort();
        }
    }

    fn on_retry_due(&mut self, ticket: u64) {
        // A ticket from a cancelled or replaced timer.
        if !matches!(&self.retry, Some(retry) if retry.ticket == ticket) {
            return;
        }
        self.retry = None;
        if !self.reconnect.auto_reconnect() {
            return;
        }
        info!(attempt = self.reconnect.attempts(), "Reconnecting");
        self.open_transport();
    }

    fn on_signal(&mut self, signal: TransportSignal) {
        for event in self.binding.handle_signal(signal) {
            match event {
                TransportEvent::Opened => self.on_open(),
                TransportEvent::Frame(text) => self.on_frame(&text),
                TransportEvent::Error(error) => warn!(error = %error, "Transport error"),
                TransportEvent::Closed { reason } => self.on_closed(reason),
            }
        }
    }

    fn on_open(&mut self) {
        self.reconnect.on_open();
        self.set_state(ConnectionState::Connected);

        let now = now_millis();
        self.send_frame(&self.backend.hello(&self.me, now));
        if self.rename_pending {
            self.rename_pending = false;
            self.send_frame(&self.backend.rename(&self.me, now));
        }
    }

    fn on_closed(&mut self, reason: Option<String>) {
        info!(reason = reason.as_deref().unwrap_or("none"), "Transport closed");
        self.enter_disconnected();
        if let Some(delay) = self.reconnect.on_unexpected_close() {
            self.schedule_retry(delay);
        }
    }

    fn on_tick(&mut self, now: Timestamp) {
        if self.is_connected() {
            self.send_frame(&self.backend.refresh(&self.me, now));
        }
        if !self.presence.sweep(now).is_empty() {
            self.emit_presence();
        }
    }

    // -- Inbound --

    fn on_frame(&mut self, text: &str) {
        let frame = match WireFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "Dropping malformed frame");
                return;
            }
        };
        let kind = frame.kind();
        let now = now_millis();

        match classify(frame, &self.me.id) {
            Inbound::PresenceSnapshot(devices) => {
                self.presence.replace_snapshot(&devices, now);
                self.emit_presence();
            }
            Inbound::PresenceBeacon { id, name } => {
                if self.presence.observe(&id, &name, now) {
                    self.emit_presence();
                }
            }
            Inbound::PresenceRename { id, name } => {
                if self.presence.rename_existing(&id, &name, now) {
                    self.emit_presence();
                }
            }
            Inbound::PresenceDeparture(id) => {
                if self.presence.depart(&id) {
                    self.emit_presence();
                }
            }
            Inbound::Chat(chat) => self.on_chat(chat),
            Inbound::ReadReceipt(receipt) => {
                if let Some(message) = self.messages.apply_receipt(&receipt) {
                    debug!(id = %message.id, by = %receipt.sender_id.short(), "Message read");
                    self.bus.emit(SessionEvent::MessageRead(message));
                }
            }
            Inbound::Ignored(reason) => debug!(kind, reason, "Ignoring frame"),
        }
    }

    fn on_chat(&mut self, chat: ChatFrame) {
        if let Ingest::Inserted(message) = self.messages.ingest(chat) {
            debug!(
                id = %message.id,
                from = %message.sender_id.short(),
                directed = !message.is_broadcast(),
                "Message received"
            );
            self.bus.emit(SessionEvent::MessageReceived(message));
            self.emit_unread();
        }
    }

    // -- Intents --

    fn send_text(&mut self, content: &str) -> Result<ChatMessage> {
        let content = content.trim();
        if content.is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let len = content.chars().count();
        if len > self.config.max_message_length {
            return Err(SessionError::MessageTooLong {
                len,
                max: self.config.max_message_length,
            });
        }
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }

        let frame = compose_chat(&self.me, content, self.selected.as_ref(), now_millis());
        self.deliver(frame)
    }

    fn send_file_frame(
        &mut self,
        file_name: &str,
        size: u64,
        handle: FileHandle,
        receiver: Option<&PeerId>,
    ) -> Result<ChatMessage> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        let frame = compose_file(&self.me, file_name, size, handle, receiver, now_millis());
        self.deliver(frame)
    }

    fn deliver(&mut self, frame: ChatFrame) -> Result<ChatMessage> {
        let message = ChatMessage::from(frame.clone());
        if !self.send_frame(&WireFrame::Message(frame)) {
            return Err(SessionError::Dropped);
        }
        self.messages.record_outgoing(message.clone());
        Ok(message)
    }

    fn rename(&mut self, name: &str) -> Result<LocalIdentity> {
        let name = name.trim();
        if name.is_empty() {
            return Err(SessionError::EmptyName);
        }
        self.me = self.identity.rename(name);
        info!(name = %self.me.name, "Display name changed");

        if self.is_connected() {
            self.send_frame(&self.backend.rename(&self.me, now_millis()));
        } else {
            self.rename_pending = true;
        }
        Ok(self.me.clone())
    }

    fn refresh_devices(&mut self) -> Result<()> {
        if !self.is_connected() {
            return Err(SessionError::NotConnected);
        }
        if !self.send_frame(&self.backend.refresh(&self.me, now_millis())) {
            return Err(SessionError::Dropped);
        }
        Ok(())
    }

    /// Mark the selected conversation read and send receipts for the
    /// directed messages in it.
    fn mark_read(&mut self) -> usize {
        let now = now_millis();
        let read = self.messages.mark_read(self.selected.as_ref(), now);
        if read.is_empty() {
            return 0;
        }

        let connected = self.is_connected();
        for message in &read {
            if connected && !message.is_broadcast() {
                let receipt = compose_receipt(&self.me.id, &message.id, &message.sender_id, now);
                self.send_frame(&WireFrame::ReadReceipt(receipt));
            }
            self.bus.emit(SessionEvent::MessageRead(message.clone()));
        }
        self.emit_unread();
        read.len()
    }

    fn select_peer(&mut self, peer: Option<PeerId>) -> Vec<ChatMessage> {
        self.selected = peer;
        self.mark_read();
        self.messages.conversation(self.selected.as_ref())
    }
}

/// Aborts the driver once the last [`Session`] handle is gone.
struct DriverGuard(JoinHandle<()>);

impl Drop for DriverGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Cheap, cloneable handle to a running session.
#[derive(Clone)]
pub struct Session {
    core: Arc<Mutex<SessionCore>>,
    bus: EventBus,
    files: Arc<dyn FileStore>,
    _driver: Arc<DriverGuard>,
}

impl Session {
    /// Load the identity, spawn the driver task and, when configured,
    /// open the transport.
    ///
    /// Must be called from within a tokio runtime, as must the methods
    /// that open the transport.
    pub fn start(
        config: SessionConfig,
        connector: Arc<dyn Connector>,
        files: Arc<dyn FileStore>,
        store: Box<dyn KeyValueStore>,
    ) -> Self {
        let mut identity = IdentityStore::new(store);
        let me = identity.load();
        let backend = PresenceBackend::from(config.backend);
        let period = backend.tick_interval(&config);
        if period < MIN_TICK {
            warn!(?period, min = ?MIN_TICK, "Housekeeping interval too short, clamping");
        }
        let period = period.max(MIN_TICK);

        let (binding, signal_rx) = TransportBinding::new(connector);
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let bus = EventBus::new();

        info!(
            id = %me.id.short(),
            name = %me.name,
            backend = ?backend,
            "Starting session"
        );

        let auto_connect = config.auto_connect;
        let core = SessionCore {
            presence: PresenceTable::new(me.id.clone(), config.staleness_millis()),
            reconnect: ReconnectPolicy::new(config.reconnect.clone()),
            messages: MessageLog::new(me.id.clone()),
            config,
            identity,
            me,
            backend,
            binding,
            state: ConnectionState::Disconnected,
            selected: None,
            rename_pending: false,
            retry: None,
            retry_tx,
            next_ticket: 0,
            bus: bus.clone(),
        };
        let core = Arc::new(Mutex::new(core));

        let driver = tokio::spawn(drive(core.clone(), signal_rx, retry_rx, period));

        let session = Self {
            core,
            bus,
            files,
            _driver: Arc::new(DriverGuard(driver)),
        };
        if auto_connect {
            session.connect();
        }
        session
    }

    fn lock(&self) -> MutexGuard<'_, SessionCore> {
        lock_core(&self.core)
    }

    /// Open the transport, re-enabling automatic reconnection.
    pub fn connect(&self) {
        self.lock().connect();
    }

    /// Say goodbye, close the transport and stop reconnecting until the
    /// next [`connect`](Self::connect).
    pub fn disconnect(&self) {
        self.lock().disconnect();
    }

    /// Send text to the selected conversation.
    pub fn send_text(&self, content: &str) -> Result<ChatMessage> {
        self.lock().send_text(content)
    }

    /// Upload `data`, then announce it to the selected conversation.
    ///
    /// Nothing is sent when the size check or the upload fails.
    pub async fn send_file(&self, file_name: &str, data: Vec<u8>) -> Result<ChatMessage> {
        let size = data.len() as u64;
        let receiver = {
            let core = self.lock();
            if size > core.config.max_file_size {
                return Err(SessionError::FileTooLarge {
                    size,
                    max: core.config.max_file_size,
                });
            }
            if !core.is_connected() {
                return Err(SessionError::NotConnected);
            }
            core.selected.clone()
        };

        let handle = self
            .files
            .upload(file_name, data)
            .await
            .map_err(SessionError::Upload)?;

        self.lock()
            .send_file_frame(file_name, size, handle, receiver.as_ref())
    }

    pub async fn download(&self, handle: &FileHandle) -> Result<Vec<u8>> {
        self.files
            .download(handle)
            .await
            .map_err(SessionError::Download)
    }

    /// Persist a new display name and announce it, now or on next connect.
    pub fn rename(&self, name: &str) -> Result<LocalIdentity> {
        self.lock().rename(name)
    }

    pub fn refresh_devices(&self) -> Result<()> {
        self.lock().refresh_devices()
    }

    /// Switch conversation (`None` is the broadcast room), marking it read.
    /// Returns the messages visible in it.
    pub fn select_peer(&self, peer: Option<PeerId>) -> Vec<ChatMessage> {
        self.lock().select_peer(peer)
    }

    /// Mark the selected conversation read. Returns how many messages changed.
    pub fn mark_read(&self) -> usize {
        self.lock().mark_read()
    }

    pub fn selected_peer(&self) -> Option<PeerId> {
        self.lock().selected.clone()
    }

    pub fn conversation(&self, peer: Option<&PeerId>) -> Vec<ChatMessage> {
        self.lock().messages.conversation(peer)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages.all().to_vec()
    }

    pub fn unread_counts(&self) -> UnreadCounts {
        self.lock().messages.unread_counts()
    }

    pub fn local_user(&self) -> LocalIdentity {
        self.lock().me.clone()
    }

    /// Peers currently considered online.
    pub fn online_devices(&self) -> Vec<PeerRecord> {
        self.lock().presence.online(now_millis())
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.lock().state
    }

    /// Whether an automatic reconnect is scheduled.
    pub fn retry_pending(&self) -> bool {
        self.lock().retry.is_some()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.bus.subscribe()
    }

    pub fn on_message(&self, handler: impl Fn(ChatMessage) + Send + 'static) -> JoinHandle<()> {
        self.bus.listen(
            |event| match event {
                SessionEvent::MessageReceived(message) => Some(message),
                _ => None,
            },
            handler,
        )
    }

    pub fn on_device_update(
        &self,
        handler: impl Fn(Vec<PeerRecord>) + Send + 'static,
    ) -> JoinHandle<()> {
        self.bus.listen(
            |event| match event {
                SessionEvent::PresenceChanged(peers) => Some(peers),
                _ => None,
            },
            handler,
        )
    }

    pub fn on_connection_state_change(
        &self,
        handler: impl Fn(ConnectionState) + Send + 'static,
    ) -> JoinHandle<()> {
        self.bus.listen(
            |event| match event {
                SessionEvent::ConnectionStateChanged(state) => Some(state),
                _ => None,
            },
            handler,
        )
    }
}

fn lock_core(core: &Mutex<SessionCore>) -> MutexGuard<'_, SessionCore> {
    // A panic while holding the lock leaves plain data behind; keep going.
    core.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

async fn drive(
    core: Arc<Mutex<SessionCore>>,
    mut signals: mpsc::UnboundedReceiver<TransportSignal>,
    mut retries: mpsc::UnboundedReceiver<u64>,
    period: Duration,
) {
    let mut tick = tokio::time::interval_at(Instant::now() + period, period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            Some(signal) = signals.recv() => lock_core(&core).on_signal(signal),
            Some(ticket) = retries.recv() => lock_core(&core).on_retry_due(ticket),
            _ = tick.tick() => lock_core(&core).on_tick(now_millis()),
        }
    }
}
