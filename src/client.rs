//! Async client for the pizza kitchen game protocol.
//!
//! [`KitchenClient`] is a thin handle that communicates with a background
//! transport loop task via an unbounded MPSC channel. Events are emitted on a
//! bounded channel ([`tokio::sync::mpsc::Receiver<KitchenEvent>`]) returned
//! from [`KitchenClient::start`].
//!
//! The loop owns the whole inbound pipeline: decode → state store apply →
//! optimistic reconciliation → view selection → presentation notification.
//! It reconnects automatically with capped exponential backoff and rejoins
//! the persisted room on every (re)connect, never assuming the server kept
//! session affinity — the rejoin always yields a fresh full snapshot.
//!
//! # Example
//!
//! ```rust,ignore
//! let connector = WebSocketConnector::new("ws://localhost:5000/game");
//! let config = KitchenConfig::new()
//!     .with_room_store(Arc::new(FileRoomStore::new(state_dir.join("room"))));
//! let (client, mut events) = KitchenClient::start(connector, config);
//!
//! client.join_room("kitchen-7")?;
//!
//! while let Some(event) = events.recv().await {
//!     match event {
//!         KitchenEvent::StateChanged => { /* re-render from client.local_view() */ }
//!         KitchenEvent::Disconnected { .. } => break,
//!         _ => {}
//!     }
//! }
//! ```

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, error, warn};

use crate::error::{KitchenError, Result};
use crate::event::KitchenEvent;
use crate::moderation::ProfanityChecker;
use crate::optimistic::OptimisticTracker;
use crate::protocol::{
    ClientMessage, GameState, Ingredient, IngredientType, OvenSwitch, PlayerId, ServerMessage,
};
use crate::session::{ConnectionState, MemoryRoomStore, RoomStore};
use crate::state::{Listener, StateStore};
use crate::transport::{Connector, Transport};
use crate::view::{debrief_overlay, ViewSelector};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default first reconnect delay; doubles up to the max per failed attempt.
const DEFAULT_RECONNECT_INITIAL_DELAY: Duration = Duration::from_millis(500);

/// Default cap on the reconnect backoff.
const DEFAULT_RECONNECT_MAX_DELAY: Duration = Duration::from_secs(30);

/// Default elapsed-time poll cadence.
const DEFAULT_TIME_SYNC_INTERVAL: Duration = Duration::from_secs(1);

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`KitchenClient`].
///
/// All fields have sensible defaults; the room store defaults to an
/// in-memory one, so pass a [`FileRoomStore`](crate::session::FileRoomStore)
/// when the room should survive process restart.
///
/// # Example
///
/// ```
/// use pizza_kitchen_client::client::KitchenConfig;
/// use std::time::Duration;
///
/// let config = KitchenConfig::new()
///     .with_event_channel_capacity(512)
///     .with_shutdown_timeout(Duration::from_secs(5));
/// assert_eq!(config.event_channel_capacity, 512);
/// ```
#[derive(Clone)]
pub struct KitchenConfig {
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer cannot keep up with incoming server messages, events
    /// are dropped (with a warning logged) to avoid blocking the transport
    /// loop. The `Disconnected` event is always delivered regardless of
    /// capacity.
    ///
    /// Defaults to **256**. Values below 1 are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown.
    ///
    /// When [`KitchenClient::shutdown`] is called, the background transport
    /// loop is given this much time to close the transport and emit a final
    /// `Disconnected` event. If the timeout expires the task is aborted.
    pub shutdown_timeout: Duration,
    /// Delay before the first reconnect attempt; doubles per failed attempt.
    pub reconnect_initial_delay: Duration,
    /// Upper bound on the reconnect backoff.
    pub reconnect_max_delay: Duration,
    /// How often `time_request` is emitted while connected.
    pub time_sync_interval: Duration,
    /// Durable storage for the last-joined room name.
    pub room_store: Arc<dyn RoomStore>,
}

impl KitchenConfig {
    /// Create a configuration with default values and an in-memory room store.
    pub fn new() -> Self {
        Self {
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            reconnect_initial_delay: DEFAULT_RECONNECT_INITIAL_DELAY,
            reconnect_max_delay: DEFAULT_RECONNECT_MAX_DELAY,
            time_sync_interval: DEFAULT_TIME_SYNC_INTERVAL,
            room_store: Arc::new(MemoryRoomStore::new()),
        }
    }

    /// Set the capacity of the bounded event channel (clamped to ≥ 1).
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the initial reconnect delay.
    #[must_use]
    pub fn with_reconnect_initial_delay(mut self, delay: Duration) -> Self {
        self.reconnect_initial_delay = delay;
        self
    }

    /// Set the reconnect backoff cap.
    #[must_use]
    pub fn with_reconnect_max_delay(mut self, delay: Duration) -> Self {
        self.reconnect_max_delay = delay;
        self
    }

    /// Set the elapsed-time poll cadence.
    #[must_use]
    pub fn with_time_sync_interval(mut self, interval: Duration) -> Self {
        self.time_sync_interval = interval;
        self
    }

    /// Set the durable room store.
    #[must_use]
    pub fn with_room_store(mut self, store: Arc<dyn RoomStore>) -> Self {
        self.room_store = store;
        self
    }
}

impl Default for KitchenConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for KitchenConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KitchenConfig")
            .field("event_channel_capacity", &self.event_channel_capacity)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .field("reconnect_initial_delay", &self.reconnect_initial_delay)
            .field("reconnect_max_delay", &self.reconnect_max_delay)
            .field("time_sync_interval", &self.time_sync_interval)
            .finish_non_exhaustive()
    }
}

// ── Shared state ────────────────────────────────────────────────────

/// Internal shared state between the client handle and the transport loop.
struct ClientShared {
    connection: AtomicU8,
    store: Mutex<StateStore>,
    tracker: Mutex<OptimisticTracker>,
    selector: Mutex<ViewSelector>,
    room_store: Arc<dyn RoomStore>,
}

const CONN_CONNECTING: u8 = 0;
const CONN_CONNECTED: u8 = 1;
const CONN_DISCONNECTED: u8 = 2;
const CONN_RECONNECTING: u8 = 3;

impl ClientShared {
    fn new(room_store: Arc<dyn RoomStore>) -> Self {
        Self {
            connection: AtomicU8::new(CONN_CONNECTING),
            store: Mutex::new(StateStore::new()),
            tracker: Mutex::new(OptimisticTracker::new()),
            selector: Mutex::new(ViewSelector::new()),
            room_store,
        }
    }

    fn set_connection(&self, state: ConnectionState) {
        let raw = match state {
            ConnectionState::Connecting => CONN_CONNECTING,
            ConnectionState::Connected => CONN_CONNECTED,
            ConnectionState::Disconnected => CONN_DISCONNECTED,
            ConnectionState::Reconnecting => CONN_RECONNECTING,
        };
        self.connection.store(raw, Ordering::Release);
    }

    fn connection(&self) -> ConnectionState {
        match self.connection.load(Ordering::Acquire) {
            CONN_CONNECTED => ConnectionState::Connected,
            CONN_DISCONNECTED => ConnectionState::Disconnected,
            CONN_RECONNECTING => ConnectionState::Reconnecting,
            _ => ConnectionState::Connecting,
        }
    }
}

// ── Client handle ───────────────────────────────────────────────────

/// Async client handle for the pizza kitchen game protocol.
///
/// Created via [`KitchenClient::start`], which spawns a background transport
/// loop and returns this handle together with an event receiver.
///
/// Outbound methods serialize a [`ClientMessage`] and queue it to the
/// transport loop; they return immediately once the message is queued (no
/// round-trip await). Optimistic methods additionally record a pending entry
/// that renders as a provisional overlay until the server confirms.
pub struct KitchenClient {
    /// Sender half of the command channel to the transport loop.
    cmd_tx: mpsc::UnboundedSender<ClientMessage>,
    /// Shared state updated by the transport loop.
    shared: Arc<ClientShared>,
    /// Handle to the background transport loop task.
    task: Option<tokio::task::JoinHandle<()>>,
    /// Oneshot sender to signal the transport loop to shut down gracefully.
    shutdown_tx: Option<oneshot::Sender<()>>,
    /// Timeout for the graceful shutdown.
    shutdown_timeout: Duration,
}

impl KitchenClient {
    /// Start the client transport loop and return a handle plus event
    /// receiver.
    ///
    /// The loop connects through `connector` immediately and keeps
    /// reconnecting with backoff for the lifetime of the client. On every
    /// successful (re)connect it either rejoins the persisted room or asks
    /// the presentation layer to open the room picker.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(
        connector: impl Connector,
        config: KitchenConfig,
    ) -> (Self, mpsc::Receiver<KitchenEvent>) {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel::<ClientMessage>();
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<KitchenEvent>(capacity);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

        let shared = Arc::new(ClientShared::new(Arc::clone(&config.room_store)));
        let loop_shared = Arc::clone(&shared);
        let shutdown_timeout = config.shutdown_timeout;

        let task = tokio::spawn(run_loop(
            connector,
            cmd_rx,
            event_tx,
            loop_shared,
            shutdown_rx,
            config,
        ));

        let client = Self {
            cmd_tx,
            shared,
            task: Some(task),
            shutdown_tx: Some(shutdown_tx),
            shutdown_timeout,
        };

        (client, event_rx)
    }

    // ── Room lifecycle ──────────────────────────────────────────────

    /// Join a room, persisting it as the rejoin target for future
    /// (re)connects.
    ///
    /// # Errors
    ///
    /// Returns [`KitchenError::NotConnected`] if the transport is down, or a
    /// storage error if the room could not be persisted.
    pub fn join_room(&self, room: &str) -> Result<()> {
        self.shared.room_store.save(room)?;
        self.send(ClientMessage::Join { room: room.into() })
    }

    /// Screen a user-submitted room name through the advisory profanity
    /// checker, then join it. The check fails open; an unreachable checker
    /// never blocks the join.
    ///
    /// # Errors
    ///
    /// Returns [`KitchenError::RoomNameRejected`] for empty or flagged names,
    /// otherwise any error [`join_room`](Self::join_room) can return.
    pub async fn submit_room_name(
        &self,
        name: &str,
        checker: &dyn ProfanityChecker,
    ) -> Result<()> {
        let room = crate::moderation::screen_room_name(name, checker).await?;
        self.join_room(&room)
    }

    /// Leave the current room: clears the persisted room and all local state.
    /// The next reconnect (or an explicit [`request_room_list`]
    /// (Self::request_room_list)) starts from room selection.
    ///
    /// # Errors
    ///
    /// Returns a storage error if the persisted room could not be cleared.
    pub async fn leave_room(&self) -> Result<()> {
        self.shared.room_store.clear()?;
        self.shared.store.lock().await.reset();
        self.shared.tracker.lock().await.clear();
        self.shared.selector.lock().await.reset();
        Ok(())
    }

    /// Ask for the room directory listing.
    ///
    /// # Errors
    ///
    /// Returns [`KitchenError::NotConnected`] if the transport is down.
    pub fn request_room_list(&self) -> Result<()> {
        self.send(ClientMessage::RequestRoomList)
    }

    // ── Game actions ────────────────────────────────────────────────

    /// Start the next round.
    ///
    /// # Errors
    ///
    /// Returns [`KitchenError::NotConnected`] if the transport is down.
    pub fn start_round(&self) -> Result<()> {
        self.send(ClientMessage::StartRound)
    }

    /// Prepare a new ingredient into the shared pool.
    ///
    /// # Errors
    ///
    /// Returns [`KitchenError::NotConnected`] if the transport is down.
    pub fn prepare_ingredient(&self, kind: IngredientType) -> Result<()> {
        self.send(ClientMessage::PrepareIngredient {
            ingredient_type: kind,
        })
    }

    /// Take an ingredient from the pool, optimistically. Without a target the
    /// ingredient heads for the local solo builder; with one it heads for
    /// that player's shared builder (which is only updated on confirmation).
    ///
    /// Returns the local id of the pending entry.
    ///
    /// # Errors
    ///
    /// Returns [`KitchenError::NotConnected`] if the transport is down.
    pub async fn take_ingredient(
        &self,
        ingredient: Ingredient,
        target_sid: Option<PlayerId>,
    ) -> Result<u64> {
        self.send(ClientMessage::TakeIngredient {
            ingredient_id: ingredient.id.clone(),
            target_sid: target_sid.clone(),
        })?;
        let local_id = self
            .shared
            .tracker
            .lock()
            .await
            .record_take(ingredient, target_sid);
        Ok(local_id)
    }

    /// Submit a pizza from the locally staged (optimistic) builder contents.
    ///
    /// Returns the local id of the pending build.
    ///
    /// # Errors
    ///
    /// Returns [`KitchenError::EmptyBuilder`] when nothing is staged, or
    /// [`KitchenError::NotConnected`] if the transport is down.
    pub async fn build_pizza(&self) -> Result<u64> {
        let mut tracker = self.shared.tracker.lock().await;
        let ingredients = tracker.local_builder();
        if ingredients.is_empty() {
            return Err(KitchenError::EmptyBuilder);
        }
        self.send(ClientMessage::BuildPizza {
            ingredients: Some(ingredients.clone()),
            player_sid: None,
        })?;
        Ok(tracker.record_build(ingredients))
    }

    /// Submit the named player's shared builder as a pizza (rounds 2+).
    /// Shared builders are server-owned, so no optimistic entry is recorded.
    ///
    /// # Errors
    ///
    /// Returns [`KitchenError::NotConnected`] if the transport is down.
    pub fn build_shared_pizza(&self, player_sid: PlayerId) -> Result<()> {
        self.send(ClientMessage::BuildPizza {
            ingredients: None,
            player_sid: Some(player_sid),
        })
    }

    /// Move a built pizza toward the oven, optimistically. The server rejects
    /// the move when the oven is at its WIP limit, which rolls the entry back.
    ///
    /// Returns the local id of the pending entry.
    ///
    /// # Errors
    ///
    /// Returns [`KitchenError::NotConnected`] if the transport is down.
    pub async fn move_to_oven(&self, pizza_id: &str) -> Result<u64> {
        self.send(ClientMessage::MoveToOven {
            pizza_id: pizza_id.into(),
        })?;
        Ok(self
            .shared
            .tracker
            .lock()
            .await
            .record_move_to_oven(pizza_id))
    }

    /// Turn the oven on or off.
    ///
    /// # Errors
    ///
    /// Returns [`KitchenError::NotConnected`] if the transport is down.
    pub fn toggle_oven(&self, state: OvenSwitch) -> Result<()> {
        self.send(ClientMessage::ToggleOven { state })
    }

    // ── State accessors ─────────────────────────────────────────────

    /// The current transport session state.
    pub fn connection_state(&self) -> ConnectionState {
        self.shared.connection()
    }

    /// Returns `true` if the transport is believed to be connected.
    pub fn is_connected(&self) -> bool {
        self.connection_state() == ConnectionState::Connected
    }

    /// The persisted room name, if any.
    pub fn persisted_room(&self) -> Option<String> {
        self.shared.room_store.load()
    }

    /// Clone of the authoritative state, or `None` before the first snapshot.
    pub async fn state(&self) -> Option<GameState> {
        self.shared.store.lock().await.current().cloned()
    }

    /// The authoritative state with the provisional optimistic overlay
    /// applied — what the presentation layer should render.
    pub async fn local_view(&self) -> Option<GameState> {
        let store = self.shared.store.lock().await;
        let state = store.current()?;
        Some(self.shared.tracker.lock().await.overlay(state))
    }

    /// Provisional contents of the local solo builder.
    pub async fn local_builder(&self) -> Vec<Ingredient> {
        self.shared.tracker.lock().await.local_builder()
    }

    /// Number of unreconciled optimistic actions.
    pub async fn pending_actions(&self) -> usize {
        self.shared.tracker.lock().await.pending().len()
    }

    /// Register a state-change listener, invoked synchronously in
    /// subscription order after each successful apply.
    pub async fn subscribe(&self, listener: Listener) {
        self.shared.store.lock().await.subscribe(listener);
    }

    // ── Shutdown ────────────────────────────────────────────────────

    /// Shut down the client, closing the transport and stopping the
    /// background task.
    ///
    /// After calling this method, the event receiver will yield `None` once
    /// the transport loop exits.
    pub async fn shutdown(&mut self) {
        debug!("KitchenClient: shutdown requested");

        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        // Await the transport loop with a timeout. If it doesn't exit in
        // time, abort it so the task cannot detach and run indefinitely.
        if let Some(mut task) = self.task.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => {
                    warn!("transport loop terminated with join error: {join_err}");
                }
                Err(_) => {
                    warn!("transport loop did not exit within timeout; aborting task");
                    task.abort();
                    if let Err(join_err) = task.await {
                        debug!("transport loop aborted: {join_err}");
                    }
                }
            }
        }

        self.shared.set_connection(ConnectionState::Disconnected);
    }

    // ── Internal helpers ────────────────────────────────────────────

    /// Queue a `ClientMessage` to the transport loop.
    fn send(&self, msg: ClientMessage) -> Result<()> {
        if !self.is_connected() {
            return Err(KitchenError::NotConnected);
        }
        self.cmd_tx
            .send(msg)
            .map_err(|_| KitchenError::NotConnected)
    }
}

impl std::fmt::Debug for KitchenClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KitchenClient")
            .field("connection", &self.connection_state())
            .field("has_task", &self.task.is_some())
            .finish()
    }
}

impl Drop for KitchenClient {
    fn drop(&mut self) {
        // `Drop` is synchronous so we cannot await a graceful shutdown. The
        // only safe action is to abort the spawned task; the shutdown oneshot
        // is intentionally not sent because there is no executor context to
        // drive the graceful close inside `Drop`.
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

// ── Transport loop ──────────────────────────────────────────────────

/// Why a single connection's session loop ended.
enum SessionExit {
    /// Shutdown requested (or the handle was dropped); do not reconnect.
    Shutdown,
    /// The transport dropped; reconnect with backoff.
    Dropped(Option<String>),
}

/// Outer reconnection loop: connect, run a session, back off, repeat.
async fn run_loop(
    connector: impl Connector,
    mut cmd_rx: mpsc::UnboundedReceiver<ClientMessage>,
    event_tx: mpsc::Sender<KitchenEvent>,
    shared: Arc<ClientShared>,
    mut shutdown_rx: oneshot::Receiver<()>,
    config: KitchenConfig,
) {
    debug!("transport loop started");

    let mut attempt: u32 = 0;
    let mut delay = config.reconnect_initial_delay;

    loop {
        if attempt > 0 {
            shared.set_connection(ConnectionState::Reconnecting);
            emit_event(&event_tx, KitchenEvent::Reconnecting { attempt }).await;
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                _ = &mut shutdown_rx => {
                    emit_disconnected(&event_tx, &shared, Some("client shut down".into())).await;
                    return;
                }
            }
            delay = (delay * 2).min(config.reconnect_max_delay);
        }

        let connected = tokio::select! {
            result = connector.connect() => result,
            _ = &mut shutdown_rx => {
                emit_disconnected(&event_tx, &shared, Some("client shut down".into())).await;
                return;
            }
        };

        let mut transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                warn!(attempt, "connect failed: {e}");
                attempt += 1;
                continue;
            }
        };

        delay = config.reconnect_initial_delay;
        attempt = 0;

        // Commands queued while disconnected predate the reconnect and are
        // stale; the fresh snapshot rebuilds everything.
        while cmd_rx.try_recv().is_ok() {}
        // Reconnection implicitly cancels trust in pending optimistic
        // actions.
        shared.tracker.lock().await.clear();

        shared.set_connection(ConnectionState::Connected);
        emit_event(&event_tx, KitchenEvent::Connected).await;

        // Rejoin the persisted room (forcing a fresh snapshot) or drive the
        // room picker.
        let opener = match shared.room_store.load() {
            Some(room) => {
                debug!(room, "rejoining persisted room");
                ClientMessage::Join { room }
            }
            None => {
                emit_event(&event_tx, KitchenEvent::NeedRoomSelection).await;
                ClientMessage::RequestRoomList
            }
        };
        if let Err(e) = send_message(&mut *transport, &opener).await {
            warn!("send failed right after connect: {e}");
            emit_disconnected(&event_tx, &shared, Some(e.to_string())).await;
            attempt = 1;
            continue;
        }

        match session(
            &mut *transport,
            &mut cmd_rx,
            &event_tx,
            &shared,
            &mut shutdown_rx,
            &config,
        )
        .await
        {
            SessionExit::Shutdown => {
                let _ = transport.close().await;
                emit_disconnected(&event_tx, &shared, Some("client shut down".into())).await;
                break;
            }
            SessionExit::Dropped(reason) => {
                debug!(?reason, "transport dropped, scheduling reconnect");
                emit_disconnected(&event_tx, &shared, reason).await;
                attempt = 1;
            }
        }
    }

    debug!("transport loop exited");
}

/// Per-connection session loop, multiplexed via `tokio::select!`.
async fn session(
    transport: &mut dyn Transport,
    cmd_rx: &mut mpsc::UnboundedReceiver<ClientMessage>,
    event_tx: &mpsc::Sender<KitchenEvent>,
    shared: &Arc<ClientShared>,
    shutdown_rx: &mut oneshot::Receiver<()>,
    config: &KitchenConfig,
) -> SessionExit {
    // First tick lands one full interval after connect so the join message
    // always goes out first.
    let mut time_tick = tokio::time::interval_at(
        tokio::time::Instant::now() + config.time_sync_interval,
        config.time_sync_interval,
    );

    loop {
        tokio::select! {
            // Branch 1: outgoing command from the client handle
            cmd = cmd_rx.recv() => {
                match cmd {
                    Some(msg) => {
                        debug!("sending client message: {:?}", std::mem::discriminant(&msg));
                        if let Err(e) = send_message(transport, &msg).await {
                            error!("transport send error: {e}");
                            return SessionExit::Dropped(Some(format!("transport send error: {e}")));
                        }
                    }
                    // Command channel closed — client handle dropped.
                    None => {
                        debug!("command channel closed, shutting down transport loop");
                        return SessionExit::Shutdown;
                    }
                }
            }

            // Branch 2: shutdown signal
            _ = &mut *shutdown_rx => {
                debug!("shutdown signal received");
                return SessionExit::Shutdown;
            }

            // Branch 3: elapsed-time poll
            _ = time_tick.tick() => {
                if let Err(e) = send_message(transport, &ClientMessage::TimeRequest).await {
                    return SessionExit::Dropped(Some(format!("transport send error: {e}")));
                }
            }

            // Branch 4: incoming message from the server
            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => {
                        if let Some(reply) = handle_server_message(&text, event_tx, shared).await {
                            if let Err(e) = send_message(transport, &reply).await {
                                return SessionExit::Dropped(
                                    Some(format!("transport send error: {e}")),
                                );
                            }
                        }
                    }
                    Some(Err(e)) => {
                        error!("transport receive error: {e}");
                        return SessionExit::Dropped(Some(format!("transport receive error: {e}")));
                    }
                    // Transport closed cleanly.
                    None => {
                        debug!("transport closed by server");
                        return SessionExit::Dropped(None);
                    }
                }
            }
        }
    }
}

/// Serialize and send one outbound message. Serialization failures are
/// programming bugs: logged and skipped without killing the connection.
async fn send_message(transport: &mut dyn Transport, msg: &ClientMessage) -> Result<()> {
    match serde_json::to_string(msg) {
        Ok(json) => transport.send(json).await,
        Err(e) => {
            error!("failed to serialize ClientMessage: {e}");
            Ok(())
        }
    }
}

/// Decode one inbound frame and drive the pipeline: store apply → optimistic
/// reconciliation → view selection → presentation events.
///
/// Returns a message to send back to the server, if the event demands one.
async fn handle_server_message(
    text: &str,
    event_tx: &mpsc::Sender<KitchenEvent>,
    shared: &Arc<ClientShared>,
) -> Option<ClientMessage> {
    let msg: ServerMessage = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            // Fail closed: drop the whole event, never partially apply.
            warn!("failed to deserialize server message: {e} — raw: {text}");
            return None;
        }
    };

    match msg {
        ServerMessage::RoomList { rooms } => {
            emit_event(event_tx, KitchenEvent::RoomList { rooms }).await;
        }
        ServerMessage::JoinError { message } => {
            // Inline form feedback; the persisted room stays untouched.
            emit_event(event_tx, KitchenEvent::JoinRejected { message }).await;
        }
        ServerMessage::GameState(snapshot) => {
            // A snapshot is the bounded wait for unconfirmed actions: any
            // entry still pending is dropped and authoritative truth wins.
            shared.tracker.lock().await.clear();
            shared.store.lock().await.apply_snapshot(*snapshot);
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::GameStateUpdate(delta) => {
            shared.store.lock().await.apply_delta(delta);
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::RoundStarted {
            round,
            duration,
            customer_orders,
        } => {
            shared.tracker.lock().await.clear();
            shared.store.lock().await.round_started(round, customer_orders);
            emit_event(event_tx, KitchenEvent::RoundStarted { round, duration }).await;
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::RoundEnded(result) => {
            let debrief = {
                let mut store = shared.store.lock().await;
                store.round_ended();
                store
                    .current()
                    .and_then(|s| debrief_overlay(s.round, s.current_phase, s.max_rounds))
            };
            emit_event(event_tx, KitchenEvent::RoundEnded { result, debrief }).await;
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::GameReset(snapshot) => {
            shared.tracker.lock().await.clear();
            shared.store.lock().await.apply_snapshot(*snapshot);
            emit_event(event_tx, KitchenEvent::GameReset).await;
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::IngredientPrepared(ingredient) => {
            shared.store.lock().await.ingredient_prepared(ingredient);
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::IngredientRemoved {
            ingredient_id,
            target_sid,
        } => {
            shared.tracker.lock().await.confirm_take(&ingredient_id);
            shared
                .store
                .lock()
                .await
                .ingredient_removed(&ingredient_id, target_sid.as_ref());
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::PizzaBuilt(pizza) => {
            shared.tracker.lock().await.confirm_build(&pizza);
            shared.store.lock().await.pizza_built(pizza);
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::PizzaMovedToOven(pizza) => {
            shared.tracker.lock().await.confirm_move(&pizza.pizza_id);
            shared.store.lock().await.pizza_moved_to_oven(pizza);
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::NewOrder(order) => {
            shared.store.lock().await.orders_added(vec![order]);
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::NewOrders(orders) => {
            shared.store.lock().await.orders_added(orders);
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::OrderFulfilled { order_id } => {
            shared.store.lock().await.order_fulfilled(&order_id);
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::OvenToggled { state } => {
            shared.store.lock().await.oven_toggled(state);
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::ClearSharedBuilder { player_sid } => {
            shared.store.lock().await.clear_player_builder(&player_sid);
            notify_state_changed(event_tx, shared).await;
        }
        ServerMessage::BuildError { message } => {
            let _ = shared.tracker.lock().await.reject_build();
            emit_event(event_tx, KitchenEvent::ActionRejected { message }).await;
        }
        ServerMessage::OvenError { message } => {
            let _ = shared.tracker.lock().await.reject_move();
            emit_event(event_tx, KitchenEvent::ActionRejected { message }).await;
        }
        ServerMessage::Error { message } => {
            let _ = shared.tracker.lock().await.reject_take();
            emit_event(event_tx, KitchenEvent::ActionRejected { message }).await;
        }
        ServerMessage::RoomExpired { message } => {
            if let Err(e) = shared.room_store.clear() {
                warn!("failed to clear persisted room: {e}");
            }
            shared.store.lock().await.reset();
            shared.tracker.lock().await.clear();
            shared.selector.lock().await.reset();
            emit_event(event_tx, KitchenEvent::RoomExpired { message }).await;
            emit_event(event_tx, KitchenEvent::NeedRoomSelection).await;
            return Some(ClientMessage::RequestRoomList);
        }
        ServerMessage::TimeResponse(sync) => {
            emit_event(event_tx, KitchenEvent::TimeSync(sync)).await;
        }
    }

    None
}

/// Emit `StateChanged`, then recompute the view and emit `ViewChanged` when
/// the layout actually switched.
async fn notify_state_changed(event_tx: &mpsc::Sender<KitchenEvent>, shared: &Arc<ClientShared>) {
    emit_event(event_tx, KitchenEvent::StateChanged).await;
    let mode = {
        let store = shared.store.lock().await;
        match store.current() {
            Some(state) => shared.selector.lock().await.update(state),
            None => None,
        }
    };
    if let Some(mode) = mode {
        emit_event(event_tx, KitchenEvent::ViewChanged(mode)).await;
    }
}

/// Emit an event to the event channel. If the channel is full, log a warning
/// and drop the event to avoid blocking the transport loop.
async fn emit_event(event_tx: &mpsc::Sender<KitchenEvent>, event: KitchenEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

/// Emit a [`Disconnected`](KitchenEvent::Disconnected) event and update
/// state.
///
/// Uses `send().await` (blocking) instead of `try_send` because
/// `Disconnected` must never be silently dropped, even when the channel is
/// congested.
async fn emit_disconnected(
    event_tx: &mpsc::Sender<KitchenEvent>,
    shared: &Arc<ClientShared>,
    reason: Option<String>,
) {
    shared.set_connection(ConnectionState::Disconnected);
    let event = KitchenEvent::Disconnected { reason };
    if event_tx.send(event).await.is_err() {
        debug!("event channel closed, receiver dropped");
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::transport::BoxTransport;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::AtomicBool;
    use std::sync::Mutex as StdMutex;

    // ── Mock transport / connector ──────────────────────────────────

    /// A mock transport that records sent messages and replays scripted
    /// responses, hanging once the script is exhausted.
    struct MockTransport {
        incoming: VecDeque<Option<std::result::Result<String, KitchenError>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(&mut self, message: String) -> Result<()> {
            self.sent.lock().unwrap().push(message);
            Ok(())
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            if let Some(item) = self.incoming.pop_front() {
                item
            } else {
                // Script exhausted — hang so the loop stays alive until
                // shutdown.
                std::future::pending().await
            }
        }

        async fn close(&mut self) -> Result<()> {
            self.closed.store(true, Ordering::Relaxed);
            Ok(())
        }
    }

    /// Hands out one scripted transport per connection attempt.
    struct MockConnector {
        scripts: StdMutex<VecDeque<Vec<Option<std::result::Result<String, KitchenError>>>>>,
        sent: Arc<StdMutex<Vec<String>>>,
        closed: Arc<AtomicBool>,
    }

    impl MockConnector {
        fn new(
            scripts: Vec<Vec<Option<std::result::Result<String, KitchenError>>>>,
        ) -> (Self, Arc<StdMutex<Vec<String>>>, Arc<AtomicBool>) {
            let sent = Arc::new(StdMutex::new(Vec::new()));
            let closed = Arc::new(AtomicBool::new(false));
            let connector = Self {
                scripts: StdMutex::new(VecDeque::from(scripts)),
                sent: Arc::clone(&sent),
                closed: Arc::clone(&closed),
            };
            (connector, sent, closed)
        }
    }

    #[async_trait]
    impl Connector for MockConnector {
        async fn connect(&self) -> Result<BoxTransport> {
            let script = self
                .scripts
                .lock()
                .unwrap()
                .pop_front()
                .ok_or_else(|| KitchenError::TransportSend("no scripted connection".into()))?;
            Ok(Box::new(MockTransport {
                incoming: VecDeque::from(script),
                sent: Arc::clone(&self.sent),
                closed: Arc::clone(&self.closed),
            }))
        }
    }

    fn snapshot_json() -> String {
        serde_json::to_string(&ServerMessage::GameState(Box::new(GameState::default()))).unwrap()
    }

    fn test_config() -> KitchenConfig {
        KitchenConfig::new()
            .with_reconnect_initial_delay(Duration::from_millis(10))
            .with_time_sync_interval(Duration::from_secs(3600))
    }

    async fn next_event(rx: &mut mpsc::Receiver<KitchenEvent>) -> KitchenEvent {
        tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for event")
            .expect("event channel closed")
    }

    fn sent_types(sent: &Arc<StdMutex<Vec<String>>>) -> Vec<String> {
        sent.lock()
            .unwrap()
            .iter()
            .map(|raw| {
                serde_json::from_str::<serde_json::Value>(raw).unwrap()["type"]
                    .as_str()
                    .unwrap()
                    .to_string()
            })
            .collect()
    }

    // ── Tests ───────────────────────────────────────────────────────

    #[tokio::test]
    async fn no_persisted_room_prompts_selection_and_requests_list() {
        let (connector, sent, _closed) = MockConnector::new(vec![vec![]]);
        let (mut client, mut events) = KitchenClient::start(connector, test_config());

        assert!(matches!(next_event(&mut events).await, KitchenEvent::Connected));
        assert!(matches!(
            next_event(&mut events).await,
            KitchenEvent::NeedRoomSelection
        ));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sent_types(&sent), vec!["request_room_list"]);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn persisted_room_is_rejoined_on_connect() {
        let (connector, sent, _closed) =
            MockConnector::new(vec![vec![Some(Ok(snapshot_json()))]]);
        let config =
            test_config().with_room_store(Arc::new(MemoryRoomStore::with_room("kitchen-7")));
        let (mut client, mut events) = KitchenClient::start(connector, config);

        assert!(matches!(next_event(&mut events).await, KitchenEvent::Connected));
        assert!(matches!(
            next_event(&mut events).await,
            KitchenEvent::StateChanged
        ));

        let messages = sent.lock().unwrap().clone();
        let first: ClientMessage = serde_json::from_str(&messages[0]).unwrap();
        assert_eq!(
            first,
            ClientMessage::Join {
                room: "kitchen-7".into()
            }
        );

        client.shutdown().await;
    }

    #[tokio::test]
    async fn join_room_persists_and_sends() {
        let (connector, sent, _closed) = MockConnector::new(vec![vec![]]);
        let (mut client, mut events) = KitchenClient::start(connector, test_config());

        let _ = next_event(&mut events).await; // Connected
        let _ = next_event(&mut events).await; // NeedRoomSelection

        client.join_room("kitchen-7").unwrap();
        assert_eq!(client.persisted_room().as_deref(), Some("kitchen-7"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sent_types(&sent).contains(&"join".to_string()));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn snapshot_populates_state() {
        let (connector, _sent, _closed) =
            MockConnector::new(vec![vec![Some(Ok(snapshot_json()))]]);
        let config = test_config().with_room_store(Arc::new(MemoryRoomStore::with_room("k")));
        let (mut client, mut events) = KitchenClient::start(connector, config);

        let _ = next_event(&mut events).await; // Connected
        let _ = next_event(&mut events).await; // StateChanged

        let state = client.state().await.unwrap();
        assert_eq!(state.round, 1);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn transport_drop_triggers_reconnect_and_rejoin() {
        // First connection closes right after the snapshot; the second stays
        // alive.
        let (connector, sent, _closed) = MockConnector::new(vec![
            vec![Some(Ok(snapshot_json())), None],
            vec![Some(Ok(snapshot_json()))],
        ]);
        let config = test_config().with_room_store(Arc::new(MemoryRoomStore::with_room("k")));
        let (mut client, mut events) = KitchenClient::start(connector, config);

        let mut seen = Vec::new();
        loop {
            let event = next_event(&mut events).await;
            seen.push(event.clone());
            // Second Connected = reconnect completed.
            if seen
                .iter()
                .filter(|e| matches!(e, KitchenEvent::Connected))
                .count()
                == 2
            {
                break;
            }
        }

        assert!(seen
            .iter()
            .any(|e| matches!(e, KitchenEvent::Disconnected { .. })));
        assert!(seen
            .iter()
            .any(|e| matches!(e, KitchenEvent::Reconnecting { .. })));

        // Both connections opened with a join for the persisted room.
        let joins = sent_types(&sent)
            .iter()
            .filter(|t| *t == "join")
            .count();
        assert_eq!(joins, 2);

        client.shutdown().await;
    }

    #[tokio::test]
    async fn time_request_is_emitted_periodically() {
        let (connector, sent, _closed) = MockConnector::new(vec![vec![]]);
        let config = KitchenConfig::new()
            .with_time_sync_interval(Duration::from_millis(20))
            .with_room_store(Arc::new(MemoryRoomStore::with_room("k")));
        let (mut client, _events) = KitchenClient::start(connector, config);

        tokio::time::sleep(Duration::from_millis(120)).await;
        let ticks = sent_types(&sent)
            .iter()
            .filter(|t| *t == "time_request")
            .count();
        assert!(ticks >= 2, "expected periodic time requests, got {ticks}");

        client.shutdown().await;
    }

    #[tokio::test]
    async fn not_connected_error_after_shutdown() {
        let (connector, _sent, _closed) = MockConnector::new(vec![vec![]]);
        let (mut client, mut events) = KitchenClient::start(connector, test_config());

        let _ = next_event(&mut events).await; // Connected
        client.shutdown().await;

        let result = client.request_room_list();
        assert!(matches!(result, Err(KitchenError::NotConnected)));
    }

    #[tokio::test]
    async fn shutdown_emits_disconnected() {
        let (connector, _sent, closed) = MockConnector::new(vec![vec![]]);
        let (mut client, mut events) = KitchenClient::start(connector, test_config());

        let _ = next_event(&mut events).await; // Connected
        let _ = next_event(&mut events).await; // NeedRoomSelection
        client.shutdown().await;

        loop {
            let event = next_event(&mut events).await;
            if let KitchenEvent::Disconnected { reason } = event {
                assert_eq!(reason.as_deref(), Some("client shut down"));
                break;
            }
        }
        assert!(closed.load(Ordering::Relaxed));
    }

    #[tokio::test]
    async fn double_shutdown_does_not_panic() {
        let (connector, _sent, _closed) = MockConnector::new(vec![vec![]]);
        let (mut client, mut events) = KitchenClient::start(connector, test_config());

        let _ = next_event(&mut events).await; // Connected
        client.shutdown().await;
        client.shutdown().await;
    }

    #[tokio::test]
    async fn drop_without_explicit_shutdown() {
        let (connector, _sent, _closed) = MockConnector::new(vec![vec![]]);
        let (client, mut events) = KitchenClient::start(connector, test_config());

        let _ = next_event(&mut events).await; // Connected
        drop(client);

        // The transport loop task is aborted; the event channel closes.
        while let Some(_event) = events.recv().await {}
    }

    #[tokio::test]
    async fn malformed_frame_is_dropped_without_crash() {
        let (connector, _sent, _closed) = MockConnector::new(vec![vec![
            Some(Ok("{not json".into())),
            Some(Ok(snapshot_json())),
        ]]);
        let config = test_config().with_room_store(Arc::new(MemoryRoomStore::with_room("k")));
        let (mut client, mut events) = KitchenClient::start(connector, config);

        let _ = next_event(&mut events).await; // Connected
        // The malformed frame produced no event; the snapshot still landed.
        assert!(matches!(
            next_event(&mut events).await,
            KitchenEvent::StateChanged
        ));

        client.shutdown().await;
    }

    #[tokio::test]
    async fn config_defaults() {
        let config = KitchenConfig::new();
        assert_eq!(config.event_channel_capacity, 256);
        assert_eq!(config.shutdown_timeout, Duration::from_secs(1));
        assert_eq!(config.reconnect_initial_delay, Duration::from_millis(500));
        assert_eq!(config.reconnect_max_delay, Duration::from_secs(30));
        assert_eq!(config.time_sync_interval, Duration::from_secs(1));
    }

    #[tokio::test]
    async fn event_channel_capacity_is_clamped_to_one() {
        let config = KitchenConfig::new().with_event_channel_capacity(0);
        assert_eq!(config.event_channel_capacity, 1);
    }

    #[tokio::test]
    async fn build_pizza_with_empty_builder_is_rejected_locally() {
        let (connector, _sent, _closed) = MockConnector::new(vec![vec![]]);
        let config = test_config().with_room_store(Arc::new(MemoryRoomStore::with_room("k")));
        let (mut client, mut events) = KitchenClient::start(connector, config);

        let _ = next_event(&mut events).await; // Connected
        let result = client.build_pizza().await;
        assert!(matches!(result, Err(KitchenError::EmptyBuilder)));

        client.shutdown().await;
    }
}
