// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of HaMirror.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! The websocket connection manager: one logical connection per [`HaSocket`],
//! handshake replayed after every reconnect, all store mutations serialized
//! through the single driver task.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde_json::{Value, json};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use tracing::{debug, error, info, warn};

use hamirror_core::{EntityState, EntityStore, RoomMapping, STATE_UNAVAILABLE, default_rooms, resolve_room};

use crate::config::HaConfig;
use crate::errors::HaResult;
use crate::protocol::{
    self, CMD_GET_STATES, CMD_SUBSCRIBE_EVENTS, EVENT_STATE_CHANGED, EventPayload, ServerMessage,
    StateChange,
};
use crate::rest::HaRestClient;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type WsSink = SplitSink<WsStream, Message>;

pub const RECONNECT_BASE_DELAY: Duration = Duration::from_secs(5);
pub const RECONNECT_MAX_DELAY: Duration = Duration::from_secs(60);

/// The entity store as shared between the ingestion path and read-side
/// consumers. Consumers copy values out; only the driver task mutates it.
pub type SharedStore = Arc<RwLock<EntityStore>>;

/// Called for every merged `state_changed`, with the room resolved for the
/// entity.
pub type StateUpdateCallback = Arc<dyn Fn(&str, &EntityState, Option<&RoomMapping>) + Send + Sync>;
/// Called with every full snapshot before it is bulk-loaded.
pub type InitialStatesCallback = Arc<dyn Fn(&[EntityState]) + Send + Sync>;
/// Per-event-type subscriber, invoked with the raw event data.
pub type EventCallback = Arc<dyn Fn(&Value) + Send + Sync>;

/// Connection lifecycle. Any failure from any state falls back to
/// `Disconnected`, which schedules a reconnect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    AuthPending,
    Ready,
}

/// Reconnect delay schedule: fixed base, doubled per consecutive failure,
/// capped, reset on a successful `Ready` transition.
#[derive(Debug)]
pub struct ReconnectBackoff {
    delay: Duration,
}

impl ReconnectBackoff {
    pub fn new() -> Self {
        Self {
            delay: RECONNECT_BASE_DELAY,
        }
    }

    /// Returns the delay to wait now and doubles it for the next failure.
    pub fn next_delay(&mut self) -> Duration {
        let current = self.delay;
        self.delay = (self.delay * 2).min(RECONNECT_MAX_DELAY);
        current
    }

    pub fn reset(&mut self) {
        self.delay = RECONNECT_BASE_DELAY;
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new()
    }
}

/// Construction options for [`HaSocket`].
pub struct HaSocketOptions {
    config: HaConfig,
    rooms: Vec<RoomMapping>,
    store: Option<SharedStore>,
    rest_fallback: bool,
    on_state_update: Option<StateUpdateCallback>,
    on_initial_states: Option<InitialStatesCallback>,
}

impl HaSocketOptions {
    pub fn new(config: HaConfig) -> Self {
        Self {
            config,
            rooms: default_rooms(),
            store: None,
            rest_fallback: true,
            on_state_update: None,
            on_initial_states: None,
        }
    }

    /// Replace the built-in room table.
    pub fn rooms(mut self, rooms: Vec<RoomMapping>) -> Self {
        self.rooms = rooms;
        self
    }

    /// Inject an existing store instead of letting the socket own a fresh one.
    pub fn store(mut self, store: SharedStore) -> Self {
        self.store = Some(store);
        self
    }

    /// REST snapshot polling while the websocket is down (default on, only
    /// effective for http(s) URLs).
    pub fn rest_fallback(mut self, enabled: bool) -> Self {
        self.rest_fallback = enabled;
        self
    }

    pub fn on_state_update(
        mut self,
        callback: impl Fn(&str, &EntityState, Option<&RoomMapping>) + Send + Sync + 'static,
    ) -> Self {
        self.on_state_update = Some(Arc::new(callback));
        self
    }

    pub fn on_initial_states(
        mut self,
        callback: impl Fn(&[EntityState]) + Send + Sync + 'static,
    ) -> Self {
        self.on_initial_states = Some(Arc::new(callback));
        self
    }
}

impl std::fmt::Debug for HaSocketOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HaSocketOptions")
            .field("config", &self.config)
            .field("rooms", &self.rooms.len())
            .field("rest_fallback", &self.rest_fallback)
            .finish_non_exhaustive()
    }
}

enum SocketRequest {
    Command { cmd_type: String, payload: Value },
    Disconnect,
}

struct Driver {
    req_tx: mpsc::UnboundedSender<SocketRequest>,
    task: JoinHandle<()>,
}

struct Shared {
    config: HaConfig,
    rooms: Vec<RoomMapping>,
    store: SharedStore,
    rest_fallback: bool,
    subscriptions: Mutex<HashMap<String, EventCallback>>,
    on_state_update: Option<StateUpdateCallback>,
    on_initial_states: Option<InitialStatesCallback>,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!("[HA WS] {previous:?} -> {state:?}");
        }
    }
}

/// Client for the Home Assistant websocket API.
///
/// Owns the wire connection and the subscription table; keeps the injected
/// [`EntityStore`] mirrored with the hub and retries forever on failure until
/// [`disconnect`](Self::disconnect) is called.
pub struct HaSocket {
    shared: Arc<Shared>,
    driver: Mutex<Option<Driver>>,
}

impl HaSocket {
    pub fn new(options: HaSocketOptions) -> HaResult<Self> {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let shared = Arc::new(Shared {
            config: options.config,
            rooms: options.rooms,
            store: options
                .store
                .unwrap_or_else(|| Arc::new(RwLock::new(EntityStore::new()))),
            rest_fallback: options.rest_fallback,
            subscriptions: Mutex::new(HashMap::new()),
            on_state_update: options.on_state_update,
            on_initial_states: options.on_initial_states,
            state_tx,
            state_rx,
        });
        Ok(Self {
            shared,
            driver: Mutex::new(None),
        })
    }

    /// The shared entity mirror.
    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.shared.store)
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_rx.borrow()
    }

    /// Observable connection state, for consumers that surface "offline".
    pub fn state_watch(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Starts the connection driver. Idempotent: if a driver is already open
    /// or opening, this does nothing. Readiness is signaled asynchronously
    /// through the `Ready` state, never by this call returning.
    ///
    /// Must be called from within a tokio runtime.
    pub fn connect(&self) {
        let mut driver = self.driver.lock();
        if let Some(existing) = driver.as_ref()
            && !existing.task.is_finished()
        {
            return;
        }
        let (req_tx, req_rx) = mpsc::unbounded_channel();
        let shared = Arc::clone(&self.shared);
        let task = tokio::spawn(run_driver(shared, req_rx));
        *driver = Some(Driver { req_tx, task });
    }

    /// Queues a command for the hub. Ids are assigned per connection in send
    /// order. When the transport is not open the command is dropped with a
    /// warning; delivery is never guaranteed.
    pub fn send_command(&self, cmd_type: impl Into<String>, payload: Value) {
        let cmd_type = cmd_type.into();
        let driver = self.driver.lock();
        let queued = driver.as_ref().is_some_and(|d| {
            !d.task.is_finished()
                && d.req_tx
                    .send(SocketRequest::Command {
                        cmd_type: cmd_type.clone(),
                        payload: payload.clone(),
                    })
                    .is_ok()
        });
        if !queued {
            warn!("[HA WS] Cannot send '{cmd_type}', socket not ready");
        }
    }

    /// Registers the callback for an event type and issues a subscribe
    /// command. One callback per event type: registering again replaces the
    /// previous one. The hub-side subscription from a replaced registration
    /// is not cancelled — cancelling needs the subscription id, which the hub
    /// protocol returns but this mirror does not track.
    pub fn subscribe(&self, event_type: impl Into<String>, callback: impl Fn(&Value) + Send + Sync + 'static) {
        let event_type = event_type.into();
        self.shared
            .subscriptions
            .lock()
            .insert(event_type.clone(), Arc::new(callback));
        self.send_command(CMD_SUBSCRIBE_EVENTS, json!({ "event_type": event_type }));
    }

    /// Drops the local callback. The hub keeps sending the events; they are
    /// discarded on arrival.
    pub fn unsubscribe(&self, event_type: &str) {
        self.shared.subscriptions.lock().remove(event_type);
    }

    /// Force-closes the connection and cancels any pending reconnect.
    /// In-flight commands are not cancelled (fire-and-forget).
    pub fn disconnect(&self) {
        let mut driver = self.driver.lock();
        if let Some(driver) = driver.take() {
            let _ = driver.req_tx.send(SocketRequest::Disconnect);
        }
    }
}

impl Drop for HaSocket {
    fn drop(&mut self) {
        if let Some(driver) = self.driver.get_mut().take() {
            let _ = driver.req_tx.send(SocketRequest::Disconnect);
        }
    }
}

impl std::fmt::Debug for HaSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HaSocket")
            .field("state", &self.state())
            .finish_non_exhaustive()
    }
}

enum Outcome {
    /// Transport dropped or hub closed; the reconnect policy takes over.
    Dropped,
    DisconnectRequested,
}

async fn run_driver(shared: Arc<Shared>, mut req_rx: mpsc::UnboundedReceiver<SocketRequest>) {
    let mut backoff = ReconnectBackoff::new();
    let rest = if shared.rest_fallback && shared.config.supports_rest() {
        match HaRestClient::from_config(&shared.config) {
            // The backoff loop already repeats; one attempt per poll is enough.
            Ok(client) => Some(client.with_retry_config(1, Duration::from_millis(250))),
            Err(e) => {
                warn!("[HA] REST fallback unavailable: {e}");
                None
            }
        }
    } else {
        None
    };

    loop {
        shared.set_state(ConnectionState::Connecting);
        let ws_url = shared.config.ws_url();
        info!("[HA WS] Connecting to {ws_url}");

        match connect_async(&ws_url).await {
            Ok((ws, _)) => {
                if let Outcome::DisconnectRequested =
                    run_connection(&shared, ws, &mut req_rx, &mut backoff).await
                {
                    break;
                }
            }
            Err(e) => warn!("[HA WS] Connection failed: {e}"),
        }

        shared.set_state(ConnectionState::Disconnected);
        let delay = backoff.next_delay();
        warn!("[HA WS] Disconnected, reconnecting in {}s", delay.as_secs());

        if let Some(rest) = &rest {
            poll_snapshot(&shared, rest).await;
        }

        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => break,
                request = req_rx.recv() => match request {
                    Some(SocketRequest::Disconnect) | None => {
                        shared.set_state(ConnectionState::Disconnected);
                        return;
                    }
                    Some(SocketRequest::Command { cmd_type, .. }) => {
                        warn!("[HA WS] Cannot send '{cmd_type}', socket not ready");
                    }
                },
            }
        }
    }

    shared.set_state(ConnectionState::Disconnected);
}

async fn run_connection(
    shared: &Shared,
    ws: WsStream,
    req_rx: &mut mpsc::UnboundedReceiver<SocketRequest>,
    backoff: &mut ReconnectBackoff,
) -> Outcome {
    let (mut ws_tx, mut ws_rx) = ws.split();
    // Command ids restart at 1 on every connection.
    let mut next_id: u64 = 1;

    info!("[HA WS] Connected");
    shared.set_state(ConnectionState::AuthPending);
    if let Some(token) = &shared.config.token
        && !send_json(&mut ws_tx, &protocol::auth_message(token)).await
    {
        return Outcome::Dropped;
    }

    loop {
        tokio::select! {
            request = req_rx.recv() => match request {
                Some(SocketRequest::Command { cmd_type, payload }) => {
                    if !write_command(&mut ws_tx, &mut next_id, &cmd_type, &payload).await {
                        return Outcome::Dropped;
                    }
                }
                Some(SocketRequest::Disconnect) | None => {
                    let _ = ws_tx.send(Message::Close(None)).await;
                    info!("[HA WS] Disconnected by request");
                    return Outcome::DisconnectRequested;
                }
            },
            frame = ws_rx.next() => {
                let frame = match frame {
                    Some(Ok(frame)) => frame,
                    Some(Err(e)) => {
                        error!("[HA WS] Transport error: {e}");
                        return Outcome::Dropped;
                    }
                    None => {
                        warn!("[HA WS] Connection closed by peer");
                        return Outcome::Dropped;
                    }
                };
                match frame {
                    Message::Text(text) => {
                        match serde_json::from_str::<ServerMessage>(&text) {
                            Ok(message) => {
                                if let Some(outcome) =
                                    handle_message(shared, message, &mut ws_tx, &mut next_id, backoff).await
                                {
                                    return outcome;
                                }
                            }
                            // Isolated per message; the connection stays up.
                            Err(e) => warn!("[HA WS] Error parsing message: {e}"),
                        }
                    }
                    Message::Close(_) => {
                        warn!("[HA WS] Connection closed by peer");
                        return Outcome::Dropped;
                    }
                    _ => {}
                }
            },
        }
    }
}

async fn handle_message(
    shared: &Shared,
    message: ServerMessage,
    ws_tx: &mut WsSink,
    next_id: &mut u64,
    backoff: &mut ReconnectBackoff,
) -> Option<Outcome> {
    match message {
        ServerMessage::AuthRequired => {
            if let Some(token) = &shared.config.token {
                if !send_json(ws_tx, &protocol::auth_message(token)).await {
                    return Some(Outcome::Dropped);
                }
            } else {
                warn!("[HA WS] Hub requires auth but no token is configured");
            }
            None
        }
        ServerMessage::AuthOk => {
            info!("[HA WS] Auth OK");
            shared.set_state(ConnectionState::Ready);
            backoff.reset();
            if !write_command(ws_tx, next_id, CMD_GET_STATES, &Value::Null).await
                || !write_command(
                    ws_tx,
                    next_id,
                    CMD_SUBSCRIBE_EVENTS,
                    &json!({ "event_type": EVENT_STATE_CHANGED }),
                )
                .await
            {
                return Some(Outcome::Dropped);
            }
            None
        }
        ServerMessage::AuthInvalid { message } => {
            error!(
                "[HA WS] Auth failed: {}",
                message.as_deref().unwrap_or("no reason given")
            );
            Some(Outcome::Dropped)
        }
        ServerMessage::Result {
            id,
            success,
            result,
            error,
        } => {
            if !success {
                error!("[HA WS] Command {id:?} failed: {error:?}");
            } else if result.is_array() {
                match serde_json::from_value::<Vec<EntityState>>(result) {
                    Ok(states) => {
                        info!("[HA WS] Snapshot received: {} entities", states.len());
                        if let Some(callback) = &shared.on_initial_states {
                            callback(&states);
                        }
                        shared.store.write().bulk_load(states);
                    }
                    // Store stays in last-known-good state.
                    Err(e) => error!("[HA WS] Invalid snapshot payload: {e}"),
                }
            }
            None
        }
        ServerMessage::Event { event } => {
            handle_event(shared, event);
            None
        }
        ServerMessage::Unknown => None,
    }
}

fn handle_event(shared: &Shared, event: EventPayload) {
    let subscriber = shared.subscriptions.lock().get(&event.event_type).cloned();
    if let Some(callback) = subscriber {
        callback(&event.data);
    }

    if event.event_type != EVENT_STATE_CHANGED {
        return;
    }
    match serde_json::from_value::<StateChange>(event.data) {
        Ok(change) => {
            let Some(entity_id) = change.entity_id else {
                return;
            };
            match change.new_state {
                Some(new_state) => {
                    shared.store.write().merge(new_state.clone());
                    if let Some(callback) = &shared.on_state_update {
                        let room =
                            resolve_room(&shared.rooms, Some(&entity_id), new_state.friendly_name());
                        callback(&entity_id, &new_state, room);
                    }
                }
                None => {
                    // Removal is not modeled; the record goes stale instead.
                    let mut store = shared.store.write();
                    if let Some(mut existing) = store.get(&entity_id).cloned() {
                        existing.state = STATE_UNAVAILABLE.to_string();
                        store.merge(existing);
                    }
                }
            }
        }
        Err(e) => warn!("[HA WS] Malformed state_changed payload: {e}"),
    }
}

async fn send_json(ws_tx: &mut WsSink, value: &Value) -> bool {
    match ws_tx.send(Message::Text(value.to_string().into())).await {
        Ok(()) => true,
        Err(e) => {
            warn!("[HA WS] Send failed: {e}");
            false
        }
    }
}

async fn write_command(ws_tx: &mut WsSink, next_id: &mut u64, cmd_type: &str, payload: &Value) -> bool {
    let id = *next_id;
    *next_id += 1;
    let envelope = protocol::command_envelope(id, cmd_type, payload);
    match ws_tx.send(Message::Text(envelope.to_string().into())).await {
        Ok(()) => {
            debug!("[HA WS] -> {cmd_type} (id {id})");
            true
        }
        Err(e) => {
            warn!("[HA WS] Send failed for '{cmd_type}': {e}");
            false
        }
    }
}

async fn poll_snapshot(shared: &Shared, rest: &HaRestClient) {
    match rest.get_states().await {
        Ok(states) if !states.is_empty() => {
            debug!("[HA] REST fallback refreshed {} entities", states.len());
            if let Some(callback) = &shared.on_initial_states {
                callback(&states);
            }
            shared.store.write().bulk_load(states);
        }
        Ok(_) => {}
        Err(e) => warn!("[HA] REST fallback poll failed: {e}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_to_the_cap() {
        let mut backoff = ReconnectBackoff::new();
        let delays: Vec<u64> = (0..6).map(|_| backoff.next_delay().as_millis() as u64).collect();
        assert_eq!(delays, vec![5000, 10000, 20000, 40000, 60000, 60000]);
    }

    #[test]
    fn backoff_resets_to_base_after_ready() {
        let mut backoff = ReconnectBackoff::new();
        backoff.next_delay();
        backoff.next_delay();
        backoff.next_delay();
        backoff.reset();
        assert_eq!(backoff.next_delay(), RECONNECT_BASE_DELAY);
    }

    #[tokio::test]
    async fn socket_starts_disconnected_and_shares_the_store() {
        let config = HaConfig::new("ws://127.0.0.1:1").unwrap();
        let socket = HaSocket::new(HaSocketOptions::new(config)).unwrap();
        assert_eq!(socket.state(), ConnectionState::Disconnected);
        assert!(socket.store().read().is_empty());
    }

    #[tokio::test]
    async fn send_command_without_connection_is_dropped() {
        let config = HaConfig::new("ws://127.0.0.1:1").unwrap();
        let socket = HaSocket::new(HaSocketOptions::new(config)).unwrap();
        // Must not panic or block; the command is logged and discarded.
        socket.send_command(CMD_GET_STATES, Value::Null);
    }

    #[test]
    fn subscribe_replaces_the_previous_callback() {
        let config = HaConfig::new("ws://127.0.0.1:1").unwrap();
        let socket = HaSocket::new(HaSocketOptions::new(config)).unwrap();
        socket.shared.subscriptions.lock().insert(
            "call_service".to_string(),
            Arc::new(|_| panic!("replaced callback must not run")),
        );

        let event = EventPayload {
            event_type: "call_service".to_string(),
            data: Value::Null,
        };
        socket
            .shared
            .subscriptions
            .lock()
            .insert("call_service".to_string(), Arc::new(|_| {}));
        handle_event(&socket.shared, event);
    }
}
