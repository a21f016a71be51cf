//! # Server Session Manager
//!
//! Owns the authoritative roster, runs the challenge/response handshake for
//! every new connection, relays client-to-client data and keeps the set of
//! live session objects.
//!
//! ## Lifecycle
//! `Stopped -> Starting -> Started -> Stopping -> Stopped`, driven by
//! [`ServerSessionManager::on_local_state_changed`]. Entering `Started`
//! captures the transport's endpoint and capacity; entering `Stopped` clears
//! the roster, the pending set and the objects.
//!
//! ## Handshake
//! 1. On connect, a challenge is issued and its digest kept in the pending set.
//! 2. A wrong answer disconnects the client. No retry.
//! 3. A correct answer promotes the client and sends, reliably and in order:
//!    its authentication, one `Connected` per existing member, then one
//!    `SpawnObject` per live object. Existing members receive a `Connected`
//!    for the newcomer.
//!
//! ## Errors
//! Inbound problems never escape [`ServerSessionManager::handle_received`]:
//! they are logged, counted and the message is dropped. Only encoding
//! mistakes in the caller's own data are returned from the `send_*` family.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use bytes::Bytes;
use tracing::{debug, info, instrument, warn};

use crate::config::{NetworkConfig, SerializerSettings, ServerConfig};
use crate::core::packet::{
    ClientUpdate, ClientUpdateKind, DataPacket, DataRoute, ObjectInfo, ObjectUpdate, Packet,
    ServerUpdate,
};
use crate::core::reader::Reader;
use crate::core::serialization::{CodecRegistry, NetSerialize};
use crate::core::types::Color32;
use crate::core::writer::Writer;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{Callback, CallbackId, EventListeners, ListenerId};
use crate::protocol::handshake::{self, ChallengeHash, PendingChallenge};
use crate::protocol::roster::{ClientId, ClientInformation, Roster, SERVER_CLIENT_ID};
use crate::service::channels::{DataChannels, StructCallback};
use crate::service::events::{ByteData, LocalServerState, ServerEvent};
use crate::service::objects::ObjectTable;
use crate::service::is_decode_error;
use crate::transport::{Channel, LocalConnectionState, RemoteConnectionState, Transport};
use crate::utils::metrics::Metrics;
use crate::utils::sync::{lock, read_lock, write_lock};

/// Server side of a session
pub struct ServerSessionManager {
    config: RwLock<ServerConfig>,
    settings: SerializerSettings,
    transport: Arc<dyn Transport>,
    state: RwLock<LocalServerState>,
    endpoint: RwLock<Option<SocketAddr>>,
    max_clients: AtomicU32,
    tick: AtomicU32,
    roster: Roster,
    pending: RwLock<HashMap<ClientId, PendingChallenge>>,
    objects: ObjectTable,
    channels: DataChannels,
    events: EventListeners<ServerEvent>,
    metrics: Metrics,
    writer: Mutex<Writer>,
}

impl ServerSessionManager {
    pub fn new(config: &NetworkConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_registry(config, transport, Arc::new(CodecRegistry::new()))
    }

    /// Share a record registry with other managers in the same process.
    pub fn with_registry(
        config: &NetworkConfig,
        transport: Arc<dyn Transport>,
        registry: Arc<CodecRegistry>,
    ) -> Self {
        let settings = config.serializer;
        Self {
            config: RwLock::new(config.server.clone()),
            settings,
            transport,
            state: RwLock::new(LocalServerState::Stopped),
            endpoint: RwLock::new(None),
            max_clients: AtomicU32::new(0),
            tick: AtomicU32::new(0),
            roster: Roster::new(),
            pending: RwLock::new(HashMap::new()),
            objects: ObjectTable::default(),
            channels: DataChannels::new(settings, registry),
            events: EventListeners::default(),
            metrics: Metrics::new(),
            writer: Mutex::new(Writer::new(settings)),
        }
    }

    // ------------------------------------------------------------------
    // Queries
    // ------------------------------------------------------------------

    pub fn state(&self) -> LocalServerState {
        *read_lock(&self.state)
    }

    /// Whether the server is started and accepting clients
    pub fn is_active(&self) -> bool {
        self.state() == LocalServerState::Started
    }

    pub fn server_name(&self) -> String {
        read_lock(&self.config).server_name.clone()
    }

    pub fn server_endpoint(&self) -> Option<SocketAddr> {
        *read_lock(&self.endpoint)
    }

    pub fn max_clients(&self) -> u32 {
        self.max_clients.load(Ordering::Relaxed)
    }

    pub fn current_tick(&self) -> u32 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Authenticated clients, ordered by id
    pub fn connected_clients(&self) -> Vec<ClientInformation> {
        self.roster.snapshot()
    }

    pub fn number_of_connected_clients(&self) -> usize {
        self.roster.len()
    }

    pub fn client(&self, client_id: ClientId) -> Option<ClientInformation> {
        self.roster.get(client_id)
    }

    /// Connections that received a challenge but have not answered it
    pub fn pending_clients(&self) -> Vec<ClientId> {
        let mut ids: Vec<ClientId> = read_lock(&self.pending).keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    pub fn objects(&self) -> Vec<ObjectInfo> {
        self.objects.snapshot()
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn registry(&self) -> &Arc<CodecRegistry> {
        self.channels.registry()
    }

    // ------------------------------------------------------------------
    // Configuration
    // ------------------------------------------------------------------

    /// Replace the server configuration. Refused while the server is started.
    pub fn apply_config(&self, config: ServerConfig) -> Result<()> {
        if self.is_active() {
            warn!("{}", constants::ERR_SESSION_ACTIVE);
            return Err(ProtocolError::InvalidState(
                constants::ERR_SESSION_ACTIVE.into(),
            ));
        }
        *write_lock(&self.config) = config;
        Ok(())
    }

    /// Rename the server. While started, every roster member is told.
    pub fn set_server_name(&self, server_name: impl Into<String>) -> Result<()> {
        let server_name = server_name.into();
        if server_name.len() > u16::MAX as usize {
            return Err(ProtocolError::FormatError(
                constants::ERR_STRING_TOO_LONG.into(),
            ));
        }
        write_lock(&self.config).server_name = server_name.clone();

        if self.is_active() {
            let packet = Packet::ServerUpdate(ServerUpdate::Updated {
                server_name: server_name.clone(),
            });
            let bytes = self.encode(&packet)?;
            for id in self.roster.ids() {
                self.send_bytes(id, bytes.clone(), Channel::ReliableOrdered);
            }
            info!(server_name = %server_name, "Server renamed");
            self.events.emit(&ServerEvent::ServerUpdated { server_name });
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ServerEvent) + Send + Sync + 'static,
    {
        self.events.subscribe(listener)
    }

    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        self.events.unsubscribe(id)
    }

    pub fn register_byte_data(&self, key: &str, callback: Callback<ByteData>) -> CallbackId {
        self.channels.register_bytes(key, callback)
    }

    pub fn unregister_byte_data(&self, key: &str, id: CallbackId) -> bool {
        self.channels.unregister_bytes(key, id)
    }

    /// Register a record callback.
    ///
    /// # Errors
    /// `SerializationUnsupported` if `T` carries no fields
    pub fn register_struct_data<T: NetSerialize>(
        &self,
        callback: StructCallback<T>,
    ) -> Result<CallbackId> {
        self.channels.register_record(callback)
    }

    pub fn unregister_struct_data<T: NetSerialize>(&self, id: CallbackId) -> bool {
        self.channels.unregister_record::<T>(id)
    }

    // ------------------------------------------------------------------
    // Transport events
    // ------------------------------------------------------------------

    /// Follow the transport's local lifecycle.
    pub fn on_local_state_changed(&self, state: LocalConnectionState) {
        let state = match state {
            LocalConnectionState::Starting => LocalServerState::Starting,
            LocalConnectionState::Started => LocalServerState::Started,
            LocalConnectionState::Stopping => LocalServerState::Stopping,
            LocalConnectionState::Stopped => LocalServerState::Stopped,
        };

        match state {
            LocalServerState::Started => {
                *write_lock(&self.endpoint) = self.transport.server_endpoint();
                self.max_clients
                    .store(self.transport.max_clients(), Ordering::Relaxed);
            }
            LocalServerState::Stopped => self.reset(),
            _ => {}
        }

        *write_lock(&self.state) = state;
        info!(
            ?state,
            endpoint = ?self.server_endpoint(),
            max_clients = self.max_clients(),
            "Server state changed"
        );
        self.events.emit(&ServerEvent::LocalStateUpdated(state));
        if state == LocalServerState::Started {
            self.events.emit(&ServerEvent::LocalServerStarted);
        }
    }

    /// The transport was torn down; behave as if it stopped.
    pub fn on_transport_disposed(&self) {
        if self.state() != LocalServerState::Stopped {
            self.on_local_state_changed(LocalConnectionState::Stopped);
        } else {
            self.reset();
        }
    }

    pub fn on_tick_started(&self, tick: u32) {
        self.tick.store(tick, Ordering::Relaxed);
    }

    /// A remote peer connected to or disconnected from the transport.
    pub fn on_remote_connection_changed(&self, client_id: ClientId, state: RemoteConnectionState) {
        match state {
            RemoteConnectionState::Connected => self.begin_handshake(client_id),
            RemoteConnectionState::Disconnected => self.remove_client(client_id),
        }
    }

    /// Decode and handle one inbound message. Never fails: problems are
    /// logged and the message is dropped.
    #[instrument(level = "debug", skip(self, data), fields(bytes = data.len()))]
    pub fn handle_received(&self, client_id: ClientId, data: &[u8], channel: Channel) {
        self.metrics.packet_received(data.len());
        if let Err(e) = self.process(client_id, data, channel) {
            if is_decode_error(&e) {
                self.metrics.packet_dropped();
            } else {
                self.metrics.protocol_violation();
            }
            warn!(client_id, ?channel, error = %e, "Dropped inbound packet");
        }
    }

    fn process(&self, client_id: ClientId, data: &[u8], channel: Channel) -> Result<()> {
        if !self.is_active() {
            return Err(ProtocolError::InvalidState(
                constants::ERR_SERVER_NOT_STARTED.into(),
            ));
        }

        let mut reader = Reader::new(data, self.settings);
        match Packet::read(&mut reader)? {
            Packet::ChallengeAnswer {
                hash,
                username,
                colour,
            } => self.handle_answer(client_id, &hash, username, colour),
            Packet::ClientUpdate(update) => self.handle_client_update(client_id, update),
            Packet::Data(packet) => self.handle_data(client_id, packet, channel),
            other => Err(ProtocolError::MalformedPacket(format!(
                "{:?} is never sent to a server",
                other.packet_type()
            ))),
        }
    }

    // ------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------

    fn begin_handshake(&self, client_id: ClientId) {
        self.metrics.connection_established();

        if !self.is_active() {
            warn!(client_id, "{}", constants::ERR_SERVER_NOT_STARTED);
            self.transport.disconnect_client(client_id);
            return;
        }

        if self.roster.contains(client_id) || read_lock(&self.pending).contains_key(&client_id) {
            warn!(client_id, "Duplicate connection id, dropping the new connection");
            self.metrics.protocol_violation();
            self.metrics.handshake_failed();
            self.transport.disconnect_client(client_id);
            return;
        }

        let pending = handshake::issue_challenge(client_id);
        write_lock(&self.pending).insert(client_id, pending);
        self.metrics.handshake_attempt();

        let packet = Packet::ConnectionChallenge {
            challenge: pending.challenge,
        };
        if let Err(e) = self.send_packet(client_id, &packet, Channel::ReliableOrdered) {
            warn!(client_id, error = %e, "Failed to send connection challenge");
        }
        debug!(client_id, "Connection challenge sent");
    }

    fn handle_answer(
        &self,
        client_id: ClientId,
        answer: &ChallengeHash,
        username: String,
        colour: Color32,
    ) -> Result<()> {
        let pending = write_lock(&self.pending).remove(&client_id);
        let Some(pending) = pending else {
            return Err(ProtocolError::InvalidState(format!(
                "unsolicited challenge answer from client {client_id}"
            )));
        };

        if !handshake::verify_answer(client_id, &pending, answer) {
            self.metrics.handshake_failed();
            self.transport.disconnect_client(client_id);
            return Ok(());
        }

        let client = ClientInformation::new(client_id, username, colour);
        let existing = self.roster.snapshot();
        if !self.roster.insert(client.clone()) {
            self.transport.disconnect_client(client_id);
            return Err(ProtocolError::InvalidState(format!(
                "client {client_id} is already authenticated"
            )));
        }

        let channel = Channel::ReliableOrdered;
        let auth = Packet::ServerUpdate(ServerUpdate::Authenticated {
            client_id,
            server_name: self.server_name(),
            max_clients: self.max_clients(),
        });
        self.send_packet(client_id, &auth, channel)?;

        for member in &existing {
            self.send_packet(client_id, &connected_packet(member), channel)?;
        }

        let announce = self.encode(&connected_packet(&client))?;
        for member in &existing {
            self.send_bytes(member.id, announce.clone(), channel);
        }

        for object in self.objects.snapshot() {
            self.send_packet(client_id, &Packet::SpawnObject(object), channel)?;
        }

        self.metrics.handshake_success();
        self.metrics.client_authenticated();
        info!(
            client_id,
            username = %client.username,
            roster = existing.len() + 1,
            "Client authenticated"
        );
        self.events.emit(&ServerEvent::RemoteClientConnected(client));
        Ok(())
    }

    fn remove_client(&self, client_id: ClientId) {
        if write_lock(&self.pending).remove(&client_id).is_some() {
            debug!(client_id, "Pending connection closed before authenticating");
            return;
        }

        let Some(client) = self.roster.remove(client_id) else {
            debug!(client_id, "Disconnect for unknown client");
            return;
        };

        self.metrics.client_removed();
        let packet = Packet::ClientUpdate(ClientUpdate {
            client_id,
            kind: ClientUpdateKind::Disconnected,
        });
        match self.encode(&packet) {
            Ok(bytes) => {
                for id in self.roster.ids() {
                    self.send_bytes(id, bytes.clone(), Channel::ReliableOrdered);
                }
            }
            Err(e) => warn!(client_id, error = %e, "Failed to encode disconnect"),
        }

        info!(client_id, username = %client.username, "Client disconnected");
        self.events
            .emit(&ServerEvent::RemoteClientDisconnected(client));
    }

    /// Ask the transport to drop an authenticated client.
    pub fn kick_client(&self, client_id: ClientId) -> bool {
        if !self.is_active() {
            warn!(client_id, "{}", constants::ERR_SERVER_NOT_STARTED);
            return false;
        }
        if !self.roster.contains(client_id) {
            warn!(client_id, "Can't kick a client that is not connected");
            return false;
        }
        info!(client_id, "Kicking client");
        self.transport.disconnect_client(client_id);
        true
    }

    // ------------------------------------------------------------------
    // Roster and data relay
    // ------------------------------------------------------------------

    fn handle_client_update(&self, sender_id: ClientId, update: ClientUpdate) -> Result<()> {
        if !self.roster.contains(sender_id) {
            return Err(ProtocolError::UnknownClient(sender_id));
        }
        if update.client_id != sender_id {
            return Err(ProtocolError::InvalidState(format!(
                "client {sender_id} tried to update client {}",
                update.client_id
            )));
        }
        let ClientUpdateKind::Updated { username, colour } = &update.kind else {
            return Err(ProtocolError::MalformedPacket(
                "clients may only send Updated roster changes".into(),
            ));
        };

        let client = self
            .roster
            .update(sender_id, username.as_deref(), *colour)
            .ok_or(ProtocolError::UnknownClient(sender_id))?;

        let bytes = self.encode(&Packet::ClientUpdate(update))?;
        for id in self.roster.ids() {
            if id != sender_id {
                self.send_bytes(id, bytes.clone(), Channel::ReliableOrdered);
            }
        }

        debug!(client_id = sender_id, username = %client.username, "Client updated");
        self.events.emit(&ServerEvent::RemoteClientUpdated(client));
        Ok(())
    }

    fn handle_data(&self, sender_id: ClientId, packet: DataPacket, channel: Channel) -> Result<()> {
        if !self.roster.contains(sender_id) {
            return Err(ProtocolError::UnknownClient(sender_id));
        }

        let targets = match &packet.route {
            DataRoute::ToServer => {
                self.channels
                    .dispatch(packet, sender_id, self.current_tick(), channel);
                return Ok(());
            }
            DataRoute::ToClient(target) => vec![*target],
            DataRoute::ToClients(targets) => targets.clone(),
            DataRoute::Forwarded { .. } => {
                debug!(sender_id, "Ignoring forwarded data sent to the server");
                return Ok(());
            }
        };

        let forwarded = Packet::Data(DataPacket {
            route: DataRoute::Forwarded { sender_id },
            ..packet
        });
        let bytes = self.encode(&forwarded)?;
        for target in targets {
            if target == sender_id {
                continue;
            }
            if !self.roster.contains(target) {
                debug!(sender_id, target, "Relay target is not connected");
                continue;
            }
            self.send_bytes(target, bytes.clone(), channel);
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Server-originated data
    // ------------------------------------------------------------------

    pub fn send_byte_data_to_client(
        &self,
        client_id: ClientId,
        key: &str,
        data: &[u8],
        channel: Channel,
    ) -> Result<()> {
        self.send_byte_data_to_clients(&[client_id], key, data, channel)
    }

    pub fn send_byte_data_to_clients(
        &self,
        client_ids: &[ClientId],
        key: &str,
        data: &[u8],
        channel: Channel,
    ) -> Result<()> {
        let packet = self.channels.byte_packet(key, data, self.forwarded());
        self.send_data(client_ids, &packet, channel)
    }

    pub fn send_byte_data_to_all(&self, key: &str, data: &[u8], channel: Channel) -> Result<()> {
        self.send_byte_data_to_clients(&self.roster.ids(), key, data, channel)
    }

    pub fn send_struct_data_to_client<T: NetSerialize>(
        &self,
        client_id: ClientId,
        value: &T,
        channel: Channel,
    ) -> Result<()> {
        self.send_struct_data_to_clients(&[client_id], value, channel)
    }

    /// # Errors
    /// `SerializationUnsupported` or `FormatError` if `value` can't be encoded
    pub fn send_struct_data_to_clients<T: NetSerialize>(
        &self,
        client_ids: &[ClientId],
        value: &T,
        channel: Channel,
    ) -> Result<()> {
        let packet = self.channels.record_packet(value, self.forwarded())?;
        self.send_data(client_ids, &packet, channel)
    }

    pub fn send_struct_data_to_all<T: NetSerialize>(&self, value: &T, channel: Channel) -> Result<()> {
        self.send_struct_data_to_clients(&self.roster.ids(), value, channel)
    }

    fn forwarded(&self) -> DataRoute {
        DataRoute::Forwarded {
            sender_id: SERVER_CLIENT_ID,
        }
    }

    fn send_data(&self, client_ids: &[ClientId], packet: &Packet, channel: Channel) -> Result<()> {
        if !self.is_active() {
            warn!("{}", constants::ERR_SERVER_NOT_STARTED);
            return Ok(());
        }

        let bytes = self.encode(packet)?;
        for &id in client_ids {
            if self.roster.contains(id) {
                self.send_bytes(id, bytes.clone(), channel);
            } else {
                warn!(client_id = id, "{}", constants::ERR_INVALID_TARGETS);
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Session objects
    // ------------------------------------------------------------------

    /// Track a new object and announce it to every roster member.
    pub fn spawn_object(&self, object: ObjectInfo) -> Result<()> {
        if !self.is_active() {
            warn!(object_id = object.object_id, "{}", constants::ERR_SERVER_NOT_STARTED);
            return Ok(());
        }
        if !self.objects.spawn(object) {
            debug!(object_id = object.object_id, "Respawned existing object");
        }
        self.broadcast(&Packet::SpawnObject(object))
    }

    /// Stop tracking an object and its descendants. Clients receive one
    /// despawn for the root and remove the subtree themselves.
    pub fn despawn_object(&self, object_id: u32) -> Result<()> {
        if !self.is_active() {
            warn!(object_id, "{}", constants::ERR_SERVER_NOT_STARTED);
            return Ok(());
        }
        let removed = self.objects.despawn(object_id);
        if removed.is_empty() {
            debug!(object_id, "Despawn for unknown object");
            return Ok(());
        }
        debug!(object_id, removed = removed.len(), "Despawned object");
        self.broadcast(&Packet::DespawnObject { object_id })
    }

    /// Change an object's parent or active flag.
    pub fn update_object(&self, update: ObjectUpdate) -> Result<()> {
        if !self.is_active() {
            warn!(object_id = update.object_id, "{}", constants::ERR_SERVER_NOT_STARTED);
            return Ok(());
        }
        if self.objects.update(update).is_none() {
            debug!(object_id = update.object_id, "Update for unknown object");
            return Ok(());
        }
        self.broadcast(&Packet::UpdateObject(update))
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn reset(&self) {
        self.roster.clear();
        write_lock(&self.pending).clear();
        self.objects.clear();
        self.metrics.reset_active();
    }

    fn encode(&self, packet: &Packet) -> Result<Bytes> {
        packet.encode(&mut lock(&self.writer))
    }

    fn send_bytes(&self, client_id: ClientId, bytes: Bytes, channel: Channel) {
        self.metrics.packet_sent(bytes.len());
        self.transport.send_to_client(client_id, bytes, channel);
    }

    fn send_packet(&self, client_id: ClientId, packet: &Packet, channel: Channel) -> Result<()> {
        let bytes = self.encode(packet)?;
        self.send_bytes(client_id, bytes, channel);
        Ok(())
    }

    fn broadcast(&self, packet: &Packet) -> Result<()> {
        let bytes = self.encode(packet)?;
        for id in self.roster.ids() {
            self.send_bytes(id, bytes.clone(), Channel::ReliableOrdered);
        }
        Ok(())
    }
}

fn connected_packet(client: &ClientInformation) -> Packet {
    Packet::ClientUpdate(ClientUpdate {
        client_id: client.id,
        kind: ClientUpdateKind::Connected {
            username: client.username.clone(),
            colour: client.colour,
        },
    })
}
