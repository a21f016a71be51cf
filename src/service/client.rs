//! # Client Session Manager
//!
//! Answers the server's challenge, mirrors the roster of the other
//! participants and the live session objects, and routes application data
//! through the server.
//!
//! ## Lifecycle
//! `Stopped -> Starting -> Started -> Authenticated -> Stopping -> Stopped`.
//! The transport drives every transition except `Authenticated`, which is
//! entered when the server's authentication message arrives.
//!
//! ## Accepted input
//! - In `Started`: the connection challenge and the authentication reply.
//! - In `Authenticated`: roster updates, server renames, forwarded data and
//!   object messages.
//!
//! Anything else is logged and dropped.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use tracing::{debug, info, instrument, warn};

use crate::config::{ClientConfig, NetworkConfig, SerializerSettings};
use crate::core::packet::{
    ClientUpdate, ClientUpdateKind, DataPacket, DataRoute, ObjectInfo, Packet, ServerUpdate,
};
use crate::core::reader::Reader;
use crate::core::serialization::{CodecRegistry, NetSerialize};
use crate::core::types::Color32;
use crate::core::writer::Writer;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::dispatcher::{Callback, CallbackId, EventListeners, ListenerId};
use crate::protocol::handshake;
use crate::protocol::roster::{ClientId, ClientInformation, Roster};
use crate::service::channels::{DataChannels, StructCallback};
use crate::service::events::{ByteData, ClientEvent, LocalClientState};
use crate::service::is_decode_error;
use crate::service::objects::ObjectTable;
use crate::transport::{Channel, LocalConnectionState, Transport};
use crate::utils::metrics::Metrics;
use crate::utils::sync::{lock, read_lock, write_lock};

/// Client side of a session
pub struct ClientSessionManager {
    config: RwLock<ClientConfig>,
    settings: SerializerSettings,
    transport: Arc<dyn Transport>,
    state: RwLock<LocalClientState>,
    client_id: RwLock<Option<ClientId>>,
    server_name: RwLock<Option<String>>,
    max_clients: AtomicU32,
    tick: AtomicU32,
    roster: Roster,
    objects: ObjectTable,
    channels: DataChannels,
    events: EventListeners<ClientEvent>,
    metrics: Metrics,
    writer: Mutex<Writer>,
}

impl ClientSessionManager {
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
            config: RwLock::new(config.client.clone()),
            settings,
            transport,
            state: RwLock::new(LocalClientState::Stopped),
            client_id: RwLock::new(None),
            server_name: RwLock::new(None),
            max_clients: AtomicU32::new(0),
            tick: AtomicU32::new(0),
            roster: Roster::new(),
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

    pub fn state(&self) -> LocalClientState {
        *read_lock(&self.state)
    }

    /// Started or authenticated
    pub fn is_active(&self) -> bool {
        matches!(
            self.state(),
            LocalClientState::Started | LocalClientState::Authenticated
        )
    }

    pub fn is_authenticated(&self) -> bool {
        self.state() == LocalClientState::Authenticated
    }

    /// Own id, known once authenticated
    pub fn client_id(&self) -> Option<ClientId> {
        *read_lock(&self.client_id)
    }

    /// Own public identity, known once authenticated
    pub fn client_information(&self) -> Option<ClientInformation> {
        let id = self.client_id()?;
        let config = read_lock(&self.config);
        Some(ClientInformation::new(id, config.username.clone(), config.colour))
    }

    pub fn username(&self) -> String {
        read_lock(&self.config).username.clone()
    }

    pub fn colour(&self) -> Color32 {
        read_lock(&self.config).colour
    }

    pub fn server_name(&self) -> Option<String> {
        read_lock(&self.server_name).clone()
    }

    pub fn server_endpoint(&self) -> Option<SocketAddr> {
        self.transport.server_endpoint()
    }

    pub fn max_clients(&self) -> u32 {
        self.max_clients.load(Ordering::Relaxed)
    }

    pub fn current_tick(&self) -> u32 {
        self.tick.load(Ordering::Relaxed)
    }

    /// Other participants, ordered by id
    pub fn connected_clients(&self) -> Vec<ClientInformation> {
        self.roster.snapshot()
    }

    /// Roster size including this client once authenticated
    pub fn number_of_connected_clients(&self) -> usize {
        self.roster.len() + usize::from(self.is_authenticated())
    }

    pub fn client(&self, client_id: ClientId) -> Option<ClientInformation> {
        self.roster.get(client_id)
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

    /// Replace the client configuration. Refused while a session is active.
    pub fn apply_config(&self, config: ClientConfig) -> Result<()> {
        if self.is_active() {
            warn!("{}", constants::ERR_SESSION_ACTIVE);
            return Err(ProtocolError::InvalidState(
                constants::ERR_SESSION_ACTIVE.into(),
            ));
        }
        *write_lock(&self.config) = config;
        Ok(())
    }

    /// Change the username. While authenticated the server is told.
    pub fn set_username(&self, username: impl Into<String>) -> Result<()> {
        let username = username.into();
        if username.len() > u16::MAX as usize {
            return Err(ProtocolError::FormatError(
                constants::ERR_STRING_TOO_LONG.into(),
            ));
        }
        write_lock(&self.config).username = username.clone();
        self.announce(Some(username), None)
    }

    /// Change the colour. While authenticated the server is told.
    pub fn set_colour(&self, colour: Color32) -> Result<()> {
        write_lock(&self.config).colour = colour;
        self.announce(None, Some(colour))
    }

    fn announce(&self, username: Option<String>, colour: Option<Color32>) -> Result<()> {
        let Some(client_id) = self.client_id().filter(|_| self.is_authenticated()) else {
            return Ok(());
        };
        let packet = Packet::ClientUpdate(ClientUpdate {
            client_id,
            kind: ClientUpdateKind::Updated { username, colour },
        });
        self.send_packet(&packet, Channel::ReliableOrdered)
    }

    // ------------------------------------------------------------------
    // Subscriptions
    // ------------------------------------------------------------------

    pub fn subscribe<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&ClientEvent) + Send + Sync + 'static,
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
            LocalConnectionState::Starting => LocalClientState::Starting,
            LocalConnectionState::Started => LocalClientState::Started,
            LocalConnectionState::Stopping => LocalClientState::Stopping,
            LocalConnectionState::Stopped => LocalClientState::Stopped,
        };
        if state == LocalClientState::Stopped {
            self.reset();
        }
        self.set_state(state);
    }

    /// The transport was torn down; behave as if it stopped.
    pub fn on_transport_disposed(&self) {
        if self.state() != LocalClientState::Stopped {
            self.on_local_state_changed(LocalConnectionState::Stopped);
        } else {
            self.reset();
        }
    }

    pub fn on_tick_started(&self, tick: u32) {
        self.tick.store(tick, Ordering::Relaxed);
    }

    /// Decode and handle one message from the server. Never fails: problems
    /// are logged and the message is dropped.
    #[instrument(level = "debug", skip(self, data), fields(bytes = data.len()))]
    pub fn handle_received(&self, data: &[u8], channel: Channel) {
        self.metrics.packet_received(data.len());
        if let Err(e) = self.process(data, channel) {
            if is_decode_error(&e) {
                self.metrics.packet_dropped();
            } else {
                self.metrics.protocol_violation();
            }
            warn!(?channel, error = %e, "Dropped inbound packet");
        }
    }

    fn process(&self, data: &[u8], channel: Channel) -> Result<()> {
        let mut reader = Reader::new(data, self.settings);
        let packet = Packet::read(&mut reader)?;

        match packet {
            Packet::ConnectionChallenge { challenge } => self.handle_challenge(challenge),
            Packet::ServerUpdate(ServerUpdate::Authenticated {
                client_id,
                server_name,
                max_clients,
            }) => self.handle_authenticated(client_id, server_name, max_clients),
            Packet::ServerUpdate(ServerUpdate::Updated { .. }) if !self.is_authenticated() => {
                debug!(?channel, "Ignoring server metadata received before authentication");
                Ok(())
            }
            other => {
                if !self.is_authenticated() {
                    return Err(ProtocolError::InvalidState(format!(
                        "{:?} received before authentication",
                        other.packet_type()
                    )));
                }
                self.handle_session(other, channel)
            }
        }
    }

    // ------------------------------------------------------------------
    // Handshake
    // ------------------------------------------------------------------

    fn handle_challenge(&self, challenge: u64) -> Result<()> {
        if self.state() != LocalClientState::Started {
            return Err(ProtocolError::InvalidState(
                "connection challenge outside of the handshake".into(),
            ));
        }
        self.metrics.handshake_attempt();

        let (username, colour) = {
            let config = read_lock(&self.config);
            (config.username.clone(), config.colour)
        };
        let packet = Packet::ChallengeAnswer {
            hash: handshake::answer_challenge(challenge),
            username,
            colour,
        };
        self.send_packet(&packet, Channel::ReliableOrdered)?;
        debug!("Challenge answered");
        Ok(())
    }

    fn handle_authenticated(
        &self,
        client_id: ClientId,
        server_name: String,
        max_clients: u32,
    ) -> Result<()> {
        if self.state() != LocalClientState::Started {
            return Err(ProtocolError::InvalidState(
                "authentication outside of the handshake".into(),
            ));
        }

        *write_lock(&self.client_id) = Some(client_id);
        *write_lock(&self.server_name) = Some(server_name.clone());
        self.max_clients.store(max_clients, Ordering::Relaxed);
        self.metrics.handshake_success();

        info!(client_id, server_name = %server_name, max_clients, "Authenticated");
        self.set_state(LocalClientState::Authenticated);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Session traffic
    // ------------------------------------------------------------------

    fn handle_session(&self, packet: Packet, channel: Channel) -> Result<()> {
        match packet {
            Packet::ServerUpdate(ServerUpdate::Updated { server_name }) => {
                *write_lock(&self.server_name) = Some(server_name.clone());
                debug!(server_name = %server_name, "Server renamed");
                self.events.emit(&ClientEvent::ServerUpdated { server_name });
                Ok(())
            }
            Packet::ClientUpdate(update) => self.handle_client_update(update),
            Packet::Data(data) => self.handle_data(data, channel),
            Packet::SpawnObject(object) => {
                self.objects.spawn(object);
                self.events.emit(&ClientEvent::ObjectSpawned(object));
                Ok(())
            }
            Packet::DespawnObject { object_id } => {
                if self.objects.despawn(object_id).is_empty() {
                    debug!(object_id, "Despawn for unknown object");
                    return Ok(());
                }
                self.events.emit(&ClientEvent::ObjectDespawned { object_id });
                Ok(())
            }
            Packet::UpdateObject(update) => {
                if self.objects.update(update).is_none() {
                    debug!(object_id = update.object_id, "Update for unknown object");
                    return Ok(());
                }
                self.events.emit(&ClientEvent::ObjectUpdated(update));
                Ok(())
            }
            other => Err(ProtocolError::MalformedPacket(format!(
                "{:?} is never sent to a client",
                other.packet_type()
            ))),
        }
    }

    fn handle_client_update(&self, update: ClientUpdate) -> Result<()> {
        let client_id = update.client_id;
        if Some(client_id) == self.client_id() {
            debug!(client_id, "Ignoring roster update about this client");
            return Ok(());
        }

        match update.kind {
            ClientUpdateKind::Connected { username, colour } => {
                let client = ClientInformation::new(client_id, username, colour);
                if !self.roster.insert(client.clone()) {
                    return Err(ProtocolError::InvalidState(format!(
                        "client {client_id} is already known"
                    )));
                }
                info!(client_id, username = %client.username, "Client connected");
                self.events.emit(&ClientEvent::RemoteClientConnected(client));
            }
            ClientUpdateKind::Disconnected => {
                let Some(client) = self.roster.remove(client_id) else {
                    debug!(client_id, "Disconnect for unknown client");
                    return Ok(());
                };
                info!(client_id, username = %client.username, "Client disconnected");
                self.events
                    .emit(&ClientEvent::RemoteClientDisconnected(client));
            }
            ClientUpdateKind::Updated { username, colour } => {
                let client = self
                    .roster
                    .update(client_id, username.as_deref(), colour)
                    .ok_or(ProtocolError::UnknownClient(client_id))?;
                debug!(client_id, username = %client.username, "Client updated");
                self.events.emit(&ClientEvent::RemoteClientUpdated(client));
            }
        }
        Ok(())
    }

    fn handle_data(&self, data: DataPacket, channel: Channel) -> Result<()> {
        let DataRoute::Forwarded { sender_id } = data.route else {
            return Err(ProtocolError::MalformedPacket(
                "clients only accept forwarded data".into(),
            ));
        };
        self.channels
            .dispatch(data, sender_id, self.current_tick(), channel);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Outbound data
    // ------------------------------------------------------------------

    pub fn send_byte_data_to_server(&self, key: &str, data: &[u8], channel: Channel) -> Result<()> {
        let packet = self.channels.byte_packet(key, data, DataRoute::ToServer);
        self.send_data(&packet, channel)
    }

    pub fn send_byte_data_to_client(
        &self,
        client_id: ClientId,
        key: &str,
        data: &[u8],
        channel: Channel,
    ) -> Result<()> {
        if !self.check_targets(&[client_id]) {
            return Ok(());
        }
        let packet = self
            .channels
            .byte_packet(key, data, DataRoute::ToClient(client_id));
        self.send_data(&packet, channel)
    }

    pub fn send_byte_data_to_clients(
        &self,
        client_ids: &[ClientId],
        key: &str,
        data: &[u8],
        channel: Channel,
    ) -> Result<()> {
        if !self.check_targets(client_ids) {
            return Ok(());
        }
        let packet = self
            .channels
            .byte_packet(key, data, DataRoute::ToClients(client_ids.to_vec()));
        self.send_data(&packet, channel)
    }

    pub fn send_struct_data_to_server<T: NetSerialize>(&self, value: &T, channel: Channel) -> Result<()> {
        let packet = self.channels.record_packet(value, DataRoute::ToServer)?;
        self.send_data(&packet, channel)
    }

    pub fn send_struct_data_to_client<T: NetSerialize>(
        &self,
        client_id: ClientId,
        value: &T,
        channel: Channel,
    ) -> Result<()> {
        if !self.check_targets(&[client_id]) {
            return Ok(());
        }
        let packet = self
            .channels
            .record_packet(value, DataRoute::ToClient(client_id))?;
        self.send_data(&packet, channel)
    }

    /// # Errors
    /// `SerializationUnsupported` or `FormatError` if `value` can't be encoded
    pub fn send_struct_data_to_clients<T: NetSerialize>(
        &self,
        client_ids: &[ClientId],
        value: &T,
        channel: Channel,
    ) -> Result<()> {
        if !self.check_targets(client_ids) {
            return Ok(());
        }
        let packet = self
            .channels
            .record_packet(value, DataRoute::ToClients(client_ids.to_vec()))?;
        self.send_data(&packet, channel)
    }

    /// Every target must be another known participant.
    fn check_targets(&self, client_ids: &[ClientId]) -> bool {
        if client_ids.is_empty() || !client_ids.iter().all(|id| self.roster.contains(*id)) {
            warn!(?client_ids, "{}", constants::ERR_INVALID_TARGETS);
            return false;
        }
        true
    }

    fn send_data(&self, packet: &Packet, channel: Channel) -> Result<()> {
        if !self.is_authenticated() {
            warn!("{}", constants::ERR_CLIENT_NOT_AUTHENTICATED);
            return Ok(());
        }
        self.send_packet(packet, channel)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn set_state(&self, state: LocalClientState) {
        *write_lock(&self.state) = state;
        info!(?state, "Client state changed");
        self.events.emit(&ClientEvent::LocalStateUpdated(state));
    }

    fn reset(&self) {
        *write_lock(&self.client_id) = None;
        *write_lock(&self.server_name) = None;
        self.max_clients.store(0, Ordering::Relaxed);
        self.roster.clear();
        self.objects.clear();
    }

    fn send_packet(&self, packet: &Packet, channel: Channel) -> Result<()> {
        let bytes = packet.encode(&mut lock(&self.writer))?;
        self.metrics.packet_sent(bytes.len());
        self.transport.send_to_server(bytes, channel);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MemoryTransport, Outbound};
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn encode(packet: &Packet) -> Vec<u8> {
        let mut writer = Writer::default();
        packet.encode(&mut writer).unwrap().to_vec()
    }

    fn started() -> (ClientSessionManager, Arc<MemoryTransport>) {
        let transport = Arc::new(MemoryTransport::new(None, 0));
        let client = ClientSessionManager::new(&NetworkConfig::default(), transport.clone());
        client.on_local_state_changed(LocalConnectionState::Started);
        (client, transport)
    }

    fn authenticate(client: &ClientSessionManager) {
        let auth = Packet::ServerUpdate(ServerUpdate::Authenticated {
            client_id: 7,
            server_name: "Arena".into(),
            max_clients: 8,
        });
        client.handle_received(&encode(&auth), Channel::ReliableOrdered);
    }

    #[test]
    fn test_challenge_answered_with_digest() {
        let (client, transport) = started();
        let challenge = Packet::ConnectionChallenge { challenge: 42 };
        client.handle_received(&encode(&challenge), Channel::ReliableOrdered);

        let sent = transport.drain();
        assert_eq!(sent.len(), 1);
        let Outbound::ToServer { data, channel } = &sent[0] else {
            panic!("expected a server-bound message");
        };
        assert_eq!(*channel, Channel::ReliableOrdered);
        let mut reader = Reader::new(data, SerializerSettings::default());
        match Packet::read(&mut reader).unwrap() {
            Packet::ChallengeAnswer { hash, username, .. } => {
                assert_eq!(hash, handshake::hash_challenge(42));
                assert_eq!(username, "Username");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_authentication_sets_identity() {
        let (client, _) = started();
        authenticate(&client);
        assert!(client.is_authenticated());
        assert_eq!(client.client_id(), Some(7));
        assert_eq!(client.server_name().as_deref(), Some("Arena"));
        assert_eq!(client.max_clients(), 8);
        assert_eq!(client.number_of_connected_clients(), 1);
    }

    #[test]
    fn test_roster_traffic_before_authentication_is_dropped() {
        let (client, _) = started();
        let update = Packet::ClientUpdate(ClientUpdate {
            client_id: 3,
            kind: ClientUpdateKind::Connected {
                username: "early".into(),
                colour: Color32::new(0, 0, 0, 255),
            },
        });
        client.handle_received(&encode(&update), Channel::ReliableOrdered);
        assert!(client.connected_clients().is_empty());
        assert_eq!(client.metrics().snapshot().protocol_violations, 1);
    }

    #[test]
    fn test_update_for_unknown_client_is_rejected() {
        let (client, _) = started();
        authenticate(&client);
        let update = Packet::ClientUpdate(ClientUpdate {
            client_id: 3,
            kind: ClientUpdateKind::Updated {
                username: Some("ghost".into()),
                colour: None,
            },
        });
        client.handle_received(&encode(&update), Channel::ReliableOrdered);
        assert!(client.client(3).is_none());
        assert_eq!(client.metrics().snapshot().protocol_violations, 1);
    }

    fn count_events(client: &ClientSessionManager) -> Arc<AtomicUsize> {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();
        client.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        seen
    }

    #[test]
    fn test_server_rename_before_authentication_is_ignored() {
        let (client, _) = started();
        let seen = count_events(&client);
        let rename = Packet::ServerUpdate(ServerUpdate::Updated {
            server_name: "Early".into(),
        });
        client.handle_received(&encode(&rename), Channel::ReliableOrdered);

        assert_eq!(client.server_name(), None);
        assert_eq!(seen.load(Ordering::SeqCst), 0);
        let snapshot = client.metrics().snapshot();
        assert_eq!(snapshot.protocol_violations, 0);
        assert_eq!(snapshot.packets_dropped, 0);
    }

    #[test]
    fn test_disconnect_for_unknown_client_is_silent() {
        let (client, _) = started();
        authenticate(&client);
        let seen = count_events(&client);
        let gone = Packet::ClientUpdate(ClientUpdate {
            client_id: 3,
            kind: ClientUpdateKind::Disconnected,
        });
        client.handle_received(&encode(&gone), Channel::ReliableOrdered);

        assert_eq!(seen.load(Ordering::SeqCst), 0);
        assert_eq!(client.metrics().snapshot().protocol_violations, 0);
        assert_eq!(client.number_of_connected_clients(), 1);
    }

    #[test]
    fn test_stop_clears_session() {
        let (client, _) = started();
        authenticate(&client);
        client.on_local_state_changed(LocalConnectionState::Stopped);
        assert_eq!(client.client_id(), None);
        assert_eq!(client.state(), LocalClientState::Stopped);
        assert!(client.apply_config(ClientConfig::default()).is_ok());
    }

    #[test]
    fn test_set_username_only_sends_when_authenticated() {
        let (client, transport) = started();
        client.set_username("Before").unwrap();
        assert!(transport.drain().is_empty());

        authenticate(&client);
        client.set_username("After").unwrap();
        let sent = transport.drain();
        assert_eq!(sent.len(), 1);
        let Outbound::ToServer { data, .. } = &sent[0] else {
            panic!("expected a server-bound message");
        };
        let mut reader = Reader::new(data, SerializerSettings::default());
        assert_eq!(
            Packet::read(&mut reader).unwrap(),
            Packet::ClientUpdate(ClientUpdate {
                client_id: 7,
                kind: ClientUpdateKind::Updated {
                    username: Some("After".into()),
                    colour: None,
                },
            })
        );
    }
}
