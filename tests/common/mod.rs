//! In-process session harness: one server and several clients wired through
//! `MemoryTransport`s, pumped until no message is in flight.

#![allow(dead_code, clippy::expect_used, clippy::unwrap_used)]

use std::sync::Arc;

use session_protocol::config::NetworkConfig;
use session_protocol::core::packet::Packet;
use session_protocol::core::reader::Reader;
use session_protocol::core::types::Color32;
use session_protocol::protocol::roster::ClientId;
use session_protocol::service::{ClientSessionManager, ServerSessionManager};
use session_protocol::transport::{
    Channel, LocalConnectionState, MemoryTransport, Outbound, RemoteConnectionState,
};

pub struct Peer {
    pub id: ClientId,
    pub manager: ClientSessionManager,
    pub transport: Arc<MemoryTransport>,
    /// Every packet delivered to this client, in arrival order
    pub received: Vec<Packet>,
    pub connected: bool,
}

pub struct Harness {
    pub config: NetworkConfig,
    pub server: ServerSessionManager,
    pub server_transport: Arc<MemoryTransport>,
    pub peers: Vec<Peer>,
    next_id: ClientId,
}

impl Harness {
    pub fn new(max_clients: u32) -> Self {
        Self::with_config(NetworkConfig::default(), max_clients)
    }

    pub fn with_config(config: NetworkConfig, max_clients: u32) -> Self {
        let server_transport = Arc::new(MemoryTransport::new(
            Some("127.0.0.1:7777".parse().unwrap()),
            max_clients,
        ));
        let server = ServerSessionManager::new(&config, server_transport.clone());
        server.on_local_state_changed(LocalConnectionState::Starting);
        server.on_local_state_changed(LocalConnectionState::Started);
        Self {
            config,
            server,
            server_transport,
            peers: Vec::new(),
            next_id: 1,
        }
    }

    /// Connect a new client and run the handshake to completion.
    pub fn connect(&mut self, username: &str, colour: Color32) -> ClientId {
        let id = self.next_id;
        self.next_id += 1;

        let mut config = self.config.clone();
        config.client.username = username.to_string();
        config.client.colour = colour;

        let transport = Arc::new(MemoryTransport::new(None, 0));
        let manager = ClientSessionManager::new(&config, transport.clone());
        manager.on_local_state_changed(LocalConnectionState::Starting);
        manager.on_local_state_changed(LocalConnectionState::Started);

        self.peers.push(Peer {
            id,
            manager,
            transport,
            received: Vec::new(),
            connected: true,
        });
        self.server
            .on_remote_connection_changed(id, RemoteConnectionState::Connected);
        self.pump();
        id
    }

    /// Close a client's connection from its side.
    pub fn disconnect(&mut self, id: ClientId) {
        let peer = self.peer_mut(id);
        peer.connected = false;
        peer.manager
            .on_local_state_changed(LocalConnectionState::Stopped);
        self.server
            .on_remote_connection_changed(id, RemoteConnectionState::Disconnected);
        self.pump();
    }

    pub fn peer(&self, id: ClientId) -> &Peer {
        self.peers
            .iter()
            .find(|p| p.id == id)
            .expect("unknown peer")
    }

    pub fn peer_mut(&mut self, id: ClientId) -> &mut Peer {
        self.peers
            .iter_mut()
            .find(|p| p.id == id)
            .expect("unknown peer")
    }

    pub fn client(&self, id: ClientId) -> &ClientSessionManager {
        &self.peer(id).manager
    }

    /// Forget what every client has received so far.
    pub fn clear_received(&mut self) {
        for peer in &mut self.peers {
            peer.received.clear();
        }
    }

    /// Deliver queued messages in both directions until nothing is left.
    pub fn pump(&mut self) {
        let settings = self.config.serializer;
        while self.server_transport.has_pending()
            || self.peers.iter().any(|p| p.transport.has_pending())
        {
            for item in self.server_transport.drain() {
                match item {
                    Outbound::ToClient {
                        client_id,
                        data,
                        channel,
                    } => {
                        let Some(peer) = self
                            .peers
                            .iter_mut()
                            .find(|p| p.id == client_id && p.connected)
                        else {
                            continue;
                        };
                        let mut reader = Reader::new(&data, settings);
                        peer.received.push(Packet::read(&mut reader).unwrap());
                        peer.manager.handle_received(&data, channel);
                    }
                    Outbound::Disconnect { client_id } => {
                        if let Some(peer) = self
                            .peers
                            .iter_mut()
                            .find(|p| p.id == client_id && p.connected)
                        {
                            peer.connected = false;
                            peer.manager.on_transport_disposed();
                        }
                        self.server.on_remote_connection_changed(
                            client_id,
                            RemoteConnectionState::Disconnected,
                        );
                    }
                    Outbound::ToServer { .. } => unreachable!("server never sends to a server"),
                }
            }

            for peer in &self.peers {
                for item in peer.transport.drain() {
                    if let Outbound::ToServer { data, channel } = item {
                        if peer.connected {
                            self.server.handle_received(peer.id, &data, channel);
                        }
                    }
                }
            }
        }
    }

    /// Packets of one client matching `filter`
    pub fn received_matching<F>(&self, id: ClientId, filter: F) -> Vec<&Packet>
    where
        F: Fn(&Packet) -> bool,
    {
        self.peer(id).received.iter().filter(|p| filter(*p)).collect()
    }
}

pub fn colour(seed: u8) -> Color32 {
    Color32::new(seed, seed.wrapping_mul(3), seed.wrapping_mul(7), 255)
}

/// Non-default channel, for checking that relays keep the arrival channel
pub const TEST_CHANNEL: Channel = Channel::UnreliableOrdered;
