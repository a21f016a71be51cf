//! # Transport Boundary
//!
//! The session managers never touch sockets. A [`Transport`] moves opaque
//! message buffers between endpoints and reports lifecycle changes; the
//! managers are driven by whoever owns the transport, calling their
//! `on_*` and `handle_received` entry points from its per-tick pump.
//!
//! ## Channels
//! Each send names a [`Channel`]. Only the channel governs ordering and
//! delivery guarantees between two peers; the post-authentication burst
//! always uses [`Channel::ReliableOrdered`].

pub mod memory;

use bytes::Bytes;
use std::fmt;
use std::net::SocketAddr;

use crate::protocol::roster::ClientId;

pub use memory::{MemoryTransport, Outbound};

/// Delivery guarantees of a send
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Channel {
    UnreliableUnordered = 0,
    UnreliableOrdered = 1,
    ReliableUnordered = 2,
    #[default]
    ReliableOrdered = 3,
}

/// Lifecycle of the local endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalConnectionState {
    Starting,
    Started,
    Stopping,
    Stopped,
}

impl fmt::Display for LocalConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LocalConnectionState::Starting => "starting",
            LocalConnectionState::Started => "started",
            LocalConnectionState::Stopping => "stopping",
            LocalConnectionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Transport-level state of one remote peer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemoteConnectionState {
    Connected,
    Disconnected,
}

/// Byte mover consumed by the session managers
pub trait Transport: Send + Sync {
    /// Server side: deliver `data` to one connected client.
    fn send_to_client(&self, client_id: ClientId, data: Bytes, channel: Channel);

    /// Client side: deliver `data` to the server.
    fn send_to_server(&self, data: Bytes, channel: Channel);

    /// Server side: drop a remote connection.
    fn disconnect_client(&self, client_id: ClientId);

    /// Listen endpoint once started
    fn server_endpoint(&self) -> Option<SocketAddr>;

    /// Capacity once started
    fn max_clients(&self) -> u32;
}
