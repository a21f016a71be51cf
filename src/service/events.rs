//! Notifications and received-data views raised by the session managers.

use std::time::SystemTime;

use crate::core::packet::{ObjectInfo, ObjectUpdate};
use crate::protocol::roster::{ClientId, ClientInformation};
use crate::transport::Channel;

/// Server lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalServerState {
    Starting,
    Started,
    Stopping,
    Stopped,
}

/// Client lifecycle. `Authenticated` is only reachable from `Started`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LocalClientState {
    Starting,
    Started,
    Authenticated,
    Stopping,
    Stopped,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    LocalStateUpdated(LocalServerState),
    LocalServerStarted,
    RemoteClientConnected(ClientInformation),
    RemoteClientDisconnected(ClientInformation),
    RemoteClientUpdated(ClientInformation),
    ServerUpdated { server_name: String },
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClientEvent {
    LocalStateUpdated(LocalClientState),
    RemoteClientConnected(ClientInformation),
    RemoteClientDisconnected(ClientInformation),
    RemoteClientUpdated(ClientInformation),
    ServerUpdated { server_name: String },
    ObjectSpawned(ObjectInfo),
    ObjectDespawned { object_id: u32 },
    ObjectUpdated(ObjectUpdate),
}

/// Opaque payload handed to byte-data callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct ByteData {
    pub data: Vec<u8>,
    /// Originating client, or `SERVER_CLIENT_ID` for server-sent data
    pub sender_id: ClientId,
    /// Tick of the receiving manager when the message arrived
    pub tick: u32,
    /// Wall-clock receipt time
    pub timestamp: SystemTime,
    pub channel: Channel,
}

/// Decoded record handed to struct-data callbacks
#[derive(Debug, Clone, PartialEq)]
pub struct StructData<T> {
    pub data: T,
    pub sender_id: ClientId,
    pub tick: u32,
    pub timestamp: SystemTime,
    pub channel: Channel,
}
