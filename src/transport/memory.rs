//! In-process transport.
//!
//! [`MemoryTransport`] queues everything a session manager sends instead of
//! putting it on a wire. The owner drains the queue with
//! [`MemoryTransport::drain`] and delivers each item to the peer it names,
//! which is enough to run a whole session inside one process (tests,
//! listen-server setups, replays).

use bytes::Bytes;
use std::net::SocketAddr;
use std::sync::Mutex;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tracing::trace;

use crate::protocol::roster::ClientId;
use crate::transport::{Channel, Transport};
use crate::utils::sync::lock;

/// One action requested by a session manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    ToClient {
        client_id: ClientId,
        data: Bytes,
        channel: Channel,
    },
    ToServer {
        data: Bytes,
        channel: Channel,
    },
    Disconnect {
        client_id: ClientId,
    },
}

/// Queueing transport for in-process sessions
#[derive(Debug)]
pub struct MemoryTransport {
    endpoint: Option<SocketAddr>,
    max_clients: u32,
    tx: UnboundedSender<Outbound>,
    rx: Mutex<UnboundedReceiver<Outbound>>,
}

impl MemoryTransport {
    pub fn new(endpoint: Option<SocketAddr>, max_clients: u32) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            endpoint,
            max_clients,
            tx,
            rx: Mutex::new(rx),
        }
    }

    fn push(&self, item: Outbound) {
        trace!(?item, "Queued outbound");
        // the receiver lives as long as self, so the send cannot fail
        let _ = self.tx.send(item);
    }

    /// Take everything queued so far, oldest first.
    pub fn drain(&self) -> Vec<Outbound> {
        let mut rx = lock(&self.rx);
        let mut items = Vec::new();
        while let Ok(item) = rx.try_recv() {
            items.push(item);
        }
        items
    }

    /// Whether anything is waiting to be drained
    pub fn has_pending(&self) -> bool {
        !lock(&self.rx).is_empty()
    }
}

impl Transport for MemoryTransport {
    fn send_to_client(&self, client_id: ClientId, data: Bytes, channel: Channel) {
        self.push(Outbound::ToClient {
            client_id,
            data,
            channel,
        });
    }

    fn send_to_server(&self, data: Bytes, channel: Channel) {
        self.push(Outbound::ToServer { data, channel });
    }

    fn disconnect_client(&self, client_id: ClientId) {
        self.push(Outbound::Disconnect { client_id });
    }

    fn server_endpoint(&self) -> Option<SocketAddr> {
        self.endpoint
    }

    fn max_clients(&self) -> u32 {
        self.max_clients
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_drain_preserves_order() {
        let transport = MemoryTransport::new(None, 4);
        transport.send_to_server(Bytes::from_static(b"a"), Channel::ReliableOrdered);
        transport.disconnect_client(3);
        assert!(transport.has_pending());

        let items = transport.drain();
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Outbound::Disconnect { client_id: 3 }));
        assert!(transport.drain().is_empty());
    }
}
