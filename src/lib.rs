//! # Session Protocol
//!
//! Application-layer session protocol for small real-time sessions: one
//! server, many clients, driven over any message transport.
//!
//! ## Features
//! - Challenge/response authentication on connect
//! - Roster synchronization of usernames and colours
//! - Byte and record data channels relayed through the server
//! - Session object spawn, update and despawn propagation
//! - Compact binary codec with varints, float quantization and packed rotations
//!
//! ## Modules
//! - [`core`]: writer, reader, value types, record serialization and packets
//! - [`protocol`]: handshake, callback dispatch and the roster
//! - [`service`]: the server and client session managers
//! - [`transport`]: the transport boundary and an in-memory transport
//! - [`config`]: TOML and environment configuration
//! - [`utils`]: hashing, logging, metrics and lock helpers
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use session_protocol::config::NetworkConfig;
//! use session_protocol::service::ServerSessionManager;
//! use session_protocol::transport::{LocalConnectionState, MemoryTransport};
//!
//! let transport = Arc::new(MemoryTransport::new(None, 16));
//! let server = ServerSessionManager::new(&NetworkConfig::default(), transport);
//! server.on_local_state_changed(LocalConnectionState::Started);
//! assert!(server.is_active());
//! assert_eq!(server.max_clients(), 16);
//! ```

pub mod config;
pub mod core;
pub mod error;
pub mod protocol;
pub mod service;
pub mod transport;
pub mod utils;

pub use config::NetworkConfig;
pub use crate::core::packet::Packet;
pub use crate::core::reader::Reader;
pub use crate::core::serialization::{CodecRegistry, NetSerialize};
pub use crate::core::writer::Writer;
pub use error::{ProtocolError, Result};
pub use protocol::roster::{ClientId, ClientInformation};
pub use service::{ClientSessionManager, ServerSessionManager};
pub use transport::{Channel, Transport};
