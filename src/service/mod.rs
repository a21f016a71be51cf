//! # Session Managers
//!
//! The server and client halves of a session, plus the pieces they share.
//!
//! ## Components
//! - **Server**: authoritative roster, handshake, data relay, session objects
//! - **Client**: challenge answer, roster mirror, data routed via the server
//! - **Events**: lifecycle notifications and received-data views
//!
//! Both managers are plain synchronous state machines. A transport pump
//! feeds them lifecycle changes and inbound buffers; every outbound message
//! is handed straight to the [`Transport`](crate::transport::Transport).

pub mod client;
pub mod events;
pub mod server;

pub(crate) mod channels;
pub(crate) mod objects;

pub use channels::StructCallback;
pub use client::ClientSessionManager;
pub use events::{ByteData, ClientEvent, LocalClientState, LocalServerState, ServerEvent, StructData};
pub use server::ServerSessionManager;

use crate::error::ProtocolError;

/// Errors caused by bytes that could not be decoded, as opposed to
/// well-formed messages that broke the session rules.
pub(crate) fn is_decode_error(error: &ProtocolError) -> bool {
    matches!(
        error,
        ProtocolError::UnexpectedEof { .. }
            | ProtocolError::MalformedVarint
            | ProtocolError::InvalidPacketType(_)
            | ProtocolError::FormatError(_)
    )
}
