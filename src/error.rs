//! # Error Types
//!
//! Error handling for the session protocol.
//!
//! This module defines every error variant that can occur while encoding or
//! decoding messages and while driving a session.
//!
//! ## Error Categories
//! - **Serialization Errors**: string length overflow, unsupported record types
//! - **Decode Errors**: truncated buffers, malformed varints, unknown packet tags
//! - **Protocol Errors**: malformed roster updates, unknown client ids, invalid state
//! - **Configuration Errors**: unreadable or invalid configuration
//!
//! Inbound protocol and decode errors are logged and swallowed at the session
//! manager's dispatch boundary. Serialization errors are returned to the caller
//! that invoked the write, because they indicate a mistake in message design.
//!
//! ## Example Usage
//! ```rust
//! use session_protocol::core::writer::Writer;
//! use session_protocol::error::{ProtocolError, Result};
//!
//! fn encode_name(name: &str) -> Result<Vec<u8>> {
//!     let mut writer = Writer::default();
//!     writer.write_string(name)?;
//!     Ok(writer.to_vec())
//! }
//!
//! let oversized = "x".repeat(70_000);
//! assert!(matches!(encode_name(&oversized), Err(ProtocolError::FormatError(_))));
//! ```

use std::io;
use thiserror::Error;

use crate::protocol::roster::ClientId;

/// Static message constants, borrowed instead of allocated on hot error paths.
pub mod constants {
    /// Codec errors
    pub const ERR_STRING_TOO_LONG: &str = "String exceeds 65535 UTF-8 bytes";
    pub const ERR_NEGATIVE_LENGTH: &str = "Negative length prefix";
    pub const ERR_INVALID_UTF8: &str = "String payload is not valid UTF-8";
    pub const ERR_INVALID_BOOL: &str = "Boolean byte must be 0 or 1";

    /// Packet errors
    pub const ERR_EMPTY_PACKET: &str = "Packet contains no type tag";
    pub const ERR_CONNECTED_FIELDS: &str =
        "Connected roster update must carry both username and colour";
    pub const ERR_UPDATED_FIELDS: &str =
        "Updated roster update must carry a username or a colour";
    pub const ERR_UNKNOWN_UPDATE_KIND: &str = "Unknown update kind";
    pub const ERR_UNKNOWN_ROUTE: &str = "Unknown data routing mode";

    /// Session precondition messages
    pub const ERR_SERVER_NOT_STARTED: &str = "The local server must be started first";
    pub const ERR_CLIENT_NOT_AUTHENTICATED: &str = "The local client must be authenticated first";
    pub const ERR_INVALID_TARGETS: &str = "Target client ids must all be connected";
    pub const ERR_SESSION_ACTIVE: &str =
        "Configuration can't be changed while a session is active";
}

/// ProtocolError is the primary error type for all codec and session operations
#[derive(Error, Debug)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Format error: {0}")]
    FormatError(String),

    #[error("Serialization not supported for type {0}: it declares no fields to write")]
    SerializationUnsupported(String),

    #[error("Unexpected end of buffer: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },

    #[error("Malformed variable-length integer")]
    MalformedVarint,

    #[error("Invalid packet type: {0}")]
    InvalidPacketType(u8),

    #[error("Malformed packet: {0}")]
    MalformedPacket(String),

    #[error("Unknown client: {0}")]
    UnknownClient(ClientId),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),
}

/// Type alias for Results using ProtocolError
pub type Result<T> = std::result::Result<T, ProtocolError>;
