//! # Session Protocol
//!
//! Building blocks shared by the server and client session managers.
//!
//! ## Components
//! - **Handshake**: challenge issuing, hashing and verification
//! - **Dispatcher**: callback tables keyed by data identifier, and event listeners
//! - **Roster**: participant identities and the thread-safe roster map

pub mod dispatcher;
pub mod handshake;
pub mod roster;
