//! # Core Codec Components
//!
//! Binary encoding shared by both peers, and the packet model built on it.
//!
//! ## Components
//! - **Writer / Reader**: growable buffer and cursor with optional compression
//! - **Types**: vectors, rotations, matrices and colours with fixed encodings
//! - **Quaternion**: smallest-three rotation packing
//! - **Value**: closed set of built-in value kinds
//! - **Serialization**: the `NetSerialize` contract and the record registry
//! - **Packet**: the session messages
//!
//! ## Compression
//! With compression on, integers become base-128 varints (zig-zag first when
//! signed), `f32` is quantized to a configured number of decimal places and
//! rotations are packed into `3 * bits + 2` bits. Both peers must use the same
//! settings.

pub mod packet;
pub mod quaternion;
pub mod reader;
pub mod serialization;
pub mod types;
pub mod value;
pub mod writer;
