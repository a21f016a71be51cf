//! # Writer
//!
//! Growable byte buffer with a write cursor.
//!
//! `position` is where the next byte lands; `length` is the high-water mark of
//! everything written so far. The cursor may be moved backward with
//! [`Writer::revert`] or [`Writer::set_position`] to patch a placeholder, and
//! the produced buffer is always the first `length` bytes regardless of where
//! the cursor sits.
//!
//! Multi-byte values honour the active [`SerializerSettings`]:
//! - compression **off**: fixed-width little-endian integers, raw IEEE-754 floats
//! - compression **on**: base-128 varints, zig-zag for signed integers, and
//!   `f32` quantized to `decimal_places` decimal places (lossy)
//!
//! The backing storage grows geometrically and is only released when the
//! writer is dropped, so one writer can be [`Writer::clear`]ed and reused for
//! many small messages.

use bytes::Bytes;
use std::net::{IpAddr, SocketAddr};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::SerializerSettings;
use crate::core::quaternion;
use crate::core::serialization::NetSerialize;
use crate::core::types::{Color, Color32, Matrix4x3, Quaternion, Vector2, Vector3, Vector4};
use crate::error::{constants, ProtocolError, Result};

/// Initial capacity of a fresh writer
const DEFAULT_CAPACITY: usize = 32;

/// Zig-zag map a signed value of `BITS` width onto an unsigned one.
/// See <https://protobuf.dev/programming-guides/encoding/>.
#[inline]
pub(crate) fn zigzag_encode_i64(value: i64) -> u64 {
    ((value >> 63) ^ (value << 1)) as u64
}

#[inline]
pub(crate) fn zigzag_encode_i32(value: i32) -> u64 {
    ((value >> 31) ^ (value << 1)) as u32 as u64
}

#[inline]
pub(crate) fn zigzag_encode_i16(value: i16) -> u64 {
    ((value >> 15) ^ (value << 1)) as u16 as u64
}

/// Binary writer shared by both session managers
#[derive(Debug, Clone)]
pub struct Writer {
    buffer: Vec<u8>,
    position: usize,
    length: usize,
    settings: SerializerSettings,
}

impl Default for Writer {
    fn default() -> Self {
        Self::new(SerializerSettings::default())
    }
}

impl Writer {
    pub fn new(settings: SerializerSettings) -> Self {
        Self::with_capacity(settings, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(settings: SerializerSettings, capacity: usize) -> Self {
        Self {
            buffer: vec![0; capacity.max(1)],
            position: 0,
            length: 0,
            settings,
        }
    }

    pub fn settings(&self) -> &SerializerSettings {
        &self.settings
    }

    /// Current cursor
    pub fn position(&self) -> usize {
        self.position
    }

    /// Number of meaningful bytes
    pub fn len(&self) -> usize {
        self.length
    }

    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Size of the backing storage
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Move the cursor without touching `length`. Used to patch bytes that
    /// were already written; writes past the old high-water mark extend it.
    pub fn set_position(&mut self, position: usize) {
        if position > self.buffer.len() {
            self.reserve(position - self.position.min(position));
        }
        self.position = position;
    }

    /// Advance the cursor by `count` bytes. Skipped bytes past the current
    /// length are zeroed, so a reused buffer never leaks an older message.
    pub fn skip(&mut self, count: usize) {
        self.reserve(count);
        let end = self.position + count;
        let gap_start = self.position.max(self.length).min(end);
        self.buffer[gap_start..end].fill(0);
        self.position = end;
        self.length = self.length.max(self.position);
    }

    /// Move the cursor back by `count` bytes. `length` is unchanged.
    pub fn revert(&mut self, count: usize) {
        self.position = self.position.saturating_sub(count);
    }

    /// Reset cursor and length, keeping the allocation.
    pub fn clear(&mut self) {
        self.position = 0;
        self.length = 0;
    }

    /// The written bytes, `0..length`
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer[..self.length]
    }

    pub fn to_vec(&self) -> Vec<u8> {
        self.as_slice().to_vec()
    }

    /// Copy the written bytes into a cheaply clonable buffer for sending.
    pub fn to_bytes(&self) -> Bytes {
        Bytes::copy_from_slice(self.as_slice())
    }

    fn reserve(&mut self, additional: usize) {
        let required = self.position + additional;
        if required > self.buffer.len() {
            let grown = (self.buffer.len() * 2).max(required);
            self.buffer.resize(grown, 0);
        }
    }

    #[inline]
    fn put(&mut self, bytes: &[u8]) {
        self.reserve(bytes.len());
        self.buffer[self.position..self.position + bytes.len()].copy_from_slice(bytes);
        self.position += bytes.len();
        self.length = self.length.max(self.position);
    }

    /// 7-bit groups, least significant first, continuation bit on all but the last.
    #[inline]
    fn put_varint(&mut self, mut value: u64) {
        self.reserve(10);
        loop {
            let mut byte = (value & 0x7F) as u8;
            value >>= 7;
            if value > 0 {
                byte |= 0x80;
            }
            self.buffer[self.position] = byte;
            self.position += 1;
            if value == 0 {
                break;
            }
        }
        self.length = self.length.max(self.position);
    }

    /// Write any value with a codec implementation.
    pub fn write<T: NetSerialize>(&mut self, value: &T) -> Result<()> {
        value.write_to(self)
    }

    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    #[inline]
    pub fn write_bool(&mut self, value: bool) {
        self.put(&[value as u8]);
    }

    #[inline]
    pub fn write_u8(&mut self, value: u8) {
        self.put(&[value]);
    }

    #[inline]
    pub fn write_i8(&mut self, value: i8) {
        self.put(&[value as u8]);
    }

    #[inline]
    pub fn write_u16(&mut self, value: u16) {
        if self.settings.use_compression {
            self.put_varint(value as u64);
        } else {
            self.put(&value.to_le_bytes());
        }
    }

    #[inline]
    pub fn write_i16(&mut self, value: i16) {
        if self.settings.use_compression {
            self.put_varint(zigzag_encode_i16(value));
        } else {
            self.put(&value.to_le_bytes());
        }
    }

    #[inline]
    pub fn write_u32(&mut self, value: u32) {
        if self.settings.use_compression {
            self.put_varint(value as u64);
        } else {
            self.put(&value.to_le_bytes());
        }
    }

    #[inline]
    pub fn write_i32(&mut self, value: i32) {
        if self.settings.use_compression {
            self.put_varint(zigzag_encode_i32(value));
        } else {
            self.put(&value.to_le_bytes());
        }
    }

    #[inline]
    pub fn write_u64(&mut self, value: u64) {
        if self.settings.use_compression {
            self.put_varint(value);
        } else {
            self.put(&value.to_le_bytes());
        }
    }

    #[inline]
    pub fn write_i64(&mut self, value: i64) {
        if self.settings.use_compression {
            self.put_varint(zigzag_encode_i64(value));
        } else {
            self.put(&value.to_le_bytes());
        }
    }

    /// Raw IEEE-754 when uncompressed; otherwise `round(value * 10^decimal_places)`
    /// zig-zag varint encoded. Values beyond the `i32` range saturate.
    #[inline]
    pub fn write_f32(&mut self, value: f32) {
        if self.settings.use_compression {
            let scaled = (value as f64 * self.settings.float_scale()).round() as i32;
            self.put_varint(zigzag_encode_i32(scaled));
        } else {
            self.put(&value.to_bits().to_le_bytes());
        }
    }

    /// Bit pattern through the `u64` path; never quantized.
    #[inline]
    pub fn write_f64(&mut self, value: f64) {
        self.write_u64(value.to_bits());
    }

    // ------------------------------------------------------------------
    // Vectors, rotations, colours
    // ------------------------------------------------------------------

    pub fn write_vector2(&mut self, value: Vector2) {
        self.write_f32(value.x);
        self.write_f32(value.y);
    }

    pub fn write_vector3(&mut self, value: Vector3) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
    }

    pub fn write_vector4(&mut self, value: Vector4) {
        self.write_f32(value.x);
        self.write_f32(value.y);
        self.write_f32(value.z);
        self.write_f32(value.w);
    }

    /// Smallest-three packed varint when compressed, four floats otherwise.
    pub fn write_quaternion(&mut self, value: Quaternion) -> Result<()> {
        if self.settings.use_compression {
            let bits = self.settings.bits_per_component;
            self.reserve(quaternion::packed_bytes(bits));
            let packed = quaternion::pack(value, bits)?;
            self.put_varint(packed);
        } else {
            self.write_f32(value.x);
            self.write_f32(value.y);
            self.write_f32(value.z);
            self.write_f32(value.w);
        }
        Ok(())
    }

    pub fn write_matrix4x3(&mut self, value: &Matrix4x3) {
        for row in &value.rows {
            for &cell in row {
                self.write_f32(cell);
            }
        }
    }

    pub fn write_color(&mut self, value: Color) {
        for channel in [value.r, value.g, value.b, value.a] {
            self.write_u8((channel * 100.0) as u8);
        }
    }

    pub fn write_color32(&mut self, value: Color32) {
        self.put(&[value.r, value.g, value.b, value.a]);
    }

    // ------------------------------------------------------------------
    // Strings, bytes, time, endpoints
    // ------------------------------------------------------------------

    /// UTF-8 bytes behind a 16-bit length prefix. An empty string is just
    /// the zero prefix: one byte compressed, two bytes fixed-width, so reads
    /// stay symmetric in both modes.
    ///
    /// # Errors
    /// Returns `ProtocolError::FormatError` if the string exceeds 65535 bytes
    pub fn write_string(&mut self, value: &str) -> Result<()> {
        let len = u16::try_from(value.len())
            .map_err(|_| ProtocolError::FormatError(constants::ERR_STRING_TOO_LONG.into()))?;
        self.write_u16(len);
        if len > 0 {
            self.put(value.as_bytes());
        }
        Ok(())
    }

    /// Raw bytes without a prefix
    pub fn write_bytes(&mut self, value: &[u8]) {
        self.put(value);
    }

    /// Bytes behind a 32-bit count prefix
    pub fn write_byte_array(&mut self, value: &[u8]) -> Result<()> {
        self.write_count(value.len())?;
        self.put(value);
        Ok(())
    }

    /// Collection count prefix shared by every sequence writer
    pub fn write_count(&mut self, count: usize) -> Result<()> {
        let count = i32::try_from(count).map_err(|_| {
            ProtocolError::FormatError(format!("Collection too large: {count} elements"))
        })?;
        self.write_i32(count);
        Ok(())
    }

    /// Signed microseconds relative to the UNIX epoch
    pub fn write_timestamp(&mut self, value: SystemTime) {
        let micros = match value.duration_since(UNIX_EPOCH) {
            Ok(after) => i64::try_from(after.as_micros()).unwrap_or(i64::MAX),
            Err(before) => -i64::try_from(before.duration().as_micros()).unwrap_or(i64::MAX),
        };
        self.write_i64(micros);
    }

    pub fn write_ip_addr(&mut self, value: IpAddr) {
        match value {
            IpAddr::V4(v4) => {
                self.write_u8(4);
                self.put(&v4.octets());
            }
            IpAddr::V6(v6) => {
                self.write_u8(16);
                self.put(&v6.octets());
            }
        }
    }

    pub fn write_socket_addr(&mut self, value: SocketAddr) {
        self.write_ip_addr(value.ip());
        self.write_u16(value.port());
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    /// Count prefix then each element. An absent collection is written as
    /// an empty one; the two are indistinguishable on the wire.
    pub fn write_slice<T: NetSerialize>(&mut self, values: &[T]) -> Result<()> {
        self.write_count(values.len())?;
        for value in values {
            value.write_to(self)?;
        }
        Ok(())
    }

    /// Key-unique mapping as count then alternating key and value
    pub fn write_map<'a, K, V, I>(&mut self, len: usize, entries: I) -> Result<()>
    where
        K: NetSerialize + 'a,
        V: NetSerialize + 'a,
        I: IntoIterator<Item = (&'a K, &'a V)>,
    {
        self.write_count(len)?;
        for (key, value) in entries {
            key.write_to(self)?;
            value.write_to(self)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw() -> Writer {
        Writer::new(SerializerSettings::uncompressed())
    }

    #[test]
    fn test_fixed_width_little_endian() {
        let mut w = raw();
        w.write_u16(0x0102);
        w.write_u32(0x0304_0506);
        assert_eq!(w.as_slice(), &[0x02, 0x01, 0x06, 0x05, 0x04, 0x03]);
    }

    #[test]
    fn test_varint_bytes() {
        let mut w = Writer::default();
        w.write_u32(300);
        assert_eq!(w.as_slice(), &[0xAC, 0x02]);

        w.clear();
        w.write_u64(0);
        assert_eq!(w.as_slice(), &[0x00]);
    }

    #[test]
    fn test_zigzag() {
        assert_eq!(zigzag_encode_i32(0), 0);
        assert_eq!(zigzag_encode_i32(-1), 1);
        assert_eq!(zigzag_encode_i32(1), 2);
        assert_eq!(zigzag_encode_i32(-2), 3);
        assert_eq!(zigzag_encode_i16(i16::MIN), u16::MAX as u64);
        assert_eq!(zigzag_encode_i64(i64::MIN), u64::MAX);
    }

    #[test]
    fn test_growth_doubles() {
        let mut w = Writer::with_capacity(SerializerSettings::uncompressed(), 4);
        w.write_u64(1);
        assert!(w.capacity() >= 8);
        assert_eq!(w.len(), 8);
    }

    #[test]
    fn test_revert_keeps_length() {
        let mut w = raw();
        w.write_u32(0);
        w.write_u32(7);
        w.revert(8);
        w.write_u32(42);
        assert_eq!(w.position(), 4);
        assert_eq!(w.len(), 8);
        assert_eq!(&w.as_slice()[..4], &42u32.to_le_bytes());
        assert_eq!(&w.as_slice()[4..], &7u32.to_le_bytes());
    }

    #[test]
    fn test_skip_then_patch() {
        let mut w = raw();
        w.skip(2);
        w.write_u8(9);
        w.set_position(0);
        w.write_u16(0xBEEF);
        assert_eq!(w.as_slice(), &[0xEF, 0xBE, 9]);
    }

    #[test]
    fn test_skip_after_clear_zeroes_gap() {
        let mut w = Writer::default();
        w.write_bytes(&[0xAA; 16]);
        w.clear();
        w.skip(2);
        w.write_u8(9);
        assert_eq!(w.to_vec(), vec![0, 0, 9]);
    }

    #[test]
    fn test_empty_string_is_two_bytes_uncompressed() {
        let mut w = Writer::new(SerializerSettings::uncompressed());
        w.write_string("").unwrap();
        assert_eq!(w.to_vec(), vec![0, 0]);
    }

    #[test]
    fn test_clear_keeps_capacity() {
        let mut w = Writer::default();
        w.write_bytes(&[1u8; 100]);
        let capacity = w.capacity();
        w.clear();
        assert!(w.is_empty());
        assert_eq!(w.capacity(), capacity);
    }

    #[test]
    fn test_empty_string_is_single_byte_when_compressed() {
        let mut w = Writer::default();
        w.write_string("").unwrap();
        assert_eq!(w.as_slice(), &[0]);
    }

    #[test]
    fn test_string_too_long() {
        let mut w = Writer::default();
        let long = "a".repeat(u16::MAX as usize + 1);
        assert!(matches!(
            w.write_string(&long),
            Err(ProtocolError::FormatError(_))
        ));
        // exactly at the cap is fine
        assert!(w.write_string(&long[1..]).is_ok());
    }

    #[test]
    fn test_compressed_float_is_quantized() {
        let mut w = Writer::default();
        w.write_f32(1.5);
        // 1500 zig-zagged = 3000 -> two varint bytes
        assert_eq!(w.as_slice(), &[0xB8, 0x17]);
    }
}
