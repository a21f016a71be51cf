//! # Reader
//!
//! Cursor over a borrowed byte slice, the exact inverse of [`Writer`].
//!
//! Every read checks the remaining length first and fails with
//! `ProtocolError::UnexpectedEof` instead of panicking, so a truncated or
//! hostile buffer can only ever produce an error.
//!
//! [`Writer`]: crate::core::writer::Writer

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::config::SerializerSettings;
use crate::core::quaternion;
use crate::core::serialization::NetSerialize;
use crate::core::types::{Color, Color32, Matrix4x3, Quaternion, Vector2, Vector3, Vector4};
use crate::error::{constants, ProtocolError, Result};

/// Longest base-128 encoding of a `u64`
const MAX_VARINT_BYTES: usize = 10;

#[inline]
pub(crate) fn zigzag_decode(value: u64) -> i64 {
    ((value >> 1) as i64) ^ -((value & 1) as i64)
}

/// Binary reader shared by both session managers
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    data: &'a [u8],
    position: usize,
    settings: SerializerSettings,
}

impl<'a> Reader<'a> {
    pub fn new(data: &'a [u8], settings: SerializerSettings) -> Self {
        Self {
            data,
            position: 0,
            settings,
        }
    }

    pub fn settings(&self) -> &SerializerSettings {
        &self.settings
    }

    pub fn position(&self) -> usize {
        self.position
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.position
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    /// Advance the cursor by `count` bytes.
    pub fn skip(&mut self, count: usize) -> Result<()> {
        self.take(count).map(|_| ())
    }

    /// Move the cursor back by `count` bytes.
    pub fn revert(&mut self, count: usize) {
        self.position = self.position.saturating_sub(count);
    }

    #[inline]
    fn take(&mut self, count: usize) -> Result<&'a [u8]> {
        if count > self.remaining() {
            return Err(ProtocolError::UnexpectedEof {
                needed: count,
                remaining: self.remaining(),
            });
        }
        let slice = &self.data[self.position..self.position + count];
        self.position += count;
        Ok(slice)
    }

    #[inline]
    fn take_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    #[inline]
    fn take_varint(&mut self) -> Result<u64> {
        let mut value = 0u64;
        for i in 0..MAX_VARINT_BYTES {
            let byte = self.take_array::<1>()?[0];
            // the tenth byte carries only bit 63
            if i == MAX_VARINT_BYTES - 1 && byte > 1 {
                return Err(ProtocolError::MalformedVarint);
            }
            value |= ((byte & 0x7F) as u64) << (7 * i);
            if byte & 0x80 == 0 {
                return Ok(value);
            }
        }
        Err(ProtocolError::MalformedVarint)
    }

    /// A varint that must fit `T`; wider values are malformed, not truncated.
    #[inline]
    fn take_varint_as<T: TryFrom<u64>>(&mut self) -> Result<T> {
        T::try_from(self.take_varint()?).map_err(|_| ProtocolError::MalformedVarint)
    }

    /// Read any value with a codec implementation.
    pub fn read<T: NetSerialize>(&mut self) -> Result<T> {
        T::read_from(self)
    }

    // ------------------------------------------------------------------
    // Primitives
    // ------------------------------------------------------------------

    pub fn read_bool(&mut self) -> Result<bool> {
        match self.read_u8()? {
            0 => Ok(false),
            1 => Ok(true),
            _ => Err(ProtocolError::FormatError(constants::ERR_INVALID_BOOL.into())),
        }
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        Ok(self.take_array::<1>()?[0])
    }

    pub fn read_i8(&mut self) -> Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    pub fn read_u16(&mut self) -> Result<u16> {
        if self.settings.use_compression {
            self.take_varint_as::<u16>()
        } else {
            Ok(u16::from_le_bytes(self.take_array()?))
        }
    }

    pub fn read_i16(&mut self) -> Result<i16> {
        if self.settings.use_compression {
            Ok(zigzag_decode(self.take_varint_as::<u16>()?.into()) as i16)
        } else {
            Ok(i16::from_le_bytes(self.take_array()?))
        }
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        if self.settings.use_compression {
            self.take_varint_as::<u32>()
        } else {
            Ok(u32::from_le_bytes(self.take_array()?))
        }
    }

    pub fn read_i32(&mut self) -> Result<i32> {
        if self.settings.use_compression {
            Ok(zigzag_decode(self.take_varint_as::<u32>()?.into()) as i32)
        } else {
            Ok(i32::from_le_bytes(self.take_array()?))
        }
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        if self.settings.use_compression {
            self.take_varint()
        } else {
            Ok(u64::from_le_bytes(self.take_array()?))
        }
    }

    pub fn read_i64(&mut self) -> Result<i64> {
        if self.settings.use_compression {
            Ok(zigzag_decode(self.take_varint()?))
        } else {
            Ok(i64::from_le_bytes(self.take_array()?))
        }
    }

    pub fn read_f32(&mut self) -> Result<f32> {
        if self.settings.use_compression {
            let scaled = zigzag_decode(self.take_varint_as::<u32>()?.into()) as i32;
            Ok((scaled as f64 / self.settings.float_scale()) as f32)
        } else {
            Ok(f32::from_bits(u32::from_le_bytes(self.take_array()?)))
        }
    }

    pub fn read_f64(&mut self) -> Result<f64> {
        Ok(f64::from_bits(self.read_u64()?))
    }

    // ------------------------------------------------------------------
    // Vectors, rotations, colours
    // ------------------------------------------------------------------

    pub fn read_vector2(&mut self) -> Result<Vector2> {
        Ok(Vector2::new(self.read_f32()?, self.read_f32()?))
    }

    pub fn read_vector3(&mut self) -> Result<Vector3> {
        Ok(Vector3::new(self.read_f32()?, self.read_f32()?, self.read_f32()?))
    }

    pub fn read_vector4(&mut self) -> Result<Vector4> {
        Ok(Vector4::new(
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
            self.read_f32()?,
        ))
    }

    pub fn read_quaternion(&mut self) -> Result<Quaternion> {
        if self.settings.use_compression {
            let packed = self.take_varint()?;
            quaternion::unpack(packed, self.settings.bits_per_component)
        } else {
            Ok(Quaternion::new(
                self.read_f32()?,
                self.read_f32()?,
                self.read_f32()?,
                self.read_f32()?,
            ))
        }
    }

    pub fn read_matrix4x3(&mut self) -> Result<Matrix4x3> {
        let mut rows = [[0.0f32; 4]; 3];
        for row in rows.iter_mut() {
            for cell in row.iter_mut() {
                *cell = self.read_f32()?;
            }
        }
        Ok(Matrix4x3::new(rows))
    }

    pub fn read_color(&mut self) -> Result<Color> {
        let [r, g, b, a] = self.take_array::<4>()?;
        Ok(Color::new(
            r as f32 / 100.0,
            g as f32 / 100.0,
            b as f32 / 100.0,
            a as f32 / 100.0,
        ))
    }

    pub fn read_color32(&mut self) -> Result<Color32> {
        let [r, g, b, a] = self.take_array::<4>()?;
        Ok(Color32::new(r, g, b, a))
    }

    // ------------------------------------------------------------------
    // Strings, bytes, time, endpoints
    // ------------------------------------------------------------------

    pub fn read_string(&mut self) -> Result<String> {
        let len = self.read_u16()? as usize;
        if len == 0 {
            return Ok(String::new());
        }
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| ProtocolError::FormatError(constants::ERR_INVALID_UTF8.into()))
    }

    /// `count` raw bytes, borrowed from the underlying buffer
    pub fn read_bytes(&mut self, count: usize) -> Result<&'a [u8]> {
        self.take(count)
    }

    /// Bytes behind a 32-bit count prefix
    pub fn read_byte_array(&mut self) -> Result<Vec<u8>> {
        let len = self.read_count()?;
        Ok(self.take(len)?.to_vec())
    }

    /// Collection count prefix. Negative counts are rejected.
    pub fn read_count(&mut self) -> Result<usize> {
        let count = self.read_i32()?;
        usize::try_from(count)
            .map_err(|_| ProtocolError::MalformedPacket(constants::ERR_NEGATIVE_LENGTH.into()))
    }

    pub fn read_timestamp(&mut self) -> Result<SystemTime> {
        let micros = self.read_i64()?;
        let offset = Duration::from_micros(micros.unsigned_abs());
        let time = if micros >= 0 {
            UNIX_EPOCH.checked_add(offset)
        } else {
            UNIX_EPOCH.checked_sub(offset)
        };
        time.ok_or_else(|| ProtocolError::FormatError(format!("Timestamp out of range: {micros}")))
    }

    pub fn read_ip_addr(&mut self) -> Result<IpAddr> {
        match self.read_u8()? {
            4 => Ok(IpAddr::V4(Ipv4Addr::from(self.take_array::<4>()?))),
            16 => Ok(IpAddr::V6(Ipv6Addr::from(self.take_array::<16>()?))),
            other => Err(ProtocolError::FormatError(format!(
                "Invalid address length: {other}"
            ))),
        }
    }

    pub fn read_socket_addr(&mut self) -> Result<SocketAddr> {
        let ip = self.read_ip_addr()?;
        let port = self.read_u16()?;
        Ok(SocketAddr::new(ip, port))
    }

    // ------------------------------------------------------------------
    // Collections
    // ------------------------------------------------------------------

    pub fn read_vec<T: NetSerialize>(&mut self) -> Result<Vec<T>> {
        let count = self.read_count()?;
        // every element takes at least one byte
        let mut values = Vec::with_capacity(count.min(self.remaining()));
        for _ in 0..count {
            values.push(T::read_from(self)?);
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::writer::Writer;

    #[test]
    fn test_eof_is_reported() {
        let mut r = Reader::new(&[1, 2], SerializerSettings::uncompressed());
        assert!(matches!(
            r.read_u32(),
            Err(ProtocolError::UnexpectedEof {
                needed: 4,
                remaining: 2
            })
        ));
    }

    #[test]
    fn test_overlong_varint() {
        let data = [0xFFu8; 11];
        let mut r = Reader::new(&data, SerializerSettings::default());
        assert!(matches!(r.read_u64(), Err(ProtocolError::MalformedVarint)));
    }

    #[test]
    fn test_tenth_varint_byte_overflow() {
        let mut data = [0xFFu8; 10];
        data[9] = 0x01;
        let mut r = Reader::new(&data, SerializerSettings::default());
        assert_eq!(r.read_u64().unwrap(), u64::MAX);

        data[9] = 0x02;
        let mut r = Reader::new(&data, SerializerSettings::default());
        assert!(matches!(r.read_u64(), Err(ProtocolError::MalformedVarint)));
    }

    #[test]
    fn test_wide_varint_is_not_truncated() {
        let mut w = Writer::default();
        w.write_u32(65_539);
        w.write_u64(u64::from(u32::MAX) + 1);
        w.write_u64(u64::from(u32::MAX) + 1);
        w.write_u64(1 << 40);
        let bytes = w.to_vec();
        let mut r = Reader::new(&bytes, SerializerSettings::default());
        assert!(matches!(r.read_u16(), Err(ProtocolError::MalformedVarint)));
        assert!(matches!(r.read_u32(), Err(ProtocolError::MalformedVarint)));
        assert!(matches!(r.read_i32(), Err(ProtocolError::MalformedVarint)));
        assert!(matches!(r.read_f32(), Err(ProtocolError::MalformedVarint)));
    }

    #[test]
    fn test_oversized_string_prefix_is_rejected() {
        let mut w = Writer::default();
        w.write_u32(65_539);
        w.write_bytes(b"abc");
        let bytes = w.to_vec();
        let mut r = Reader::new(&bytes, SerializerSettings::default());
        assert!(matches!(r.read_string(), Err(ProtocolError::MalformedVarint)));
    }

    #[test]
    fn test_narrow_signed_bounds() {
        let mut w = Writer::default();
        w.write_i16(i16::MIN);
        w.write_i32(i32::MIN);
        w.write_u32(u32::from(u16::MAX) + 1);
        let bytes = w.to_vec();
        let mut r = Reader::new(&bytes, SerializerSettings::default());
        assert_eq!(r.read_i16().unwrap(), i16::MIN);
        assert_eq!(r.read_i32().unwrap(), i32::MIN);
        assert!(matches!(r.read_i16(), Err(ProtocolError::MalformedVarint)));
    }

    #[test]
    fn test_negative_count_rejected() {
        let mut w = Writer::default();
        w.write_i32(-1);
        let bytes = w.to_vec();
        let mut r = Reader::new(&bytes, SerializerSettings::default());
        assert!(r.read_byte_array().is_err());
    }

    #[test]
    fn test_huge_count_does_not_preallocate() {
        let mut w = Writer::default();
        w.write_i32(i32::MAX);
        let bytes = w.to_vec();
        let mut r = Reader::new(&bytes, SerializerSettings::default());
        assert!(r.read_vec::<u64>().is_err());
    }

    #[test]
    fn test_invalid_bool() {
        let mut r = Reader::new(&[2], SerializerSettings::default());
        assert!(r.read_bool().is_err());
    }

    #[test]
    fn test_zigzag_decode() {
        assert_eq!(zigzag_decode(0), 0);
        assert_eq!(zigzag_decode(1), -1);
        assert_eq!(zigzag_decode(2), 1);
        assert_eq!(zigzag_decode(u64::MAX), i64::MIN);
    }

    #[test]
    fn test_timestamp_before_epoch() {
        let mut w = Writer::default();
        let t = UNIX_EPOCH - Duration::from_secs(90);
        w.write_timestamp(t);
        let bytes = w.to_vec();
        let mut r = Reader::new(&bytes, SerializerSettings::default());
        assert_eq!(r.read_timestamp().unwrap(), t);
    }

    #[test]
    fn test_socket_addr() {
        let addr: SocketAddr = "[::1]:7777".parse().unwrap();
        let mut w = Writer::new(SerializerSettings::uncompressed());
        w.write_socket_addr(addr);
        assert_eq!(w.len(), 1 + 16 + 2);
        let bytes = w.to_vec();
        let mut r = Reader::new(&bytes, SerializerSettings::uncompressed());
        assert_eq!(r.read_socket_addr().unwrap(), addr);
    }
}
