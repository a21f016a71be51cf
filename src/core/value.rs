//! Closed set of built-in value kinds.
//!
//! [`BuiltinValue`] covers every type the codec encodes by hand. Written on
//! its own it carries a leading [`BuiltinKind`] byte, so a sequence of mixed
//! values (a property bag) can be decoded without knowing the types up front.

use std::time::SystemTime;

use crate::core::reader::Reader;
use crate::core::serialization::NetSerialize;
use crate::core::types::{Color, Color32, Matrix4x3, Quaternion, Vector2, Vector3, Vector4};
use crate::core::writer::Writer;
use crate::error::{ProtocolError, Result};

/// Wire tag of a built-in value
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinKind {
    Bool = 0,
    U8 = 1,
    I8 = 2,
    U16 = 3,
    I16 = 4,
    U32 = 5,
    I32 = 6,
    U64 = 7,
    I64 = 8,
    F32 = 9,
    F64 = 10,
    String = 11,
    Vector2 = 12,
    Vector3 = 13,
    Vector4 = 14,
    Quaternion = 15,
    Matrix4x3 = 16,
    Color = 17,
    Color32 = 18,
    Timestamp = 19,
}

impl TryFrom<u8> for BuiltinKind {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        Ok(match value {
            0 => BuiltinKind::Bool,
            1 => BuiltinKind::U8,
            2 => BuiltinKind::I8,
            3 => BuiltinKind::U16,
            4 => BuiltinKind::I16,
            5 => BuiltinKind::U32,
            6 => BuiltinKind::I32,
            7 => BuiltinKind::U64,
            8 => BuiltinKind::I64,
            9 => BuiltinKind::F32,
            10 => BuiltinKind::F64,
            11 => BuiltinKind::String,
            12 => BuiltinKind::Vector2,
            13 => BuiltinKind::Vector3,
            14 => BuiltinKind::Vector4,
            15 => BuiltinKind::Quaternion,
            16 => BuiltinKind::Matrix4x3,
            17 => BuiltinKind::Color,
            18 => BuiltinKind::Color32,
            19 => BuiltinKind::Timestamp,
            other => {
                return Err(ProtocolError::FormatError(format!(
                    "Unknown built-in kind: {other}"
                )))
            }
        })
    }
}

/// A value of one of the built-in kinds
#[derive(Debug, Clone, PartialEq)]
pub enum BuiltinValue {
    Bool(bool),
    U8(u8),
    I8(i8),
    U16(u16),
    I16(i16),
    U32(u32),
    I32(i32),
    U64(u64),
    I64(i64),
    F32(f32),
    F64(f64),
    String(String),
    Vector2(Vector2),
    Vector3(Vector3),
    Vector4(Vector4),
    Quaternion(Quaternion),
    Matrix4x3(Matrix4x3),
    Color(Color),
    Color32(Color32),
    Timestamp(SystemTime),
}

impl BuiltinValue {
    pub fn kind(&self) -> BuiltinKind {
        match self {
            BuiltinValue::Bool(_) => BuiltinKind::Bool,
            BuiltinValue::U8(_) => BuiltinKind::U8,
            BuiltinValue::I8(_) => BuiltinKind::I8,
            BuiltinValue::U16(_) => BuiltinKind::U16,
            BuiltinValue::I16(_) => BuiltinKind::I16,
            BuiltinValue::U32(_) => BuiltinKind::U32,
            BuiltinValue::I32(_) => BuiltinKind::I32,
            BuiltinValue::U64(_) => BuiltinKind::U64,
            BuiltinValue::I64(_) => BuiltinKind::I64,
            BuiltinValue::F32(_) => BuiltinKind::F32,
            BuiltinValue::F64(_) => BuiltinKind::F64,
            BuiltinValue::String(_) => BuiltinKind::String,
            BuiltinValue::Vector2(_) => BuiltinKind::Vector2,
            BuiltinValue::Vector3(_) => BuiltinKind::Vector3,
            BuiltinValue::Vector4(_) => BuiltinKind::Vector4,
            BuiltinValue::Quaternion(_) => BuiltinKind::Quaternion,
            BuiltinValue::Matrix4x3(_) => BuiltinKind::Matrix4x3,
            BuiltinValue::Color(_) => BuiltinKind::Color,
            BuiltinValue::Color32(_) => BuiltinKind::Color32,
            BuiltinValue::Timestamp(_) => BuiltinKind::Timestamp,
        }
    }

    /// Write the value without its kind tag.
    pub fn write_untagged(&self, writer: &mut Writer) -> Result<()> {
        match self {
            BuiltinValue::Bool(v) => writer.write_bool(*v),
            BuiltinValue::U8(v) => writer.write_u8(*v),
            BuiltinValue::I8(v) => writer.write_i8(*v),
            BuiltinValue::U16(v) => writer.write_u16(*v),
            BuiltinValue::I16(v) => writer.write_i16(*v),
            BuiltinValue::U32(v) => writer.write_u32(*v),
            BuiltinValue::I32(v) => writer.write_i32(*v),
            BuiltinValue::U64(v) => writer.write_u64(*v),
            BuiltinValue::I64(v) => writer.write_i64(*v),
            BuiltinValue::F32(v) => writer.write_f32(*v),
            BuiltinValue::F64(v) => writer.write_f64(*v),
            BuiltinValue::String(v) => writer.write_string(v)?,
            BuiltinValue::Vector2(v) => writer.write_vector2(*v),
            BuiltinValue::Vector3(v) => writer.write_vector3(*v),
            BuiltinValue::Vector4(v) => writer.write_vector4(*v),
            BuiltinValue::Quaternion(v) => writer.write_quaternion(*v)?,
            BuiltinValue::Matrix4x3(v) => writer.write_matrix4x3(v),
            BuiltinValue::Color(v) => writer.write_color(*v),
            BuiltinValue::Color32(v) => writer.write_color32(*v),
            BuiltinValue::Timestamp(v) => writer.write_timestamp(*v),
        }
        Ok(())
    }

    /// Read a value of a known kind, without a tag.
    pub fn read_untagged(kind: BuiltinKind, reader: &mut Reader<'_>) -> Result<Self> {
        Ok(match kind {
            BuiltinKind::Bool => BuiltinValue::Bool(reader.read_bool()?),
            BuiltinKind::U8 => BuiltinValue::U8(reader.read_u8()?),
            BuiltinKind::I8 => BuiltinValue::I8(reader.read_i8()?),
            BuiltinKind::U16 => BuiltinValue::U16(reader.read_u16()?),
            BuiltinKind::I16 => BuiltinValue::I16(reader.read_i16()?),
            BuiltinKind::U32 => BuiltinValue::U32(reader.read_u32()?),
            BuiltinKind::I32 => BuiltinValue::I32(reader.read_i32()?),
            BuiltinKind::U64 => BuiltinValue::U64(reader.read_u64()?),
            BuiltinKind::I64 => BuiltinValue::I64(reader.read_i64()?),
            BuiltinKind::F32 => BuiltinValue::F32(reader.read_f32()?),
            BuiltinKind::F64 => BuiltinValue::F64(reader.read_f64()?),
            BuiltinKind::String => BuiltinValue::String(reader.read_string()?),
            BuiltinKind::Vector2 => BuiltinValue::Vector2(reader.read_vector2()?),
            BuiltinKind::Vector3 => BuiltinValue::Vector3(reader.read_vector3()?),
            BuiltinKind::Vector4 => BuiltinValue::Vector4(reader.read_vector4()?),
            BuiltinKind::Quaternion => BuiltinValue::Quaternion(reader.read_quaternion()?),
            BuiltinKind::Matrix4x3 => BuiltinValue::Matrix4x3(reader.read_matrix4x3()?),
            BuiltinKind::Color => BuiltinValue::Color(reader.read_color()?),
            BuiltinKind::Color32 => BuiltinValue::Color32(reader.read_color32()?),
            BuiltinKind::Timestamp => BuiltinValue::Timestamp(reader.read_timestamp()?),
        })
    }
}

impl NetSerialize for BuiltinValue {
    const TYPE_NAME: &'static str = "BuiltinValue";

    fn write_to(&self, writer: &mut Writer) -> Result<()> {
        writer.write_u8(self.kind() as u8);
        self.write_untagged(writer)
    }

    fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
        let kind = BuiltinKind::try_from(reader.read_u8()?)?;
        Self::read_untagged(kind, reader)
    }
}

macro_rules! builtin_conversions {
    ($($variant:ident => $ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for BuiltinValue {
                fn from(value: $ty) -> Self {
                    BuiltinValue::$variant(value)
                }
            }
        )*
    };
}

builtin_conversions! {
    Bool => bool,
    U8 => u8,
    I8 => i8,
    U16 => u16,
    I16 => i16,
    U32 => u32,
    I32 => i32,
    U64 => u64,
    I64 => i64,
    F32 => f32,
    F64 => f64,
    String => String,
    Vector2 => Vector2,
    Vector3 => Vector3,
    Vector4 => Vector4,
    Quaternion => Quaternion,
    Matrix4x3 => Matrix4x3,
    Color => Color,
    Color32 => Color32,
    Timestamp => SystemTime,
}

impl From<&str> for BuiltinValue {
    fn from(value: &str) -> Self {
        BuiltinValue::String(value.to_owned())
    }
}
