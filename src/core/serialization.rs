//! # Record Serialization
//!
//! Every type that can travel through the codec implements [`NetSerialize`].
//! Resolution happens at compile time through the trait, and the codec only
//! distinguishes three strategies for bookkeeping and diagnostics:
//!
//! - **Builtin**: one of the hand-encoded kinds in [`BuiltinKind`]
//! - **Custom**: the type writes and reads itself (generic containers included)
//! - **Structural**: a plain record whose fields are written in declaration
//!   order, generated with [`net_record!`](crate::net_record)
//!
//! A structural record with no fields carries no data and refuses to encode
//! with `ProtocolError::SerializationUnsupported`. A record made only of
//! itself cannot exist in Rust, so recursion into self is ruled out by the
//! type system rather than at runtime.
//!
//! ## Registry
//! [`CodecRegistry`] remembers the strategy and dispatch hash of each record
//! type the first time it is resolved. Each session manager owns one through
//! an `Arc`; entries are inserted once and never removed.
//!
//! ## Example
//! ```rust
//! use session_protocol::net_record;
//! use session_protocol::config::SerializerSettings;
//! use session_protocol::core::{reader::Reader, writer::Writer};
//!
//! net_record! {
//!     #[derive(Debug, PartialEq)]
//!     pub struct Chat {
//!         pub text: String,
//!         pub loud: bool,
//!     }
//! }
//!
//! let mut writer = Writer::default();
//! writer.write(&Chat { text: "hi".into(), loud: true }).unwrap();
//! let bytes = writer.to_vec();
//!
//! let mut reader = Reader::new(&bytes, SerializerSettings::default());
//! let chat: Chat = reader.read().unwrap();
//! assert_eq!(chat.text, "hi");
//! ```

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hash;
use std::net::SocketAddr;
use std::sync::RwLock;
use std::time::SystemTime;

use tracing::debug;

use crate::core::reader::Reader;
use crate::core::types::{Color, Color32, Matrix4x3, Quaternion, Vector2, Vector3, Vector4};
use crate::core::value::BuiltinKind;
use crate::core::writer::Writer;
use crate::error::{ProtocolError, Result};
use crate::utils::hashing::fnv1a_32;
use crate::utils::sync::{read_lock, write_lock};

/// How a type is encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Strategy {
    Builtin(BuiltinKind),
    Custom,
    Structural { fields: usize },
}

/// Encode/decode contract shared by every type the codec can carry
pub trait NetSerialize: Sized + 'static {
    /// Stable name; its hash keys record dispatch on the wire
    const TYPE_NAME: &'static str;

    fn strategy() -> Strategy {
        Strategy::Custom
    }

    fn write_to(&self, writer: &mut Writer) -> Result<()>;

    fn read_from(reader: &mut Reader<'_>) -> Result<Self>;
}

/// Fail fast on records that would encode to nothing.
pub fn ensure_encodable<T: NetSerialize>() -> Result<()> {
    match T::strategy() {
        Strategy::Structural { fields: 0 } => Err(ProtocolError::SerializationUnsupported(
            T::TYPE_NAME.to_string(),
        )),
        _ => Ok(()),
    }
}

macro_rules! builtin_net_serialize {
    ($($ty:ty => $kind:ident, $write:ident, $read:ident);* $(;)?) => {
        $(
            impl NetSerialize for $ty {
                const TYPE_NAME: &'static str = stringify!($kind);

                fn strategy() -> Strategy {
                    Strategy::Builtin(BuiltinKind::$kind)
                }

                #[inline]
                fn write_to(&self, writer: &mut Writer) -> Result<()> {
                    writer.$write(*self);
                    Ok(())
                }

                #[inline]
                fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
                    reader.$read()
                }
            }
        )*
    };
}

builtin_net_serialize! {
    bool => Bool, write_bool, read_bool;
    u8 => U8, write_u8, read_u8;
    i8 => I8, write_i8, read_i8;
    u16 => U16, write_u16, read_u16;
    i16 => I16, write_i16, read_i16;
    u32 => U32, write_u32, read_u32;
    i32 => I32, write_i32, read_i32;
    u64 => U64, write_u64, read_u64;
    i64 => I64, write_i64, read_i64;
    f32 => F32, write_f32, read_f32;
    f64 => F64, write_f64, read_f64;
    Vector2 => Vector2, write_vector2, read_vector2;
    Vector3 => Vector3, write_vector3, read_vector3;
    Vector4 => Vector4, write_vector4, read_vector4;
    Color => Color, write_color, read_color;
    Color32 => Color32, write_color32, read_color32;
    SystemTime => Timestamp, write_timestamp, read_timestamp;
}

impl NetSerialize for String {
    const TYPE_NAME: &'static str = "String";

    fn strategy() -> Strategy {
        Strategy::Builtin(BuiltinKind::String)
    }

    fn write_to(&self, writer: &mut Writer) -> Result<()> {
        writer.write_string(self)
    }

    fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
        reader.read_string()
    }
}

impl NetSerialize for Quaternion {
    const TYPE_NAME: &'static str = "Quaternion";

    fn strategy() -> Strategy {
        Strategy::Builtin(BuiltinKind::Quaternion)
    }

    fn write_to(&self, writer: &mut Writer) -> Result<()> {
        writer.write_quaternion(*self)
    }

    fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
        reader.read_quaternion()
    }
}

impl NetSerialize for Matrix4x3 {
    const TYPE_NAME: &'static str = "Matrix4x3";

    fn strategy() -> Strategy {
        Strategy::Builtin(BuiltinKind::Matrix4x3)
    }

    fn write_to(&self, writer: &mut Writer) -> Result<()> {
        writer.write_matrix4x3(self);
        Ok(())
    }

    fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
        reader.read_matrix4x3()
    }
}

impl NetSerialize for SocketAddr {
    const TYPE_NAME: &'static str = "SocketAddr";

    fn write_to(&self, writer: &mut Writer) -> Result<()> {
        writer.write_socket_addr(*self);
        Ok(())
    }

    fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
        reader.read_socket_addr()
    }
}

impl<T: NetSerialize> NetSerialize for Vec<T> {
    const TYPE_NAME: &'static str = "Vec";

    fn write_to(&self, writer: &mut Writer) -> Result<()> {
        writer.write_slice(self)
    }

    fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
        reader.read_vec()
    }
}

impl<K, V> NetSerialize for HashMap<K, V>
where
    K: NetSerialize + Eq + Hash,
    V: NetSerialize,
{
    const TYPE_NAME: &'static str = "HashMap";

    fn write_to(&self, writer: &mut Writer) -> Result<()> {
        writer.write_map(self.len(), self.iter())
    }

    fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
        let count = reader.read_count()?;
        let mut map = HashMap::with_capacity(count.min(reader.remaining()));
        for _ in 0..count {
            let key = K::read_from(reader)?;
            let value = V::read_from(reader)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

impl<K, V> NetSerialize for BTreeMap<K, V>
where
    K: NetSerialize + Ord,
    V: NetSerialize,
{
    const TYPE_NAME: &'static str = "BTreeMap";

    fn write_to(&self, writer: &mut Writer) -> Result<()> {
        writer.write_map(self.len(), self.iter())
    }

    fn read_from(reader: &mut Reader<'_>) -> Result<Self> {
        let count = reader.read_count()?;
        let mut map = BTreeMap::new();
        for _ in 0..count {
            let key = K::read_from(reader)?;
            let value = V::read_from(reader)?;
            map.insert(key, value);
        }
        Ok(map)
    }
}

/// Declare a plain record and derive its field-by-field codec.
///
/// Fields are written in declaration order; every field type must itself
/// implement [`NetSerialize`]. A record without fields compiles but fails
/// with `SerializationUnsupported` when written or read.
#[macro_export]
macro_rules! net_record {
    (
        $(#[$meta:meta])*
        $vis:vis struct $name:ident {
            $(
                $(#[$field_meta:meta])*
                $field_vis:vis $field:ident : $ty:ty
            ),* $(,)?
        }
    ) => {
        $(#[$meta])*
        $vis struct $name {
            $(
                $(#[$field_meta])*
                $field_vis $field: $ty,
            )*
        }

        impl $crate::core::serialization::NetSerialize for $name {
            const TYPE_NAME: &'static str = stringify!($name);

            fn strategy() -> $crate::core::serialization::Strategy {
                const FIELDS: &[&str] = &[$(stringify!($field)),*];
                $crate::core::serialization::Strategy::Structural { fields: FIELDS.len() }
            }

            #[allow(unused_variables)]
            fn write_to(
                &self,
                writer: &mut $crate::core::writer::Writer,
            ) -> $crate::error::Result<()> {
                $crate::core::serialization::ensure_encodable::<Self>()?;
                $(
                    $crate::core::serialization::NetSerialize::write_to(&self.$field, writer)?;
                )*
                Ok(())
            }

            #[allow(unused_variables)]
            fn read_from(
                reader: &mut $crate::core::reader::Reader<'_>,
            ) -> $crate::error::Result<Self> {
                $crate::core::serialization::ensure_encodable::<Self>()?;
                Ok(Self {
                    $(
                        $field: <$ty as $crate::core::serialization::NetSerialize>::read_from(reader)?,
                    )*
                })
            }
        }
    };
}

/// Cached resolution of one record type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RecordInfo {
    pub type_name: &'static str,
    /// FNV-1a of `type_name`, carried as the Data packet identifier
    pub hash: u32,
    pub strategy: Strategy,
}

/// Insert-once cache of record type resolutions
#[derive(Debug, Default)]
pub struct CodecRegistry {
    entries: RwLock<HashMap<TypeId, RecordInfo>>,
}

impl CodecRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve `T`, remembering the result. Fails for records that carry no data.
    pub fn resolve<T: NetSerialize>(&self) -> Result<RecordInfo> {
        let key = TypeId::of::<T>();
        if let Some(info) = read_lock(&self.entries).get(&key) {
            return Ok(*info);
        }

        ensure_encodable::<T>()?;
        let info = RecordInfo {
            type_name: T::TYPE_NAME,
            hash: fnv1a_32(T::TYPE_NAME),
            strategy: T::strategy(),
        };

        // a racing resolver may have inserted the same entry; keep the first
        let info = *write_lock(&self.entries).entry(key).or_insert(info);
        debug!(type_name = info.type_name, hash = info.hash, strategy = ?info.strategy, "Resolved record type");
        Ok(info)
    }

    /// Find a previously resolved record by its dispatch hash
    pub fn lookup_hash(&self, hash: u32) -> Option<RecordInfo> {
        read_lock(&self.entries)
            .values()
            .find(|info| info.hash == hash)
            .copied()
    }

    pub fn len(&self) -> usize {
        read_lock(&self.entries).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Resolve `T` and append `value` to `writer`.
    pub fn encode<T: NetSerialize>(&self, value: &T, writer: &mut Writer) -> Result<RecordInfo> {
        let info = self.resolve::<T>()?;
        value.write_to(writer)?;
        Ok(info)
    }
}
