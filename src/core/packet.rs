//! # Packet Model
//!
//! Closed set of session messages. Every message is a one-byte packet type
//! followed by a packet-specific payload encoded with the active codec
//! settings.
//!
//! ## Wire Format
//! ```text
//! [PacketType(1)] [Payload(N)]
//! ```
//!
//! | Type | Byte | Payload |
//! |---|---|---|
//! | ConnectionChallenge | 1 | `u64 challenge` |
//! | ChallengeAnswer | 2 | `hash[32]`, `string username`, `color32 colour` |
//! | ServerUpdate | 3 | `u8 kind` then the variant fields |
//! | ClientUpdate | 4 | `u32 client_id`, `u8 kind`, then `u8 fields` and the present fields |
//! | Data | 5 | `u8 route`, `bool is_record`, route operand, `u32 data_id`, `i32 len` + payload |
//! | SpawnObject | 6 | `u32 object_id`, `u8 flags`, optional parent and prefab ids |
//! | DespawnObject | 7 | `u32 object_id` |
//! | UpdateObject | 8 | `u32 object_id`, `u8 flags`, optional parent id |
//!
//! A roster update must carry identity: `Connected` needs both username and
//! colour, `Updated` at least one. Anything else decodes to
//! `ProtocolError::MalformedPacket`.

use crate::core::reader::Reader;
use crate::core::types::Color32;
use crate::core::writer::Writer;
use crate::error::{constants, ProtocolError, Result};
use crate::protocol::roster::ClientId;

/// Size of a challenge answer hash in bytes
pub const CHALLENGE_HASH_LEN: usize = 32;

/// Leading byte of every message
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    ConnectionChallenge = 1,
    ChallengeAnswer = 2,
    ServerUpdate = 3,
    ClientUpdate = 4,
    Data = 5,
    SpawnObject = 6,
    DespawnObject = 7,
    UpdateObject = 8,
}

impl TryFrom<u8> for PacketType {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(PacketType::ConnectionChallenge),
            2 => Ok(PacketType::ChallengeAnswer),
            3 => Ok(PacketType::ServerUpdate),
            4 => Ok(PacketType::ClientUpdate),
            5 => Ok(PacketType::Data),
            6 => Ok(PacketType::SpawnObject),
            7 => Ok(PacketType::DespawnObject),
            8 => Ok(PacketType::UpdateObject),
            other => Err(ProtocolError::InvalidPacketType(other)),
        }
    }
}

/// Server to client session metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerUpdate {
    /// Authentication complete: the receiver's own id and the session metadata
    Authenticated {
        client_id: ClientId,
        server_name: String,
        max_clients: u32,
    },
    /// The server was renamed
    Updated { server_name: String },
}

/// What happened to a roster member
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientUpdateKind {
    Connected { username: String, colour: Color32 },
    Disconnected,
    /// Only present fields changed
    Updated {
        username: Option<String>,
        colour: Option<Color32>,
    },
}

/// Roster change propagation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientUpdate {
    pub client_id: ClientId,
    pub kind: ClientUpdateKind,
}

/// Delivery intent of a data envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataRoute {
    ToServer,
    ToClient(ClientId),
    ToClients(Vec<ClientId>),
    /// Relayed by the server on behalf of `sender_id`
    Forwarded { sender_id: ClientId },
}

/// Application data envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPacket {
    pub route: DataRoute,
    /// Structured record rather than opaque bytes
    pub is_record: bool,
    /// FNV-1a of the byte key or the record type name
    pub data_id: u32,
    pub payload: Vec<u8>,
}

/// Session object announced to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ObjectInfo {
    pub object_id: u32,
    pub parent_id: Option<u32>,
    pub prefab_id: Option<u32>,
    pub active: bool,
}

/// Change to a live session object
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectUpdate {
    pub object_id: u32,
    pub parent_id: Option<u32>,
    pub active: bool,
}

/// One session message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    ConnectionChallenge {
        challenge: u64,
    },
    ChallengeAnswer {
        hash: [u8; CHALLENGE_HASH_LEN],
        username: String,
        colour: Color32,
    },
    ServerUpdate(ServerUpdate),
    ClientUpdate(ClientUpdate),
    Data(DataPacket),
    SpawnObject(ObjectInfo),
    DespawnObject {
        object_id: u32,
    },
    UpdateObject(ObjectUpdate),
}

const SERVER_AUTHENTICATED: u8 = 0;
const SERVER_UPDATED: u8 = 1;

const CLIENT_CONNECTED: u8 = 0;
const CLIENT_DISCONNECTED: u8 = 1;
const CLIENT_UPDATED: u8 = 2;

const FIELD_USERNAME: u8 = 0b01;
const FIELD_COLOUR: u8 = 0b10;

const ROUTE_TO_SERVER: u8 = 0;
const ROUTE_TO_CLIENT: u8 = 1;
const ROUTE_TO_CLIENTS: u8 = 2;
const ROUTE_FORWARDED: u8 = 3;

const OBJECT_HAS_PARENT: u8 = 0b001;
const OBJECT_HAS_PREFAB: u8 = 0b010;
const OBJECT_ACTIVE: u8 = 0b100;

impl Packet {
    pub fn packet_type(&self) -> PacketType {
        match self {
            Packet::ConnectionChallenge { .. } => PacketType::ConnectionChallenge,
            Packet::ChallengeAnswer { .. } => PacketType::ChallengeAnswer,
            Packet::ServerUpdate(_) => PacketType::ServerUpdate,
            Packet::ClientUpdate(_) => PacketType::ClientUpdate,
            Packet::Data(_) => PacketType::Data,
            Packet::SpawnObject(_) => PacketType::SpawnObject,
            Packet::DespawnObject { .. } => PacketType::DespawnObject,
            Packet::UpdateObject(_) => PacketType::UpdateObject,
        }
    }

    /// Append the packet type and payload to `writer`.
    ///
    /// # Errors
    /// Only string and count overflows, both caller mistakes
    pub fn write(&self, writer: &mut Writer) -> Result<()> {
        writer.write_u8(self.packet_type() as u8);
        match self {
            Packet::ConnectionChallenge { challenge } => writer.write_u64(*challenge),
            Packet::ChallengeAnswer {
                hash,
                username,
                colour,
            } => {
                writer.write_bytes(hash);
                writer.write_string(username)?;
                writer.write_color32(*colour);
            }
            Packet::ServerUpdate(update) => write_server_update(writer, update)?,
            Packet::ClientUpdate(update) => write_client_update(writer, update)?,
            Packet::Data(data) => write_data(writer, data)?,
            Packet::SpawnObject(info) => {
                let mut flags = 0;
                if info.parent_id.is_some() {
                    flags |= OBJECT_HAS_PARENT;
                }
                if info.prefab_id.is_some() {
                    flags |= OBJECT_HAS_PREFAB;
                }
                if info.active {
                    flags |= OBJECT_ACTIVE;
                }
                writer.write_u32(info.object_id);
                writer.write_u8(flags);
                if let Some(parent) = info.parent_id {
                    writer.write_u32(parent);
                }
                if let Some(prefab) = info.prefab_id {
                    writer.write_u32(prefab);
                }
            }
            Packet::DespawnObject { object_id } => writer.write_u32(*object_id),
            Packet::UpdateObject(update) => {
                let mut flags = 0;
                if update.parent_id.is_some() {
                    flags |= OBJECT_HAS_PARENT;
                }
                if update.active {
                    flags |= OBJECT_ACTIVE;
                }
                writer.write_u32(update.object_id);
                writer.write_u8(flags);
                if let Some(parent) = update.parent_id {
                    writer.write_u32(parent);
                }
            }
        }
        Ok(())
    }

    /// Decode one packet from the reader's current position.
    pub fn read(reader: &mut Reader<'_>) -> Result<Packet> {
        if reader.is_empty() {
            return Err(ProtocolError::MalformedPacket(
                constants::ERR_EMPTY_PACKET.into(),
            ));
        }

        let packet = match PacketType::try_from(reader.read_u8()?)? {
            PacketType::ConnectionChallenge => Packet::ConnectionChallenge {
                challenge: reader.read_u64()?,
            },
            PacketType::ChallengeAnswer => {
                let mut hash = [0u8; CHALLENGE_HASH_LEN];
                hash.copy_from_slice(reader.read_bytes(CHALLENGE_HASH_LEN)?);
                Packet::ChallengeAnswer {
                    hash,
                    username: reader.read_string()?,
                    colour: reader.read_color32()?,
                }
            }
            PacketType::ServerUpdate => Packet::ServerUpdate(read_server_update(reader)?),
            PacketType::ClientUpdate => Packet::ClientUpdate(read_client_update(reader)?),
            PacketType::Data => Packet::Data(read_data(reader)?),
            PacketType::SpawnObject => {
                let object_id = reader.read_u32()?;
                let flags = reader.read_u8()?;
                let parent_id = read_optional_u32(reader, flags & OBJECT_HAS_PARENT != 0)?;
                let prefab_id = read_optional_u32(reader, flags & OBJECT_HAS_PREFAB != 0)?;
                Packet::SpawnObject(ObjectInfo {
                    object_id,
                    parent_id,
                    prefab_id,
                    active: flags & OBJECT_ACTIVE != 0,
                })
            }
            PacketType::DespawnObject => Packet::DespawnObject {
                object_id: reader.read_u32()?,
            },
            PacketType::UpdateObject => {
                let object_id = reader.read_u32()?;
                let flags = reader.read_u8()?;
                let parent_id = read_optional_u32(reader, flags & OBJECT_HAS_PARENT != 0)?;
                Packet::UpdateObject(ObjectUpdate {
                    object_id,
                    parent_id,
                    active: flags & OBJECT_ACTIVE != 0,
                })
            }
        };
        Ok(packet)
    }

    /// Clear `writer`, encode into it, and copy out the message bytes.
    pub fn encode(&self, writer: &mut Writer) -> Result<bytes::Bytes> {
        writer.clear();
        self.write(writer)?;
        Ok(writer.to_bytes())
    }
}

fn read_optional_u32(reader: &mut Reader<'_>, present: bool) -> Result<Option<u32>> {
    if present {
        Ok(Some(reader.read_u32()?))
    } else {
        Ok(None)
    }
}

fn write_server_update(writer: &mut Writer, update: &ServerUpdate) -> Result<()> {
    match update {
        ServerUpdate::Authenticated {
            client_id,
            server_name,
            max_clients,
        } => {
            writer.write_u8(SERVER_AUTHENTICATED);
            writer.write_u32(*client_id);
            writer.write_string(server_name)?;
            writer.write_u32(*max_clients);
        }
        ServerUpdate::Updated { server_name } => {
            writer.write_u8(SERVER_UPDATED);
            writer.write_string(server_name)?;
        }
    }
    Ok(())
}

fn read_server_update(reader: &mut Reader<'_>) -> Result<ServerUpdate> {
    match reader.read_u8()? {
        SERVER_AUTHENTICATED => Ok(ServerUpdate::Authenticated {
            client_id: reader.read_u32()?,
            server_name: reader.read_string()?,
            max_clients: reader.read_u32()?,
        }),
        SERVER_UPDATED => Ok(ServerUpdate::Updated {
            server_name: reader.read_string()?,
        }),
        other => Err(ProtocolError::MalformedPacket(format!(
            "{}: server update {other}",
            constants::ERR_UNKNOWN_UPDATE_KIND
        ))),
    }
}

fn write_client_update(writer: &mut Writer, update: &ClientUpdate) -> Result<()> {
    writer.write_u32(update.client_id);
    match &update.kind {
        ClientUpdateKind::Connected { username, colour } => {
            writer.write_u8(CLIENT_CONNECTED);
            writer.write_u8(FIELD_USERNAME | FIELD_COLOUR);
            writer.write_string(username)?;
            writer.write_color32(*colour);
        }
        ClientUpdateKind::Disconnected => writer.write_u8(CLIENT_DISCONNECTED),
        ClientUpdateKind::Updated { username, colour } => {
            if username.is_none() && colour.is_none() {
                return Err(ProtocolError::MalformedPacket(
                    constants::ERR_UPDATED_FIELDS.into(),
                ));
            }
            let mut fields = 0;
            if username.is_some() {
                fields |= FIELD_USERNAME;
            }
            if colour.is_some() {
                fields |= FIELD_COLOUR;
            }
            writer.write_u8(CLIENT_UPDATED);
            writer.write_u8(fields);
            if let Some(username) = username {
                writer.write_string(username)?;
            }
            if let Some(colour) = colour {
                writer.write_color32(*colour);
            }
        }
    }
    Ok(())
}

fn read_client_update(reader: &mut Reader<'_>) -> Result<ClientUpdate> {
    let client_id = reader.read_u32()?;
    let kind = match reader.read_u8()? {
        CLIENT_CONNECTED => {
            let fields = reader.read_u8()?;
            if fields & (FIELD_USERNAME | FIELD_COLOUR) != FIELD_USERNAME | FIELD_COLOUR {
                return Err(ProtocolError::MalformedPacket(
                    constants::ERR_CONNECTED_FIELDS.into(),
                ));
            }
            ClientUpdateKind::Connected {
                username: reader.read_string()?,
                colour: reader.read_color32()?,
            }
        }
        CLIENT_DISCONNECTED => ClientUpdateKind::Disconnected,
        CLIENT_UPDATED => {
            let fields = reader.read_u8()?;
            if fields & (FIELD_USERNAME | FIELD_COLOUR) == 0 {
                return Err(ProtocolError::MalformedPacket(
                    constants::ERR_UPDATED_FIELDS.into(),
                ));
            }
            let username = if fields & FIELD_USERNAME != 0 {
                Some(reader.read_string()?)
            } else {
                None
            };
            let colour = if fields & FIELD_COLOUR != 0 {
                Some(reader.read_color32()?)
            } else {
                None
            };
            ClientUpdateKind::Updated { username, colour }
        }
        other => {
            return Err(ProtocolError::MalformedPacket(format!(
                "{}: client update {other}",
                constants::ERR_UNKNOWN_UPDATE_KIND
            )))
        }
    };
    Ok(ClientUpdate { client_id, kind })
}

fn write_data(writer: &mut Writer, data: &DataPacket) -> Result<()> {
    match &data.route {
        DataRoute::ToServer => {
            writer.write_u8(ROUTE_TO_SERVER);
            writer.write_bool(data.is_record);
        }
        DataRoute::ToClient(target) => {
            writer.write_u8(ROUTE_TO_CLIENT);
            writer.write_bool(data.is_record);
            writer.write_u32(*target);
        }
        DataRoute::ToClients(targets) => {
            writer.write_u8(ROUTE_TO_CLIENTS);
            writer.write_bool(data.is_record);
            writer.write_slice(targets)?;
        }
        DataRoute::Forwarded { sender_id } => {
            writer.write_u8(ROUTE_FORWARDED);
            writer.write_bool(data.is_record);
            writer.write_u32(*sender_id);
        }
    }
    writer.write_u32(data.data_id);
    writer.write_byte_array(&data.payload)
}

fn read_data(reader: &mut Reader<'_>) -> Result<DataPacket> {
    let route_byte = reader.read_u8()?;
    let is_record = reader.read_bool()?;
    let route = match route_byte {
        ROUTE_TO_SERVER => DataRoute::ToServer,
        ROUTE_TO_CLIENT => DataRoute::ToClient(reader.read_u32()?),
        ROUTE_TO_CLIENTS => DataRoute::ToClients(reader.read_vec()?),
        ROUTE_FORWARDED => DataRoute::Forwarded {
            sender_id: reader.read_u32()?,
        },
        other => {
            return Err(ProtocolError::MalformedPacket(format!(
                "{}: {other}",
                constants::ERR_UNKNOWN_ROUTE
            )))
        }
    };
    Ok(DataPacket {
        route,
        is_record,
        data_id: reader.read_u32()?,
        payload: reader.read_byte_array()?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SerializerSettings;

    fn roundtrip(packet: &Packet, settings: SerializerSettings) -> Packet {
        let mut w = Writer::new(settings);
        packet.write(&mut w).unwrap();
        let bytes = w.to_vec();
        let mut r = Reader::new(&bytes, settings);
        let decoded = Packet::read(&mut r).unwrap();
        assert!(r.is_empty(), "trailing bytes after {packet:?}");
        decoded
    }

    #[test]
    fn test_leading_type_byte() {
        let mut w = Writer::default();
        Packet::DespawnObject { object_id: 9 }.write(&mut w).unwrap();
        assert_eq!(w.as_slice(), &[7, 9]);
    }

    #[test]
    fn test_challenge_answer_layout() {
        let packet = Packet::ChallengeAnswer {
            hash: [0xAB; CHALLENGE_HASH_LEN],
            username: "ann".into(),
            colour: Color32::new(1, 2, 3, 4),
        };
        let mut w = Writer::default();
        packet.write(&mut w).unwrap();
        // type + hash + len(1) + "ann" + rgba
        assert_eq!(w.len(), 1 + 32 + 1 + 3 + 4);
        assert_eq!(roundtrip(&packet, SerializerSettings::default()), packet);
    }

    #[test]
    fn test_data_routes() {
        for route in [
            DataRoute::ToServer,
            DataRoute::ToClient(4),
            DataRoute::ToClients(vec![1, 2, 3]),
            DataRoute::Forwarded { sender_id: 0 },
        ] {
            let packet = Packet::Data(DataPacket {
                route,
                is_record: true,
                data_id: 0xDEAD_BEEF,
                payload: vec![1, 2, 3],
            });
            assert_eq!(roundtrip(&packet, SerializerSettings::uncompressed()), packet);
        }
    }

    #[test]
    fn test_connected_without_fields_is_malformed() {
        let mut w = Writer::default();
        w.write_u8(PacketType::ClientUpdate as u8);
        w.write_u32(3);
        w.write_u8(CLIENT_CONNECTED);
        w.write_u8(FIELD_USERNAME);
        w.write_string("x").unwrap();
        let bytes = w.to_vec();
        let mut r = Reader::new(&bytes, SerializerSettings::default());
        assert!(matches!(
            Packet::read(&mut r),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_updated_without_fields_is_malformed() {
        let empty = Packet::ClientUpdate(ClientUpdate {
            client_id: 1,
            kind: ClientUpdateKind::Updated {
                username: None,
                colour: None,
            },
        });
        let mut w = Writer::default();
        assert!(empty.write(&mut w).is_err());

        let bytes = [PacketType::ClientUpdate as u8, 1, CLIENT_UPDATED, 0];
        let mut r = Reader::new(&bytes, SerializerSettings::default());
        assert!(matches!(
            Packet::read(&mut r),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_partial_update_roundtrip() {
        let packet = Packet::ClientUpdate(ClientUpdate {
            client_id: 12,
            kind: ClientUpdateKind::Updated {
                username: None,
                colour: Some(Color32::new(9, 9, 9, 255)),
            },
        });
        assert_eq!(roundtrip(&packet, SerializerSettings::default()), packet);
    }

    #[test]
    fn test_unknown_type_and_empty() {
        let mut r = Reader::new(&[0x42], SerializerSettings::default());
        assert!(matches!(
            Packet::read(&mut r),
            Err(ProtocolError::InvalidPacketType(0x42))
        ));

        let mut r = Reader::new(&[], SerializerSettings::default());
        assert!(matches!(
            Packet::read(&mut r),
            Err(ProtocolError::MalformedPacket(_))
        ));
    }

    #[test]
    fn test_object_packets() {
        let spawn = Packet::SpawnObject(ObjectInfo {
            object_id: 5,
            parent_id: Some(2),
            prefab_id: None,
            active: true,
        });
        let update = Packet::UpdateObject(ObjectUpdate {
            object_id: 5,
            parent_id: None,
            active: false,
        });
        assert_eq!(roundtrip(&spawn, SerializerSettings::default()), spawn);
        assert_eq!(roundtrip(&update, SerializerSettings::default()), update);
    }
}
