//! Application data registration and delivery, shared by both managers.
//!
//! Byte channels are keyed by the FNV-1a hash of a user-chosen string;
//! record channels by the hash of the record's type name. The two live in
//! separate tables, selected by the Data packet's `is_record` flag.

use std::sync::Arc;
use std::time::SystemTime;

use tracing::{debug, warn};

use crate::config::SerializerSettings;
use crate::core::packet::{DataPacket, DataRoute, Packet};
use crate::core::reader::Reader;
use crate::core::serialization::{CodecRegistry, NetSerialize};
use crate::core::writer::Writer;
use crate::error::Result;
use crate::protocol::dispatcher::{callback_identity, Callback, CallbackId, CallbackTable};
use crate::protocol::roster::ClientId;
use crate::service::events::{ByteData, StructData};
use crate::transport::Channel;
use crate::utils::hashing::fnv1a_32;

/// Callback receiving a decoded record
pub type StructCallback<T> = Arc<dyn Fn(&StructData<T>) + Send + Sync + 'static>;

/// Callback tables plus the codec state needed to decode records
#[derive(Debug)]
pub(crate) struct DataChannels {
    settings: SerializerSettings,
    registry: Arc<CodecRegistry>,
    bytes: CallbackTable<ByteData>,
    records: CallbackTable<ByteData>,
}

impl DataChannels {
    pub(crate) fn new(settings: SerializerSettings, registry: Arc<CodecRegistry>) -> Self {
        Self {
            settings,
            registry,
            bytes: CallbackTable::new(),
            records: CallbackTable::new(),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<CodecRegistry> {
        &self.registry
    }

    pub(crate) fn register_bytes(&self, key: &str, callback: Callback<ByteData>) -> CallbackId {
        let id = self.bytes.register(fnv1a_32(key), callback);
        debug!(key, ?id, "Registered byte data callback");
        id
    }

    pub(crate) fn unregister_bytes(&self, key: &str, id: CallbackId) -> bool {
        self.bytes.unregister(fnv1a_32(key), id)
    }

    /// Register a record callback. The stored wrapper decodes the payload and
    /// carries the identity of `callback`, so registering it twice is a no-op.
    pub(crate) fn register_record<T: NetSerialize>(
        &self,
        callback: StructCallback<T>,
    ) -> Result<CallbackId> {
        let info = self.registry.resolve::<T>()?;
        let identity = callback_identity(&callback);
        let settings = self.settings;

        let wrapper: Callback<ByteData> = Arc::new(move |raw: &ByteData| {
            let mut reader = Reader::new(&raw.data, settings);
            match T::read_from(&mut reader) {
                Ok(data) => callback(&StructData {
                    data,
                    sender_id: raw.sender_id,
                    tick: raw.tick,
                    timestamp: raw.timestamp,
                    channel: raw.channel,
                }),
                Err(e) => warn!(
                    record = T::TYPE_NAME,
                    sender_id = raw.sender_id,
                    error = %e,
                    "Discarding undecodable record"
                ),
            }
        });

        let id = self.records.register_with_identity(info.hash, identity, wrapper);
        debug!(record = info.type_name, ?id, "Registered struct data callback");
        Ok(id)
    }

    pub(crate) fn unregister_record<T: NetSerialize>(&self, id: CallbackId) -> bool {
        self.records.unregister(fnv1a_32(T::TYPE_NAME), id)
    }

    /// Hand an inbound payload to the table its flag selects.
    pub(crate) fn dispatch(
        &self,
        data: DataPacket,
        sender_id: ClientId,
        tick: u32,
        channel: Channel,
    ) -> usize {
        let table = if data.is_record {
            &self.records
        } else {
            &self.bytes
        };
        let view = ByteData {
            data: data.payload,
            sender_id,
            tick,
            timestamp: SystemTime::now(),
            channel,
        };

        let delivered = table.dispatch(data.data_id, &view);
        if delivered == 0 {
            debug!(
                data_id = data.data_id,
                is_record = data.is_record,
                sender_id,
                "No callback registered for data"
            );
        }
        delivered
    }

    /// Envelope for an opaque payload
    pub(crate) fn byte_packet(&self, key: &str, data: &[u8], route: DataRoute) -> Packet {
        Packet::Data(DataPacket {
            route,
            is_record: false,
            data_id: fnv1a_32(key),
            payload: data.to_vec(),
        })
    }

    /// Envelope for a record, encoded with this side's settings
    pub(crate) fn record_packet<T: NetSerialize>(
        &self,
        value: &T,
        route: DataRoute,
    ) -> Result<Packet> {
        let mut writer = Writer::new(self.settings);
        let info = self.registry.encode(value, &mut writer)?;
        Ok(Packet::Data(DataPacket {
            route,
            is_record: true,
            data_id: info.hash,
            payload: writer.to_vec(),
        }))
    }
}
