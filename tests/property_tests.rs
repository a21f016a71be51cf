//! Property-based tests using proptest
//!
//! These tests validate codec invariants across a wide range of randomly
//! generated inputs.

#![allow(clippy::expect_used, clippy::unwrap_used)]

use proptest::prelude::*;
use session_protocol::config::SerializerSettings;
use session_protocol::core::packet::{DataPacket, DataRoute, Packet};
use session_protocol::core::quaternion;
use session_protocol::core::reader::Reader;
use session_protocol::core::types::Quaternion;
use session_protocol::core::writer::Writer;

fn settings_strategy() -> impl Strategy<Value = SerializerSettings> {
    (any::<bool>(), 0u32..=6, 4u32..=20).prop_map(|(use_compression, decimal_places, bits)| {
        SerializerSettings {
            use_compression,
            decimal_places,
            bits_per_component: bits,
        }
    })
}

fn unit_quaternion() -> impl Strategy<Value = Quaternion> {
    prop::array::uniform4(-1.0f32..1.0)
        .prop_filter("needs a usable length", |c| {
            c.iter().map(|v| v * v).sum::<f32>() > 0.01
        })
        .prop_map(|c| Quaternion::from_array(c).normalized())
}

// Property: varints are self-delimiting in a stream
proptest! {
    #[test]
    fn prop_varint_stream(a in any::<u64>(), b in any::<i64>(), c in any::<u32>()) {
        let settings = SerializerSettings::default();
        let mut writer = Writer::new(settings);
        writer.write_u64(a);
        writer.write_i64(b);
        writer.write_u32(c);

        let bytes = writer.to_vec();
        let mut reader = Reader::new(&bytes, settings);
        prop_assert_eq!(reader.read_u64().unwrap(), a);
        prop_assert_eq!(reader.read_i64().unwrap(), b);
        prop_assert_eq!(reader.read_u32().unwrap(), c);
        prop_assert!(reader.is_empty());
    }
}

// Property: integers round-trip exactly in either mode
proptest! {
    #[test]
    fn prop_integers_exact(settings in settings_strategy(), x in any::<i16>(), y in any::<u16>(), z in any::<i32>()) {
        let mut writer = Writer::new(settings);
        writer.write_i16(x);
        writer.write_u16(y);
        writer.write_i32(z);

        let bytes = writer.to_vec();
        let mut reader = Reader::new(&bytes, settings);
        prop_assert_eq!(reader.read_i16().unwrap(), x);
        prop_assert_eq!(reader.read_u16().unwrap(), y);
        prop_assert_eq!(reader.read_i32().unwrap(), z);
    }
}

// Property: compressed floats land within half a quantization step
proptest! {
    #[test]
    fn prop_float_quantization_bound(value in -1000.0f32..1000.0, decimal_places in 0u32..=5) {
        let settings = SerializerSettings { decimal_places, ..SerializerSettings::default() };
        let mut writer = Writer::new(settings);
        writer.write_f32(value);

        let bytes = writer.to_vec();
        let decoded = Reader::new(&bytes, settings).read_f32().unwrap();
        let bound = 0.5 / settings.float_scale() as f32 + value.abs() * f32::EPSILON * 4.0;
        prop_assert!((decoded - value).abs() <= bound, "{} -> {} (bound {})", value, decoded, bound);
    }
}

// Property: uncompressed floats are bit-exact
proptest! {
    #[test]
    fn prop_uncompressed_float_exact(value in any::<f32>().prop_filter("not NaN", |v| !v.is_nan())) {
        let settings = SerializerSettings::uncompressed();
        let mut writer = Writer::new(settings);
        writer.write_f32(value);
        let bytes = writer.to_vec();
        prop_assert_eq!(Reader::new(&bytes, settings).read_f32().unwrap().to_bits(), value.to_bits());
    }
}

// Property: packed rotations stay within the precision of their bit budget
proptest! {
    #[test]
    fn prop_quaternion_error_bound(rotation in unit_quaternion(), bits in 6u32..=20) {
        let packed = quaternion::pack(rotation, bits).unwrap();
        prop_assert!(packed < (1u64 << quaternion::packed_bits(bits)));

        let decoded = quaternion::unpack(packed, bits).unwrap();
        let step = 1.0 / ((1u64 << bits) - 1) as f32;
        let bound = (8.0 * step).max(2e-3);
        prop_assert!(
            rotation.angle_to(decoded) <= bound,
            "angle {} exceeds {} at {} bits",
            rotation.angle_to(decoded),
            bound,
            bits
        );
    }
}

// Property: strings round-trip in either mode
proptest! {
    #[test]
    fn prop_string_roundtrip(settings in settings_strategy(), text in ".{0,200}") {
        let mut writer = Writer::new(settings);
        writer.write_string(&text).unwrap();
        let bytes = writer.to_vec();
        prop_assert_eq!(Reader::new(&bytes, settings).read_string().unwrap(), text);
    }
}

// Property: data envelopes survive encoding
proptest! {
    #[test]
    fn prop_data_packet_roundtrip(
        settings in settings_strategy(),
        targets in prop::collection::vec(any::<u32>(), 0..16),
        data_id in any::<u32>(),
        payload in prop::collection::vec(any::<u8>(), 0..2048),
        is_record in any::<bool>(),
    ) {
        let packet = Packet::Data(DataPacket {
            route: DataRoute::ToClients(targets),
            is_record,
            data_id,
            payload,
        });
        let mut writer = Writer::new(settings);
        let bytes = packet.encode(&mut writer).unwrap();
        let decoded = Packet::read(&mut Reader::new(&bytes, settings)).unwrap();
        prop_assert_eq!(decoded, packet);
    }
}

// Property: decoding arbitrary bytes never panics
proptest! {
    #[test]
    fn prop_decode_never_panics(settings in settings_strategy(), data in prop::collection::vec(any::<u8>(), 0..512)) {
        let mut reader = Reader::new(&data, settings);
        let _ = Packet::read(&mut reader);
    }
}
