#![no_main]

use libfuzzer_sys::fuzz_target;
use session_protocol::config::SerializerSettings;
use session_protocol::core::reader::Reader;
use session_protocol::Packet;

fuzz_target!(|data: &[u8]| {
    // first byte picks the codec mode so both paths get coverage
    let Some((&mode, rest)) = data.split_first() else {
        return;
    };
    let settings = if mode & 1 == 0 {
        SerializerSettings::default()
    } else {
        SerializerSettings::uncompressed()
    };
    let mut reader = Reader::new(rest, settings);
    let _ = Packet::read(&mut reader);
});
