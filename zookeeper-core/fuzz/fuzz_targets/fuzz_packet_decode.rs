#![no_main]

use bytes::BytesMut;
use libfuzzer_sys::fuzz_target;
use tokio_util::codec::Decoder;

use zookeeper_core::protocol::{PacketCodec, Reply};

fuzz_target!(|data: &[u8]| {
    let mut codec = PacketCodec::with_max_packet_size(64 * 1024);
    let mut buf = BytesMut::from(data);

    while let Ok(Some(packet)) = codec.decode(&mut buf) {
        let _ = Reply::decode(packet.freeze());
    }
});
