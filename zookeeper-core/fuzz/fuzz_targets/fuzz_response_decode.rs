#![no_main]

use libfuzzer_sys::fuzz_target;

use zookeeper_core::protocol::{ConnectResponse, OpCode, Record, Response};

const OPS: [OpCode; 9] = [
    OpCode::Create,
    OpCode::Exists,
    OpCode::GetData,
    OpCode::SetData,
    OpCode::GetAcl,
    OpCode::SetAcl,
    OpCode::GetChildren2,
    OpCode::Sync,
    OpCode::Multi,
];

fuzz_target!(|data: &[u8]| {
    if data.is_empty() {
        return;
    }
    let op = OPS[data[0] as usize % OPS.len()];
    let body = &data[1..];

    if let Ok(response) = Response::decode(op, body) {
        let encoded = response.encode();
        assert_eq!(Response::decode(op, &encoded).ok(), Some(response));
    }
    let _ = ConnectResponse::from_bytes(body);
});
