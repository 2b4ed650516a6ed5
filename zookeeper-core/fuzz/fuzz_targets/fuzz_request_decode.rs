#![no_main]

use libfuzzer_sys::fuzz_target;

use zookeeper_core::protocol::Request;

fuzz_target!(|data: &[u8]| {
    if let Ok((header, request)) = Request::decode(data) {
        let encoded = request.encode(header.xid);
        let (_, again) = Request::decode(&encoded).expect("re-encoded request must decode");
        assert_eq!(again, request);
    }
});
