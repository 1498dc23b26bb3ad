#![no_main]
use libfuzzer_sys::fuzz_target;
use arbitrary::Arbitrary;
use core_framing as framing;

#[derive(Debug, Arbitrary)]
struct Input {
    data: Vec<u8>,
    key: [u8; 32],
    max_len: u16,
}

fuzz_target!(|inp: Input| {
    // Decode must return Ok or a defined error, never panic.
    let max = framing::MIN_BODY_LEN + inp.max_len as usize;
    if let Ok((frame, used)) = framing::Frame::decode(&inp.data, max) {
        assert!(used <= inp.data.len());
        assert_eq!(&frame.encode()[..], &inp.data[..used]);
        // Random bytes essentially never authenticate; either way no panic.
        let _ = frame.open(&inp.key);
    }
});
