//! Fuzz target: `codec::decode_frame` and `codec::find_frame`
//!
//! Drives arbitrary byte sequences into the frame decoder and asserts
//! that it never panics, and that whatever it accepts re-encodes to a
//! frame that decodes to the same packet.
//!
//! cargo fuzz run fuzz_frame_decode

#![no_main]

use barback::protocol::codec::{decode_frame, encode_packet, find_frame};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(packet) = decode_frame(data) {
        // Anything that passes verification must round-trip exactly.
        let reencoded = encode_packet(&packet);
        assert_eq!(decode_frame(&reencoded), Ok(packet), "accepted packet must round-trip");
    }

    // The resync scanner must never panic and must only ever hand out
    // correctly-sized candidate frames.
    if let Some(candidate) = find_frame(data) {
        assert_eq!(candidate.len(), barback::protocol::FRAME_SIZE);
        let _ = decode_frame(candidate);
    }
});
