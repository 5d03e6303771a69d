//! Fuzz target: the 7-bit packing transform.
//!
//! For arbitrary raw packets: packing must round-trip and must never
//! emit a byte with the high bit set (the framing-safety invariant the
//! sync marker depends on).  For arbitrary wire bytes: unpacking must
//! never panic.
//!
//! cargo fuzz run fuzz_pack7

#![no_main]

use barback::protocol::pack7::{pack_7bit, unpack_7bit};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if data.len() >= 8 {
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&data[..8]);
        let packed = pack_7bit(&raw);
        for b in packed {
            assert_eq!(b & 0x80, 0, "packed byte has the high bit set");
        }
        assert_eq!(unpack_7bit(&packed), Ok(raw), "pack/unpack must round-trip");
    }

    // Arbitrary input to the unpacker: errors are fine, panics are not.
    let _ = unpack_7bit(data);
});
