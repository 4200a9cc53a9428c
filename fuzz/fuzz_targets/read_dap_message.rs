#![no_main]

use std::io::{BufReader, Cursor};

use ansibug_dap::{codec, ClientMessage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Malformed input must never panic, hang or allocate past the frame cap.
    let mut reader = BufReader::new(Cursor::new(data));
    while let Ok(Some(frame)) = codec::read_frame(&mut reader) {
        if let Err(err) = ClientMessage::decode(&frame) {
            let _ = err.request();
        }
    }

    // The body alone, as if it had been framed correctly.
    let _ = ClientMessage::decode(data);
});
