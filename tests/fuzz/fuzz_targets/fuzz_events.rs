#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Event log parsing and payload decoding must not panic.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(events) = solcov::aggregate::parse_event_log(s) {
            for event in &events {
                let _ = event.decode();
            }
        }
    }
});
