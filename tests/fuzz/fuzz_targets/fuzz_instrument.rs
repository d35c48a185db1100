#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Either a typed error or output with the same line count.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(out) = solcov::instrument::instrument(s, "fuzz.sol", true) {
            assert_eq!(out.source.lines().count(), s.lines().count());
        }
    }
});
