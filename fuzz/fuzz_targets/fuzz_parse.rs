#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Arbitrary text must yield a program or a ParseError, never a panic.
        let _ = lockmeet_dsl::parse(s, "fuzz.lmt");
    }
});
