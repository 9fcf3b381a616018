#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(program) = lockmeet_dsl::parse(s, "fuzz.lmt") {
            let _ = lockmeet_ir::lowering::lower_with_source(&program, s, "fuzz.lmt");
        }
    }
});
