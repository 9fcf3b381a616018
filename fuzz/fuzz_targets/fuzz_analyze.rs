#![no_main]
use indexmap::IndexMap;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        // Keep each run short; protocol violations are reported, not panics.
        let mut overrides = IndexMap::new();
        overrides.insert("max_rounds".to_string(), "4".to_string());
        overrides.insert("relational_width".to_string(), "2".to_string());
        let _ = lockmeet_engine::pipeline::analyze_source(s, "fuzz.lmt", &overrides);
    }
});
