#![no_main]
use libfuzzer_sys::fuzz_target;

use jitc::parser;

fuzz_target!(|data: &[u8]| {
    if let Ok(content) = std::str::from_utf8(data) {
        if let Ok(prog) = parser::parse_content("fuzz", content) {
            assert!(!prog.insns.is_empty());
        }
    }
});
