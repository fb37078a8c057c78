#![no_main]

use libfuzzer_sys::fuzz_target;
use sifter_http::parse_connect_authority;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = parse_connect_authority(text);
        for line in text.lines().take(8) {
            let _ = parse_connect_authority(line);
        }
    }
});
