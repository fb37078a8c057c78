#![no_main]

use libfuzzer_sys::fuzz_target;
use sifter_http::parse_chunk_size_line;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        for line in text.lines().take(32) {
            let _ = parse_chunk_size_line(line);
            let _ = parse_chunk_size_line(line.trim_end_matches('\r'));
        }
    }
});
