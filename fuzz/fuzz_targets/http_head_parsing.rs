#![no_main]

use libfuzzer_sys::fuzz_target;
use sifter_http::{
    build_upstream_request_head, resolve_target, BodyEncoding, HeaderBlock, RequestLine,
    StatusLine,
};

fuzz_target!(|data: &[u8]| {
    let split = data
        .iter()
        .position(|byte| *byte == 0)
        .unwrap_or(data.len());
    let request = &data[..split];
    let response = if split < data.len() {
        &data[split + 1..]
    } else {
        data
    };

    if let Ok(text) = std::str::from_utf8(request) {
        let mut lines = text.lines();
        if let Some(first) = lines.next() {
            let parsed_line = RequestLine::parse(first);
            let mut headers = HeaderBlock::new(64 * 1024);
            for line in lines.take(64) {
                if headers.push_line(line).is_err() {
                    break;
                }
            }
            let _ = BodyEncoding::from_headers(&headers);
            let _ = BodyEncoding::for_request(&headers);
            if let Ok(line) = parsed_line {
                if let Ok(target) = resolve_target(&line, &headers) {
                    let _ = build_upstream_request_head(&line, &headers, &target);
                }
            }
        }
    }

    if let Ok(text) = std::str::from_utf8(response) {
        for line in text.lines().take(8) {
            let _ = StatusLine::parse(line);
        }
    }
});
