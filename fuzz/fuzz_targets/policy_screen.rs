#![no_main]

use libfuzzer_sys::fuzz_target;
use sifter_policy::Policy;

fuzz_target!(|data: &[u8]| {
    let split = data
        .iter()
        .position(|byte| *byte == 0)
        .unwrap_or(data.len());
    let rules = &data[..split];
    let subject = if split < data.len() {
        &data[split + 1..]
    } else {
        data
    };

    if let (Ok(rules_text), Ok(subject_text)) =
        (std::str::from_utf8(rules), std::str::from_utf8(subject))
    {
        let policy = Policy::parse(rules_text);
        let _ = policy.find_forbidden_word(subject_text);
        let _ = policy.find_forbidden_host(subject_text);
    }
});
