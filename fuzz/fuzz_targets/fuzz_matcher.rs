//! Fuzz target for the protect-list matcher.
//!
//! Splits the input into a list and a candidate name and checks that scanning
//! never panics and that `is_protected` agrees with `find_match`.

#![no_main]

use libfuzzer_sys::fuzz_target;

use dont_drop_db::matcher::{MAX_NAME_LEN, find_match, is_protected, scan};

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    if input.len() > 10_000 {
        return;
    }
    let (list, candidate) = input.split_once('\0').unwrap_or((input, "postgres"));

    let protected = is_protected(list, candidate);
    assert_eq!(protected, find_match(list, candidate).is_some());
    assert_eq!(protected, is_protected(list, candidate));

    for entry in scan(list) {
        let span = entry.span();
        assert!(span.start <= span.end && span.end <= list.len());
        if let Some(name) = entry.name() {
            assert!(!name.is_empty() && name.len() <= MAX_NAME_LEN);
        }
    }
});
