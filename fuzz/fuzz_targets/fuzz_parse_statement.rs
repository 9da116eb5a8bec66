//! Fuzz target for the SQL recognizer.
//!
//! Arbitrary text must either parse or fail with a `ParseError`; it must never
//! panic, and identifiers must respect the name length limit.

#![no_main]

use libfuzzer_sys::fuzz_target;

use dont_drop_db::matcher::MAX_NAME_LEN;
use dont_drop_db::sql::{parse_statement, split_statements};
use dont_drop_db::statement::UtilityStatement;

fuzz_target!(|data: &[u8]| {
    let Ok(sql) = std::str::from_utf8(data) else {
        return;
    };
    if sql.len() > 10_000 {
        return;
    }
    for text in split_statements(sql) {
        if let Ok(parsed) = parse_statement(text) {
            if let UtilityStatement::DropDatabase(drop) = &parsed.statement {
                assert!(drop.name.len() <= MAX_NAME_LEN);
            }
        }
    }
});
