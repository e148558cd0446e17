//! Fuzz test for FieldPath parsing
//!
//! Arbitrary text must either fail to parse or parse to a path whose
//! textual form parses back to the same path.
//!
//! Run with: cargo +nightly fuzz run field_path_fuzz -- -max_total_time=60

#![no_main]

use hopwise_core::FieldPath;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };

    // Parsing never panics; errors are ordinary values.
    let Ok(path) = FieldPath::parse(input) else {
        return;
    };

    let rendered = path.to_string();
    let reparsed = FieldPath::parse(&rendered)
        .unwrap_or_else(|e| panic!("rendered path {rendered:?} failed to reparse: {e}"));
    assert_eq!(reparsed, path, "round trip changed {input:?}");

    // Prefix relation is reflexive and implies overlap.
    assert!(path.starts_with(&path));
    assert!(path.overlaps(&FieldPath::root()));
});
