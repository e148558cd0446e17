//! Fuzz test for path-addressed merge writes
//!
//! Input is `<path>\n<json>`. A write either misses or leaves the written
//! value readable at the same path, and repeating it changes nothing.
//!
//! Run with: cargo +nightly fuzz run merge_write_fuzz -- -max_total_time=60

#![no_main]

use hopwise_core::{FieldPath, Value};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let Ok(input) = std::str::from_utf8(data) else {
        return;
    };
    let Some((path, json)) = input.split_once('\n') else {
        return;
    };
    let Ok(path) = FieldPath::parse(path) else {
        return;
    };
    let Ok(json) = serde_json::from_str::<serde_json::Value>(json) else {
        return;
    };

    let mut target = Value::from(json);
    let written = Value::from("fuzz");
    if target.set_path(&path, written.clone()).is_err() {
        return;
    }
    assert_eq!(target.get_path(&path), Some(&written));

    let once = target.clone();
    target
        .set_path(&path, written)
        .expect("a path that resolved once resolves again");
    assert_eq!(target, once, "merge write is not idempotent");
});
