#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Corrupt or truncated persisted tuning blobs decode to None, never panic.
    let _ = stepctl_config::persist::decode_record(data);
});
