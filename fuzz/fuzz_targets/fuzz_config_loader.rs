#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &str| {
    // Arbitrary TOML must either fail to parse or produce a Config whose
    // validation returns without panicking.
    if let Ok(cfg) = toml::from_str::<stepctl_config::Config>(data) {
        let _ = cfg.validate();
    }
});
