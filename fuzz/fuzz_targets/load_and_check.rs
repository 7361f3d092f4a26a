#![no_main]
use libfuzzer_sys::fuzz_target;
use std::time::Duration;

fuzz_target!(|data: &[u8]| {
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(model) = strider_model::parse_model(s) {
            let config = strider_mc::CheckConfig {
                max_states: 1_000,
                max_time: Some(Duration::from_secs(2)),
                report_deadlock: false,
                ..strider_mc::CheckConfig::default()
            };
            let _ = strider_mc::run(model, config);
        }
    }
});
