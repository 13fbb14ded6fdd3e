#![no_main]

use branchgate_policy::PolicyTemplate;
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // Arbitrary TOML must either parse into a template or fail cleanly.
    if let Ok(s) = std::str::from_utf8(data) {
        if let Ok(template) = toml::from_str::<PolicyTemplate>(s) {
            let _ = toml::to_string(&template);
        }
    }
});
