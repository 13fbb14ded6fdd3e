#![no_main]

use branchgate_spend::{BroadcastClassifier, BroadcastOutcome};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let response = String::from_utf8_lossy(data);
    let outcome = BroadcastClassifier::default().classify(&response);

    // A premature marker always wins over anything that looks like a txid
    let has_marker = response.contains("non-final") || response.contains("non-BIP68-final");
    if has_marker {
        assert!(matches!(outcome, BroadcastOutcome::Premature { .. }));
    }
    if let BroadcastOutcome::Sent(txid) = outcome {
        assert_eq!(txid.to_string(), response.trim().to_ascii_lowercase());
    }
});
