#![no_main]

use branchgate_core::seed::{parse_mnemonic, MnemonicLanguage};
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    // parse_mnemonic must never panic, in either wordlist.
    if let Ok(s) = std::str::from_utf8(data) {
        let _ = parse_mnemonic(s, MnemonicLanguage::English);
        let _ = parse_mnemonic(s, MnemonicLanguage::Spanish);
    }
});
