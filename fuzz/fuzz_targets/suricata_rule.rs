#![no_main]

use libfuzzer_sys::fuzz_target;
use rulekeeper_rules::suricata::{self, SuricataRule};
use rulekeeper_rules::RuleFilter;

fuzz_target!(|data: &[u8]| {
    if let Ok(text) = std::str::from_utf8(data) {
        let _ = suricata::parse_rules(text, Some("ETOPEN"), &RuleFilter::none());

        if let Ok(rule) = SuricataRule::parse(text) {
            let _ = rule.parse_metadata();
            let _ = SuricataRule::parse(&rule.to_string());
        }
    }
});
