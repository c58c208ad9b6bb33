#![no_main]

use libfuzzer_sys::fuzz_target;
use rulekeeper_rules::yara;

fuzz_target!(|data: &[u8]| {
    let Ok(text) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(rules) = yara::parse_rules(text, None) else {
        return;
    };

    // 직렬화한 규칙은 다시 파싱되어야 함
    for rule in rules {
        let _ = rule.validate();
        let rendered = rule.to_string();
        let _ = yara::parse_rules(&rendered, None);
    }
});
