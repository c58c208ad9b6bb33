#![no_main]

use arbitrary::Arbitrary;
use libfuzzer_sys::fuzz_target;

use rulekeeper_core::types::{Detection, EngineKind};
use rulekeeper_rules::suricata::{PillarLists, PillarMerger};

/// 퍼저용 구조적 입력
#[derive(Arbitrary, Debug)]
struct FuzzInput {
    local_rules: String,
    enabled: String,
    disabled: String,
    modify: String,
    /// 병합할 탐지 (최대 8개로 제한)
    detections: Vec<FuzzDetection>,
}

#[derive(Arbitrary, Debug)]
struct FuzzDetection {
    public_id: String,
    content: String,
    is_enabled: bool,
}

fuzz_target!(|input: FuzzInput| {
    let lists = PillarLists {
        local_rules: input.local_rules,
        enabled: input.enabled,
        disabled: input.disabled,
        modify: input.modify,
        threshold: String::new(),
    };

    let Ok(mut merger) = PillarMerger::new(&lists) else {
        return;
    };

    let detections: Vec<Detection> = input
        .detections
        .into_iter()
        .take(8)
        .map(|d| {
            let mut det = Detection::new(EngineKind::Suricata);
            det.public_id = d.public_id;
            det.content = d.content;
            det.is_enabled = d.is_enabled;
            det
        })
        .collect();

    let _ = merger.merge_all(&detections);
    let _ = merger.finish();
});
