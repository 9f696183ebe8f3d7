//! Call skeleton: the ordered tool-call names of an abstract trace.

use std::collections::BTreeSet;

use crate::abstraction::{AbstractTrace, TokenKind};

/// One skeleton element, remembering its originating event index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkeletonStep {
    pub event_index: usize,
    pub tool_name: String,
}

/// Extract the CALL-token skeleton, dropping ignored tool names.
pub fn extract_call_skeleton(
    abstract_trace: &AbstractTrace,
    ignore_call_tools: &BTreeSet<String>,
) -> Vec<SkeletonStep> {
    abstract_trace
        .tokens
        .iter()
        .filter(|token| token.kind == TokenKind::Call)
        .filter(|token| !ignore_call_tools.contains(&token.name))
        .map(|token| SkeletonStep {
            event_index: token.event_index,
            tool_name: token.name.clone(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::abstraction::{AbstractionConfig, build_abstract_trace};
    use serde_json::{Map, json};
    use trajectly_core::make_event;
    use trajectly_types::EventType;

    #[test]
    fn test_extract_skeleton_filters_ignored() {
        let events = vec![
            make_event(EventType::RunStarted, 1, "r", 0, Map::new(), Map::new()),
            make_event(
                EventType::ToolCalled,
                2,
                "r",
                1,
                json!({"tool_name": "search"}).as_object().unwrap().clone(),
                Map::new(),
            ),
            make_event(
                EventType::ToolCalled,
                3,
                "r",
                2,
                json!({"tool_name": "log"}).as_object().unwrap().clone(),
                Map::new(),
            ),
        ];
        let trace = build_abstract_trace(&events, &AbstractionConfig::default());
        let ignore: BTreeSet<String> = ["log".to_string()].into_iter().collect();
        let skeleton = extract_call_skeleton(&trace, &ignore);
        assert_eq!(skeleton.len(), 1);
        assert_eq!(skeleton[0].tool_name, "search");
        assert_eq!(skeleton[0].event_index, 1);
    }
}
