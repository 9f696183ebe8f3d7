//! Deterministic abstraction pipeline.
//!
//! Maps a concrete event trace to an abstract representation: a token
//! stream preserving event indices, plus a predicate bag of aggregate
//! facts. The pipeline iterates events by index, applies a fixed
//! event-to-token case table, and accumulates predicates in a single pass;
//! set-valued outputs are emitted sorted so identical inputs always produce
//! identical abstract traces.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use trajectly_types::{EventType, TraceEvent};

use crate::predicates::{
    contains_email, contains_phone, extract_domains, extract_numeric_values,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TokenKind {
    Call,
    Result,
    LlmRequest,
    LlmResponse,
    Message,
    Observation,
    Error,
}

/// One abstract token. Back-references its event by index, never by pointer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Token {
    pub event_index: usize,
    pub kind: TokenKind,
    pub name: String,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone)]
pub struct AbstractionConfig {
    pub ignore_call_tools: Vec<String>,
    pub enable_pii_detection: bool,
    pub enable_domain_extraction: bool,
    pub enable_numeric_extraction: bool,
}

impl Default for AbstractionConfig {
    fn default() -> Self {
        AbstractionConfig {
            ignore_call_tools: Vec::new(),
            enable_pii_detection: true,
            enable_domain_extraction: true,
            enable_numeric_extraction: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PiiFlags {
    pub email: bool,
    pub phone: bool,
}

/// Aggregate facts over one trace. Shape is fixed so report payloads stay
/// deterministic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredicateBag {
    pub tool_calls_total: usize,
    pub tool_calls_by_name: BTreeMap<String, usize>,
    pub domains: Vec<String>,
    pub pii: PiiFlags,
    pub max_numeric_value: Option<f64>,
    pub refund_count: usize,
}

#[derive(Debug, Clone)]
pub struct AbstractTrace {
    pub tokens: Vec<Token>,
    pub predicates: PredicateBag,
}

/// Fixed event-to-token case table. Only stable, contract-relevant event
/// types produce tokens; `run_started` produces none.
fn token_from_event(
    event: &TraceEvent,
    event_index: usize,
    ignore_call_tools: &BTreeSet<&str>,
) -> Option<Token> {
    let payload = event.payload.clone();
    let text = |key: &str, fallback: &str| -> String {
        payload
            .get(key)
            .and_then(Value::as_str)
            .unwrap_or(fallback)
            .to_string()
    };
    match event.event_type {
        EventType::ToolCalled => {
            let tool_name = text("tool_name", "unknown");
            if ignore_call_tools.contains(tool_name.as_str()) {
                return None;
            }
            Some(Token {
                event_index,
                kind: TokenKind::Call,
                name: tool_name,
                payload,
            })
        }
        EventType::ToolReturned => Some(Token {
            event_index,
            kind: TokenKind::Result,
            name: text("tool_name", "unknown"),
            payload,
        }),
        EventType::LlmCalled => {
            let name = format!("{}:{}", text("provider", "unknown"), text("model", "unknown"));
            Some(Token {
                event_index,
                kind: TokenKind::LlmRequest,
                name,
                payload,
            })
        }
        EventType::LlmReturned => {
            let name = format!("{}:{}", text("provider", "unknown"), text("model", "unknown"));
            Some(Token {
                event_index,
                kind: TokenKind::LlmResponse,
                name,
                payload,
            })
        }
        EventType::AgentStep => Some(Token {
            event_index,
            kind: TokenKind::Message,
            name: text("name", "step"),
            payload,
        }),
        EventType::RunFinished => Some(Token {
            event_index,
            kind: TokenKind::Observation,
            name: "run_finished".to_string(),
            payload,
        }),
        EventType::RunStarted => None,
    }
}

/// Build the abstract trace in one deterministic pass.
pub fn build_abstract_trace(events: &[TraceEvent], config: &AbstractionConfig) -> AbstractTrace {
    let ignore_call_tools: BTreeSet<&str> = config
        .ignore_call_tools
        .iter()
        .map(String::as_str)
        .collect();

    let tokens: Vec<Token> = events
        .iter()
        .enumerate()
        .filter_map(|(index, event)| token_from_event(event, index, &ignore_call_tools))
        .collect();

    let mut tool_counts: BTreeMap<String, usize> = BTreeMap::new();
    let mut domains: BTreeSet<String> = BTreeSet::new();
    let mut numeric_values: Vec<f64> = Vec::new();
    let mut has_email = false;
    let mut has_phone = false;
    let mut refund_count = 0;

    for token in &tokens {
        if token.kind == TokenKind::Call {
            *tool_counts.entry(token.name.clone()).or_insert(0) += 1;
            if token.name.to_lowercase().contains("refund") {
                refund_count += 1;
            }
        }

        let payload = Value::Object(token.payload.clone());
        if config.enable_domain_extraction {
            domains.extend(extract_domains(&payload));
        }
        if config.enable_numeric_extraction {
            numeric_values.extend(extract_numeric_values(&payload));
        }
        if config.enable_pii_detection {
            has_email = has_email || contains_email(&payload);
            has_phone = has_phone || contains_phone(&payload);
        }
    }

    let max_numeric_value = numeric_values
        .iter()
        .copied()
        .fold(None, |best: Option<f64>, item| match best {
            Some(current) if current >= item => Some(current),
            _ => Some(item),
        });

    let predicates = PredicateBag {
        tool_calls_total: tokens
            .iter()
            .filter(|token| token.kind == TokenKind::Call)
            .count(),
        tool_calls_by_name: tool_counts,
        domains: domains.into_iter().collect(),
        pii: PiiFlags {
            email: has_email,
            phone: has_phone,
        },
        max_numeric_value,
        refund_count,
    };

    AbstractTrace { tokens, predicates }
}
