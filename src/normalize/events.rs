use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::Deserialize;

use crate::types::chain::AbciEvent;
use crate::types::record::{LogEntry, NormalizedAttribute, NormalizedEvent};

/// Strict canonical-base64 check: standard alphabet, correct padding, and
/// re-encoding the decoded bytes reproduces the input exactly.
pub fn is_canonical_base64(input: &str) -> bool {
    if input.is_empty() || input.len() % 4 != 0 {
        return false;
    }
    let body_len = input.trim_end_matches('=').len();
    if input.len() - body_len > 2 {
        return false;
    }
    if !input[..body_len]
        .bytes()
        .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
    {
        return false;
    }
    match BASE64.decode(input) {
        Ok(decoded) => BASE64.encode(&decoded) == input,
        Err(_) => false,
    }
}

/// Printable text gate for decoded attribute bytes: tab, LF, CR, printable
/// ASCII, or any code point at or above U+0080.
fn is_printable_text(text: &str) -> bool {
    text.chars().all(|c| {
        matches!(c, '\t' | '\n' | '\r') || (' '..='~').contains(&c) || (c as u32) >= 0x80
    })
}

/// Decode a historically base64-encoded attribute string. Values that are
/// not canonical base64, or whose decoded bytes are not printable text,
/// pass through unchanged.
fn normalize_attr_string(raw: &str) -> String {
    if !is_canonical_base64(raw) {
        return raw.to_string();
    }
    let decoded = match BASE64.decode(raw) {
        Ok(bytes) => bytes,
        Err(_) => return raw.to_string(),
    };
    match String::from_utf8(decoded) {
        Ok(text) if is_printable_text(&text) => text,
        _ => raw.to_string(),
    }
}

pub fn normalize_event(event: &AbciEvent) -> NormalizedEvent {
    NormalizedEvent {
        kind: event.kind.clone(),
        attributes: event
            .attributes
            .iter()
            .map(|attr| NormalizedAttribute {
                key: normalize_attr_string(&attr.key),
                value: normalize_attr_string(&attr.value),
                index: attr.index.unwrap_or(true),
            })
            .collect(),
    }
}

pub fn normalize_events(events: &[AbciEvent]) -> Vec<NormalizedEvent> {
    events.iter().map(normalize_event).collect()
}

#[derive(Debug, Deserialize)]
struct RawLogEntry {
    msg_index: Option<u32>,
    #[serde(default)]
    events: Vec<AbciEvent>,
}

/// Parse the per-tx `raw_log` JSON (`[ { msg_index, events: [...] }, ... ]`)
/// into per-message log entries. An absent `msg_index` takes the entry
/// position, matching the proto3 JSON convention of omitting zero values.
/// Anything unparseable yields the empty list.
pub fn parse_raw_log(raw_log: Option<&str>) -> Vec<LogEntry> {
    let Some(raw) = raw_log else {
        return Vec::new();
    };
    let entries: Vec<RawLogEntry> = match serde_json::from_str(raw) {
        Ok(entries) => entries,
        Err(_) => return Vec::new(),
    };
    entries
        .into_iter()
        .enumerate()
        .map(|(position, entry)| LogEntry {
            msg_index: Some(entry.msg_index.unwrap_or(position as u32)),
            events: normalize_events(&entry.events),
        })
        .collect()
}
