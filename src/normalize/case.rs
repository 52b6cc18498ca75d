use serde_json::Value as JsonValue;

use crate::types::config::CaseMode;

/// Recursively rewrite object keys to the configured case. Keys beginning
/// with `@` (protobuf type markers) are never renamed.
pub fn convert_keys_deep(value: JsonValue, mode: CaseMode) -> JsonValue {
    match value {
        JsonValue::Object(map) => {
            let converted = map
                .into_iter()
                .map(|(key, val)| {
                    let key = if key.starts_with('@') {
                        key
                    } else {
                        convert_key(&key, mode)
                    };
                    (key, convert_keys_deep(val, mode))
                })
                .collect();
            JsonValue::Object(converted)
        }
        JsonValue::Array(items) => JsonValue::Array(
            items
                .into_iter()
                .map(|item| convert_keys_deep(item, mode))
                .collect(),
        ),
        other => other,
    }
}

fn convert_key(key: &str, mode: CaseMode) -> String {
    match mode {
        CaseMode::Snake => to_snake_case(key),
        CaseMode::Camel => to_camel_case(key),
    }
}

pub(crate) fn to_snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev_lower = false;
    for ch in key.chars() {
        if ch.is_ascii_uppercase() {
            if prev_lower {
                out.push('_');
            }
            out.push(ch.to_ascii_lowercase());
            prev_lower = false;
        } else {
            prev_lower = ch.is_ascii_lowercase() || ch.is_ascii_digit();
            out.push(ch);
        }
    }
    out
}

pub(crate) fn to_camel_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    let mut upper_next = false;
    for (i, ch) in key.chars().enumerate() {
        if ch == '_' && i > 0 {
            upper_next = true;
        } else if upper_next {
            out.push(ch.to_ascii_uppercase());
            upper_next = false;
        } else {
            out.push(ch);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_snake_case_conversion() {
        assert_eq!(to_snake_case("fromAddress"), "from_address");
        assert_eq!(to_snake_case("validatorSrcAddress"), "validator_src_address");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case("amount"), "amount");
    }

    #[test]
    fn test_camel_case_conversion() {
        assert_eq!(to_camel_case("from_address"), "fromAddress");
        assert_eq!(to_camel_case("validator_src_address"), "validatorSrcAddress");
        assert_eq!(to_camel_case("amount"), "amount");
    }

    #[test]
    fn test_at_keys_preserved() {
        let input = json!({
            "@type": "/cosmos.bank.v1beta1.MsgSend",
            "fromAddress": "cosmos1abc",
            "nested": { "@type": "/cosmos.base.v1beta1.Coin", "someField": "1" }
        });
        let out = convert_keys_deep(input, CaseMode::Snake);
        assert_eq!(out["@type"], "/cosmos.bank.v1beta1.MsgSend");
        assert_eq!(out["from_address"], "cosmos1abc");
        assert_eq!(out["nested"]["@type"], "/cosmos.base.v1beta1.Coin");
        assert_eq!(out["nested"]["some_field"], "1");
    }

    #[test]
    fn test_round_trip_preserves_structure() {
        let input = json!({
            "from_address": "a",
            "coins": [{ "denom_name": "uatom", "amount": "5" }]
        });
        let there = convert_keys_deep(input.clone(), CaseMode::Camel);
        let back = convert_keys_deep(there, CaseMode::Snake);
        assert_eq!(back, input);
    }

    #[test]
    fn test_arrays_converted() {
        let input = json!([{ "someKey": 1 }, { "otherKey": 2 }]);
        let out = convert_keys_deep(input, CaseMode::Snake);
        assert_eq!(out[0]["some_key"], 1);
        assert_eq!(out[1]["other_key"], 2);
    }
}
