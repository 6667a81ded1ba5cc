//! Search key builder
//!
//! Flattens a reference and its fetched payload into a lowercase,
//! space-separated list of `field:value` tokens used for substring search.

use serde_json::Value;
use thiserror::Error;

use super::ReceiptRef;

/// Payload fields that carry no search value (base64 blobs, embedded QR text, logo paths)
pub const IGNORED_KEYS: [&str; 3] = ["rawData", "qr", "logo"];

/// Placeholder stored until the key is first computed
pub const PENDING_SEARCH_KEY: &str = "<pending>";

#[derive(Debug, Error)]
pub enum SearchKeyError {
    #[error("unexpected JSON value in receipt payload: {0}")]
    UnexpectedValue(String),
}

/// Builds the full search key for a reference and an optional payload.
///
/// Payloads that are not JSON (HTML receipt pages) contribute no tokens.
pub fn build_search_key(reference: &ReceiptRef, payload: Option<&[u8]>) -> Result<String, SearchKeyError> {
    let mut items = reference.search_key_items();
    if let Some(bytes) = payload {
        match serde_json::from_slice::<Value>(bytes) {
            Ok(value) => collect_payload_tokens(&value, &mut items)?,
            Err(e) => {
                tracing::debug!(reference = %reference, error = %e, "payload is not JSON, indexing reference only")
            }
        }
    }
    Ok(items.join(" ").to_lowercase())
}

/// Appends one token per scalar leaf of `value`
pub fn collect_payload_tokens(value: &Value, items: &mut Vec<String>) -> Result<(), SearchKeyError> {
    visit("", value, items)
}

fn visit(prefix: &str, value: &Value, items: &mut Vec<String>) -> Result<(), SearchKeyError> {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                if IGNORED_KEYS.contains(&key.as_str()) {
                    continue;
                }
                visit(&format!("{}:", key), child, items)?;
            }
        }
        Value::Array(children) => {
            for child in children {
                visit("", child, items)?;
            }
        }
        Value::String(s) => items.push(format!("{}{}", prefix, s.trim())),
        Value::Number(n) => items.push(format!("{}{}", prefix, format_number(n)?)),
        Value::Bool(b) => items.push(format!("{}{}", prefix, b)),
        Value::Null => {}
    }
    Ok(())
}

/// Integers verbatim, floats in shortest positional form (never an exponent)
fn format_number(n: &serde_json::Number) -> Result<String, SearchKeyError> {
    if let Some(i) = n.as_i64() {
        Ok(i.to_string())
    } else if let Some(u) = n.as_u64() {
        Ok(u.to_string())
    } else if let Some(f) = n.as_f64().filter(|f| f.is_finite()) {
        Ok(f.to_string())
    } else {
        Err(SearchKeyError::UnexpectedValue(n.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::receipts::DomainCode;
    use serde_json::json;

    fn tokens(value: Value) -> Vec<String> {
        let mut items = Vec::new();
        collect_payload_tokens(&value, &mut items).unwrap();
        items
    }

    #[test]
    fn test_nested_payload_tokens() {
        let items = tokens(json!({
            "ticket": {
                "document": {
                    "receipt": {
                        "items": [
                            {"name": "  Milk 3.2% ", "price": 8999, "quantity": 1.5},
                            {"name": "Bread", "price": 4500, "quantity": 1}
                        ],
                        "totalSum": 20749,
                        "nds10": 0.1
                    }
                }
            },
            "isPaid": true
        }));

        assert_eq!(
            items,
            vec![
                "isPaid:true",
                "name:Milk 3.2%",
                "price:8999",
                "quantity:1.5",
                "name:Bread",
                "price:4500",
                "quantity:1",
                "nds10:0.1",
                "totalSum:20749",
            ]
        );
    }

    #[test]
    fn test_ignored_keys_are_pruned() {
        let items = tokens(json!({
            "rawData": "AAECAwQ=",
            "qr": "t=20240101T1200&s=10.50",
            "logo": "/static/logo/x.png",
            "user": "ООО Ромашка",
            "nested": {"qr": "again", "kept": 1}
        }));

        assert_eq!(items, vec!["kept:1", "user:ООО Ромашка"]);
    }

    #[test]
    fn test_numbers_never_use_exponent() {
        let items = tokens(json!([1e21, 0.000001, -3, 12.0]));
        assert_eq!(items, vec!["1000000000000000000000", "0.000001", "-3", "12"]);
    }

    #[test]
    fn test_null_leaves_add_nothing() {
        let items = tokens(json!({"error": null, "data": {"found": 1}}));
        assert_eq!(items, vec!["found:1"]);
    }

    #[test]
    fn test_build_search_key_lowercases_and_joins() {
        let reference = ReceiptRef::parse(
            DomainCode::RuFns,
            "fn=123&i=45&fp=999&n=1&s=10.50&t=20240101T1200",
        )
        .unwrap();

        let without_payload = build_search_key(&reference, None).unwrap();
        assert_eq!(
            without_payload,
            "_created_at:2024-01-01 12:00 _sum:10.50 _fiscal_drive_number:123 \
             _fiscal_document_number:45 _fiscal_document_sign:999 _type:1"
        );

        let payload = br#"{"ticket":{"user":"OOO Romashka","totalSum":1050}}"#;
        let with_payload = build_search_key(&reference, Some(&payload[..])).unwrap();
        assert!(with_payload.starts_with(&without_payload));
        assert!(with_payload.ends_with("totalsum:1050 user:ooo romashka"));
    }

    #[test]
    fn test_html_payload_indexes_reference_only() {
        let reference = ReceiptRef::parse(
            DomainCode::KzTtc,
            "http://ofd1.kz/t/?i=1&f=2&s=3.00&t=20240309T123456",
        )
        .unwrap();

        let key = build_search_key(&reference, Some("<html>ИТОГО</html>".as_bytes())).unwrap();
        assert_eq!(key, build_search_key(&reference, None).unwrap());
    }
}
