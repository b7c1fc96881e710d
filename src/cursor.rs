//! Opaque pagination cursor codec
//!
//! Wire format: base64( utf8( json( {<sort_field_name>: <iso8601>, "id": <string>} ) ) ).
//! The shape is interop-critical - cursors issued by other deployments of the
//! backend must decode here and vice versa. Internally a cursor is the typed
//! (sort value, id) pair of the last row of the previous page; the tie-break
//! on id is what makes pagination stable when many rows share a timestamp.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

use crate::error::{MirixError, Result};
use crate::types::SortField;

/// Decoded pagination cursor: last-seen sort value plus record id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor {
    pub field: SortField,
    pub value: DateTime<Utc>,
    pub id: String,
}

impl Cursor {
    /// Encode to the opaque wire form
    pub fn encode(&self) -> String {
        let mut obj = serde_json::Map::new();
        obj.insert(
            self.field.as_str().to_string(),
            serde_json::Value::String(self.value.to_rfc3339()),
        );
        obj.insert("id".to_string(), serde_json::Value::String(self.id.clone()));
        BASE64.encode(serde_json::Value::Object(obj).to_string())
    }

    /// Decode an opaque cursor, validating it against the requested sort field.
    ///
    /// Every failure mode (bad base64, bad UTF-8, bad JSON, missing keys,
    /// wrong sort field, bad timestamp) is an InvalidInput naming
    /// "invalid cursor format" - never silently treated as page one.
    pub fn decode(raw: &str, field: SortField) -> Result<Self> {
        let bytes = BASE64
            .decode(raw)
            .map_err(|e| invalid_cursor(format!("bad base64: {}", e)))?;
        let text = String::from_utf8(bytes)
            .map_err(|e| invalid_cursor(format!("bad utf-8: {}", e)))?;
        let value: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| invalid_cursor(format!("bad json: {}", e)))?;
        let obj = value
            .as_object()
            .ok_or_else(|| invalid_cursor("expected a json object".to_string()))?;

        let sort_raw = obj
            .get(field.as_str())
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid_cursor("missing required fields".to_string()))?;
        let id = obj
            .get("id")
            .and_then(|v| v.as_str())
            .ok_or_else(|| invalid_cursor("missing required fields".to_string()))?
            .to_string();

        let value = parse_cursor_timestamp(sort_raw)?;

        Ok(Cursor { field, value, id })
    }
}

fn invalid_cursor(detail: String) -> MirixError {
    MirixError::InvalidInput(format!("invalid cursor format: {}", detail))
}

/// Parse an ISO-8601 timestamp; timezone is optional (naive values are UTC)
fn parse_cursor_timestamp(s: &str) -> Result<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .map(|naive| Utc.from_utc_datetime(&naive))
        .map_err(|e| invalid_cursor(format!("bad timestamp '{}': {}", s, e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_round_trip() {
        let cursor = Cursor {
            field: SortField::OccurredAt,
            value: Utc::now(),
            id: "raw_mem-abc".to_string(),
        };
        let decoded = Cursor::decode(&cursor.encode(), SortField::OccurredAt).unwrap();
        assert_eq!(decoded.id, cursor.id);
        assert_eq!(decoded.value, cursor.value);
    }

    #[test]
    fn test_bad_base64_rejected() {
        let err = Cursor::decode("not-base64!!!", SortField::UpdatedAt).unwrap_err();
        assert!(err.to_string().contains("invalid cursor format"));
    }

    #[test]
    fn test_wrong_sort_field_rejected() {
        let cursor = Cursor {
            field: SortField::CreatedAt,
            value: Utc::now(),
            id: "raw_mem-abc".to_string(),
        };
        let encoded = cursor.encode();
        // Decoding against a different sort field must fail, not fall back
        let err = Cursor::decode(&encoded, SortField::UpdatedAt).unwrap_err();
        assert!(err.to_string().contains("missing required fields"));
    }

    #[test]
    fn test_missing_id_rejected() {
        let encoded = BASE64.encode(r#"{"updated_at": "2024-01-01T00:00:00Z"}"#);
        assert!(Cursor::decode(&encoded, SortField::UpdatedAt).is_err());
    }

    #[test]
    fn test_naive_timestamp_accepted() {
        // Cursors produced by deployments that strip the timezone
        let encoded = BASE64.encode(r#"{"updated_at": "2024-06-01T12:30:00.500000", "id": "raw_mem-1"}"#);
        let cursor = Cursor::decode(&encoded, SortField::UpdatedAt).unwrap();
        assert_eq!(cursor.id, "raw_mem-1");
        assert_eq!(cursor.value.timestamp(), 1717245000);
    }

    proptest! {
        /// Decode never panics on arbitrary input
        #[test]
        fn decode_never_panics(s in "\\PC{0,200}") {
            let _ = Cursor::decode(&s, SortField::UpdatedAt);
        }

        /// Every cursor we encode decodes back to the same pair
        #[test]
        fn encode_decode_round_trip(secs in 0i64..4_000_000_000i64, id in "[a-z0-9-]{1,40}") {
            let value = Utc.timestamp_opt(secs, 0).unwrap();
            let cursor = Cursor { field: SortField::CreatedAt, value, id };
            let decoded = Cursor::decode(&cursor.encode(), SortField::CreatedAt).unwrap();
            prop_assert_eq!(decoded, cursor);
        }
    }
}
