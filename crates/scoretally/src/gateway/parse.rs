//! Lenient decoding of extraction responses.
//!
//! A response that is not JSON at all is a gateway failure. Anything that
//! parses but does not carry an `items` array decodes to zero records, and
//! unreadable fields inside a record degrade to "Unknown" / 0.

use std::sync::LazyLock;

use log::debug;
use regex::Regex;
use serde_json::Value;

use crate::error::GatewayError;
use crate::job::ExtractedRecord;

pub const UNKNOWN_ACCOUNT: &str = "Unknown";

static RE_FENCE_OPEN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\s*```(?:json|JSON)?\s*").unwrap());
static RE_FENCE_CLOSE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\s*```\s*$").unwrap());

/// Removes a surrounding markdown code fence, if any.
pub fn strip_code_fence(text: &str) -> String {
    let opened = RE_FENCE_OPEN.replace(text, "");
    RE_FENCE_CLOSE.replace(&opened, "").into_owned()
}

pub fn parse_extraction_response(text: &str) -> Result<Vec<ExtractedRecord>, GatewayError> {
    if text.trim().is_empty() {
        return Err(GatewayError::EmptyResponse);
    }

    let cleaned = strip_code_fence(text);
    let value: Value = serde_json::from_str(&cleaned)
        .map_err(|e| GatewayError::MalformedResponse(e.to_string()))?;

    let Some(items) = value.get("items").and_then(Value::as_array) else {
        debug!("Extraction response has no items array, treating as empty");
        return Ok(Vec::new());
    };

    Ok(items.iter().filter_map(record_from_value).collect())
}

fn record_from_value(value: &Value) -> Option<ExtractedRecord> {
    let Value::Object(map) = value else {
        debug!("Skipping non-object extraction item: {}", value);
        return None;
    };

    let account = match map.get("account") {
        Some(Value::String(s)) if !s.trim().is_empty() => s.trim().to_string(),
        Some(Value::Number(n)) => n.to_string(),
        _ => UNKNOWN_ACCOUNT.to_string(),
    };

    let time = match map.get("time") {
        Some(Value::String(s)) => s.trim().to_string(),
        _ => String::new(),
    };

    let score = match map.get("score") {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().replace(',', "").parse::<f64>().unwrap_or(0.0),
        _ => 0.0,
    };
    let score = if score.is_finite() && score > 0.0 {
        score
    } else {
        0.0
    };

    Some(ExtractedRecord {
        account,
        time,
        score,
    })
}
