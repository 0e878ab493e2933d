//! Post-processing: read rows out of a VLM response.
//!
//! Even when told to "output ONLY a JSON array", models regularly:
//!
//! - wrap the JSON in ` ```json ... ``` ` fences,
//! - add a sentence before or after it ("Here is the extracted data:"),
//! - wrap the array in an object (`{"rows": [...]}`, `{"data": [...]}`),
//! - answer a key-value form with a single object instead of an array,
//! - nest an object or list inside a cell.
//!
//! [`parse_rows`] accepts all of those and produces flat rows of JSON
//! scalars. Anything it still cannot read is a [`PageError`], which the
//! orchestrator records on the page like any other extraction failure.

use crate::error::PageError;
use crate::page::Row;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static RE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)```[A-Za-z0-9_-]*[ \t]*\r?\n?(.*?)```").unwrap());

/// Parse a raw VLM response into rows.
///
/// A response that parses to zero rows counts as empty.
pub fn parse_rows(raw: &str) -> Result<Vec<Row>, PageError> {
    let text = raw.trim();
    if text.is_empty() {
        return Err(PageError::EmptyResponse);
    }

    let candidate = strip_fences(text);
    let value = parse_json_lenient(candidate).ok_or_else(|| PageError::MalformedResponse {
        detail: format!("no JSON found in response starting {:?}", preview(text)),
    })?;

    let rows = rows_from_value(value)?;
    if rows.is_empty() {
        return Err(PageError::EmptyResponse);
    }
    Ok(rows)
}

/// Contents of the first fenced block, or the input unchanged.
fn strip_fences(text: &str) -> &str {
    RE_FENCE
        .captures(text)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().trim())
        .unwrap_or(text)
}

/// Parse `text` as JSON; failing that, the span from the first `[`/`{` to
/// the last matching closer.
fn parse_json_lenient(text: &str) -> Option<Value> {
    if let Ok(v) = serde_json::from_str(text) {
        return Some(v);
    }
    let start = text.find(['[', '{'])?;
    let closer = if text[start..].starts_with('[') { ']' } else { '}' };
    let end = text.rfind(closer)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&text[start..=end]).ok()
}

fn rows_from_value(value: Value) -> Result<Vec<Row>, PageError> {
    match value {
        Value::Array(items) => items
            .into_iter()
            .enumerate()
            .map(|(i, item)| match item {
                Value::Object(obj) => Ok(flatten_row(obj)),
                other => Err(PageError::MalformedResponse {
                    detail: format!("row {} is {}, expected an object", i + 1, kind(&other)),
                }),
            })
            .collect(),
        Value::Object(obj) => {
            // `{"rows": [{...}, ...]}` and friends: take the first array of objects.
            let wrapped = obj
                .values()
                .find(|v| {
                    v.as_array()
                        .is_some_and(|a| !a.is_empty() && a.iter().all(Value::is_object))
                })
                .cloned();
            match wrapped {
                Some(inner) => rows_from_value(inner),
                None => Ok(vec![flatten_row(obj)]),
            }
        }
        other => Err(PageError::MalformedResponse {
            detail: format!("response is {}, expected an array of objects", kind(&other)),
        }),
    }
}

/// Trim column names and turn nested values into their JSON text.
fn flatten_row(obj: serde_json::Map<String, Value>) -> Row {
    obj.into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::Array(_) | Value::Object(_) => Value::String(value.to_string()),
                scalar => scalar,
            };
            (key.trim().to_string(), value)
        })
        .collect()
}

fn kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

fn preview(text: &str) -> String {
    text.chars().take(40).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn plain_array() {
        let rows = parse_rows(r#"[{"Name": "Ada", "Age": 36}, {"Name": "Alan", "Age": 41}]"#).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0]["Name"], json!("Ada"));
        assert_eq!(rows[1]["Age"], json!(41));
    }

    #[test]
    fn column_order_is_preserved() {
        let rows = parse_rows(r#"[{"z": 1, "a": 2, "m": 3}]"#).unwrap();
        let keys: Vec<&str> = rows[0].keys().map(String::as_str).collect();
        assert_eq!(keys, vec!["z", "a", "m"]);
    }

    #[test]
    fn fenced_json_with_chatter() {
        let raw = "Here is the data:\n```json\n[{\"a\": \"1\"}]\n```\nLet me know!";
        let rows = parse_rows(raw).unwrap();
        assert_eq!(rows[0]["a"], json!("1"));
    }

    #[test]
    fn unfenced_json_with_chatter() {
        let raw = "Sure! [{\"a\": \"1\"}, {\"a\": \"2\"}] Hope this helps.";
        assert_eq!(parse_rows(raw).unwrap().len(), 2);
    }

    #[test]
    fn wrapped_array() {
        let rows = parse_rows(r#"{"title": "Register", "rows": [{"a": 1}, {"a": 2}]}"#).unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[test]
    fn single_object_is_one_row() {
        let rows = parse_rows(r#"{"Invoice No": "A-17", "Paid": true}"#).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["Paid"], json!(true));
    }

    #[test]
    fn nested_values_are_flattened_and_keys_trimmed() {
        let rows = parse_rows(r#"[{" Items ": ["x", "y"], "Meta": {"k": 1}}]"#).unwrap();
        assert_eq!(rows[0]["Items"], json!(r#"["x","y"]"#));
        assert_eq!(rows[0]["Meta"], json!(r#"{"k":1}"#));
    }

    #[test]
    fn empty_and_blank_responses() {
        assert!(matches!(parse_rows("   "), Err(PageError::EmptyResponse)));
        assert!(matches!(parse_rows("[]"), Err(PageError::EmptyResponse)));
    }

    #[test]
    fn prose_only_is_malformed() {
        let err = parse_rows("I could not read this page.").unwrap_err();
        assert!(matches!(err, PageError::MalformedResponse { .. }));
    }

    #[test]
    fn array_of_scalars_is_malformed() {
        let err = parse_rows(r#"["a", "b"]"#).unwrap_err();
        assert!(err.to_string().contains("row 1"), "got: {err}");
    }
}
