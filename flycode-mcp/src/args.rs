use std::path::PathBuf;

use flycode_errors::AppError;
use flycode_errors::Result;
use serde_json::Value;

/// Drops top-level keys starting with `__` — defensive sanitization
/// before any argument is read (`spec.md` §4.J.3.b).
pub fn sanitize_arguments(value: &Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(map.iter().filter(|(k, _)| !k.starts_with("__")).map(|(k, v)| (k.clone(), v.clone())).collect()),
        other => other.clone(),
    }
}

pub fn str_field(args: &Value, key: &str) -> String {
    args.get(key).and_then(Value::as_str).unwrap_or("").to_string()
}

pub fn opt_str_field(args: &Value, key: &str) -> Option<String> {
    args.get(key).and_then(Value::as_str).map(str::to_string)
}

pub fn required_str_field(args: &Value, key: &str) -> Result<String> {
    let value = str_field(args, key);
    if value.is_empty() {
        Err(AppError::InvalidInput(format!("`{key}` is required")))
    } else {
        Ok(value)
    }
}

pub fn required_path_field(args: &Value, key: &str) -> Result<PathBuf> {
    let raw = required_str_field(args, key)?;
    Ok(flycode_sandbox::normalize_input(&raw))
}

pub fn bool_field(args: &Value, key: &str, default: bool) -> bool {
    args.get(key).and_then(Value::as_bool).unwrap_or(default)
}

pub fn u32_field(args: &Value, key: &str) -> Option<u32> {
    args.get(key).and_then(Value::as_u64).and_then(|v| u32::try_from(v).ok())
}

pub fn u64_field(args: &Value, key: &str) -> Option<u64> {
    args.get(key).and_then(Value::as_u64)
}

pub fn i64_field(args: &Value, key: &str) -> Option<i64> {
    args.get(key).and_then(Value::as_i64)
}

pub fn str_list_field(args: &Value, key: &str) -> Option<Vec<String>> {
    args.get(key)
        .and_then(Value::as_array)
        .map(|items| items.iter().filter_map(Value::as_str).map(str::to_string).collect())
}

pub fn string_map_field(args: &Value, key: &str) -> Option<std::collections::HashMap<String, String>> {
    args.get(key).and_then(Value::as_object).map(|map| {
        map.iter()
            .filter_map(|(k, v)| v.as_str().map(|s| (k.clone(), s.to_string())))
            .collect()
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn sanitize_drops_dunder_keys() {
        let input = json!({"path": "a", "__proto__": "bad", "ok": 1});
        let sanitized = sanitize_arguments(&input);
        assert!(sanitized.get("__proto__").is_none());
        assert_eq!(sanitized.get("path").unwrap(), "a");
    }

    #[test]
    fn required_str_field_rejects_missing_or_empty() {
        let input = json!({"path": ""});
        assert!(required_str_field(&input, "path").is_err());
        assert!(required_str_field(&input, "missing").is_err());
    }

    #[test]
    fn coercions_fall_back_on_wrong_type() {
        let input = json!({"limit": "not-a-number", "force": "true"});
        assert_eq!(u32_field(&input, "limit"), None);
        assert!(!bool_field(&input, "force", false));
    }
}
