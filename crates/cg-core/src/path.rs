//! Null-safe deep path lookup into host-owned data objects.
//!
//! The host application attaches undocumented, frequently changing data objects to its
//! custom elements. Lookups never fail loudly: a missing segment means "not populated yet".

use serde_json::Value;

/// Read-only view of a host data object.
///
/// Paths are dot-separated; numeric segments index arrays (`title.runs.0.text`).
pub trait DataSource {
    /// Leaf at `path` rendered as a string. Strings, numbers and booleans qualify.
    fn lookup(&self, path: &str) -> Option<String>;

    fn lookup_bool(&self, path: &str) -> Option<bool> {
        match self.lookup(path)?.as_str() {
            "true" => Some(true),
            "false" => Some(false),
            _ => None,
        }
    }

    /// First non-empty leaf among `paths`.
    fn lookup_any(&self, paths: &[&str]) -> Option<String> {
        paths
            .iter()
            .filter_map(|path| self.lookup(path))
            .find(|value| !value.is_empty())
    }
}

/// Walk `path` through a JSON value.
pub fn get<'a>(value: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Render a JSON leaf the way `DataSource::lookup` reports it.
pub fn leaf_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

impl DataSource for Value {
    fn lookup(&self, path: &str) -> Option<String> {
        get(self, path).and_then(leaf_to_string)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_get_nested() {
        let data = json!({"title": {"runs": [{"text": "Hello"}]}});
        assert_eq!(data.lookup("title.runs.0.text").as_deref(), Some("Hello"));
    }

    #[test]
    fn test_missing_segments_are_none() {
        let data = json!({"title": {"runs": []}});
        assert_eq!(data.lookup("title.runs.0.text"), None);
        assert_eq!(data.lookup("nope.deeper"), None);
        assert_eq!(data.lookup("title.runs.x"), None);
        assert_eq!(json!(null).lookup("a"), None);
    }

    #[test]
    fn test_non_leaf_is_none() {
        let data = json!({"a": {"b": 1}});
        assert_eq!(data.lookup("a"), None);
        assert_eq!(data.lookup("a.b").as_deref(), Some("1"));
    }

    #[test]
    fn test_lookup_bool_and_any() {
        let data = json!({"sub": true, "a": "", "b": "x"});
        assert_eq!(data.lookup_bool("sub"), Some(true));
        assert_eq!(data.lookup_bool("b"), None);
        assert_eq!(data.lookup_any(&["missing", "a", "b"]).as_deref(), Some("x"));
    }
}
