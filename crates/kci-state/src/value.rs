//! The pipeline State and the update batches stages produce.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Accumulated pipeline facts, keyed by name.
///
/// Values are strings for anything read back from disk, but stages and the
/// command line may also store numbers, flags, lists and maps.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct State(BTreeMap<String, Value>);

impl State {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether `key` holds a value that counts as supplied.
    ///
    /// Null, empty strings, empty lists/maps and `false` do not count, so a
    /// lower-precedence source may still fill them.
    pub fn is_supplied(&self, key: &str) -> bool {
        self.0.get(key).map(is_supplied).unwrap_or(false)
    }

    /// Non-empty string value.
    pub fn str(&self, key: &str) -> Option<&str> {
        match self.0.get(key) {
            Some(Value::String(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        }
    }

    /// Scalar value rendered as a string (numbers and flags included).
    pub fn string(&self, key: &str) -> Option<String> {
        match self.0.get(key) {
            Some(v @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) if is_supplied(v) => {
                render(v)
            }
            _ => None,
        }
    }

    /// Integer value, accepting numeric strings read back from disk.
    pub fn int(&self, key: &str) -> Option<i64> {
        match self.0.get(key) {
            Some(Value::Number(n)) => n.as_i64(),
            Some(Value::String(s)) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// List of strings; a lone string is treated as a one-element list.
    pub fn strings(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items.iter().filter_map(render).collect(),
            Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
            _ => Vec::new(),
        }
    }

    /// Boolean flag; strings such as `true`, `yes`, `1` and `on` are truthy.
    pub fn flag(&self, key: &str) -> bool {
        match self.0.get(key) {
            Some(Value::Bool(b)) => *b,
            Some(Value::String(s)) => matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "yes" | "1" | "on"
            ),
            Some(Value::Number(n)) => n.as_i64().map(|n| n != 0).unwrap_or(false),
            _ => false,
        }
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.remove(key)
    }

    /// Insert `value` only if `key` is not already supplied.
    ///
    /// Returns whether the value was taken.
    pub fn fill(&mut self, key: &str, value: impl Into<Value>) -> bool {
        if self.is_supplied(key) {
            return false;
        }
        self.0.insert(key.to_string(), value.into());
        true
    }

    /// Overwrite every key named in `update`. No deep merge.
    pub fn apply(&mut self, update: &StateUpdate) {
        for (key, value) in update.iter() {
            self.0.insert(key.to_string(), value.clone());
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Compact JSON rendering of the whole State.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.0)
    }
}

impl FromIterator<(String, Value)> for State {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        State(iter.into_iter().collect())
    }
}

/// An ordered batch of facts produced by one step of a stage.
///
/// A `null` value marks a field as "not applicable this run": it reaches the
/// in-memory State but is never written to the persisted record.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StateUpdate {
    entries: Vec<(String, Value)>,
}

impl StateUpdate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.push(key, value);
        self
    }

    /// Set `key` to `value`, or to null when `value` is `None`.
    pub fn maybe<V: Into<Value>>(mut self, key: impl Into<String>, value: Option<V>) -> Self {
        let value = value.map(Into::into).unwrap_or(Value::Null);
        self.push(key, value);
        self
    }

    pub fn push(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        let key = key.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

pub(crate) fn is_supplied(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
        Value::Number(_) => true,
    }
}

/// The on-disk form of a value. `None` for null.
pub(crate) fn render(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Number(n) => Some(n.to_string()),
        Value::Array(_) | Value::Object(_) => Some(value.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_supplied_rules() {
        let mut state = State::new();
        state.insert("empty", "");
        state.insert("off", false);
        state.insert("none", Value::Null);
        state.insert("list", json!([]));
        state.insert("zero", 0);
        state.insert("name", "linux");

        assert!(!state.is_supplied("empty"));
        assert!(!state.is_supplied("off"));
        assert!(!state.is_supplied("none"));
        assert!(!state.is_supplied("list"));
        assert!(!state.is_supplied("missing"));
        assert!(state.is_supplied("zero"));
        assert!(state.is_supplied("name"));
    }

    #[test]
    fn test_fill_keeps_supplied_value() {
        let mut state = State::new();
        state.insert("workdir", "/cli");
        assert!(!state.fill("workdir", "/persisted"));
        assert!(state.fill("krelease", "6.1.0"));
        assert_eq!(state.str("workdir"), Some("/cli"));
        assert_eq!(state.str("krelease"), Some("6.1.0"));
    }

    #[test]
    fn test_typed_getters() {
        let mut state = State::new();
        state.insert("retcode", "2");
        state.insert("wait", "yes");
        state.insert("patches", json!(["a.patch", "b.patch"]));
        state.insert("single", "c.patch");

        assert_eq!(state.int("retcode"), Some(2));
        assert_eq!(state.string("retcode").as_deref(), Some("2"));
        assert!(state.flag("wait"));
        assert_eq!(state.strings("patches"), vec!["a.patch", "b.patch"]);
        assert_eq!(state.strings("single"), vec!["c.patch"]);
        assert!(state.strings("missing").is_empty());
    }

    #[test]
    fn test_update_overwrites_duplicate_keys_in_place() {
        let update = StateUpdate::new()
            .set("a", "1")
            .set("b", "2")
            .set("a", "3")
            .maybe("c", None::<String>);

        let keys: Vec<&str> = update.iter().map(|(k, _)| k).collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(update.get("a"), Some(&json!("3")));
        assert_eq!(update.get("c"), Some(&Value::Null));
    }

    #[test]
    fn test_render_for_disk() {
        assert_eq!(render(&json!("x")), Some("x".to_string()));
        assert_eq!(render(&json!(7)), Some("7".to_string()));
        assert_eq!(render(&json!(true)), Some("true".to_string()));
        assert_eq!(render(&json!(["a"])), Some("[\"a\"]".to_string()));
        assert_eq!(render(&Value::Null), None);
    }
}
