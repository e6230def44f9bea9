//! ---
//! netorch_section: "04-device-state"
//! netorch_subsection: "module"
//! netorch_type: "source"
//! netorch_scope: "code"
//! netorch_description: "Device records, status model and the per-project registry."
//! netorch_version: "v0.0.0-prealpha"
//! netorch_owner: "tbd"
//! ---
use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

/// Emulator-specific properties in insertion order.
///
/// A key is never stored with a `null` value: inserting `null` removes the key.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PropertyMap(IndexMap<String, Value>);

impl PropertyMap {
    /// Empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a property; `null` removes it.
    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        let key = key.into();
        if value.is_null() {
            self.0.shift_remove(&key);
        } else {
            self.0.insert(key, value);
        }
    }

    /// Merge optional values: `None` and `null` remove the key.
    pub fn merge_optional<'a, I>(&mut self, entries: I)
    where
        I: IntoIterator<Item = (&'a String, &'a Option<Value>)>,
    {
        for (key, value) in entries {
            self.insert(key.clone(), value.clone().unwrap_or(Value::Null));
        }
    }

    /// Remove a property.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.0.shift_remove(key)
    }

    /// Look up a property.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Whether a property is set.
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    /// Iterate in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Property names in insertion order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.0.keys().map(String::as_str)
    }

    /// Number of properties.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when no property is set.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Copy into a JSON object, preserving order.
    pub fn to_json_map(&self) -> Map<String, Value> {
        self.0
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl FromIterator<(String, Value)> for PropertyMap {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (key, value) in iter {
            map.insert(key, value);
        }
        map
    }
}

impl Serialize for PropertyMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for PropertyMap {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = IndexMap::<String, Value>::deserialize(deserializer)?;
        Ok(raw.into_iter().collect())
    }
}
