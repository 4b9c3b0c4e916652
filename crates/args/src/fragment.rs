//! Partial argument objects

use crate::mutation::Mutation;
use crate::Value;
use kiln_errors::ArgsError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Map;
use std::collections::BTreeMap;

/// A leaf or subtree inside a fragment
#[derive(Debug, Clone, PartialEq)]
pub enum Arg {
    /// Concrete value; an implicit `set`
    Value(Value),
    Mutation(Mutation),
    /// Nested fragment, merged structurally
    Object(Fragment),
}

impl From<Value> for Arg {
    fn from(value: Value) -> Self {
        Self::Value(value)
    }
}

impl From<Mutation> for Arg {
    fn from(mutation: Mutation) -> Self {
        Self::Mutation(mutation)
    }
}

impl From<Fragment> for Arg {
    fn from(fragment: Fragment) -> Self {
        Self::Object(fragment)
    }
}

impl From<&str> for Arg {
    fn from(value: &str) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<String> for Arg {
    fn from(value: String) -> Self {
        Self::Value(Value::from(value))
    }
}

impl From<bool> for Arg {
    fn from(value: bool) -> Self {
        Self::Value(Value::from(value))
    }
}

/// A partial, possibly nested argument object
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Fragment(BTreeMap<String, Arg>);

impl Fragment {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `arg` at a dot-separated path, creating intermediate objects
    #[must_use]
    pub fn with(mut self, path: &str, arg: impl Into<Arg>) -> Self {
        self.insert(path, arg);
        self
    }

    /// Insert `arg` at a dot-separated path
    pub fn insert(&mut self, path: &str, arg: impl Into<Arg>) {
        let mut segments = path.split('.').collect::<Vec<_>>();
        let Some(last) = segments.pop() else {
            return;
        };
        let mut node = self;
        for segment in segments {
            let slot = node
                .0
                .entry(segment.to_string())
                .or_insert_with(|| Arg::Object(Fragment::new()));
            if !matches!(slot, Arg::Object(_)) {
                *slot = Arg::Object(Fragment::new());
            }
            let Arg::Object(child) = slot else {
                unreachable!("slot was just made an object");
            };
            node = child;
        }
        node.0.insert(last.to_string(), arg.into());
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Arg> {
        self.0.get(key)
    }

    /// Remove and return a top-level key
    pub fn remove(&mut self, key: &str) -> Option<Arg> {
        self.0.remove(key)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Arg)> {
        self.0.iter()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Decode a JSON object into a fragment
    ///
    /// Objects carrying a `$mutation` key become mutations, other objects
    /// become nested fragments, and `null` leaves are dropped.
    ///
    /// # Errors
    ///
    /// Returns `InvalidFragment` if `value` is not an object, or any error
    /// from decoding an embedded mutation.
    pub fn from_value(value: Value) -> Result<Self, ArgsError> {
        match value {
            Value::Object(map) => Self::from_map("", map),
            other => Err(ArgsError::InvalidFragment {
                message: format!("fragment must be an object, got {}", crate::type_name(&other)),
            }),
        }
    }

    fn from_map(prefix: &str, map: Map<String, Value>) -> Result<Self, ArgsError> {
        let mut out = BTreeMap::new();
        for (key, value) in map {
            let path = if prefix.is_empty() {
                key.clone()
            } else {
                format!("{prefix}.{key}")
            };
            let arg = match value {
                Value::Null => continue,
                Value::Object(object) if Mutation::is_encoded(&object) => {
                    Arg::Mutation(Mutation::decode(&path, &object)?)
                }
                Value::Object(object) => Arg::Object(Self::from_map(&path, object)?),
                other => Arg::Value(other),
            };
            out.insert(key, arg);
        }
        Ok(Self(out))
    }

    /// Encode back to JSON, with mutations as `$mutation` objects
    #[must_use]
    pub fn to_value(&self) -> Value {
        let map = self
            .0
            .iter()
            .map(|(key, arg)| {
                let value = match arg {
                    Arg::Value(value) => value.clone(),
                    Arg::Mutation(mutation) => mutation.encode(),
                    Arg::Object(fragment) => fragment.to_value(),
                };
                (key.clone(), value)
            })
            .collect();
        Value::Object(map)
    }
}

impl TryFrom<Value> for Fragment {
    type Error = ArgsError;

    fn try_from(value: Value) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

impl Serialize for Fragment {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.to_value().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Fragment {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn dotted_insert_builds_nested_objects() {
        let fragment = Fragment::new()
            .with("phases.configure.args", json!(["--disable-nls"]))
            .with("phases.build", Mutation::Unset);

        let Some(Arg::Object(phases)) = fragment.get("phases") else {
            panic!("phases should be an object");
        };
        assert!(matches!(phases.get("build"), Some(Arg::Mutation(Mutation::Unset))));
        assert_eq!(
            fragment.to_value(),
            json!({"phases": {"configure": {"args": ["--disable-nls"]}, "build": {"$mutation": "unset"}}})
        );
    }

    #[test]
    fn decodes_mutations_and_drops_nulls() {
        let fragment = Fragment::from_value(json!({
            "cflags": {"$mutation": "suffix", "value": "-g", "separator": " "},
            "sdk": null,
            "env": {"CC": "clang"}
        }))
        .unwrap();

        assert!(fragment.get("sdk").is_none());
        assert_eq!(
            fragment.get("cflags"),
            Some(&Arg::Mutation(Mutation::suffix("-g", Some(" "))))
        );
        assert!(matches!(fragment.get("env"), Some(Arg::Object(_))));
    }

    #[test]
    fn nested_mutation_errors_name_the_full_path() {
        let err = Fragment::from_value(json!({
            "phases": {"configure": {"args": {"$mutation": "array_append", "values": 3}}}
        }))
        .unwrap_err();
        assert!(
            matches!(err, ArgsError::TypeMismatch { ref key, .. } if key == "phases.configure.args.values")
        );
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(Fragment::from_value(json!([1, 2])).is_err());
    }
}
