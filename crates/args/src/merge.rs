//! Folding fragments into one configuration

use crate::fragment::{Arg, Fragment};
use crate::Value;
use kiln_errors::{ArgsError, Error};
use kiln_hash::Hash;
use serde::de::DeserializeOwned;
use serde_json::Map;
use std::collections::BTreeMap;

/// Exclusivity rules for merging
///
/// Patterns are dot-separated; `*` matches exactly one segment. At an
/// exclusive path, one fragment replacing the value and another patching
/// inside it is an [`ArgsError::ArgumentConflict`].
#[derive(Debug, Clone, Default)]
pub struct Schema {
    exclusive: Vec<Vec<String>>,
}

impl Schema {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn exclusive(mut self, pattern: &str) -> Self {
        self.exclusive
            .push(pattern.split('.').map(str::to_string).collect());
        self
    }

    #[must_use]
    pub fn is_exclusive(&self, path: &[&str]) -> bool {
        self.exclusive.iter().any(|pattern| {
            pattern.len() == path.len()
                && pattern
                    .iter()
                    .zip(path)
                    .all(|(p, segment)| p == "*" || p == segment)
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Use {
    Replace,
    Patch,
}

impl Use {
    fn describe(self) -> &'static str {
        match self {
            Self::Replace => "replaces the whole value",
            Self::Patch => "modifies part of the value",
        }
    }
}

#[derive(Default)]
struct Uses {
    replace: Option<usize>,
    patch: Option<usize>,
}

/// Folds an ordered sequence of fragments
#[derive(Debug, Clone, Default)]
pub struct Merger {
    schema: Schema,
    base: Map<String, Value>,
}

impl Merger {
    #[must_use]
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            base: Map::new(),
        }
    }

    /// Seed the accumulator. The seed is not a fragment and never takes
    /// part in conflict detection.
    #[must_use]
    pub fn with_base(mut self, base: Map<String, Value>) -> Self {
        self.base = base;
        self
    }

    /// Merge `fragments` left to right
    ///
    /// # Errors
    ///
    /// Returns `ArgumentConflict` for exclusive keys used both ways, or
    /// `TypeMismatch` when a mutation meets a value of the wrong shape.
    pub fn merge(&self, fragments: &[Fragment]) -> Result<MergedConfig, Error> {
        let mut state = MergeState {
            schema: &self.schema,
            uses: BTreeMap::new(),
        };
        let mut acc = self.base.clone();
        let mut path = Vec::new();
        for (index, fragment) in fragments.iter().enumerate() {
            state.merge_object(&mut acc, fragment, index, &mut path)?;
        }
        Ok(MergedConfig {
            value: Value::Object(acc),
        })
    }
}

struct MergeState<'a> {
    schema: &'a Schema,
    uses: BTreeMap<String, Uses>,
}

impl MergeState<'_> {
    fn merge_object<'f>(
        &mut self,
        acc: &mut Map<String, Value>,
        fragment: &'f Fragment,
        index: usize,
        path: &mut Vec<&'f str>,
    ) -> Result<(), ArgsError> {
        for (key, arg) in fragment.iter() {
            path.push(key.as_str());
            let dotted = path.join(".");
            match arg {
                Arg::Value(value) => {
                    self.record(path, &dotted, Use::Replace, index)?;
                    acc.insert(key.clone(), value.clone());
                }
                Arg::Mutation(mutation) => {
                    let usage = if mutation.replaces() {
                        Use::Replace
                    } else {
                        Use::Patch
                    };
                    self.record(path, &dotted, usage, index)?;
                    if let Some(value) = mutation.apply(&dotted, acc.remove(key))? {
                        acc.insert(key.clone(), value);
                    }
                }
                Arg::Object(child) => {
                    self.record(path, &dotted, Use::Patch, index)?;
                    let slot = acc
                        .entry(key.clone())
                        .or_insert_with(|| Value::Object(Map::new()));
                    if !slot.is_object() {
                        *slot = Value::Object(Map::new());
                    }
                    if let Value::Object(inner) = slot {
                        self.merge_object(inner, child, index, path)?;
                    }
                }
            }
            path.pop();
        }
        Ok(())
    }

    fn record(
        &mut self,
        path: &[&str],
        dotted: &str,
        usage: Use,
        index: usize,
    ) -> Result<(), ArgsError> {
        if !self.schema.is_exclusive(path) {
            return Ok(());
        }
        let uses = self.uses.entry(dotted.to_string()).or_default();
        let (mine, other, other_use) = match usage {
            Use::Replace => (&mut uses.replace, uses.patch, Use::Patch),
            Use::Patch => (&mut uses.patch, uses.replace, Use::Replace),
        };
        if let Some(first) = other.filter(|&first| first != index) {
            return Err(ArgsError::ArgumentConflict {
                key: dotted.to_string(),
                first,
                first_use: other_use.describe().to_string(),
                second: index,
                second_use: usage.describe().to_string(),
            });
        }
        mine.get_or_insert(index);
        Ok(())
    }
}

/// The fully resolved configuration; contains no mutations
#[derive(Debug, Clone, PartialEq)]
pub struct MergedConfig {
    value: Value,
}

impl MergedConfig {
    #[must_use]
    pub fn value(&self) -> &Value {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> Value {
        self.value
    }

    /// Look up a dot-separated path
    #[must_use]
    pub fn get(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.value, |node, segment| node.get(segment))
    }

    /// Deserialize the value at `path` into `T`
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` when the value has the wrong shape.
    pub fn get_typed<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>, ArgsError> {
        self.get(path)
            .map(|value| deserialize(path, value.clone()))
            .transpose()
    }

    /// Deserialize the whole configuration into `T`
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` when the configuration has the wrong shape.
    pub fn typed<T: DeserializeOwned>(&self) -> Result<T, ArgsError> {
        deserialize("", self.value.clone())
    }

    /// BLAKE3 digest of the canonical (key-sorted) JSON encoding
    #[must_use]
    pub fn digest(&self) -> Hash {
        // serde_json maps are BTreeMaps, so key order is already canonical
        Hash::from_data(self.value.to_string().as_bytes())
    }
}

fn deserialize<T: DeserializeOwned>(path: &str, value: Value) -> Result<T, ArgsError> {
    let found = crate::type_name(&value);
    serde_json::from_value(value).map_err(|e| ArgsError::TypeMismatch {
        key: if path.is_empty() { "<root>".to_string() } else { path.to_string() },
        mutation: "set".to_string(),
        expected: format!("{} ({e})", std::any::type_name::<T>()),
        found: found.to_string(),
    })
}
