//! Environment composition
//!
//! An [`EnvironmentFragment`] records, per variable, an ordered chain of
//! mutations together with the source and tier that contributed each one.
//! [`compose`] applies every chain in tier order (`Base`, then
//! `Dependency`, then `User`), preserving contribution order inside a tier.
//! Path-like variables default to `suffix(value, ":")`, so contributions
//! accumulate instead of replacing each other.

mod dependencies;

pub use dependencies::dependency_fragment;

use kiln_args::{Arg, Fragment, Mutation, Value};
use kiln_errors::{EnvironmentError, Error};
use std::collections::BTreeMap;

/// Variables whose values are `:`-separated search paths
pub const PATH_LIKE: &[&str] = &[
    "PATH",
    "PKG_CONFIG_PATH",
    "LD_LIBRARY_PATH",
    "LIBRARY_PATH",
    "CPATH",
    "CMAKE_PREFIX_PATH",
    "ACLOCAL_PATH",
];

#[must_use]
pub fn is_path_like(name: &str) -> bool {
    PATH_LIKE.contains(&name)
}

/// Precedence class of an environment source
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Tier {
    /// Build system defaults and cross toolchain settings
    Base,
    /// Contributions from resolved dependencies
    Dependency,
    /// The caller's `env` overrides
    User,
}

#[derive(Debug, Clone, PartialEq)]
struct Contribution {
    source: String,
    tier: Tier,
    mutation: Mutation,
}

/// Per-variable mutation chains from one or more sources
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvironmentFragment {
    source: String,
    tier: Option<Tier>,
    vars: BTreeMap<String, Vec<Contribution>>,
}

impl EnvironmentFragment {
    #[must_use]
    pub fn new(source: impl Into<String>, tier: Tier) -> Self {
        Self {
            source: source.into(),
            tier: Some(tier),
            vars: BTreeMap::new(),
        }
    }

    /// Build from an argument fragment such as a recipe's `env` key.
    /// Plain values on path-like variables become `suffix(value, ":")`,
    /// other plain values become `set`.
    ///
    /// # Errors
    ///
    /// Returns `InvalidValue` for nested objects.
    pub fn from_fragment(
        source: impl Into<String>,
        tier: Tier,
        fragment: &Fragment,
    ) -> Result<Self, Error> {
        let mut env = Self::new(source, tier);
        for (name, arg) in fragment.iter() {
            match arg {
                Arg::Value(value) => {
                    let text = scalar(name, value)?;
                    env.push(name, default_mutation(name, text));
                }
                Arg::Mutation(mutation) => env.push(name, mutation.clone()),
                Arg::Object(_) => {
                    return Err(EnvironmentError::InvalidValue {
                        variable: name.clone(),
                        message: "nested objects are not environment values".to_string(),
                    }
                    .into())
                }
            }
        }
        Ok(env)
    }

    /// Record `mutation` for `name`
    pub fn push(&mut self, name: &str, mutation: Mutation) {
        let contribution = Contribution {
            source: self.source.clone(),
            tier: self.tier.unwrap_or(Tier::User),
            mutation,
        };
        self.vars
            .entry(name.to_string())
            .or_default()
            .push(contribution);
    }

    /// Set `name` using the default mutation for its kind
    #[must_use]
    pub fn with(mut self, name: &str, value: impl Into<String>) -> Self {
        self.push(name, default_mutation(name, value.into()));
        self
    }

    #[must_use]
    pub fn with_mutation(mut self, name: &str, mutation: Mutation) -> Self {
        self.push(name, mutation);
        self
    }

    /// This fragment followed by `next`; chains concatenate per variable
    #[must_use]
    pub fn then(mut self, next: Self) -> Self {
        for (name, contributions) in next.vars {
            self.vars.entry(name).or_default().extend(contributions);
        }
        if self.source.is_empty() {
            self.source = next.source;
        } else if !next.source.is_empty() {
            self.source = format!("{}+{}", self.source, next.source);
        }
        self
    }

    #[must_use]
    pub fn source(&self) -> &str {
        &self.source
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    pub fn variables(&self) -> impl Iterator<Item = &str> {
        self.vars.keys().map(String::as_str)
    }

    /// Per-variable mutation chains without their source labels
    #[must_use]
    pub fn canonical(&self) -> Value {
        Value::Object(
            self.vars
                .iter()
                .map(|(name, chain)| {
                    let mutations = chain.iter().map(|c| c.mutation.encode()).collect();
                    (name.clone(), Value::Array(mutations))
                })
                .collect(),
        )
    }
}

fn default_mutation(name: &str, value: String) -> Mutation {
    if is_path_like(name) {
        Mutation::suffix(value, Some(":"))
    } else {
        Mutation::set(value)
    }
}

fn scalar(name: &str, value: &Value) -> Result<String, Error> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => Err(EnvironmentError::InvalidValue {
            variable: name.to_string(),
            message: format!("expected a string, got {}", kiln_args::type_name(other)),
        }
        .into()),
    }
}

/// A fully resolved set of environment variables
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Environment {
    vars: BTreeMap<String, String>,
}

impl Environment {
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.vars.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    #[must_use]
    pub fn into_map(self) -> BTreeMap<String, String> {
        self.vars
    }

    /// Split a path-like variable into its entries
    #[must_use]
    pub fn paths(&self, name: &str) -> Vec<&str> {
        self.get(name)
            .map(|v| v.split(':').filter(|s| !s.is_empty()).collect())
            .unwrap_or_default()
    }
}

/// Compose fragments into one environment
///
/// # Errors
///
/// Returns `EnvironmentConflict` when two dependency sources replace the
/// same non-path variable with different values, `TypeMismatch` when a
/// mutation does not fit the current value, and `InvalidValue` when a
/// variable resolves to something other than a scalar.
pub fn compose(fragments: &[EnvironmentFragment]) -> Result<Environment, Error> {
    let mut chains: BTreeMap<&str, Vec<&Contribution>> = BTreeMap::new();
    for fragment in fragments {
        for (name, contributions) in &fragment.vars {
            chains.entry(name).or_default().extend(contributions.iter());
        }
    }

    let mut vars = BTreeMap::new();
    for (name, mut chain) in chains {
        // stable: contribution order is kept within a tier
        chain.sort_by_key(|c| c.tier);
        if !is_path_like(name) {
            check_dependency_conflicts(name, &chain)?;
        }

        let mut value: Option<Value> = None;
        for contribution in chain {
            value = contribution.mutation.apply(name, value)?;
        }
        if let Some(value) = value {
            vars.insert(name.to_string(), scalar(name, &value)?);
        }
    }
    Ok(Environment { vars })
}

fn check_dependency_conflicts(name: &str, chain: &[&Contribution]) -> Result<(), Error> {
    // each source's latest replacement is what it finally asks for
    let mut settled: Vec<(&str, Option<Value>)> = Vec::new();
    for contribution in chain.iter().filter(|c| c.tier == Tier::Dependency) {
        if !contribution.mutation.replaces() {
            continue;
        }
        let value = contribution.mutation.apply(name, None)?;
        match settled.iter_mut().find(|(source, _)| *source == contribution.source) {
            Some(entry) => entry.1 = value,
            None => settled.push((contribution.source.as_str(), value)),
        }
    }

    if let Some(((first_source, first_value), rest)) = settled.split_first() {
        if let Some((second_source, second_value)) = rest.iter().find(|(_, v)| v != first_value) {
            return Err(EnvironmentError::EnvironmentConflict {
                variable: name.to_string(),
                first_source: (*first_source).to_string(),
                first_value: describe(first_value.as_ref()),
                second_source: (*second_source).to_string(),
                second_value: describe(second_value.as_ref()),
            }
            .into());
        }
    }
    Ok(())
}

fn describe(value: Option<&Value>) -> String {
    match value {
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
        None => "<unset>".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kiln_errors::ArgsError;

    #[test]
    fn path_like_values_accumulate() {
        let env = compose(&[
            EnvironmentFragment::new("host", Tier::Base).with("PATH", "/usr/bin"),
            EnvironmentFragment::new("zlib", Tier::Dependency).with("PATH", "/zlib/bin"),
            EnvironmentFragment::new("pcre", Tier::Dependency).with("PATH", "/pcre/bin"),
        ])
        .unwrap();
        assert_eq!(env.get("PATH"), Some("/usr/bin:/zlib/bin:/pcre/bin"));
        assert_eq!(env.paths("PATH").len(), 3);
    }

    #[test]
    fn user_overrides_win_regardless_of_position() {
        let env = compose(&[
            EnvironmentFragment::new("env", Tier::User).with("CC", "clang"),
            EnvironmentFragment::new("zlib", Tier::Dependency).with("CC", "gcc"),
            EnvironmentFragment::new("autotools", Tier::Base).with("CC", "cc"),
        ])
        .unwrap();
        assert_eq!(env.get("CC"), Some("clang"));
    }

    #[test]
    fn dependencies_disagreeing_on_a_scalar_conflict() {
        let err = compose(&[
            EnvironmentFragment::new("openssl", Tier::Dependency).with("SSL_MODE", "static"),
            EnvironmentFragment::new("libressl", Tier::Dependency).with("SSL_MODE", "shared"),
        ])
        .unwrap_err();
        match err {
            Error::Environment(EnvironmentError::EnvironmentConflict {
                variable,
                first_source,
                second_source,
                ..
            }) => {
                assert_eq!(variable, "SSL_MODE");
                assert_eq!(first_source, "openssl");
                assert_eq!(second_source, "libressl");
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn agreeing_dependencies_do_not_conflict() {
        let env = compose(&[
            EnvironmentFragment::new("a", Tier::Dependency).with("MODE", "x"),
            EnvironmentFragment::new("b", Tier::Dependency).with("MODE", "x"),
        ])
        .unwrap();
        assert_eq!(env.get("MODE"), Some("x"));
    }

    #[test]
    fn only_a_sources_final_value_counts() {
        let env = compose(&[
            EnvironmentFragment::new("a", Tier::Dependency)
                .with("MODE", "x")
                .with("MODE", "y"),
            EnvironmentFragment::new("b", Tier::Dependency).with("MODE", "y"),
        ])
        .unwrap();
        assert_eq!(env.get("MODE"), Some("y"));

        let err = compose(&[
            EnvironmentFragment::new("a", Tier::Dependency)
                .with("MODE", "y")
                .with("MODE", "x"),
            EnvironmentFragment::new("b", Tier::Dependency).with("MODE", "y"),
        ])
        .unwrap_err();
        assert!(matches!(
            err,
            Error::Environment(EnvironmentError::EnvironmentConflict { ref first_value, .. }) if first_value == "x"
        ));
    }

    #[test]
    fn base_contributions_override_in_order() {
        let env = compose(&[
            EnvironmentFragment::new("one", Tier::Base).with("CC", "gcc"),
            EnvironmentFragment::new("two", Tier::Base).with("CC", "clang"),
        ])
        .unwrap();
        assert_eq!(env.get("CC"), Some("clang"));
    }

    #[test]
    fn explicit_mutation_replaces_the_path_default() {
        let env = compose(&[
            EnvironmentFragment::new("host", Tier::Base).with("PATH", "/usr/bin"),
            EnvironmentFragment::new("env", Tier::User)
                .with_mutation("PATH", Mutation::prefix("/opt/bin", Some(":"))),
        ])
        .unwrap();
        assert_eq!(env.get("PATH"), Some("/opt/bin:/usr/bin"));
    }

    #[test]
    fn unset_removes_a_variable() {
        let env = compose(&[
            EnvironmentFragment::new("host", Tier::Base).with("MAKEFLAGS", "-j8"),
            EnvironmentFragment::new("env", Tier::User).with_mutation("MAKEFLAGS", Mutation::Unset),
        ])
        .unwrap();
        assert_eq!(env.get("MAKEFLAGS"), None);
    }

    #[test]
    fn from_fragment_applies_defaults() {
        let fragment = Fragment::from_value(serde_json::json!({
            "PKG_CONFIG_PATH": "/x/lib/pkgconfig",
            "CFLAGS": {"$mutation": "suffix", "value": "-O2", "separator": " "},
            "JOBS": 4,
        }))
        .unwrap();
        let env = compose(&[
            EnvironmentFragment::new("base", Tier::Base)
                .with("PKG_CONFIG_PATH", "/usr/lib/pkgconfig")
                .with("CFLAGS", "-g"),
            EnvironmentFragment::from_fragment("env", Tier::User, &fragment).unwrap(),
        ])
        .unwrap();
        assert_eq!(
            env.get("PKG_CONFIG_PATH"),
            Some("/usr/lib/pkgconfig:/x/lib/pkgconfig")
        );
        assert_eq!(env.get("CFLAGS"), Some("-g -O2"));
        assert_eq!(env.get("JOBS"), Some("4"));
    }

    #[test]
    fn nested_objects_are_rejected() {
        let fragment = Fragment::from_value(serde_json::json!({"A": {"B": "c"}})).unwrap();
        assert!(EnvironmentFragment::from_fragment("env", Tier::User, &fragment).is_err());
    }

    #[test]
    fn array_values_surface_type_mismatch() {
        let env = compose(&[
            EnvironmentFragment::new("a", Tier::Base)
                .with_mutation("X", Mutation::array_append(["a"])),
            EnvironmentFragment::new("b", Tier::User).with("X", "plain"),
        ])
        .unwrap();
        assert_eq!(env.get("X"), Some("plain"));

        let err = compose(&[
            EnvironmentFragment::new("a", Tier::Base)
                .with_mutation("X", Mutation::array_append(["a"])),
            EnvironmentFragment::new("b", Tier::User)
                .with_mutation("X", Mutation::suffix("b", Some(" "))),
        ])
        .unwrap_err();
        assert!(matches!(err, Error::Args(ArgsError::TypeMismatch { .. })));
    }
}
