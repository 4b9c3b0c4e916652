#![deny(clippy::pedantic, unsafe_code)]
#![allow(clippy::module_name_repetitions)]

//! Argument composition for kiln
//!
//! A build is configured by an ordered list of partial argument objects
//! ([`Fragment`]s). Leaves are either plain values, which replace what came
//! before, or [`Mutation`]s, which say how to combine with it. The
//! [`Merger`] folds fragments left to right into a [`MergedConfig`] in which
//! every mutation has been resolved.
//!
//! ```
//! use kiln_args::{Fragment, Merger, Mutation, Schema};
//! use serde_json::json;
//!
//! let defaults = Fragment::from_value(json!({"cflags": "-O2"})).unwrap();
//! let user = Fragment::new().with("cflags", Mutation::suffix("-g", Some(" ")));
//!
//! let merged = Merger::new(Schema::default()).merge(&[defaults, user]).unwrap();
//! assert_eq!(merged.get("cflags"), Some(&json!("-O2 -g")));
//! ```

mod fragment;
mod merge;
mod mutation;
mod template;

pub use fragment::{Arg, Fragment};
pub use merge::{MergedConfig, Merger, Schema};
pub use mutation::{apply_all, Mutation, MUTATION_TAG};
pub use template::{Template, TemplateComponent};

/// Plain configuration value
pub type Value = serde_json::Value;

/// Merge fragments with no exclusivity rules
///
/// # Errors
///
/// Returns an error if a mutation is applied to a value of the wrong shape.
pub fn apply(fragments: &[Fragment]) -> kiln_errors::Result<MergedConfig> {
    Merger::new(Schema::default()).merge(fragments)
}

/// JSON type name used in error messages
#[must_use]
pub fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
