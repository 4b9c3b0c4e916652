//! The mutation algebra
//!
//! Every variant has a defined result for an absent prior:
//!
//! | mutation          | absent prior        | present prior                 |
//! |-------------------|---------------------|-------------------------------|
//! | `set(v)`          | `v`                 | `v`                           |
//! | `unset`           | absent              | absent                        |
//! | `prefix(v, sep)`  | `v`                 | `v + sep + prior`             |
//! | `suffix(v, sep)`  | `v`                 | `prior + sep + v`             |
//! | `array_prepend`   | `vs`                | `vs ++ prior`                 |
//! | `array_append`    | `vs`                | `prior ++ vs`                 |
//! | `template_append` | rendered template   | `prior + sep + rendered`      |
//!
//! The algebra is not commutative; callers apply mutations in fragment order.

use crate::template::Template;
use crate::{type_name, Value};
use kiln_errors::ArgsError;
use serde_json::{json, Map};

/// Key marking an object as an encoded mutation
pub const MUTATION_TAG: &str = "$mutation";

#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    Set(Value),
    Unset,
    Prefix {
        value: String,
        separator: Option<String>,
    },
    Suffix {
        value: String,
        separator: Option<String>,
    },
    ArrayPrepend(Vec<Value>),
    ArrayAppend(Vec<Value>),
    TemplateAppend {
        template: Template,
        separator: Option<String>,
    },
}

impl Mutation {
    pub fn set(value: impl Into<Value>) -> Self {
        Self::Set(value.into())
    }

    pub fn prefix(value: impl Into<String>, separator: Option<&str>) -> Self {
        Self::Prefix {
            value: value.into(),
            separator: separator.map(str::to_string),
        }
    }

    pub fn suffix(value: impl Into<String>, separator: Option<&str>) -> Self {
        Self::Suffix {
            value: value.into(),
            separator: separator.map(str::to_string),
        }
    }

    pub fn array_prepend<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::ArrayPrepend(values.into_iter().map(Into::into).collect())
    }

    pub fn array_append<V: Into<Value>>(values: impl IntoIterator<Item = V>) -> Self {
        Self::ArrayAppend(values.into_iter().map(Into::into).collect())
    }

    #[must_use]
    pub fn template_append(template: Template, separator: Option<&str>) -> Self {
        Self::TemplateAppend {
            template,
            separator: separator.map(str::to_string),
        }
    }

    /// Wire name of this variant
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Set(_) => "set",
            Self::Unset => "unset",
            Self::Prefix { .. } => "prefix",
            Self::Suffix { .. } => "suffix",
            Self::ArrayPrepend(_) => "array_prepend",
            Self::ArrayAppend(_) => "array_append",
            Self::TemplateAppend { .. } => "template_append",
        }
    }

    /// Whether the result ignores the prior value entirely
    #[must_use]
    pub fn replaces(&self) -> bool {
        matches!(self, Self::Set(_) | Self::Unset)
    }

    /// Apply this mutation to `prior`, the current value at `key`
    ///
    /// # Errors
    ///
    /// Returns `TypeMismatch` when a string mutation meets a non-string prior
    /// or an array mutation meets a non-array prior.
    pub fn apply(&self, key: &str, prior: Option<Value>) -> Result<Option<Value>, ArgsError> {
        let result = match (self, prior) {
            (Self::Set(value), _) => Some(value.clone()),
            (Self::Unset, _) => None,

            (Self::Prefix { value, .. } | Self::Suffix { value, .. }, None) => {
                Some(Value::String(value.clone()))
            }
            (Self::Prefix { value, separator }, Some(prior)) => {
                let prior = self.expect_string(key, prior)?;
                Some(Value::String(join(value, separator.as_deref(), &prior)))
            }
            (Self::Suffix { value, separator }, Some(prior)) => {
                let prior = self.expect_string(key, prior)?;
                Some(Value::String(join(&prior, separator.as_deref(), value)))
            }

            (Self::ArrayPrepend(values) | Self::ArrayAppend(values), None) => {
                Some(Value::Array(values.clone()))
            }
            (Self::ArrayPrepend(values), Some(prior)) => {
                let prior = self.expect_array(key, prior)?;
                Some(Value::Array(values.iter().cloned().chain(prior).collect()))
            }
            (Self::ArrayAppend(values), Some(prior)) => {
                let mut prior = self.expect_array(key, prior)?;
                prior.extend(values.iter().cloned());
                Some(Value::Array(prior))
            }

            (
                Self::TemplateAppend {
                    template,
                    separator,
                },
                prior,
            ) => {
                let prior = match prior {
                    Some(prior) => self.expect_string(key, prior)?,
                    None => String::new(),
                };
                let rendered = template.render();
                if prior.is_empty() {
                    Some(Value::String(rendered))
                } else {
                    Some(Value::String(join(&prior, separator.as_deref(), &rendered)))
                }
            }
        };
        Ok(result)
    }

    fn expect_string(&self, key: &str, prior: Value) -> Result<String, ArgsError> {
        match prior {
            Value::String(s) => Ok(s),
            other => Err(self.mismatch(key, "string", &other)),
        }
    }

    fn expect_array(&self, key: &str, prior: Value) -> Result<Vec<Value>, ArgsError> {
        match prior {
            Value::Array(items) => Ok(items),
            other => Err(self.mismatch(key, "array", &other)),
        }
    }

    fn mismatch(&self, key: &str, expected: &str, found: &Value) -> ArgsError {
        ArgsError::TypeMismatch {
            key: key.to_string(),
            mutation: self.kind().to_string(),
            expected: expected.to_string(),
            found: type_name(found).to_string(),
        }
    }

    /// Whether `value` is an encoded mutation object
    #[must_use]
    pub fn is_encoded(value: &Map<String, Value>) -> bool {
        value.contains_key(MUTATION_TAG)
    }

    /// Decode a `{"$mutation": ..}` object
    ///
    /// # Errors
    ///
    /// Returns `InvalidFragment` for unknown variants or missing fields and
    /// `TypeMismatch` when a field has the wrong shape.
    pub fn decode(key: &str, object: &Map<String, Value>) -> Result<Self, ArgsError> {
        let invalid = |message: String| ArgsError::InvalidFragment {
            message: format!("{key}: {message}"),
        };
        let kind = object
            .get(MUTATION_TAG)
            .and_then(Value::as_str)
            .ok_or_else(|| invalid(format!("{MUTATION_TAG} must name a mutation")))?;

        let field = |name: &str| {
            object
                .get(name)
                .ok_or_else(|| invalid(format!("{kind} requires `{name}`")))
        };
        let shape = |name: &str, expected: &str, found: &Value| ArgsError::TypeMismatch {
            key: format!("{key}.{name}"),
            mutation: kind.to_string(),
            expected: expected.to_string(),
            found: type_name(found).to_string(),
        };
        let string_field = |name: &str| -> Result<String, ArgsError> {
            let value = field(name)?;
            value
                .as_str()
                .map(str::to_string)
                .ok_or_else(|| shape(name, "string", value))
        };
        let separator = match object.get("separator") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => return Err(shape("separator", "string", other)),
        };
        let array_field = |name: &str| -> Result<Vec<Value>, ArgsError> {
            match field(name)? {
                Value::Array(items) => Ok(items.clone()),
                other => Err(shape(name, "array", other)),
            }
        };

        match kind {
            "set" => Ok(Self::Set(field("value")?.clone())),
            "unset" => Ok(Self::Unset),
            "prefix" => Ok(Self::Prefix {
                value: string_field("value")?,
                separator,
            }),
            "suffix" => Ok(Self::Suffix {
                value: string_field("value")?,
                separator,
            }),
            "array_prepend" => Ok(Self::ArrayPrepend(array_field("values")?)),
            "array_append" => Ok(Self::ArrayAppend(array_field("values")?)),
            "template_append" => {
                let template = serde_json::from_value(field("template")?.clone())
                    .map_err(|e| invalid(format!("invalid template: {e}")))?;
                Ok(Self::TemplateAppend {
                    template,
                    separator,
                })
            }
            other => Err(invalid(format!("unknown mutation `{other}`"))),
        }
    }

    /// Encode as a `{"$mutation": ..}` object
    #[must_use]
    pub fn encode(&self) -> Value {
        let mut object = match self {
            Self::Set(value) => json!({ "value": value }),
            Self::Unset => json!({}),
            Self::Prefix { value, separator } | Self::Suffix { value, separator } => {
                json!({ "value": value, "separator": separator })
            }
            Self::ArrayPrepend(values) | Self::ArrayAppend(values) => json!({ "values": values }),
            Self::TemplateAppend {
                template,
                separator,
            } => json!({ "template": template, "separator": separator }),
        };
        if let Value::Object(map) = &mut object {
            map.retain(|k, v| k != "separator" || !v.is_null());
            map.insert(MUTATION_TAG.to_string(), Value::from(self.kind()));
        }
        object
    }
}

fn join(left: &str, separator: Option<&str>, right: &str) -> String {
    let separator = separator.unwrap_or("");
    let mut out = String::with_capacity(left.len() + separator.len() + right.len());
    out.push_str(left);
    out.push_str(separator);
    out.push_str(right);
    out
}

/// Apply a chain of mutations in order
///
/// # Errors
///
/// Returns the first `TypeMismatch` encountered.
pub fn apply_all<'a>(
    key: &str,
    prior: Option<Value>,
    mutations: impl IntoIterator<Item = &'a Mutation>,
) -> Result<Option<Value>, ArgsError> {
    mutations
        .into_iter()
        .try_fold(prior, |acc, m| m.apply(key, acc))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn s(v: &str) -> Option<Value> {
        Some(Value::String(v.to_string()))
    }

    #[test]
    fn absent_prior_rules() {
        assert_eq!(Mutation::set("v").apply("k", None).unwrap(), s("v"));
        assert_eq!(Mutation::Unset.apply("k", None).unwrap(), None);
        assert_eq!(Mutation::prefix("v", Some(":")).apply("k", None).unwrap(), s("v"));
        assert_eq!(Mutation::suffix("v", Some(":")).apply("k", None).unwrap(), s("v"));
        assert_eq!(
            Mutation::array_append(["a"]).apply("k", None).unwrap(),
            Some(json!(["a"]))
        );
        assert_eq!(
            Mutation::template_append(Template::literal("t"), Some(" "))
                .apply("k", None)
                .unwrap(),
            s("t")
        );
    }

    #[test]
    fn present_prior_rules() {
        assert_eq!(Mutation::set("v").apply("k", s("x")).unwrap(), s("v"));
        assert_eq!(Mutation::Unset.apply("k", s("x")).unwrap(), None);
        assert_eq!(
            Mutation::prefix("a", Some(":")).apply("k", s("x")).unwrap(),
            s("a:x")
        );
        assert_eq!(
            Mutation::suffix("b", Some(":")).apply("k", s("x")).unwrap(),
            s("x:b")
        );
        assert_eq!(Mutation::suffix("b", None).apply("k", s("x")).unwrap(), s("xb"));
        assert_eq!(
            Mutation::array_prepend(["a"]).apply("k", Some(json!(["x"]))).unwrap(),
            Some(json!(["a", "x"]))
        );
        assert_eq!(
            Mutation::array_append(["b"]).apply("k", Some(json!(["x"]))).unwrap(),
            Some(json!(["x", "b"]))
        );
        assert_eq!(
            Mutation::template_append(Template::literal("-g"), Some(" "))
                .apply("k", s("-O2"))
                .unwrap(),
            s("-O2 -g")
        );
        assert_eq!(
            Mutation::template_append(Template::literal("-g"), Some(" "))
                .apply("k", s(""))
                .unwrap(),
            s("-g")
        );
    }

    #[test]
    fn suffix_then_prefix_is_order_sensitive() {
        let forward = apply_all(
            "PATH",
            s("x"),
            &[
                Mutation::suffix("b", Some(":")),
                Mutation::prefix("a", Some(":")),
            ],
        )
        .unwrap();
        assert_eq!(forward, s("a:x:b"));

        let nested = apply_all(
            "PATH",
            s("x"),
            &[
                Mutation::prefix("a", Some(":")),
                Mutation::prefix("b", Some(":")),
            ],
        )
        .unwrap();
        assert_eq!(nested, s("b:a:x"));
    }

    #[test]
    fn string_mutations_reject_non_strings() {
        let err = Mutation::prefix("a", None)
            .apply("jobs", Some(json!(4)))
            .unwrap_err();
        assert_eq!(
            err,
            ArgsError::TypeMismatch {
                key: "jobs".into(),
                mutation: "prefix".into(),
                expected: "string".into(),
                found: "number".into(),
            }
        );
        assert!(Mutation::template_append(Template::literal("x"), None)
            .apply("k", Some(json!(["a"])))
            .is_err());
    }

    #[test]
    fn array_mutations_reject_non_arrays() {
        let err = Mutation::array_append(["a"])
            .apply("args", s("--flag"))
            .unwrap_err();
        assert!(matches!(err, ArgsError::TypeMismatch { ref expected, .. } if expected == "array"));
    }

    #[test]
    fn decode_round_trips_through_encode() {
        for m in [
            Mutation::set(json!({"a": 1})),
            Mutation::Unset,
            Mutation::prefix("/opt/bin", Some(":")),
            Mutation::suffix("-g", None),
            Mutation::array_prepend([1, 2]),
            Mutation::array_append(["--x"]),
            Mutation::template_append(Template::new().text("-I").path("/inc"), Some(" ")),
        ] {
            let Value::Object(object) = m.encode() else {
                panic!("not an object");
            };
            assert_eq!(Mutation::decode("k", &object).unwrap(), m);
        }
    }

    #[test]
    fn decode_rejects_bad_shapes() {
        let Value::Object(obj) = json!({"$mutation": "array_append", "values": "oops"}) else {
            unreachable!()
        };
        assert!(matches!(
            Mutation::decode("args", &obj),
            Err(ArgsError::TypeMismatch { .. })
        ));

        let Value::Object(obj) = json!({"$mutation": "explode"}) else {
            unreachable!()
        };
        assert!(matches!(
            Mutation::decode("args", &obj),
            Err(ArgsError::InvalidFragment { .. })
        ));

        let Value::Object(obj) = json!({"$mutation": "suffix"}) else {
            unreachable!()
        };
        assert!(matches!(
            Mutation::decode("args", &obj),
            Err(ArgsError::InvalidFragment { .. })
        ));
    }
}
