//! String templates for `template_append`

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// One piece of a template
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TemplateComponent {
    Literal(String),
    Path { path: PathBuf },
}

/// A sequence of literal text and filesystem paths rendered by concatenation
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "TemplateRepr", into = "Vec<TemplateComponent>")]
pub struct Template {
    components: Vec<TemplateComponent>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum TemplateRepr {
    Text(String),
    Components(Vec<TemplateComponent>),
}

impl From<TemplateRepr> for Template {
    fn from(repr: TemplateRepr) -> Self {
        match repr {
            TemplateRepr::Text(text) => Self::literal(text),
            TemplateRepr::Components(components) => Self { components },
        }
    }
}

impl From<Template> for Vec<TemplateComponent> {
    fn from(template: Template) -> Self {
        template.components
    }
}

impl Template {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn literal(text: impl Into<String>) -> Self {
        Self {
            components: vec![TemplateComponent::Literal(text.into())],
        }
    }

    #[must_use]
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.components.push(TemplateComponent::Literal(text.into()));
        self
    }

    #[must_use]
    pub fn path(mut self, path: impl Into<PathBuf>) -> Self {
        self.components
            .push(TemplateComponent::Path { path: path.into() });
        self
    }

    #[must_use]
    pub fn render(&self) -> String {
        let mut out = String::new();
        for component in &self.components {
            match component {
                TemplateComponent::Literal(text) => out.push_str(text),
                TemplateComponent::Path { path } => out.push_str(&path.to_string_lossy()),
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn renders_in_order() {
        let t = Template::new().text("-I").path("/deps/zlib/include");
        assert_eq!(t.render(), "-I/deps/zlib/include");
    }

    #[test]
    fn decodes_string_or_components() {
        let plain: Template = serde_json::from_value(json!("-lz")).unwrap();
        assert_eq!(plain.render(), "-lz");

        let mixed: Template =
            serde_json::from_value(json!(["-L", {"path": "/deps/zlib/lib"}])).unwrap();
        assert_eq!(mixed.render(), "-L/deps/zlib/lib");
    }
}
