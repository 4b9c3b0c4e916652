//! YAML recipe parser with validation

use super::model::Recipe;
use kiln_errors::{BuildError, Error};
use std::collections::HashSet;
use std::path::Path;

/// Parse a YAML recipe from a file
///
/// # Errors
///
/// Returns an error if:
/// - The file cannot be read
/// - The YAML is invalid
/// - Required fields are missing
/// - Validation fails
pub async fn parse_recipe_file(path: &Path) -> Result<Recipe, Error> {
    let content = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| BuildError::RecipeError {
            message: format!("failed to read recipe {}: {e}", path.display()),
        })?;

    let mut recipe = parse_recipe(&content).map_err(|e| match e {
        Error::Build(BuildError::RecipeError { message }) => BuildError::RecipeError {
            message: format!("{}: {message}", path.display()),
        }
        .into(),
        other => other,
    })?;
    recipe.dir = path.parent().map(Path::to_path_buf).unwrap_or_default();
    Ok(recipe)
}

/// Parse a YAML recipe from a string
///
/// # Errors
///
/// Returns an error if the YAML is invalid or validation fails
pub fn parse_recipe(content: &str) -> Result<Recipe, Error> {
    let recipe: Recipe = serde_yml::from_str(content).map_err(|e| BuildError::RecipeError {
        message: format!("failed to parse YAML: {e}"),
    })?;
    validate_recipe(&recipe)?;
    Ok(recipe)
}

fn validate_recipe(recipe: &Recipe) -> Result<(), Error> {
    let invalid = |message: String| -> Error { BuildError::RecipeError { message }.into() };

    let name = &recipe.metadata.name;
    if name.is_empty() {
        return Err(invalid("metadata.name cannot be empty".to_string()));
    }
    if name.contains(['@', '/', '.']) || name.chars().any(char::is_whitespace) {
        return Err(invalid(format!(
            "metadata.name {name:?} may not contain '@', '/', '.' or whitespace"
        )));
    }
    if recipe.metadata.version.is_empty() {
        return Err(invalid("metadata.version cannot be empty".to_string()));
    }

    let mut seen = HashSet::new();
    for dependency in &recipe.dependencies {
        if !seen.insert(dependency.name()) {
            return Err(invalid(format!(
                "dependency {} is declared twice",
                dependency.name()
            )));
        }
        if dependency.recipe() == name {
            return Err(invalid(format!("{name} depends on itself")));
        }
    }

    Ok(())
}
