//! Recipe model, parsing and lookup

pub mod model;
pub mod parser;

pub use model::{DependencyDecl, DependencyKind, Metadata, Recipe, RecipeSource};
pub use parser::{parse_recipe, parse_recipe_file};

use kiln_errors::{BuildError, Error};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

/// Recipes available to a build session, by name
#[derive(Debug, Clone, Default)]
pub struct RecipeBook {
    recipes: HashMap<String, Arc<Recipe>>,
}

impl RecipeBook {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every `*.yaml`/`*.yml` file in a directory
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be read, any recipe fails to
    /// parse, or two files define the same recipe name.
    pub async fn load_dir(dir: &Path) -> Result<Self, Error> {
        let mut book = Self::new();
        let mut entries = tokio::fs::read_dir(dir)
            .await
            .map_err(|e| Error::io_with_path(&e, dir))?;
        let mut paths = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_yaml = path
                .extension()
                .and_then(|ext| ext.to_str())
                .is_some_and(|ext| ext == "yaml" || ext == "yml");
            if is_yaml && entry.file_type().await?.is_file() {
                paths.push(path);
            }
        }
        paths.sort();

        for path in paths {
            let recipe = parse_recipe_file(&path).await?;
            if book.recipes.contains_key(recipe.name()) {
                return Err(BuildError::RecipeError {
                    message: format!(
                        "recipe {} defined twice (again in {})",
                        recipe.name(),
                        path.display()
                    ),
                }
                .into());
            }
            book.insert(recipe);
        }
        Ok(book)
    }

    /// Add or replace a recipe
    pub fn insert(&mut self, recipe: Recipe) -> Arc<Recipe> {
        let recipe = Arc::new(recipe);
        self.recipes
            .insert(recipe.metadata.name.clone(), Arc::clone(&recipe));
        recipe
    }

    #[must_use]
    pub fn with(mut self, recipe: Recipe) -> Self {
        self.insert(recipe);
        self
    }

    /// # Errors
    ///
    /// Returns `MissingDependency` if no recipe has this name.
    pub fn get(&self, name: &str) -> Result<Arc<Recipe>, Error> {
        self.recipes.get(name).cloned().ok_or_else(|| {
            BuildError::MissingDependency {
                name: name.to_string(),
            }
            .into()
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.recipes.keys().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.recipes.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.recipes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn loads_a_directory() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(
            dir.path().join("zlib.yaml"),
            "metadata: {name: zlib, version: 1.3.1}\n",
        )
        .await
        .unwrap();
        tokio::fs::write(
            dir.path().join("curl.yml"),
            "metadata: {name: curl, version: 8.9.1}\ndependencies: [zlib]\n",
        )
        .await
        .unwrap();
        tokio::fs::write(dir.path().join("README.md"), "not a recipe").await.unwrap();

        let book = RecipeBook::load_dir(dir.path()).await.unwrap();
        assert_eq!(book.len(), 2);
        assert_eq!(book.get("curl").unwrap().dependencies.len(), 1);
        assert!(matches!(
            book.get("openssl").unwrap_err(),
            Error::Build(BuildError::MissingDependency { .. })
        ));
    }

    #[tokio::test]
    async fn duplicate_names_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        for file in ["a.yaml", "b.yaml"] {
            tokio::fs::write(dir.path().join(file), "metadata: {name: zlib, version: '1'}\n")
                .await
                .unwrap();
        }
        assert!(RecipeBook::load_dir(dir.path()).await.is_err());
    }
}
