//! Prompt template store.
//!
//! Templates are externally versioned: each stage looks one up by name and
//! fills named `{param}` substitution points. The contract with template
//! files is just "name -> text"; the TOML carrier is an implementation
//! detail of this store.

use std::collections::HashMap;
use std::path::Path;

use crate::error::{Error, Result};

const DEFAULT_TEMPLATES: &str = include_str!("../prompts/defaults.toml");

/// Named prompt templates with `{param}` substitution
#[derive(Debug, Clone)]
pub struct PromptStore {
    templates: HashMap<String, String>,
}

impl PromptStore {
    /// The embedded default templates
    pub fn defaults() -> Self {
        // The embedded file is validated by tests; a parse failure here is a
        // build defect, not a runtime condition.
        let templates = toml::from_str(DEFAULT_TEMPLATES)
            .unwrap_or_else(|e| panic!("embedded prompt templates are invalid: {}", e));
        Self { templates }
    }

    /// Load templates from a TOML file, layered over the defaults
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            Error::Validation(format!(
                "cannot read prompt file {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        let overrides: HashMap<String, String> = toml::from_str(&content)
            .map_err(|e| Error::Validation(format!("invalid prompt file: {}", e)))?;

        let mut store = Self::defaults();
        store.templates.extend(overrides);
        Ok(store)
    }

    /// Override a single template
    pub fn set(&mut self, name: impl Into<String>, template: impl Into<String>) {
        self.templates.insert(name.into(), template.into());
    }

    /// Fetch a raw template by name
    pub fn get(&self, name: &str) -> Result<&str> {
        self.templates
            .get(name)
            .map(String::as_str)
            .ok_or_else(|| Error::Validation(format!("unknown prompt template: {}", name)))
    }

    /// Render a template, replacing each `{param}` with its value
    pub fn render(&self, name: &str, params: &[(&str, &str)]) -> Result<String> {
        let mut text = self.get(name)?.trim().to_string();
        for (key, value) in params {
            text = text.replace(&format!("{{{}}}", key), value);
        }
        Ok(text)
    }
}

impl Default for PromptStore {
    fn default() -> Self {
        Self::defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_parse_and_cover_all_stages() {
        let store = PromptStore::defaults();
        for name in [
            "company_analyzer_system",
            "company_analyzer_user",
            "theme_generator_system",
            "theme_generator_user",
            "theme_refiner_system",
            "theme_refiner_user",
            "interview_system",
            "interview_user",
            "evaluation_system",
            "evaluation_user",
            "output_repair",
        ] {
            assert!(store.get(name).is_ok(), "missing template: {}", name);
        }
    }

    #[test]
    fn test_render_substitutes_params() {
        let store = PromptStore::defaults();
        let text = store
            .render("company_analyzer_user", &[("source_url", "https://example.com")])
            .unwrap();
        assert!(text.contains("https://example.com"));
        assert!(!text.contains("{source_url}"));
    }

    #[test]
    fn test_render_unknown_template_is_validation_error() {
        let store = PromptStore::defaults();
        let err = store.render("no_such_template", &[]).unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[test]
    fn test_set_overrides_a_template() {
        let mut store = PromptStore::defaults();
        store.set("output_repair", "rewrite: {output}");
        assert_eq!(store.get("output_repair").unwrap(), "rewrite: {output}");
    }

    #[test]
    fn test_render_leaves_unknown_params_alone() {
        let store = PromptStore::defaults();
        let text = store.render("company_analyzer_user", &[]).unwrap();
        assert!(text.contains("{source_url}"));
    }
}
