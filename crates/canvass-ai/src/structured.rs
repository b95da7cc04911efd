//! Structured output parsing and repair
//!
//! Generation calls that expect a JSON payload validate the raw model text
//! against a JSON Schema. A parse or validation failure is not a provider
//! failure: instead of falling back to another provider, the offending text
//! is sent to a repair-capable provider together with the schema and the
//! parse error, and parsing is retried a bounded number of times.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::{
    client::FallbackClient,
    error::{Error, Result},
    providers::ChatProvider,
    types::{ChatMessage, GenerateOptions},
};

const DEFAULT_REPAIR_TEMPLATE: &str = "\
The following output was supposed to be a JSON document matching this schema:

{schema}

Instead, this was produced:

{output}

Parsing it failed with this error:

{error}

Rewrite the output so it is a single valid JSON document matching the schema. \
Respond with the JSON only, no commentary.";

/// An expected output shape: a JSON Schema compiled once for validation.
#[derive(Debug)]
pub struct OutputSchema {
    schema: Value,
    validator: jsonschema::Validator,
}

impl OutputSchema {
    /// Compile a JSON Schema. Fails if the schema itself is invalid.
    pub fn new(schema: Value) -> Result<Self> {
        let validator = jsonschema::validator_for(&schema)
            .map_err(|e| Error::InvalidConfig(format!("invalid output schema: {}", e)))?;
        Ok(Self { schema, validator })
    }

    /// Instruction text appended to prompts that must yield this shape
    pub fn format_instructions(&self) -> String {
        format!(
            "Format your response as valid JSON matching this schema:\n{}",
            self.schema
        )
    }

    /// Validate a parsed JSON value, returning a readable error on mismatch
    fn check(&self, value: &Value) -> std::result::Result<(), String> {
        let errors: Vec<String> = self
            .validator
            .iter_errors(value)
            .map(|e| {
                let path = e.instance_path.to_string();
                if path.is_empty() {
                    e.to_string()
                } else {
                    format!("{}: {}", path, e)
                }
            })
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors.join("\n"))
        }
    }
}

/// Pull the JSON document out of raw model text, tolerating code fences and
/// surrounding prose. Returns the slice from the first `{` or `[` to the
/// matching end of the text.
pub fn extract_json(raw: &str) -> &str {
    let trimmed = raw.trim();

    // Strip a ```json ... ``` fence if present
    let inner = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .and_then(|rest| rest.strip_suffix("```"))
        .map(str::trim)
        .unwrap_or(trimmed);

    let start = inner.find(['{', '[']);
    let end = inner.rfind(['}', ']']);
    match (start, end) {
        (Some(s), Some(e)) if e >= s => &inner[s..=e],
        _ => inner,
    }
}

/// A generation client whose responses must match a schema.
///
/// Wraps a [`FallbackClient`] for the main call and a separate repair
/// provider for fixing malformed output.
pub struct StructuredClient {
    client: FallbackClient,
    fixer: Arc<dyn ChatProvider>,
    max_repairs: u32,
    repair_template: String,
}

impl StructuredClient {
    /// Create a structured client with a repair provider
    pub fn new(client: FallbackClient, fixer: Arc<dyn ChatProvider>) -> Self {
        Self {
            client,
            fixer,
            max_repairs: 3,
            repair_template: DEFAULT_REPAIR_TEMPLATE.to_string(),
        }
    }

    /// Bound on repair generation calls per request
    pub fn with_max_repairs(mut self, max_repairs: u32) -> Self {
        self.max_repairs = max_repairs;
        self
    }

    /// Override the repair prompt. Must contain `{schema}`, `{output}`,
    /// and `{error}` substitution points.
    pub fn with_repair_template(mut self, template: impl Into<String>) -> Self {
        self.repair_template = template.into();
        self
    }

    /// Access the underlying fallback client for schema-free calls
    pub fn client(&self) -> &FallbackClient {
        &self.client
    }

    /// Generate a response and parse it against `schema`, repairing
    /// malformed output up to `max_repairs` times.
    pub async fn generate<T: DeserializeOwned>(
        &self,
        messages: &[ChatMessage],
        options: &GenerateOptions,
        schema: &OutputSchema,
    ) -> Result<T> {
        let mut raw = self.client.generate(messages, options).await?;
        let mut last_error;

        let mut repairs = 0u32;
        loop {
            match parse(&raw, schema) {
                Ok(value) => return Ok(value),
                Err(parse_error) => {
                    if repairs >= self.max_repairs {
                        last_error = parse_error;
                        break;
                    }
                    tracing::warn!(
                        "Structured output failed to parse (repair {}/{}): {}",
                        repairs + 1,
                        self.max_repairs,
                        parse_error
                    );
                    raw = self.repair(&raw, &parse_error, schema).await?;
                    repairs += 1;
                }
            }
        }

        Err(Error::OutputFormat(last_error))
    }

    async fn repair(
        &self,
        offending: &str,
        parse_error: &str,
        schema: &OutputSchema,
    ) -> Result<String> {
        let prompt = self
            .repair_template
            .replace("{schema}", &schema.schema.to_string())
            .replace("{output}", offending)
            .replace("{error}", parse_error);

        self.fixer
            .complete(&[ChatMessage::user(prompt)], &GenerateOptions::default())
            .await
    }
}

/// Parse raw model text into `T`: extract JSON, validate against the schema,
/// then deserialize. All failures are reported as readable strings for the
/// repair prompt.
fn parse<T: DeserializeOwned>(raw: &str, schema: &OutputSchema) -> std::result::Result<T, String> {
    let json = extract_json(raw);
    let value: Value =
        serde_json::from_str(json).map_err(|e| format!("invalid JSON: {}", e))?;
    schema.check(&value)?;
    serde_json::from_value(value).map_err(|e| format!("deserialization failed: {}", e))
}
