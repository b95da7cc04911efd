//! Topic generation: derive the initial theme list from the analysis

use std::sync::Arc;

use async_trait::async_trait;
use canvass_ai::{ChatMessage, GenerateOptions, OutputSchema, StructuredClient};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::graph::{GENERATE, Stage};
use crate::prompts::PromptStore;
use crate::state::{StateUpdate, SurveyState, Topic, Turn};

#[derive(Debug, Deserialize)]
struct ThemeListResponse {
    themes: Vec<String>,
}

fn theme_list_schema() -> OutputSchema {
    OutputSchema::new(serde_json::json!({
        "type": "object",
        "properties": {
            "themes": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": 1,
                "maxItems": 5,
                "description": "Survey themes as short noun phrases"
            }
        },
        "required": ["themes"]
    }))
    .unwrap_or_else(|e| panic!("theme list schema is invalid: {}", e))
}

/// Generates the first theme list from the survey goal and the subject
/// analysis. Runs once per conversation; later passes go through refinement.
pub struct TopicGenerationStage {
    structured: Arc<StructuredClient>,
    prompts: PromptStore,
    schema: OutputSchema,
}

impl TopicGenerationStage {
    pub fn new(structured: Arc<StructuredClient>, prompts: PromptStore) -> Self {
        Self {
            structured,
            prompts,
            schema: theme_list_schema(),
        }
    }
}

#[async_trait]
impl Stage for TopicGenerationStage {
    fn name(&self) -> &'static str {
        GENERATE
    }

    async fn run(&self, state: &SurveyState) -> Result<StateUpdate> {
        if state.analysis.trim().is_empty() {
            return Err(Error::Validation(
                "subject analysis must run before topic generation".into(),
            ));
        }

        let system = self.prompts.render("theme_generator_system", &[])?;
        let user = format!(
            "{}\n\n{}",
            self.prompts.render(
                "theme_generator_user",
                &[("goal", &state.goal), ("analysis", &state.analysis)],
            )?,
            self.schema.format_instructions()
        );

        let response: ThemeListResponse = self
            .structured
            .generate(
                &[ChatMessage::system(system), ChatMessage::user(user)],
                &GenerateOptions::with_temperature(0.3),
                &self.schema,
            )
            .await?;

        let topics: Vec<Topic> = response.themes.into_iter().map(Topic::new).collect();
        tracing::info!(
            identity = %state.identity,
            count = topics.len(),
            "survey topics generated"
        );

        let message = format!(
            "I've analyzed {} and created {} survey topics based on your goal.",
            state.source_url,
            topics.len()
        );
        Ok(StateUpdate {
            topics: Some(topics),
            append_turns: vec![Turn::agent(&message)],
            last_agent_message: Some(message),
            stage_status: Some("topic_generation_complete".to_string()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{ScriptedProvider, structured_client};
    use std::sync::atomic::Ordering;

    #[test]
    fn test_schema_compiles() {
        theme_list_schema();
    }

    #[tokio::test]
    async fn test_missing_analysis_is_rejected_without_generation() {
        let (provider, calls) = ScriptedProvider::new(vec![]);
        let (fixer, _) = ScriptedProvider::new(vec![]);
        let stage =
            TopicGenerationStage::new(Arc::new(structured_client(provider, fixer)), PromptStore::defaults());

        let err = stage.run(&SurveyState::new("t1")).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_generated_themes_become_topics() {
        let (provider, _) = ScriptedProvider::new(vec![
            r#"{"themes": ["Pricing", "Support quality", "Onboarding"]}"#,
        ]);
        let (fixer, fixer_calls) = ScriptedProvider::new(vec![]);
        let stage =
            TopicGenerationStage::new(Arc::new(structured_client(provider, fixer)), PromptStore::defaults());

        let mut state = SurveyState::new("t1");
        state.goal = "understand churn".into();
        state.source_url = "https://acme.example".into();
        state.analysis = "Acme sells anvils.".into();

        let update = stage.run(&state).await.unwrap();
        let topics = update.topics.unwrap();
        assert_eq!(topics.len(), 3);
        assert_eq!(topics[0].name, "Pricing");
        assert_eq!(update.append_turns.len(), 1);
        assert!(update.last_agent_message.unwrap().contains("3 survey topics"));
        assert_eq!(fixer_calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_malformed_output_is_repaired() {
        let (provider, _) = ScriptedProvider::new(vec!["Sure! Here are some themes."]);
        let (fixer, fixer_calls) =
            ScriptedProvider::new(vec![r#"{"themes": ["Pricing"]}"#]);
        let stage =
            TopicGenerationStage::new(Arc::new(structured_client(provider, fixer)), PromptStore::defaults());

        let mut state = SurveyState::new("t1");
        state.analysis = "Acme sells anvils.".into();

        let update = stage.run(&state).await.unwrap();
        assert_eq!(update.topics.unwrap().len(), 1);
        assert_eq!(fixer_calls.load(Ordering::Relaxed), 1);
    }
}
