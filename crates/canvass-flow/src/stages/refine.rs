//! Topic refinement: revise the theme list from owner feedback

use std::sync::Arc;

use async_trait::async_trait;
use canvass_ai::{ChatMessage, GenerateOptions, OutputSchema, StructuredClient};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::graph::{REFINE, Stage};
use crate::prompts::PromptStore;
use crate::stages::{format_history, format_topics, history_before_latest};
use crate::state::{StateUpdate, SurveyState, Topic, Turn};

#[derive(Debug, Deserialize)]
struct RefinementResponse {
    themes: Vec<String>,
    explanation: String,
}

fn refinement_schema() -> OutputSchema {
    OutputSchema::new(serde_json::json!({
        "type": "object",
        "properties": {
            "themes": {
                "type": "array",
                "items": { "type": "string" },
                "minItems": 1,
                "maxItems": 10,
                "description": "The full revised theme list"
            },
            "explanation": {
                "type": "string",
                "description": "What changed and why, addressed to the survey owner"
            }
        },
        "required": ["themes", "explanation"]
    }))
    .unwrap_or_else(|e| panic!("refinement schema is invalid: {}", e))
}

/// Revises the existing theme list against the owner's latest feedback.
/// The revised list replaces the old one wholesale.
pub struct TopicRefinementStage {
    structured: Arc<StructuredClient>,
    prompts: PromptStore,
    schema: OutputSchema,
}

impl TopicRefinementStage {
    pub fn new(structured: Arc<StructuredClient>, prompts: PromptStore) -> Self {
        Self {
            structured,
            prompts,
            schema: refinement_schema(),
        }
    }
}

#[async_trait]
impl Stage for TopicRefinementStage {
    fn name(&self) -> &'static str {
        REFINE
    }

    async fn run(&self, state: &SurveyState) -> Result<StateUpdate> {
        if state.topics.is_empty() {
            return Err(Error::Validation(
                "no topics to refine; generate topics first".into(),
            ));
        }
        if state.user_message.trim().is_empty() {
            return Err(Error::Validation(
                "feedback text is required to refine topics".into(),
            ));
        }

        let system = self.prompts.render("theme_refiner_system", &[])?;
        let topic_count = state.topics.len().to_string();
        let user = format!(
            "{}\n\n{}",
            self.prompts.render(
                "theme_refiner_user",
                &[
                    ("title", &state.title),
                    ("goal", &state.goal),
                    ("source_url", &state.source_url),
                    ("analysis", &state.analysis),
                    ("topic_count", &topic_count),
                    ("current_topics", &format_topics(&state.topics)),
                    ("history", &format_history(history_before_latest(state))),
                    ("feedback", &state.user_message),
                ],
            )?,
            self.schema.format_instructions()
        );

        let response: RefinementResponse = self
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
            "survey topics refined"
        );

        Ok(StateUpdate {
            topics: Some(topics),
            append_turns: vec![Turn::agent(&response.explanation)],
            last_agent_message: Some(response.explanation),
            stage_status: Some("topic_refinement_complete".to_string()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{ScriptedProvider, structured_client};
    use std::sync::atomic::Ordering;

    fn state_with_topics() -> SurveyState {
        let mut state = SurveyState::new("t1");
        state.title = "Churn survey".into();
        state.goal = "understand churn".into();
        state.topics = vec![Topic::new("Pricing"), Topic::new("Support")];
        state
    }

    #[test]
    fn test_schema_compiles() {
        refinement_schema();
    }

    #[tokio::test]
    async fn test_empty_feedback_is_rejected_without_generation() {
        let (provider, calls) = ScriptedProvider::new(vec![]);
        let (fixer, _) = ScriptedProvider::new(vec![]);
        let stage =
            TopicRefinementStage::new(Arc::new(structured_client(provider, fixer)), PromptStore::defaults());

        let err = stage.run(&state_with_topics()).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_no_topics_is_rejected_without_generation() {
        let (provider, calls) = ScriptedProvider::new(vec![]);
        let (fixer, _) = ScriptedProvider::new(vec![]);
        let stage =
            TopicRefinementStage::new(Arc::new(structured_client(provider, fixer)), PromptStore::defaults());

        let mut state = SurveyState::new("t1");
        state.user_message = "drop the pricing theme".into();
        let err = stage.run(&state).await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_refined_themes_replace_topics_wholesale() {
        let (provider, _) = ScriptedProvider::new(vec![
            r#"{"themes": ["Support", "Feature gaps"], "explanation": "Replaced pricing with feature gaps as requested."}"#,
        ]);
        let (fixer, _) = ScriptedProvider::new(vec![]);
        let stage =
            TopicRefinementStage::new(Arc::new(structured_client(provider, fixer)), PromptStore::defaults());

        let mut state = state_with_topics();
        state.user_message = "replace pricing with feature gaps".into();

        let update = stage.run(&state).await.unwrap();
        let topics = update.topics.unwrap();
        assert_eq!(topics, vec![Topic::new("Support"), Topic::new("Feature gaps")]);
        assert_eq!(
            update.last_agent_message.as_deref(),
            Some("Replaced pricing with feature gaps as requested.")
        );
        assert_eq!(update.append_turns.len(), 1);
    }
}
