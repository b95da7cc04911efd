//! Subject analysis: research the source URL into a briefing

use std::sync::Arc;

use async_trait::async_trait;
use canvass_ai::{ChatMessage, ChatProvider, GenerateOptions};

use crate::error::{Error, Result};
use crate::graph::{ANALYZE, Stage};
use crate::prompts::PromptStore;
use crate::state::{StateUpdate, SurveyState};

/// Researches the survey subject from its public URL using a web-search
/// capable provider, producing the free-text analysis later stages build on.
pub struct SubjectAnalysisStage {
    research: Arc<dyn ChatProvider>,
    prompts: PromptStore,
}

impl SubjectAnalysisStage {
    pub fn new(research: Arc<dyn ChatProvider>, prompts: PromptStore) -> Self {
        Self { research, prompts }
    }
}

#[async_trait]
impl Stage for SubjectAnalysisStage {
    fn name(&self) -> &'static str {
        ANALYZE
    }

    async fn run(&self, state: &SurveyState) -> Result<StateUpdate> {
        if state.source_url.trim().is_empty() {
            return Err(Error::Validation(
                "a source URL is required for subject analysis".into(),
            ));
        }

        let system = self.prompts.render("company_analyzer_system", &[])?;
        let user = self
            .prompts
            .render("company_analyzer_user", &[("source_url", &state.source_url)])?;

        let options = GenerateOptions {
            temperature: Some(0.2),
            web_search: true,
            ..Default::default()
        };
        let analysis = self
            .research
            .complete(
                &[ChatMessage::system(system), ChatMessage::user(user)],
                &options,
            )
            .await?;

        tracing::info!(
            identity = %state.identity,
            chars = analysis.len(),
            "subject analysis produced"
        );

        Ok(StateUpdate {
            analysis: Some(analysis),
            stage_status: Some("analysis_complete".to_string()),
            ..Default::default()
        })
    }
}
