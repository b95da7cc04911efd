//! Interview conversation: produce the next message shown to the respondent

use std::sync::Arc;

use async_trait::async_trait;
use canvass_ai::{ChatMessage, FallbackClient, GenerateOptions};

use crate::error::Result;
use crate::graph::{CONVERSE, Stage};
use crate::prompts::PromptStore;
use crate::stages::{format_history, format_topics};
use crate::state::{StateUpdate, SurveyState, TOPIC_FEEDBACK, Turn};

pub(crate) const COMPLETED_MESSAGE: &str =
    "Survey completed! Thank you for your participation.";
pub(crate) const FEEDBACK_PROMPT: &str =
    "Is there anything you want to add or any feedback you'd like to share?";
pub(crate) const OUT_OF_TOPICS_MESSAGE: &str = "Thank you for completing the survey!";

/// Generates the interviewer's next message: the opening question, a
/// follow-up on the current topic, or a transition to the next one. The
/// feedback prompt and post-completion responses are fixed text and never
/// hit the provider.
pub struct ConversationStage {
    client: Arc<FallbackClient>,
    prompts: PromptStore,
}

impl ConversationStage {
    pub fn new(client: Arc<FallbackClient>, prompts: PromptStore) -> Self {
        Self { client, prompts }
    }

    fn task(&self, state: &SurveyState) -> (&'static str, &'static str) {
        if state.turn_history.is_empty() {
            (
                "Open the survey.",
                "Welcome the respondent warmly, briefly say what the survey is about, \
                 and ask the first question about the current theme.",
            )
        } else if state.needs_follow_up {
            (
                "Ask a follow-up question on the current theme.",
                "Build on the respondent's previous answer. Reference something specific \
                 they said, then ask one question that draws out more detail on the same theme.",
            )
        } else {
            (
                "Move to the next theme.",
                "Briefly acknowledge the respondent's previous answer, then ask one \
                 question that opens the current theme.",
            )
        }
    }
}

#[async_trait]
impl Stage for ConversationStage {
    fn name(&self) -> &'static str {
        CONVERSE
    }

    async fn run(&self, state: &SurveyState) -> Result<StateUpdate> {
        // Post-completion turns get a fixed response and leave the
        // transcript untouched.
        if state.survey_complete {
            return Ok(StateUpdate {
                last_agent_message: Some(COMPLETED_MESSAGE.to_string()),
                stage_status: Some("conversation_complete".to_string()),
                ..Default::default()
            });
        }

        if state.topic_index == TOPIC_FEEDBACK {
            return Ok(StateUpdate {
                append_turns: vec![Turn::agent(FEEDBACK_PROMPT)],
                last_agent_message: Some(FEEDBACK_PROMPT.to_string()),
                stage_status: Some("conversation_complete".to_string()),
                ..Default::default()
            });
        }

        let Some(current) = state.current_topic() else {
            tracing::warn!(
                identity = %state.identity,
                topic_index = state.topic_index,
                "conversation ran with no topic under the cursor"
            );
            return Ok(StateUpdate {
                append_turns: vec![Turn::agent(OUT_OF_TOPICS_MESSAGE)],
                last_agent_message: Some(OUT_OF_TOPICS_MESSAGE.to_string()),
                stage_status: Some("conversation_complete".to_string()),
                ..Default::default()
            });
        };

        let (task_type, instructions) = self.task(state);
        let system = self.prompts.render("interview_system", &[])?;
        let user = self.prompts.render(
            "interview_user",
            &[
                ("title", &state.title),
                ("goal", &state.goal),
                ("all_topics", &format_topics(&state.topics)),
                ("current_topic", &current.name),
                ("history", &format_history(&state.turn_history)),
                ("user_message", &state.user_message),
                ("task_type", task_type),
                ("instructions", instructions),
            ],
        )?;

        let message = self
            .client
            .generate(
                &[ChatMessage::system(system), ChatMessage::user(user)],
                &GenerateOptions::with_temperature(0.7),
            )
            .await?;

        Ok(StateUpdate {
            append_turns: vec![Turn::agent(&message)],
            last_agent_message: Some(message),
            stage_status: Some("conversation_complete".to_string()),
            ..Default::default()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stages::testing::{ScriptedProvider, fallback_client};
    use crate::state::{TOPIC_DONE, Topic, TurnRole};
    use std::sync::atomic::Ordering;

    fn stage_with(
        responses: Vec<&str>,
    ) -> (ConversationStage, std::sync::Arc<std::sync::atomic::AtomicU32>) {
        let (provider, calls) = ScriptedProvider::new(responses);
        (
            ConversationStage::new(
                Arc::new(fallback_client(provider)),
                PromptStore::defaults(),
            ),
            calls,
        )
    }

    fn interview_state() -> SurveyState {
        let mut state = SurveyState::new("t1");
        state.title = "Churn survey".into();
        state.topics = vec![Topic::new("Pricing"), Topic::new("Support")];
        state
    }

    #[tokio::test]
    async fn test_opening_turn_generates_first_question() {
        let (stage, calls) = stage_with(vec!["Welcome! To start, how do you feel about pricing?"]);
        let state = interview_state();

        let update = stage.run(&state).await.unwrap();
        assert_eq!(update.append_turns.len(), 1);
        assert_eq!(update.append_turns[0].role, TurnRole::Agent);
        assert!(update.last_agent_message.unwrap().contains("pricing"));
        assert_eq!(calls.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_completed_survey_answers_with_fixed_text_and_no_generation() {
        let (stage, calls) = stage_with(vec![]);
        let mut state = interview_state();
        state.survey_complete = true;
        state.topic_index = TOPIC_DONE;

        let update = stage.run(&state).await.unwrap();
        assert_eq!(update.last_agent_message.as_deref(), Some(COMPLETED_MESSAGE));
        assert!(update.append_turns.is_empty(), "transcript stays untouched");
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_feedback_phase_uses_fixed_prompt() {
        let (stage, calls) = stage_with(vec![]);
        let mut state = interview_state();
        state.all_topics_complete = true;
        state.topic_index = TOPIC_FEEDBACK;

        let update = stage.run(&state).await.unwrap();
        assert_eq!(update.last_agent_message.as_deref(), Some(FEEDBACK_PROMPT));
        assert_eq!(update.append_turns.len(), 1);
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_cursor_past_topics_gets_fixed_closing_text() {
        let (stage, calls) = stage_with(vec![]);
        let mut state = interview_state();
        state.topic_index = 7;

        let update = stage.run(&state).await.unwrap();
        assert_eq!(
            update.last_agent_message.as_deref(),
            Some(OUT_OF_TOPICS_MESSAGE)
        );
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_follow_up_task_selected_when_flagged() {
        let state = {
            let mut s = interview_state();
            s.turn_history = vec![Turn::agent("Q"), Turn::user("A")];
            s.needs_follow_up = true;
            s
        };
        let (stage, _) = stage_with(vec!["Could you say more about that?"]);
        let (task_type, _) = stage.task(&state);
        assert!(task_type.contains("follow-up"));

        let update = stage.run(&state).await.unwrap();
        assert_eq!(
            update.last_agent_message.as_deref(),
            Some("Could you say more about that?")
        );
    }
}
