//! Answer evaluation: decide completeness and advance the topic cursor

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use canvass_ai::{ChatMessage, GenerateOptions, OutputSchema, StructuredClient};
use serde::Deserialize;

use crate::error::{Error, Result};
use crate::graph::{EVALUATE, Stage};
use crate::prompts::PromptStore;
use crate::stages::{format_discussed, format_history, format_topics, history_before_latest};
use crate::state::{
    FEEDBACK_KEY, StateUpdate, SurveyState, TOPIC_DONE, TOPIC_FEEDBACK, TopicResponse,
};

#[derive(Debug, Deserialize)]
struct EvaluationResponse {
    is_answer_complete: bool,
    needs_follow_up: bool,
    #[serde(default)]
    follow_up_reason: Option<String>,
    /// Advisory only. The authoritative next index is recomputed from the
    /// recorded responses, never taken from generated output.
    #[serde(default)]
    next_topic_index: Option<i32>,
    reasoning: String,
}

fn evaluation_schema() -> OutputSchema {
    OutputSchema::new(serde_json::json!({
        "type": "object",
        "properties": {
            "is_answer_complete": {
                "type": "boolean",
                "description": "Whether the answer addresses the current theme with enough substance"
            },
            "needs_follow_up": {
                "type": "boolean",
                "description": "Whether one follow-up question would draw out meaningfully more detail"
            },
            "follow_up_reason": {
                "type": ["string", "null"],
                "description": "Why a follow-up is warranted, if it is"
            },
            "next_topic_index": {
                "type": ["integer", "null"],
                "description": "Suggested next theme index"
            },
            "reasoning": {
                "type": "string",
                "description": "Brief justification for the judgment"
            }
        },
        "required": ["is_answer_complete", "needs_follow_up", "reasoning"]
    }))
    .unwrap_or_else(|e| panic!("evaluation schema is invalid: {}", e))
}

/// Judges the respondent's latest answer against the current topic and
/// advances the interview: record the answer and move on, request a
/// follow-up, enter the closing feedback phase, or close the survey.
pub struct EvaluationStage {
    structured: Arc<StructuredClient>,
    prompts: PromptStore,
    schema: OutputSchema,
}

impl EvaluationStage {
    pub fn new(structured: Arc<StructuredClient>, prompts: PromptStore) -> Self {
        Self {
            structured,
            prompts,
            schema: evaluation_schema(),
        }
    }

    /// First topic, in order, whose response is not complete
    fn next_incomplete(
        state: &SurveyState,
        responses: &BTreeMap<String, TopicResponse>,
    ) -> Option<usize> {
        state.topics.iter().position(|topic| {
            !responses
                .get(&topic.name)
                .or_else(|| state.topic_responses.get(&topic.name))
                .is_some_and(|r| r.complete)
        })
    }
}

#[async_trait]
impl Stage for EvaluationStage {
    fn name(&self) -> &'static str {
        EVALUATE
    }

    async fn run(&self, state: &SurveyState) -> Result<StateUpdate> {
        // Turns arriving after completion change nothing.
        if state.survey_complete {
            tracing::debug!(identity = %state.identity, "evaluation skipped, survey complete");
            return Ok(StateUpdate::default());
        }

        if state.user_message.trim().is_empty() {
            return Err(Error::Validation(
                "an answer is required for evaluation".into(),
            ));
        }

        // The closing feedback answer is recorded verbatim, no judgment.
        if state.topic_index == TOPIC_FEEDBACK {
            let mut responses = BTreeMap::new();
            responses.insert(
                FEEDBACK_KEY.to_string(),
                TopicResponse {
                    answer: state.user_message.clone(),
                    complete: true,
                    follow_ups: Vec::new(),
                },
            );
            return Ok(StateUpdate {
                topic_responses: Some(responses),
                topic_index: Some(TOPIC_DONE),
                survey_complete: Some(true),
                is_answer_complete: Some(true),
                needs_follow_up: Some(false),
                stage_status: Some("evaluation_complete".to_string()),
                ..Default::default()
            });
        }

        let current = state.current_topic().cloned().ok_or_else(|| {
            Error::Validation(format!(
                "no topic at index {} to evaluate against",
                state.topic_index
            ))
        })?;

        let system = self.prompts.render("evaluation_system", &[])?;
        let topic_index = state.topic_index.to_string();
        let user = format!(
            "{}\n\n{}",
            self.prompts.render(
                "evaluation_user",
                &[
                    ("title", &state.title),
                    ("goal", &state.goal),
                    ("all_topics", &format_topics(&state.topics)),
                    ("topic_index", &topic_index),
                    ("current_topic", &current.name),
                    ("discussed_topics", &format_discussed(state)),
                    ("history", &format_history(history_before_latest(state))),
                    ("answer", &state.user_message),
                ],
            )?,
            self.schema.format_instructions()
        );

        let evaluation: EvaluationResponse = self
            .structured
            .generate(
                &[ChatMessage::system(system), ChatMessage::user(user)],
                &GenerateOptions::with_temperature(0.0),
                &self.schema,
            )
            .await?;

        tracing::debug!(
            identity = %state.identity,
            topic = %current.name,
            complete = evaluation.is_answer_complete,
            follow_up = evaluation.needs_follow_up,
            suggested_index = ?evaluation.next_topic_index,
            reasoning = %evaluation.reasoning,
            "answer evaluated"
        );

        let mut update = StateUpdate {
            is_answer_complete: Some(evaluation.is_answer_complete),
            needs_follow_up: Some(evaluation.needs_follow_up),
            stage_status: Some("evaluation_complete".to_string()),
            ..Default::default()
        };

        if evaluation.is_answer_complete && !evaluation.needs_follow_up {
            let existing = state.topic_responses.get(&current.name);
            let mut responses = BTreeMap::new();
            responses.insert(
                current.name.clone(),
                TopicResponse {
                    answer: state.user_message.clone(),
                    complete: true,
                    follow_ups: existing.map(|r| r.follow_ups.clone()).unwrap_or_default(),
                },
            );

            match Self::next_incomplete(state, &responses) {
                Some(next) => {
                    update.topic_index = Some(next as i32);
                }
                None => {
                    update.all_topics_complete = Some(true);
                    update.topic_index = Some(TOPIC_FEEDBACK);
                }
            }
            update.topic_responses = Some(responses);
        } else {
            // The answer stays provisional; the cursor does not move.
            if let Some(reason) = &evaluation.follow_up_reason {
                tracing::debug!(identity = %state.identity, reason = %reason, "follow-up requested");
            }
            let mut response = state
                .topic_responses
                .get(&current.name)
                .cloned()
                .unwrap_or_default();
            response.answer = state.user_message.clone();
            response.follow_ups.push(state.user_message.clone());
            let mut responses = BTreeMap::new();
            responses.insert(current.name.clone(), response);
            update.topic_responses = Some(responses);
        }

        Ok(update)
    }
}
