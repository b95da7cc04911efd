//! Conversation orchestrator: session lifecycle over the two workflows.
//!
//! The orchestrator owns what the workflows do not: handing out
//! conversation identities, carrying the initial subject data into the
//! first theme turn, seeding interview state from an accepted theme list,
//! and mirroring results to an external archive on a best-effort basis.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::checkpoint::StateStore;
use crate::error::{Error, Result};
use crate::graph::Workflow;
use crate::state::{StateUpdate, SurveyState, Topic, Turn};

/// Subject data supplied when a theme conversation is opened
#[derive(Debug, Clone)]
pub struct InitData {
    pub title: String,
    pub goal: String,
    pub source_url: String,
}

/// Best-effort mirror of survey artifacts to an external system.
///
/// Failures are logged and never fail the turn that triggered them.
#[async_trait]
pub trait Archive: Send + Sync {
    /// Record the current topic list for a conversation
    async fn record_topics(&self, identity: &str, topics: &[Topic]) -> Result<()>;

    /// Record one transcript turn
    async fn record_turn(&self, identity: &str, turn: &Turn) -> Result<()>;
}

/// Archive that discards everything
pub struct NoopArchive;

#[async_trait]
impl Archive for NoopArchive {
    async fn record_topics(&self, _identity: &str, _topics: &[Topic]) -> Result<()> {
        Ok(())
    }

    async fn record_turn(&self, _identity: &str, _turn: &Turn) -> Result<()> {
        Ok(())
    }
}

/// What a caller gets back from one turn
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    /// The message to show the user
    pub message: String,
    pub topics: Vec<String>,
    pub completed_topics: Vec<String>,
    pub current_topic: Option<String>,
    pub all_topics_complete: bool,
    pub survey_complete: bool,
}

impl TurnOutcome {
    fn from_state(state: &SurveyState) -> Self {
        Self {
            message: state.last_agent_message.clone(),
            topics: state.topics.iter().map(|t| t.name.clone()).collect(),
            completed_topics: state.completed_topics(),
            current_topic: state.current_topic().map(|t| t.name.clone()),
            all_topics_complete: state.all_topics_complete,
            survey_complete: state.survey_complete,
        }
    }
}

/// Front door for both conversation kinds.
///
/// Theme and interview conversations use separate identity spaces and
/// separate stores; an identity from one is meaningless to the other.
pub struct Orchestrator {
    theme: Workflow,
    theme_store: Arc<dyn StateStore>,
    interview: Workflow,
    interview_store: Arc<dyn StateStore>,
    pending: Mutex<HashMap<String, InitData>>,
    archive: Arc<dyn Archive>,
}

impl Orchestrator {
    pub fn new(
        theme: Workflow,
        theme_store: Arc<dyn StateStore>,
        interview: Workflow,
        interview_store: Arc<dyn StateStore>,
    ) -> Self {
        Self {
            theme,
            theme_store,
            interview,
            interview_store,
            pending: Mutex::new(HashMap::new()),
            archive: Arc::new(NoopArchive),
        }
    }

    pub fn with_archive(mut self, archive: Arc<dyn Archive>) -> Self {
        self.archive = archive;
        self
    }

    /// Open a theme conversation. The subject data is held until the first
    /// turn arrives and is discarded if it never does.
    pub fn init(&self, data: InitData) -> Result<String> {
        if data.goal.trim().is_empty() {
            return Err(Error::Validation("a survey goal is required".into()));
        }
        if data.source_url.trim().is_empty() {
            return Err(Error::Validation("a source URL is required".into()));
        }
        let identity = uuid::Uuid::new_v4().to_string();
        self.pending.lock().insert(identity.clone(), data);
        Ok(identity)
    }

    /// Run one theme turn: the first turn analyzes the subject and generates
    /// topics, later turns refine them from `user_text`.
    pub async fn theme_turn(&self, identity: &str, user_text: &str) -> Result<TurnOutcome> {
        let pending = self.pending.lock().remove(identity);

        let mut input = StateUpdate::default();
        match pending {
            Some(init) => {
                input.title = Some(init.title);
                input.goal = Some(init.goal);
                input.source_url = Some(init.source_url);
            }
            None => {
                if self.theme_store.get(identity).await?.is_none() {
                    return Err(Error::SessionNotFound(identity.to_string()));
                }
                input.user_message = Some(user_text.to_string());
                input.append_turns = vec![Turn::user(user_text)];
            }
        }

        let state = self.theme.run(input, identity).await?;
        self.mirror_topics(&state).await;
        Ok(TurnOutcome::from_state(&state))
    }

    /// Seed an interview conversation from an accepted theme list
    pub async fn begin_interview(
        &self,
        identity: &str,
        title: &str,
        goal: &str,
        topics: Vec<Topic>,
    ) -> Result<()> {
        if topics.is_empty() {
            return Err(Error::Validation(
                "an interview needs at least one topic".into(),
            ));
        }

        let mut state = SurveyState::new(identity);
        state.title = title.to_string();
        state.goal = goal.to_string();
        state.topics = topics;
        self.interview_store.put(identity, &state).await?;
        self.mirror_topics(&state).await;
        Ok(())
    }

    /// Run one interview turn. An empty `user_text` is only valid for the
    /// opening turn, which asks the first question.
    pub async fn interview_turn(&self, identity: &str, user_text: &str) -> Result<TurnOutcome> {
        let existing = self
            .interview_store
            .get(identity)
            .await?
            .ok_or_else(|| Error::SessionNotFound(identity.to_string()))?;

        let mut input = StateUpdate::default();
        if existing.survey_complete {
            // Nothing to record; the workflow answers with the fixed
            // closing message and the state stays as it was.
        } else if user_text.trim().is_empty() {
            if !existing.turn_history.is_empty() {
                return Err(Error::Validation(
                    "an answer is required for evaluation".into(),
                ));
            }
        } else {
            let turn = Turn::user(user_text);
            self.mirror_turn(identity, &turn).await;
            input.user_message = Some(user_text.to_string());
            input.append_turns = vec![turn];
        }

        let state = self.interview.run(input, identity).await?;
        if let Some(agent_turn) = state.turn_history.last() {
            if agent_turn.role == crate::state::TurnRole::Agent && !existing.survey_complete {
                self.mirror_turn(identity, agent_turn).await;
            }
        }
        Ok(TurnOutcome::from_state(&state))
    }

    async fn mirror_topics(&self, state: &SurveyState) {
        if let Err(e) = self.archive.record_topics(&state.identity, &state.topics).await {
            tracing::warn!(identity = %state.identity, "archive rejected topic list: {}", e);
        }
    }

    async fn mirror_turn(&self, identity: &str, turn: &Turn) {
        if let Err(e) = self.archive.record_turn(identity, turn).await {
            tracing::warn!(identity, "archive rejected turn: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::MemoryStore;
    use crate::graph::{interview_workflow, theme_workflow};
    use crate::prompts::PromptStore;
    use crate::stages::testing::{ScriptedProvider, fallback_client, structured_client};
    use crate::state::{TOPIC_DONE, TOPIC_FEEDBACK};
    use std::sync::atomic::Ordering;

    const COMPLETE: &str = r#"{"is_answer_complete": true, "needs_follow_up": false, "reasoning": "ok"}"#;

    /// Orchestrator whose theme flow produces `analysis` then `themes`, and
    /// whose interview flow replays the given conversation/evaluation scripts.
    fn orchestrator(
        theme_script: Vec<&str>,
        structured_script: Vec<&str>,
        conversation_script: Vec<&str>,
        evaluation_script: Vec<&str>,
    ) -> (Orchestrator, std::sync::Arc<std::sync::atomic::AtomicU32>) {
        let prompts = PromptStore::defaults();

        let (research, _) = ScriptedProvider::new(theme_script);
        let (theme_model, _) = ScriptedProvider::new(structured_script);
        let (theme_fixer, _) = ScriptedProvider::new(vec![]);
        let theme_store = Arc::new(MemoryStore::new());
        let theme = theme_workflow(
            research,
            structured_client(theme_model, theme_fixer),
            prompts.clone(),
            theme_store.clone(),
        )
        .unwrap();

        let (conversation, _) = ScriptedProvider::new(conversation_script);
        let (evaluation, eval_calls) = ScriptedProvider::new(evaluation_script);
        let (interview_fixer, _) = ScriptedProvider::new(vec![]);
        let interview_store = Arc::new(MemoryStore::new());
        let interview = interview_workflow(
            Arc::new(fallback_client(conversation)),
            structured_client(evaluation, interview_fixer),
            prompts,
            interview_store.clone(),
        )
        .unwrap();

        (
            Orchestrator::new(theme, theme_store, interview, interview_store),
            eval_calls,
        )
    }

    fn init_data() -> InitData {
        InitData {
            title: "Churn survey".into(),
            goal: "understand churn".into(),
            source_url: "https://acme.example".into(),
        }
    }

    #[tokio::test]
    async fn test_theme_flow_generates_then_refines() {
        let (orchestrator, _) = orchestrator(
            vec!["Acme sells anvils."],
            vec![
                r#"{"themes": ["Pricing", "Support"]}"#,
                r#"{"themes": ["Pricing", "Delivery"], "explanation": "Swapped support for delivery."}"#,
            ],
            vec![],
            vec![],
        );

        let identity = orchestrator.init(init_data()).unwrap();
        let outcome = orchestrator.theme_turn(&identity, "").await.unwrap();
        assert_eq!(outcome.topics, vec!["Pricing", "Support"]);

        let outcome = orchestrator
            .theme_turn(&identity, "swap support for delivery")
            .await
            .unwrap();
        assert_eq!(outcome.topics, vec!["Pricing", "Delivery"]);
        assert_eq!(outcome.message, "Swapped support for delivery.");
    }

    #[tokio::test]
    async fn test_theme_turn_for_unknown_identity() {
        let (orchestrator, _) = orchestrator(vec![], vec![], vec![], vec![]);
        let err = orchestrator
            .theme_turn("no-such-identity", "hello")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "session_not_found");
        assert_eq!(err.http_status(), 404);
    }

    #[tokio::test]
    async fn test_init_requires_goal_and_url() {
        let (orchestrator, _) = orchestrator(vec![], vec![], vec![], vec![]);
        let mut data = init_data();
        data.goal = "".into();
        assert_eq!(orchestrator.init(data).unwrap_err().code(), "validation_error");

        let mut data = init_data();
        data.source_url = " ".into();
        assert_eq!(orchestrator.init(data).unwrap_err().code(), "validation_error");
    }

    #[tokio::test]
    async fn test_interview_turn_for_unseeded_identity() {
        let (orchestrator, _) = orchestrator(vec![], vec![], vec![], vec![]);
        let err = orchestrator
            .interview_turn("no-such-identity", "hi")
            .await
            .unwrap_err();
        assert_eq!(err.code(), "session_not_found");
    }

    #[tokio::test]
    async fn test_full_interview_walk() {
        let (orchestrator, eval_calls) = orchestrator(
            vec![],
            vec![],
            vec!["How do you feel about pricing?", "And how is our support?"],
            vec![COMPLETE, COMPLETE],
        );

        orchestrator
            .begin_interview(
                "i1",
                "Churn survey",
                "understand churn",
                vec![Topic::new("Pricing"), Topic::new("Support")],
            )
            .await
            .unwrap();

        // Opening turn: no answer yet, first question comes back
        let outcome = orchestrator.interview_turn("i1", "").await.unwrap();
        assert_eq!(outcome.message, "How do you feel about pricing?");
        assert_eq!(outcome.current_topic.as_deref(), Some("Pricing"));

        let state = orchestrator.interview_store.get("i1").await.unwrap().unwrap();
        assert_eq!(state.topic_index, 0);
        assert!(!state.turn_history.is_empty());

        // First answer accepted, next topic's question
        let outcome = orchestrator.interview_turn("i1", "Too expensive.").await.unwrap();
        assert_eq!(outcome.message, "And how is our support?");
        assert_eq!(outcome.completed_topics, vec!["Pricing"]);
        assert_eq!(outcome.current_topic.as_deref(), Some("Support"));

        // Second answer accepted, feedback phase begins with fixed text
        let outcome = orchestrator.interview_turn("i1", "Support is great.").await.unwrap();
        assert!(outcome.all_topics_complete);
        assert!(!outcome.survey_complete);
        assert!(outcome.message.contains("feedback"));

        // Feedback recorded, survey closes
        let outcome = orchestrator.interview_turn("i1", "No, all good!").await.unwrap();
        assert!(outcome.survey_complete);
        assert!(outcome.message.contains("Thank you"));
        assert_eq!(eval_calls.load(Ordering::Relaxed), 2, "feedback phase skips evaluation");
    }

    #[tokio::test]
    async fn test_post_completion_turn_leaves_state_unchanged() {
        let (orchestrator, _) = orchestrator(
            vec![],
            vec![],
            vec!["Q1"],
            vec![COMPLETE],
        );

        orchestrator
            .begin_interview("i1", "t", "g", vec![Topic::new("Only topic")])
            .await
            .unwrap();
        orchestrator.interview_turn("i1", "").await.unwrap();
        orchestrator.interview_turn("i1", "My answer.").await.unwrap();
        let closed = orchestrator.interview_turn("i1", "My feedback.").await.unwrap();
        assert!(closed.survey_complete);

        let before = orchestrator.interview_store.get("i1").await.unwrap().unwrap();
        let outcome = orchestrator.interview_turn("i1", "hello again").await.unwrap();
        let after = orchestrator.interview_store.get("i1").await.unwrap().unwrap();

        assert_eq!(before, after, "post-completion turns change nothing");
        assert!(outcome.survey_complete);
        assert_eq!(after.topic_index, TOPIC_DONE);
    }

    #[tokio::test]
    async fn test_empty_answer_mid_interview_is_rejected() {
        let (orchestrator, _) = orchestrator(vec![], vec![], vec!["Q1"], vec![]);
        orchestrator
            .begin_interview("i1", "t", "g", vec![Topic::new("Pricing")])
            .await
            .unwrap();
        orchestrator.interview_turn("i1", "").await.unwrap();

        let err = orchestrator.interview_turn("i1", "  ").await.unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn test_begin_interview_requires_topics() {
        let (orchestrator, _) = orchestrator(vec![], vec![], vec![], vec![]);
        let err = orchestrator
            .begin_interview("i1", "t", "g", vec![])
            .await
            .unwrap_err();
        assert_eq!(err.code(), "validation_error");
    }

    #[tokio::test]
    async fn test_follow_up_holds_topic_then_advances() {
        let incomplete = r#"{"is_answer_complete": false, "needs_follow_up": true, "follow_up_reason": "vague", "reasoning": "vague"}"#;
        let (orchestrator, _) = orchestrator(
            vec![],
            vec![],
            vec!["Q1", "Could you elaborate?"],
            vec![incomplete, COMPLETE],
        );

        orchestrator
            .begin_interview("i1", "t", "g", vec![Topic::new("Pricing")])
            .await
            .unwrap();
        orchestrator.interview_turn("i1", "").await.unwrap();

        let outcome = orchestrator.interview_turn("i1", "Fine I guess.").await.unwrap();
        assert_eq!(outcome.message, "Could you elaborate?");
        assert!(outcome.completed_topics.is_empty());
        assert_eq!(outcome.current_topic.as_deref(), Some("Pricing"));

        let outcome = orchestrator
            .interview_turn("i1", "The tiers feel arbitrary.")
            .await
            .unwrap();
        assert_eq!(outcome.completed_topics, vec!["Pricing"]);

        let state = orchestrator.interview_store.get("i1").await.unwrap().unwrap();
        assert_eq!(state.topic_index, TOPIC_FEEDBACK);
        assert_eq!(state.topic_responses["Pricing"].answer, "The tiers feel arbitrary.");
        assert_eq!(state.topic_responses["Pricing"].follow_ups, vec!["Fine I guess."]);
    }
}
