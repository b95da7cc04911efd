//! Conversation state: subject context, topics, responses, and turn history.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Sentinel index: no more topics, survey closed
pub const TOPIC_DONE: i32 = -1;
/// Sentinel index: closing feedback phase
pub const TOPIC_FEEDBACK: i32 = -2;
/// Reserved response key for the closing free-response
pub const FEEDBACK_KEY: &str = "feedback";

/// A single survey topic
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub name: String,
}

impl Topic {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

/// Recorded answers for one topic
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TopicResponse {
    /// The accepted (or latest) answer text
    pub answer: String,
    /// Whether the topic has been satisfied; never unset once true
    pub complete: bool,
    /// Follow-up answers collected while the topic was incomplete
    #[serde(default)]
    pub follow_ups: Vec<String>,
}

/// Who spoke in a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnRole {
    User,
    Agent,
}

/// One entry in the conversation transcript
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: TurnRole,
    pub content: String,
    #[serde(default)]
    pub timestamp: i64,
}

impl Turn {
    /// Create a user turn
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::User,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }

    /// Create an agent turn
    pub fn agent(content: impl Into<String>) -> Self {
        Self {
            role: TurnRole::Agent,
            content: content.into(),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}

/// Checkpointed state for one conversation identity.
///
/// Created on the first turn, mutated only through [`SurveyState::apply`],
/// and persisted after every workflow invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SurveyState {
    /// Opaque conversation key, stable across turns
    pub identity: String,

    // Subject context
    pub title: String,
    pub goal: String,
    pub source_url: String,
    /// Free-text analysis derived from the source URL
    pub analysis: String,

    /// Ordered topics; replaceable wholesale by refinement, otherwise immutable
    pub topics: Vec<Topic>,
    /// Cursor into `topics`, or the sentinels [`TOPIC_FEEDBACK`]/[`TOPIC_DONE`]
    pub topic_index: i32,
    /// Responses keyed by topic name, plus the reserved [`FEEDBACK_KEY`]
    pub topic_responses: BTreeMap<String, TopicResponse>,

    /// Full-fidelity transcript, append-only
    pub turn_history: Vec<Turn>,
    /// Latest inbound user text
    pub user_message: String,

    // Evaluation flags, derived once per turn
    pub is_answer_complete: bool,
    pub needs_follow_up: bool,
    /// Latched: never unset once true
    pub all_topics_complete: bool,
    /// Latched: implies `all_topics_complete`
    pub survey_complete: bool,

    /// Latest generated text shown to the user
    pub last_agent_message: String,
    /// Last stage that ran; diagnostic only, never used for routing
    pub stage_status: String,
}

impl SurveyState {
    /// Fresh state for a new conversation
    pub fn new(identity: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            title: String::new(),
            goal: String::new(),
            source_url: String::new(),
            analysis: String::new(),
            topics: Vec::new(),
            topic_index: 0,
            topic_responses: BTreeMap::new(),
            turn_history: Vec::new(),
            user_message: String::new(),
            is_answer_complete: false,
            needs_follow_up: false,
            all_topics_complete: false,
            survey_complete: false,
            last_agent_message: String::new(),
            stage_status: String::new(),
        }
    }

    /// The topic under discussion, if the cursor points at one
    pub fn current_topic(&self) -> Option<&Topic> {
        usize::try_from(self.topic_index)
            .ok()
            .and_then(|i| self.topics.get(i))
    }

    /// Names of topics whose responses are complete, in topic order
    pub fn completed_topics(&self) -> Vec<String> {
        self.topics
            .iter()
            .filter(|t| {
                self.topic_responses
                    .get(&t.name)
                    .is_some_and(|r| r.complete)
            })
            .map(|t| t.name.clone())
            .collect()
    }

    /// Merge a partial update into this state.
    ///
    /// Fields overwrite shallowly; `append_turns` extends the transcript.
    /// State invariants are enforced here rather than trusted from stages:
    /// completion flags latch, completed topic responses are never reopened,
    /// and the topic cursor never moves backwards except into a sentinel.
    pub fn apply(&mut self, update: StateUpdate) {
        if let Some(title) = update.title {
            self.title = title;
        }
        if let Some(goal) = update.goal {
            self.goal = goal;
        }
        if let Some(source_url) = update.source_url {
            self.source_url = source_url;
        }
        if let Some(analysis) = update.analysis {
            self.analysis = analysis;
        }
        if let Some(topics) = update.topics {
            self.topics = topics;
        }
        if let Some(index) = update.topic_index {
            self.apply_topic_index(index);
        }
        if let Some(responses) = update.topic_responses {
            for (name, response) in responses {
                match self.topic_responses.get(&name) {
                    Some(existing) if existing.complete => {}
                    _ => {
                        self.topic_responses.insert(name, response);
                    }
                }
            }
        }
        self.turn_history.extend(update.append_turns);
        if let Some(user_message) = update.user_message {
            self.user_message = user_message;
        }
        if let Some(v) = update.is_answer_complete {
            self.is_answer_complete = v;
        }
        if let Some(v) = update.needs_follow_up {
            self.needs_follow_up = v;
        }
        if update.all_topics_complete == Some(true) {
            self.all_topics_complete = true;
        }
        if update.survey_complete == Some(true) {
            self.survey_complete = true;
            self.all_topics_complete = true;
        }
        if let Some(message) = update.last_agent_message {
            self.last_agent_message = message;
        }
        if let Some(status) = update.stage_status {
            self.stage_status = status;
        }
    }

    fn apply_topic_index(&mut self, index: i32) {
        match self.topic_index {
            // -1 is terminal
            TOPIC_DONE => {}
            // -2 may only move to -1
            TOPIC_FEEDBACK => {
                if index == TOPIC_DONE {
                    self.topic_index = index;
                }
            }
            current => {
                // Forward moves and sentinel entries only
                if index == TOPIC_FEEDBACK || index == TOPIC_DONE || index >= current {
                    self.topic_index = index;
                }
            }
        }
    }
}

/// A partial state update returned by a stage or merged from an inbound turn.
#[derive(Debug, Clone, Default)]
pub struct StateUpdate {
    pub title: Option<String>,
    pub goal: Option<String>,
    pub source_url: Option<String>,
    pub analysis: Option<String>,
    pub topics: Option<Vec<Topic>>,
    pub topic_index: Option<i32>,
    pub topic_responses: Option<BTreeMap<String, TopicResponse>>,
    pub append_turns: Vec<Turn>,
    pub user_message: Option<String>,
    pub is_answer_complete: Option<bool>,
    pub needs_follow_up: Option<bool>,
    pub all_topics_complete: Option<bool>,
    pub survey_complete: Option<bool>,
    pub last_agent_message: Option<String>,
    pub stage_status: Option<String>,
}

impl StateUpdate {
    /// An update that only records which stage ran
    pub fn status(stage: impl Into<String>) -> Self {
        Self {
            stage_status: Some(stage.into()),
            ..Default::default()
        }
    }

    /// True if applying this update would leave any state unchanged-able
    /// fields untouched (used by idempotent stages)
    pub fn is_empty(&self) -> bool {
        self.title.is_none()
            && self.goal.is_none()
            && self.source_url.is_none()
            && self.analysis.is_none()
            && self.topics.is_none()
            && self.topic_index.is_none()
            && self.topic_responses.is_none()
            && self.append_turns.is_empty()
            && self.user_message.is_none()
            && self.is_answer_complete.is_none()
            && self.needs_follow_up.is_none()
            && self.all_topics_complete.is_none()
            && self.survey_complete.is_none()
            && self.last_agent_message.is_none()
            && self.stage_status.is_none()
    }
}
