//! Workflow graph: a static table of stages interpreted by one run loop.
//!
//! Control flow is data, not object state: each stage entry pairs a stage
//! function with an optional router. The run loop executes the current
//! stage, merges its partial update into the state, and follows the router
//! to the next stage. A stage with no router is a suspend point (the graph
//! waits for the next external turn) or the terminal stage.

use std::sync::Arc;

use async_trait::async_trait;

use crate::checkpoint::StateStore;
use crate::error::{Error, Result};
use crate::prompts::PromptStore;
use crate::stages::{
    ConversationStage, EvaluationStage, SubjectAnalysisStage, TopicGenerationStage,
    TopicRefinementStage,
};
use crate::state::{StateUpdate, SurveyState, TOPIC_FEEDBACK};
use canvass_ai::{ChatProvider, FallbackClient, StructuredClient};

// Stage names shared by the graph builders and routers
pub const START: &str = "start";
pub const ANALYZE: &str = "analyze";
pub const GENERATE: &str = "generate";
pub const REFINE: &str = "refine";
pub const CONVERSE: &str = "converse";
pub const EVALUATE: &str = "evaluate";
pub const FINAL: &str = "final";

/// Hard cap on stage executions per invocation; a routing loop is a bug,
/// not something to run forever.
const MAX_STEPS: usize = 25;

/// A unit of work: reads a slice of state, returns a partial update
#[async_trait]
pub trait Stage: Send + Sync {
    /// Stage name used in the routing table and `stage_status`
    fn name(&self) -> &'static str;

    /// Run the stage against the current merged state
    async fn run(&self, state: &SurveyState) -> Result<StateUpdate>;
}

/// Pure routing predicate: picks the next stage name from current state
pub type Router = fn(&SurveyState) -> &'static str;

/// One row of the workflow table
pub struct StageDef {
    pub stage: Arc<dyn Stage>,
    /// `None` marks a suspend point / terminal stage
    pub router: Option<Router>,
}

impl StageDef {
    pub fn new(stage: Arc<dyn Stage>, router: Option<Router>) -> Self {
        Self { stage, router }
    }
}

/// A compiled workflow: stage table plus a persistence backend
pub struct Workflow {
    entry: &'static str,
    stages: Vec<StageDef>,
    store: Arc<dyn StateStore>,
}

impl std::fmt::Debug for Workflow {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Workflow")
            .field("entry", &self.entry)
            .field(
                "stages",
                &self.stages.iter().map(|s| s.stage.name()).collect::<Vec<_>>(),
            )
            .finish()
    }
}

impl Workflow {
    /// Bind a stage table to a state store. Fails if the entry stage is
    /// missing from the table.
    pub fn new(
        entry: &'static str,
        stages: Vec<StageDef>,
        store: Arc<dyn StateStore>,
    ) -> Result<Self> {
        let workflow = Self {
            entry,
            stages,
            store,
        };
        workflow.stage(entry)?;
        Ok(workflow)
    }

    fn stage(&self, name: &str) -> Result<&StageDef> {
        self.stages
            .iter()
            .find(|def| def.stage.name() == name)
            .ok_or_else(|| Error::Validation(format!("unknown workflow stage: {}", name)))
    }

    /// Run one invocation: load the checkpoint for `identity`, merge the
    /// inbound partial input, walk the stage table until a suspend point,
    /// persist, and return the final state.
    ///
    /// A stage error aborts the invocation without persisting.
    pub async fn run(&self, input: StateUpdate, identity: &str) -> Result<SurveyState> {
        let mut state = self
            .store
            .get(identity)
            .await?
            .unwrap_or_else(|| SurveyState::new(identity));
        state.apply(input);

        let mut current = self.entry;
        for _ in 0..MAX_STEPS {
            let def = self.stage(current)?;
            tracing::debug!(identity, stage = current, "running workflow stage");

            let update = def.stage.run(&state).await?;
            state.apply(update);

            match def.router {
                Some(router) => current = router(&state),
                None => {
                    self.store.put(identity, &state).await?;
                    return Ok(state);
                }
            }
        }

        Err(Error::Validation(format!(
            "workflow exceeded {} stages without suspending",
            MAX_STEPS
        )))
    }
}

// ---- Bookkeeping stages shared by both graphs ----

/// Entry stage: records that a run started. Routing happens in the router.
struct StartStage;

#[async_trait]
impl Stage for StartStage {
    fn name(&self) -> &'static str {
        START
    }

    async fn run(&self, state: &SurveyState) -> Result<StateUpdate> {
        tracing::info!(identity = %state.identity, "starting workflow run");
        Ok(StateUpdate::status("started"))
    }
}

/// Terminal stage of the theme graph
struct ThemeFinalStage;

#[async_trait]
impl Stage for ThemeFinalStage {
    fn name(&self) -> &'static str {
        FINAL
    }

    async fn run(&self, _state: &SurveyState) -> Result<StateUpdate> {
        Ok(StateUpdate::status("completed"))
    }
}

const SURVEY_CLOSED_MESSAGE: &str = "Thank you so much for sharing your thoughtful responses! \
I really appreciate the time you've taken to complete this survey. Your feedback is valuable \
and will help make meaningful improvements.";

/// Terminal stage of the interview graph: latches both completion flags and
/// sets the fixed closing response. Deliberately does not touch the
/// transcript, so reaching it twice leaves the state unchanged.
struct InterviewFinalStage;

#[async_trait]
impl Stage for InterviewFinalStage {
    fn name(&self) -> &'static str {
        FINAL
    }

    async fn run(&self, state: &SurveyState) -> Result<StateUpdate> {
        tracing::info!(identity = %state.identity, "survey conversation completed");
        Ok(StateUpdate {
            all_topics_complete: Some(true),
            survey_complete: Some(true),
            last_agent_message: Some(SURVEY_CLOSED_MESSAGE.to_string()),
            stage_status: Some("survey_complete".to_string()),
            ..Default::default()
        })
    }
}

// ---- Routers ----

fn route_theme_entry(state: &SurveyState) -> &'static str {
    if state.topics.is_empty() {
        ANALYZE
    } else {
        REFINE
    }
}

fn route_to_generate(_state: &SurveyState) -> &'static str {
    GENERATE
}

fn route_to_final(_state: &SurveyState) -> &'static str {
    FINAL
}

fn route_interview_entry(state: &SurveyState) -> &'static str {
    if state.turn_history.is_empty() {
        // No exchange yet: ask the first question, nothing to evaluate
        CONVERSE
    } else {
        EVALUATE
    }
}

fn route_after_evaluation(state: &SurveyState) -> &'static str {
    if state.survey_complete {
        return FINAL;
    }
    if state.all_topics_complete && state.topic_index != TOPIC_FEEDBACK {
        return FINAL;
    }
    // Feedback prompt, follow-up on the same topic, or the next topic's
    // question: all of these suspend at the conversation stage.
    CONVERSE
}

// ---- Graph builders ----

/// Build the theme workflow: analyze the subject and generate topics on the
/// first pass, refine the existing topics on every later pass.
pub fn theme_workflow(
    research: Arc<dyn ChatProvider>,
    structured: StructuredClient,
    prompts: PromptStore,
    store: Arc<dyn StateStore>,
) -> Result<Workflow> {
    let structured = Arc::new(structured.with_repair_template(prompts.get("output_repair")?));
    let stages = vec![
        StageDef::new(Arc::new(StartStage), Some(route_theme_entry)),
        StageDef::new(
            Arc::new(SubjectAnalysisStage::new(research, prompts.clone())),
            Some(route_to_generate),
        ),
        StageDef::new(
            Arc::new(TopicGenerationStage::new(structured.clone(), prompts.clone())),
            Some(route_to_final),
        ),
        StageDef::new(
            Arc::new(TopicRefinementStage::new(structured, prompts)),
            Some(route_to_final),
        ),
        StageDef::new(Arc::new(ThemeFinalStage), None),
    ];
    Workflow::new(START, stages, store)
}

/// Build the interview workflow: evaluate the latest answer, then either
/// follow up, move to the next topic, collect closing feedback, or finish.
pub fn interview_workflow(
    client: Arc<FallbackClient>,
    structured: StructuredClient,
    prompts: PromptStore,
    store: Arc<dyn StateStore>,
) -> Result<Workflow> {
    let structured = Arc::new(structured.with_repair_template(prompts.get("output_repair")?));
    let stages = vec![
        StageDef::new(Arc::new(StartStage), Some(route_interview_entry)),
        StageDef::new(
            Arc::new(EvaluationStage::new(structured, prompts.clone())),
            Some(route_after_evaluation),
        ),
        // Suspend after asking: the graph waits for the next user turn
        StageDef::new(Arc::new(ConversationStage::new(client, prompts)), None),
        StageDef::new(Arc::new(InterviewFinalStage), None),
    ];
    Workflow::new(START, stages, store)
}
