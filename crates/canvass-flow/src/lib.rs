//! canvass-flow: Stateful survey conversation workflows
//!
//! This crate drives two multi-turn conversations over checkpointed state:
//! a theme workflow that turns a company URL into a refined set of survey
//! topics, and an interview workflow that asks one question per topic until
//! every answer is judged complete and a closing feedback message has been
//! collected.

pub mod checkpoint;
pub mod error;
pub mod graph;
pub mod orchestrator;
pub mod prompts;
pub mod stages;
pub mod state;

pub use checkpoint::{MemoryStore, RetryingStore, StateStore};
pub use error::{Error, Result};
pub use graph::{Router, Stage, StageDef, Workflow, interview_workflow, theme_workflow};
pub use orchestrator::{Archive, InitData, NoopArchive, Orchestrator, TurnOutcome};
pub use prompts::PromptStore;
pub use state::{StateUpdate, SurveyState, Topic, TopicResponse, Turn, TurnRole};
