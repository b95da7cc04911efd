//! Stage functions for the theme and interview workflows

mod analyze;
mod converse;
mod evaluate;
mod generate;
mod refine;

pub use analyze::SubjectAnalysisStage;
pub use converse::ConversationStage;
pub use evaluate::EvaluationStage;
pub use generate::TopicGenerationStage;
pub use refine::TopicRefinementStage;

use crate::state::{SurveyState, Topic, Turn, TurnRole};

/// Format the transcript for inclusion in a prompt
pub(crate) fn format_history(history: &[Turn]) -> String {
    if history.is_empty() {
        return "No previous conversation".to_string();
    }
    history
        .iter()
        .map(|turn| {
            let role = match turn.role {
                TurnRole::User => "User",
                TurnRole::Agent => "Assistant",
            };
            format!("{}: {}", role, turn.content)
        })
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format the topic list as a readable bullet list
pub(crate) fn format_topics(topics: &[Topic]) -> String {
    topics
        .iter()
        .map(|t| format!("- {}", t.name))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Format completed topics with their indexes, for the evaluation prompt
pub(crate) fn format_discussed(state: &SurveyState) -> String {
    let discussed: Vec<String> = state
        .topics
        .iter()
        .enumerate()
        .filter(|(_, t)| {
            state
                .topic_responses
                .get(&t.name)
                .is_some_and(|r| r.complete)
        })
        .map(|(i, t)| format!("- Topic {}: {} (complete)", i, t.name))
        .collect();

    if discussed.is_empty() {
        "No topics discussed yet".to_string()
    } else {
        discussed.join("\n")
    }
}

/// Transcript with the trailing user turn removed, so prompts that already
/// carry the latest answer separately do not repeat it.
pub(crate) fn history_before_latest(state: &SurveyState) -> &[Turn] {
    match state.turn_history.last() {
        Some(turn) if turn.role == TurnRole::User => {
            &state.turn_history[..state.turn_history.len() - 1]
        }
        _ => &state.turn_history,
    }
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_history_empty() {
        assert_eq!(format_history(&[]), "No previous conversation");
    }

    #[test]
    fn test_format_history_roles() {
        let history = vec![Turn::agent("How was it?"), Turn::user("Great")];
        let text = format_history(&history);
        assert_eq!(text, "Assistant: How was it?\nUser: Great");
    }

    #[test]
    fn test_history_before_latest_drops_trailing_user_turn() {
        let mut state = SurveyState::new("t1");
        state.turn_history = vec![Turn::agent("Q1"), Turn::user("A1")];
        assert_eq!(history_before_latest(&state).len(), 1);

        state.turn_history = vec![Turn::user("A1"), Turn::agent("Q2")];
        assert_eq!(history_before_latest(&state).len(), 2);
    }

    #[test]
    fn test_format_discussed_empty() {
        let state = SurveyState::new("t1");
        assert_eq!(format_discussed(&state), "No topics discussed yet");
    }
}
