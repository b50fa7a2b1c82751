//! Agent status state machine (§3, §4.12, §4.13).

use crate::entity::AgentStatus;
use crate::errors::CoreError;

pub fn is_allowed(from: AgentStatus, to: AgentStatus) -> bool {
    use AgentStatus::*;
    if from.is_terminal() {
        return false;
    }
    matches!(
        (from, to),
        (Initializing, Working)
            | (Initializing, Failed)
            | (Working, Paused)
            | (Working, WaitingApproval)
            | (Working, WaitingDependency)
            | (Working, Completed)
            | (Working, Failed)
            | (Working, Terminated)
            | (Paused, Working)
            | (Paused, Terminated)
            | (WaitingApproval, Working)
            | (WaitingApproval, Terminated)
            | (WaitingApproval, Failed)
            | (WaitingDependency, Working)
            | (WaitingDependency, Terminated)
            | (WaitingDependency, Failed)
    )
}

pub fn validate_transition(agent_id: &str, from: AgentStatus, to: AgentStatus) -> Result<(), CoreError> {
    if from == to {
        return Ok(());
    }
    if is_allowed(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            kind: "Agent",
            id: agent_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use AgentStatus::*;

    #[test]
    fn spawn_to_working_to_completed_is_legal() {
        assert!(is_allowed(Initializing, Working));
        assert!(is_allowed(Working, Completed));
    }

    #[test]
    fn pause_resume_round_trip_is_legal() {
        assert!(is_allowed(Working, Paused));
        assert!(is_allowed(Paused, Working));
    }

    #[test]
    fn terminal_states_accept_no_further_transitions() {
        assert!(!is_allowed(Completed, Working));
        assert!(!is_allowed(Failed, Working));
        assert!(!is_allowed(Terminated, Working));
    }

    #[test]
    fn validate_transition_rejects_illegal_jump() {
        let err = validate_transition("agent_1", Initializing, Completed).unwrap_err();
        assert!(matches!(err, CoreError::InvalidTransition { .. }));
    }
}
