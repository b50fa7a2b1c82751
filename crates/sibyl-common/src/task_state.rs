//! Task status state machine (§4.15):
//!
//! ```text
//!  backlog ─┐
//!           ├→ todo ─→ doing ─→ review ─→ done
//!           │          ↓  ↑              ↓
//!           │        blocked          archived
//!           └──────→ archived
//! ```

use crate::entity::TaskStatus;
use crate::errors::CoreError;

/// Returns whether `from -> to` is an allowed task transition.
pub fn is_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::*;
    matches!(
        (from, to),
        (Backlog, Todo)
            | (Backlog, Archived)
            | (Todo, Doing)
            | (Doing, Review)
            | (Doing, Blocked)
            | (Blocked, Doing)
            | (Review, Done)
            | (Done, Archived)
    )
}

/// Validate a transition, producing the typed §7 error on rejection.
pub fn validate_transition(task_id: &str, from: TaskStatus, to: TaskStatus) -> Result<(), CoreError> {
    if from == to {
        return Ok(());
    }
    if is_allowed(from, to) {
        Ok(())
    } else {
        Err(CoreError::InvalidTransition {
            kind: "Task",
            id: task_id.to_string(),
            from: from.to_string(),
            to: to.to_string(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use TaskStatus::*;

    #[test]
    fn full_lifecycle_from_scenario_3_is_legal() {
        assert!(is_allowed(Backlog, Todo));
        assert!(is_allowed(Todo, Doing));
        assert!(is_allowed(Doing, Blocked));
        assert!(is_allowed(Blocked, Doing));
        assert!(is_allowed(Doing, Review));
        assert!(is_allowed(Review, Done));
        assert!(is_allowed(Done, Archived));
    }

    #[test]
    fn skipping_states_is_illegal() {
        assert!(!is_allowed(Backlog, Doing));
        assert!(!is_allowed(Todo, Done));
        assert!(!is_allowed(Review, Archived));
    }

    #[test]
    fn validate_transition_surfaces_invalid_transition_error() {
        let err = validate_transition("task_1", Backlog, Done).unwrap_err();
        match err {
            CoreError::InvalidTransition { kind, id, .. } => {
                assert_eq!(kind, "Task");
                assert_eq!(id, "task_1");
            }
            _ => panic!("expected InvalidTransition"),
        }
    }

    #[test]
    fn same_status_transition_is_a_noop_not_an_error() {
        assert!(validate_transition("task_1", Doing, Doing).is_ok());
    }
}
