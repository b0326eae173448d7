//! Execution strategy lifecycle.

use std::fmt;

/// Lifecycle phase of an execution strategy.
///
/// Phases only move forward, one step at a time, and a strategy is never
/// reused after it reaches [`Phase::Exited`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Nothing has been sent to the engine yet.
    #[default]
    Unconfigured,
    /// The container exists but is not running.
    Created,
    /// The container is running and its streams are attached.
    Attached,
    /// The container is gone.
    Exited,
}

impl Phase {
    /// Check if moving to `target` is allowed.
    ///
    /// Valid transitions:
    /// - Unconfigured -> Created
    /// - Created -> Attached
    /// - Created -> Exited (start or attach failed, container removed)
    /// - Attached -> Exited
    pub fn can_transition_to(&self, target: Phase) -> bool {
        use Phase::*;
        matches!(
            (*self, target),
            (Unconfigured, Created) | (Created, Attached) | (Created, Exited) | (Attached, Exited)
        )
    }

    /// Whether a container may exist on the engine in this phase.
    pub fn holds_container(&self) -> bool {
        matches!(self, Phase::Created | Phase::Attached)
    }

    /// Check if this is a terminal phase.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Phase::Exited)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Phase::Unconfigured => "unconfigured",
            Phase::Created => "created",
            Phase::Attached => "attached",
            Phase::Exited => "exited",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(Phase::Unconfigured.can_transition_to(Phase::Created));
        assert!(Phase::Created.can_transition_to(Phase::Attached));
        assert!(Phase::Attached.can_transition_to(Phase::Exited));
        assert!(Phase::Created.can_transition_to(Phase::Exited));
    }

    #[test]
    fn test_no_backward_or_skipping_transitions() {
        assert!(!Phase::Unconfigured.can_transition_to(Phase::Attached));
        assert!(!Phase::Unconfigured.can_transition_to(Phase::Exited));
        assert!(!Phase::Attached.can_transition_to(Phase::Created));
        assert!(!Phase::Exited.can_transition_to(Phase::Unconfigured));
        assert!(!Phase::Created.can_transition_to(Phase::Created));
    }

    #[test]
    fn test_holds_container() {
        assert!(!Phase::Unconfigured.holds_container());
        assert!(Phase::Created.holds_container());
        assert!(Phase::Attached.holds_container());
        assert!(!Phase::Exited.holds_container());
        assert!(Phase::Exited.is_terminal());
    }

    #[test]
    fn test_display() {
        assert_eq!(Phase::Attached.to_string(), "attached");
    }
}
