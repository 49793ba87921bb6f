/// Lifecycle of one live session.
///
/// `Idle -> Connecting -> Open -> Closing -> Closed`. `Error` is reachable from
/// every non-terminal state; `Closed` and `Error` are terminal.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Open,
    Closing,
    Closed,
    Error(String),
}

impl SessionState {
    pub fn label(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Open => "open",
            SessionState::Closing => "closing",
            SessionState::Closed => "closed",
            SessionState::Error(_) => "error",
        }
    }

    pub fn is_open(&self) -> bool {
        matches!(self, SessionState::Open)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::Closed | SessionState::Error(_))
    }

    pub fn error_reason(&self) -> Option<&str> {
        match self {
            SessionState::Error(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn can_transition_to(&self, next: &SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (Closed | Error(_), _) => false,
            (_, Error(_)) => true,
            (Idle, Connecting) => true,
            (Idle, Closed) => true,
            (Connecting, Open | Closed) => true,
            (Open, Closing | Closed) => true,
            (Closing, Closed) => true,
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        use SessionState::*;
        let path = [Idle, Connecting, Open, Closing, Closed];
        for pair in path.windows(2) {
            assert!(pair[0].can_transition_to(&pair[1]), "{:?} -> {:?}", pair[0], pair[1]);
        }
    }

    #[test]
    fn test_error_reachable_from_non_terminal_states() {
        use SessionState::*;
        let failure = Error("boom".into());
        for state in [Idle, Connecting, Open, Closing] {
            assert!(state.can_transition_to(&failure));
        }
        assert!(!Closed.can_transition_to(&failure));
    }

    #[test]
    fn test_terminal_states_are_final() {
        use SessionState::*;
        assert!(!Closed.can_transition_to(&Open));
        assert!(!Error("x".into()).can_transition_to(&Connecting));
        assert!(!Open.can_transition_to(&Connecting));
        assert!(Error("x".into()).is_terminal());
    }
}
