use std::fmt;

/// Connection lifecycle as seen by the application.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionState {
    /// Not running. The only state `stop()` leaves behind.
    #[default]
    Idle,
    Discovering,
    Connecting,
    Authenticating,
    Connected,
    /// Between attempts; carries why the last one ended
    Disconnected(String),
}

impl SessionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, SessionState::Connected)
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Idle => f.write_str("idle"),
            SessionState::Discovering => f.write_str("discovering"),
            SessionState::Connecting => f.write_str("connecting"),
            SessionState::Authenticating => f.write_str("authenticating"),
            SessionState::Connected => f.write_str("connected"),
            SessionState::Disconnected(reason) => write!(f, "disconnected ({})", reason),
        }
    }
}
