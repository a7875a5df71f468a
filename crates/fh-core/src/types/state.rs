//! Connection lifecycle states.

use std::fmt;

/// State of one connector job.
///
/// A job moves `Disconnected → Connecting → Connected → Terminated`; a failed
/// connect goes straight from `Connecting` to `Terminated`. Once terminated a
/// job is never reused; the owner builds a new one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
    Terminated,
}

impl ConnectionState {
    pub fn is_terminal(self) -> bool {
        self == ConnectionState::Terminated
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "DISCONNECTED",
            ConnectionState::Connecting => "CONNECTING",
            ConnectionState::Connected => "CONNECTED",
            ConnectionState::Terminated => "TERMINATED",
        };
        f.write_str(s)
    }
}

/// Whether a distribution server is attached to its feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionStatus {
    Connected,
    #[default]
    NotConnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => f.write_str("CONNECTED"),
            ConnectionStatus::NotConnected => f.write_str("NOT_CONNECTED"),
        }
    }
}
