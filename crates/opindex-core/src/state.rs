//! Subscription state machine owned by the orchestrator.
//!
//! ```text
//! Disconnected --Start--------------> Connecting
//! Connecting   --SubscribeSucceeded-> Subscribed
//! Connecting   --SubscribeFailed----> Disconnected
//! Subscribed   --ConnectionLost-----> Disconnected
//! (any)        --Shutdown-----------> Stopped
//! ```

use serde::{Deserialize, Serialize};

use crate::error::IndexerError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    Disconnected,
    Connecting,
    Subscribed,
    /// Final; entered only on shutdown.
    Stopped,
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Subscribed => "subscribed",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateEvent {
    Start,
    SubscribeSucceeded,
    SubscribeFailed,
    ConnectionLost,
    Shutdown,
}

impl SubscriptionState {
    /// Apply `event`, returning the next state or an error for a transition
    /// the machine does not define.
    pub fn transition(self, event: StateEvent) -> Result<Self, IndexerError> {
        use StateEvent::*;
        use SubscriptionState::*;

        match (self, event) {
            (_, Shutdown) => Ok(Stopped),
            (Disconnected, Start) => Ok(Connecting),
            (Connecting, SubscribeSucceeded) => Ok(Subscribed),
            (Connecting, SubscribeFailed) => Ok(Disconnected),
            (Subscribed, ConnectionLost) => Ok(Disconnected),
            (state, event) => Err(IndexerError::Other(format!(
                "illegal subscription transition: {event:?} in state {state}"
            ))),
        }
    }

    pub fn is_stopped(self) -> bool {
        self == Self::Stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use StateEvent::*;
    use SubscriptionState::*;

    #[test]
    fn happy_path_and_reconnect() {
        let s = Disconnected.transition(Start).unwrap();
        assert_eq!(s, Connecting);
        let s = s.transition(SubscribeSucceeded).unwrap();
        assert_eq!(s, Subscribed);
        let s = s.transition(ConnectionLost).unwrap();
        assert_eq!(s, Disconnected);
        let s = s.transition(Start).unwrap();
        assert_eq!(s.transition(SubscribeFailed).unwrap(), Disconnected);
    }

    #[test]
    fn shutdown_from_any_state() {
        for s in [Disconnected, Connecting, Subscribed, Stopped] {
            assert_eq!(s.transition(Shutdown).unwrap(), Stopped);
        }
    }

    #[test]
    fn undefined_transitions_are_rejected() {
        assert!(Disconnected.transition(SubscribeSucceeded).is_err());
        assert!(Subscribed.transition(Start).is_err());
        assert!(Connecting.transition(ConnectionLost).is_err());
        assert!(Stopped.transition(Start).is_err());
    }

    #[test]
    fn display() {
        assert_eq!(Subscribed.to_string(), "subscribed");
        assert!(Stopped.is_stopped());
    }
}
