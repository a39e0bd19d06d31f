use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Connectivity to the remote catalog server, as reported over the
/// subscription channel.  Process-wide, single instance; only the declared
/// edges are legal and `Terminated` is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    /// Pre-state before the first connectivity event arrives.  Counts as
    /// `NotSubscribedToServer` for refresh purposes.
    Setup,
    ServerNotFound,
    NotSubscribedToServer,
    SubscribedToServer,
    Terminated,
}

impl SubscriptionState {
    /// Parse a wire token.  Tokens are the state names themselves.
    pub fn parse_token(token: &str) -> Result<Self, UnknownStateError> {
        match token.trim() {
            "ServerNotFound" => Ok(Self::ServerNotFound),
            "NotSubscribedToServer" => Ok(Self::NotSubscribedToServer),
            "SubscribedToServer" => Ok(Self::SubscribedToServer),
            "Terminated" => Ok(Self::Terminated),
            other => Err(UnknownStateError(other.to_string())),
        }
    }

    /// Whether the declared transition table allows moving to `next`.
    ///
    /// `Setup` adopts whatever the channel first reports; `Terminated` is
    /// reachable from anywhere and leads nowhere.
    pub fn can_transition_to(self, next: Self) -> bool {
        use SubscriptionState::*;
        if self == Terminated {
            return false;
        }
        match (self, next) {
            (_, Terminated) => true,
            (Setup, _) => true,
            (ServerNotFound, NotSubscribedToServer) => true,
            (NotSubscribedToServer, SubscribedToServer) => true,
            (SubscribedToServer, NotSubscribedToServer) => true,
            (SubscribedToServer, ServerNotFound) => true,
            _ => false,
        }
    }
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Unrecognized connectivity token.  The machine falls back to
/// `NotSubscribedToServer` rather than crashing.
#[derive(Debug, Clone, Error)]
#[error("unknown subscription state token: {0:?}")]
pub struct UnknownStateError(pub String);
