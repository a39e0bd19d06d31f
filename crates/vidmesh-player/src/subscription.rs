//! Subscription state machine for the remote catalog server.
//!
//! Tokens arrive over the connectivity channel and are applied one at a
//! time, in arrival order.  The machine reacts to edges, not levels: only
//! the transition *into* `SubscribedToServer` asks for a catalog refresh,
//! so a re-announced state never duplicates work.

use thiserror::Error;
use tracing::warn;
use vidmesh_proto::subscription::{SubscriptionState, UnknownStateError};

/// Outcome of applying one connectivity token.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: SubscriptionState,
    pub to: SubscriptionState,
    /// Set exactly when this token entered `SubscribedToServer` from some
    /// other state: the caller must issue one catalog refresh.
    pub refresh: bool,
}

#[derive(Debug, Clone, Error)]
pub enum SubscriptionError {
    #[error(transparent)]
    UnknownState(#[from] UnknownStateError),
    /// A recognised state was announced on an edge the transition table
    /// does not declare.  The machine keeps its current state.
    #[error("illegal subscription transition {from} -> {to}")]
    IllegalTransition {
        from: SubscriptionState,
        to: SubscriptionState,
    },
}

pub struct SubscriptionStateMachine {
    state: SubscriptionState,
}

impl SubscriptionStateMachine {
    pub fn new() -> Self {
        Self {
            state: SubscriptionState::Setup,
        }
    }

    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// Apply one token from the connectivity channel.
    ///
    /// Unknown tokens fall back to `NotSubscribedToServer` (and still report
    /// the error); recognised-but-illegal edges leave the state untouched.
    /// `Terminated` absorbs everything silently.
    pub fn apply(&mut self, token: &str) -> Result<Transition, SubscriptionError> {
        let from = self.state;

        let target = match SubscriptionState::parse_token(token) {
            Ok(t) => t,
            Err(e) => {
                if from != SubscriptionState::Terminated {
                    warn!("unknown connectivity token, falling back: {e}");
                    self.state = SubscriptionState::NotSubscribedToServer;
                }
                return Err(e.into());
            }
        };

        if target == from {
            // Duplicate level event: no edge, no refresh
            return Ok(Transition {
                from,
                to: from,
                refresh: false,
            });
        }

        if from == SubscriptionState::Terminated {
            // Absorbing: ignore whatever comes after
            return Ok(Transition {
                from,
                to: from,
                refresh: false,
            });
        }

        if !from.can_transition_to(target) {
            return Err(SubscriptionError::IllegalTransition { from, to: target });
        }

        self.state = target;
        Ok(Transition {
            from,
            to: target,
            refresh: target == SubscriptionState::SubscribedToServer,
        })
    }
}

impl Default for SubscriptionStateMachine {
    fn default() -> Self {
        Self::new()
    }
}
