//! Structured errors for switchboard operations.
//!
//! Every failure is scoped to one connection, one registration or one
//! request. Nothing here is fatal to the host.
//!
//! The spoke-side callbacks only learn *whether* a connection attempt was
//! accepted. The hub-side caller of [`connect`](crate::connect) and
//! [`disconnect`](crate::disconnect) additionally gets a [`BrokerError`]
//! naming the reason.
//!
//! # Example
//!
//! ```ignore
//! use switchboard::{connect, BrokerError};
//!
//! match connect(&mut model, &view, token) {
//!     Ok(()) => {}
//!     Err(BrokerError::AlreadyAttached { hub, .. }) => {
//!         tracing::debug!(%hub, "view already attached elsewhere");
//!     }
//!     Err(e) => return Err(e),
//! }
//! ```

use thiserror::Error;

use crate::core::{HubId, RequestId, SpokeId};

/// Structured error type for switchboard operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BrokerError {
    /// The hub's admission policy refused the spoke.
    #[error("{spoke} refused by admission policy of {hub}")]
    ConnectionRefused {
        /// The hub that refused.
        hub: HubId,
        /// The spoke that asked.
        spoke: SpokeId,
    },

    /// The spoke is already attached to a hub (possibly this one).
    #[error("{spoke} is already attached to {hub}")]
    AlreadyAttached {
        /// The hub the spoke is currently attached to.
        hub: HubId,
        /// The spoke that asked.
        spoke: SpokeId,
    },

    /// The hub admitted the spoke but the spoke's own acceptance hook
    /// refused; the admission was rolled back.
    #[error("{spoke} declined the connection to {hub}")]
    SpokeDeclined {
        /// The hub whose admission was rolled back.
        hub: HubId,
        /// The spoke that declined.
        spoke: SpokeId,
    },

    /// Hub and spoke do not both agree the spoke is attached to this hub.
    #[error("{spoke} is not attached to {hub}")]
    NotAttached {
        /// The hub that was asked.
        hub: HubId,
        /// The spoke in question.
        spoke: SpokeId,
    },

    /// A listener was registered twice for the same event kind.
    #[error("{spoke} is already registered as a listener for {kind}")]
    AlreadyRegistered {
        /// Human-readable event kind name.
        kind: &'static str,
        /// The spoke registered twice.
        spoke: SpokeId,
    },

    /// A completion was issued for a spoke with no deferred request.
    #[error("no deferred request pending for {spoke} on {hub}")]
    NoPendingRequest {
        /// The hub issuing the completion.
        hub: HubId,
        /// The spoke named by the completion.
        spoke: SpokeId,
    },

    /// A completion named a request the hub is not holding.
    #[error("{request} is not pending on {hub}")]
    UnknownRequest {
        /// The hub issuing the completion.
        hub: HubId,
        /// The request named by the completion.
        request: RequestId,
    },
}

impl BrokerError {
    /// Returns true if this error is a refused or rolled-back connection.
    pub fn is_connection_refusal(&self) -> bool {
        matches!(
            self,
            BrokerError::ConnectionRefused { .. }
                | BrokerError::AlreadyAttached { .. }
                | BrokerError::SpokeDeclined { .. }
        )
    }

    /// Returns true if this error signals a programming error in the
    /// caller rather than an ordinary refusal.
    pub fn is_usage_error(&self) -> bool {
        matches!(
            self,
            BrokerError::AlreadyRegistered { .. }
                | BrokerError::NoPendingRequest { .. }
                | BrokerError::UnknownRequest { .. }
        )
    }
}
