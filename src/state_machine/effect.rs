//! Effects produced by state transitions

use crate::controller::Notification;
use crate::protocol::ClientCommand;
use crate::store::Mutation;

/// Effects to be executed after a state transition, in order
#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    /// Write to the session store
    Mutate(Mutation),

    /// Sync the store's status with the new state and persist a snapshot
    PersistState,

    /// Open the transport connection for this session
    OpenTransport,

    /// Close the transport without classification
    CloseTransport,

    /// Hand a command to the transport
    SendCommand(ClientCommand),

    /// Notify the presentation layer
    Notify(Notification),

    /// Start the redirect countdown
    BeginRedirect { target: String },

    /// Redirect immediately (still single-shot)
    RedirectNow { target: String },
}

impl Effect {
    pub fn mutate(mutation: Mutation) -> Self {
        Effect::Mutate(mutation)
    }

    pub fn notify(notification: Notification) -> Self {
        Effect::Notify(notification)
    }

    pub fn is_mutation(&self) -> bool {
        matches!(self, Effect::Mutate(_))
    }
}
