use milo_messenger::DeliveryError;

use crate::mode::Endpoint;

pub const TURNED_ON: &str = "turnedon";
pub const TURNED_OFF: &str = "turnedoff";
pub const CHANGE_STARTED: &str = "changestarted";
pub const CHANGE_COMPLETED: &str = "changecompleted";
pub const CHANGE_FAILED: &str = "changefailed";
pub const DESTROYED: &str = "destroyed";

/// Lifecycle events a connector posts on its own messenger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectorEvent {
    TurnedOn,
    TurnedOff,
    ChangeStarted { source: Endpoint, target: Endpoint },
    ChangeCompleted { source: Endpoint, target: Endpoint },
    /// The target rejected a write. The reverse link stays detached.
    ChangeFailed {
        source: Endpoint,
        target: Endpoint,
        error: DeliveryError,
    },
    Destroyed,
}

impl ConnectorEvent {
    pub fn message(&self) -> &'static str {
        match self {
            ConnectorEvent::TurnedOn => TURNED_ON,
            ConnectorEvent::TurnedOff => TURNED_OFF,
            ConnectorEvent::ChangeStarted { .. } => CHANGE_STARTED,
            ConnectorEvent::ChangeCompleted { .. } => CHANGE_COMPLETED,
            ConnectorEvent::ChangeFailed { .. } => CHANGE_FAILED,
            ConnectorEvent::Destroyed => DESTROYED,
        }
    }
}
