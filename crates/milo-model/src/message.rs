use milo_path::Path;
use serde_json::{Map, Value};

use crate::change::{Change, ChangeBatch};

/// Batch of changes a data source emitted.
pub const DATA_CHANGES: &str = "datachanges";
/// Request to apply a batch of changes, dispatched synchronously with a
/// completion.
pub const CHANGE_DATA: &str = "changedata";
/// Result of a validation run.
pub const VALIDATED: &str = "validated";

/// Payload of every message on a model's messenger.
#[derive(Debug, Clone, PartialEq)]
pub enum ModelMessage {
    DataChanges(ChangeBatch),
    ChangeData(ChangeBatch),
    Validated(Validation),
    /// Delivered to path subscriptions (`.info.name`, `.info.*`).
    Changed(Change),
    Custom(Value),
}

impl ModelMessage {
    pub fn batch(&self) -> Option<&ChangeBatch> {
        match self {
            ModelMessage::DataChanges(batch) | ModelMessage::ChangeData(batch) => Some(batch),
            _ => None,
        }
    }

    pub fn change(&self) -> Option<&Change> {
        match self {
            ModelMessage::Changed(change) => Some(change),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    pub path: Path,
    pub valid: bool,
    /// Fields reported by the validator.
    pub details: Map<String, Value>,
}
