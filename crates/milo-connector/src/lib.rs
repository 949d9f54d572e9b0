//! Synchronization links between two observable models.
//!
//! A [`Connector`] listens to `"datachanges"` on one or both endpoints and
//! writes the changes into the other endpoint as `"changedata"` on the next
//! tick. The [`Mode`] string (`<<->>`, `->`, `<-`) selects the directions and
//! how deep below the root changes are followed. [`ConnectorOptions`] adds
//! path translation, data translation and validators.
//!
//! Batches queued within one tick are merged by transaction id before they
//! are written, so a transaction stays one unit across a chain of
//! connectors. While writing, the connector detaches its own link on the
//! target so the write does not come back as an echo.
//!
//! # Example
//!
//! ```
//! use milo_connector::{Connector, ConnectorOptions};
//! use milo_messenger::TickScheduler;
//! use milo_model::Model;
//! use serde_json::json;
//! use std::rc::Rc;
//!
//! let ticks = Rc::new(TickScheduler::new());
//! let m1 = Model::with_scheduler(ticks.clone());
//! let m2 = Model::with_scheduler(ticks.clone());
//! let connector = Connector::new(Rc::new(m1.clone()), Rc::new(m2.clone()), "<<->>", ConnectorOptions::new()).unwrap();
//!
//! m1.set_at(".info.name", json!("milo")).unwrap();
//! assert_eq!(m2.get(), None);
//! ticks.run_until_idle();
//! assert_eq!(m2.get(), Some(json!({"info": {"name": "milo"}})));
//!
//! m2.set_at(".info.name", json!("bond")).unwrap();
//! ticks.run_until_idle();
//! assert_eq!(m1.get_at(".info.name").unwrap(), Some(json!("bond")));
//! connector.destroy().unwrap();
//! ```

use milo_model::ModelError;
use milo_path::PathError;
use thiserror::Error;

mod connector;
mod event;
mod mode;
mod options;
mod translation;

pub use connector::{merge_transactions, Connector};
pub use event::{
    ConnectorEvent, CHANGE_COMPLETED, CHANGE_FAILED, CHANGE_STARTED, DESTROYED, TURNED_OFF, TURNED_ON,
};
pub use mode::{Direction, Endpoint, Mode};
pub use options::{ConnectorConfig, ConnectorOptions, DataTranslator, ValidationCallback, ValidationResult, Validator};
pub use translation::{PathTranslation, TranslationRule};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConnectorError {
    #[error("invalid connector mode {0:?}")]
    InvalidMode(String),
    #[error("connector mode {0:?} enables no direction")]
    NoDirection(String),
    #[error("connector mode {0:?} has different depths for the two directions")]
    UnequalDepth(String),
    #[error("path translation {from} -> {to} needs the same wildcard depth on both sides")]
    AsymmetricWildcard { from: String, to: String },
    #[error("path translation has more than one source for {0:?}")]
    AmbiguousTranslation(String),
    #[error(transparent)]
    Path(#[from] PathError),
    #[error(transparent)]
    Model(#[from] ModelError),
    #[error("connector was destroyed")]
    Destroyed,
}
