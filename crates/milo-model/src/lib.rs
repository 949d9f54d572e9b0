//! Observable JSON store with path addressing.
//!
//! A [`Model`] holds an optional `serde_json::Value` and reports every
//! mutation as a [`ChangeBatch`] on its messenger (`"datachanges"`). It also
//! accepts batches posted as `"changedata"`, which is how a connector writes
//! into it. [`ModelPath`] scopes both directions to a subtree.
//!
//! # Example
//!
//! ```
//! use milo_messenger::{Delivery, Subscriber, TickScheduler};
//! use milo_model::{Model, ModelMessage, DATA_CHANGES};
//! use serde_json::json;
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let ticks = Rc::new(TickScheduler::new());
//! let model = Model::with_scheduler(ticks.clone());
//!
//! let paths = Rc::new(RefCell::new(Vec::new()));
//! let sink = paths.clone();
//! model.messenger().subscribe(
//!     DATA_CHANGES,
//!     Subscriber::new(move |d: &Delivery<'_, ModelMessage>| {
//!         if let Some(batch) = d.data.batch() {
//!             for change in &batch.changes {
//!                 sink.borrow_mut().push(milo_path::format_access_path(&change.path));
//!             }
//!         }
//!     }),
//! );
//!
//! model.set(json!({"info": {"name": "a"}})).unwrap();
//! model.set_at(".info.name", json!("b")).unwrap();
//! ticks.run_tick();
//! assert_eq!(*paths.borrow(), vec!["", ".info.name"]);
//! ```

use milo_path::PathError;
use thiserror::Error;

mod bridge;
mod change;
mod data_source;
mod message;
mod model;
mod path_view;

pub use change::{compute_changes, Change, ChangeBatch, ChangeKind, TransactionId};
pub use data_source::DataSource;
pub use message::{ModelMessage, Validation, CHANGE_DATA, DATA_CHANGES, VALIDATED};
pub use model::Model;
pub use path_view::ModelPath;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ModelError {
    #[error(transparent)]
    Path(#[from] PathError),
    #[error("splice change at {0:?} carries no inserted items")]
    MalformedSplice(String),
    #[error("model was destroyed")]
    Destroyed,
}
