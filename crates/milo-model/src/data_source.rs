use milo_messenger::{Completion, Messages, Messenger, Subscriber};
use serde_json::Value;
use std::rc::Rc;

use crate::message::ModelMessage;
use crate::ModelError;

/// What a connector needs from an endpoint.
///
/// Implementors emit `"datachanges"` after every mutation and apply batches
/// posted synchronously as `"changedata"`, reporting the outcome through the
/// completion.
pub trait DataSource {
    fn get(&self) -> Option<Value>;

    fn set(&self, value: Value) -> Result<(), ModelError>;

    fn messenger(&self) -> &Messenger<ModelMessage>;

    /// Data source scoped to `access` below this one.
    fn subpath(&self, access: &str) -> Result<Rc<dyn DataSource>, ModelError>;

    fn on(&self, messages: Messages, subscriber: Subscriber<ModelMessage>) -> bool {
        self.messenger().subscribe(messages, subscriber)
    }

    fn off(&self, messages: Messages, subscriber: Option<&Subscriber<ModelMessage>>) -> bool {
        self.messenger().unsubscribe(messages, subscriber)
    }

    fn post_message(&self, message: &str, data: ModelMessage, completion: Option<Completion>) {
        self.messenger().dispatch(message, data, completion);
    }

    fn post_message_sync(&self, message: &str, data: ModelMessage, completion: Option<Completion>) {
        self.messenger().dispatch_sync(message, data, completion);
    }
}
