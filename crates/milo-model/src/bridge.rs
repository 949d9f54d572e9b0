//! Message sources that wire path subscriptions on demand.
//!
//! [`PathBridge`] sits on a model's messenger: subscribing to `.info.name`
//! or `.info.*` there registers a forwarder on the model's internal
//! per-path messenger. [`SubtreeBridge`] sits on a [`ModelPath`]'s
//! messenger and forwards `"datachanges"` and path messages from the model,
//! scoped to the subtree.
//!
//! [`ModelPath`]: crate::ModelPath

use milo_messenger::{Delivery, MessagePattern, MessageSource, Messages, Messenger, Subscriber, WeakMessenger};
use milo_path::{format_access_path, parse_access_path, Path, PathError, PathPattern, PathStep};
use std::cell::RefCell;
use std::collections::HashMap;
use tracing::debug;

use crate::change::{Change, ChangeBatch};
use crate::message::{ModelMessage, DATA_CHANGES};
use crate::model::project_changes;

/// Path messages start like an access path or a root wildcard.
pub(crate) fn is_path_message(message: &str) -> bool {
    message.starts_with(['.', '[', '*'])
}

fn single(message: String) -> Messages {
    Messages::Names(vec![message])
}

pub(crate) struct PathBridge {
    internal: Messenger<Change>,
    external: WeakMessenger<ModelMessage>,
    forwarders: RefCell<HashMap<String, (Messages, Subscriber<Change>)>>,
}

impl PathBridge {
    pub(crate) fn new(internal: Messenger<Change>, external: WeakMessenger<ModelMessage>) -> Self {
        Self {
            internal,
            external,
            forwarders: RefCell::new(HashMap::new()),
        }
    }

    fn internal_messages(message: &str) -> Result<Messages, PathError> {
        if PathPattern::is_pattern(message) {
            let pattern = PathPattern::parse(message)?;
            let key = pattern.to_string();
            return Ok(Messages::Pattern(MessagePattern::predicate(key, move |path| {
                parse_access_path(path).is_ok_and(|path| pattern.matches(&path))
            })));
        }
        Ok(single(format_access_path(&parse_access_path(message)?)))
    }
}

impl MessageSource for PathBridge {
    fn on_subscriber_added(&self, message: &str) {
        if !is_path_message(message) || self.forwarders.borrow().contains_key(message) {
            return;
        }
        let target = match Self::internal_messages(message) {
            Ok(target) => target,
            Err(e) => {
                debug!(message, error = %e, "path message not bridged");
                return;
            }
        };
        let external = self.external.clone();
        let original = message.to_string();
        let forwarder = Subscriber::new(move |d: &Delivery<'_, Change>| {
            if let Some(external) = external.upgrade() {
                external.dispatch(single(original.clone()), ModelMessage::Changed(d.data.clone()), None);
            }
        });
        self.internal.subscribe_sync(target.clone(), forwarder.clone());
        self.forwarders
            .borrow_mut()
            .insert(message.to_string(), (target, forwarder));
    }

    fn on_subscriber_removed(&self, message: &str) {
        let entry = self.forwarders.borrow_mut().remove(message);
        if let Some((target, forwarder)) = entry {
            self.internal.unsubscribe(target, Some(&forwarder));
        }
    }

    fn destroy(&self) {
        let forwarders: Vec<_> = self.forwarders.borrow_mut().drain().collect();
        for (_, (target, forwarder)) in forwarders {
            self.internal.unsubscribe(target, Some(&forwarder));
        }
    }
}

pub(crate) struct SubtreeBridge {
    model: Messenger<ModelMessage>,
    prefix: Path,
    scoped: WeakMessenger<ModelMessage>,
    forwarders: RefCell<HashMap<String, (String, Subscriber<ModelMessage>)>>,
}

impl SubtreeBridge {
    pub(crate) fn new(model: Messenger<ModelMessage>, prefix: Path, scoped: WeakMessenger<ModelMessage>) -> Self {
        Self {
            model,
            prefix,
            scoped,
            forwarders: RefCell::new(HashMap::new()),
        }
    }

    /// The model message that feeds `message` on the scoped messenger.
    fn model_message(&self, message: &str) -> Result<String, PathError> {
        if PathPattern::is_pattern(message) {
            let pattern = PathPattern::parse(message)?;
            let mut prefix = self.prefix.clone();
            prefix.extend_from_slice(pattern.prefix());
            return Ok(PathPattern::new(prefix, pattern.wildcard_depth()).to_string());
        }
        let mut path = self.prefix.clone();
        path.extend(parse_access_path(message)?);
        Ok(format_access_path(&path))
    }

    fn data_changes_forwarder(&self) -> Subscriber<ModelMessage> {
        let scoped = self.scoped.clone();
        let prefix = self.prefix.clone();
        Subscriber::new(move |d: &Delivery<'_, ModelMessage>| {
            let (Some(scoped), ModelMessage::DataChanges(batch)) = (scoped.upgrade(), d.data) else {
                return;
            };
            let changes = project_changes(&prefix, &batch.changes);
            if changes.is_empty() {
                return;
            }
            scoped.dispatch(
                DATA_CHANGES,
                ModelMessage::DataChanges(ChangeBatch::new(changes, batch.transaction)),
                None,
            );
        })
    }

    fn path_forwarder(&self, message: &str) -> Subscriber<ModelMessage> {
        let scoped = self.scoped.clone();
        let prefix = self.prefix.clone();
        let original = message.to_string();
        Subscriber::new(move |d: &Delivery<'_, ModelMessage>| {
            let (Some(scoped), ModelMessage::Changed(change)) = (scoped.upgrade(), d.data) else {
                return;
            };
            let path = relative(&prefix, &change.path).to_vec();
            let change = Change { path, ..change.clone() };
            scoped.dispatch(single(original.clone()), ModelMessage::Changed(change), None);
        })
    }
}

fn relative<'a>(prefix: &[PathStep], path: &'a [PathStep]) -> &'a [PathStep] {
    path.strip_prefix(prefix).unwrap_or(path)
}

impl MessageSource for SubtreeBridge {
    fn on_subscriber_added(&self, message: &str) {
        if self.forwarders.borrow().contains_key(message) {
            return;
        }
        let (model_message, forwarder) = if message == DATA_CHANGES {
            (DATA_CHANGES.to_string(), self.data_changes_forwarder())
        } else if is_path_message(message) {
            match self.model_message(message) {
                Ok(model_message) => (model_message, self.path_forwarder(message)),
                Err(e) => {
                    debug!(message, error = %e, "path message not bridged");
                    return;
                }
            }
        } else {
            return;
        };
        self.model
            .subscribe_sync(single(model_message.clone()), forwarder.clone());
        self.forwarders
            .borrow_mut()
            .insert(message.to_string(), (model_message, forwarder));
    }

    fn on_subscriber_removed(&self, message: &str) {
        let entry = self.forwarders.borrow_mut().remove(message);
        if let Some((model_message, forwarder)) = entry {
            self.model.unsubscribe(single(model_message), Some(&forwarder));
        }
    }

    fn destroy(&self) {
        let forwarders: Vec<_> = self.forwarders.borrow_mut().drain().collect();
        for (_, (model_message, forwarder)) in forwarders {
            self.model.unsubscribe(single(model_message), Some(&forwarder));
        }
    }
}

impl Drop for SubtreeBridge {
    fn drop(&mut self) {
        self.destroy();
    }
}
