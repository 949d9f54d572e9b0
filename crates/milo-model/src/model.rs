use milo_messenger::{default_scheduler, Delivery, DeliveryError, Messages, Messenger, Scheduler, Subscriber};
use milo_path::{format_access_path, interpolate, parse_access_path, Path, PathStep};
use serde_json::Value;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::debug;

use crate::bridge::PathBridge;
use crate::change::{compute_changes, Change, ChangeBatch, ChangeKind, TransactionId};
use crate::data_source::DataSource;
use crate::message::{ModelMessage, CHANGE_DATA, DATA_CHANGES};
use crate::path_view::ModelPath;
use crate::ModelError;

struct ModelInner {
    data: RefCell<Option<Value>>,
    /// Keyed by formatted access path, carries single changes.
    internal: Messenger<Change>,
    external: Messenger<ModelMessage>,
    transaction: Cell<Option<TransactionId>>,
    destroyed: Cell<bool>,
}

/// Observable JSON store.
///
/// Every mutation emits one `"datachanges"` batch on [`Model::messenger`]
/// and a [`ModelMessage::Changed`] for each change to subscribers of its
/// path (`.info.name`) or of a matching wildcard pattern (`.info.*`).
#[derive(Clone)]
pub struct Model {
    inner: Rc<ModelInner>,
}

impl Default for Model {
    fn default() -> Self {
        Self::new()
    }
}

impl Model {
    pub fn new() -> Self {
        Self::with_scheduler(default_scheduler())
    }

    pub fn with_data(data: Value) -> Self {
        let model = Self::new();
        model.inner.data.replace(Some(data));
        model
    }

    pub fn with_scheduler(scheduler: Rc<dyn Scheduler>) -> Self {
        let internal = Messenger::new(scheduler.clone());
        let external = Messenger::new(scheduler);
        let inner = Rc::new(ModelInner {
            data: RefCell::new(None),
            internal: internal.clone(),
            external: external.clone(),
            transaction: Cell::new(None),
            destroyed: Cell::new(false),
        });
        external.set_source(Rc::new(PathBridge::new(internal, external.downgrade())));
        external.subscribe_sync(CHANGE_DATA, change_data_handler(Rc::downgrade(&inner)));
        Self { inner }
    }

    pub fn messenger(&self) -> &Messenger<ModelMessage> {
        &self.inner.external
    }

    pub fn ptr_eq(&self, other: &Model) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.destroyed.get()
    }

    /// Destroy both messengers and drop the data.
    pub fn destroy(&self) {
        if self.inner.destroyed.replace(true) {
            return;
        }
        self.inner.external.destroy();
        self.inner.internal.destroy();
        self.inner.data.replace(None);
        debug!("model destroyed");
    }

    pub fn get(&self) -> Option<Value> {
        self.inner.data.borrow().clone()
    }

    pub fn set(&self, value: Value) -> Result<(), ModelError> {
        self.set_path(&[], value)
    }

    /// # Example
    ///
    /// ```
    /// use milo_model::Model;
    /// use serde_json::json;
    ///
    /// let model = Model::with_data(json!({"info": {"name": "milo"}}));
    /// assert_eq!(model.get_at(".info.name").unwrap(), Some(json!("milo")));
    /// assert_eq!(model.get_at(".info.missing.deeper").unwrap(), None);
    /// ```
    pub fn get_at(&self, access: &str) -> Result<Option<Value>, ModelError> {
        Ok(self.get_path(&parse_access_path(access)?))
    }

    pub fn set_at(&self, access: &str, value: Value) -> Result<(), ModelError> {
        self.set_path(&parse_access_path(access)?, value)
    }

    pub fn del_at(&self, access: &str) -> Result<Option<Value>, ModelError> {
        self.del_path(&parse_access_path(access)?)
    }

    /// View of the subtree at `access`.
    pub fn path(&self, access: &str) -> Result<ModelPath, ModelError> {
        Ok(ModelPath::new(self.clone(), parse_access_path(access)?))
    }

    /// View of `access` with its `$n` parameters filled from `params`.
    pub fn path_with(&self, access: &str, params: &[PathStep]) -> Result<ModelPath, ModelError> {
        let template = parse_access_path(access)?;
        Ok(ModelPath::new(self.clone(), interpolate(&template, params)?))
    }

    pub fn root(&self) -> ModelPath {
        ModelPath::new(self.clone(), Vec::new())
    }

    pub fn get_path(&self, path: &[PathStep]) -> Option<Value> {
        milo_path::get(self.inner.data.borrow().as_ref(), path).cloned()
    }

    pub fn set_path(&self, path: &[PathStep], value: Value) -> Result<(), ModelError> {
        let changes = self.write(path, value)?;
        self.emit(changes, None);
        Ok(())
    }

    pub fn del_path(&self, path: &[PathStep]) -> Result<Option<Value>, ModelError> {
        let (removed, changes) = self.delete(path)?;
        self.emit(changes, None);
        Ok(removed)
    }

    /// Remove `remove_count` elements at `index` of the array at `path` and
    /// insert `items` there. Returns the removed elements.
    pub fn splice_path(
        &self,
        path: &[PathStep],
        index: usize,
        remove_count: usize,
        items: Vec<Value>,
    ) -> Result<Vec<Value>, ModelError> {
        let (removed, change) = self.splice(path, index, remove_count, items)?;
        self.emit(change.into_iter().collect(), None);
        Ok(removed)
    }

    /// Append `items`, returning the new length.
    pub fn push_path(&self, path: &[PathStep], items: Vec<Value>) -> Result<usize, ModelError> {
        let len = self.len_path(path).unwrap_or(0);
        self.splice_path(path, len, 0, items)?;
        Ok(self.len_path(path).unwrap_or(0))
    }

    pub fn pop_path(&self, path: &[PathStep]) -> Result<Option<Value>, ModelError> {
        match self.len_path(path) {
            Some(len) if len > 0 => Ok(self.splice_path(path, len - 1, 1, Vec::new())?.pop()),
            _ => Ok(None),
        }
    }

    /// Prepend `items`, returning the new length.
    pub fn unshift_path(&self, path: &[PathStep], items: Vec<Value>) -> Result<usize, ModelError> {
        self.splice_path(path, 0, 0, items)?;
        Ok(self.len_path(path).unwrap_or(0))
    }

    pub fn shift_path(&self, path: &[PathStep]) -> Result<Option<Value>, ModelError> {
        match self.len_path(path) {
            Some(len) if len > 0 => Ok(self.splice_path(path, 0, 1, Vec::new())?.into_iter().next()),
            _ => Ok(None),
        }
    }

    /// Length of the array at `path`.
    pub fn len_path(&self, path: &[PathStep]) -> Option<usize> {
        milo_path::get(self.inner.data.borrow().as_ref(), path)
            .and_then(Value::as_array)
            .map(Vec::len)
    }

    /// Run `f` with every batch it emits tagged with one transaction id.
    /// Nested calls join the outer transaction.
    ///
    /// # Example
    ///
    /// ```
    /// use milo_model::Model;
    /// use serde_json::json;
    ///
    /// let model = Model::new();
    /// model.transaction(|| {
    ///     model.set_at(".first", json!("Milo")).unwrap();
    ///     model.set_at(".last", json!("Bond")).unwrap();
    /// });
    /// assert_eq!(model.get(), Some(json!({"first": "Milo", "last": "Bond"})));
    /// ```
    pub fn transaction<R>(&self, f: impl FnOnce() -> R) -> R {
        if self.inner.transaction.get().is_some() {
            return f();
        }
        self.inner.transaction.set(Some(TransactionId::next()));
        let out = f();
        self.inner.transaction.set(None);
        out
    }

    pub fn current_transaction(&self) -> Option<TransactionId> {
        self.inner.transaction.get()
    }

    /// Apply `changes` and emit them as one batch tagged `transaction`.
    ///
    /// Every change is attempted; the first failure is returned.
    pub fn apply_changes(&self, changes: &[Change], transaction: Option<TransactionId>) -> Result<(), ModelError> {
        let mut emitted = Vec::new();
        let mut first_error = None;
        for change in changes {
            match self.apply_change(change) {
                Ok(mut applied) => emitted.append(&mut applied),
                Err(e) => {
                    debug!(path = %format_access_path(&change.path), error = %e, "change not applied");
                    first_error.get_or_insert(e);
                }
            }
        }
        self.emit(emitted, transaction);
        first_error.map_or(Ok(()), Err)
    }

    fn apply_change(&self, change: &Change) -> Result<Vec<Change>, ModelError> {
        match (&change.kind, &change.new_value) {
            (ChangeKind::Splice { index, removed, .. }, _) => {
                let items = change
                    .spliced_items()
                    .ok_or_else(|| ModelError::MalformedSplice(format_access_path(&change.path)))?;
                let (_, applied) = self.splice(&change.path, *index, removed.len(), items.to_vec())?;
                Ok(applied.into_iter().collect())
            }
            (ChangeKind::Deleted, _) | (_, None) => Ok(self.delete(&change.path)?.1),
            (_, Some(value)) => self.write(&change.path, value.clone()),
        }
    }

    fn ensure_alive(&self) -> Result<(), ModelError> {
        if self.inner.destroyed.get() {
            return Err(ModelError::Destroyed);
        }
        Ok(())
    }

    fn write(&self, path: &[PathStep], value: Value) -> Result<Vec<Change>, ModelError> {
        self.ensure_alive()?;
        let mut data = self.inner.data.borrow_mut();
        let old = milo_path::get(data.as_ref(), path).cloned();
        if old.as_ref() == Some(&value) {
            return Ok(Vec::new());
        }
        milo_path::set(&mut data, path, value)?;
        Ok(compute_changes(path, old.as_ref(), milo_path::get(data.as_ref(), path)))
    }

    fn delete(&self, path: &[PathStep]) -> Result<(Option<Value>, Vec<Change>), ModelError> {
        self.ensure_alive()?;
        let removed = milo_path::remove(&mut self.inner.data.borrow_mut(), path)?;
        let changes = removed
            .iter()
            .map(|old| Change::deleted(path.to_vec(), old.clone()))
            .collect();
        Ok((removed, changes))
    }

    fn splice(
        &self,
        path: &[PathStep],
        index: usize,
        remove_count: usize,
        items: Vec<Value>,
    ) -> Result<(Vec<Value>, Option<Change>), ModelError> {
        self.ensure_alive()?;
        let mut data = self.inner.data.borrow_mut();
        let old = milo_path::get(data.as_ref(), path).cloned();
        let added_count = items.len();
        let (start, removed) = milo_path::splice(&mut data, path, index, remove_count, items)?;
        let new = milo_path::get(data.as_ref(), path).cloned();
        let change = match old {
            None => new.map(|new| Change::added(path.to_vec(), new)),
            Some(_) if removed.is_empty() && added_count == 0 => None,
            Some(old) => Some(Change {
                path: path.to_vec(),
                kind: ChangeKind::Splice {
                    index: start,
                    removed: removed.clone(),
                    added_count,
                },
                old_value: Some(old),
                new_value: new,
            }),
        };
        Ok((removed, change))
    }

    fn emit(&self, changes: Vec<Change>, transaction: Option<TransactionId>) {
        if changes.is_empty() {
            return;
        }
        let transaction = transaction.or(self.inner.transaction.get());
        for change in &changes {
            let message = Messages::Names(vec![format_access_path(&change.path)]);
            self.inner.internal.dispatch_sync(message, change.clone(), None);
        }
        self.inner.external.dispatch(
            DATA_CHANGES,
            ModelMessage::DataChanges(ChangeBatch::new(changes, transaction)),
            None,
        );
    }
}

fn change_data_handler(model: Weak<ModelInner>) -> Subscriber<ModelMessage> {
    Subscriber::new(move |d: &Delivery<'_, ModelMessage>| {
        let Some(inner) = model.upgrade() else {
            return;
        };
        let ModelMessage::ChangeData(batch) = d.data else {
            return;
        };
        let result = Model { inner }.apply_changes(&batch.changes, batch.transaction);
        d.complete(result.map(|()| true).map_err(|e| DeliveryError(e.to_string())));
    })
}

impl DataSource for Model {
    fn get(&self) -> Option<Value> {
        Model::get(self)
    }

    fn set(&self, value: Value) -> Result<(), ModelError> {
        Model::set(self, value)
    }

    fn messenger(&self) -> &Messenger<ModelMessage> {
        Model::messenger(self)
    }

    fn subpath(&self, access: &str) -> Result<Rc<dyn DataSource>, ModelError> {
        Ok(Rc::new(self.path(access)?))
    }
}

/// Paths of `changes` relative to `prefix`; changes above `prefix` are
/// projected onto it, changes elsewhere are dropped.
pub(crate) fn project_changes(prefix: &[PathStep], changes: &[Change]) -> Vec<Change> {
    let mut out = Vec::new();
    for change in changes {
        if change.path.starts_with(prefix) {
            out.push(Change {
                path: change.path[prefix.len()..].to_vec(),
                ..change.clone()
            });
        } else if milo_path::is_child(&change.path, prefix) {
            let rest = &prefix[change.path.len()..];
            out.extend(compute_changes(
                &[],
                milo_path::get(change.old_value.as_ref(), rest),
                milo_path::get(change.new_value.as_ref(), rest),
            ));
        }
    }
    out
}

/// Prepend `prefix` to every change path.
pub(crate) fn prefix_changes(prefix: &[PathStep], changes: &[Change]) -> Vec<Change> {
    changes
        .iter()
        .map(|change| {
            let mut path: Path = prefix.to_vec();
            path.extend_from_slice(&change.path);
            Change { path, ..change.clone() }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use milo_messenger::{Completion, TickScheduler};
    use serde_json::json;

    type Seen = Rc<RefCell<Vec<ModelMessage>>>;

    fn p(s: &str) -> Path {
        parse_access_path(s).unwrap()
    }

    fn setup() -> (Model, Rc<TickScheduler>) {
        let ticks = Rc::new(TickScheduler::new());
        (Model::with_scheduler(ticks.clone()), ticks)
    }

    fn watch_sync(model: &Model, message: &str) -> Seen {
        let seen = Seen::default();
        let sink = seen.clone();
        model.messenger().subscribe_sync(
            message,
            Subscriber::new(move |d: &Delivery<'_, ModelMessage>| sink.borrow_mut().push(d.data.clone())),
        );
        seen
    }

    fn batches(seen: &Seen) -> Vec<ChangeBatch> {
        seen.borrow().iter().filter_map(|m| m.batch().cloned()).collect()
    }

    #[test]
    fn test_set_materializes_and_emits_one_batch() {
        let (model, _) = setup();
        let seen = watch_sync(&model, DATA_CHANGES);
        model.set_at(".info.name", json!("milo")).unwrap();
        assert_eq!(model.get(), Some(json!({"info": {"name": "milo"}})));
        assert_eq!(
            batches(&seen),
            vec![ChangeBatch::new(vec![Change::added(p(".info.name"), json!("milo"))], None)]
        );
    }

    #[test]
    fn test_equal_set_emits_nothing() {
        let (model, _) = setup();
        model.set(json!({"a": 1})).unwrap();
        let seen = watch_sync(&model, DATA_CHANGES);
        model.set_at(".a", json!(1)).unwrap();
        model.set(json!({"a": 1})).unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_datachanges_is_deferred_by_default() {
        let (model, ticks) = setup();
        let seen = Seen::default();
        let sink = seen.clone();
        model.messenger().subscribe(
            DATA_CHANGES,
            Subscriber::new(move |d: &Delivery<'_, ModelMessage>| sink.borrow_mut().push(d.data.clone())),
        );
        model.set_at(".a", json!(1)).unwrap();
        assert!(seen.borrow().is_empty());
        ticks.run_tick();
        assert_eq!(seen.borrow().len(), 1);
    }

    #[test]
    fn test_delete() {
        let (model, _) = setup();
        model.set(json!({"a": {"b": 1}, "c": 2})).unwrap();
        let seen = watch_sync(&model, DATA_CHANGES);
        assert_eq!(model.del_at(".a.b").unwrap(), Some(json!(1)));
        assert_eq!(model.del_at(".nothing").unwrap(), None);
        assert_eq!(model.get(), Some(json!({"a": {}, "c": 2})));
        assert_eq!(
            batches(&seen),
            vec![ChangeBatch::new(vec![Change::deleted(p(".a.b"), json!(1))], None)]
        );
    }

    #[test]
    fn test_array_operations() {
        let (model, _) = setup();
        let list = p(".list");
        assert_eq!(model.push_path(&list, vec![json!(1), json!(2)]).unwrap(), 2);
        assert_eq!(model.unshift_path(&list, vec![json!(0)]).unwrap(), 3);
        assert_eq!(model.pop_path(&list).unwrap(), Some(json!(2)));
        assert_eq!(model.shift_path(&list).unwrap(), Some(json!(0)));
        assert_eq!(model.get_path(&list), Some(json!([1])));
        assert_eq!(model.len_path(&list), Some(1));
        assert_eq!(model.pop_path(&p(".missing")).unwrap(), None);
        assert_eq!(model.get_at(".missing").unwrap(), None);
    }

    #[test]
    fn test_splice_emits_splice_change() {
        let (model, _) = setup();
        model.set_at(".l", json!([1, 2, 3])).unwrap();
        let seen = watch_sync(&model, DATA_CHANGES);
        let removed = model.splice_path(&p(".l"), 1, 1, vec![json!("a"), json!("b")]).unwrap();
        assert_eq!(removed, vec![json!(2)]);
        let batch = &batches(&seen)[0];
        assert_eq!(
            batch.changes,
            vec![Change {
                path: p(".l"),
                kind: ChangeKind::Splice {
                    index: 1,
                    removed: vec![json!(2)],
                    added_count: 2,
                },
                old_value: Some(json!([1, 2, 3])),
                new_value: Some(json!([1, "a", "b", 3])),
            }]
        );
    }

    #[test]
    fn test_path_subscriptions() {
        let (model, _) = setup();
        let exact = watch_sync(&model, ".info.name");
        let pattern = watch_sync(&model, ".info.*");
        let everything = watch_sync(&model, "***");

        model.set_at(".info.name", json!("a")).unwrap();
        model.set_at(".info.age", json!(3)).unwrap();
        model.set_at(".other", json!(true)).unwrap();

        let paths = |seen: &Seen| -> Vec<String> {
            seen.borrow()
                .iter()
                .filter_map(|m| m.change().map(|c| format_access_path(&c.path)))
                .collect()
        };
        assert_eq!(paths(&exact), vec![".info.name"]);
        assert_eq!(paths(&pattern), vec![".info.name", ".info.age"]);
        assert_eq!(paths(&everything), vec![".info.name", ".info.age", ".other"]);
    }

    #[test]
    fn test_path_subscription_on_key_with_space() {
        let (model, _) = setup();
        let path = vec![PathStep::Key("first name".into())];
        let message = format_access_path(&path);
        let seen = watch_sync(&model, &message);

        model.set_path(&path, json!("Ann")).unwrap();
        model.set_at(r#"["first name"]"#, json!("Bo")).unwrap();

        let changed: Vec<Value> = seen
            .borrow()
            .iter()
            .filter_map(|m| m.change().and_then(|c| c.new_value.clone()))
            .collect();
        assert_eq!(changed, vec![json!("Ann"), json!("Bo")]);
    }

    #[test]
    fn test_path_subscription_can_be_removed() {
        let (model, _) = setup();
        let seen = Seen::default();
        let sink = seen.clone();
        let subscriber =
            Subscriber::new(move |d: &Delivery<'_, ModelMessage>| sink.borrow_mut().push(d.data.clone()));
        model.messenger().subscribe_sync(".a", subscriber.clone());
        model.messenger().unsubscribe(".a", Some(&subscriber));
        model.set_at(".a", json!(1)).unwrap();
        assert!(seen.borrow().is_empty());
    }

    #[test]
    fn test_transaction_tags_batches() {
        let (model, _) = setup();
        let seen = watch_sync(&model, DATA_CHANGES);
        model.transaction(|| {
            model.set_at(".a", json!(1)).unwrap();
            model.transaction(|| model.set_at(".b", json!(2)).unwrap());
        });
        model.set_at(".c", json!(3)).unwrap();
        let batches = batches(&seen);
        assert_eq!(batches.len(), 3);
        assert!(batches[0].transaction.is_some());
        assert_eq!(batches[0].transaction, batches[1].transaction);
        assert_eq!(batches[2].transaction, None);
    }

    #[test]
    fn test_changedata_applies_and_completes() {
        let (model, _) = setup();
        model.set(json!({"l": [1, 2], "gone": 0})).unwrap();
        let seen = watch_sync(&model, DATA_CHANGES);
        let results = Rc::new(RefCell::new(Vec::new()));
        let sink = results.clone();
        let tx = TransactionId::next();
        let batch = ChangeBatch::new(
            vec![
                Change::added(p(".name"), json!("x")),
                Change::deleted(p(".gone"), json!(0)),
                Change {
                    path: p(".l"),
                    kind: ChangeKind::Splice {
                        index: 0,
                        removed: vec![json!(1)],
                        added_count: 1,
                    },
                    old_value: Some(json!([1, 2])),
                    new_value: Some(json!([9, 2])),
                },
            ],
            Some(tx),
        );
        model.post_message_sync(
            CHANGE_DATA,
            ModelMessage::ChangeData(batch),
            Some(Completion::new(move |r| sink.borrow_mut().push(r))),
        );
        assert_eq!(*results.borrow(), vec![Ok(true)]);
        assert_eq!(model.get(), Some(json!({"l": [9, 2], "name": "x"})));
        let batches = batches(&seen);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].transaction, Some(tx));
        assert_eq!(batches[0].changes.len(), 3);
    }

    #[test]
    fn test_changedata_reports_first_error() {
        let (model, _) = setup();
        model.set(json!({"s": "text"})).unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));
        let sink = results.clone();
        let batch = ChangeBatch::new(
            vec![
                Change::added(p(".s.inner"), json!(1)),
                Change::added(p(".ok"), json!(true)),
            ],
            None,
        );
        model.post_message_sync(
            CHANGE_DATA,
            ModelMessage::ChangeData(batch),
            Some(Completion::new(move |r| sink.borrow_mut().push(r))),
        );
        assert_eq!(results.borrow().len(), 1);
        assert!(results.borrow()[0].is_err());
        assert_eq!(model.get_at(".ok").unwrap(), Some(json!(true)));
    }

    #[test]
    fn test_destroy() {
        let (model, _) = setup();
        let seen = watch_sync(&model, DATA_CHANGES);
        model.set_at(".a", json!(1)).unwrap();
        model.destroy();
        assert!(model.is_destroyed());
        assert_eq!(model.get(), None);
        assert_eq!(model.set_at(".a", json!(2)), Err(ModelError::Destroyed));
        assert_eq!(seen.borrow().len(), 1);
        assert!(model.messenger().list_subscribers(DATA_CHANGES, true).is_none());
    }

    #[test]
    fn test_project_changes() {
        let changes = vec![
            Change::changed(p(".info.name"), json!("a"), json!("b")),
            Change::changed(p(".info"), json!({"age": 1}), json!({"age": 2})),
            Change::added(p(".other"), json!(1)),
        ];
        assert_eq!(
            project_changes(&p(".info"), &changes),
            vec![
                Change::changed(p(".name"), json!("a"), json!("b")),
                Change::changed(p(""), json!({"age": 1}), json!({"age": 2})),
            ]
        );
        assert_eq!(
            project_changes(&p(".info.age"), &changes),
            vec![Change::changed(p(""), json!(1), json!(2))]
        );
    }
}
