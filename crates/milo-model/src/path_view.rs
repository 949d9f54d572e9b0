use milo_messenger::{Delivery, DeliveryError, Messenger, Subscriber};
use milo_path::{format_access_path, interpolate, parse_access_path, Path, PathStep};
use serde_json::Value;
use std::fmt;
use std::rc::Rc;

use crate::bridge::SubtreeBridge;
use crate::data_source::DataSource;
use crate::message::{ModelMessage, CHANGE_DATA};
use crate::model::{prefix_changes, Model};
use crate::ModelError;

/// A view of a model's subtree.
///
/// The view owns no data: reads and writes go to the model at the view's
/// path. Its messenger carries the model's `"datachanges"` restricted to the
/// subtree, with paths relative to it, and path messages relative to it.
///
/// # Example
///
/// ```
/// use milo_model::Model;
/// use serde_json::json;
///
/// let model = Model::new();
/// let info = model.path(".info").unwrap();
/// info.path(".name").unwrap().set(json!("milo")).unwrap();
/// assert_eq!(info.get(), Some(json!({"name": "milo"})));
/// assert_eq!(model.get(), Some(json!({"info": {"name": "milo"}})));
/// ```
#[derive(Clone)]
pub struct ModelPath {
    model: Model,
    path: Path,
    messenger: Messenger<ModelMessage>,
}

impl ModelPath {
    pub(crate) fn new(model: Model, path: Path) -> Self {
        let messenger = Messenger::new(model.messenger().scheduler().clone());
        messenger.subscribe_sync(CHANGE_DATA, change_data_handler(model.clone(), path.clone()));
        messenger.set_source(Rc::new(SubtreeBridge::new(
            model.messenger().clone(),
            path.clone(),
            messenger.downgrade(),
        )));
        Self { model, path, messenger }
    }

    pub fn model(&self) -> &Model {
        &self.model
    }

    pub fn access_path(&self) -> &[PathStep] {
        &self.path
    }

    pub fn messenger(&self) -> &Messenger<ModelMessage> {
        &self.messenger
    }

    /// View of `access` below this one.
    pub fn path(&self, access: &str) -> Result<ModelPath, ModelError> {
        let mut path = self.path.clone();
        path.extend(parse_access_path(access)?);
        Ok(ModelPath::new(self.model.clone(), path))
    }

    /// Same view with its `$n` parameters filled from `params`.
    pub fn with_params(&self, params: &[PathStep]) -> Result<ModelPath, ModelError> {
        Ok(ModelPath::new(self.model.clone(), interpolate(&self.path, params)?))
    }

    pub fn get(&self) -> Option<Value> {
        self.model.get_path(&self.path)
    }

    pub fn set(&self, value: Value) -> Result<(), ModelError> {
        self.model.set_path(&self.path, value)
    }

    pub fn del(&self) -> Result<Option<Value>, ModelError> {
        self.model.del_path(&self.path)
    }

    pub fn splice(&self, index: usize, remove_count: usize, items: Vec<Value>) -> Result<Vec<Value>, ModelError> {
        self.model.splice_path(&self.path, index, remove_count, items)
    }

    pub fn push(&self, items: Vec<Value>) -> Result<usize, ModelError> {
        self.model.push_path(&self.path, items)
    }

    pub fn pop(&self) -> Result<Option<Value>, ModelError> {
        self.model.pop_path(&self.path)
    }

    pub fn unshift(&self, items: Vec<Value>) -> Result<usize, ModelError> {
        self.model.unshift_path(&self.path, items)
    }

    pub fn shift(&self) -> Result<Option<Value>, ModelError> {
        self.model.shift_path(&self.path)
    }

    pub fn len(&self) -> Option<usize> {
        self.model.len_path(&self.path)
    }

    pub fn is_empty(&self) -> bool {
        self.len().map_or(true, |len| len == 0)
    }
}

impl fmt::Debug for ModelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ModelPath")
            .field(&format_access_path(&self.path))
            .finish()
    }
}

fn change_data_handler(model: Model, prefix: Path) -> Subscriber<ModelMessage> {
    Subscriber::new(move |d: &Delivery<'_, ModelMessage>| {
        let ModelMessage::ChangeData(batch) = d.data else {
            return;
        };
        let changes = prefix_changes(&prefix, &batch.changes);
        let result = model.apply_changes(&changes, batch.transaction);
        d.complete(result.map(|()| true).map_err(|e| DeliveryError(e.to_string())));
    })
}

impl DataSource for ModelPath {
    fn get(&self) -> Option<Value> {
        ModelPath::get(self)
    }

    fn set(&self, value: Value) -> Result<(), ModelError> {
        ModelPath::set(self, value)
    }

    fn messenger(&self) -> &Messenger<ModelMessage> {
        &self.messenger
    }

    fn subpath(&self, access: &str) -> Result<Rc<dyn DataSource>, ModelError> {
        Ok(Rc::new(self.path(access)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::{Change, ChangeBatch};
    use crate::message::DATA_CHANGES;
    use milo_messenger::{Completion, TickScheduler};
    use serde_json::json;
    use std::cell::RefCell;

    type Seen = Rc<RefCell<Vec<ModelMessage>>>;

    fn p(s: &str) -> Path {
        parse_access_path(s).unwrap()
    }

    fn setup() -> Model {
        Model::with_scheduler(Rc::new(TickScheduler::new()))
    }

    fn watch_sync(messenger: &Messenger<ModelMessage>, message: &str) -> Seen {
        let seen = Seen::default();
        let sink = seen.clone();
        messenger.subscribe_sync(
            message,
            Subscriber::new(move |d: &Delivery<'_, ModelMessage>| sink.borrow_mut().push(d.data.clone())),
        );
        seen
    }

    #[test]
    fn test_scoped_datachanges() {
        let model = setup();
        let info = model.path(".info").unwrap();
        let seen = watch_sync(info.messenger(), DATA_CHANGES);

        model.set_at(".info.name", json!("a")).unwrap();
        model.set_at(".other", json!(1)).unwrap();
        model.set_at(".info", json!({"name": "b"})).unwrap();

        let batches: Vec<ChangeBatch> = seen.borrow().iter().filter_map(|m| m.batch().cloned()).collect();
        assert_eq!(
            batches,
            vec![
                ChangeBatch::new(vec![Change::added(p(".name"), json!("a"))], None),
                ChangeBatch::new(vec![Change::changed(p(".name"), json!("a"), json!("b"))], None),
            ]
        );
    }

    #[test]
    fn test_ancestor_replacement_is_projected() {
        let model = setup();
        model.set(json!({"info": {"name": "a"}})).unwrap();
        let name = model.path(".info.name").unwrap();
        let seen = watch_sync(name.messenger(), DATA_CHANGES);
        model.set(json!({"info": 5})).unwrap();
        let batch = seen.borrow()[0].batch().cloned().unwrap();
        assert_eq!(batch.changes, vec![Change::deleted(p(""), json!("a"))]);
    }

    #[test]
    fn test_scoped_path_subscription() {
        let model = setup();
        let info = model.path(".info").unwrap();
        let seen = watch_sync(info.messenger(), ".name");
        model.set_at(".info.name", json!("a")).unwrap();
        model.set_at(".name", json!("root")).unwrap();
        let paths: Vec<Path> = seen.borrow().iter().filter_map(|m| m.change().map(|c| c.path.clone())).collect();
        assert_eq!(paths, vec![p(".name")]);
    }

    #[test]
    fn test_changedata_under_path() {
        let model = setup();
        let info = model.path(".info").unwrap();
        let results = Rc::new(RefCell::new(Vec::new()));
        let sink = results.clone();
        info.post_message_sync(
            CHANGE_DATA,
            ModelMessage::ChangeData(ChangeBatch::new(vec![Change::added(p(".name"), json!("x"))], None)),
            Some(Completion::new(move |r| sink.borrow_mut().push(r))),
        );
        assert_eq!(*results.borrow(), vec![Ok(true)]);
        assert_eq!(model.get(), Some(json!({"info": {"name": "x"}})));
    }

    #[test]
    fn test_params() {
        let model = setup();
        let item = model.path(".list[$1].title").unwrap();
        assert_eq!(item.set(json!("x")), Err(ModelError::Path(milo_path::PathError::UnresolvedParam(1))));
        item.with_params(&[PathStep::Index(0)]).unwrap().set(json!("x")).unwrap();
        model.path_with(".list[$1].title", &[PathStep::Index(1)]).unwrap().set(json!("y")).unwrap();
        assert_eq!(model.get(), Some(json!({"list": [{"title": "x"}, {"title": "y"}]})));
    }

    #[test]
    fn test_array_ops_on_view() {
        let model = setup();
        let list = model.path(".list").unwrap();
        assert!(list.is_empty());
        assert_eq!(list.push(vec![json!(1), json!(2), json!(3)]).unwrap(), 3);
        assert_eq!(list.splice(1, 1, vec![]).unwrap(), vec![json!(2)]);
        assert_eq!(list.shift().unwrap(), Some(json!(1)));
        assert_eq!(list.get(), Some(json!([3])));
        assert_eq!(list.len(), Some(1));
        assert_eq!(list.del().unwrap(), Some(json!([3])));
    }

    #[test]
    fn test_dropping_view_releases_model_subscriptions() {
        let model = setup();
        {
            let info = model.path(".info").unwrap();
            watch_sync(info.messenger(), DATA_CHANGES);
            assert!(model.messenger().has_subscribers(DATA_CHANGES));
        }
        assert!(!model.messenger().has_subscribers(DATA_CHANGES));
    }
}
