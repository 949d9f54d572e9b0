use std::cell::RefCell;
use std::rc::Rc;

use milo_messenger::{Completion, Delivery, Subscriber, TickScheduler};
use milo_model::{Change, ChangeBatch, DataSource, Model, ModelError, ModelMessage, CHANGE_DATA, DATA_CHANGES};
use milo_path::parse_access_path;
use serde_json::json;

fn sources() -> (Rc<TickScheduler>, Model, Rc<dyn DataSource>) {
    let ticks = Rc::new(TickScheduler::new());
    let model = Model::with_scheduler(ticks.clone());
    let source: Rc<dyn DataSource> = Rc::new(model.clone());
    (ticks, model, source)
}

#[test]
fn subpath_of_a_trait_object_reads_and_writes_the_model() {
    let (_, model, source) = sources();
    let user = source.subpath(".user").unwrap();
    let name = user.subpath(".name").unwrap();

    name.set(json!("milo")).unwrap();
    assert_eq!(model.get(), Some(json!({"user": {"name": "milo"}})));
    assert_eq!(user.get(), Some(json!({"name": "milo"})));
    assert!(source.subpath("user").is_err());
}

#[test]
fn on_and_off_through_the_trait() {
    let (ticks, model, source) = sources();
    let seen = Rc::new(RefCell::new(0));
    let sink = seen.clone();
    let subscriber = Subscriber::new(move |_: &Delivery<'_, ModelMessage>| *sink.borrow_mut() += 1);
    assert!(source.on(DATA_CHANGES.into(), subscriber.clone()));

    model.set_at(".a", json!(1)).unwrap();
    ticks.run_until_idle();
    assert_eq!(*seen.borrow(), 1);

    assert!(source.off(DATA_CHANGES.into(), Some(&subscriber)));
    model.set_at(".a", json!(2)).unwrap();
    ticks.run_until_idle();
    assert_eq!(*seen.borrow(), 1);
}

#[test]
fn destroyed_model_ignores_changedata() {
    let (_, model, source) = sources();
    let results = Rc::new(RefCell::new(Vec::new()));
    let sink = results.clone();
    let change = Change::added(parse_access_path(".a").unwrap(), json!(1));
    model.destroy();
    source.post_message_sync(
        CHANGE_DATA,
        ModelMessage::ChangeData(ChangeBatch::new(vec![change], None)),
        Some(Completion::new(move |r| sink.borrow_mut().push(r))),
    );
    // the destroyed messenger has no handler left
    assert!(results.borrow().is_empty());
    assert_eq!(model.set_at(".a", json!(1)), Err(ModelError::Destroyed));
}
