use milo_messenger::{Completion, Delivery, DeliveryError, Messages, Messenger, Scheduler, Subscriber};
use milo_model::{Change, ChangeBatch, DataSource, ModelMessage, Validation, CHANGE_DATA, DATA_CHANGES, VALIDATED};
use milo_path::{format_access_path, PathPattern};
use std::cell::RefCell;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

use crate::event::ConnectorEvent;
use crate::mode::{Direction, Endpoint, Mode};
use crate::options::{ConnectorConfig, ConnectorOptions, Tables, ValidationResult};
use crate::ConnectorError;

static NEXT_CONNECTOR: AtomicU64 = AtomicU64::new(1);

struct State {
    /// `None` once destroyed.
    endpoints: Option<[Rc<dyn DataSource>; 2]>,
    mode: Mode,
    is_on: bool,
    /// Active `"datachanges"` subscription per direction, held on the
    /// direction's source endpoint.
    links: [Option<Subscriber<ModelMessage>>; 2],
    /// Depth filter per direction, derived when turning on.
    scopes: [Option<PathPattern>; 2],
    queues: [Vec<ChangeBatch>; 2],
}

struct ConnectorInner {
    id: u64,
    state: RefCell<State>,
    tables: Tables,
    messenger: Messenger<ConnectorEvent>,
    scheduler: Rc<dyn Scheduler>,
}

impl Drop for ConnectorInner {
    fn drop(&mut self) {
        let state = self.state.get_mut();
        let Some(endpoints) = state.endpoints.take() else {
            return;
        };
        for direction in Direction::ALL {
            if let Some(link) = state.links[direction.index()].take() {
                endpoints[direction.source().index()].off(Messages::from(DATA_CHANGES), Some(&link));
            }
        }
    }
}

/// Keeps two data sources in sync.
///
/// The connector is on as soon as it is built. Changes are queued per
/// direction while they arrive and written on the next tick of the
/// endpoints' scheduler.
#[derive(Clone)]
pub struct Connector {
    inner: Rc<ConnectorInner>,
}

impl Connector {
    pub fn new(
        ds1: Rc<dyn DataSource>,
        ds2: Rc<dyn DataSource>,
        mode: &str,
        options: ConnectorOptions,
    ) -> Result<Self, ConnectorError> {
        let mode = Mode::parse(mode)?;
        let tables = options.into_tables()?;
        let scheduler = ds1.messenger().scheduler().clone();
        let connector = Self {
            inner: Rc::new(ConnectorInner {
                id: NEXT_CONNECTOR.fetch_add(1, Ordering::Relaxed),
                state: RefCell::new(State {
                    endpoints: Some([ds1, ds2]),
                    mode,
                    is_on: false,
                    links: [None, None],
                    scopes: [None, None],
                    queues: [Vec::new(), Vec::new()],
                }),
                tables,
                messenger: Messenger::new(scheduler.clone()),
                scheduler,
            }),
        };
        connector.turn_on()?;
        Ok(connector)
    }

    /// Build from a deserialized config. Translators and validators are
    /// code-only and need [`Connector::new`].
    pub fn from_config(
        ds1: Rc<dyn DataSource>,
        ds2: Rc<dyn DataSource>,
        config: &ConnectorConfig,
    ) -> Result<Self, ConnectorError> {
        Self::new(ds1, ds2, &config.mode, config.options()?)
    }

    pub fn messenger(&self) -> &Messenger<ConnectorEvent> {
        &self.inner.messenger
    }

    pub fn on(&self, messages: impl Into<Messages>, subscriber: Subscriber<ConnectorEvent>) -> bool {
        self.inner.messenger.subscribe(messages, subscriber)
    }

    pub fn off(&self, messages: impl Into<Messages>, subscriber: Option<&Subscriber<ConnectorEvent>>) -> bool {
        self.inner.messenger.unsubscribe(messages, subscriber)
    }

    pub fn is_on(&self) -> bool {
        self.inner.state.borrow().is_on
    }

    pub fn is_destroyed(&self) -> bool {
        self.inner.state.borrow().endpoints.is_none()
    }

    pub fn mode(&self) -> Mode {
        self.inner.state.borrow().mode
    }

    pub fn endpoint(&self, endpoint: Endpoint) -> Option<Rc<dyn DataSource>> {
        self.inner
            .state
            .borrow()
            .endpoints
            .as_ref()
            .map(|endpoints| endpoints[endpoint.index()].clone())
    }

    /// Subscribe to the source endpoint of every enabled direction.
    pub fn turn_on(&self) -> Result<(), ConnectorError> {
        let (endpoints, mode) = {
            let state = self.inner.state.borrow();
            let endpoints = state.endpoints.clone().ok_or(ConnectorError::Destroyed)?;
            if state.is_on {
                warn!(connector = self.inner.id, "connector is already on");
                return Ok(());
            }
            (endpoints, state.mode)
        };
        let mut links: [Option<Subscriber<ModelMessage>>; 2] = [None, None];
        for direction in Direction::ALL.into_iter().filter(|d| mode.is_enabled(*d)) {
            let link = self.link(direction);
            endpoints[direction.source().index()]
                .messenger()
                .subscribe_sync(DATA_CHANGES, link.clone());
            links[direction.index()] = Some(link);
        }
        {
            let mut state = self.inner.state.borrow_mut();
            state.scopes = Direction::ALL.map(|d| mode.is_enabled(d).then(|| PathPattern::with_depth(mode.depth(d))));
            state.links = links;
            state.is_on = true;
        }
        debug!(connector = self.inner.id, mode = %mode, "connector turned on");
        self.emit(ConnectorEvent::TurnedOn);
        Ok(())
    }

    /// Drop both subscriptions. Flushes that are already scheduled still run.
    pub fn turn_off(&self) -> Result<(), ConnectorError> {
        let (endpoints, links) = {
            let mut state = self.inner.state.borrow_mut();
            let endpoints = state.endpoints.clone().ok_or(ConnectorError::Destroyed)?;
            if !state.is_on {
                warn!(connector = self.inner.id, "connector is already off");
                return Ok(());
            }
            state.is_on = false;
            state.scopes = [None, None];
            (endpoints, std::mem::take(&mut state.links))
        };
        for direction in Direction::ALL {
            if let Some(link) = &links[direction.index()] {
                endpoints[direction.source().index()].off(Messages::from(DATA_CHANGES), Some(link));
            }
        }
        debug!(connector = self.inner.id, "connector turned off");
        self.emit(ConnectorEvent::TurnedOff);
        Ok(())
    }

    /// Reconfigure to `mode` and turn on. An invalid mode leaves the
    /// connector as it was.
    pub fn change_mode(&self, mode: &str) -> Result<(), ConnectorError> {
        let mode = Mode::parse(mode)?;
        self.apply_mode(mode)
    }

    /// Validate `mode` now and switch to it on the next tick, so writes made
    /// before then follow the current mode.
    pub fn defer_change_mode(&self, mode: &str) -> Result<(), ConnectorError> {
        if self.is_destroyed() {
            return Err(ConnectorError::Destroyed);
        }
        let mode = Mode::parse(mode)?;
        let connector = Rc::downgrade(&self.inner);
        self.inner.scheduler.defer(Box::new(move || {
            let Some(inner) = connector.upgrade() else {
                return;
            };
            let id = inner.id;
            if let Err(e) = (Connector { inner }).apply_mode(mode) {
                warn!(connector = id, error = %e, "deferred mode change failed");
            }
        }));
        Ok(())
    }

    /// Turn off, emit `"destroyed"` and release both endpoints.
    pub fn destroy(&self) -> Result<(), ConnectorError> {
        if self.is_destroyed() {
            return Err(ConnectorError::Destroyed);
        }
        if self.is_on() {
            self.turn_off()?;
        }
        {
            let mut state = self.inner.state.borrow_mut();
            state.endpoints = None;
            state.queues = [Vec::new(), Vec::new()];
        }
        debug!(connector = self.inner.id, "connector destroyed");
        self.emit(ConnectorEvent::Destroyed);
        Ok(())
    }

    fn apply_mode(&self, mode: Mode) -> Result<(), ConnectorError> {
        if self.is_destroyed() {
            return Err(ConnectorError::Destroyed);
        }
        if self.is_on() {
            self.turn_off()?;
        }
        self.inner.state.borrow_mut().mode = mode;
        self.turn_on()
    }

    fn emit(&self, event: ConnectorEvent) {
        self.inner.messenger.dispatch(event.message(), event, None);
    }

    fn link(&self, direction: Direction) -> Subscriber<ModelMessage> {
        let connector: Weak<ConnectorInner> = Rc::downgrade(&self.inner);
        Subscriber::new(move |d: &Delivery<'_, ModelMessage>| {
            let (Some(inner), ModelMessage::DataChanges(batch)) = (connector.upgrade(), d.data) else {
                return;
            };
            Connector { inner }.on_data_changes(direction, batch);
        })
    }

    fn on_data_changes(&self, direction: Direction, batch: &ChangeBatch) {
        let (source, scope) = {
            let state = self.inner.state.borrow();
            let Some(endpoints) = &state.endpoints else {
                return;
            };
            (
                endpoints[direction.source().index()].clone(),
                state.scopes[direction.index()].clone(),
            )
        };
        let changes: Vec<Change> = batch
            .changes
            .iter()
            .filter_map(|change| self.translate(direction, scope.as_ref(), change))
            .collect();
        if !changes.is_empty() {
            let schedule = {
                let mut state = self.inner.state.borrow_mut();
                let queue = &mut state.queues[direction.index()];
                queue.push(ChangeBatch::new(changes, batch.transaction));
                queue.len() == 1
            };
            if schedule {
                self.schedule_flush(direction);
            }
        }
        for change in &batch.changes {
            self.validate(direction, &source, change);
        }
    }

    /// The change as it should reach the target, or `None` when it is out of
    /// this link's scope.
    fn translate(&self, direction: Direction, scope: Option<&PathPattern>, change: &Change) -> Option<Change> {
        let path = match &self.inner.tables.path_translation[direction.index()] {
            Some(table) => table.translate(&change.path)?,
            None if scope.is_some_and(|scope| scope.matches(&change.path)) => change.path.clone(),
            None => return None,
        };
        let mut change = change.clone();
        if let Some(translator) = self.inner.tables.data_translation[direction.index()].get(&change.path) {
            change.old_value = translator(change.old_value.as_ref());
            change.new_value = translator(change.new_value.as_ref());
        }
        change.path = path;
        Some(change)
    }

    fn validate(&self, direction: Direction, source: &Rc<dyn DataSource>, change: &Change) {
        let Some(validators) = self.inner.tables.data_validation[direction.index()].get(&change.path) else {
            return;
        };
        if validators.is_empty() {
            return;
        }
        // remaining successes before the single success report; `None` once reported
        let pending = Rc::new(RefCell::new(Some(validators.len())));
        for validator in validators {
            let pending = pending.clone();
            let source = source.clone();
            let path = change.path.clone();
            validator(
                change.new_value.as_ref(),
                Box::new(move |result: ValidationResult| {
                    let report = {
                        let mut pending = pending.borrow_mut();
                        let (next, report) = match *pending {
                            None => (None, false),
                            Some(_) if !result.valid => (None, true),
                            Some(n) if n <= 1 => (None, true),
                            Some(n) => (Some(n - 1), false),
                        };
                        *pending = next;
                        report
                    };
                    if report {
                        let validation = Validation {
                            path,
                            valid: result.valid,
                            details: result.details,
                        };
                        source.post_message(VALIDATED, ModelMessage::Validated(validation), None);
                    }
                }),
            );
        }
    }

    fn schedule_flush(&self, direction: Direction) {
        let connector = Rc::downgrade(&self.inner);
        self.inner.scheduler.defer(Box::new(move || {
            if let Some(inner) = connector.upgrade() {
                Connector { inner }.flush(direction);
            }
        }));
    }

    fn flush(&self, direction: Direction) {
        let (target, batches) = {
            let mut state = self.inner.state.borrow_mut();
            let batches = std::mem::take(&mut state.queues[direction.index()]);
            let Some(endpoints) = &state.endpoints else {
                return;
            };
            (endpoints[direction.target().index()].clone(), batches)
        };
        let transactions = merge_transactions(batches);
        debug!(
            connector = self.inner.id,
            direction = %direction,
            transactions = transactions.len(),
            "flushing queued changes"
        );
        for batch in transactions {
            self.write(direction, &target, batch);
        }
    }

    /// One synchronous `"changedata"` write with the reverse link detached.
    fn write(&self, direction: Direction, target: &Rc<dyn DataSource>, batch: ChangeBatch) {
        let (source_endpoint, target_endpoint) = (direction.source(), direction.target());
        let reverse = self.inner.state.borrow().links[direction.reverse().index()].clone();
        if let Some(link) = &reverse {
            target.off(Messages::from(DATA_CHANGES), Some(link));
        }
        self.emit(ConnectorEvent::ChangeStarted {
            source: source_endpoint,
            target: target_endpoint,
        });

        let outcome: Rc<RefCell<Option<Result<bool, DeliveryError>>>> = Rc::default();
        let sink = outcome.clone();
        let first_path = batch.changes.first().map(|c| format_access_path(&c.path));
        target.post_message_sync(
            CHANGE_DATA,
            ModelMessage::ChangeData(batch),
            Some(Completion::new(move |result| {
                sink.borrow_mut().get_or_insert(result);
            })),
        );
        let outcome = outcome.borrow_mut().take();

        match outcome {
            Some(Ok(true)) => {
                if let Some(link) = reverse {
                    let current = self.inner.state.borrow().links[direction.reverse().index()]
                        .as_ref()
                        .is_some_and(|active| active.same_as(&link));
                    if current {
                        target.messenger().subscribe_sync(DATA_CHANGES, link);
                    }
                }
                self.emit(ConnectorEvent::ChangeCompleted {
                    source: source_endpoint,
                    target: target_endpoint,
                });
            }
            other => {
                let error = match other {
                    Some(Err(e)) => e,
                    _ => DeliveryError::from("change was not acknowledged by the target"),
                };
                if let Some(link) = &reverse {
                    let mut state = self.inner.state.borrow_mut();
                    let slot = &mut state.links[direction.reverse().index()];
                    if slot.as_ref().is_some_and(|active| active.same_as(link)) {
                        // never resubscribed by later writes
                        *slot = None;
                    }
                }
                warn!(
                    connector = self.inner.id,
                    source = %source_endpoint,
                    target = %target_endpoint,
                    path = first_path.as_deref().unwrap_or(""),
                    error = %error,
                    "change failed, leaving the reverse link detached"
                );
                self.emit(ConnectorEvent::ChangeFailed {
                    source: source_endpoint,
                    target: target_endpoint,
                    error,
                });
            }
        }
    }
}

/// Group queued batches into the transactions written to the target.
///
/// Consecutive batches with the same transaction id are concatenated; a
/// batch without an id stands alone and ends the running transaction. Empty
/// batches are skipped.
///
/// # Example
///
/// ```
/// use milo_connector::merge_transactions;
/// use milo_model::{Change, ChangeBatch, TransactionId};
/// use milo_path::parse_access_path;
/// use serde_json::json;
///
/// let tx = Some(TransactionId::next());
/// let change = |s: &str| Change::added(parse_access_path(s).unwrap(), json!(1));
/// let merged = merge_transactions(vec![
///     ChangeBatch::new(vec![change(".a")], tx),
///     ChangeBatch::new(vec![change(".b")], tx),
///     ChangeBatch::new(vec![change(".c")], None),
/// ]);
/// assert_eq!(merged.len(), 2);
/// assert_eq!(merged[0].changes.len(), 2);
/// ```
pub fn merge_transactions(batches: Vec<ChangeBatch>) -> Vec<ChangeBatch> {
    let mut out: Vec<ChangeBatch> = Vec::new();
    for batch in batches {
        if batch.is_empty() {
            continue;
        }
        match (batch.transaction, out.last_mut()) {
            (Some(id), Some(last)) if last.transaction == Some(id) => last.changes.extend(batch.changes),
            _ => out.push(batch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use milo_model::TransactionId;
    use milo_path::parse_access_path;
    use serde_json::json;

    fn change(s: &str) -> Change {
        Change::added(parse_access_path(s).unwrap(), json!(s))
    }

    #[test]
    fn test_merge_keeps_order_and_splits_on_untagged() {
        let t1 = Some(TransactionId::next());
        let t2 = Some(TransactionId::next());
        let merged = merge_transactions(vec![
            ChangeBatch::new(vec![change(".a")], t1),
            ChangeBatch::new(vec![], t1),
            ChangeBatch::new(vec![change(".b"), change(".c")], t1),
            ChangeBatch::new(vec![change(".d")], None),
            ChangeBatch::new(vec![change(".e")], t1),
            ChangeBatch::new(vec![change(".f")], t2),
            ChangeBatch::new(vec![change(".g")], None),
            ChangeBatch::new(vec![change(".h")], None),
        ]);
        let shape: Vec<(Option<TransactionId>, usize)> =
            merged.iter().map(|b| (b.transaction, b.changes.len())).collect();
        assert_eq!(
            shape,
            vec![(t1, 3), (None, 1), (t1, 1), (t2, 1), (None, 1), (None, 1)]
        );
        assert_eq!(merged[0].changes[2], change(".c"));
    }

    #[test]
    fn test_merge_empty() {
        assert!(merge_transactions(vec![ChangeBatch::default()]).is_empty());
    }
}
