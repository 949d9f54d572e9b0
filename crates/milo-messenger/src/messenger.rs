use indexmap::IndexMap;
use std::cell::{Cell, RefCell};
use std::rc::{Rc, Weak};
use tracing::debug;

use crate::message::{MessagePattern, Messages};
use crate::scheduler::{default_scheduler, Scheduler};
use crate::source::MessageSource;
use crate::subscriber::{Completion, Delivery, Subscriber, SubscriberOptions};

struct Registration<D> {
    subscriber: Subscriber<D>,
    options: SubscriberOptions,
    remaining: Rc<Cell<Option<usize>>>,
}

impl<D> Clone for Registration<D> {
    fn clone(&self) -> Self {
        Self {
            subscriber: self.subscriber.clone(),
            options: self.options,
            remaining: self.remaining.clone(),
        }
    }
}

impl<D> Registration<D> {
    /// Account for one delivery. Returns false when the limit was already
    /// used up by an earlier dispatch.
    fn take(&self) -> bool {
        match self.remaining.get() {
            None => true,
            Some(0) => false,
            Some(n) => {
                self.remaining.set(Some(n - 1));
                true
            }
        }
    }

    fn is_exhausted(&self) -> bool {
        self.remaining.get() == Some(0)
    }
}

struct PatternEntry<D> {
    pattern: MessagePattern,
    subscribers: Vec<Registration<D>>,
}

struct Tables<D> {
    messages: IndexMap<String, Vec<Registration<D>>>,
    patterns: IndexMap<String, PatternEntry<D>>,
}

impl<D> Default for Tables<D> {
    fn default() -> Self {
        Self {
            messages: IndexMap::new(),
            patterns: IndexMap::new(),
        }
    }
}

struct Inner<D> {
    tables: RefCell<Tables<D>>,
    source: RefCell<Option<Rc<dyn MessageSource>>>,
    scheduler: Rc<dyn Scheduler>,
}

/// Publish/subscribe dispatcher.
///
/// `Messenger` is a cheap handle; clones share the same subscription tables.
/// Subscribers receive a [`Delivery`] borrowing the dispatched message and
/// data. The messenger never holds a borrow of its tables while it calls a
/// subscriber or its source, so both may subscribe, unsubscribe or dispatch
/// re-entrantly.
pub struct Messenger<D: 'static> {
    inner: Rc<Inner<D>>,
}

impl<D> Clone for Messenger<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: 'static> Default for Messenger<D> {
    fn default() -> Self {
        Self::new(default_scheduler())
    }
}

/// Non-owning handle to a [`Messenger`].
pub struct WeakMessenger<D: 'static> {
    inner: Weak<Inner<D>>,
}

impl<D> Clone for WeakMessenger<D> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<D: 'static> WeakMessenger<D> {
    pub fn upgrade(&self) -> Option<Messenger<D>> {
        self.inner.upgrade().map(|inner| Messenger { inner })
    }
}

impl<D: 'static> Messenger<D> {
    pub fn new(scheduler: Rc<dyn Scheduler>) -> Self {
        Self {
            inner: Rc::new(Inner {
                tables: RefCell::new(Tables::default()),
                source: RefCell::new(None),
                scheduler,
            }),
        }
    }

    pub fn scheduler(&self) -> &Rc<dyn Scheduler> {
        &self.inner.scheduler
    }

    pub fn downgrade(&self) -> WeakMessenger<D> {
        WeakMessenger {
            inner: Rc::downgrade(&self.inner),
        }
    }

    pub fn ptr_eq(&self, other: &Messenger<D>) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Attach a message source, returning the previous one.
    ///
    /// The new source is told about every message that already has
    /// subscribers.
    pub fn set_source(&self, source: Rc<dyn MessageSource>) -> Option<Rc<dyn MessageSource>> {
        let previous = self.inner.source.borrow_mut().replace(source.clone());
        let existing: Vec<String> = self.inner.tables.borrow().messages.keys().cloned().collect();
        for message in existing {
            source.on_subscriber_added(&message);
        }
        previous
    }

    pub fn source(&self) -> Option<Rc<dyn MessageSource>> {
        self.inner.source.borrow().clone()
    }

    /// Subscribe with delivery following the dispatch call.
    pub fn subscribe(&self, messages: impl Into<Messages>, subscriber: Subscriber<D>) -> bool {
        self.subscribe_with(messages, subscriber, SubscriberOptions::default())
    }

    pub fn subscribe_sync(&self, messages: impl Into<Messages>, subscriber: Subscriber<D>) -> bool {
        self.subscribe_with(messages, subscriber, SubscriberOptions::synchronous())
    }

    pub fn subscribe_once(&self, messages: impl Into<Messages>, subscriber: Subscriber<D>) -> bool {
        self.subscribe_with(messages, subscriber, SubscriberOptions::default().once())
    }

    pub fn subscribe_once_sync(&self, messages: impl Into<Messages>, subscriber: Subscriber<D>) -> bool {
        self.subscribe_with(messages, subscriber, SubscriberOptions::synchronous().once())
    }

    /// Register `subscriber` for `messages`. Returns true if at least one new
    /// registration was made; a subscriber already registered for a message
    /// is not added again.
    pub fn subscribe_with(
        &self,
        messages: impl Into<Messages>,
        subscriber: Subscriber<D>,
        options: SubscriberOptions,
    ) -> bool {
        match messages.into() {
            Messages::Names(names) => {
                let mut added = false;
                for name in names {
                    let (registered, first) = {
                        let mut tables = self.inner.tables.borrow_mut();
                        let list = tables.messages.entry(name.clone()).or_default();
                        let first = list.is_empty();
                        (register(list, &subscriber, options), first)
                    };
                    if registered {
                        added = true;
                        if first {
                            self.notify_added(&name);
                        }
                    }
                }
                added
            }
            Messages::Pattern(pattern) => {
                let mut tables = self.inner.tables.borrow_mut();
                let entry = tables
                    .patterns
                    .entry(pattern.key().to_string())
                    .or_insert_with(|| PatternEntry {
                        pattern,
                        subscribers: Vec::new(),
                    });
                register(&mut entry.subscribers, &subscriber, options)
            }
        }
    }

    /// Remove `subscriber` from `messages`, or every subscriber of `messages`
    /// when `None`. Returns true if anything was removed.
    pub fn unsubscribe(&self, messages: impl Into<Messages>, subscriber: Option<&Subscriber<D>>) -> bool {
        match messages.into() {
            Messages::Names(names) => {
                let mut removed = false;
                for name in names {
                    let (changed, emptied) = {
                        let mut tables = self.inner.tables.borrow_mut();
                        let Some(list) = tables.messages.get_mut(&name) else {
                            continue;
                        };
                        let changed = unregister(list, subscriber);
                        let emptied = list.is_empty();
                        if emptied {
                            tables.messages.shift_remove(&name);
                        }
                        (changed, emptied)
                    };
                    removed |= changed;
                    if changed && emptied {
                        self.notify_removed(&name);
                    }
                }
                removed
            }
            Messages::Pattern(pattern) => {
                let mut tables = self.inner.tables.borrow_mut();
                let key = pattern.key();
                let Some(entry) = tables.patterns.get_mut(key) else {
                    return false;
                };
                let changed = unregister(&mut entry.subscribers, subscriber);
                if entry.subscribers.is_empty() {
                    tables.patterns.shift_remove(key);
                }
                changed
            }
        }
    }

    /// Bulk subscribe. Keys are message names, so patterns cannot be
    /// registered this way.
    pub fn subscribe_many<'a, I>(&self, entries: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, Subscriber<D>)>,
    {
        entries
            .into_iter()
            .fold(false, |added, (messages, subscriber)| self.subscribe(messages, subscriber) | added)
    }

    pub fn unsubscribe_many<'a, I>(&self, entries: I) -> bool
    where
        I: IntoIterator<Item = (&'a str, Subscriber<D>)>,
    {
        entries.into_iter().fold(false, |removed, (messages, subscriber)| {
            self.unsubscribe(messages, Some(&subscriber)) | removed
        })
    }

    /// Dispatch `data`; subscribers without a `synchronous` option get it on
    /// the next tick.
    pub fn dispatch(&self, messages: impl Into<Messages>, data: D, completion: Option<Completion>) {
        self.deliver(messages.into(), data, completion, false);
    }

    /// Dispatch `data`; subscribers without a `synchronous` option are called
    /// before this returns.
    pub fn dispatch_sync(&self, messages: impl Into<Messages>, data: D, completion: Option<Completion>) {
        self.deliver(messages.into(), data, completion, true);
    }

    /// Subscribers of `message`, exact ones first. `None` when there are none.
    pub fn list_subscribers(&self, message: &str, include_patterns: bool) -> Option<Vec<Subscriber<D>>> {
        let mut found: Vec<Subscriber<D>> = self
            .exact_registrations(message)
            .into_iter()
            .map(|r| r.subscriber)
            .collect();
        if include_patterns {
            for reg in self.pattern_registrations(message) {
                if !found.iter().any(|s| s.same_as(&reg.subscriber)) {
                    found.push(reg.subscriber);
                }
            }
        }
        (!found.is_empty()).then_some(found)
    }

    pub fn has_subscribers(&self, message: &str) -> bool {
        self.list_subscribers(message, true).is_some()
    }

    /// Drop every subscription. The source hears about each exact message.
    pub fn unsubscribe_all(&self) {
        let tables = std::mem::take(&mut *self.inner.tables.borrow_mut());
        for message in tables.messages.keys() {
            self.notify_removed(message);
        }
    }

    /// Unsubscribe everything, then destroy and release the source.
    pub fn destroy(&self) {
        self.unsubscribe_all();
        let source = self.inner.source.borrow_mut().take();
        if let Some(source) = source {
            source.destroy();
        }
        debug!("messenger destroyed");
    }

    fn deliver(&self, messages: Messages, data: D, completion: Option<Completion>, synchronous: bool) {
        let data = Rc::new(data);
        match messages {
            Messages::Names(names) => {
                for name in names {
                    let targets = self.collect_for_dispatch(&name);
                    for reg in targets {
                        self.invoke(reg, &name, &data, &completion, synchronous);
                    }
                }
            }
            Messages::Pattern(pattern) => {
                let key = pattern.key().to_string();
                let registrations = self
                    .inner
                    .tables
                    .borrow()
                    .patterns
                    .get(&key)
                    .map(|entry| entry.subscribers.clone())
                    .unwrap_or_default();
                let targets: Vec<_> = registrations.into_iter().filter(Registration::take).collect();
                self.purge_exhausted();
                for reg in targets {
                    self.invoke(reg, &key, &data, &completion, synchronous);
                }
            }
        }
    }

    /// Snapshot the subscribers a dispatch of `message` reaches and account
    /// for their dispatch limits.
    fn collect_for_dispatch(&self, message: &str) -> Vec<Registration<D>> {
        let mut targets: Vec<Registration<D>> = Vec::new();
        for reg in self.exact_registrations(message) {
            if reg.take() {
                targets.push(reg);
            }
        }
        for reg in self.pattern_registrations(message) {
            if targets.iter().any(|t| t.subscriber.same_as(&reg.subscriber)) {
                continue;
            }
            if reg.take() {
                targets.push(reg);
            }
        }
        self.purge_exhausted();
        targets
    }

    fn exact_registrations(&self, message: &str) -> Vec<Registration<D>> {
        self.inner
            .tables
            .borrow()
            .messages
            .get(message)
            .cloned()
            .unwrap_or_default()
    }

    /// Registrations of every pattern matching `message`, deduplicated.
    fn pattern_registrations(&self, message: &str) -> Vec<Registration<D>> {
        let entries: Vec<(MessagePattern, Vec<Registration<D>>)> = self
            .inner
            .tables
            .borrow()
            .patterns
            .values()
            .map(|entry| (entry.pattern.clone(), entry.subscribers.clone()))
            .collect();
        let mut found: Vec<Registration<D>> = Vec::new();
        for (pattern, registrations) in entries {
            if !pattern.matches(message) {
                continue;
            }
            for reg in registrations {
                if !found.iter().any(|f| f.subscriber.same_as(&reg.subscriber)) {
                    found.push(reg);
                }
            }
        }
        found
    }

    fn purge_exhausted(&self) {
        let emptied: Vec<String> = {
            let mut tables = self.inner.tables.borrow_mut();
            let mut emptied = Vec::new();
            tables.messages.retain(|message, list| {
                let before = list.len();
                list.retain(|r| !r.is_exhausted());
                if list.is_empty() && before > 0 {
                    emptied.push(message.clone());
                    return false;
                }
                true
            });
            tables.patterns.retain(|_, entry| {
                entry.subscribers.retain(|r| !r.is_exhausted());
                !entry.subscribers.is_empty()
            });
            emptied
        };
        for message in emptied {
            self.notify_removed(&message);
        }
    }

    fn invoke(
        &self,
        reg: Registration<D>,
        message: &str,
        data: &Rc<D>,
        completion: &Option<Completion>,
        synchronous: bool,
    ) {
        if reg.options.synchronous.unwrap_or(synchronous) {
            reg.subscriber.call(&Delivery {
                message,
                data: data.as_ref(),
                completion: completion.as_ref(),
            });
            return;
        }
        let subscriber = reg.subscriber;
        let message = message.to_string();
        let data = data.clone();
        let completion = completion.clone();
        self.inner.scheduler.defer(Box::new(move || {
            subscriber.call(&Delivery {
                message: &message,
                data: data.as_ref(),
                completion: completion.as_ref(),
            });
        }));
    }

    fn notify_added(&self, message: &str) {
        let source = self.inner.source.borrow().clone();
        if let Some(source) = source {
            source.on_subscriber_added(message);
        }
    }

    fn notify_removed(&self, message: &str) {
        let source = self.inner.source.borrow().clone();
        if let Some(source) = source {
            source.on_subscriber_removed(message);
        }
    }
}

fn register<D>(list: &mut Vec<Registration<D>>, subscriber: &Subscriber<D>, options: SubscriberOptions) -> bool {
    if list.iter().any(|r| r.subscriber.same_as(subscriber)) {
        return false;
    }
    list.push(Registration {
        subscriber: subscriber.clone(),
        options,
        // a zero limit means no limit
        remaining: Rc::new(Cell::new(options.dispatch_limit.filter(|n| *n > 0))),
    });
    true
}

fn unregister<D>(list: &mut Vec<Registration<D>>, subscriber: Option<&Subscriber<D>>) -> bool {
    let before = list.len();
    match subscriber {
        Some(subscriber) => list.retain(|r| !r.subscriber.same_as(subscriber)),
        None => list.clear(),
    }
    list.len() != before
}
