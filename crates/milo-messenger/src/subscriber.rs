use std::any::Any;
use std::fmt;
use std::rc::Rc;
use thiserror::Error;

/// A callback plus an optional receiver context.
///
/// Two subscribers are the same when they share the callback allocation and
/// the context allocation (or both have no context). Clone a subscriber to
/// unsubscribe it later.
pub struct Subscriber<D> {
    callback: Rc<dyn Fn(&Delivery<'_, D>)>,
    context: Option<Rc<dyn Any>>,
}

impl<D> Subscriber<D> {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&Delivery<'_, D>) + 'static,
    {
        Self {
            callback: Rc::new(callback),
            context: None,
        }
    }

    /// Same callback bound to another receiver context.
    pub fn with_context(&self, context: Rc<dyn Any>) -> Self {
        Self {
            callback: self.callback.clone(),
            context: Some(context),
        }
    }

    pub fn context(&self) -> Option<&Rc<dyn Any>> {
        self.context.as_ref()
    }

    pub fn same_as(&self, other: &Subscriber<D>) -> bool {
        let same_callback = std::ptr::addr_eq(Rc::as_ptr(&self.callback), Rc::as_ptr(&other.callback));
        let same_context = match (&self.context, &other.context) {
            (None, None) => true,
            (Some(a), Some(b)) => std::ptr::addr_eq(Rc::as_ptr(a), Rc::as_ptr(b)),
            _ => false,
        };
        same_callback && same_context
    }

    pub(crate) fn call(&self, delivery: &Delivery<'_, D>) {
        (self.callback)(delivery)
    }
}

impl<D> Clone for Subscriber<D> {
    fn clone(&self) -> Self {
        Self {
            callback: self.callback.clone(),
            context: self.context.clone(),
        }
    }
}

impl<D> fmt::Debug for Subscriber<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscriber")
            .field("callback", &Rc::as_ptr(&self.callback).cast::<()>())
            .field("has_context", &self.context.is_some())
            .finish()
    }
}

/// Per-subscription delivery options.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SubscriberOptions {
    /// `Some(true)` always delivers synchronously, `Some(false)` always defers.
    /// `None` follows the dispatch call.
    pub synchronous: Option<bool>,
    /// Remove the subscription after this many deliveries. `Some(0)` is
    /// treated as no limit.
    pub dispatch_limit: Option<usize>,
}

impl SubscriberOptions {
    pub fn synchronous() -> Self {
        Self {
            synchronous: Some(true),
            dispatch_limit: None,
        }
    }

    pub fn deferred() -> Self {
        Self {
            synchronous: Some(false),
            dispatch_limit: None,
        }
    }

    pub fn once(self) -> Self {
        self.limit(1)
    }

    pub fn limit(mut self, dispatch_limit: usize) -> Self {
        self.dispatch_limit = Some(dispatch_limit);
        self
    }
}

/// Error reported by a subscriber through its completion callback.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct DeliveryError(pub String);

impl From<&str> for DeliveryError {
    fn from(message: &str) -> Self {
        DeliveryError(message.to_string())
    }
}

impl From<String> for DeliveryError {
    fn from(message: String) -> Self {
        DeliveryError(message)
    }
}

/// Callback a dispatcher passes along with a message. Subscribers call it
/// with `Ok(true)` when they handled the message, or with an error.
#[derive(Clone)]
pub struct Completion(Rc<dyn Fn(Result<bool, DeliveryError>)>);

impl Completion {
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(Result<bool, DeliveryError>) + 'static,
    {
        Completion(Rc::new(callback))
    }

    pub fn call(&self, result: Result<bool, DeliveryError>) {
        (self.0)(result)
    }
}

impl fmt::Debug for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Completion")
    }
}

/// What a subscriber receives.
pub struct Delivery<'a, D> {
    pub message: &'a str,
    pub data: &'a D,
    pub completion: Option<&'a Completion>,
}

impl<D> Delivery<'_, D> {
    /// Report the outcome to the dispatcher, if it asked for one.
    pub fn complete(&self, result: Result<bool, DeliveryError>) {
        if let Some(completion) = self.completion {
            completion.call(result);
        }
    }
}
