//! Publish/subscribe messaging.
//!
//! A [`Messenger`] keeps two subscription tables: one keyed by exact message
//! names and one keyed by patterns ([`MessagePattern`]). Dispatching a name
//! reaches its exact subscribers first, then every subscriber of a matching
//! pattern that was not called already.
//!
//! Delivery is synchronous or deferred. Deferred delivery goes through a
//! [`Scheduler`]; the default one is a thread-local [`TickScheduler`] which
//! the host drives.
//!
//! # Example
//!
//! ```
//! use milo_messenger::{Delivery, Messenger, Subscriber, TickScheduler};
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! let ticks = Rc::new(TickScheduler::new());
//! let messenger: Messenger<String> = Messenger::new(ticks.clone());
//!
//! let seen = Rc::new(RefCell::new(Vec::new()));
//! let sink = seen.clone();
//! messenger.subscribe(
//!     "greeting",
//!     Subscriber::new(move |d: &Delivery<'_, String>| sink.borrow_mut().push(d.data.clone())),
//! );
//!
//! messenger.dispatch("greeting", "hello".to_string(), None);
//! assert!(seen.borrow().is_empty());
//! ticks.run_tick();
//! assert_eq!(*seen.borrow(), vec!["hello".to_string()]);
//! ```

mod message;
mod messenger;
pub mod scheduler;
mod source;
mod subscriber;

pub use message::{MessagePattern, Messages};
pub use messenger::{Messenger, WeakMessenger};
pub use scheduler::{
    default_scheduler, default_ticks, set_default_scheduler, ImmediateScheduler, Scheduler, Task, TickScheduler,
};
pub use source::MessageSource;
pub use subscriber::{Completion, Delivery, DeliveryError, Subscriber, SubscriberOptions};
