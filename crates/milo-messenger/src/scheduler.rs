//! Deferred execution ("the next tick").
//!
//! Every deferred delivery goes through a [`Scheduler`]. Messengers receive
//! one at construction; [`default_scheduler`] returns the thread's default,
//! which is the built-in [`TickScheduler`] unless replaced with
//! [`set_default_scheduler`].

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

pub type Task = Box<dyn FnOnce()>;

pub trait Scheduler {
    /// Run `task` on a later tick, after the current synchronous work.
    fn defer(&self, task: Task);
}

/// FIFO scheduler driven by the host.
///
/// Tasks deferred while a tick runs are kept for the following tick.
#[derive(Default)]
pub struct TickScheduler {
    queue: RefCell<VecDeque<Task>>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pending(&self) -> usize {
        self.queue.borrow().len()
    }

    /// Run the tasks queued before this call. Returns how many ran.
    pub fn run_tick(&self) -> usize {
        let count = self.pending();
        for _ in 0..count {
            let task = self.queue.borrow_mut().pop_front();
            match task {
                Some(task) => task(),
                None => break,
            }
        }
        count
    }

    /// Run ticks until no task is left. Returns how many tasks ran in total.
    pub fn run_until_idle(&self) -> usize {
        let mut total = 0;
        loop {
            let ran = self.run_tick();
            if ran == 0 {
                return total;
            }
            total += ran;
        }
    }
}

impl Scheduler for TickScheduler {
    fn defer(&self, task: Task) {
        self.queue.borrow_mut().push_back(task);
    }
}

/// Runs every task inline, making deferred delivery synchronous.
#[derive(Debug, Default, Clone, Copy)]
pub struct ImmediateScheduler;

impl Scheduler for ImmediateScheduler {
    fn defer(&self, task: Task) {
        task();
    }
}

thread_local! {
    static DEFAULT_TICKS: Rc<TickScheduler> = Rc::new(TickScheduler::new());
    static DEFAULT_OVERRIDE: RefCell<Option<Rc<dyn Scheduler>>> = const { RefCell::new(None) };
}

/// The thread's built-in tick scheduler.
pub fn default_ticks() -> Rc<TickScheduler> {
    DEFAULT_TICKS.with(Rc::clone)
}

/// The scheduler used by messengers that were not given one.
pub fn default_scheduler() -> Rc<dyn Scheduler> {
    DEFAULT_OVERRIDE
        .with(|current| current.borrow().clone())
        .unwrap_or_else(|| default_ticks() as Rc<dyn Scheduler>)
}

/// Replace the default scheduler for this thread, returning the previous one.
///
/// Only messengers created afterwards pick up the new scheduler.
pub fn set_default_scheduler(scheduler: Rc<dyn Scheduler>) -> Rc<dyn Scheduler> {
    let previous = default_scheduler();
    DEFAULT_OVERRIDE.with(|current| *current.borrow_mut() = Some(scheduler));
    previous
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_tick_runs_in_order() {
        let ticks = TickScheduler::new();
        let log = Rc::new(RefCell::new(Vec::new()));
        for i in 0..3 {
            let log = log.clone();
            ticks.defer(Box::new(move || log.borrow_mut().push(i)));
        }
        assert_eq!(ticks.run_tick(), 3);
        assert_eq!(*log.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn test_nested_defer_waits_for_next_tick() {
        let ticks = Rc::new(TickScheduler::new());
        let ran = Rc::new(Cell::new(0));
        {
            let inner_ticks = ticks.clone();
            let ran = ran.clone();
            ticks.defer(Box::new(move || {
                ran.set(ran.get() + 1);
                let ran = ran.clone();
                inner_ticks.defer(Box::new(move || ran.set(ran.get() + 10)));
            }));
        }
        assert_eq!(ticks.run_tick(), 1);
        assert_eq!(ran.get(), 1);
        assert_eq!(ticks.pending(), 1);
        assert_eq!(ticks.run_until_idle(), 1);
        assert_eq!(ran.get(), 11);
    }

    #[test]
    fn test_immediate_runs_inline() {
        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        ImmediateScheduler.defer(Box::new(move || flag.set(true)));
        assert!(ran.get());
    }

    #[test]
    fn test_replace_default() {
        let ticks = default_scheduler();
        let previous = set_default_scheduler(Rc::new(ImmediateScheduler));
        assert!(Rc::ptr_eq(&previous, &ticks));

        let ran = Rc::new(Cell::new(false));
        let flag = ran.clone();
        default_scheduler().defer(Box::new(move || flag.set(true)));
        assert!(ran.get());

        set_default_scheduler(previous);
    }
}
