//! Virtual-time cooperative scheduler.
//!
//! The scheduler owns the virtual clock and every spawned task. Tasks are
//! plain `async` blocks; they suspend only on the wait primitives from
//! [`crate::kernel::wait`] and are resumed either when their timer comes due
//! or when an event they subscribed to is triggered.
//!
//! Determinism contract: with identical inputs the scheduler produces
//! identical orderings. Ready tasks run before any time jump, earlier timer
//! deadlines run first, equal deadlines run in insertion order, and within
//! one trigger subscribers are resumed in subscription order.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker};
use std::time::Duration;

use tracing::trace;

use super::task::{Task, TaskId};
use super::time::SimTime;

/// Identifies one event channel. A fixed registry of well-known ids lives in
/// [`crate::events`].
pub type EventId = u64;

/// Payload handed to event subscribers. Triggers without data deliver
/// `Empty`; typed waiters reject it, untyped waiters accept either form.
#[derive(Clone)]
pub(crate) enum EventPayload {
    Empty,
    Data(Rc<dyn Any>),
}

/// One pending event subscription: the task to resume and the slot the
/// payload is delivered through. Subscriptions are one-shot; re-arming
/// requires subscribing again.
struct Subscription {
    task: TaskId,
    slot: Rc<RefCell<Option<EventPayload>>>,
}

type TaskFuture = Pin<Box<dyn Future<Output = ()>>>;

/// Shared scheduler state. `Scheduler` holds the only strong reference;
/// handles and task-captured contexts hold weak ones.
pub(crate) struct SchedulerState {
    now: Cell<SimTime>,
    /// FIFO of tasks due to run at the current time.
    ready: RefCell<VecDeque<TaskId>>,
    /// Timer queue keyed by (deadline, insertion sequence).
    timers: RefCell<BTreeMap<(SimTime, u64), TaskId>>,
    timer_seq: Cell<u64>,
    subscriptions: RefCell<HashMap<EventId, Vec<Subscription>>>,
    /// Every live task. `None` in a slot means the future is currently
    /// being polled (taken out to avoid aliasing during re-entrant resumes).
    tasks: RefCell<HashMap<TaskId, Option<TaskFuture>>>,
    next_task: Cell<u64>,
    /// The task currently being polled, read by the wait primitives.
    current: Cell<Option<TaskId>>,
}

thread_local! {
    /// Scoped binding to the scheduler currently driving this thread.
    /// Installed by `Scheduler::new`, restored by `Drop`.
    static ACTIVE: RefCell<Option<Weak<SchedulerState>>> = const { RefCell::new(None) };
}

/// Resolves the scoped scheduler binding, if one is installed and alive.
pub(crate) fn active_scheduler() -> Option<Rc<SchedulerState>> {
    ACTIVE.with(|slot| slot.borrow().as_ref().and_then(Weak::upgrade))
}

/// The cooperative virtual-time scheduler.
///
/// Creating a scheduler installs it as the thread's active scheduler for
/// the duration of its lifetime, so wait primitives used inside spawned
/// tasks find it without explicit plumbing. Schedulers may be nested (the
/// previous binding is restored on drop), which keeps tests independent.
pub struct Scheduler {
    state: Rc<SchedulerState>,
    previous: Option<Weak<SchedulerState>>,
}

impl Scheduler {
    /// Creates a scheduler with the clock at zero and installs it as the
    /// thread's active scheduler.
    pub fn new() -> Self {
        let state = Rc::new(SchedulerState {
            now: Cell::new(SimTime::ZERO),
            ready: RefCell::new(VecDeque::new()),
            timers: RefCell::new(BTreeMap::new()),
            timer_seq: Cell::new(0),
            subscriptions: RefCell::new(HashMap::new()),
            tasks: RefCell::new(HashMap::new()),
            next_task: Cell::new(0),
            current: Cell::new(None),
        });
        let previous = ACTIVE.with(|slot| slot.borrow_mut().replace(Rc::downgrade(&state)));
        Scheduler { state, previous }
    }

    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.state.now.get()
    }

    /// Moves the clock to `time`. Moving it backward is not rejected, but
    /// timers already past keep their original deadlines.
    pub fn set_time(&self, time: SimTime) {
        self.state.now.set(time);
    }

    /// Advances the clock by `delta` without running anything.
    pub fn advance_time(&self, delta: Duration) {
        let state = &self.state;
        state.now.set(state.now.get() + delta);
    }

    /// Spawns a task and runs it eagerly up to its first suspension.
    ///
    /// The returned handle owns the task: dropping it cancels the task
    /// unless [`Task::detach`] transferred ownership to the scheduler.
    pub fn spawn<F>(&self, future: F) -> Task
    where
        F: Future<Output = ()> + 'static,
    {
        spawn_on(&self.state, future)
    }

    /// Returns a cheap cloneable handle for use inside tasks.
    pub fn handle(&self) -> SchedulerHandle {
        SchedulerHandle {
            state: Rc::downgrade(&self.state),
        }
    }

    /// Triggers `event` with no payload. See [`Scheduler::trigger_with`].
    pub fn trigger(&self, event: EventId) {
        trigger_payload(&self.state, event, EventPayload::Empty);
    }

    /// Triggers `event`, delivering `data` to every current subscriber.
    ///
    /// The subscriber set is snapshotted and cleared first, then each
    /// subscribed task is resumed synchronously in subscription order.
    /// Tasks that subscribe while delivery is in progress are not notified
    /// by this trigger.
    pub fn trigger_with<T: 'static>(&self, event: EventId, data: T) {
        trigger_payload(&self.state, event, EventPayload::Data(Rc::new(data)));
    }

    /// Runs one scheduler step.
    ///
    /// Resumes the next ready task if there is one; otherwise jumps the
    /// clock to the earliest timer deadline and moves every due timer into
    /// the ready queue. Returns whether any work was done.
    pub fn run_one_step(&self) -> bool {
        let next = self.state.ready.borrow_mut().pop_front();
        if let Some(id) = next {
            resume(&self.state, id);
            return true;
        }
        if self.state.timers.borrow().is_empty() {
            return false;
        }
        let earliest = earliest_deadline(&self.state).expect("timer queue is non-empty");
        self.state.now.set(earliest);
        migrate_due_timers(&self.state);
        true
    }

    /// Runs until the clock reaches `end` or no work remains.
    ///
    /// Ready tasks are always drained at the current time before the clock
    /// jumps to the next timer deadline. On return the clock reads `end`
    /// unless it was already past it.
    pub fn run_until(&self, end: SimTime) {
        let state = &self.state;
        while state.now.get() < end {
            loop {
                let next = state.ready.borrow_mut().pop_front();
                match next {
                    Some(id) => resume(state, id),
                    None => break,
                }
            }
            match earliest_deadline(state) {
                None => break,
                Some(at) if at >= end => {
                    state.now.set(end);
                    return;
                }
                Some(at) => {
                    state.now.set(at);
                    migrate_due_timers(state);
                }
            }
        }
        if state.now.get() < end {
            state.now.set(end);
        }
    }

    /// True when no ready task, timer, or subscription remains.
    pub fn is_idle(&self) -> bool {
        self.state.ready.borrow().is_empty()
            && self.state.timers.borrow().is_empty()
            && self.state.subscriptions.borrow().values().all(Vec::is_empty)
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        ACTIVE.with(|slot| {
            let mut binding = slot.borrow_mut();
            let ours = binding
                .as_ref()
                .is_some_and(|weak| weak.as_ptr() == Rc::as_ptr(&self.state));
            if ours {
                *binding = self.previous.take();
            }
        });
    }
}

/// Non-owning scheduler reference for use inside tasks.
///
/// Holds a weak reference so long-lived detached tasks do not keep the
/// scheduler state alive past the owning [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    state: Weak<SchedulerState>,
}

impl SchedulerHandle {
    fn state(&self) -> Rc<SchedulerState> {
        self.state
            .upgrade()
            .expect("scheduler handle used after the scheduler was dropped")
    }

    /// Current virtual time.
    pub fn now(&self) -> SimTime {
        self.state().now.get()
    }

    /// See [`Scheduler::spawn`].
    pub fn spawn<F>(&self, future: F) -> Task
    where
        F: Future<Output = ()> + 'static,
    {
        spawn_on(&self.state(), future)
    }

    /// See [`Scheduler::trigger`].
    pub fn trigger(&self, event: EventId) {
        trigger_payload(&self.state(), event, EventPayload::Empty);
    }

    /// See [`Scheduler::trigger_with`].
    pub fn trigger_with<T: 'static>(&self, event: EventId, data: T) {
        trigger_payload(&self.state(), event, EventPayload::Data(Rc::new(data)));
    }
}

impl SchedulerState {
    pub(crate) fn now(&self) -> SimTime {
        self.now.get()
    }

    pub(crate) fn current_task(&self) -> Option<TaskId> {
        self.current.get()
    }

    /// Arms a timer resuming `task` after `delta`.
    pub(crate) fn schedule_after(&self, delta: Duration, task: TaskId) -> SimTime {
        let deadline = self.now.get() + delta;
        let seq = self.timer_seq.get();
        self.timer_seq.set(seq + 1);
        self.timers.borrow_mut().insert((deadline, seq), task);
        deadline
    }

    /// Adds a one-shot subscription for `event`.
    pub(crate) fn subscribe(
        &self,
        event: EventId,
        task: TaskId,
        slot: Rc<RefCell<Option<EventPayload>>>,
    ) {
        self.subscriptions
            .borrow_mut()
            .entry(event)
            .or_default()
            .push(Subscription { task, slot });
    }

    pub(crate) fn contains_task(&self, id: TaskId) -> bool {
        self.tasks.borrow().contains_key(&id)
    }

    /// Removes a task, dropping its future outside the table borrow so a
    /// cascade of handle drops inside the future cannot re-enter the table.
    pub(crate) fn remove_task(&self, id: TaskId) {
        let removed = self.tasks.borrow_mut().remove(&id);
        drop(removed);
    }
}

fn spawn_on<F>(state: &Rc<SchedulerState>, future: F) -> Task
where
    F: Future<Output = ()> + 'static,
{
    let raw = state.next_task.get() + 1;
    state.next_task.set(raw);
    let id = TaskId::new(raw);
    state.tasks.borrow_mut().insert(id, Some(Box::pin(future)));
    trace!(task = raw, "task spawned");
    resume(state, id);
    Task::new(id, Rc::downgrade(state))
}

/// Polls `id` once. No-op for completed or cancelled tasks. Safe to call
/// re-entrantly from inside another task's poll (trigger delivery does).
fn resume(state: &Rc<SchedulerState>, id: TaskId) {
    let future = match state.tasks.borrow_mut().get_mut(&id) {
        Some(slot) => slot.take(),
        None => None,
    };
    let Some(mut future) = future else {
        return;
    };

    let previous = state.current.replace(Some(id));
    let waker = Waker::noop();
    let mut cx = Context::from_waker(waker);
    let poll = future.as_mut().poll(&mut cx);
    state.current.set(previous);

    let mut finished = Some(future);
    {
        let mut tasks = state.tasks.borrow_mut();
        match poll {
            Poll::Ready(()) => {
                tasks.remove(&id);
            }
            Poll::Pending => {
                // The slot is gone if the task was cancelled mid-poll; the
                // future is then dropped below, after the borrow ends.
                if let Some(slot) = tasks.get_mut(&id) {
                    *slot = finished.take();
                }
            }
        }
    }
    drop(finished);
}

fn trigger_payload(state: &Rc<SchedulerState>, event: EventId, payload: EventPayload) {
    let subscribers = state
        .subscriptions
        .borrow_mut()
        .remove(&event)
        .unwrap_or_default();
    trace!(event, count = subscribers.len(), "event triggered");
    for subscriber in subscribers {
        *subscriber.slot.borrow_mut() = Some(payload.clone());
        resume(state, subscriber.task);
    }
}

fn earliest_deadline(state: &SchedulerState) -> Option<SimTime> {
    state.timers.borrow().keys().next().map(|&(at, _)| at)
}

/// Moves every timer with deadline at or before `now` into the ready queue,
/// preserving insertion order within equal deadlines.
fn migrate_due_timers(state: &SchedulerState) {
    let now = state.now.get();
    let mut timers = state.timers.borrow_mut();
    let mut ready = state.ready.borrow_mut();
    while let Some(entry) = timers.first_entry() {
        if entry.key().0 > now {
            break;
        }
        let (_, task) = entry.remove_entry();
        ready.push_back(task);
    }
}
