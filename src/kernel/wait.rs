//! Wait primitives: the only suspension points available to tasks.
//!
//! All three futures resolve the thread's active scheduler on first poll,
//! so task code never threads a scheduler reference through its calls just
//! to suspend. They must be awaited from inside a task spawned on that
//! scheduler; awaiting them anywhere else is a programmer error.

use std::cell::RefCell;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::rc::Rc;
use std::task::{Context, Poll};
use std::time::Duration;

use super::scheduler::{active_scheduler, EventId, EventPayload};
use super::time::SimTime;

/// Suspends the current task for `duration` of virtual time.
///
/// A zero duration completes immediately without suspending.
pub fn delay(duration: Duration) -> Delay {
    Delay {
        duration,
        deadline: None,
    }
}

/// Suspends the current task until `event` is triggered with a payload of
/// type `T`, and yields a copy of that payload.
///
/// The subscription is one-shot: a task that handles the event in a loop
/// must await a fresh `wait_for_event` on every iteration. Triggering the
/// event with a different payload type, or with no payload, is a programmer
/// error and panics.
pub fn wait_for_event<T: Clone + 'static>(event: EventId) -> EventWait<T> {
    EventWait {
        event,
        slot: None,
        _payload: PhantomData,
    }
}

/// Suspends the current task until `event` is triggered, ignoring any
/// payload. One-shot, like [`wait_for_event`].
pub fn wait_for_signal(event: EventId) -> SignalWait {
    SignalWait { event, slot: None }
}

/// Future returned by [`delay`].
pub struct Delay {
    duration: Duration,
    deadline: Option<SimTime>,
}

impl Future for Delay {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        let Some(scheduler) = active_scheduler() else {
            // No scheduler in scope: nothing can advance virtual time, so
            // there is nothing to wait for.
            return Poll::Ready(());
        };
        match this.deadline {
            None => {
                if this.duration.is_zero() {
                    return Poll::Ready(());
                }
                let task = scheduler
                    .current_task()
                    .expect("delay() awaited outside a scheduler task");
                this.deadline = Some(scheduler.schedule_after(this.duration, task));
                Poll::Pending
            }
            Some(deadline) => {
                if scheduler.now() >= deadline {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            }
        }
    }
}

type PayloadSlot = Rc<RefCell<Option<EventPayload>>>;

/// Subscribes the current task to `event` on first poll and returns the
/// shared slot the trigger will deliver the payload through.
fn arm_subscription(event: EventId) -> PayloadSlot {
    let scheduler =
        active_scheduler().expect("event waits require a scheduler in scope on this thread");
    let task = scheduler
        .current_task()
        .expect("event waits must be awaited inside a scheduler task");
    let slot: PayloadSlot = Rc::new(RefCell::new(None));
    scheduler.subscribe(event, task, Rc::clone(&slot));
    slot
}

/// Future returned by [`wait_for_event`].
pub struct EventWait<T> {
    event: EventId,
    slot: Option<PayloadSlot>,
    _payload: PhantomData<fn() -> T>,
}

impl<T: Clone + 'static> Future for EventWait<T> {
    type Output = T;

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<T> {
        let this = self.get_mut();
        match &this.slot {
            None => {
                this.slot = Some(arm_subscription(this.event));
                Poll::Pending
            }
            Some(slot) => {
                let delivered = slot.borrow_mut().take();
                match delivered {
                    None => Poll::Pending,
                    Some(EventPayload::Data(payload)) => {
                        let payload = payload.downcast_ref::<T>().unwrap_or_else(|| {
                            panic!("event {} payload type mismatch", this.event)
                        });
                        Poll::Ready(payload.clone())
                    }
                    Some(EventPayload::Empty) => {
                        panic!(
                            "event {} was triggered without a payload, but a typed waiter expected one",
                            this.event
                        )
                    }
                }
            }
        }
    }
}

/// Future returned by [`wait_for_signal`].
pub struct SignalWait {
    event: EventId,
    slot: Option<PayloadSlot>,
}

impl Future for SignalWait {
    type Output = ();

    fn poll(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<()> {
        let this = self.get_mut();
        match &this.slot {
            None => {
                this.slot = Some(arm_subscription(this.event));
                Poll::Pending
            }
            Some(slot) => {
                if slot.borrow_mut().take().is_some() {
                    Poll::Ready(())
                } else {
                    Poll::Pending
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Scheduler;
    use std::cell::Cell;

    #[test]
    fn signal_wait_accepts_payload_carrying_trigger() {
        let scheduler = Scheduler::new();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        scheduler
            .spawn(async move {
                wait_for_signal(11).await;
                flag.set(true);
            })
            .detach();

        scheduler.trigger_with(11, 3.5f64);
        assert!(fired.get());
    }

    #[test]
    fn consecutive_delays_accumulate() {
        let scheduler = Scheduler::new();
        let times = Rc::new(RefCell::new(Vec::new()));
        let log = Rc::clone(&times);
        let handle = scheduler.handle();
        scheduler
            .spawn(async move {
                delay(Duration::from_millis(200)).await;
                log.borrow_mut().push(handle.now().as_millis());
                delay(Duration::from_millis(100)).await;
                log.borrow_mut().push(handle.now().as_millis());
            })
            .detach();

        scheduler.run_until(SimTime::from_millis(1000));
        assert_eq!(*times.borrow(), vec![200, 300]);
    }
}
