//! Per-entity circuit breaker agent.

use std::time::Duration;

use tracing::info;

use crate::ecs::Entity;
use crate::events::{BREAKER_OPENED_EVENT, ENTITY_TRIP_EVENT};
use crate::kernel::{delay, wait_for_event, SchedulerHandle};

/// Mechanical operating time between the trip command and the contacts
/// actually parting.
pub const BREAKER_OPERATING_DELAY: Duration = Duration::from_millis(100);

/// Event loop for one breaker. Spawn once per protected entity, detached.
///
/// Trip events address an entity; this agent acts only on trips for its own
/// entity and re-arms for the next trip otherwise (subscriptions are
/// one-shot, so every iteration subscribes afresh).
pub async fn breaker_agent(scheduler: SchedulerHandle, entity: Entity, label: String) {
    info!(
        at = %scheduler.now(),
        breaker = %label,
        %entity,
        "breaker agent active, awaiting trip events"
    );
    loop {
        let tripped = wait_for_event::<Entity>(ENTITY_TRIP_EVENT).await;
        if tripped != entity {
            continue;
        }
        info!(at = %scheduler.now(), breaker = %label, %entity, "trip received");
        delay(BREAKER_OPERATING_DELAY).await;
        info!(at = %scheduler.now(), breaker = %label, %entity, "breaker opened");
        scheduler.trigger_with(BREAKER_OPENED_EVENT, entity);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::{Scheduler, SimTime};
    use std::cell::RefCell;
    use std::rc::Rc;

    fn record_openings(scheduler: &Scheduler) -> Rc<RefCell<Vec<(u64, Entity)>>> {
        let log = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&log);
        let handle = scheduler.handle();
        scheduler
            .spawn(async move {
                loop {
                    let entity = wait_for_event::<Entity>(BREAKER_OPENED_EVENT).await;
                    sink.borrow_mut().push((handle.now().as_millis(), entity));
                }
            })
            .detach();
        log
    }

    #[test]
    fn opens_after_operating_delay_on_own_trip() {
        let scheduler = Scheduler::new();
        let mut registry = crate::ecs::Registry::new();
        let line = registry.create();

        let opened = record_openings(&scheduler);
        scheduler
            .spawn(breaker_agent(scheduler.handle(), line, "Line1".into()))
            .detach();

        let handle = scheduler.handle();
        scheduler
            .spawn(async move {
                delay(Duration::from_millis(6200)).await;
                handle.trigger_with(ENTITY_TRIP_EVENT, line);
            })
            .detach();

        scheduler.run_until(SimTime::from_millis(10_000));
        assert_eq!(*opened.borrow(), vec![(6300, line)]);
    }

    #[test]
    fn ignores_trips_for_other_entities_and_stays_armed() {
        let scheduler = Scheduler::new();
        let mut registry = crate::ecs::Registry::new();
        let line = registry.create();
        let transformer = registry.create();

        let opened = record_openings(&scheduler);
        scheduler
            .spawn(breaker_agent(scheduler.handle(), line, "Line1".into()))
            .detach();

        scheduler.trigger_with(ENTITY_TRIP_EVENT, transformer);
        scheduler.run_until(SimTime::from_millis(500));
        assert!(opened.borrow().is_empty());

        // Still listening after the foreign trip.
        scheduler.trigger_with(ENTITY_TRIP_EVENT, line);
        scheduler.run_until(SimTime::from_millis(1000));
        assert_eq!(opened.borrow().len(), 1);
    }
}
