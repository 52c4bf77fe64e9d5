//! Fault fan-out: from one injected fault to scheduled trip events.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::info;

use crate::ecs::{Entity, Registry};
use crate::events::{FaultInfo, ENTITY_TRIP_EVENT, FAULT_INFO_EVENT};
use crate::kernel::{delay, wait_for_event, SchedulerHandle};

use super::relays::ProtectionSuite;

/// Queries every protective relay on every entity against each injected
/// fault and schedules the resulting trips.
///
/// The engine never cancels a pending trip. When several relays see the
/// same fault, every picked-up relay schedules its own trip and the graded
/// delays decide which breaker opens first; later trips still fire and are
/// simply observed by breakers that already opened.
#[derive(Clone)]
pub struct ProtectionEngine {
    scheduler: SchedulerHandle,
    registry: Rc<RefCell<Registry>>,
}

impl ProtectionEngine {
    pub fn new(scheduler: SchedulerHandle, registry: Rc<RefCell<Registry>>) -> Self {
        ProtectionEngine {
            scheduler,
            registry,
        }
    }

    /// Publishes `fault` on the event bus, waking the engine's event loop.
    pub fn inject_fault(&self, fault: FaultInfo) {
        self.scheduler.trigger_with(FAULT_INFO_EVENT, fault);
    }

    /// The engine's event loop. Spawn once, detached.
    pub async fn run(self) {
        info!(
            at = %self.scheduler.now(),
            "protection engine active, awaiting fault events"
        );
        loop {
            let mut fault = wait_for_event::<FaultInfo>(FAULT_INFO_EVENT).await;
            fault.derive_impedance();
            info!(
                at = %self.scheduler.now(),
                faulty = %fault.faulty_entity,
                current_ka = fault.current_ka,
                impedance_ohm = fault.impedance_ohm,
                distance_km = fault.distance_km,
                "fault received"
            );

            let mut picked = Vec::new();
            self.registry
                .borrow_mut()
                .for_each::<ProtectionSuite>(|entity, suite| {
                    for relay in suite.relays() {
                        if relay.picks_up(&fault, entity) {
                            picked.push((entity, relay.trip_delay_ms(&fault), relay.name().to_string()));
                        }
                    }
                });

            for (entity, delay_ms, relay_name) in picked {
                info!(
                    at = %self.scheduler.now(),
                    relay = %relay_name,
                    protected = %entity,
                    delay_ms,
                    "relay picked up"
                );
                self.scheduler
                    .spawn(trip_later(
                        self.scheduler.clone(),
                        entity,
                        delay_ms,
                        relay_name,
                        fault.faulty_entity,
                    ))
                    .detach();
            }
        }
    }
}

/// Waits out the relay's grading delay, then emits the trip.
async fn trip_later(
    scheduler: SchedulerHandle,
    protected: Entity,
    delay_ms: i32,
    relay_name: String,
    faulty: Entity,
) {
    delay(Duration::from_millis(delay_ms.max(0) as u64)).await;
    info!(
        at = %scheduler.now(),
        relay = %relay_name,
        protected = %protected,
        faulty = %faulty,
        "tripping"
    );
    scheduler.trigger_with(ENTITY_TRIP_EVENT, protected);
}
