//! Periodic frequency oracle.
//!
//! Synthesises the post-disturbance frequency signal on a fixed virtual
//! timestep, publishes each sample on the event bus, and logs the
//! aggregated VPP output alongside it. Because event delivery is
//! synchronous, the power total recorded with a sample already includes
//! the controllers' response to that sample.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use tracing::info;

use crate::ecs::{Entity, Registry};
use crate::events::{FrequencyInfo, FREQUENCY_UPDATE_EVENT};
use crate::kernel::{delay, SchedulerHandle};
use crate::telemetry::FrequencyLog;

use super::components::PhysicalState;
use super::deviation::frequency_deviation;

/// Sample-and-publish loop. Spawn once, detached; owns the data log.
pub async fn frequency_oracle(
    scheduler: SchedulerHandle,
    registry: Rc<RefCell<Registry>>,
    ev_entities: Vec<Entity>,
    ess_entities: Vec<Entity>,
    disturbance_start_s: f64,
    step: Duration,
    mut log: FrequencyLog,
) {
    info!(
        at = %scheduler.now(),
        disturbance_start_s,
        step_ms = step.as_millis() as u64,
        "frequency oracle active"
    );
    log.header();

    loop {
        delay(step).await;

        let now = scheduler.now();
        let sim_time_s = now.as_secs_f64();
        let relative_time_s = sim_time_s - disturbance_start_s;
        let freq_deviation_hz = frequency_deviation(relative_time_s);

        scheduler.trigger_with(
            FREQUENCY_UPDATE_EVENT,
            FrequencyInfo {
                sim_time_s,
                freq_deviation_hz,
            },
        );

        let total_vpp_power_kw = total_power_kw(&registry.borrow(), &ev_entities, &ess_entities);
        log.record(
            now.as_millis() as f64,
            sim_time_s,
            relative_time_s,
            freq_deviation_hz,
            total_vpp_power_kw,
        );
    }
}

/// Sum of `current_power_kw` over the managed populations. Entities without
/// a physical state simply contribute nothing.
pub fn total_power_kw(registry: &Registry, ev_entities: &[Entity], ess_entities: &[Entity]) -> f64 {
    ev_entities
        .iter()
        .chain(ess_entities)
        .filter_map(|&entity| registry.get::<PhysicalState>(entity))
        .map(|state| state.current_power_kw)
        .sum()
}
