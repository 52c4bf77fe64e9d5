//! Scenario assembly: populate the registry from a configuration, launch
//! every task, and drive the run to its horizon.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::info;

use crate::config::{FaultConfig, FaultTarget, ScenarioConfig};
use crate::ecs::{Entity, Registry};
use crate::events::{
    FaultInfo, GENERATOR_READY_EVENT, LOAD_CHANGE_EVENT, POWER_ADJUST_REQUEST_EVENT,
    STABILITY_CONCERN_EVENT,
};
use crate::frequency::{
    frequency_oracle, vpp_controller, DeviceKind, FrequencyControl, PhysicalState,
};
use crate::kernel::{delay, wait_for_signal, Scheduler, SchedulerHandle, SimTime};
use crate::protection::{breaker_agent, ProtectionEngine, ProtectionSuite, Relay};
use crate::telemetry::FrequencyLog;

/// Entities created for one scenario.
pub struct Fleet {
    pub line: Entity,
    pub transformer: Entity,
    pub ev_piles: Vec<Entity>,
    pub ess_units: Vec<Entity>,
}

/// Creates the protected plant and the managed device populations.
///
/// Initial EV SOC values are drawn from a seeded generator, so the same
/// configuration always produces the same fleet.
pub fn populate(registry: &mut Registry, config: &ScenarioConfig) -> Fleet {
    let mut rng = StdRng::seed_from_u64(config.simulation.seed);

    let line = registry.create();
    registry.emplace(
        line,
        ProtectionSuite::new()
            .with(Relay::over_current(
                config.line.oc_pickup_ka,
                config.line.oc_delay_ms,
                config.line.oc_stage.clone(),
            ))
            .with(Relay::distance(config.line.z_set, config.line.t_ms)),
    );

    let transformer = registry.create();
    registry.emplace(
        transformer,
        ProtectionSuite::new().with(Relay::over_current(
            config.transformer.oc_pickup_ka,
            config.transformer.oc_delay_ms,
            config.transformer.oc_stage.clone(),
        )),
    );

    let ev = &config.ev_fleet;
    let mut ev_piles = Vec::with_capacity(ev.total_piles());
    for i in 0..ev.total_piles() {
        let pile = registry.create();
        let base_power_kw = ev.base_power_pattern_kw[i % ev.base_power_pattern_kw.len()];
        let initial_soc = rng.random_range(ev.initial_soc_min..ev.initial_soc_max);
        registry.emplace(
            pile,
            FrequencyControl {
                kind: DeviceKind::EvPile,
                base_power_kw,
                gain_kw_per_hz: ev.gain_kw_per_hz,
                deadband_hz: ev.deadband_hz,
                max_output_kw: ev.max_output_kw,
                min_output_kw: ev.min_output_kw,
                soc_min_threshold: ev.soc_min_threshold,
                soc_max_threshold: ev.soc_max_threshold,
            },
        );
        registry.emplace(pile, PhysicalState::new(base_power_kw, initial_soc));
        ev_piles.push(pile);
    }

    let ess = &config.ess_fleet;
    let mut ess_units = Vec::with_capacity(ess.units);
    for _ in 0..ess.units {
        let unit = registry.create();
        registry.emplace(
            unit,
            FrequencyControl {
                kind: DeviceKind::EssUnit,
                base_power_kw: 0.0,
                gain_kw_per_hz: ess.gain_kw_per_hz(),
                deadband_hz: ess.deadband_hz,
                max_output_kw: ess.rated_power_kw,
                min_output_kw: -ess.rated_power_kw,
                soc_min_threshold: ess.soc_min_threshold,
                soc_max_threshold: ess.soc_max_threshold,
            },
        );
        registry.emplace(unit, PhysicalState::new(0.0, ess.initial_soc));
        ess_units.push(unit);
    }

    Fleet {
        line,
        transformer,
        ev_piles,
        ess_units,
    }
}

/// Spawns every scenario task, detached: the protection engine and its
/// fault injector, one breaker agent per protected entity, the frequency
/// oracle with its data log, one VPP controller per population, and the
/// background generator and load tasks.
pub fn launch(
    scheduler: &Scheduler,
    registry: &Rc<RefCell<Registry>>,
    config: &ScenarioConfig,
    fleet: &Fleet,
    log: FrequencyLog,
) {
    let engine = ProtectionEngine::new(scheduler.handle(), Rc::clone(registry));
    scheduler.spawn(engine.clone().run()).detach();
    scheduler
        .spawn(inject_faults(
            engine,
            config.faults.clone(),
            fleet.line,
            fleet.transformer,
        ))
        .detach();

    scheduler
        .spawn(breaker_agent(scheduler.handle(), fleet.line, "Line1".into()))
        .detach();
    scheduler
        .spawn(breaker_agent(
            scheduler.handle(),
            fleet.transformer,
            "T1".into(),
        ))
        .detach();

    scheduler
        .spawn(frequency_oracle(
            scheduler.handle(),
            Rc::clone(registry),
            fleet.ev_piles.clone(),
            fleet.ess_units.clone(),
            config.simulation.disturbance_start_s,
            Duration::from_millis(config.simulation.step_ms),
            log,
        ))
        .detach();
    scheduler
        .spawn(vpp_controller(
            scheduler.handle(),
            Rc::clone(registry),
            "EV_VPP".into(),
            fleet.ev_piles.clone(),
        ))
        .detach();
    scheduler
        .spawn(vpp_controller(
            scheduler.handle(),
            Rc::clone(registry),
            "ESS_VPP".into(),
            fleet.ess_units.clone(),
        ))
        .detach();

    scheduler.spawn(generator_task(scheduler.handle())).detach();
    scheduler.spawn(load_task(scheduler.handle())).detach();
}

/// Replays the configured fault schedule against the protection engine.
async fn inject_faults(
    engine: ProtectionEngine,
    mut faults: Vec<FaultConfig>,
    line: Entity,
    transformer: Entity,
) {
    faults.sort_by_key(|fault| fault.at_ms);
    let mut elapsed_ms = 0u64;
    for fault in faults {
        delay(Duration::from_millis(fault.at_ms.saturating_sub(elapsed_ms))).await;
        elapsed_ms = fault.at_ms;
        let faulty_entity = match fault.target {
            FaultTarget::Line => line,
            FaultTarget::Transformer => transformer,
        };
        info!(at_ms = fault.at_ms, faulty = %faulty_entity, "injecting fault");
        engine.inject_fault(FaultInfo {
            current_ka: fault.current_ka,
            voltage_kv: fault.voltage_kv,
            impedance_ohm: fault.impedance_ohm,
            distance_km: fault.distance_km,
            faulty_entity,
        });
    }
}

/// Generator startup and adjustment loop.
async fn generator_task(scheduler: SchedulerHandle) {
    info!(at = %scheduler.now(), "generator startup sequence initiated");
    delay(Duration::from_millis(1000)).await;
    info!(at = %scheduler.now(), "generator online and stable");
    scheduler.trigger(GENERATOR_READY_EVENT);

    loop {
        wait_for_signal(POWER_ADJUST_REQUEST_EVENT).await;
        info!(at = %scheduler.now(), "adjusting generator output");
        delay(Duration::from_millis(300)).await;
        info!(at = %scheduler.now(), "generator output adjusted");
    }
}

/// Load ramp-up sequence.
async fn load_task(scheduler: SchedulerHandle) {
    info!(at = %scheduler.now(), "load waiting for generator");
    wait_for_signal(GENERATOR_READY_EVENT).await;
    info!(at = %scheduler.now(), "initial load applied");
    delay(Duration::from_millis(500)).await;

    info!(at = %scheduler.now(), "load increased");
    scheduler.trigger(LOAD_CHANGE_EVENT);

    delay(Duration::from_millis(10_000)).await;
    info!(at = %scheduler.now(), "load significantly increased");
    scheduler.trigger(LOAD_CHANGE_EVENT);
    scheduler.trigger(STABILITY_CONCERN_EVENT);
}

/// Summary of one completed run.
#[derive(Debug, Clone)]
pub struct RunReport {
    /// Virtual time at the end of the run.
    pub end: SimTime,
    pub ev_piles: usize,
    pub ess_units: usize,
}

/// Builds the scenario, runs it to the configured horizon, and reports.
pub fn run(config: &ScenarioConfig, log: FrequencyLog) -> RunReport {
    let scheduler = Scheduler::new();
    let registry = Rc::new(RefCell::new(Registry::new()));
    let fleet = populate(&mut registry.borrow_mut(), config);
    launch(&scheduler, &registry, config, &fleet, log);

    let end = SimTime::from_millis(config.simulation.horizon_ms);
    scheduler.run_until(end);

    RunReport {
        end: scheduler.now(),
        ev_piles: fleet.ev_piles.len(),
        ess_units: fleet.ess_units.len(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn populate_is_deterministic_for_a_fixed_seed() {
        let config = ScenarioConfig::reference();
        let mut registry_a = Registry::new();
        let mut registry_b = Registry::new();
        let fleet_a = populate(&mut registry_a, &config);
        let fleet_b = populate(&mut registry_b, &config);

        assert_eq!(fleet_a.ev_piles.len(), fleet_b.ev_piles.len());
        for (&a, &b) in fleet_a.ev_piles.iter().zip(&fleet_b.ev_piles) {
            let soc_a = registry_a.get::<PhysicalState>(a).unwrap().soc;
            let soc_b = registry_b.get::<PhysicalState>(b).unwrap().soc;
            assert_eq!(soc_a, soc_b);
        }
    }

    #[test]
    fn populate_builds_the_reference_fleet() {
        let config = ScenarioConfig::reference();
        let mut registry = Registry::new();
        let fleet = populate(&mut registry, &config);

        assert_eq!(fleet.ev_piles.len(), 50);
        assert_eq!(fleet.ess_units.len(), 100);
        assert!(registry.get::<ProtectionSuite>(fleet.line).is_some());
        assert!(registry.get::<ProtectionSuite>(fleet.transformer).is_some());

        // Base power cycles through the configured pattern.
        let bases: Vec<f64> = fleet.ev_piles[..4]
            .iter()
            .map(|&pile| {
                registry
                    .get::<FrequencyControl>(pile)
                    .unwrap()
                    .base_power_kw
            })
            .collect();
        assert_eq!(bases, vec![-5.0, -3.5, 0.0, -5.0]);

        // Initial SOC stays inside the configured draw range.
        for &pile in &fleet.ev_piles {
            let soc = registry.get::<PhysicalState>(pile).unwrap().soc;
            assert!((0.25..0.9).contains(&soc));
        }
    }

    #[test]
    fn run_reaches_the_configured_horizon() {
        let mut config = ScenarioConfig::reference();
        config.simulation.horizon_ms = 2000;
        config.faults.clear();
        config.ev_fleet.stations = 1;
        config.ess_fleet.units = 2;
        let report = run(&config, FrequencyLog::disabled());
        assert_eq!(report.end, SimTime::from_millis(2000));
        assert_eq!(report.ev_piles, 5);
        assert_eq!(report.ess_units, 2);
    }
}
