//! Per-population frequency-response controller.
//!
//! One controller task per managed population (EV piles, ESS units). The
//! controller listens for frequency samples and, when the change or time
//! thresholds are crossed, integrates each device's SOC over the elapsed
//! interval and recomputes its output power.

use std::cell::RefCell;
use std::rc::Rc;

use tracing::{debug, info};

use crate::ecs::{Entity, Registry};
use crate::events::{FrequencyInfo, FREQUENCY_UPDATE_EVENT};
use crate::kernel::{wait_for_event, SchedulerHandle};

use super::components::{DeviceKind, FrequencyControl, PhysicalState};

/// A full update runs when the deviation moved by more than this since the
/// previous full update.
pub const FREQ_CHANGE_THRESHOLD_HZ: f64 = 0.01;
/// A full update runs at least this often while samples keep arriving.
pub const TIME_THRESHOLD_S: f64 = 1.0;

/// Event loop for one managed population. Spawn once, detached.
pub async fn vpp_controller(
    scheduler: SchedulerHandle,
    registry: Rc<RefCell<Registry>>,
    name: String,
    managed: Vec<Entity>,
) {
    info!(
        at = %scheduler.now(),
        vpp = %name,
        devices = managed.len(),
        "vpp controller active, awaiting frequency updates"
    );

    let mut last_event_time_s = -1.0;
    let mut last_full_update_time_s = -1.0;
    let mut last_full_update_freq_dev_hz = 0.0;

    loop {
        let sample = wait_for_event::<FrequencyInfo>(FREQUENCY_UPDATE_EVENT).await;

        // Samples must move time forward; replays are dropped.
        if sample.sim_time_s <= last_event_time_s {
            continue;
        }
        last_event_time_s = sample.sim_time_s;

        let first_update = last_full_update_time_s < 0.0;
        let mut dt_s = 0.0;
        let full_update = if first_update {
            true
        } else {
            dt_s = (sample.sim_time_s - last_full_update_time_s).max(0.0);
            let freq_shift = (sample.freq_deviation_hz - last_full_update_freq_dev_hz).abs();
            freq_shift > FREQ_CHANGE_THRESHOLD_HZ || dt_s >= TIME_THRESHOLD_S
        };
        if !full_update {
            continue;
        }

        debug!(
            at = %scheduler.now(),
            vpp = %name,
            freq_dev_hz = sample.freq_deviation_hz,
            dt_s,
            "full update"
        );

        let mut registry = registry.borrow_mut();
        for &entity in &managed {
            let Some(config) = registry.get::<FrequencyControl>(entity).cloned() else {
                continue;
            };
            let Some(state) = registry.get_mut::<PhysicalState>(entity) else {
                continue;
            };
            if !first_update && dt_s > 1e-6 {
                integrate_soc(&config, state, dt_s);
            }
            state.current_power_kw = response_power(&config, state.soc, sample.freq_deviation_hz);
        }
        drop(registry);

        last_full_update_time_s = sample.sim_time_s;
        last_full_update_freq_dev_hz = sample.freq_deviation_hz;
    }
}

/// Advances SOC by the energy delivered over the previous interval at the
/// previous power. Discharging lowers SOC, charging raises it; the result
/// is clamped to `[0, 1]`.
pub fn integrate_soc(config: &FrequencyControl, state: &mut PhysicalState, dt_s: f64) {
    let energy_kwh = state.current_power_kw * (dt_s / 3600.0);
    let capacity_kwh = config.kind.default_capacity_kwh();
    state.soc = (state.soc - energy_kwh / capacity_kwh).clamp(0.0, 1.0);
}

/// Output power for one device at the given SOC and frequency deviation.
///
/// Inside the deadband the device holds its base power. Under-frequency
/// drives discharge proportional to the deviation beyond the deadband;
/// over-frequency backs the output off from base. EV piles additionally
/// refuse to discharge at or below their SOC floor and to charge at or
/// above their SOC ceiling.
pub fn response_power(config: &FrequencyControl, soc: f64, freq_dev_hz: f64) -> f64 {
    let mut power_kw = config.base_power_kw;

    if freq_dev_hz.abs() > config.deadband_hz {
        if freq_dev_hz < 0.0 {
            let effective_df = freq_dev_hz + config.deadband_hz;
            match config.kind {
                DeviceKind::EvPile => {
                    if soc >= config.soc_min_threshold {
                        power_kw = -config.gain_kw_per_hz * effective_df;
                    } else if config.base_power_kw < 0.0 {
                        // Too empty to help: at least stop charging.
                        power_kw = 0.0;
                    }
                }
                DeviceKind::EssUnit => {
                    power_kw = -config.gain_kw_per_hz * effective_df;
                }
            }
        } else {
            let effective_df = freq_dev_hz - config.deadband_hz;
            power_kw = config.base_power_kw - config.gain_kw_per_hz * effective_df;
        }
    }

    power_kw = power_kw.clamp(config.min_output_kw, config.max_output_kw);

    if config.kind == DeviceKind::EvPile {
        if power_kw < 0.0 && soc >= config.soc_max_threshold {
            power_kw = 0.0;
        }
        if power_kw > 0.0 && soc <= config.soc_min_threshold {
            power_kw = 0.0;
        }
    }

    power_kw
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kernel::Scheduler;

    fn ev_config(base_power_kw: f64) -> FrequencyControl {
        FrequencyControl {
            kind: DeviceKind::EvPile,
            base_power_kw,
            gain_kw_per_hz: 4.0,
            deadband_hz: 0.03,
            max_output_kw: 5.0,
            min_output_kw: -5.0,
            soc_min_threshold: 0.1,
            soc_max_threshold: 0.95,
        }
    }

    fn ess_config() -> FrequencyControl {
        FrequencyControl {
            kind: DeviceKind::EssUnit,
            base_power_kw: 0.0,
            gain_kw_per_hz: 1000.0 / (0.03 * 50.0),
            deadband_hz: 0.03,
            max_output_kw: 1000.0,
            min_output_kw: -1000.0,
            soc_min_threshold: 0.05,
            soc_max_threshold: 0.95,
        }
    }

    #[test]
    fn no_response_inside_deadband() {
        let config = ess_config();
        assert_eq!(response_power(&config, 0.7, -0.02), 0.0);
        assert_eq!(response_power(&config, 0.7, 0.02), 0.0);
    }

    #[test]
    fn deviation_exactly_at_deadband_is_no_response() {
        let config = ess_config();
        assert_eq!(response_power(&config, 0.7, -0.03), 0.0);
        assert_eq!(response_power(&config, 0.7, 0.03), 0.0);
    }

    #[test]
    fn sustained_dip_drives_ess_discharge() {
        // Effective deviation is -0.17 Hz past the deadband; with the
        // 666.67 kW/Hz gain that is 113.3 kW of discharge.
        let config = ess_config();
        let power = response_power(&config, 0.7, -0.2);
        assert!((power - 113.333).abs() < 0.01, "got {power}");
    }

    #[test]
    fn response_is_clamped_to_output_limits() {
        let config = ess_config();
        let power = response_power(&config, 0.7, -2.0);
        assert_eq!(power, 1000.0);
        let power = response_power(&config, 0.7, 2.0);
        assert_eq!(power, -1000.0);
    }

    #[test]
    fn over_frequency_backs_off_from_base() {
        let config = ev_config(-5.0);
        // Effective rise 0.07 Hz: base -5 kW moves further negative but is
        // clamped at the charging limit.
        let power = response_power(&config, 0.5, 0.1);
        assert_eq!(power, -5.0);

        let config = ev_config(0.0);
        let power = response_power(&config, 0.5, 0.1);
        assert!((power - (-0.28)).abs() < 1e-9, "got {power}");
    }

    #[test]
    fn empty_pile_with_charging_base_holds_zero_on_dip() {
        let config = ev_config(-5.0);
        let power = response_power(&config, 0.09, -0.2);
        assert_eq!(power, 0.0);
    }

    #[test]
    fn empty_pile_with_idle_base_keeps_base_on_dip() {
        let config = ev_config(0.0);
        let power = response_power(&config, 0.09, -0.2);
        assert_eq!(power, 0.0);
    }

    #[test]
    fn pile_above_soc_floor_discharges_on_dip() {
        let config = ev_config(-5.0);
        let power = response_power(&config, 0.2, -0.2);
        assert!((power - 0.68).abs() < 1e-9, "got {power}");
    }

    #[test]
    fn discharge_guard_applies_at_exact_soc_floor() {
        // The charging-base hold applies strictly below the floor, but the
        // discharge guard is inclusive, so the net output at the floor is
        // still zero.
        let config = ev_config(-5.0);
        let power = response_power(&config, 0.1, -0.2);
        assert_eq!(power, 0.0);
    }

    #[test]
    fn full_pile_refuses_to_charge() {
        let config = ev_config(-5.0);
        let power = response_power(&config, 0.96, -0.02);
        assert_eq!(power, 0.0);
    }

    #[test]
    fn soc_integration_discharging_lowers_soc() {
        let config = ev_config(0.0);
        let mut state = PhysicalState::new(5.0, 0.5);
        // 5 kW for one hour out of a 50 kWh pack is 10 % of capacity.
        integrate_soc(&config, &mut state, 3600.0);
        assert!((state.soc - 0.4).abs() < 1e-12);
    }

    #[test]
    fn soc_integration_clamps_at_bounds() {
        let config = ev_config(0.0);
        let mut state = PhysicalState::new(500.0, 0.01);
        integrate_soc(&config, &mut state, 3600.0);
        assert_eq!(state.soc, 0.0);

        let mut state = PhysicalState::new(-500.0, 0.99);
        integrate_soc(&config, &mut state, 3600.0);
        assert_eq!(state.soc, 1.0);
    }

    fn controller_fixture(
        config: FrequencyControl,
        state: PhysicalState,
    ) -> (Scheduler, Rc<RefCell<Registry>>, Entity) {
        let scheduler = Scheduler::new();
        let registry = Rc::new(RefCell::new(Registry::new()));
        let device = {
            let mut reg = registry.borrow_mut();
            let device = reg.create();
            reg.emplace(device, config);
            reg.emplace(device, state);
            device
        };
        scheduler
            .spawn(vpp_controller(
                scheduler.handle(),
                Rc::clone(&registry),
                "TEST_VPP".into(),
                vec![device],
            ))
            .detach();
        (scheduler, registry, device)
    }

    fn sample(scheduler: &Scheduler, time_s: f64, dev_hz: f64) {
        scheduler.trigger_with(
            FREQUENCY_UPDATE_EVENT,
            FrequencyInfo {
                sim_time_s: time_s,
                freq_deviation_hz: dev_hz,
            },
        );
    }

    #[test]
    fn replayed_timestamp_is_discarded() {
        let (scheduler, registry, device) =
            controller_fixture(ess_config(), PhysicalState::new(100.0, 0.7));

        sample(&scheduler, 1.0, -0.2);
        let power_after_first = registry
            .borrow()
            .get::<PhysicalState>(device)
            .unwrap()
            .current_power_kw;
        assert!((power_after_first - 113.333).abs() < 0.01);

        // A second sample at the same timestamp is dropped even though its
        // deviation would otherwise cross the change threshold.
        sample(&scheduler, 1.0, -0.5);
        let power_after_replay = registry
            .borrow()
            .get::<PhysicalState>(device)
            .unwrap()
            .current_power_kw;
        assert_eq!(power_after_first, power_after_replay);
    }

    #[test]
    fn small_drift_is_gated_until_the_time_threshold() {
        let (scheduler, registry, device) =
            controller_fixture(ess_config(), PhysicalState::new(0.0, 0.7));

        sample(&scheduler, 1.0, -0.2);
        let power = |registry: &Rc<RefCell<Registry>>| {
            registry
                .borrow()
                .get::<PhysicalState>(device)
                .unwrap()
                .current_power_kw
        };
        let after_first = power(&registry);
        assert!((after_first - 113.333).abs() < 0.01);

        // Drift below the change threshold, well within one second: no
        // recompute.
        sample(&scheduler, 1.02, -0.205);
        assert_eq!(power(&registry), after_first);

        // Same deviation a full second later: the time gate fires.
        sample(&scheduler, 2.0, -0.205);
        let after_gate = power(&registry);
        assert!((after_gate - 116.667).abs() < 0.01, "got {after_gate}");
    }

    #[test]
    fn first_update_skips_soc_integration() {
        let (scheduler, registry, device) =
            controller_fixture(ess_config(), PhysicalState::new(500.0, 0.7));

        sample(&scheduler, 5.0, 0.0);
        let soc = registry.borrow().get::<PhysicalState>(device).unwrap().soc;
        assert_eq!(soc, 0.7);
    }

    #[test]
    fn device_missing_physical_state_is_skipped() {
        let scheduler = Scheduler::new();
        let registry = Rc::new(RefCell::new(Registry::new()));
        let bare = {
            let mut reg = registry.borrow_mut();
            let bare = reg.create();
            reg.emplace(bare, ess_config());
            bare
        };
        scheduler
            .spawn(vpp_controller(
                scheduler.handle(),
                Rc::clone(&registry),
                "TEST_VPP".into(),
                vec![bare],
            ))
            .detach();

        // Must not panic; the entity is simply not updated.
        sample(&scheduler, 1.0, -0.2);
        assert!(registry.borrow().get::<PhysicalState>(bare).is_none());
    }
}
