//! Well-known event ids and the payloads carried on the event bus.

use crate::ecs::Entity;
use crate::kernel::EventId;

/// Generator finished its startup sequence. No payload.
pub const GENERATOR_READY_EVENT: EventId = 1;
/// System load changed. No payload.
pub const LOAD_CHANGE_EVENT: EventId = 2;
/// A breaker finished opening. Payload: the breaker's [`Entity`].
pub const BREAKER_OPENED_EVENT: EventId = 6;
/// Operating point drifted toward instability. No payload.
pub const STABILITY_CONCERN_EVENT: EventId = 7;
/// Request to shed load. No payload.
pub const LOAD_SHED_REQUEST_EVENT: EventId = 8;
/// Request to adjust generator output. No payload.
pub const POWER_ADJUST_REQUEST_EVENT: EventId = 9;
/// A fault was injected. Payload: [`FaultInfo`].
pub const FAULT_INFO_EVENT: EventId = 100;
/// A protective relay timed out and is tripping. Payload: the protected
/// [`Entity`].
pub const ENTITY_TRIP_EVENT: EventId = 101;
/// A fresh grid-frequency sample. Payload: [`FrequencyInfo`].
pub const FREQUENCY_UPDATE_EVENT: EventId = 200;

/// Electrical description of an injected fault.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaultInfo {
    /// Fault current in kA.
    pub current_ka: f64,
    /// System voltage in kV.
    pub voltage_kv: f64,
    /// Apparent impedance seen from the relay location, in ohms. Zero means
    /// "not measured"; see [`FaultInfo::derive_impedance`].
    pub impedance_ohm: f64,
    /// Distance to the fault along the protected line, in km.
    pub distance_km: f64,
    /// The faulted entity, or [`Entity::NONE`] when not attributable.
    pub faulty_entity: Entity,
}

impl Default for FaultInfo {
    fn default() -> Self {
        FaultInfo {
            current_ka: 0.0,
            voltage_kv: 220.0,
            impedance_ohm: 0.0,
            distance_km: 0.0,
            faulty_entity: Entity::NONE,
        }
    }
}

impl FaultInfo {
    /// Fills in the impedance from voltage and current when it was not
    /// measured directly. kV over kA cancels to ohms.
    pub fn derive_impedance(&mut self) {
        if self.impedance_ohm == 0.0 && self.voltage_kv > 0.0 && self.current_ka > 0.0 {
            self.impedance_ohm = self.voltage_kv / self.current_ka;
        }
    }
}

/// One grid-frequency sample published by the oracle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyInfo {
    /// Virtual time of the sample, in seconds.
    pub sim_time_s: f64,
    /// Deviation from nominal frequency, in Hz. Negative means
    /// under-frequency.
    pub freq_deviation_hz: f64,
}
