//! Components carried by frequency-responsive devices.

use crate::ecs::Component;

/// Kind of aggregated device, with its bookkeeping battery capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceKind {
    /// EV charging pile.
    EvPile,
    /// Stationary energy storage unit.
    EssUnit,
}

impl DeviceKind {
    /// Nominal battery capacity used for SOC integration. A fleet-typical
    /// value per kind, not a per-device rating.
    pub fn default_capacity_kwh(self) -> f64 {
        match self {
            DeviceKind::EvPile => 50.0,
            DeviceKind::EssUnit => 2000.0,
        }
    }
}

/// Live electrical state of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct PhysicalState {
    /// Present output in kW. Positive discharges into the grid, negative
    /// charges from it.
    pub current_power_kw: f64,
    /// State of charge, normalised to `[0, 1]`.
    pub soc: f64,
}

impl Component for PhysicalState {}

impl PhysicalState {
    /// # Panics
    ///
    /// Panics if `soc` is outside `[0, 1]`.
    pub fn new(current_power_kw: f64, soc: f64) -> Self {
        assert!((0.0..=1.0).contains(&soc), "soc must be within [0, 1]");
        PhysicalState {
            current_power_kw,
            soc,
        }
    }
}

/// Droop-style frequency response parameters for one device.
#[derive(Debug, Clone, PartialEq)]
pub struct FrequencyControl {
    pub kind: DeviceKind,
    /// Scheduled output when frequency is inside the deadband, in kW.
    pub base_power_kw: f64,
    /// Response gain in kW per Hz of effective deviation.
    pub gain_kw_per_hz: f64,
    /// Symmetric no-response band around nominal frequency, in Hz.
    pub deadband_hz: f64,
    pub max_output_kw: f64,
    pub min_output_kw: f64,
    /// Below this SOC a pile will not discharge.
    pub soc_min_threshold: f64,
    /// Above this SOC a pile will not charge.
    pub soc_max_threshold: f64,
}

impl Component for FrequencyControl {}
