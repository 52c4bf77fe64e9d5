//! TOML-based scenario configuration and preset definitions.

use std::fmt;
use std::fs;
use std::path::Path;

use serde::Deserialize;

/// Top-level scenario configuration parsed from TOML.
///
/// All fields have defaults matching the reference scenario. Load from
/// TOML with [`ScenarioConfig::from_toml_file`] or use
/// [`ScenarioConfig::reference`] for the built-in default.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScenarioConfig {
    /// Simulation timing and global parameters.
    #[serde(default)]
    pub simulation: SimulationConfig,
    /// Protection settings for the transmission line.
    #[serde(default)]
    pub line: LineProtectionConfig,
    /// Protection settings for the transformer.
    #[serde(default)]
    pub transformer: TransformerProtectionConfig,
    /// EV charging pile fleet parameters.
    #[serde(default)]
    pub ev_fleet: EvFleetConfig,
    /// Stationary storage fleet parameters.
    #[serde(default)]
    pub ess_fleet: EssFleetConfig,
    /// Fault injection schedule.
    #[serde(default = "default_faults")]
    pub faults: Vec<FaultConfig>,
}

/// Simulation timing and global parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SimulationConfig {
    /// Oracle sampling step in milliseconds (must be > 0).
    pub step_ms: u64,
    /// Virtual time at which the frequency disturbance begins, in seconds.
    pub disturbance_start_s: f64,
    /// Simulated horizon in milliseconds (must be > 0).
    pub horizon_ms: u64,
    /// Master random seed (initial SOC draws).
    pub seed: u64,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            step_ms: 20,
            disturbance_start_s: 5.0,
            horizon_ms: 70_000,
            seed: 42,
        }
    }
}

/// Protection settings for the transmission line.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LineProtectionConfig {
    /// Over-current pick-up threshold (kA).
    pub oc_pickup_ka: f64,
    /// Over-current trip delay (ms).
    pub oc_delay_ms: i32,
    /// Over-current stage label.
    pub oc_stage: String,
    /// Distance zone reaches, non-decreasing (ohm).
    pub z_set: [f64; 3],
    /// Distance zone trip delays (ms).
    pub t_ms: [i32; 3],
}

impl Default for LineProtectionConfig {
    fn default() -> Self {
        Self {
            oc_pickup_ka: 5.0,
            oc_delay_ms: 200,
            oc_stage: "OC-L1P-Fast".to_string(),
            z_set: [5.0, 15.0, 25.0],
            t_ms: [0, 300, 700],
        }
    }
}

/// Protection settings for the transformer.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TransformerProtectionConfig {
    /// Over-current pick-up threshold (kA).
    pub oc_pickup_ka: f64,
    /// Over-current trip delay (ms).
    pub oc_delay_ms: i32,
    /// Over-current stage label.
    pub oc_stage: String,
}

impl Default for TransformerProtectionConfig {
    fn default() -> Self {
        Self {
            oc_pickup_ka: 2.5,
            oc_delay_ms: 300,
            oc_stage: "OC-T1P-Main".to_string(),
        }
    }
}

/// EV charging pile fleet parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EvFleetConfig {
    /// Number of charging stations.
    pub stations: usize,
    /// Piles per station.
    pub piles_per_station: usize,
    /// Scheduled charging power cycled across piles (kW; negative charges).
    pub base_power_pattern_kw: Vec<f64>,
    /// Response gain (kW per Hz).
    pub gain_kw_per_hz: f64,
    /// Deadband around nominal frequency (Hz).
    pub deadband_hz: f64,
    /// Maximum output (kW, discharging).
    pub max_output_kw: f64,
    /// Minimum output (kW, charging).
    pub min_output_kw: f64,
    /// SOC floor below which piles refuse to discharge.
    pub soc_min_threshold: f64,
    /// SOC ceiling above which piles refuse to charge.
    pub soc_max_threshold: f64,
    /// Lower bound of the initial SOC draw.
    pub initial_soc_min: f64,
    /// Upper bound of the initial SOC draw.
    pub initial_soc_max: f64,
}

impl Default for EvFleetConfig {
    fn default() -> Self {
        Self {
            stations: 10,
            piles_per_station: 5,
            base_power_pattern_kw: vec![-5.0, -3.5, 0.0],
            gain_kw_per_hz: 4.0,
            deadband_hz: 0.03,
            max_output_kw: 5.0,
            min_output_kw: -5.0,
            soc_min_threshold: 0.1,
            soc_max_threshold: 0.95,
            initial_soc_min: 0.25,
            initial_soc_max: 0.9,
        }
    }
}

impl EvFleetConfig {
    /// Total number of piles.
    pub fn total_piles(&self) -> usize {
        self.stations * self.piles_per_station
    }
}

/// Stationary storage fleet parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct EssFleetConfig {
    /// Number of storage units.
    pub units: usize,
    /// Rated power per unit (kW), used as the output limit and in the
    /// droop-gain calculation.
    pub rated_power_kw: f64,
    /// Droop setting (fraction of nominal frequency for full output).
    pub droop: f64,
    /// Nominal grid frequency (Hz).
    pub nominal_frequency_hz: f64,
    /// Deadband around nominal frequency (Hz).
    pub deadband_hz: f64,
    /// SOC floor.
    pub soc_min_threshold: f64,
    /// SOC ceiling.
    pub soc_max_threshold: f64,
    /// Initial SOC for every unit.
    pub initial_soc: f64,
}

impl Default for EssFleetConfig {
    fn default() -> Self {
        Self {
            units: 100,
            rated_power_kw: 1000.0,
            droop: 0.03,
            nominal_frequency_hz: 50.0,
            deadband_hz: 0.03,
            soc_min_threshold: 0.05,
            soc_max_threshold: 0.95,
            initial_soc: 0.7,
        }
    }
}

impl EssFleetConfig {
    /// Droop gain: rated power over the frequency excursion that should
    /// produce it.
    pub fn gain_kw_per_hz(&self) -> f64 {
        self.rated_power_kw / (self.droop * self.nominal_frequency_hz)
    }
}

/// Which protected plant a fault lands on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FaultTarget {
    Line,
    Transformer,
}

/// One entry of the fault injection schedule.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FaultConfig {
    /// Virtual time of injection (ms).
    pub at_ms: u64,
    /// Faulted plant.
    pub target: FaultTarget,
    /// Fault current (kA).
    pub current_ka: f64,
    /// System voltage (kV).
    #[serde(default = "default_voltage_kv")]
    pub voltage_kv: f64,
    /// Measured impedance (ohm); zero means derive from voltage/current.
    #[serde(default)]
    pub impedance_ohm: f64,
    /// Distance to the fault (km).
    #[serde(default)]
    pub distance_km: f64,
}

fn default_voltage_kv() -> f64 {
    220.0
}

fn default_faults() -> Vec<FaultConfig> {
    vec![
        FaultConfig {
            at_ms: 6000,
            target: FaultTarget::Line,
            current_ka: 15.0,
            voltage_kv: 220.0,
            impedance_ohm: (220.0 / 15.0) * 0.8,
            distance_km: 10.0,
        },
        FaultConfig {
            at_ms: 13_000,
            target: FaultTarget::Transformer,
            current_ka: 3.0,
            voltage_kv: 220.0,
            impedance_ohm: 0.0,
            distance_km: 0.0,
        },
    ]
}

/// A configuration problem: which field, and what is wrong with it.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "config error: {}: {}", self.field, self.message)
    }
}

impl std::error::Error for ConfigError {}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self::reference()
    }
}

impl ScenarioConfig {
    /// The reference run: both faults injected, full fleet responding.
    pub fn reference() -> Self {
        Self {
            simulation: SimulationConfig::default(),
            line: LineProtectionConfig::default(),
            transformer: TransformerProtectionConfig::default(),
            ev_fleet: EvFleetConfig::default(),
            ess_fleet: EssFleetConfig::default(),
            faults: default_faults(),
        }
    }

    /// Frequency response only: no faults are injected.
    pub fn frequency_only() -> Self {
        Self {
            faults: Vec::new(),
            ..Self::reference()
        }
    }

    /// Protection only: no managed devices, so the oracle logs zero power.
    pub fn protection_only() -> Self {
        Self {
            ev_fleet: EvFleetConfig {
                stations: 0,
                ..EvFleetConfig::default()
            },
            ess_fleet: EssFleetConfig {
                units: 0,
                ..EssFleetConfig::default()
            },
            ..Self::reference()
        }
    }

    /// Available preset names.
    pub const PRESETS: &[&str] = &["reference", "frequency_only", "protection_only"];

    /// Loads a scenario from a named preset.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the preset name is unknown.
    pub fn from_preset(name: &str) -> Result<Self, ConfigError> {
        match name {
            "reference" => Ok(Self::reference()),
            "frequency_only" => Ok(Self::frequency_only()),
            "protection_only" => Ok(Self::protection_only()),
            _ => Err(ConfigError {
                field: "preset".to_string(),
                message: format!(
                    "unknown preset \"{name}\", available: {}",
                    Self::PRESETS.join(", ")
                ),
            }),
        }
    }

    /// Parses a scenario from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the file cannot be read or the TOML is
    /// invalid.
    pub fn from_toml_file(path: &Path) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path).map_err(|e| ConfigError {
            field: "scenario".to_string(),
            message: format!("cannot read \"{}\": {e}", path.display()),
        })?;
        Self::from_toml_str(&content)
    }

    /// Parses a scenario from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns a `ConfigError` if the TOML is invalid or contains unknown
    /// fields.
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        toml::from_str(s).map_err(|e| ConfigError {
            field: "toml".to_string(),
            message: e.to_string(),
        })
    }

    /// Validates all fields and returns a list of errors.
    ///
    /// Returns an empty vector if the configuration is valid.
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();
        let push = |errors: &mut Vec<ConfigError>, field: &str, message: &str| {
            errors.push(ConfigError {
                field: field.to_string(),
                message: message.to_string(),
            });
        };

        if self.simulation.step_ms == 0 {
            push(&mut errors, "simulation.step_ms", "must be > 0");
        }
        if self.simulation.horizon_ms == 0 {
            push(&mut errors, "simulation.horizon_ms", "must be > 0");
        }
        if self.simulation.disturbance_start_s < 0.0 {
            push(&mut errors, "simulation.disturbance_start_s", "must be >= 0");
        }

        let line = &self.line;
        if !(line.z_set[0] <= line.z_set[1] && line.z_set[1] <= line.z_set[2]) {
            push(&mut errors, "line.z_set", "zone reaches must be non-decreasing");
        }
        if line.oc_pickup_ka <= 0.0 {
            push(&mut errors, "line.oc_pickup_ka", "must be > 0");
        }
        if self.transformer.oc_pickup_ka <= 0.0 {
            push(&mut errors, "transformer.oc_pickup_ka", "must be > 0");
        }

        let ev = &self.ev_fleet;
        if ev.total_piles() > 0 && ev.base_power_pattern_kw.is_empty() {
            push(
                &mut errors,
                "ev_fleet.base_power_pattern_kw",
                "must not be empty when piles exist",
            );
        }
        if ev.min_output_kw > ev.max_output_kw {
            push(&mut errors, "ev_fleet.min_output_kw", "must be <= max_output_kw");
        }
        if !(0.0..=1.0).contains(&ev.soc_min_threshold)
            || !(0.0..=1.0).contains(&ev.soc_max_threshold)
            || ev.soc_min_threshold > ev.soc_max_threshold
        {
            push(
                &mut errors,
                "ev_fleet.soc_min_threshold",
                "thresholds must be an ordered pair within [0, 1]",
            );
        }
        if !(0.0..=1.0).contains(&ev.initial_soc_min)
            || !(0.0..=1.0).contains(&ev.initial_soc_max)
            || ev.initial_soc_min >= ev.initial_soc_max
        {
            push(
                &mut errors,
                "ev_fleet.initial_soc_min",
                "initial SOC range must be an ordered pair within [0, 1]",
            );
        }

        let ess = &self.ess_fleet;
        if ess.units > 0 {
            if ess.rated_power_kw <= 0.0 {
                push(&mut errors, "ess_fleet.rated_power_kw", "must be > 0");
            }
            if ess.droop <= 0.0 {
                push(&mut errors, "ess_fleet.droop", "must be > 0");
            }
            if ess.nominal_frequency_hz <= 0.0 {
                push(&mut errors, "ess_fleet.nominal_frequency_hz", "must be > 0");
            }
            if !(0.0..=1.0).contains(&ess.initial_soc) {
                push(&mut errors, "ess_fleet.initial_soc", "must be within [0, 1]");
            }
        }

        for (i, fault) in self.faults.iter().enumerate() {
            if fault.current_ka < 0.0 {
                push(
                    &mut errors,
                    &format!("faults[{i}].current_ka"),
                    "must be >= 0",
                );
            }
            if fault.at_ms >= self.simulation.horizon_ms {
                push(
                    &mut errors,
                    &format!("faults[{i}].at_ms"),
                    "must be within the simulated horizon",
                );
            }
        }

        errors
    }
}
