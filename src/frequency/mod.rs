//! Frequency-response VPP: device components, the analytic disturbance
//! model, the sampling oracle, and the per-population controllers.

pub mod components;
pub mod deviation;
pub mod oracle;
pub mod vpp;

pub use components::{DeviceKind, FrequencyControl, PhysicalState};
pub use deviation::frequency_deviation;
pub use oracle::{frequency_oracle, total_power_kw};
pub use vpp::{vpp_controller, FREQ_CHANGE_THRESHOLD_HZ, TIME_THRESHOLD_S};
