//! Discrete-event co-simulation of a cyber-physical power system.
//!
//! A cooperative virtual-time kernel runs two domain subsystems over a
//! shared entity-component store: fault protection (relays, a fan-out
//! engine, breaker agents) and a frequency-response virtual power plant
//! (a sampling oracle and per-population controllers).

pub mod config;
pub mod ecs;
pub mod events;
pub mod frequency;
pub mod kernel;
pub mod protection;
pub mod scenario;
pub mod telemetry;
