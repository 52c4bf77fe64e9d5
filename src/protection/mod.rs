//! Fault protection: relay policies, the fault fan-out engine, and breaker
//! agents.

pub mod breaker;
pub mod engine;
pub mod relays;

pub use breaker::{breaker_agent, BREAKER_OPERATING_DELAY};
pub use engine::ProtectionEngine;
pub use relays::{ProtectionSuite, Relay, NO_TRIP_DELAY_MS};
