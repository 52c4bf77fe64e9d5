//! Protective relay policies.
//!
//! A relay answers two questions about a fault: does it pick up, and after
//! what delay does it trip. Selectivity between relays comes purely from
//! the delays (time-graded coordination); nothing here cancels a
//! competing relay.

use crate::ecs::{Component, Entity};
use crate::events::FaultInfo;

/// Trip delay returned when a distance relay sees the fault outside all of
/// its zones. Long enough that such a trip never fires within a run.
pub const NO_TRIP_DELAY_MS: i32 = 99_999;

/// One protective element, dispatched by variant.
#[derive(Debug, Clone)]
pub enum Relay {
    /// Definite-time over-current stage: picks up at or above a current
    /// threshold and trips after a fixed delay.
    OverCurrent {
        pickup_ka: f64,
        delay_ms: i32,
        stage: String,
    },
    /// Three-zone distance scheme: reach thresholds expressed as impedance,
    /// smallest zone fastest. Zone 3 doubles as remote backup.
    Distance { z_set: [f64; 3], t_ms: [i32; 3] },
}

impl Relay {
    /// An over-current stage named after its coordination role
    /// (e.g. fast, main).
    pub fn over_current(pickup_ka: f64, delay_ms: i32, stage: impl Into<String>) -> Self {
        Relay::OverCurrent {
            pickup_ka,
            delay_ms,
            stage: stage.into(),
        }
    }

    /// A distance scheme from zone reaches and their delays.
    ///
    /// # Panics
    ///
    /// Panics if the zone reaches are not non-decreasing.
    pub fn distance(z_set: [f64; 3], t_ms: [i32; 3]) -> Self {
        assert!(
            z_set[0] <= z_set[1] && z_set[1] <= z_set[2],
            "distance zone reaches must be non-decreasing"
        );
        Relay::Distance { z_set, t_ms }
    }

    /// Whether this relay picks up on `fault` while protecting
    /// `self_entity`.
    ///
    /// A distance relay looking at a fault on some other entity only picks
    /// up in its backup zone (zone 3); over-current stages do not
    /// discriminate by location.
    pub fn picks_up(&self, fault: &FaultInfo, self_entity: Entity) -> bool {
        match self {
            Relay::OverCurrent { pickup_ka, .. } => fault.current_ka >= *pickup_ka,
            Relay::Distance { z_set, .. } => {
                let remote =
                    fault.faulty_entity != self_entity && fault.faulty_entity != Entity::NONE;
                if remote {
                    fault.impedance_ohm <= z_set[2]
                } else {
                    z_set.iter().any(|&reach| fault.impedance_ohm <= reach)
                }
            }
        }
    }

    /// Trip delay for `fault`, in milliseconds.
    ///
    /// Over-current stages use their fixed delay. Distance schemes use the
    /// delay of the smallest zone containing the fault impedance, or
    /// [`NO_TRIP_DELAY_MS`] outside every zone.
    pub fn trip_delay_ms(&self, fault: &FaultInfo) -> i32 {
        match self {
            Relay::OverCurrent { delay_ms, .. } => *delay_ms,
            Relay::Distance { z_set, t_ms } => {
                for (reach, delay) in z_set.iter().zip(t_ms) {
                    if fault.impedance_ohm <= *reach {
                        return *delay;
                    }
                }
                NO_TRIP_DELAY_MS
            }
        }
    }

    /// Short label used in logs.
    pub fn name(&self) -> &str {
        match self {
            Relay::OverCurrent { stage, .. } => stage,
            Relay::Distance { .. } => "DIST",
        }
    }
}

/// The set of relays protecting one entity.
///
/// Stored as a single component so that an entity can carry several stages
/// (say a fast and a main over-current stage) alongside a distance scheme.
#[derive(Debug, Clone, Default)]
pub struct ProtectionSuite {
    relays: Vec<Relay>,
}

impl Component for ProtectionSuite {}

impl ProtectionSuite {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style addition of one relay.
    pub fn with(mut self, relay: Relay) -> Self {
        self.relays.push(relay);
        self
    }

    pub fn relays(&self) -> &[Relay] {
        &self.relays
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fault(current_ka: f64, impedance_ohm: f64, faulty: Entity) -> FaultInfo {
        FaultInfo {
            current_ka,
            impedance_ohm,
            faulty_entity: faulty,
            ..FaultInfo::default()
        }
    }

    fn line() -> Entity {
        let mut registry = crate::ecs::Registry::new();
        registry.create()
    }

    #[test]
    fn over_current_picks_up_at_threshold() {
        let relay = Relay::over_current(5.0, 200, "OC-L1P-Fast");
        let e = line();
        assert!(relay.picks_up(&fault(5.0, 0.0, e), e));
        assert!(relay.picks_up(&fault(15.0, 0.0, e), e));
        assert!(!relay.picks_up(&fault(4.999, 0.0, e), e));
    }

    #[test]
    fn over_current_delay_is_fixed() {
        let relay = Relay::over_current(2.5, 300, "OC-T1P-Main");
        let e = line();
        assert_eq!(relay.trip_delay_ms(&fault(3.0, 73.3, e)), 300);
        assert_eq!(relay.name(), "OC-T1P-Main");
    }

    #[test]
    fn distance_zone_delays_grade_outward() {
        let relay = Relay::distance([5.0, 15.0, 25.0], [0, 300, 700]);
        let e = line();
        assert_eq!(relay.trip_delay_ms(&fault(0.0, 4.0, e)), 0);
        assert_eq!(relay.trip_delay_ms(&fault(0.0, 11.73, e)), 300);
        assert_eq!(relay.trip_delay_ms(&fault(0.0, 20.0, e)), 700);
        assert_eq!(relay.trip_delay_ms(&fault(0.0, 30.0, e)), NO_TRIP_DELAY_MS);
    }

    #[test]
    fn zone_boundaries_are_inclusive() {
        let relay = Relay::distance([5.0, 15.0, 25.0], [0, 300, 700]);
        let e = line();
        assert_eq!(relay.trip_delay_ms(&fault(0.0, 5.0, e)), 0);
        assert_eq!(relay.trip_delay_ms(&fault(0.0, 15.0, e)), 300);
        assert_eq!(relay.trip_delay_ms(&fault(0.0, 25.0, e)), 700);
    }

    #[test]
    fn unmeasured_impedance_reads_as_zone_one() {
        // A fault record with zero current carries impedance 0, which sits
        // inside zone 1.
        let relay = Relay::distance([5.0, 15.0, 25.0], [0, 300, 700]);
        let e = line();
        let f = fault(0.0, 0.0, e);
        assert!(relay.picks_up(&f, e));
        assert_eq!(relay.trip_delay_ms(&f), 0);
    }

    #[test]
    fn remote_fault_only_picked_up_in_backup_zone() {
        let relay = Relay::distance([5.0, 15.0, 25.0], [0, 300, 700]);
        let mut registry = crate::ecs::Registry::new();
        let own = registry.create();
        let other = registry.create();

        // Inside zone 3: backup pick-up with the zone 3 delay.
        let backup = fault(0.0, 20.0, other);
        assert!(relay.picks_up(&backup, own));
        assert_eq!(relay.trip_delay_ms(&backup), 700);

        // Beyond zone 3: stays quiet.
        assert!(!relay.picks_up(&fault(0.0, 26.0, other), own));
    }

    #[test]
    fn unattributed_fault_uses_local_zones() {
        let relay = Relay::distance([5.0, 15.0, 25.0], [0, 300, 700]);
        let e = line();
        assert!(relay.picks_up(&fault(0.0, 4.0, Entity::NONE), e));
    }

    #[test]
    #[should_panic(expected = "non-decreasing")]
    fn decreasing_zone_reaches_are_rejected() {
        let _ = Relay::distance([25.0, 15.0, 5.0], [0, 300, 700]);
    }

    #[test]
    fn suite_keeps_relays_in_insertion_order() {
        let suite = ProtectionSuite::new()
            .with(Relay::over_current(5.0, 200, "OC-L1P-Fast"))
            .with(Relay::distance([5.0, 15.0, 25.0], [0, 300, 700]));
        let names: Vec<&str> = suite.relays().iter().map(Relay::name).collect();
        assert_eq!(names, vec!["OC-L1P-Fast", "DIST"]);
    }
}
