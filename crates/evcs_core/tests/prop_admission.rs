//! Property tests for station admission and battery accounting
//!
//! - Capacity: occupancy never exceeds the slot count
//! - Uniqueness: a vehicle holds at most one slot
//! - Idempotence: completing twice changes nothing
//! - Clamping: stored energy stays within [0, capacity]

use std::net::Ipv4Addr;

use evcs_core::*;
use proptest::prelude::*;
use rand::SeedableRng;
use rand::rngs::StdRng;

// ============================================================================
// Strategies
// ============================================================================

#[derive(Debug, Clone)]
enum Op {
    Request(usize),
    Complete(usize),
    Tick,
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..8).prop_map(Op::Request),
        (0usize..8).prop_map(Op::Complete),
        Just(Op::Tick),
    ]
}

fn station(max_slots: u32, initial_soc: f64) -> ChargingStation {
    let config = StationConfig {
        id: "cs[0]".into(),
        address: Ipv4Addr::new(10, 0, 0, 1),
        waypoint: "CS".into(),
        max_slots,
        battery_capacity_wh: 500.0,
        initial_soc,
        charging_power_w: 50_000.0,
        grid_recharge_power_w: 20_000.0,
    };
    ChargingStation::new(
        &config,
        GroupConfig::default(),
        RadioConfig::default().receive(),
        1.0,
        StdRng::seed_from_u64(0),
    )
}

// ============================================================================
// Admission Property Tests
// ============================================================================

proptest! {
    /// CORE INVARIANT: |occupancy| <= maxSlots after every operation
    #[test]
    fn occupancy_never_exceeds_slots(
        max_slots in 1u32..5,
        ops in prop::collection::vec(op(), 1..200)
    ) {
        let mut station = station(max_slots, 0.5);
        let mut out = Outbox::new();

        for op in ops {
            match op {
                Op::Request(idx) => {
                    station.handle_charge_request(SimTime::ZERO, VehicleId::from_index(idx), 0.1, &mut out);
                }
                Op::Complete(idx) => {
                    station.handle_charge_complete(&VehicleId::from_index(idx));
                }
                Op::Tick => station.on_battery_tick(),
            }
            prop_assert!(station.in_use() <= max_slots as usize);
            prop_assert_eq!(station.check_invariants(), Ok(()));
        }
    }

    /// A granted request always leaves the vehicle in occupancy exactly once
    #[test]
    fn verdict_matches_occupancy(
        max_slots in 1u32..4,
        requests in prop::collection::vec(0usize..6, 1..50)
    ) {
        let mut station = station(max_slots, 0.5);
        let mut out = Outbox::new();

        for idx in requests {
            let id = VehicleId::from_index(idx);
            let before = station.in_use();
            let held = station.sessions().contains_key(&id);
            let verdict = station.handle_charge_request(SimTime::ZERO, id.clone(), 0.1, &mut out);

            match verdict {
                Verdict::Available => {
                    prop_assert!(station.sessions().contains_key(&id));
                    let expected = if held { before } else { before + 1 };
                    prop_assert_eq!(station.in_use(), expected);
                }
                Verdict::Busy => {
                    prop_assert!(!held);
                    prop_assert_eq!(before, max_slots as usize);
                    prop_assert_eq!(station.in_use(), before);
                }
            }
        }
    }

    /// Completing a vehicle twice is the same as completing it once
    #[test]
    fn completion_is_idempotent(
        admitted in prop::collection::vec(0usize..6, 0..6),
        target in 0usize..6
    ) {
        let mut station = station(6, 0.5);
        let mut out = Outbox::new();
        for idx in admitted {
            station.handle_charge_request(SimTime::ZERO, VehicleId::from_index(idx), 0.1, &mut out);
        }

        let id = VehicleId::from_index(target);
        station.handle_charge_complete(&id);
        let after_once: Vec<VehicleId> = station.sessions().keys().cloned().collect();
        prop_assert!(station.handle_charge_complete(&id).is_none());
        let after_twice: Vec<VehicleId> = station.sessions().keys().cloned().collect();
        prop_assert_eq!(after_once, after_twice);
    }
}

// ============================================================================
// Battery Property Tests
// ============================================================================

proptest! {
    /// Stored energy stays clamped and SoC stays in [0, 1]
    #[test]
    fn battery_stays_clamped(
        capacity in 1.0f64..10_000.0,
        initial_soc in 0.0f64..=1.0,
        deltas in prop::collection::vec(-5_000.0f64..5_000.0, 1..100)
    ) {
        let mut battery = Battery::new(capacity, initial_soc);
        for delta in deltas {
            battery.apply(delta);
            prop_assert!(battery.stored_wh() >= 0.0);
            prop_assert!(battery.stored_wh() <= battery.capacity_wh());
            prop_assert!((0.0..=1.0).contains(&battery.soc()));
        }
    }

    /// Station battery stays clamped whatever the occupancy
    #[test]
    fn station_battery_stays_clamped(
        initial_soc in 0.0f64..=1.0,
        occupied in 0usize..4,
        ticks in 1usize..200
    ) {
        let mut station = station(4, initial_soc);
        let mut out = Outbox::new();
        for idx in 0..occupied {
            station.handle_charge_request(SimTime::ZERO, VehicleId::from_index(idx), 0.1, &mut out);
        }
        for _ in 0..ticks {
            station.on_battery_tick();
            let battery = station.battery();
            prop_assert!((0.0..=battery.capacity_wh()).contains(&battery.stored_wh()));
        }
    }
}
