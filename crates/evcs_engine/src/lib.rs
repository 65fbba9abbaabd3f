//! Single-threaded discrete-event runtime for the charging protocol.
//!
//! Every agent (vehicles, the charging station, roadside units and traffic
//! injectors) is a node on one simulated [`Network`]. The [`Engine`] owns the
//! global clock, feeds timers and deliveries to the agents one at a time and
//! turns their [`Outbox`] effects back into scheduled events.

mod scheduler;
mod traffic;

pub use crate::scheduler::*;
pub use crate::traffic::*;

use std::net::Ipv4Addr;

use evcs_core::{
    AgentInput, ChargingStation, ConfigError, Effect, Envelope, InvariantViolation, Mobility,
    Network, NodeId, Outbox, RoadsideStatus, RoadsideUnit, ScenarioConfig, SimTime,
    StationEvent, StationStatus, Timer, Transition, TransportStats, Vehicle, VehicleId,
    VehicleParams, VehicleStatus, WaypointMobility,
};
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Vehicles get consecutive addresses after this one.
const VEHICLE_SUBNET: Ipv4Addr = Ipv4Addr::new(10, 0, 1, 0);

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid scenario: {0}")]
    Config(#[from] ConfigError),
    #[error("Invariant violated at {time}: {violation}")]
    Invariant {
        time: SimTime,
        #[source]
        violation: InvariantViolation,
    },
    #[error("Simulation halted at {time} after an invariant violation")]
    Halted { time: SimTime },
    #[error("Vehicle {0} not found")]
    UnknownVehicle(VehicleId),
    #[error("Cannot advance the clock by {0} seconds")]
    InvalidDuration(f64),
}

/// One protocol-level step taken by an agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProtocolEvent {
    pub time_s: f64,
    pub agent: String,
    pub detail: ProtocolDetail,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ProtocolDetail {
    Vehicle(Transition),
    Station(StationEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub time_s: f64,
    pub station: StationStatus,
    pub vehicles: Vec<VehicleStatus>,
    pub roadside_units: Vec<RoadsideStatus>,
    pub injectors: Vec<InjectorStatus>,
    pub transport: TransportStats,
    pub protocol_events: usize,
}

/// What a [`NodeId`] stands for.
#[derive(Debug, Clone, Copy)]
enum Role {
    Station,
    Vehicle(usize),
    Roadside(usize),
    Injector(usize),
}

#[derive(Debug)]
pub struct Engine {
    config: ScenarioConfig,
    scheduler: Scheduler,
    network: Network,
    roles: Vec<Role>,
    station: ChargingStation,
    vehicles: Vec<Vehicle>,
    roadside: Vec<RoadsideUnit>,
    injectors: Vec<TrafficInjector>,
    history: Vec<ProtocolEvent>,
    halted: Option<SimTime>,
}

impl Engine {
    /// Validate the scenario, wire every agent to the network and arm their
    /// initial timers.
    pub fn new(config: ScenarioConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let params = VehicleParams::from_scenario(&config)?;
        let groups = config.groups;
        let seed = |offset: usize| StdRng::seed_from_u64(config.seed.wrapping_add(offset as u64));

        let mut network = Network::new();
        let mut roles = Vec::new();

        let station_node = network.register(config.station.address);
        network.join(station_node, groups.station);
        network.join(station_node, groups.vehicles);
        roles.push(Role::Station);
        let station = ChargingStation::new(
            &config.station,
            groups,
            config.radio.receive(),
            config.tick_period_s,
            seed(roles.len()),
        );

        let mut vehicles = Vec::with_capacity(config.vehicles.len());
        for (idx, vehicle) in config.vehicles.iter().enumerate() {
            let address = Ipv4Addr::from(u32::from(VEHICLE_SUBNET) + idx as u32 + 1);
            let node = network.register(address);
            network.join(node, groups.vehicles);
            network.join(node, groups.station);
            network.accept_only(node, [groups.vehicles]);
            roles.push(Role::Vehicle(idx));

            let start = config.waypoint(&vehicle.start)?;
            let mut mobility =
                WaypointMobility::new(start.position, config.vehicle_profile.cruise_speed_mps);
            if let Some(destination) = &vehicle.destination {
                mobility.reroute(&config.waypoint(destination)?);
            }
            vehicles.push(Vehicle::new(
                VehicleId::from_index(idx),
                params.clone(),
                vehicle.initial_soc,
                vehicle.attacker,
                Box::new(mobility),
                seed(roles.len()),
            ));
        }

        let mut roadside = Vec::with_capacity(config.roadside_units.len());
        for unit in &config.roadside_units {
            let node = network.register(unit.address);
            network.join(node, groups.roadside);
            network.join(node, groups.vehicles);
            roles.push(Role::Roadside(roadside.len()));
            roadside.push(RoadsideUnit::new(
                unit.id.as_str(),
                config.radio.receive(),
                seed(roles.len()),
            ));
        }

        let mut injectors = Vec::with_capacity(config.injectors.len());
        for injector in &config.injectors {
            network.register(injector.source);
            roles.push(Role::Injector(injectors.len()));
            injectors.push(TrafficInjector::new(injector, &groups, seed(roles.len())));
        }

        let mut engine = Engine {
            config,
            scheduler: Scheduler::new(),
            network,
            roles,
            station,
            vehicles,
            roadside,
            injectors,
            history: Vec::new(),
            halted: None,
        };
        engine.start();

        tracing::info!(
            seed = engine.config.seed,
            vehicles = engine.vehicles.len(),
            roadside_units = engine.roadside.len(),
            injectors = engine.injectors.len(),
            slots = engine.config.station.max_slots,
            "Simulation ready"
        );
        Ok(engine)
    }

    fn start(&mut self) {
        for idx in 0..self.roles.len() {
            let node = NodeId(idx);
            let mut out = Outbox::new();
            match self.roles[idx] {
                Role::Station => self.station.start(&mut out),
                Role::Vehicle(i) => self.vehicles[i].start(&mut out),
                Role::Roadside(_) => {}
                Role::Injector(i) => self.injectors[i].start(&mut out),
            }
            self.apply(node, &mut out);
        }
    }

    pub fn config(&self) -> &ScenarioConfig {
        &self.config
    }

    pub fn now(&self) -> SimTime {
        self.scheduler.now()
    }

    pub fn pending_events(&self) -> usize {
        self.scheduler.len()
    }

    /// Run the simulation forward by `seconds` and return the new time.
    pub fn advance(&mut self, seconds: f64) -> Result<SimTime, EngineError> {
        if !seconds.is_finite() || seconds < 0.0 {
            return Err(EngineError::InvalidDuration(seconds));
        }
        let until = self.now().after(seconds);
        self.run_until(until)
    }

    /// Run to the scenario's configured duration.
    pub fn run(&mut self) -> Result<RunSummary, EngineError> {
        self.run_until(SimTime::from_secs_f64(self.config.duration_s))?;
        Ok(self.summary())
    }

    pub fn run_until(&mut self, until: SimTime) -> Result<SimTime, EngineError> {
        if let Some(time) = self.halted {
            return Err(EngineError::Halted { time });
        }
        while let Some(event) = self.scheduler.pop_due(until) {
            if let Err(err) = self.dispatch(event) {
                self.halted = Some(self.now());
                tracing::error!(time = %self.now(), "{err}");
                return Err(err);
            }
        }
        self.scheduler.advance_to(until);
        Ok(self.now())
    }

    fn dispatch(&mut self, event: Event) -> Result<(), EngineError> {
        let node = event.node();
        let mut out = Outbox::new();
        let result = match &event {
            Event::Timer { timer, .. } => self.handle(node, AgentInput::Timer(*timer), &mut out),
            Event::Deliver { envelope, .. } => {
                self.handle(node, AgentInput::Deliver(envelope), &mut out)
            }
        };
        self.apply(node, &mut out);
        result
    }

    fn handle(
        &mut self,
        node: NodeId,
        input: AgentInput<'_>,
        out: &mut Outbox,
    ) -> Result<(), EngineError> {
        let now = self.now();
        let Some(role) = self.roles.get(node.0).copied() else {
            return Ok(());
        };
        match role {
            Role::Vehicle(idx) => {
                let vehicle = &mut self.vehicles[idx];
                if let AgentInput::Timer(Timer::BatteryTick) = input {
                    vehicle.mobility_mut().advance(self.config.tick_period_s);
                }
                for transition in vehicle.handle(now, input, out) {
                    let detail = ProtocolDetail::Vehicle(transition);
                    record(&mut self.history, now, vehicle.id().as_str(), detail);
                }
            }
            Role::Station => {
                if let Some(event) = self.station.handle(now, input, out) {
                    let detail = ProtocolDetail::Station(event);
                    record(&mut self.history, now, self.station.id(), detail);
                }
                self.station
                    .check_invariants()
                    .map_err(|violation| EngineError::Invariant { time: now, violation })?;
            }
            Role::Roadside(idx) => self.roadside[idx].handle(input),
            Role::Injector(idx) => self.injectors[idx].handle(now, input, out),
        }
        Ok(())
    }

    /// Turn an agent's effects into deliveries and timers.
    fn apply(&mut self, node: NodeId, out: &mut Outbox) {
        let now = self.now();
        for effect in out.drain() {
            match effect {
                Effect::Send { group, message } => {
                    let envelope = Envelope {
                        source: self.network.address(node).unwrap_or(Ipv4Addr::UNSPECIFIED),
                        group,
                        sent_at: now,
                        message,
                    };
                    for delivery in self.network.emit(Some(node), envelope) {
                        self.scheduler.schedule_at(
                            now,
                            Event::Deliver {
                                to: delivery.to,
                                envelope: delivery.envelope,
                            },
                        );
                    }
                }
                Effect::Schedule { delay_s, timer } => {
                    self.scheduler.schedule_in(delay_s, Event::Timer { node, timer });
                }
            }
        }
    }

    pub fn station_status(&self) -> StationStatus {
        self.station.status()
    }

    pub fn vehicles(&self) -> Vec<VehicleStatus> {
        self.vehicles.iter().map(Vehicle::status).collect()
    }

    pub fn vehicle_status(&self, vehicle_id: &VehicleId) -> Result<VehicleStatus, EngineError> {
        self.vehicles
            .iter()
            .find(|vehicle| vehicle.id() == vehicle_id)
            .map(Vehicle::status)
            .ok_or_else(|| EngineError::UnknownVehicle(vehicle_id.clone()))
    }

    pub fn roadside_units(&self) -> Vec<RoadsideStatus> {
        self.roadside.iter().map(RoadsideUnit::status).collect()
    }

    pub fn injectors(&self) -> Vec<InjectorStatus> {
        self.injectors.iter().map(TrafficInjector::status).collect()
    }

    pub fn transport_stats(&self) -> TransportStats {
        self.network.stats()
    }

    /// Protocol events recorded from index `since` onwards.
    pub fn history(&self, since: usize) -> &[ProtocolEvent] {
        &self.history[since.min(self.history.len())..]
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            time_s: self.now().as_secs_f64(),
            station: self.station_status(),
            vehicles: self.vehicles(),
            roadside_units: self.roadside_units(),
            injectors: self.injectors(),
            transport: self.transport_stats(),
            protocol_events: self.history.len(),
        }
    }
}

fn record(history: &mut Vec<ProtocolEvent>, now: SimTime, agent: &str, detail: ProtocolDetail) {
    history.push(ProtocolEvent {
        time_s: now.as_secs_f64(),
        agent: agent.to_string(),
        detail,
    });
}

#[cfg(test)]
mod test {
    use super::*;
    use evcs_core::{ChargingPhase, InjectorConfig, RoadsideConfig, TrafficTarget};

    /// Vehicles parked at the station with a small, nearly empty battery.
    fn scenario(max_slots: u32, fleet: usize) -> ScenarioConfig {
        let mut config: ScenarioConfig = serde_json::from_value(serde_json::json!({
            "seed": 7,
            "durationS": 60,
            "waypoints": {
                "A0B0": {"x": 0, "y": 0},
                "A2B2": {"x": 400, "y": 400},
                "CS": {"x": 100, "y": 0}
            },
            "station": {
                "waypoint": "CS",
                "maxSlots": max_slots,
                "batteryCapacityWh": 100000,
                "chargingPowerW": 36000,
                "gridRechargePowerW": 36000
            },
            "vehicles": []
        }))
        .unwrap();

        let profile = &mut config.vehicle_profile;
        profile.battery_capacity_wh = 100.0;
        profile.energy_per_meter_wh = 0.0;
        profile.charging_power_w = 36_000.0;
        profile.beaconing = false;
        profile.roaming = Vec::new();

        config.vehicles = (0..fleet)
            .map(|_| {
                serde_json::from_value(serde_json::json!({"initialSoc": 0.1, "start": "CS"}))
                    .unwrap()
            })
            .collect();
        config
    }

    fn station_events(engine: &Engine) -> Vec<StationEvent> {
        engine
            .history(0)
            .iter()
            .filter_map(|event| match &event.detail {
                ProtocolDetail::Station(event) => Some(event.clone()),
                ProtocolDetail::Vehicle(_) => None,
            })
            .collect()
    }

    fn transitions(engine: &Engine, vehicle: &str) -> Vec<Transition> {
        engine
            .history(0)
            .iter()
            .filter(|event| event.agent == vehicle)
            .filter_map(|event| match &event.detail {
                ProtocolDetail::Vehicle(transition) => Some(transition.clone()),
                ProtocolDetail::Station(_) => None,
            })
            .collect()
    }

    fn admitted(idx: usize, in_use: usize) -> StationEvent {
        StationEvent::Admitted {
            vehicle_id: VehicleId::from_index(idx),
            in_use,
        }
    }

    fn rejected(idx: usize, in_use: usize) -> StationEvent {
        StationEvent::Rejected {
            vehicle_id: VehicleId::from_index(idx),
            in_use,
        }
    }

    fn position(events: &[StationEvent], wanted: impl Fn(&StationEvent) -> bool) -> usize {
        events.iter().position(wanted).unwrap()
    }

    #[test]
    fn test_single_slot_round_trip() {
        let mut engine = Engine::new(scenario(1, 2)).unwrap();
        engine.advance(40.0).unwrap();

        let events = station_events(&engine);
        assert_eq!(events[..2], [admitted(0, 1), rejected(1, 1)]);

        let ev0_released = position(&events, |event| {
            matches!(event, StationEvent::Released { vehicle_id, .. } if *vehicle_id == VehicleId::from_index(0))
        });
        let ev1_admitted = position(&events, |event| {
            matches!(event, StationEvent::Admitted { vehicle_id, .. } if *vehicle_id == VehicleId::from_index(1))
        });
        assert!(ev0_released < ev1_admitted);
        assert_eq!(events[ev1_admitted], admitted(1, 1));

        let ev1 = transitions(&engine, "ev[1]");
        assert!(ev1.contains(&Transition::Rejected));
        assert!(ev1.contains(&Transition::BackoffElapsed));
        assert!(ev1.iter().any(|t| matches!(t, Transition::ChargingCompleted { .. })));

        assert!(engine.station_status().sessions.is_empty());
        for vehicle in engine.vehicles() {
            assert_eq!(vehicle.phase, ChargingPhase::Idle);
            assert!(vehicle.soc > 0.99);
        }
    }

    #[test]
    fn test_responses_are_self_filtered() {
        let mut engine = Engine::new(scenario(1, 2)).unwrap();
        engine.advance(2.0).unwrap();

        // Both vehicles received the Available for ev[0]; only ev[0] acted on it.
        assert_eq!(
            engine.vehicle_status(&VehicleId::from_index(0)).unwrap().phase,
            ChargingPhase::Charging
        );
        assert_eq!(
            engine.vehicle_status(&VehicleId::from_index(1)).unwrap().phase,
            ChargingPhase::NeedsCharging
        );
        assert!(!transitions(&engine, "ev[1]").contains(&Transition::Admitted));
        assert!(engine.vehicles()[1].stats.packets_received >= 2);
    }

    #[test]
    fn test_two_slots_three_vehicles() {
        let mut engine = Engine::new(scenario(2, 3)).unwrap();
        for _ in 0..60 {
            engine.advance(1.0).unwrap();
            let sessions = engine.station_status().sessions;
            for vehicle in engine.vehicles() {
                if vehicle.phase == ChargingPhase::Charging {
                    assert!(
                        sessions.contains_key(&vehicle.vehicle_id),
                        "{} charging without a slot at {}",
                        vehicle.vehicle_id,
                        engine.now()
                    );
                }
            }
        }

        let events = station_events(&engine);
        assert_eq!(events[..3], [admitted(0, 1), admitted(1, 2), rejected(2, 2)]);

        let first_release = position(&events, |event| matches!(event, StationEvent::Released { .. }));
        let ev2_admitted = position(&events, |event| {
            matches!(event, StationEvent::Admitted { vehicle_id, .. } if *vehicle_id == VehicleId::from_index(2))
        });
        assert!(first_release < ev2_admitted);

        for event in &events {
            if let StationEvent::Admitted { in_use, .. } | StationEvent::Rejected { in_use, .. } = event {
                assert!(*in_use <= 2);
            }
        }
        let requests_sent = (0..3)
            .flat_map(|idx| transitions(&engine, &format!("ev[{idx}]")))
            .filter(|t| matches!(t, Transition::RequestSent { .. }))
            .count();
        assert_eq!(engine.station_status().requests_received, requests_sent as u64);
    }

    #[test]
    fn test_request_timeout_recovers() {
        let mut config = scenario(1, 1);
        // The station shares ev[0]'s address and drops its requests as its own.
        config.station.address = Ipv4Addr::new(10, 0, 1, 1);
        let mut engine = Engine::new(config).unwrap();
        engine.advance(7.0).unwrap();

        let ev0 = transitions(&engine, "ev[0]");
        let requests = ev0
            .iter()
            .filter(|t| matches!(t, Transition::RequestSent { .. }))
            .count();
        assert_eq!(requests, 2);
        assert_eq!(ev0.iter().filter(|t| **t == Transition::TimedOut).count(), 1);

        assert_eq!(engine.station_status().requests_received, 0);
        assert_eq!(engine.transport_stats().dropped_own_source, 2);
        assert!(engine.vehicles()[0].request_outstanding);
    }

    #[test]
    fn test_injected_traffic_and_local_echo() {
        let mut config = scenario(1, 0);
        config.roadside_units = vec![RoadsideConfig {
            id: "rsu[0]".into(),
            address: Ipv4Addr::new(10, 0, 2, 1),
        }];
        config.injectors = vec![
            InjectorConfig {
                id: "dos[0]".into(),
                source: Ipv4Addr::new(10, 0, 9, 1),
                target: TrafficTarget::Roadside,
                start_s: 1.0,
                duration_s: 2.0,
                interval_s: 0.1,
            },
            InjectorConfig {
                id: "dos[1]".into(),
                source: Ipv4Addr::LOCALHOST,
                target: TrafficTarget::Roadside,
                start_s: 1.0,
                duration_s: 2.0,
                interval_s: 0.1,
            },
        ];
        let mut engine = Engine::new(config).unwrap();
        engine.advance(5.0).unwrap();

        let injectors = engine.injectors();
        assert!(injectors[0].packets_sent > 10);
        assert!(!injectors[0].active);

        let rsu = &engine.roadside_units()[0];
        assert_eq!(rsu.packets_received, injectors[0].packets_sent);
        assert_eq!(rsu.bytes_received, injectors[0].bytes_sent);
        assert_eq!(
            engine.transport_stats().dropped_unspecified_source,
            injectors[1].packets_sent
        );
    }

    #[test]
    fn test_runs_are_reproducible() {
        let mut config = scenario(1, 3);
        config.vehicle_profile.beaconing = true;
        config.vehicle_profile.roaming = vec!["A0B0".into(), "A2B2".into()];
        config.vehicles[2].initial_soc = 0.8;

        let run = |config: ScenarioConfig| {
            let mut engine = Engine::new(config).unwrap();
            engine.advance(30.0).unwrap();
            (
                engine.history(0).to_vec(),
                serde_json::to_value(engine.vehicles()).unwrap(),
            )
        };
        assert_eq!(run(config.clone()), run(config));
    }

    #[test]
    fn test_sample_scenario_runs_to_completion() {
        let config: ScenarioConfig =
            serde_json::from_str(include_str!("../../../scenarios/grid.json")).unwrap();
        let mut engine = Engine::new(config).unwrap();
        let summary = engine.run().unwrap();

        assert_eq!(summary.time_s, 600.0);
        assert!(summary.station.sessions.len() <= 2);
        assert!(summary.injectors[0].packets_sent > 0);
        assert!(summary.station.packets_received >= summary.injectors[0].packets_sent);
        for vehicle in &summary.vehicles {
            assert!((0.0..=1.0).contains(&vehicle.soc));
            assert!(vehicle.stats.packets_sent > 0);
        }
    }

    #[test]
    fn test_rejects_invalid_scenario() {
        let result = Engine::new(scenario(0, 1));
        assert!(matches!(result, Err(EngineError::Config(ConfigError::NoSlots))));
    }

    #[test]
    fn test_rejects_sub_millisecond_tick() {
        let mut config = scenario(1, 1);
        config.tick_period_s = 0.0004;
        assert!(matches!(
            Engine::new(config),
            Err(EngineError::Config(ConfigError::BelowResolution {
                field: "tickPeriodS",
                ..
            }))
        ));

        // The smallest accepted period still lets the clock move.
        let mut config = scenario(1, 1);
        config.tick_period_s = 0.001;
        let mut engine = Engine::new(config).unwrap();
        assert_eq!(engine.advance(0.01).unwrap(), SimTime::from_millis(10));
    }

    #[test]
    fn test_lookups_and_clock() {
        let mut engine = Engine::new(scenario(1, 1)).unwrap();
        assert!(matches!(
            engine.vehicle_status(&VehicleId::new("ev[9]")),
            Err(EngineError::UnknownVehicle(_))
        ));
        assert!(matches!(engine.advance(-1.0), Err(EngineError::InvalidDuration(_))));

        assert_eq!(engine.advance(2.5).unwrap(), SimTime::from_millis(2500));
        assert!(engine.history(1000).is_empty());
        let seen = engine.history(0).len();
        assert!(seen > 0);
        assert_eq!(engine.history(seen - 1).len(), 1);

        let summary = engine.run().unwrap();
        assert_eq!(summary.time_s, 60.0);
        assert_eq!(summary.protocol_events, engine.history(0).len());
    }

    #[test]
    fn test_protocol_event_json() {
        let event = ProtocolEvent {
            time_s: 1.0,
            agent: "cs[0]".into(),
            detail: ProtocolDetail::Station(admitted(0, 1)),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["detail"]["event"], "admitted");
        assert_eq!(json["detail"]["vehicleId"], "ev[0]");

        let back: ProtocolEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
