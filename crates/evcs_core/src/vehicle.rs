//! Vehicle side of the charging protocol.
//!
//! A charging episode walks through
//!
//! ```text
//! Idle -> NeedsCharging -> RequestSent -> AvailableConfirmed -> Charging -> Done -> Idle
//!               ^               |
//!               +---------------+  (Busy + backoff, or request timeout)
//! ```
//!
//! Everything happens on the periodic battery tick, on a delivered message or
//! on the single charge-retry timer.

use std::net::Ipv4Addr;

use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::{
    AgentInput, Battery, CHARGE_COMPLETE_SIZE, CHARGE_REQUEST_SIZE, ConfigError, Coord,
    EnergyProfile, Envelope, GroupConfig, Message, Mobility, Outbox, Payload, Rgba,
    ScenarioConfig, SimTime, SpeedCommand, Timer, VehicleId, Verdict, Waypoint,
    sustained_energy_wh,
};

/// A reroute is reissued once the vehicle is this many wireless ranges away.
const REROUTE_VALIDITY_FACTOR: f64 = 2.0;
const BEACON_SIZE: std::ops::RangeInclusive<u32> = 200..=400;
const BEACON_INTERVAL_S: std::ops::Range<f64> = 0.2..1.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ChargingPhase {
    Idle,
    NeedsCharging,
    RequestSent,
    /// Admitted by the station, not yet close enough to plug in.
    AvailableConfirmed,
    Charging,
    /// Charge finished on this tick; back to `Idle` on the next one.
    Done,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "transition")]
pub enum Transition {
    #[serde(rename_all = "camelCase")]
    NeedDetected { soc: f64 },
    #[serde(rename_all = "camelCase")]
    Rerouted { distance_m: f64 },
    #[serde(rename_all = "camelCase")]
    RequestSent { soc: f64, distance_m: f64 },
    Admitted,
    Rejected,
    TimedOut,
    BackoffElapsed,
    #[serde(rename_all = "camelCase")]
    ChargingStarted { soc: f64 },
    #[serde(rename_all = "camelCase")]
    ChargingCompleted { soc: f64 },
    /// An admission arrived outside a charging episode and was handed back.
    StaleAdmissionReleased,
    Depleted,
}

/// Everything a vehicle needs to know about its surroundings.
#[derive(Debug, Clone)]
pub struct VehicleParams {
    pub battery_capacity_wh: f64,
    pub energy_per_meter_wh: f64,
    pub charging_power_w: f64,
    pub soc_threshold: f64,
    pub charging_range_m: f64,
    pub physical_charging_range_m: f64,
    pub request_timeout_s: f64,
    pub busy_backoff_s: f64,
    pub tick_period_s: f64,
    pub beaconing: bool,
    pub station: Waypoint,
    pub home: Waypoint,
    pub roaming: Vec<Waypoint>,
    pub groups: GroupConfig,
    pub transmit: EnergyProfile,
    pub receive: EnergyProfile,
}

impl VehicleParams {
    pub fn from_scenario(config: &ScenarioConfig) -> Result<Self, ConfigError> {
        let profile = &config.vehicle_profile;
        Ok(VehicleParams {
            battery_capacity_wh: profile.battery_capacity_wh,
            energy_per_meter_wh: profile.energy_per_meter_wh,
            charging_power_w: profile.charging_power_w,
            soc_threshold: profile.soc_threshold,
            charging_range_m: profile.charging_range_m,
            physical_charging_range_m: profile.physical_charging_range_m,
            request_timeout_s: profile.request_timeout_s,
            busy_backoff_s: profile.busy_backoff_s,
            tick_period_s: config.tick_period_s,
            beaconing: profile.beaconing,
            station: config.station_waypoint()?,
            home: config.waypoint(&profile.home_waypoint)?,
            roaming: profile
                .roaming
                .iter()
                .map(|name| config.waypoint(name))
                .collect::<Result<_, _>>()?,
            groups: config.groups,
            transmit: config.radio.transmit(),
            receive: config.radio.receive(),
        })
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrafficStats {
    pub packets_sent: u64,
    pub packets_received: u64,
    pub bytes_sent: u64,
    pub bytes_received: u64,
    pub energy_consumed_wh: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleStatus {
    pub vehicle_id: VehicleId,
    pub phase: ChargingPhase,
    pub battery_wh: f64,
    pub capacity_wh: f64,
    pub soc: f64,
    pub position: Coord,
    pub speed_mps: f64,
    pub distance_to_station_m: f64,
    pub request_outstanding: bool,
    pub depleted: bool,
    pub stats: TrafficStats,
}

pub struct Vehicle {
    id: VehicleId,
    params: VehicleParams,
    battery: Battery,
    phase: ChargingPhase,
    /// Set while a request is awaiting a response, backing off after Busy,
    /// or admitted; blocks further requests.
    request_outstanding: bool,
    reroute_issued: bool,
    depleted: bool,
    retry_epoch: u32,
    last_position: Option<Coord>,
    color: Rgba,
    mobility: Box<dyn Mobility>,
    rng: StdRng,
    stats: TrafficStats,
}

impl std::fmt::Debug for Vehicle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Vehicle")
            .field("id", &self.id)
            .field("phase", &self.phase)
            .field("battery", &self.battery)
            .finish_non_exhaustive()
    }
}

impl Vehicle {
    pub fn new(
        id: VehicleId,
        params: VehicleParams,
        initial_soc: f64,
        attacker: bool,
        mut mobility: Box<dyn Mobility>,
        rng: StdRng,
    ) -> Self {
        let color = if attacker { Rgba::RED } else { Rgba::YELLOW };
        mobility.set_color(color);
        Vehicle {
            id,
            battery: Battery::new(params.battery_capacity_wh, initial_soc),
            params,
            phase: ChargingPhase::Idle,
            request_outstanding: false,
            reroute_issued: false,
            depleted: false,
            retry_epoch: 0,
            last_position: None,
            color,
            mobility,
            rng,
            stats: TrafficStats::default(),
        }
    }

    pub fn id(&self) -> &VehicleId {
        &self.id
    }

    pub fn phase(&self) -> ChargingPhase {
        self.phase
    }

    pub fn battery(&self) -> &Battery {
        &self.battery
    }

    pub fn soc(&self) -> f64 {
        self.battery.soc()
    }

    pub fn is_charging(&self) -> bool {
        self.phase == ChargingPhase::Charging
    }

    pub fn request_outstanding(&self) -> bool {
        self.request_outstanding
    }

    pub fn stats(&self) -> TrafficStats {
        self.stats
    }

    pub fn mobility_mut(&mut self) -> &mut dyn Mobility {
        self.mobility.as_mut()
    }

    /// Arm the periodic timers.
    pub fn start(&mut self, out: &mut Outbox) {
        out.schedule(self.params.tick_period_s, Timer::BatteryTick);
        if self.params.beaconing {
            let jitter = self.rng.gen_range(0.0..0.5);
            out.schedule(1.0 + jitter, Timer::Beacon);
        }
    }

    /// Single entry point for everything the runtime hands to the vehicle.
    pub fn handle(&mut self, now: SimTime, input: AgentInput<'_>, out: &mut Outbox) -> Vec<Transition> {
        let mut transitions = Vec::new();
        match input {
            AgentInput::Timer(Timer::BatteryTick) => {
                self.on_battery_tick(out, &mut transitions);
                out.schedule(self.params.tick_period_s, Timer::BatteryTick);
            }
            AgentInput::Timer(Timer::ChargeRetry { epoch }) => {
                self.on_retry_timer(epoch, &mut transitions);
            }
            AgentInput::Timer(Timer::Beacon) => {
                self.send_beacon(out);
                let delay = self.rng.gen_range(BEACON_INTERVAL_S);
                out.schedule(delay, Timer::Beacon);
            }
            AgentInput::Timer(Timer::Burst) => {}
            AgentInput::Deliver(envelope) => {
                self.on_deliver(now, envelope, out, &mut transitions);
            }
        }
        transitions
    }

    fn position(&self) -> Coord {
        self.mobility.position().unwrap_or(Coord::ZERO)
    }

    pub fn distance_to_station(&self) -> f64 {
        self.position().distance(&self.params.station.position)
    }

    fn set_color(&mut self, color: Rgba) {
        self.mobility.set_color(color);
    }

    /// A depleted vehicle stays stalled until it is plugged in.
    fn resume(&mut self) {
        if !self.depleted {
            self.mobility.set_speed(SpeedCommand::Resume);
        }
    }

    fn consume(&mut self, wh: f64) {
        let drained = self.battery.drain(wh);
        self.stats.energy_consumed_wh += drained;
    }

    fn on_battery_tick(&mut self, out: &mut Outbox, transitions: &mut Vec<Transition>) {
        if self.phase == ChargingPhase::Done {
            self.phase = ChargingPhase::Idle;
        }
        self.update_battery(out, transitions);
        self.check_charging_need(out, transitions);
    }

    fn update_battery(&mut self, out: &mut Outbox, transitions: &mut Vec<Transition>) {
        let position = self.position();
        if let Some(last) = self.last_position {
            let driven = position.distance(&last);
            self.consume(driven * self.params.energy_per_meter_wh);
        }
        self.last_position = Some(position);

        if self.phase == ChargingPhase::Charging {
            self.battery.charge(sustained_energy_wh(
                self.params.charging_power_w,
                self.params.tick_period_s,
            ));
            tracing::debug!(vehicle = %self.id, soc = self.soc(), "Charging tick");
            if self.battery.is_full() {
                self.end_charging(out);
                transitions.push(Transition::ChargingCompleted { soc: self.soc() });
            }
        } else if self.battery.is_empty() && !self.depleted {
            self.depleted = true;
            self.mobility.set_speed(SpeedCommand::Stop);
            self.set_color(Rgba::GRAY);
            tracing::warn!(vehicle = %self.id, "Battery depleted, vehicle stopped");
            transitions.push(Transition::Depleted);
        }
    }

    fn check_charging_need(&mut self, out: &mut Outbox, transitions: &mut Vec<Transition>) {
        match self.phase {
            ChargingPhase::Charging | ChargingPhase::Done => return,
            ChargingPhase::Idle if self.soc() <= self.params.soc_threshold => {
                self.phase = ChargingPhase::NeedsCharging;
                tracing::info!(vehicle = %self.id, soc = self.soc(), "Needs charging");
                transitions.push(Transition::NeedDetected { soc: self.soc() });
            }
            ChargingPhase::Idle => return,
            _ => {}
        }

        let distance = self.distance_to_station();

        if !self.reroute_issued
            || distance > self.params.charging_range_m * REROUTE_VALIDITY_FACTOR
        {
            if !self.reroute_issued {
                transitions.push(Transition::Rerouted {
                    distance_m: distance,
                });
            }
            let station = self.params.station.clone();
            self.mobility.reroute(&station);
            self.reroute_issued = true;
            self.set_color(Rgba::WHITE);
            tracing::info!(
                vehicle = %self.id,
                station = %station.name,
                distance_m = distance,
                "Rerouted to station"
            );
        }

        if distance < self.params.charging_range_m && !self.request_outstanding {
            self.send_request(out);
            self.resume();
            transitions.push(Transition::RequestSent {
                soc: self.soc(),
                distance_m: distance,
            });
            return;
        }

        if self.phase == ChargingPhase::AvailableConfirmed
            && distance < self.params.physical_charging_range_m
        {
            self.begin_charging();
            transitions.push(Transition::ChargingStarted { soc: self.soc() });
        }
    }

    fn arm_retry(&mut self, delay_s: f64, out: &mut Outbox) {
        self.retry_epoch = self.retry_epoch.wrapping_add(1);
        out.schedule(
            delay_s,
            Timer::ChargeRetry {
                epoch: self.retry_epoch,
            },
        );
    }

    fn cancel_retry(&mut self) {
        self.retry_epoch = self.retry_epoch.wrapping_add(1);
    }

    fn transmit(&mut self, group: Ipv4Addr, size_bytes: u32, payload: Payload, out: &mut Outbox) {
        let energy = self.params.transmit.cost(size_bytes, &mut self.rng);
        self.consume(energy);
        let message = Message::new(self.id.as_str(), self.stats.packets_sent, size_bytes, payload);
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += size_bytes as u64;
        out.send(group, message);
    }

    fn send_request(&mut self, out: &mut Outbox) {
        self.request_outstanding = true;
        self.phase = ChargingPhase::RequestSent;
        let payload = Payload::ChargeRequest {
            vehicle_id: self.id.clone(),
            soc: self.soc(),
        };
        self.transmit(self.params.groups.station, CHARGE_REQUEST_SIZE, payload, out);
        self.arm_retry(self.params.request_timeout_s, out);
        tracing::info!(vehicle = %self.id, soc = self.soc(), "Sent charge request");
    }

    fn send_complete(&mut self, out: &mut Outbox) {
        let payload = Payload::ChargeComplete {
            vehicle_id: self.id.clone(),
        };
        self.transmit(self.params.groups.station, CHARGE_COMPLETE_SIZE, payload, out);
    }

    fn on_retry_timer(&mut self, epoch: u32, transitions: &mut Vec<Transition>) {
        if epoch != self.retry_epoch {
            return;
        }
        match self.phase {
            ChargingPhase::RequestSent => {
                self.request_outstanding = false;
                self.phase = ChargingPhase::NeedsCharging;
                tracing::info!(vehicle = %self.id, "Charge request timed out");
                transitions.push(Transition::TimedOut);
            }
            ChargingPhase::NeedsCharging if self.request_outstanding => {
                self.request_outstanding = false;
                tracing::debug!(vehicle = %self.id, "Busy backoff elapsed");
                transitions.push(Transition::BackoffElapsed);
            }
            _ => {}
        }
    }

    fn on_deliver(
        &mut self,
        now: SimTime,
        envelope: &Envelope,
        out: &mut Outbox,
        transitions: &mut Vec<Transition>,
    ) {
        let size = envelope.message.size_bytes;
        self.stats.packets_received += 1;
        self.stats.bytes_received += size as u64;
        let energy = self.params.receive.cost(size, &mut self.rng);
        self.consume(energy);

        if !envelope.message.is_response_for(&self.id) {
            return;
        }
        if let Payload::ChargeResponse { verdict, .. } = envelope.message.payload {
            tracing::debug!(vehicle = %self.id, %now, "Received {}", envelope.message.name());
            if let Some(transition) = self.on_charge_response(verdict, out) {
                transitions.push(transition);
            }
        }
    }

    fn on_charge_response(&mut self, verdict: Verdict, out: &mut Outbox) -> Option<Transition> {
        match self.phase {
            ChargingPhase::RequestSent | ChargingPhase::NeedsCharging => {}
            ChargingPhase::Idle | ChargingPhase::Done => {
                if verdict == Verdict::Available {
                    tracing::warn!(vehicle = %self.id, "Releasing admission outside of an episode");
                    self.send_complete(out);
                    return Some(Transition::StaleAdmissionReleased);
                }
                return None;
            }
            ChargingPhase::AvailableConfirmed | ChargingPhase::Charging => return None,
        }

        // A response settles the request even if its timeout already fired.
        self.cancel_retry();
        self.request_outstanding = true;
        self.resume();
        match verdict {
            Verdict::Available => {
                self.phase = ChargingPhase::AvailableConfirmed;
                tracing::info!(
                    vehicle = %self.id,
                    physical_range_m = self.params.physical_charging_range_m,
                    "Admitted, driving to the station"
                );
                Some(Transition::Admitted)
            }
            Verdict::Busy => {
                self.phase = ChargingPhase::NeedsCharging;
                self.arm_retry(self.params.busy_backoff_s, out);
                tracing::info!(
                    vehicle = %self.id,
                    backoff_s = self.params.busy_backoff_s,
                    "Station busy, retrying later"
                );
                Some(Transition::Rejected)
            }
        }
    }

    fn begin_charging(&mut self) {
        self.phase = ChargingPhase::Charging;
        self.depleted = false;
        self.mobility.set_speed(SpeedCommand::Stop);
        self.set_color(Rgba::BLUE);
        tracing::info!(vehicle = %self.id, soc = self.soc(), "Charging started");
    }

    fn end_charging(&mut self, out: &mut Outbox) {
        self.phase = ChargingPhase::Done;
        self.request_outstanding = false;
        self.reroute_issued = false;
        self.cancel_retry();

        self.resume();
        let home = self.params.home.clone();
        self.mobility.reroute(&home);
        self.set_color(self.color);

        self.send_complete(out);
        tracing::info!(vehicle = %self.id, soc = self.soc(), "Charging done");
    }

    fn send_beacon(&mut self, out: &mut Outbox) {
        let size = self.rng.gen_range(BEACON_SIZE);
        let energy = self.params.transmit.cost(size, &mut self.rng);
        if self.battery.stored_wh() < energy {
            return;
        }
        self.consume(energy);
        let message = Message::new(self.id.as_str(), self.stats.packets_sent, size, Payload::Beacon);
        self.stats.packets_sent += 1;
        self.stats.bytes_sent += size as u64;
        out.send(self.params.groups.vehicles, message);

        if self.phase == ChargingPhase::Idle
            && self.stats.packets_sent % 2 == 0
            && !self.params.roaming.is_empty()
        {
            let idx = self.rng.gen_range(0..self.params.roaming.len());
            let destination = self.params.roaming[idx].clone();
            self.mobility.reroute(&destination);
        }
    }

    pub fn status(&self) -> VehicleStatus {
        VehicleStatus {
            vehicle_id: self.id.clone(),
            phase: self.phase,
            battery_wh: self.battery.stored_wh(),
            capacity_wh: self.battery.capacity_wh(),
            soc: self.soc(),
            position: self.position(),
            speed_mps: self.mobility.velocity().map_or(0.0, |v| v.length()),
            distance_to_station_m: self.distance_to_station(),
            request_outstanding: self.request_outstanding,
            depleted: self.depleted,
            stats: self.stats,
        }
    }
}
