use std::collections::BTreeMap;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    AgentInput, Battery, CHARGE_RESPONSE_SIZE, EnergyProfile, Envelope, GroupConfig, Message,
    Outbox, Payload, SimTime, StationConfig, Timer, VehicleId, Verdict, sustained_energy_wh,
};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvariantViolation {
    #[error("Station holds {occupied} vehicles but only has {max_slots} slots")]
    CapacityExceeded { occupied: usize, max_slots: u32 },
    #[error("Station battery at {stored_wh} Wh is outside [0, {capacity_wh}] Wh")]
    BatteryOutOfRange { stored_wh: f64, capacity_wh: f64 },
}

/// A vehicle holding one of the station's slots.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub session_id: uuid::Uuid,
    pub vehicle_id: VehicleId,
    pub admitted_at: SimTime,
    pub soc_at_request: f64,
}

impl Session {
    fn new(vehicle_id: VehicleId, admitted_at: SimTime, soc_at_request: f64) -> Self {
        Session {
            session_id: uuid::Uuid::new_v4(),
            vehicle_id,
            admitted_at,
            soc_at_request,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "event")]
pub enum StationEvent {
    #[serde(rename_all = "camelCase")]
    Admitted { vehicle_id: VehicleId, in_use: usize },
    #[serde(rename_all = "camelCase")]
    Rejected { vehicle_id: VehicleId, in_use: usize },
    #[serde(rename_all = "camelCase")]
    Released { vehicle_id: VehicleId, in_use: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum StationMode {
    Idle,
    Discharging,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationStatus {
    pub station_id: String,
    pub mode: StationMode,
    pub max_slots: u32,
    pub sessions: BTreeMap<VehicleId, Session>,
    pub battery_wh: f64,
    pub capacity_wh: f64,
    pub soc: f64,
    pub requests_received: u64,
    pub packets_received: u64,
    pub energy_delivered_wh: f64,
    pub receive_energy_wh: f64,
}

/// Admission controller for a fixed pool of charging slots.
///
/// Admission is decided on slot count alone; the station battery is
/// simulated alongside but does not gate requests.
#[derive(Debug)]
pub struct ChargingStation {
    id: String,
    max_slots: u32,
    charging_power_w: f64,
    grid_recharge_power_w: f64,
    tick_period_s: f64,
    groups: GroupConfig,
    receive: EnergyProfile,
    battery: Battery,
    sessions: BTreeMap<VehicleId, Session>,
    requests_received: u64,
    packets_received: u64,
    energy_delivered_wh: f64,
    receive_energy_wh: f64,
    rng: StdRng,
}

impl ChargingStation {
    pub fn new(
        config: &StationConfig,
        groups: GroupConfig,
        receive: EnergyProfile,
        tick_period_s: f64,
        rng: StdRng,
    ) -> Self {
        ChargingStation {
            id: config.id.clone(),
            max_slots: config.max_slots,
            charging_power_w: config.charging_power_w,
            grid_recharge_power_w: config.grid_recharge_power_w,
            tick_period_s,
            groups,
            receive,
            battery: Battery::new(config.battery_capacity_wh, config.initial_soc),
            sessions: BTreeMap::new(),
            requests_received: 0,
            packets_received: 0,
            energy_delivered_wh: 0.0,
            receive_energy_wh: 0.0,
            rng,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sessions(&self) -> &BTreeMap<VehicleId, Session> {
        &self.sessions
    }

    pub fn in_use(&self) -> usize {
        self.sessions.len()
    }

    pub fn battery(&self) -> &Battery {
        &self.battery
    }

    pub fn requests_received(&self) -> u64 {
        self.requests_received
    }

    pub fn start(&mut self, out: &mut Outbox) {
        tracing::info!(
            station = %self.id,
            slots = self.max_slots,
            battery_wh = self.battery.stored_wh(),
            capacity_wh = self.battery.capacity_wh(),
            "Charging station started"
        );
        out.schedule(self.tick_period_s, Timer::BatteryTick);
    }

    pub fn handle(&mut self, now: SimTime, input: AgentInput<'_>, out: &mut Outbox) -> Option<StationEvent> {
        match input {
            AgentInput::Timer(Timer::BatteryTick) => {
                self.on_battery_tick();
                out.schedule(self.tick_period_s, Timer::BatteryTick);
                None
            }
            AgentInput::Timer(_) => None,
            AgentInput::Deliver(envelope) => self.on_deliver(now, envelope, out),
        }
    }

    fn on_deliver(&mut self, now: SimTime, envelope: &Envelope, out: &mut Outbox) -> Option<StationEvent> {
        self.packets_received += 1;
        self.receive_energy_wh += self
            .receive
            .cost(envelope.message.size_bytes, &mut self.rng);

        match &envelope.message.payload {
            Payload::ChargeRequest { vehicle_id, soc } => {
                let vehicle_id = vehicle_id.clone();
                let verdict = self.handle_charge_request(now, vehicle_id.clone(), *soc, out);
                let in_use = self.in_use();
                Some(match verdict {
                    Verdict::Available => StationEvent::Admitted { vehicle_id, in_use },
                    Verdict::Busy => StationEvent::Rejected { vehicle_id, in_use },
                })
            }
            Payload::ChargeComplete { vehicle_id } => self
                .handle_charge_complete(vehicle_id)
                .map(|session| StationEvent::Released {
                    vehicle_id: session.vehicle_id,
                    in_use: self.sessions.len(),
                }),
            _ => None,
        }
    }

    /// Admit the vehicle if a slot is free and answer on the vehicle group.
    ///
    /// The check and the insertion happen in one step, so requests landing in
    /// the same instant cannot both take the last slot. A vehicle that already
    /// holds a slot is answered `Available` again without a second entry.
    pub fn handle_charge_request(
        &mut self,
        now: SimTime,
        vehicle_id: VehicleId,
        soc: f64,
        out: &mut Outbox,
    ) -> Verdict {
        self.requests_received += 1;

        let verdict = if self.sessions.contains_key(&vehicle_id) {
            Verdict::Available
        } else if self.sessions.len() < self.max_slots as usize {
            self.sessions
                .insert(vehicle_id.clone(), Session::new(vehicle_id.clone(), now, soc));
            Verdict::Available
        } else {
            Verdict::Busy
        };

        tracing::info!(
            station = %self.id,
            vehicle = %vehicle_id,
            %verdict,
            in_use = self.sessions.len(),
            slots = self.max_slots,
            "Charge request"
        );

        let message = Message::new(
            self.id.as_str(),
            self.requests_received,
            CHARGE_RESPONSE_SIZE,
            Payload::ChargeResponse {
                vehicle_id,
                verdict,
            },
        );
        out.send(self.groups.vehicles, message);
        verdict
    }

    /// Free the vehicle's slot. Completing twice is a no-op.
    pub fn handle_charge_complete(&mut self, vehicle_id: &VehicleId) -> Option<Session> {
        let session = self.sessions.remove(vehicle_id);
        tracing::info!(
            station = %self.id,
            vehicle = %vehicle_id,
            released = session.is_some(),
            in_use = self.sessions.len(),
            slots = self.max_slots,
            "Charge complete"
        );
        session
    }

    pub fn on_battery_tick(&mut self) {
        let drain = sustained_energy_wh(
            self.charging_power_w * self.sessions.len() as f64,
            self.tick_period_s,
        );
        let grid = sustained_energy_wh(self.grid_recharge_power_w, self.tick_period_s);
        self.energy_delivered_wh += drain;
        self.battery.apply(grid - drain);
        tracing::debug!(
            station = %self.id,
            mode = ?self.mode(),
            battery_wh = self.battery.stored_wh(),
            "Station battery tick"
        );
    }

    pub fn mode(&self) -> StationMode {
        if self.sessions.is_empty() {
            StationMode::Idle
        } else {
            StationMode::Discharging
        }
    }

    pub fn check_invariants(&self) -> Result<(), InvariantViolation> {
        if self.sessions.len() > self.max_slots as usize {
            return Err(InvariantViolation::CapacityExceeded {
                occupied: self.sessions.len(),
                max_slots: self.max_slots,
            });
        }
        let stored_wh = self.battery.stored_wh();
        let capacity_wh = self.battery.capacity_wh();
        if !(0.0..=capacity_wh).contains(&stored_wh) {
            return Err(InvariantViolation::BatteryOutOfRange {
                stored_wh,
                capacity_wh,
            });
        }
        Ok(())
    }

    pub fn status(&self) -> StationStatus {
        StationStatus {
            station_id: self.id.clone(),
            mode: self.mode(),
            max_slots: self.max_slots,
            sessions: self.sessions.clone(),
            battery_wh: self.battery.stored_wh(),
            capacity_wh: self.battery.capacity_wh(),
            soc: self.battery.soc(),
            requests_received: self.requests_received,
            packets_received: self.packets_received,
            energy_delivered_wh: self.energy_delivered_wh,
            receive_energy_wh: self.receive_energy_wh,
        }
    }
}
