use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{Coord, EnergyProfile, SimTime, TrafficTarget, Waypoint};

#[derive(Error, Debug, PartialEq)]
pub enum ConfigError {
    #[error("Waypoint {name:?} is not defined in the scenario")]
    UnknownWaypoint { name: String },
    #[error("{field} must be between 0 and 1, got {value}")]
    RatioOutOfRange { field: &'static str, value: f64 },
    #[error("{field} must be strictly positive, got {value}")]
    NotPositive { field: &'static str, value: f64 },
    #[error("{field} is below the {resolution}s clock resolution, got {value}")]
    BelowResolution {
        field: &'static str,
        value: f64,
        resolution: f64,
    },
    #[error("The station needs at least one charging slot")]
    NoSlots,
    #[error("Physical charging range ({physical}m) must be tighter than the wireless range ({wireless}m)")]
    RangeOrder { physical: f64, wireless: f64 },
}

/// Complete description of one simulation run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScenarioConfig {
    #[serde(default)]
    pub seed: u64,
    pub duration_s: f64,
    #[serde(default = "default_tick_period")]
    pub tick_period_s: f64,
    #[serde(default)]
    pub groups: GroupConfig,
    #[serde(default)]
    pub radio: RadioConfig,
    pub waypoints: BTreeMap<String, Coord>,
    pub station: StationConfig,
    #[serde(default)]
    pub vehicle_profile: VehicleProfile,
    pub vehicles: Vec<VehicleConfig>,
    #[serde(default)]
    pub roadside_units: Vec<RoadsideConfig>,
    #[serde(default)]
    pub injectors: Vec<InjectorConfig>,
}

fn default_tick_period() -> f64 {
    1.0
}

/// Multicast channels. The addresses are configuration, not protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupConfig {
    /// Vehicle broadcast traffic and station responses.
    pub vehicles: Ipv4Addr,
    /// Requests and completions for the station.
    pub station: Ipv4Addr,
    pub roadside: Ipv4Addr,
}

impl Default for GroupConfig {
    fn default() -> Self {
        GroupConfig {
            vehicles: Ipv4Addr::new(224, 0, 0, 1),
            station: Ipv4Addr::new(224, 0, 0, 2),
            roadside: Ipv4Addr::new(224, 0, 0, 3),
        }
    }
}

impl GroupConfig {
    pub fn for_target(&self, target: TrafficTarget) -> Ipv4Addr {
        match target {
            TrafficTarget::Vehicles => self.vehicles,
            TrafficTarget::Station => self.station,
            TrafficTarget::Roadside => self.roadside,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RadioConfig {
    pub tx_power_w: f64,
    pub rx_power_w: f64,
    pub data_rate_bps: f64,
    pub tx_noise: f64,
    pub rx_noise: f64,
}

impl Default for RadioConfig {
    fn default() -> Self {
        RadioConfig {
            tx_power_w: 0.1,
            rx_power_w: 0.05,
            data_rate_bps: 6e6,
            tx_noise: 0.2,
            rx_noise: 0.15,
        }
    }
}

impl RadioConfig {
    pub fn transmit(&self) -> EnergyProfile {
        EnergyProfile {
            power_w: self.tx_power_w,
            data_rate_bps: self.data_rate_bps,
            noise: self.tx_noise,
        }
    }

    pub fn receive(&self) -> EnergyProfile {
        EnergyProfile {
            power_w: self.rx_power_w,
            data_rate_bps: self.data_rate_bps,
            noise: self.rx_noise,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StationConfig {
    #[serde(default = "default_station_id")]
    pub id: String,
    #[serde(default = "default_station_address")]
    pub address: Ipv4Addr,
    /// Waypoint vehicles are rerouted to; also gives the station's position.
    pub waypoint: String,
    pub max_slots: u32,
    pub battery_capacity_wh: f64,
    #[serde(default = "default_full")]
    pub initial_soc: f64,
    pub charging_power_w: f64,
    pub grid_recharge_power_w: f64,
}

fn default_station_id() -> String {
    "cs[0]".into()
}

fn default_station_address() -> Ipv4Addr {
    Ipv4Addr::new(10, 0, 0, 1)
}

fn default_full() -> f64 {
    1.0
}

/// Parameters shared by every vehicle in the fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VehicleProfile {
    pub battery_capacity_wh: f64,
    pub energy_per_meter_wh: f64,
    pub charging_power_w: f64,
    pub soc_threshold: f64,
    /// Wireless range within which a charge request is sent.
    pub charging_range_m: f64,
    /// Distance at which the vehicle can physically plug in.
    pub physical_charging_range_m: f64,
    pub request_timeout_s: f64,
    pub busy_backoff_s: f64,
    pub cruise_speed_mps: f64,
    pub beaconing: bool,
    /// Travel target after a completed charge.
    pub home_waypoint: String,
    /// Destinations picked at random while roaming.
    pub roaming: Vec<String>,
}

impl Default for VehicleProfile {
    fn default() -> Self {
        VehicleProfile {
            battery_capacity_wh: 50_000.0,
            energy_per_meter_wh: 0.15,
            charging_power_w: 50_000.0,
            soc_threshold: 0.2,
            charging_range_m: 300.0,
            physical_charging_range_m: 20.0,
            request_timeout_s: 5.0,
            busy_backoff_s: 3.0,
            cruise_speed_mps: 13.9,
            beaconing: true,
            home_waypoint: "A0B0".into(),
            roaming: vec!["A0B0".into(), "A2B2".into()],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VehicleConfig {
    pub initial_soc: f64,
    /// Waypoint the vehicle starts at.
    pub start: String,
    /// Initial travel target, if any.
    #[serde(default)]
    pub destination: Option<String>,
    /// Only changes the colour the vehicle is drawn in (red). The vehicle
    /// still runs the ordinary charging protocol; hostile traffic comes from
    /// `injectors`.
    #[serde(default)]
    pub attacker: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadsideConfig {
    pub id: String,
    pub address: Ipv4Addr,
}

/// Adversarial background traffic aimed at one group.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectorConfig {
    pub id: String,
    /// Source address stamped on injected packets; may be spoofed.
    pub source: Ipv4Addr,
    pub target: TrafficTarget,
    pub start_s: f64,
    pub duration_s: f64,
    pub interval_s: f64,
}

impl ScenarioConfig {
    pub fn waypoint(&self, name: &str) -> Result<Waypoint, ConfigError> {
        self.waypoints
            .get(name)
            .map(|position| Waypoint {
                name: name.to_string(),
                position: *position,
            })
            .ok_or_else(|| ConfigError::UnknownWaypoint {
                name: name.to_string(),
            })
    }

    pub fn station_waypoint(&self) -> Result<Waypoint, ConfigError> {
        self.waypoint(&self.station.waypoint)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        positive("durationS", self.duration_s)?;
        period("tickPeriodS", self.tick_period_s)?;
        positive("radio.dataRateBps", self.radio.data_rate_bps)?;

        if self.station.max_slots == 0 {
            return Err(ConfigError::NoSlots);
        }
        positive("station.batteryCapacityWh", self.station.battery_capacity_wh)?;
        ratio("station.initialSoc", self.station.initial_soc)?;
        self.station_waypoint()?;

        let profile = &self.vehicle_profile;
        positive("vehicleProfile.batteryCapacityWh", profile.battery_capacity_wh)?;
        ratio("vehicleProfile.socThreshold", profile.soc_threshold)?;
        positive("vehicleProfile.physicalChargingRangeM", profile.physical_charging_range_m)?;
        period("vehicleProfile.requestTimeoutS", profile.request_timeout_s)?;
        period("vehicleProfile.busyBackoffS", profile.busy_backoff_s)?;
        if profile.physical_charging_range_m >= profile.charging_range_m {
            return Err(ConfigError::RangeOrder {
                physical: profile.physical_charging_range_m,
                wireless: profile.charging_range_m,
            });
        }
        self.waypoint(&profile.home_waypoint)?;
        for name in &profile.roaming {
            self.waypoint(name)?;
        }

        for vehicle in &self.vehicles {
            ratio("vehicles[].initialSoc", vehicle.initial_soc)?;
            self.waypoint(&vehicle.start)?;
            if let Some(destination) = &vehicle.destination {
                self.waypoint(destination)?;
            }
        }

        for injector in &self.injectors {
            positive("injectors[].intervalS", injector.interval_s)?;
        }
        Ok(())
    }
}

fn positive(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NotPositive { field, value })
    }
}

/// Timer delays must not round to zero on the millisecond clock.
fn period(field: &'static str, value: f64) -> Result<(), ConfigError> {
    positive(field, value)?;
    if value < SimTime::RESOLUTION_S {
        return Err(ConfigError::BelowResolution {
            field,
            value,
            resolution: SimTime::RESOLUTION_S,
        });
    }
    Ok(())
}

fn ratio(field: &'static str, value: f64) -> Result<(), ConfigError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::RatioOutOfRange { field, value })
    }
}
