//! Charging admission protocol between electric vehicles and a charging
//! station, together with the energy model both sides simulate.
//!
//! The crate is free of any scheduling: agents consume [`AgentInput`]s and
//! describe their reactions as [`Effect`]s in an [`Outbox`], which the runtime
//! turns into deliveries and timers.

mod energy;
mod message;
mod mobility;
mod models;
mod outbox;
mod roadside;
mod station;
mod transport;
mod vehicle;

pub use crate::energy::*;
pub use crate::message::*;
pub use crate::mobility::*;
pub use crate::models::*;
pub use crate::outbox::*;
pub use crate::roadside::*;
pub use crate::station::*;
pub use crate::transport::*;
pub use crate::vehicle::*;

use std::fmt;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Simulated instant, in milliseconds since the start of the run.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct SimTime(u64);

impl SimTime {
    pub const ZERO: SimTime = SimTime(0);
    /// Smallest non-zero delay the clock can represent.
    pub const RESOLUTION_S: f64 = 0.001;

    pub fn from_millis(millis: u64) -> Self {
        SimTime(millis)
    }

    /// Negative and non-finite values collapse to zero.
    pub fn from_secs_f64(secs: f64) -> Self {
        if secs.is_finite() && secs > 0.0 {
            SimTime((secs * 1000.0).round() as u64)
        } else {
            SimTime::ZERO
        }
    }

    pub fn as_millis(self) -> u64 {
        self.0
    }

    pub fn as_secs_f64(self) -> f64 {
        self.0 as f64 / 1000.0
    }

    /// The instant `secs` seconds after this one.
    pub fn after(self, secs: f64) -> Self {
        self + SimTime::from_secs_f64(secs)
    }
}

impl Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: SimTime) -> SimTime {
        SimTime(self.0.saturating_add(rhs.0))
    }
}

impl fmt::Display for SimTime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:.3}s", self.as_secs_f64())
    }
}

/// Stable vehicle identity, derived from the vehicle's index in the fleet.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VehicleId(String);

impl VehicleId {
    pub fn new(id: impl Into<String>) -> Self {
        VehicleId(id.into())
    }

    pub fn from_index(idx: usize) -> Self {
        VehicleId(format!("ev[{idx}]"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for VehicleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for VehicleId {
    fn from(value: &str) -> Self {
        VehicleId(value.to_string())
    }
}
