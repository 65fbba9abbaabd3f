//! Typed protocol messages and the textual names they carry on the wire.
//!
//! Peers that only see packet names identify the protocol from them:
//!
//! ```text
//! ChargeReq-ev[3]-soc0.18
//! ChargeResp-AVAILABLE-ev[3]
//! ChargeResp-BUSY-ev[3]
//! ChargeDone-ev[3]
//! BSM-42
//! EV2CS-17
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::VehicleId;

pub const CHARGE_REQUEST_SIZE: u32 = 100;
pub const CHARGE_RESPONSE_SIZE: u32 = 100;
pub const CHARGE_COMPLETE_SIZE: u32 = 50;

const REQUEST_TAG: &str = "ChargeReq";
const RESPONSE_TAG: &str = "ChargeResp";
const COMPLETE_TAG: &str = "ChargeDone";
const BEACON_TAG: &str = "BSM";

#[derive(Error, Debug, PartialEq)]
pub enum NameParseError {
    #[error("Unknown message kind in {name:?}")]
    UnknownKind { name: String },
    #[error("Message {name:?} does not carry a vehicle id")]
    MissingVehicle { name: String },
    #[error("Message {name:?} does not carry a valid verdict")]
    InvalidVerdict { name: String },
    #[error("Message {name:?} does not carry a valid state of charge")]
    InvalidSoc { name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Verdict {
    Available,
    Busy,
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Available => f.write_str("AVAILABLE"),
            Verdict::Busy => f.write_str("BUSY"),
        }
    }
}

impl FromStr for Verdict {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AVAILABLE" => Ok(Verdict::Available),
            "BUSY" => Ok(Verdict::Busy),
            _ => Err(()),
        }
    }
}

/// Which role a piece of background traffic is aimed at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum TrafficTarget {
    Vehicles,
    Station,
    Roadside,
}

impl TrafficTarget {
    pub fn prefix(&self) -> &'static str {
        match self {
            TrafficTarget::Vehicles => "EV2EV",
            TrafficTarget::Station => "EV2CS",
            TrafficTarget::Roadside => "EV2RSU",
        }
    }

    fn from_prefix(prefix: &str) -> Option<Self> {
        [
            TrafficTarget::Vehicles,
            TrafficTarget::Station,
            TrafficTarget::Roadside,
        ]
        .into_iter()
        .find(|target| target.prefix() == prefix)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum MessageKind {
    ChargeRequest,
    ChargeResponse,
    ChargeComplete,
    Beacon,
    Flood,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum Payload {
    #[serde(rename_all = "camelCase")]
    ChargeRequest { vehicle_id: VehicleId, soc: f64 },
    #[serde(rename_all = "camelCase")]
    ChargeResponse {
        vehicle_id: VehicleId,
        verdict: Verdict,
    },
    #[serde(rename_all = "camelCase")]
    ChargeComplete { vehicle_id: VehicleId },
    /// Basic safety message, periodic vehicle status broadcast.
    Beacon,
    /// Background traffic with no protocol meaning.
    Flood { target: TrafficTarget },
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::ChargeRequest { .. } => MessageKind::ChargeRequest,
            Payload::ChargeResponse { .. } => MessageKind::ChargeResponse,
            Payload::ChargeComplete { .. } => MessageKind::ChargeComplete,
            Payload::Beacon => MessageKind::Beacon,
            Payload::Flood { .. } => MessageKind::Flood,
        }
    }

    /// Recover the payload from a message name.
    pub fn from_name(name: &str) -> Result<Payload, NameParseError> {
        let (tag, rest) = name.split_once('-').ok_or_else(|| NameParseError::UnknownKind {
            name: name.to_string(),
        })?;
        let missing_vehicle = || NameParseError::MissingVehicle {
            name: name.to_string(),
        };

        match tag {
            REQUEST_TAG => {
                let (vehicle, soc) = rest.rsplit_once("-soc").ok_or_else(missing_vehicle)?;
                if vehicle.is_empty() {
                    return Err(missing_vehicle());
                }
                let soc = soc.parse::<f64>().map_err(|_| NameParseError::InvalidSoc {
                    name: name.to_string(),
                })?;
                Ok(Payload::ChargeRequest {
                    vehicle_id: VehicleId::from(vehicle),
                    soc,
                })
            }
            RESPONSE_TAG => {
                let (verdict, vehicle) = rest.split_once('-').ok_or_else(missing_vehicle)?;
                let verdict = verdict
                    .parse::<Verdict>()
                    .map_err(|_| NameParseError::InvalidVerdict {
                        name: name.to_string(),
                    })?;
                if vehicle.is_empty() {
                    return Err(missing_vehicle());
                }
                Ok(Payload::ChargeResponse {
                    vehicle_id: VehicleId::from(vehicle),
                    verdict,
                })
            }
            COMPLETE_TAG if !rest.is_empty() => Ok(Payload::ChargeComplete {
                vehicle_id: VehicleId::from(rest),
            }),
            COMPLETE_TAG => Err(missing_vehicle()),
            BEACON_TAG => Ok(Payload::Beacon),
            other => TrafficTarget::from_prefix(other)
                .map(|target| Payload::Flood { target })
                .ok_or_else(|| NameParseError::UnknownKind {
                    name: name.to_string(),
                }),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Name of the sending agent.
    pub sender: String,
    pub seq: u64,
    pub size_bytes: u32,
    pub payload: Payload,
}

impl Message {
    pub fn new(sender: impl Into<String>, seq: u64, size_bytes: u32, payload: Payload) -> Self {
        Message {
            sender: sender.into(),
            seq,
            size_bytes,
            payload,
        }
    }

    /// The name this message is known by on the wire.
    pub fn name(&self) -> String {
        match &self.payload {
            Payload::ChargeRequest { vehicle_id, soc } => {
                format!("{REQUEST_TAG}-{vehicle_id}-soc{soc:.2}")
            }
            Payload::ChargeResponse {
                vehicle_id,
                verdict,
            } => format!("{RESPONSE_TAG}-{verdict}-{vehicle_id}"),
            Payload::ChargeComplete { vehicle_id } => format!("{COMPLETE_TAG}-{vehicle_id}"),
            Payload::Beacon => format!("{BEACON_TAG}-{}", self.seq),
            Payload::Flood { target } => format!("{}-{}", target.prefix(), self.seq),
        }
    }

    /// Whether a charge response in this message is meant for `vehicle_id`.
    pub fn is_response_for(&self, vehicle_id: &VehicleId) -> bool {
        matches!(&self.payload, Payload::ChargeResponse { vehicle_id: to, .. } if to == vehicle_id)
    }
}
