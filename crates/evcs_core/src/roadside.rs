use std::collections::BTreeMap;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

use crate::{AgentInput, EnergyProfile, MessageKind};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RoadsideStatus {
    pub id: String,
    pub packets_received: u64,
    pub bytes_received: u64,
    pub receive_energy_wh: f64,
    pub by_kind: BTreeMap<MessageKind, u64>,
}

/// Passive infrastructure listener. Takes no part in the charging protocol.
#[derive(Debug)]
pub struct RoadsideUnit {
    id: String,
    receive: EnergyProfile,
    rng: StdRng,
    packets_received: u64,
    bytes_received: u64,
    receive_energy_wh: f64,
    by_kind: BTreeMap<MessageKind, u64>,
}

impl RoadsideUnit {
    pub fn new(id: impl Into<String>, receive: EnergyProfile, rng: StdRng) -> Self {
        RoadsideUnit {
            id: id.into(),
            receive,
            rng,
            packets_received: 0,
            bytes_received: 0,
            receive_energy_wh: 0.0,
            by_kind: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn handle(&mut self, input: AgentInput<'_>) {
        let AgentInput::Deliver(envelope) = input else {
            return;
        };
        let size = envelope.message.size_bytes;
        self.packets_received += 1;
        self.bytes_received += size as u64;
        self.receive_energy_wh += self.receive.cost(size, &mut self.rng);
        *self.by_kind.entry(envelope.message.payload.kind()).or_default() += 1;
    }

    pub fn status(&self) -> RoadsideStatus {
        RoadsideStatus {
            id: self.id.clone(),
            packets_received: self.packets_received,
            bytes_received: self.bytes_received,
            receive_energy_wh: self.receive_energy_wh,
            by_kind: self.by_kind.clone(),
        }
    }
}
