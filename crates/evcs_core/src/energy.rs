use rand::Rng;
use serde::{Deserialize, Serialize};

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Energy, in Wh, needed to push `size_bytes` through a radio drawing
/// `power_w` at `data_rate_bps`, scaled by `1 + perturbation`.
pub fn packet_energy_wh(size_bytes: u32, power_w: f64, data_rate_bps: f64, perturbation: f64) -> f64 {
    power_w * airtime_s(size_bytes, data_rate_bps) * (1.0 + perturbation) / SECONDS_PER_HOUR
}

pub fn airtime_s(size_bytes: u32, data_rate_bps: f64) -> f64 {
    (size_bytes as f64 * 8.0) / data_rate_bps
}

/// Energy, in Wh, of a constant `power_w` sustained for `period_s`.
pub fn sustained_energy_wh(power_w: f64, period_s: f64) -> f64 {
    power_w * period_s / SECONDS_PER_HOUR
}

/// Radio constants for one direction (transmit or receive).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnergyProfile {
    pub power_w: f64,
    pub data_rate_bps: f64,
    /// Half-width of the uniform perturbation applied to each packet.
    pub noise: f64,
}

impl EnergyProfile {
    pub fn cost<R: Rng + ?Sized>(&self, size_bytes: u32, rng: &mut R) -> f64 {
        let perturbation = if self.noise > 0.0 {
            rng.gen_range(-self.noise..=self.noise)
        } else {
            0.0
        };
        packet_energy_wh(size_bytes, self.power_w, self.data_rate_bps, perturbation)
    }
}

/// Stored energy clamped to `[0, capacity]`; SoC is always derived.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Battery {
    capacity_wh: f64,
    stored_wh: f64,
}

impl Battery {
    pub fn new(capacity_wh: f64, initial_soc: f64) -> Self {
        let capacity_wh = capacity_wh.max(0.0);
        Battery {
            capacity_wh,
            stored_wh: (initial_soc * capacity_wh).clamp(0.0, capacity_wh),
        }
    }

    pub fn capacity_wh(&self) -> f64 {
        self.capacity_wh
    }

    pub fn stored_wh(&self) -> f64 {
        self.stored_wh
    }

    pub fn soc(&self) -> f64 {
        if self.capacity_wh > 0.0 {
            self.stored_wh / self.capacity_wh
        } else {
            0.0
        }
    }

    pub fn is_full(&self) -> bool {
        self.soc() >= 1.0
    }

    pub fn is_empty(&self) -> bool {
        self.stored_wh <= 0.0
    }

    /// Apply a signed change and clamp. Returns the change actually applied.
    pub fn apply(&mut self, delta_wh: f64) -> f64 {
        let before = self.stored_wh;
        self.stored_wh = (self.stored_wh + delta_wh).clamp(0.0, self.capacity_wh);
        self.stored_wh - before
    }

    pub fn drain(&mut self, wh: f64) -> f64 {
        -self.apply(-wh)
    }

    pub fn charge(&mut self, wh: f64) -> f64 {
        self.apply(wh)
    }
}
