use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::{Envelope, Message};

/// Timers an agent can arm for itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Timer {
    /// Fixed-period battery and protocol update.
    BatteryTick,
    /// Request timeout or busy backoff. Only the timer carrying the agent's
    /// current epoch is live; older ones have been cancelled.
    ChargeRetry { epoch: u32 },
    /// Next basic safety message.
    Beacon,
    /// Next packet of injected background traffic.
    Burst,
}

/// Something an agent reacts to.
#[derive(Debug, Clone, Copy)]
pub enum AgentInput<'a> {
    Timer(Timer),
    Deliver(&'a Envelope),
}

#[derive(Debug, Clone, PartialEq)]
pub enum Effect {
    Send { group: Ipv4Addr, message: Message },
    Schedule { delay_s: f64, timer: Timer },
}

/// Effects produced while handling one input, in emission order.
#[derive(Debug, Default)]
pub struct Outbox {
    effects: Vec<Effect>,
}

impl Outbox {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn send(&mut self, group: Ipv4Addr, message: Message) {
        self.effects.push(Effect::Send { group, message });
    }

    pub fn schedule(&mut self, delay_s: f64, timer: Timer) {
        self.effects.push(Effect::Schedule { delay_s, timer });
    }

    pub fn is_empty(&self) -> bool {
        self.effects.is_empty()
    }

    pub fn effects(&self) -> &[Effect] {
        &self.effects
    }

    pub fn drain(&mut self) -> std::vec::Drain<'_, Effect> {
        self.effects.drain(..)
    }

    /// Messages queued so far, with their destination group.
    pub fn sent(&self) -> impl Iterator<Item = (&Ipv4Addr, &Message)> {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::Send { group, message } => Some((group, message)),
            Effect::Schedule { .. } => None,
        })
    }

    pub fn scheduled(&self) -> impl Iterator<Item = (f64, Timer)> + '_ {
        self.effects.iter().filter_map(|effect| match effect {
            Effect::Schedule { delay_s, timer } => Some((*delay_s, *timer)),
            Effect::Send { .. } => None,
        })
    }
}
