use std::net::Ipv4Addr;

use evcs_core::{
    AgentInput, GroupConfig, InjectorConfig, Message, Outbox, Payload, SimTime, Timer,
    TrafficTarget,
};
use rand::Rng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};

const JITTER: f64 = 0.3;
const MIN_INTERVAL_S: f64 = 0.002;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InjectorStatus {
    pub id: String,
    pub source: Ipv4Addr,
    pub target: TrafficTarget,
    pub active: bool,
    pub packets_sent: u64,
    pub bytes_sent: u64,
}

/// Background traffic aimed at one multicast group during a time window.
///
/// Packet sizes follow a mix of small, medium and large frames; the gap
/// between packets is the configured interval with up to 30% jitter.
#[derive(Debug)]
pub struct TrafficInjector {
    id: String,
    source: Ipv4Addr,
    target: TrafficTarget,
    group: Ipv4Addr,
    start_s: f64,
    stop: SimTime,
    interval_s: f64,
    active: bool,
    packets_sent: u64,
    bytes_sent: u64,
    rng: StdRng,
}

impl TrafficInjector {
    pub fn new(config: &InjectorConfig, groups: &GroupConfig, rng: StdRng) -> Self {
        TrafficInjector {
            id: config.id.clone(),
            source: config.source,
            target: config.target,
            group: groups.for_target(config.target),
            start_s: config.start_s.max(0.0),
            stop: SimTime::from_secs_f64(config.start_s + config.duration_s),
            interval_s: config.interval_s,
            active: false,
            packets_sent: 0,
            bytes_sent: 0,
            rng,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn start(&mut self, out: &mut Outbox) {
        out.schedule(self.start_s, Timer::Burst);
    }

    pub fn handle(&mut self, now: SimTime, input: AgentInput<'_>, out: &mut Outbox) {
        let AgentInput::Timer(Timer::Burst) = input else {
            return;
        };
        if now >= self.stop {
            if self.active {
                tracing::info!(
                    injector = %self.id,
                    packets = self.packets_sent,
                    bytes = self.bytes_sent,
                    "Traffic injection stopped"
                );
            }
            self.active = false;
            return;
        }
        if !self.active {
            self.active = true;
            tracing::info!(
                injector = %self.id,
                source = %self.source,
                group = %self.group,
                "Traffic injection started"
            );
        }

        let size = self.packet_size();
        let message = Message::new(
            self.id.as_str(),
            self.packets_sent,
            size,
            Payload::Flood {
                target: self.target,
            },
        );
        self.packets_sent += 1;
        self.bytes_sent += size as u64;
        out.send(self.group, message);
        out.schedule(self.next_interval(), Timer::Burst);
    }

    fn packet_size(&mut self) -> u32 {
        let bucket: f64 = self.rng.r#gen();
        if bucket < 0.20 {
            self.rng.gen_range(200..=400)
        } else if bucket < 0.55 {
            self.rng.gen_range(500..=900)
        } else {
            self.rng.gen_range(1000..=1500)
        }
    }

    fn next_interval(&mut self) -> f64 {
        let jitter = self.rng.gen_range(-JITTER..=JITTER);
        (self.interval_s * (1.0 + jitter)).max(MIN_INTERVAL_S)
    }

    pub fn status(&self) -> InjectorStatus {
        InjectorStatus {
            id: self.id.clone(),
            source: self.source,
            target: self.target,
            active: self.active,
            packets_sent: self.packets_sent,
            bytes_sent: self.bytes_sent,
        }
    }
}
