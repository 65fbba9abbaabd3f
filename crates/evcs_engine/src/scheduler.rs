use std::cmp::{Ordering, Reverse};
use std::collections::BinaryHeap;

use evcs_core::{Envelope, NodeId, SimTime, Timer};

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Timer { node: NodeId, timer: Timer },
    Deliver { to: NodeId, envelope: Envelope },
}

impl Event {
    pub fn node(&self) -> NodeId {
        match self {
            Event::Timer { node, .. } => *node,
            Event::Deliver { to, .. } => *to,
        }
    }
}

#[derive(Debug)]
struct Scheduled {
    time: SimTime,
    seq: u64,
    event: Event,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}
impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        self.time
            .cmp(&other.time)
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Global logical clock with a pending-event queue.
///
/// Events fire in time order; events sharing an instant fire in the order
/// they were scheduled.
#[derive(Debug, Default)]
pub struct Scheduler {
    now: SimTime,
    next_seq: u64,
    queue: BinaryHeap<Reverse<Scheduled>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> SimTime {
        self.now
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Schedule `event` at `time`, or now if `time` is already past.
    pub fn schedule_at(&mut self, time: SimTime, event: Event) {
        let time = time.max(self.now);
        let seq = self.next_seq;
        self.next_seq += 1;
        self.queue.push(Reverse(Scheduled { time, seq, event }));
    }

    pub fn schedule_in(&mut self, delay_s: f64, event: Event) {
        self.schedule_at(self.now.after(delay_s), event);
    }

    pub fn peek_time(&self) -> Option<SimTime> {
        self.queue.peek().map(|Reverse(scheduled)| scheduled.time)
    }

    /// Pop the next event due no later than `until`, moving the clock to it.
    pub fn pop_due(&mut self, until: SimTime) -> Option<Event> {
        if self.peek_time()? > until {
            return None;
        }
        let Reverse(scheduled) = self.queue.pop()?;
        self.now = scheduled.time;
        Some(scheduled.event)
    }

    /// Move the clock forward without firing anything.
    pub fn advance_to(&mut self, time: SimTime) {
        self.now = self.now.max(time);
    }
}
