use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

use crate::{Message, SimTime};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(pub usize);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node{}", self.0)
    }
}

/// A message in flight, tagged the way the network layer sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub source: Ipv4Addr,
    pub group: Ipv4Addr,
    pub sent_at: SimTime,
    pub message: Message,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub to: NodeId,
    pub envelope: Envelope,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransportStats {
    pub emitted: u64,
    pub delivered: u64,
    pub dropped_own_source: u64,
    pub dropped_unspecified_source: u64,
    pub dropped_group_filter: u64,
}

#[derive(Debug, Clone)]
struct Endpoint {
    address: Ipv4Addr,
    /// Groups the application accepts; `None` accepts every joined group.
    accepts: Option<BTreeSet<Ipv4Addr>>,
}

/// Abstract broadcast channel with static multicast membership.
///
/// Delivery is reliable and preserves emission order; every member of the
/// group receives the envelope except the sender itself, members sharing the
/// source address, and members whose application does not accept the group.
/// Envelopes with an unspecified or loopback source are local echo and reach
/// nobody.
#[derive(Debug, Clone, Default)]
pub struct Network {
    endpoints: Vec<Endpoint>,
    groups: BTreeMap<Ipv4Addr, Vec<NodeId>>,
    stats: TransportStats,
}

impl Network {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, address: Ipv4Addr) -> NodeId {
        self.endpoints.push(Endpoint {
            address,
            accepts: None,
        });
        NodeId(self.endpoints.len() - 1)
    }

    pub fn address(&self, node: NodeId) -> Option<Ipv4Addr> {
        self.endpoints.get(node.0).map(|endpoint| endpoint.address)
    }

    pub fn join(&mut self, node: NodeId, group: Ipv4Addr) {
        let members = self.groups.entry(group).or_default();
        if !members.contains(&node) {
            members.push(node);
        }
    }

    /// Restrict which joined groups the node's application accepts.
    pub fn accept_only(&mut self, node: NodeId, groups: impl IntoIterator<Item = Ipv4Addr>) {
        if let Some(endpoint) = self.endpoints.get_mut(node.0) {
            endpoint.accepts = Some(groups.into_iter().collect());
        }
    }

    pub fn members(&self, group: Ipv4Addr) -> &[NodeId] {
        self.groups.get(&group).map_or(&[], Vec::as_slice)
    }

    pub fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Broadcast `envelope` to its group and return who receives it.
    pub fn emit(&mut self, sender: Option<NodeId>, envelope: Envelope) -> Vec<Delivery> {
        self.stats.emitted += 1;

        let source = envelope.source;
        if source.is_unspecified() || source.is_loopback() {
            let dropped = self.members(envelope.group).len() as u64;
            self.stats.dropped_unspecified_source += dropped;
            tracing::debug!(
                "Dropped {} from {}: local echo",
                envelope.message.name(),
                source
            );
            return Vec::new();
        }

        let members = self.groups.get(&envelope.group).cloned().unwrap_or_default();
        let mut deliveries = Vec::with_capacity(members.len());
        for member in members {
            if Some(member) == sender {
                continue;
            }
            let Some(endpoint) = self.endpoints.get(member.0) else {
                continue;
            };
            if endpoint.address == source {
                self.stats.dropped_own_source += 1;
                continue;
            }
            if let Some(accepts) = &endpoint.accepts {
                if !accepts.contains(&envelope.group) {
                    self.stats.dropped_group_filter += 1;
                    continue;
                }
            }
            deliveries.push(Delivery {
                to: member,
                envelope: envelope.clone(),
            });
        }
        self.stats.delivered += deliveries.len() as u64;
        deliveries
    }
}
