//! Observation model: immutable records of trace firings.
//!
//! Entities fire traces through [`SimContext::fire_trace`]; the run driver
//! funnels every firing into exactly one [`Observation`] appended to the
//! [`ObservationLog`]. The log is the sole input to aggregation: append-only
//! while the run is live, frozen into a plain slice at halt.
//!
//! [`SimContext::fire_trace`]: crate::SimContext::fire_trace

use crate::{EntityId, NodeId, SimTime};
use serde::Serialize;
use std::collections::HashSet;
use std::net::Ipv4Addr;

// ============================================================================
// Trace Points
// ============================================================================

/// Named trace points an entity can expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum TraceName {
    /// A packet arrived at an application-level sink.
    PacketSinkRx,
    /// A packet finished physical-layer reception at a device.
    PhyRxEnd,
    /// A node's remaining energy changed.
    RemainingEnergy,
}

/// The value carried by a trace firing.
#[derive(Debug, Clone)]
pub enum TraceValue {
    /// A received packet: carried source address and payload size.
    Packet {
        /// Source network address.
        source: Ipv4Addr,
        /// Payload size in bytes.
        bytes: u32,
        /// Node the packet originated from.
        origin: NodeId,
    },
    /// Remaining energy in joules.
    Energy(f64),
}

/// A single trace firing, as emitted by an entity during dispatch.
#[derive(Debug, Clone)]
pub struct TraceFiring {
    /// Entity that fired the trace.
    pub entity: EntityId,
    /// Node the firing is about.
    pub subject: NodeId,
    /// Which trace point fired.
    pub point: TraceName,
    /// Carried value.
    pub value: TraceValue,
}

// ============================================================================
// Observations
// ============================================================================

/// Classification of a received packet against the allow-list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AccessOutcome {
    /// Source address is on the allow-list.
    Authorized,
    /// Source address is not on the allow-list.
    Unauthorized,
}

/// What kind of thing an observation records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum ObservationKind {
    /// A packet was received.
    PacketReceived,
    /// A node's energy level changed.
    EnergyLevelChanged,
    /// A received packet was classified against the allow-list.
    AccessDecision,
}

/// Typed detail carried by an observation.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum ObservationDetail {
    /// Packet reception.
    PacketReceived {
        /// Source network address.
        source: Ipv4Addr,
        /// Payload size in bytes.
        bytes: u32,
        /// Node the packet originated from.
        origin: NodeId,
    },
    /// Remaining energy in joules.
    EnergyLevel(f64),
    /// Allow-list classification of a received packet.
    Access {
        /// Source network address that was classified.
        source: Ipv4Addr,
        /// The classification.
        outcome: AccessOutcome,
    },
}

/// An immutable record of a single trace firing.
///
/// Produced exactly once per firing, never edited or removed; the ordered
/// sequence of observations is folded into a run summary after the run halts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Observation {
    /// Simulation time of the underlying firing.
    pub timestamp: SimTime,
    /// What kind of observation this is.
    pub kind: ObservationKind,
    /// Node the observation is about.
    pub subject: NodeId,
    /// Typed detail.
    pub detail: ObservationDetail,
}

/// Append-only log of observations.
///
/// The only mutation is [`append`](Self::append); freezing consumes the log
/// and yields the immutable record sequence.
#[derive(Debug, Default)]
pub struct ObservationLog {
    records: Vec<Observation>,
}

impl ObservationLog {
    /// Create an empty log.
    pub fn new() -> Self {
        ObservationLog { records: Vec::new() }
    }

    /// Append an observation.
    pub fn append(&mut self, observation: Observation) {
        self.records.push(observation);
    }

    /// Number of observations recorded so far.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether the log is empty.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Iterate over the recorded observations.
    pub fn iter(&self) -> impl Iterator<Item = &Observation> {
        self.records.iter()
    }

    /// Freeze the log, consuming it. No further appends are possible.
    pub fn freeze(self) -> Vec<Observation> {
        self.records
    }
}

// ============================================================================
// Observers
// ============================================================================

/// A synchronous consumer of observations.
///
/// Observers run inside the event loop's thread, in registration order,
/// immediately after the source observation is appended. They may derive
/// further observations (appended after the source record) but must not
/// block or schedule simulated events.
pub trait Observer: Send {
    /// React to a freshly appended observation.
    fn on_event(&mut self, observation: &Observation, log: &mut ObservationLog);
}

// ============================================================================
// Allow-List
// ============================================================================

/// An immutable set of permitted source addresses.
///
/// Fixed before the run starts; exact-match lookups only.
#[derive(Debug, Clone, Default)]
pub struct AllowList {
    addresses: HashSet<Ipv4Addr>,
}

impl AllowList {
    /// Build an allow-list from a set of addresses.
    pub fn new(addresses: impl IntoIterator<Item = Ipv4Addr>) -> Self {
        AllowList {
            addresses: addresses.into_iter().collect(),
        }
    }

    /// Whether the given address is permitted.
    pub fn permits(&self, address: Ipv4Addr) -> bool {
        self.addresses.contains(&address)
    }

    /// Number of addresses on the list.
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    /// Whether the list is empty.
    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_exact_match() {
        let acl = AllowList::new([Ipv4Addr::new(10, 1, 1, 2)]);
        assert!(acl.permits(Ipv4Addr::new(10, 1, 1, 2)));
        assert!(!acl.permits(Ipv4Addr::new(10, 1, 1, 3)));
        assert_eq!(acl.len(), 1);
    }

    #[test]
    fn test_log_preserves_append_order() {
        let mut log = ObservationLog::new();
        for i in 0..3u32 {
            log.append(Observation {
                timestamp: SimTime::from_secs(i as f64),
                kind: ObservationKind::EnergyLevelChanged,
                subject: NodeId(i),
                detail: ObservationDetail::EnergyLevel(1.0 - i as f64 * 0.1),
            });
        }
        assert_eq!(log.len(), 3);

        let frozen = log.freeze();
        let subjects: Vec<u32> = frozen.iter().map(|o| o.subject.0).collect();
        assert_eq!(subjects, vec![0, 1, 2]);
    }
}
