//! Bridge between entity trace firings and the observation log.
//!
//! The event loop drains trace firings after every dispatch and hands them
//! here. A firing only becomes an [`Observation`] when its (entity, trace
//! point) pair was bound beforehand; unbound firings are dropped. Each
//! accepted firing produces exactly one observation, after which registered
//! observers run synchronously in registration order.

use crate::RunnerError;
use wapsim_common::{
    AccessOutcome, AllowList, Entity, EntityId, NodeId, Observation, ObservationDetail,
    ObservationKind, ObservationLog, Observer, SimTime, TraceFiring, TraceName, TraceValue,
};

/// A bound (entity, trace point) pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Binding {
    entity: EntityId,
    point: TraceName,
}

/// Converts bound trace firings into observations and fans them out to
/// observers.
pub struct ObservationBridge {
    bindings: Vec<Binding>,
    observers: Vec<Box<dyn Observer>>,
    log: ObservationLog,
}

impl ObservationBridge {
    /// Create a bridge with no bindings and no observers.
    pub fn new() -> Self {
        ObservationBridge {
            bindings: Vec::new(),
            observers: Vec::new(),
            log: ObservationLog::new(),
        }
    }

    /// Bind a trace point on an entity.
    ///
    /// Fails if the entity does not declare the point: a misspelled or
    /// missing binding surfaces here, before the run starts, instead of as
    /// silently absent observations.
    pub fn bind(&mut self, entity: &dyn Entity, point: TraceName) -> Result<(), RunnerError> {
        if !entity.trace_points().contains(&point) {
            return Err(RunnerError::TraceBinding {
                entity: entity.entity_id(),
                point,
            });
        }
        let binding = Binding {
            entity: entity.entity_id(),
            point,
        };
        if !self.bindings.contains(&binding) {
            self.bindings.push(binding);
        }
        Ok(())
    }

    /// Register an observer. Observers run in registration order.
    pub fn add_observer(&mut self, observer: Box<dyn Observer>) {
        self.observers.push(observer);
    }

    /// Deliver one trace firing.
    ///
    /// Unbound firings are dropped. Bound firings append one observation and
    /// then run every observer against it; anything an observer appends lands
    /// after the source record.
    pub fn deliver(&mut self, firing: &TraceFiring, time: SimTime) {
        let bound = self
            .bindings
            .iter()
            .any(|b| b.entity == firing.entity && b.point == firing.point);
        if !bound {
            return;
        }

        let (kind, detail) = match (&firing.point, &firing.value) {
            (TraceName::PacketSinkRx | TraceName::PhyRxEnd, TraceValue::Packet { source, bytes, origin }) => (
                ObservationKind::PacketReceived,
                ObservationDetail::PacketReceived {
                    source: *source,
                    bytes: *bytes,
                    origin: *origin,
                },
            ),
            (TraceName::RemainingEnergy, TraceValue::Energy(level)) => (
                ObservationKind::EnergyLevelChanged,
                ObservationDetail::EnergyLevel(*level),
            ),
            (point, value) => {
                log::warn!("trace {point:?} fired with mismatched value {value:?}, dropped");
                return;
            }
        };

        let observation = Observation {
            timestamp: time,
            kind,
            subject: firing.subject,
            detail,
        };
        self.log.append(observation.clone());
        for observer in &mut self.observers {
            observer.on_event(&observation, &mut self.log);
        }
    }

    /// Observations recorded so far.
    pub fn log(&self) -> &ObservationLog {
        &self.log
    }

    /// Freeze the log, consuming the bridge.
    pub fn freeze(self) -> Vec<Observation> {
        self.log.freeze()
    }
}

impl Default for ObservationBridge {
    fn default() -> Self {
        Self::new()
    }
}

/// Classifies every received packet against a fixed allow-list.
///
/// For each packet-reception observation at the watched hub it appends one
/// access-decision observation with the same timestamp. The allow-list never
/// changes after construction, so a source address is classified the same
/// way for the whole run.
pub struct AccessInspector {
    allow_list: AllowList,
    hub: NodeId,
}

impl AccessInspector {
    /// Create an inspector for the given hub node.
    pub fn new(allow_list: AllowList, hub: NodeId) -> Self {
        AccessInspector { allow_list, hub }
    }
}

impl Observer for AccessInspector {
    fn on_event(&mut self, observation: &Observation, log: &mut ObservationLog) {
        if observation.kind != ObservationKind::PacketReceived || observation.subject != self.hub {
            return;
        }
        let ObservationDetail::PacketReceived { source, bytes, .. } = &observation.detail else {
            return;
        };
        let outcome = if self.allow_list.permits(*source) {
            AccessOutcome::Authorized
        } else {
            AccessOutcome::Unauthorized
        };
        match outcome {
            AccessOutcome::Authorized => {
                log::info!("[AUTHORIZED] packet from {source} size={bytes} bytes")
            }
            AccessOutcome::Unauthorized => {
                log::info!("[UNAUTHORIZED] packet from {source} size={bytes} bytes")
            }
        }
        log.append(Observation {
            timestamp: observation.timestamp,
            kind: ObservationKind::AccessDecision,
            subject: observation.subject,
            detail: ObservationDetail::Access {
                source: *source,
                outcome,
            },
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use wapsim_common::{Event, SimContext, SimError};

    struct FakeSink {
        id: EntityId,
    }

    impl Entity for FakeSink {
        fn entity_id(&self) -> EntityId {
            self.id
        }

        fn trace_points(&self) -> &'static [TraceName] {
            &[TraceName::PacketSinkRx]
        }

        fn handle_event(&mut self, _: &Event, _: &mut SimContext) -> Result<(), SimError> {
            Ok(())
        }
    }

    fn packet_firing(entity: EntityId, subject: NodeId, source: Ipv4Addr) -> TraceFiring {
        TraceFiring {
            entity,
            subject,
            point: TraceName::PacketSinkRx,
            value: TraceValue::Packet {
                source,
                bytes: 512,
                origin: NodeId(1),
            },
        }
    }

    #[test]
    fn test_unbound_firing_is_dropped() {
        let mut bridge = ObservationBridge::new();
        let firing = packet_firing(EntityId(1), NodeId(0), Ipv4Addr::new(10, 1, 1, 2));
        bridge.deliver(&firing, SimTime::from_secs(1.0));
        assert!(bridge.log().is_empty());
    }

    #[test]
    fn test_binding_against_undeclared_point_fails() {
        let mut bridge = ObservationBridge::new();
        let sink = FakeSink { id: EntityId(1) };
        assert!(bridge.bind(&sink, TraceName::PacketSinkRx).is_ok());
        let err = bridge.bind(&sink, TraceName::RemainingEnergy).unwrap_err();
        assert!(matches!(err, RunnerError::TraceBinding { .. }));
    }

    #[test]
    fn test_inspector_classifies_each_reception() {
        let client = Ipv4Addr::new(10, 1, 1, 2);
        let rogue = Ipv4Addr::new(10, 1, 1, 3);
        let hub = NodeId(0);

        let mut bridge = ObservationBridge::new();
        let sink = FakeSink { id: EntityId(1) };
        bridge.bind(&sink, TraceName::PacketSinkRx).unwrap();
        bridge.add_observer(Box::new(AccessInspector::new(AllowList::new([client]), hub)));

        bridge.deliver(&packet_firing(EntityId(1), hub, client), SimTime::from_secs(2.0));
        bridge.deliver(&packet_firing(EntityId(1), hub, rogue), SimTime::from_secs(2.5));

        let records = bridge.freeze();
        // Each reception is followed by its access decision.
        assert_eq!(records.len(), 4);
        assert_eq!(records[0].kind, ObservationKind::PacketReceived);
        assert_eq!(
            records[1].detail,
            ObservationDetail::Access {
                source: client,
                outcome: AccessOutcome::Authorized
            }
        );
        assert_eq!(records[1].timestamp, records[0].timestamp);
        assert_eq!(
            records[3].detail,
            ObservationDetail::Access {
                source: rogue,
                outcome: AccessOutcome::Unauthorized
            }
        );
    }
}
