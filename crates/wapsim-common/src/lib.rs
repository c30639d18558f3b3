//! # wapsim-common
//!
//! Common types and traits for the wapsim simulation core.
//!
//! This crate provides the discrete-event primitives shared by every other
//! crate in the workspace:
//! - Time representation ([`SimTime`])
//! - Entity and node identification ([`EntityId`], [`NodeId`])
//! - Event system ([`Event`], [`EventPayload`])
//! - Simulation context ([`SimContext`])
//! - Entity traits ([`Entity`], [`EntityRegistry`])
//! - The observation model ([`observe`])

pub mod observe;

use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

pub use observe::{
    AccessOutcome, AllowList, Observation, ObservationDetail, ObservationKind, ObservationLog,
    Observer, TraceFiring, TraceName, TraceValue,
};

// ============================================================================
// Error Types
// ============================================================================

/// Simulation errors.
#[derive(Debug, Error)]
pub enum SimError {
    /// Entity not found.
    #[error("Entity not found: {0:?}")]
    EntityNotFound(EntityId),

    /// Event handler error.
    #[error("Event handler error in entity {entity:?}: {message}")]
    HandlerError {
        /// Entity that had the error.
        entity: EntityId,
        /// Error message.
        message: String,
    },
}

// ============================================================================
// Time Types
// ============================================================================

/// Simulation time in microseconds since simulation start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct SimTime(u64);

impl SimTime {
    /// Zero time.
    pub const ZERO: SimTime = SimTime(0);

    /// Create from microseconds.
    pub const fn from_micros(us: u64) -> Self {
        SimTime(us)
    }

    /// Create from milliseconds.
    pub fn from_millis(ms: u64) -> Self {
        SimTime(ms * 1000)
    }

    /// Create from seconds (float). Negative values clamp to zero.
    pub fn from_secs(s: f64) -> Self {
        SimTime((s.max(0.0) * 1_000_000.0) as u64)
    }

    /// Get as microseconds.
    pub fn as_micros(&self) -> u64 {
        self.0
    }

    /// Get as seconds (float).
    pub fn as_secs_f64(&self) -> f64 {
        self.0 as f64 / 1_000_000.0
    }
}

impl std::ops::Add for SimTime {
    type Output = SimTime;

    fn add(self, rhs: Self) -> Self::Output {
        SimTime(self.0 + rhs.0)
    }
}

impl std::ops::Sub for SimTime {
    type Output = SimTime;

    fn sub(self, rhs: Self) -> Self::Output {
        SimTime(self.0.saturating_sub(rhs.0))
    }
}

impl std::fmt::Display for SimTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.6}s", self.as_secs_f64())
    }
}

// ============================================================================
// Identity Types
// ============================================================================

/// Unique identifier for an entity in the simulation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl EntityId {
    /// Create a new entity ID.
    pub fn new(id: u64) -> Self {
        EntityId(id)
    }
}

/// Stable identity of a simulation participant (a node), distinct from the
/// entity IDs of the pieces that implement it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node-{}", self.0)
    }
}

// ============================================================================
// Event Types
// ============================================================================

/// Unique identifier for an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub u64);

/// A simulation event.
#[derive(Debug, Clone)]
pub struct Event {
    /// Unique event ID.
    pub id: EventId,
    /// Time when the event occurs.
    pub time: SimTime,
    /// Entity that created the event.
    pub source: EntityId,
    /// Target entities for the event.
    pub targets: Vec<EntityId>,
    /// Event payload.
    pub payload: EventPayload,
}

impl PartialEq for Event {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Event {}

impl PartialOrd for Event {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Event {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reverse ordering for min-heap (earliest time first, then lowest ID
        // so same-time events dispatch in creation order).
        other.time.cmp(&self.time).then_with(|| other.id.0.cmp(&self.id.0))
    }
}

/// A packet handed from a sender to the channel.
#[derive(Debug, Clone)]
pub struct TransmitEvent {
    /// Originating node.
    pub node: NodeId,
    /// Source network address carried by the packet.
    pub source: std::net::Ipv4Addr,
    /// Payload size in bytes.
    pub bytes: u32,
}

/// A packet the channel delivers to a receiving node.
#[derive(Debug, Clone)]
pub struct DeliverEvent {
    /// Originating node.
    pub origin: NodeId,
    /// Source network address carried by the packet.
    pub source: std::net::Ipv4Addr,
    /// Payload size in bytes.
    pub bytes: u32,
}

/// Event payload variants.
#[derive(Debug, Clone)]
pub enum EventPayload {
    /// A node hands a packet to the channel.
    Transmit(TransmitEvent),
    /// The channel delivers a packet to a receiver.
    Deliver(DeliverEvent),
    /// A delayed callback.
    Timer {
        /// User-defined timer ID.
        timer_id: u64,
    },
    /// End the simulation.
    SimulationEnd,
}

// ============================================================================
// Simulation Context
// ============================================================================

/// Context passed to entities during event handling.
///
/// Besides time and the seeded RNG it collects the events an entity posts
/// and the trace firings it emits; the event loop drains both after every
/// dispatch, so a trace firing is observed before the next queued event is
/// considered.
pub struct SimContext {
    time: SimTime,
    rng: ChaCha8Rng,
    pending_events: Vec<Event>,
    pending_traces: Vec<TraceFiring>,
    next_event_id: u64,
    source_entity: EntityId,
}

impl SimContext {
    /// Create a new simulation context.
    pub fn new(seed: u64) -> Self {
        SimContext {
            time: SimTime::ZERO,
            rng: ChaCha8Rng::seed_from_u64(seed),
            pending_events: Vec::new(),
            pending_traces: Vec::new(),
            next_event_id: 0,
            source_entity: EntityId(0),
        }
    }

    /// Get the current simulation time.
    pub fn time(&self) -> SimTime {
        self.time
    }

    /// Get mutable access to the random number generator.
    pub fn rng(&mut self) -> &mut ChaCha8Rng {
        &mut self.rng
    }

    /// Set the current time (used by event loop).
    pub fn set_time(&mut self, time: SimTime) {
        self.time = time;
    }

    /// Set the source entity (used by event loop).
    pub fn set_source(&mut self, entity: EntityId) {
        self.source_entity = entity;
    }

    /// Post an event to occur after a delay.
    pub fn post_event(&mut self, delay: SimTime, targets: Vec<EntityId>, payload: EventPayload) {
        let event = Event {
            id: EventId(self.next_event_id),
            time: self.time + delay,
            source: self.source_entity,
            targets,
            payload,
        };
        self.next_event_id += 1;
        self.pending_events.push(event);
    }

    /// Emit a trace firing from the currently dispatching entity.
    ///
    /// Firings are delivered to the observation layer synchronously after
    /// the current dispatch completes; they never re-enter the event queue.
    pub fn fire_trace(&mut self, subject: NodeId, point: TraceName, value: TraceValue) {
        self.pending_traces.push(TraceFiring {
            entity: self.source_entity,
            subject,
            point,
            value,
        });
    }

    /// Take all pending events (used by event loop).
    pub fn take_pending_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending_events)
    }

    /// Take all pending trace firings (used by event loop).
    pub fn take_pending_traces(&mut self) -> Vec<TraceFiring> {
        std::mem::take(&mut self.pending_traces)
    }

    /// Get the next event ID (used by event loop for external event creation).
    pub fn next_event_id(&mut self) -> u64 {
        let id = self.next_event_id;
        self.next_event_id += 1;
        id
    }
}

// ============================================================================
// Entity Trait
// ============================================================================

/// Base trait for all simulation entities.
pub trait Entity: Send {
    /// Get the entity's unique ID.
    fn entity_id(&self) -> EntityId;

    /// The trace points this entity can fire. Bindings against anything
    /// else fail at registration time.
    fn trace_points(&self) -> &'static [TraceName] {
        &[]
    }

    /// Handle an event.
    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError>;
}

// ============================================================================
// Entity Registry
// ============================================================================

/// Registry for managing simulation entities.
pub struct EntityRegistry {
    entities: HashMap<EntityId, Box<dyn Entity>>,
}

impl EntityRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        EntityRegistry {
            entities: HashMap::new(),
        }
    }

    /// Register an entity.
    pub fn register(&mut self, entity: Box<dyn Entity>) {
        let id = entity.entity_id();
        self.entities.insert(id, entity);
    }

    /// Get an entity by ID.
    pub fn get(&self, id: EntityId) -> Option<&dyn Entity> {
        self.entities.get(&id).map(|e| e.as_ref())
    }

    /// Get a mutable reference to an entity by ID.
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut Box<dyn Entity>> {
        self.entities.get_mut(&id)
    }

    /// Get the number of registered entities.
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Check if the registry is empty.
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }
}

impl Default for EntityRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sim_time_conversions() {
        let time = SimTime::from_secs(1.5);
        assert_eq!(time.as_micros(), 1_500_000);
        assert!((time.as_secs_f64() - 1.5).abs() < 0.0001);
    }

    #[test]
    fn test_sim_time_arithmetic() {
        let t1 = SimTime::from_millis(100);
        let t2 = SimTime::from_millis(50);
        assert_eq!((t1 + t2).as_micros(), 150_000);
        assert_eq!((t1 - t2).as_micros(), 50_000);
        // Subtraction saturates rather than wrapping.
        assert_eq!((t2 - t1).as_micros(), 0);
    }

    #[test]
    fn test_event_heap_ordering() {
        use std::collections::BinaryHeap;

        let mk = |id: u64, us: u64| Event {
            id: EventId(id),
            time: SimTime::from_micros(us),
            source: EntityId(0),
            targets: vec![],
            payload: EventPayload::Timer { timer_id: 0 },
        };

        let mut heap = BinaryHeap::new();
        heap.push(mk(2, 300));
        heap.push(mk(0, 100));
        heap.push(mk(3, 100));
        heap.push(mk(1, 200));

        // Earliest time first; ties broken by creation (ID) order.
        let order: Vec<u64> = std::iter::from_fn(|| heap.pop()).map(|e| e.id.0).collect();
        assert_eq!(order, vec![0, 3, 1, 2]);
    }

    #[test]
    fn test_context_collects_traces_in_emit_order() {
        let mut ctx = SimContext::new(7);
        ctx.set_time(SimTime::from_secs(2.0));
        ctx.fire_trace(NodeId(1), TraceName::RemainingEnergy, TraceValue::Energy(0.9));
        ctx.fire_trace(NodeId(2), TraceName::RemainingEnergy, TraceValue::Energy(0.8));

        let traces = ctx.take_pending_traces();
        assert_eq!(traces.len(), 2);
        assert_eq!(traces[0].subject, NodeId(1));
        assert_eq!(traces[1].subject, NodeId(2));
        assert!(ctx.take_pending_traces().is_empty());
    }
}
