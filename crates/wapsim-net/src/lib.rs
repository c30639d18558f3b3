//! # wapsim-net
//!
//! Device-level entities for the wapsim access-network scenarios.
//!
//! This crate provides:
//! - Planar placement ([`Position`])
//! - Channel propagation ([`Channel`], [`ChannelParams`])
//! - The hub packet sink ([`Sink`])
//! - Per-endpoint traffic generation ([`Sender`], [`TrafficFlow`])
//! - Energy budgets ([`EnergySource`], [`BasicEnergySource`])
//!
//! All entities follow the same contract: they react to events via
//! [`Entity::handle_event`], post follow-up events through the context, and
//! surface anything measurable as trace firings. None of them touch the
//! observation log directly.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use wapsim_common::{
    DeliverEvent, Entity, EntityId, Event, EventPayload, NodeId, SimContext, SimError, SimTime,
    TraceName, TraceValue, TransmitEvent,
};

/// Timer ID used by senders for the next scheduled packet emission.
pub const TIMER_SEND: u64 = 1;
/// Timer ID used by senders for the periodic idle energy drain.
pub const TIMER_IDLE_TICK: u64 = 2;

/// Interval of the idle energy drain tick.
pub const IDLE_TICK: SimTime = SimTime::from_micros(1_000_000);

/// Speed of light in meters per second, for propagation delay.
const SPEED_OF_LIGHT_M_S: f64 = 299_792_458.0;

// ============================================================================
// Positions
// ============================================================================

/// A fixed planar position in meters.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    /// X coordinate in meters.
    pub x: f64,
    /// Y coordinate in meters.
    pub y: f64,
}

impl Position {
    /// The origin.
    pub const ORIGIN: Position = Position { x: 0.0, y: 0.0 };

    /// Create a new position.
    pub fn new(x: f64, y: f64) -> Self {
        Position { x, y }
    }

    /// Euclidean distance to another position in meters.
    pub fn distance_to(&self, other: &Position) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

// ============================================================================
// Channel
// ============================================================================

/// Log-distance propagation parameters.
///
/// Stands in for the external channel model: a packet is delivered iff its
/// received power clears the sensitivity floor, after a constant-speed
/// propagation delay plus serialization time at the configured data rate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelParams {
    /// Transmit power in dBm.
    pub tx_power_dbm: f64,
    /// Path loss at the 1 m reference distance, in dB.
    pub ref_loss_db: f64,
    /// Path loss exponent.
    pub loss_exponent: f64,
    /// Receiver sensitivity in dBm.
    pub sensitivity_dbm: f64,
    /// Link data rate in bits per second.
    pub data_rate_bps: f64,
}

impl Default for ChannelParams {
    fn default() -> Self {
        ChannelParams {
            tx_power_dbm: 16.0,
            ref_loss_db: 46.67,
            loss_exponent: 4.0,
            sensitivity_dbm: -85.0,
            data_rate_bps: 6_000_000.0,
        }
    }
}

impl ChannelParams {
    /// Path loss in dB at the given distance.
    ///
    /// Distances under the 1 m reference clamp to the reference loss.
    pub fn path_loss_db(&self, distance_m: f64) -> f64 {
        if distance_m <= 1.0 {
            self.ref_loss_db
        } else {
            self.ref_loss_db + 10.0 * self.loss_exponent * distance_m.log10()
        }
    }

    /// Received power in dBm at the given distance.
    pub fn rx_power_dbm(&self, distance_m: f64) -> f64 {
        self.tx_power_dbm - self.path_loss_db(distance_m)
    }

    /// Whether a receiver at the given distance can decode a transmission.
    pub fn in_range(&self, distance_m: f64) -> bool {
        self.rx_power_dbm(distance_m) >= self.sensitivity_dbm
    }

    /// Serialization time of a payload at the configured data rate.
    pub fn airtime(&self, bytes: u32) -> SimTime {
        SimTime::from_secs(bytes as f64 * 8.0 / self.data_rate_bps)
    }
}

/// The channel entity routes transmissions toward the hub.
///
/// It receives [`EventPayload::Transmit`] events from sender entities,
/// evaluates the link budget from the stored build-time positions, and posts
/// a delayed [`EventPayload::Deliver`] to the hub sink when the packet
/// survives. Out-of-range packets are dropped here and never observed.
pub struct Channel {
    id: EntityId,
    params: ChannelParams,
    positions: BTreeMap<NodeId, Position>,
    hub: Option<(NodeId, EntityId)>,
}

impl Channel {
    /// Create a new channel entity.
    pub fn new(id: EntityId, params: ChannelParams) -> Self {
        Channel {
            id,
            params,
            positions: BTreeMap::new(),
            hub: None,
        }
    }

    /// Record a node's build-time position.
    pub fn add_node(&mut self, node: NodeId, position: Position) {
        self.positions.insert(node, position);
    }

    /// Designate the hub node and the sink entity deliveries go to.
    pub fn set_hub(&mut self, node: NodeId, sink: EntityId, position: Position) {
        self.positions.insert(node, position);
        self.hub = Some((node, sink));
    }

    /// The channel parameters.
    pub fn params(&self) -> &ChannelParams {
        &self.params
    }
}

impl Entity for Channel {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        if let EventPayload::Transmit(tx) = &event.payload {
            let (hub_node, sink) = match self.hub {
                Some(hub) => hub,
                None => {
                    return Err(SimError::HandlerError {
                        entity: self.id,
                        message: "channel has no hub".to_string(),
                    })
                }
            };
            let from = match self.positions.get(&tx.node) {
                Some(p) => *p,
                None => {
                    return Err(SimError::HandlerError {
                        entity: self.id,
                        message: format!("unknown transmitter {}", tx.node),
                    })
                }
            };
            let to = self.positions.get(&hub_node).copied().unwrap_or(Position::ORIGIN);
            let distance = from.distance_to(&to);

            if self.params.in_range(distance) {
                let delay = self.params.airtime(tx.bytes)
                    + SimTime::from_secs(distance / SPEED_OF_LIGHT_M_S);
                ctx.post_event(
                    delay,
                    vec![sink],
                    EventPayload::Deliver(DeliverEvent {
                        origin: tx.node,
                        source: tx.source,
                        bytes: tx.bytes,
                    }),
                );
            } else {
                log::debug!(
                    "channel drop: {} -> {} at {:.1}m ({:.1} dBm below floor)",
                    tx.node,
                    hub_node,
                    distance,
                    self.params.sensitivity_dbm - self.params.rx_power_dbm(distance),
                );
            }
        }
        Ok(())
    }
}

// ============================================================================
// Sink
// ============================================================================

/// The hub's packet sink.
///
/// Fires both the physical-layer and application-layer reception traces for
/// every delivered packet; scenarios bind whichever trace point they measure.
pub struct Sink {
    id: EntityId,
    node: NodeId,
}

impl Sink {
    /// Create a new sink for the given hub node.
    pub fn new(id: EntityId, node: NodeId) -> Self {
        Sink { id, node }
    }
}

impl Entity for Sink {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn trace_points(&self) -> &'static [TraceName] {
        &[TraceName::PhyRxEnd, TraceName::PacketSinkRx]
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        if let EventPayload::Deliver(rx) = &event.payload {
            let value = TraceValue::Packet {
                source: rx.source,
                bytes: rx.bytes,
                origin: rx.origin,
            };
            ctx.fire_trace(self.node, TraceName::PhyRxEnd, value.clone());
            ctx.fire_trace(self.node, TraceName::PacketSinkRx, value);
        }
        Ok(())
    }
}

// ============================================================================
// Traffic Flows
// ============================================================================

/// Send pattern of a traffic flow.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum SendPattern {
    /// Evenly spaced emissions at this many packets per second.
    ConstantRate {
        /// Packets per second.
        per_second: u32,
    },
    /// Stop after this many packets, regardless of remaining window time.
    BoundedCount {
        /// Total packet bound.
        count: u32,
        /// Fixed inter-send interval.
        interval: SimTime,
    },
}

/// A directed send schedule from one endpoint to the hub.
///
/// Packets are emitted at [`TrafficFlow::emission_time`] for
/// `k = 0, 1, ...`, strictly before `stop` (and, for bounded flows, while
/// fewer than the bound have been sent). A window with `stop <= start` is
/// a valid no-op flow that emits nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrafficFlow {
    /// Sending node.
    pub node: NodeId,
    /// Payload size in bytes.
    pub bytes: u32,
    /// Window start.
    pub start: SimTime,
    /// Window stop (exclusive).
    pub stop: SimTime,
    /// Send pattern.
    pub pattern: SendPattern,
}

impl TrafficFlow {
    /// Time of the `k`-th emission.
    ///
    /// Constant-rate offsets are `floor(k * 1e6 / rate)` microseconds, so
    /// rounding never accumulates across a window and the emission count
    /// stays exact for rates that do not divide one second.
    pub fn emission_time(&self, k: u64) -> SimTime {
        let offset = match self.pattern {
            SendPattern::ConstantRate { per_second } => {
                SimTime::from_micros(k * 1_000_000 / u64::from(per_second.max(1)))
            }
            SendPattern::BoundedCount { interval, .. } => {
                SimTime::from_micros(k * interval.as_micros())
            }
        };
        self.start + offset
    }

    /// Number of packets this flow offers, derived analytically from its
    /// parameters alone (never from counted send events).
    pub fn packets_offered(&self) -> u64 {
        if self.stop <= self.start {
            return 0;
        }
        let window = self.stop.as_micros() - self.start.as_micros();
        match self.pattern {
            // Emissions with floor(k * 1e6 / rate) < window, which is
            // ceil(window * rate / 1e6): the rate-times-window product.
            SendPattern::ConstantRate { per_second } => {
                (window * u64::from(per_second) + 999_999) / 1_000_000
            }
            // Emissions at start + k*interval with k*interval < window.
            SendPattern::BoundedCount { count, interval } => {
                if interval == SimTime::ZERO {
                    return 0;
                }
                let slots = (window + interval.as_micros() - 1) / interval.as_micros();
                slots.min(u64::from(count))
            }
        }
    }
}

// ============================================================================
// Energy Sources
// ============================================================================

/// Capability exposed by an attached energy budget.
///
/// Resolved once at topology build time and held by the owning sender;
/// remaining energy is non-negative and non-increasing.
pub trait EnergySource: Send {
    /// Remaining energy in joules.
    fn remaining_j(&self) -> f64;

    /// Drain the given amount, clamping at zero. Returns the new level.
    fn consume_j(&mut self, joules: f64) -> f64;

    /// Whether the budget can still cover the given draw.
    fn can_supply(&self, joules: f64) -> bool {
        self.remaining_j() >= joules
    }
}

/// A linear-drain energy source with a fixed initial budget.
#[derive(Debug, Clone)]
pub struct BasicEnergySource {
    initial_j: f64,
    remaining_j: f64,
}

impl BasicEnergySource {
    /// Create a source with the given initial budget in joules.
    pub fn new(initial_j: f64) -> Self {
        BasicEnergySource {
            initial_j,
            remaining_j: initial_j,
        }
    }

    /// The initial budget in joules.
    pub fn initial_j(&self) -> f64 {
        self.initial_j
    }
}

impl EnergySource for BasicEnergySource {
    fn remaining_j(&self) -> f64 {
        self.remaining_j
    }

    fn consume_j(&mut self, joules: f64) -> f64 {
        self.remaining_j = (self.remaining_j - joules).max(0.0);
        self.remaining_j
    }
}

/// Radio energy model constants, scaled to this core's granularity.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnergyModelParams {
    /// Supply voltage in volts.
    pub voltage_v: f64,
    /// Current draw while transmitting, in amperes.
    pub tx_current_a: f64,
    /// Current draw while idle, in amperes.
    pub idle_current_a: f64,
}

impl Default for EnergyModelParams {
    fn default() -> Self {
        EnergyModelParams {
            voltage_v: 3.0,
            tx_current_a: 0.2,
            idle_current_a: 0.01,
        }
    }
}

impl EnergyModelParams {
    /// Energy drawn by one transmission of the given airtime.
    pub fn tx_energy_j(&self, airtime: SimTime) -> f64 {
        self.tx_current_a * self.voltage_v * airtime.as_secs_f64()
    }

    /// Energy drawn by one idle tick.
    pub fn idle_energy_j(&self, tick: SimTime) -> f64 {
        self.idle_current_a * self.voltage_v * tick.as_secs_f64()
    }
}

// ============================================================================
// Sender
// ============================================================================

/// Configuration for a sender entity.
pub struct SenderConfig {
    /// The node this sender implements.
    pub node: NodeId,
    /// Source address stamped on every packet.
    pub address: Ipv4Addr,
    /// The flow driving emission times.
    pub flow: TrafficFlow,
    /// Channel entity transmissions go to.
    pub channel: EntityId,
    /// Energy model constants.
    pub energy_params: EnergyModelParams,
    /// Per-packet airtime, for the transmit energy draw.
    pub airtime: SimTime,
}

/// A traffic-generating endpoint.
///
/// Driven entirely by its own timers: [`TIMER_SEND`] emits the next packet
/// of the flow, [`TIMER_IDLE_TICK`] applies the idle drain when an energy
/// source is attached. A sender whose budget cannot cover one transmission
/// goes silent for the rest of the run.
pub struct Sender {
    id: EntityId,
    config: SenderConfig,
    energy: Option<Box<dyn EnergySource>>,
    sent: u64,
    depleted: bool,
}

impl Sender {
    /// Create a new sender.
    pub fn new(id: EntityId, config: SenderConfig, energy: Option<Box<dyn EnergySource>>) -> Self {
        Sender {
            id,
            config,
            energy,
            sent: 0,
            depleted: false,
        }
    }

    /// Packets actually emitted so far.
    pub fn sent(&self) -> u64 {
        self.sent
    }

    /// Whether the next emission at the given time is inside the flow.
    fn may_send(&self, now: SimTime) -> bool {
        if now >= self.config.flow.stop || self.depleted {
            return false;
        }
        match self.config.flow.pattern {
            SendPattern::ConstantRate { .. } => true,
            SendPattern::BoundedCount { count, .. } => self.sent < u64::from(count),
        }
    }

    fn handle_send_timer(&mut self, ctx: &mut SimContext) {
        if !self.may_send(ctx.time()) {
            return;
        }

        // The transmit draw happens before the packet reaches the channel;
        // a budget that cannot cover it silences the device instead.
        if let Some(energy) = self.energy.as_mut() {
            let draw = self.config.energy_params.tx_energy_j(self.config.airtime);
            if !energy.can_supply(draw) {
                self.depleted = true;
                log::debug!("{} depleted after {} packets", self.config.node, self.sent);
                return;
            }
            let level = energy.consume_j(draw);
            ctx.fire_trace(
                self.config.node,
                TraceName::RemainingEnergy,
                TraceValue::Energy(level),
            );
        }

        ctx.post_event(
            SimTime::ZERO,
            vec![self.config.channel],
            EventPayload::Transmit(TransmitEvent {
                node: self.config.node,
                source: self.config.address,
                bytes: self.config.flow.bytes,
            }),
        );
        self.sent += 1;

        // Schedule the next emission while it still lands inside the window.
        let next = self.config.flow.emission_time(self.sent);
        if next < self.config.flow.stop && self.may_send(next) {
            ctx.post_event(
                next - ctx.time(),
                vec![self.id],
                EventPayload::Timer { timer_id: TIMER_SEND },
            );
        }
    }

    fn handle_idle_tick(&mut self, ctx: &mut SimContext) {
        let Some(energy) = self.energy.as_mut() else {
            return;
        };
        if energy.remaining_j() <= 0.0 {
            return;
        }
        let draw = self.config.energy_params.idle_energy_j(IDLE_TICK);
        let level = energy.consume_j(draw);
        ctx.fire_trace(
            self.config.node,
            TraceName::RemainingEnergy,
            TraceValue::Energy(level),
        );
        if level > 0.0 {
            ctx.post_event(
                IDLE_TICK,
                vec![self.id],
                EventPayload::Timer { timer_id: TIMER_IDLE_TICK },
            );
        }
    }
}

impl Entity for Sender {
    fn entity_id(&self) -> EntityId {
        self.id
    }

    fn trace_points(&self) -> &'static [TraceName] {
        &[TraceName::RemainingEnergy]
    }

    fn handle_event(&mut self, event: &Event, ctx: &mut SimContext) -> Result<(), SimError> {
        if let EventPayload::Timer { timer_id } = &event.payload {
            match *timer_id {
                TIMER_SEND => self.handle_send_timer(ctx),
                TIMER_IDLE_TICK => self.handle_idle_tick(ctx),
                other => {
                    return Err(SimError::HandlerError {
                        entity: self.id,
                        message: format!("unknown timer {other}"),
                    })
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flow(start: f64, stop: f64, pattern: SendPattern) -> TrafficFlow {
        TrafficFlow {
            node: NodeId(1),
            bytes: 512,
            start: SimTime::from_secs(start),
            stop: SimTime::from_secs(stop),
            pattern,
        }
    }

    fn bounded(count: u32, interval_s: f64) -> SendPattern {
        SendPattern::BoundedCount {
            count,
            interval: SimTime::from_secs(interval_s),
        }
    }

    #[test]
    fn test_constant_rate_emission_count() {
        // [1, 10) at 1 pkt/s emits at t = 1..=9.
        let f = flow(1.0, 10.0, SendPattern::ConstantRate { per_second: 1 });
        assert_eq!(f.packets_offered(), 9);
    }

    #[test]
    fn test_constant_rate_exact_for_non_divisor_rate() {
        // 3 pkt/s over a 9 s window is exactly 27 packets even though a
        // third of a second truncates to whole microseconds.
        let f = flow(1.0, 10.0, SendPattern::ConstantRate { per_second: 3 });
        assert_eq!(f.packets_offered(), 27);
        assert!(f.emission_time(26) < f.stop);
        assert_eq!(f.emission_time(27), f.stop);
    }

    #[test]
    fn test_emission_times_do_not_drift() {
        let f = flow(0.0, 100.0, SendPattern::ConstantRate { per_second: 7 });
        // Whole-second marks stay exact.
        assert_eq!(f.emission_time(7), SimTime::from_secs(1.0));
        assert_eq!(f.emission_time(70), SimTime::from_secs(10.0));
    }

    #[test]
    fn test_bounded_count_truncated_by_window() {
        // 5 packets requested but only t = 2.0 fits before stop.
        let f = flow(2.0, 3.0, bounded(5, 1.0));
        assert_eq!(f.packets_offered(), 1);

        // A wide window lets the bound govern.
        let f = flow(0.0, 100.0, bounded(5, 1.0));
        assert_eq!(f.packets_offered(), 5);
    }

    #[test]
    fn test_empty_window_is_noop() {
        let f = flow(3.0, 3.0, SendPattern::ConstantRate { per_second: 1 });
        assert_eq!(f.packets_offered(), 0);
        let f = flow(5.0, 2.0, bounded(10, 1.0));
        assert_eq!(f.packets_offered(), 0);
    }

    #[test]
    fn test_path_loss_monotonic() {
        let params = ChannelParams::default();
        assert!(params.path_loss_db(10.0) < params.path_loss_db(20.0));
        // Sub-reference distances clamp to the reference loss.
        assert_eq!(params.path_loss_db(0.5), params.ref_loss_db);
    }

    #[test]
    fn test_channel_range_cutoff() {
        let params = ChannelParams::default();
        // 16 - 46.67 - 40*log10(d) >= -85  =>  d <= ~22.9 m.
        assert!(params.in_range(20.0));
        assert!(!params.in_range(25.0));
    }

    #[test]
    fn test_energy_source_clamps_at_zero() {
        let mut source = BasicEnergySource::new(0.01);
        assert_eq!(source.consume_j(0.004), 0.006);
        assert_eq!(source.consume_j(1.0), 0.0);
        assert_eq!(source.remaining_j(), 0.0);
        assert!(!source.can_supply(0.001));
    }

    #[test]
    fn test_tx_energy_matches_model() {
        let params = EnergyModelParams::default();
        // 0.2 A * 3.0 V * 1 ms = 0.6 mJ.
        let e = params.tx_energy_j(SimTime::from_millis(1));
        assert!((e - 0.0006).abs() < 1e-9);
    }
}
