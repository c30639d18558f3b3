//! # wapsim-scenario
//!
//! Scenario configuration and simulation building for wapsim.
//!
//! This crate provides:
//! - Scenario parameter types with serde defaults and validation
//!   ([`IotScenarioConfig`], [`SecurityScenarioConfig`])
//! - Topology building ([`build_topology`], [`Topology`], [`PlacementPolicy`])
//! - Traffic scheduling ([`TrafficSchedule`])
//! - Simulation assembly ([`build_iot`], [`build_security`],
//!   [`BuiltScenario`])
//!
//! All randomness (placement draws) comes from a caller-provided seed, so
//! two builds with identical configuration and seed produce identical
//! topologies, identical schedules and ultimately identical run summaries.

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::net::Ipv4Addr;
use std::path::Path;
use thiserror::Error;
use wapsim_common::{
    AllowList, EntityId, Event, EventId, EventPayload, EntityRegistry, NodeId, SimTime, TraceName,
};
use wapsim_net::{
    BasicEnergySource, Channel, ChannelParams, EnergyModelParams, Position, SendPattern, Sender,
    SenderConfig, Sink, TrafficFlow, IDLE_TICK, TIMER_IDLE_TICK, TIMER_SEND,
};

// ============================================================================
// Error Types
// ============================================================================

/// Errors raised while configuring or building a scenario.
///
/// All of these are fatal and surface before the event loop starts.
#[derive(Debug, Error)]
pub enum ScenarioError {
    /// Invalid or missing scenario parameters.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Placement or role assignment impossible given the constraints.
    #[error("Topology error: {0}")]
    Topology(String),

    /// YAML parsing error in a scenario file.
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// IO error while reading a scenario file.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

fn require_positive(value: f64, what: &str) -> Result<(), ScenarioError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ScenarioError::Configuration(format!(
            "{what} must be a positive number, got {value}"
        )))
    }
}

// ============================================================================
// Roles and Placement
// ============================================================================

/// Role of a node in the scenario.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Role {
    /// The access point endpoint traffic converges on.
    Hub,
    /// A legitimate traffic-generating participant.
    Endpoint,
    /// A participant deliberately left off the allow-list.
    Adversary,
}

/// How a node is placed at topology build time.
///
/// Random draws are evaluated exactly once per node, at build time; nothing
/// moves during the run.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PlacementPolicy {
    /// A fixed point.
    Fixed(Position),
    /// A uniform draw on a disc or annulus around a center: radius uniform
    /// in `[min_radius, max_radius]`, angle uniform in `[0, 2*pi)`.
    UniformDisc {
        /// Center of the disc.
        center: Position,
        /// Inner radius in meters.
        min_radius: f64,
        /// Outer radius in meters.
        max_radius: f64,
    },
}

impl PlacementPolicy {
    fn validate(&self) -> Result<(), ScenarioError> {
        if let PlacementPolicy::UniformDisc {
            min_radius,
            max_radius,
            ..
        } = self
        {
            if *min_radius < 0.0 || !min_radius.is_finite() || !max_radius.is_finite() {
                return Err(ScenarioError::Topology(format!(
                    "disc radii must be non-negative, got [{min_radius}, {max_radius}]"
                )));
            }
            if max_radius < min_radius {
                return Err(ScenarioError::Topology(format!(
                    "disc outer radius {max_radius} is smaller than inner radius {min_radius}"
                )));
            }
        }
        Ok(())
    }

    fn sample(&self, rng: &mut ChaCha8Rng) -> Position {
        match self {
            PlacementPolicy::Fixed(p) => *p,
            PlacementPolicy::UniformDisc {
                center,
                min_radius,
                max_radius,
            } => {
                let rho = if max_radius > min_radius {
                    rng.gen_range(*min_radius..=*max_radius)
                } else {
                    *min_radius
                };
                let theta = rng.gen_range(0.0..std::f64::consts::TAU);
                Position::new(center.x + rho * theta.cos(), center.y + rho * theta.sin())
            }
        }
    }
}

// ============================================================================
// Topology
// ============================================================================

/// Node counts per role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeCounts {
    /// Hub nodes (must be at least one).
    pub hubs: u32,
    /// Legitimate endpoints.
    pub endpoints: u32,
    /// Adversarial endpoints.
    pub adversaries: u32,
}

impl NodeCounts {
    /// Total node count.
    pub fn total(&self) -> u32 {
        self.hubs + self.endpoints + self.adversaries
    }
}

/// Everything needed to build a topology.
#[derive(Debug, Clone)]
pub struct TopologySpec {
    /// Node counts per role.
    pub counts: NodeCounts,
    /// Placement of hub nodes.
    pub hub_placement: PlacementPolicy,
    /// Placement of endpoint nodes.
    pub endpoint_placement: PlacementPolicy,
    /// Placement of adversary nodes.
    pub adversary_placement: PlacementPolicy,
    /// Initial energy budget attached to each endpoint, if any.
    pub endpoint_energy_j: Option<f64>,
    /// Network base address; hosts are assigned sequentially above it.
    pub address_base: Ipv4Addr,
}

/// A node produced at topology build time.
///
/// Immutable for the rest of the run apart from its energy budget, which is
/// owned by the node's sender entity and only ever decreases.
#[derive(Debug, Clone)]
pub struct NodeRecord {
    /// Stable identity.
    pub id: NodeId,
    /// Role tag.
    pub role: Role,
    /// Build-time position.
    pub position: Position,
    /// Assigned network address.
    pub address: Ipv4Addr,
    /// Initial energy budget in joules, if one is attached.
    pub initial_energy_j: Option<f64>,
}

/// The built topology: nodes with roles, positions and addresses.
///
/// Only [`build_topology`] produces one, so a hub is always present.
#[derive(Debug, Clone)]
pub struct Topology {
    nodes: Vec<NodeRecord>,
}

impl Topology {
    /// All nodes, in creation order (hubs, endpoints, adversaries).
    pub fn nodes(&self) -> &[NodeRecord] {
        &self.nodes
    }

    /// The first hub node.
    pub fn hub(&self) -> &NodeRecord {
        self.nodes
            .iter()
            .find(|n| n.role == Role::Hub)
            .expect("topology is built with at least one hub")
    }

    /// Nodes with the given role.
    pub fn with_role(&self, role: Role) -> impl Iterator<Item = &NodeRecord> {
        self.nodes.iter().filter(move |n| n.role == role)
    }

    /// Look up a node by identity.
    pub fn find(&self, id: NodeId) -> Option<&NodeRecord> {
        self.nodes.iter().find(|n| n.id == id)
    }
}

fn host_address(base: Ipv4Addr, host: u32) -> Ipv4Addr {
    Ipv4Addr::from(u32::from(base) + host)
}

/// Build a topology from the given spec.
///
/// Placement draws are evaluated once per node here and never re-sampled.
/// Addresses are assigned sequentially in creation order starting one above
/// the base address.
pub fn build_topology(spec: &TopologySpec, rng: &mut ChaCha8Rng) -> Result<Topology, ScenarioError> {
    if spec.counts.total() == 0 {
        return Err(ScenarioError::Configuration(
            "scenario has zero nodes".to_string(),
        ));
    }
    if spec.counts.hubs == 0 {
        return Err(ScenarioError::Configuration(
            "scenario needs at least one hub node".to_string(),
        ));
    }
    spec.hub_placement.validate()?;
    spec.endpoint_placement.validate()?;
    spec.adversary_placement.validate()?;

    let mut nodes = Vec::with_capacity(spec.counts.total() as usize);
    let mut next_host: u32 = 1;
    let roles = [
        (Role::Hub, spec.counts.hubs, &spec.hub_placement, None),
        (
            Role::Endpoint,
            spec.counts.endpoints,
            &spec.endpoint_placement,
            spec.endpoint_energy_j,
        ),
        (
            Role::Adversary,
            spec.counts.adversaries,
            &spec.adversary_placement,
            None,
        ),
    ];
    for (role, count, placement, energy) in roles {
        for _ in 0..count {
            let id = NodeId(nodes.len() as u32);
            nodes.push(NodeRecord {
                id,
                role,
                position: placement.sample(rng),
                address: host_address(spec.address_base, next_host),
                initial_energy_j: energy,
            });
            next_host += 1;
        }
    }

    Ok(Topology { nodes })
}

// ============================================================================
// Traffic Schedule
// ============================================================================

/// The set of flows driving a run.
///
/// Flows are scheduled once, before run start, and never mutated. An empty
/// schedule is legal and yields a run with no packet traffic.
#[derive(Debug, Clone, Default)]
pub struct TrafficSchedule {
    flows: Vec<TrafficFlow>,
}

impl TrafficSchedule {
    /// Create an empty schedule.
    pub fn new() -> Self {
        TrafficSchedule { flows: Vec::new() }
    }

    /// Add a flow. A window with `stop <= start` is accepted as a no-op.
    pub fn schedule(&mut self, flow: TrafficFlow) {
        self.flows.push(flow);
    }

    /// The scheduled flows.
    pub fn flows(&self) -> &[TrafficFlow] {
        &self.flows
    }

    /// Total offered packet count, derived analytically from the flow
    /// parameters (never from counted send events).
    pub fn total_offered(&self) -> u64 {
        self.flows.iter().map(|f| f.packets_offered()).sum()
    }
}

// ============================================================================
// Scenario Configurations
// ============================================================================

/// Parameters of the IoT energy / delivery-ratio scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IotScenarioConfig {
    /// Number of IoT devices.
    pub devices: u32,
    /// Simulation duration in seconds.
    pub duration_s: f64,
    /// Initial energy per device in joules.
    pub initial_energy_j: f64,
    /// Outer placement radius around the hub in meters.
    pub distance_m: f64,
    /// Packets per second per device.
    pub packet_rate: u32,
    /// Payload size in bytes.
    pub packet_size: u32,
}

impl Default for IotScenarioConfig {
    fn default() -> Self {
        IotScenarioConfig {
            devices: 20,
            duration_s: 10.0,
            initial_energy_j: 1.0,
            distance_m: 30.0,
            packet_rate: 1,
            packet_size: 512,
        }
    }
}

impl IotScenarioConfig {
    /// Validate all parameters, failing before anything is built.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        if self.devices == 0 {
            return Err(ScenarioError::Configuration(
                "device count must be at least 1".to_string(),
            ));
        }
        require_positive(self.duration_s, "simulation duration")?;
        require_positive(self.initial_energy_j, "initial energy")?;
        require_positive(self.distance_m, "inter-node distance")?;
        if self.packet_rate == 0 {
            return Err(ScenarioError::Configuration(
                "packet rate must be at least 1".to_string(),
            ));
        }
        if self.packet_size == 0 {
            return Err(ScenarioError::Configuration(
                "packet size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

/// Parameters of the allow-list access-control scenario.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecurityScenarioConfig {
    /// Simulation duration in seconds.
    pub duration_s: f64,
    /// Placement disc radius for the authorized client in meters.
    pub distance_m: f64,
    /// Packet bound for the authorized client.
    pub authorized_packets: u32,
    /// Payload size of authorized packets in bytes.
    pub authorized_size: u32,
    /// Packet bound for the rogue client.
    pub rogue_packets: u32,
    /// Payload size of rogue packets in bytes.
    pub rogue_size: u32,
}

impl Default for SecurityScenarioConfig {
    fn default() -> Self {
        SecurityScenarioConfig {
            duration_s: 3.0,
            distance_m: 10.0,
            authorized_packets: 5,
            authorized_size: 1024,
            rogue_packets: 3,
            rogue_size: 512,
        }
    }
}

impl SecurityScenarioConfig {
    /// Validate all parameters, failing before anything is built.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        require_positive(self.duration_s, "simulation duration")?;
        require_positive(self.distance_m, "inter-node distance")?;
        if self.authorized_size == 0 || self.rogue_size == 0 {
            return Err(ScenarioError::Configuration(
                "packet size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Load a configuration from a YAML file.
    pub fn from_yaml_file(path: &Path) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}

// ============================================================================
// Simulation Building
// ============================================================================

/// Information about a node for display and trace naming.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    /// Stable node identity.
    pub node: NodeId,
    /// Human-readable name.
    pub name: String,
    /// Role tag.
    pub role: Role,
    /// Assigned address.
    pub address: Ipv4Addr,
    /// Build-time position.
    pub position: Position,
    /// Entity ID implementing the node's behavior.
    pub entity_id: EntityId,
}

/// Result of building a scenario into a runnable simulation.
pub struct BuiltScenario {
    /// Entity registry with all entities.
    pub entities: EntityRegistry,
    /// Initial events to seed the event queue.
    pub initial_events: Vec<Event>,
    /// Per-node display information.
    pub node_infos: Vec<NodeInfo>,
    /// The built topology.
    pub topology: Topology,
    /// The scheduled flows.
    pub schedule: TrafficSchedule,
    /// Allow-list, fixed before the first packet can be sent.
    pub allow_list: AllowList,
    /// The hub node identity.
    pub hub: NodeId,
    /// Entity ID of the hub's sink.
    pub hub_sink: EntityId,
    /// Which of the sink's reception traces this scenario measures.
    pub hub_trace: TraceName,
    /// Initial energy per node, for the aggregation fold.
    pub initial_energy_j: BTreeMap<NodeId, f64>,
    /// Configured stop time.
    pub stop_time: SimTime,
}

/// Base address of the scenario subnet.
const SUBNET_BASE: Ipv4Addr = Ipv4Addr::new(10, 1, 1, 0);

struct Assembler {
    entities: EntityRegistry,
    initial_events: Vec<Event>,
    node_infos: Vec<NodeInfo>,
    channel_id: EntityId,
    sink_id: EntityId,
    next_entity: u64,
    next_event: u64,
}

impl Assembler {
    fn new() -> Self {
        Assembler {
            entities: EntityRegistry::new(),
            initial_events: Vec::new(),
            node_infos: Vec::new(),
            channel_id: EntityId::new(0),
            sink_id: EntityId::new(1),
            next_entity: 2,
            next_event: 0,
        }
    }

    fn alloc_entity(&mut self) -> EntityId {
        let id = EntityId::new(self.next_entity);
        self.next_entity += 1;
        id
    }

    fn post_initial(&mut self, time: SimTime, target: EntityId, timer_id: u64) {
        self.initial_events.push(Event {
            id: EventId(self.next_event),
            time,
            source: target,
            targets: vec![target],
            payload: EventPayload::Timer { timer_id },
        });
        self.next_event += 1;
    }

    /// Create a sender entity for one scheduled flow, seeding its timers.
    fn add_sender(
        &mut self,
        record: &NodeRecord,
        name: String,
        flow: TrafficFlow,
        channel_params: &ChannelParams,
        energy_params: &EnergyModelParams,
    ) {
        let entity_id = self.alloc_entity();
        let airtime = channel_params.airtime(flow.bytes);
        let has_traffic = flow.packets_offered() > 0;
        let flow_start = flow.start;
        let energy = record
            .initial_energy_j
            .map(|j| Box::new(BasicEnergySource::new(j)) as Box<dyn wapsim_net::EnergySource>);
        let has_energy = energy.is_some();

        let sender = Sender::new(
            entity_id,
            SenderConfig {
                node: record.id,
                address: record.address,
                flow,
                channel: self.channel_id,
                energy_params: energy_params.clone(),
                airtime,
            },
            energy,
        );
        self.entities.register(Box::new(sender));

        if has_traffic {
            self.post_initial(flow_start, entity_id, TIMER_SEND);
        }
        if has_energy {
            self.post_initial(IDLE_TICK, entity_id, TIMER_IDLE_TICK);
        }

        self.node_infos.push(NodeInfo {
            node: record.id,
            name,
            role: record.role,
            address: record.address,
            position: record.position,
            entity_id,
        });
    }
}

/// Build the IoT energy / delivery-ratio scenario.
///
/// One hub at the origin; `devices` endpoints on a uniform disc of radius
/// `[1, distance_m]`, each with an attached energy budget and a
/// constant-rate flow active over `[1s, duration]`.
pub fn build_iot(config: &IotScenarioConfig, seed: u64) -> Result<BuiltScenario, ScenarioError> {
    config.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let spec = TopologySpec {
        counts: NodeCounts {
            hubs: 1,
            endpoints: config.devices,
            adversaries: 0,
        },
        hub_placement: PlacementPolicy::Fixed(Position::ORIGIN),
        endpoint_placement: PlacementPolicy::UniformDisc {
            center: Position::ORIGIN,
            min_radius: 1.0,
            max_radius: config.distance_m,
        },
        adversary_placement: PlacementPolicy::Fixed(Position::ORIGIN),
        endpoint_energy_j: Some(config.initial_energy_j),
        address_base: SUBNET_BASE,
    };
    let topology = build_topology(&spec, &mut rng)?;

    // Traffic starts one second in and runs to the end of the simulation,
    // matching the analytic sent count rate * (duration - 1).
    let mut schedule = TrafficSchedule::new();
    for endpoint in topology.with_role(Role::Endpoint) {
        schedule.schedule(TrafficFlow {
            node: endpoint.id,
            bytes: config.packet_size,
            start: SimTime::from_secs(1.0),
            stop: SimTime::from_secs(config.duration_s),
            pattern: SendPattern::ConstantRate {
                per_second: config.packet_rate,
            },
        });
    }

    // Every endpoint is authorized in this scenario.
    let allow_list = AllowList::new(topology.with_role(Role::Endpoint).map(|n| n.address));

    assemble(
        topology,
        schedule,
        allow_list,
        TraceName::PacketSinkRx,
        SimTime::from_secs(config.duration_s),
    )
}

/// Build the allow-list access-control scenario.
///
/// One hub at the origin, one authorized client on a uniform disc of radius
/// `distance_m`, one rogue fixed nearby. Only the authorized client's
/// address is on the allow-list.
pub fn build_security(
    config: &SecurityScenarioConfig,
    seed: u64,
) -> Result<BuiltScenario, ScenarioError> {
    config.validate()?;
    let mut rng = ChaCha8Rng::seed_from_u64(seed);

    let spec = TopologySpec {
        counts: NodeCounts {
            hubs: 1,
            endpoints: 1,
            adversaries: 1,
        },
        hub_placement: PlacementPolicy::Fixed(Position::ORIGIN),
        endpoint_placement: PlacementPolicy::UniformDisc {
            center: Position::ORIGIN,
            min_radius: 0.0,
            max_radius: config.distance_m,
        },
        adversary_placement: PlacementPolicy::Fixed(Position::new(5.0, 5.0)),
        endpoint_energy_j: None,
        address_base: SUBNET_BASE,
    };
    let topology = build_topology(&spec, &mut rng)?;

    let client = topology
        .with_role(Role::Endpoint)
        .next()
        .ok_or_else(|| ScenarioError::Topology("no authorized client".to_string()))?;
    let rogue = topology
        .with_role(Role::Adversary)
        .next()
        .ok_or_else(|| ScenarioError::Topology("no rogue client".to_string()))?;

    let stop = SimTime::from_secs(config.duration_s);
    let interval = SimTime::from_secs(1.0);
    let mut schedule = TrafficSchedule::new();
    schedule.schedule(TrafficFlow {
        node: client.id,
        bytes: config.authorized_size,
        start: SimTime::from_secs(2.0),
        stop,
        pattern: SendPattern::BoundedCount {
            count: config.authorized_packets,
            interval,
        },
    });
    schedule.schedule(TrafficFlow {
        node: rogue.id,
        bytes: config.rogue_size,
        start: SimTime::from_secs(2.5),
        stop,
        pattern: SendPattern::BoundedCount {
            count: config.rogue_packets,
            interval,
        },
    });

    // ACL: only the authorized client.
    let allow_list = AllowList::new([client.address]);

    // This scenario measures receptions at the physical layer.
    assemble(
        topology,
        schedule,
        allow_list,
        TraceName::PhyRxEnd,
        SimTime::from_secs(config.duration_s),
    )
}

/// Turn a topology and schedule into entities and initial events.
fn assemble(
    topology: Topology,
    schedule: TrafficSchedule,
    allow_list: AllowList,
    hub_trace: TraceName,
    stop_time: SimTime,
) -> Result<BuiltScenario, ScenarioError> {
    let mut asm = Assembler::new();
    let channel_params = ChannelParams::default();
    let energy_params = EnergyModelParams::default();

    let hub = topology.hub().clone();
    let mut channel = Channel::new(asm.channel_id, channel_params.clone());
    channel.set_hub(hub.id, asm.sink_id, hub.position);
    for node in topology.nodes() {
        channel.add_node(node.id, node.position);
    }

    let sink = Sink::new(asm.sink_id, hub.id);
    asm.node_infos.push(NodeInfo {
        node: hub.id,
        name: "WAP".to_string(),
        role: Role::Hub,
        address: hub.address,
        position: hub.position,
        entity_id: asm.sink_id,
    });

    let mut initial_energy_j = BTreeMap::new();
    for node in topology.nodes() {
        if let Some(j) = node.initial_energy_j {
            initial_energy_j.insert(node.id, j);
        }
    }

    // One sender entity per scheduled flow, named by role and index.
    let mut per_role = BTreeMap::new();
    for flow in schedule.flows() {
        let record = topology.find(flow.node).ok_or_else(|| {
            ScenarioError::Topology(format!("flow references unknown node {}", flow.node))
        })?;
        let index = per_role.entry(record.role).or_insert(0u32);
        let name = match record.role {
            Role::Hub => format!("WAP-{index}"),
            Role::Endpoint => format!("IoT-{index}"),
            Role::Adversary => format!("Rogue-{index}"),
        };
        *index += 1;
        asm.add_sender(record, name, flow.clone(), &channel_params, &energy_params);
    }

    asm.entities.register(Box::new(channel));
    asm.entities.register(Box::new(sink));

    log::info!(
        "built scenario: {} nodes, {} flows, {} offered packets, allow-list of {}",
        topology.nodes().len(),
        schedule.flows().len(),
        schedule.total_offered(),
        allow_list.len(),
    );

    let hub_sink = asm.sink_id;
    let hub_id = hub.id;
    Ok(BuiltScenario {
        entities: asm.entities,
        initial_events: asm.initial_events,
        node_infos: asm.node_infos,
        topology,
        schedule,
        allow_list,
        hub: hub_id,
        hub_sink,
        hub_trace,
        initial_energy_j,
        stop_time,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_nodes_rejected() {
        let spec = TopologySpec {
            counts: NodeCounts { hubs: 0, endpoints: 0, adversaries: 0 },
            hub_placement: PlacementPolicy::Fixed(Position::ORIGIN),
            endpoint_placement: PlacementPolicy::Fixed(Position::ORIGIN),
            adversary_placement: PlacementPolicy::Fixed(Position::ORIGIN),
            endpoint_energy_j: None,
            address_base: SUBNET_BASE,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = build_topology(&spec, &mut rng).unwrap_err();
        assert!(matches!(err, ScenarioError::Configuration(_)));
    }

    #[test]
    fn test_negative_radius_rejected() {
        let spec = TopologySpec {
            counts: NodeCounts { hubs: 1, endpoints: 1, adversaries: 0 },
            hub_placement: PlacementPolicy::Fixed(Position::ORIGIN),
            endpoint_placement: PlacementPolicy::UniformDisc {
                center: Position::ORIGIN,
                min_radius: -1.0,
                max_radius: 10.0,
            },
            adversary_placement: PlacementPolicy::Fixed(Position::ORIGIN),
            endpoint_energy_j: None,
            address_base: SUBNET_BASE,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        let err = build_topology(&spec, &mut rng).unwrap_err();
        assert!(matches!(err, ScenarioError::Topology(_)));
    }

    #[test]
    fn test_placement_within_bounds() {
        let placement = PlacementPolicy::UniformDisc {
            center: Position::ORIGIN,
            min_radius: 1.0,
            max_radius: 30.0,
        };
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            let p = placement.sample(&mut rng);
            let d = p.distance_to(&Position::ORIGIN);
            assert!((1.0..=30.0001).contains(&d), "distance {d} out of bounds");
        }
    }

    #[test]
    fn test_addresses_are_sequential() {
        let config = IotScenarioConfig { devices: 3, ..Default::default() };
        let built = build_iot(&config, 7).unwrap();
        let addrs: Vec<Ipv4Addr> = built.topology.nodes().iter().map(|n| n.address).collect();
        assert_eq!(
            addrs,
            vec![
                Ipv4Addr::new(10, 1, 1, 1),
                Ipv4Addr::new(10, 1, 1, 2),
                Ipv4Addr::new(10, 1, 1, 3),
                Ipv4Addr::new(10, 1, 1, 4),
            ]
        );
    }

    #[test]
    fn test_iot_offered_count_matches_analytic_product() {
        let config = IotScenarioConfig::default();
        let built = build_iot(&config, 1).unwrap();
        // 20 devices * 1 pkt/s * (10 - 1) s.
        assert_eq!(built.schedule.total_offered(), 180);
    }

    #[test]
    fn test_iot_offered_count_exact_for_non_divisor_rate() {
        let config = IotScenarioConfig {
            packet_rate: 3,
            ..Default::default()
        };
        let built = build_iot(&config, 1).unwrap();
        // 20 devices * 3 pkt/s * (10 - 1) s, despite a third of a second
        // truncating to whole microseconds.
        assert_eq!(built.schedule.total_offered(), 540);
    }

    #[test]
    fn test_scenarios_measure_their_own_reception_trace() {
        let iot = build_iot(&IotScenarioConfig::default(), 1).unwrap();
        assert_eq!(iot.hub_trace, TraceName::PacketSinkRx);

        let sec = build_security(&SecurityScenarioConfig::default(), 1).unwrap();
        assert_eq!(sec.hub_trace, TraceName::PhyRxEnd);
    }

    #[test]
    fn test_iot_config_validation() {
        let mut config = IotScenarioConfig::default();
        config.duration_s = 0.0;
        assert!(matches!(
            config.validate(),
            Err(ScenarioError::Configuration(_))
        ));

        let mut config = IotScenarioConfig::default();
        config.devices = 0;
        assert!(config.validate().is_err());

        assert!(IotScenarioConfig::default().validate().is_ok());
    }

    #[test]
    fn test_security_allow_list_is_client_only() {
        let built = build_security(&SecurityScenarioConfig::default(), 3).unwrap();
        let client = built.topology.with_role(Role::Endpoint).next().unwrap();
        let rogue = built.topology.with_role(Role::Adversary).next().unwrap();
        assert!(built.allow_list.permits(client.address));
        assert!(!built.allow_list.permits(rogue.address));
        assert_eq!(built.allow_list.len(), 1);
    }

    #[test]
    fn test_identical_seeds_build_identical_topologies() {
        let config = IotScenarioConfig::default();
        let a = build_iot(&config, 99).unwrap();
        let b = build_iot(&config, 99).unwrap();
        for (na, nb) in a.topology.nodes().iter().zip(b.topology.nodes()) {
            assert_eq!(na.position, nb.position);
            assert_eq!(na.address, nb.address);
        }
    }

    #[test]
    fn test_yaml_config_roundtrip() {
        let yaml = "devices: 5\nduration_s: 4.0\n";
        let config: IotScenarioConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.devices, 5);
        assert_eq!(config.duration_s, 4.0);
        // Unspecified fields keep their defaults.
        assert_eq!(config.packet_size, 512);
    }
}
