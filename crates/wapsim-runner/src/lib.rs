//! # wapsim-runner library
//!
//! The run driver for wapsim scenarios.
//!
//! A run moves through four states: configured, running, halted, reported.
//! [`EventLoop::new`] validates the scenario and its trace bindings,
//! [`EventLoop::run`] drains the event queue up to the stop time, and
//! [`EventLoop::finish`] freezes the observation log and folds it into a
//! [`RunSummary`]. The whole pipeline is single-threaded and deterministic
//! for a given scenario configuration and seed.

pub mod observe;
pub mod summary;

pub use observe::{AccessInspector, ObservationBridge};
pub use summary::{
    format_access_report, format_delivery_report, format_energy_log, summarize, NodeEnergy,
    RunSummary, SummaryInputs,
};
pub use wapsim_common::SimTime;

use std::collections::BinaryHeap;
use std::io::Write;
use thiserror::Error;
use wapsim_common::{
    EntityId, EntityRegistry, Event, EventId, EventPayload, Observation, SimContext, TraceName,
};
use wapsim_scenario::{BuiltScenario, NodeInfo, Role};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while driving a run.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Scenario configuration or build error.
    #[error("Scenario error: {0}")]
    Scenario(#[from] wapsim_scenario::ScenarioError),

    /// Simulation error during dispatch.
    #[error("Simulation error: {0}")]
    Simulation(#[from] wapsim_common::SimError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A trace binding named a point the entity does not declare.
    #[error("Trace binding error: entity {entity:?} does not declare {point:?}")]
    TraceBinding {
        /// Entity the binding targeted.
        entity: EntityId,
        /// The undeclared trace point.
        point: TraceName,
    },

    /// A run-driver method was called in the wrong state.
    #[error("Run state error: expected {expected:?}, was {actual:?}")]
    State {
        /// State the call requires.
        expected: RunState,
        /// State the driver was in.
        actual: RunState,
    },
}

// ============================================================================
// Run States
// ============================================================================

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Built and bound, not yet started.
    Configured,
    /// The event loop is draining the queue.
    Running,
    /// The stop time was reached; the log is complete but not yet folded.
    Halted,
    /// The summary has been produced.
    Reported,
}

// ============================================================================
// Run Report
// ============================================================================

/// Everything a finished run yields.
#[derive(Debug)]
pub struct RunReport {
    /// The frozen observation log, in record order.
    pub observations: Vec<Observation>,
    /// The aggregate summary.
    pub summary: RunSummary,
    /// Events dispatched before the stop time.
    pub events_processed: u64,
    /// Final simulation time.
    pub final_time: SimTime,
}

/// Write the observation log as pretty JSON.
pub fn write_observations(
    observations: &[Observation],
    output: &mut dyn Write,
) -> Result<(), RunnerError> {
    let json = serde_json::to_string_pretty(observations)?;
    writeln!(output, "{}", json)?;
    Ok(())
}

// ============================================================================
// Event Loop
// ============================================================================

/// The simulation event loop and run driver.
pub struct EventLoop {
    event_queue: BinaryHeap<Event>,
    entities: EntityRegistry,
    context: SimContext,
    bridge: ObservationBridge,
    inputs: SummaryInputs,
    node_infos: Vec<NodeInfo>,
    stop_time: SimTime,
    state: RunState,
    events_processed: u64,
}

impl EventLoop {
    /// Create an event loop from a built scenario.
    ///
    /// Binds the reception trace the scenario measures, the energy trace of
    /// every node carrying a budget, and registers the access inspector.
    /// Binding failures surface here, before anything runs.
    pub fn new(scenario: BuiltScenario, seed: u64) -> Result<Self, RunnerError> {
        let BuiltScenario {
            entities,
            initial_events,
            node_infos,
            schedule,
            allow_list,
            hub,
            hub_sink,
            hub_trace,
            initial_energy_j,
            stop_time,
            ..
        } = scenario;

        let mut context = SimContext::new(seed);
        let mut event_queue = BinaryHeap::new();
        for mut event in initial_events {
            event.id = EventId(context.next_event_id());
            event_queue.push(event);
        }

        let mut bridge = ObservationBridge::new();
        let sink = entities
            .get(hub_sink)
            .ok_or(wapsim_common::SimError::EntityNotFound(hub_sink))?;
        bridge.bind(sink, hub_trace)?;
        for info in node_infos.iter().filter(|i| i.role != Role::Hub) {
            if !initial_energy_j.contains_key(&info.node) {
                continue;
            }
            let sender = entities
                .get(info.entity_id)
                .ok_or(wapsim_common::SimError::EntityNotFound(info.entity_id))?;
            bridge.bind(sender, TraceName::RemainingEnergy)?;
        }
        bridge.add_observer(Box::new(AccessInspector::new(allow_list, hub)));

        let inputs = SummaryInputs {
            total_offered: schedule.total_offered(),
            hub,
            initial_energy_j,
        };

        Ok(EventLoop {
            event_queue,
            entities,
            context,
            bridge,
            inputs,
            node_infos,
            stop_time,
            state: RunState::Configured,
            events_processed: 0,
        })
    }

    /// Per-node display information.
    pub fn node_infos(&self) -> &[NodeInfo] {
        &self.node_infos
    }

    /// Current lifecycle state.
    pub fn state(&self) -> RunState {
        self.state
    }

    /// Current simulation time.
    pub fn current_time(&self) -> SimTime {
        self.context.time()
    }

    /// Run the event loop to the stop time.
    ///
    /// Events scheduled past the stop time are discarded, never dispatched.
    pub fn run(&mut self) -> Result<(), RunnerError> {
        if self.state != RunState::Configured {
            return Err(RunnerError::State {
                expected: RunState::Configured,
                actual: self.state,
            });
        }
        self.state = RunState::Running;

        self.event_queue.push(Event {
            id: EventId(u64::MAX),
            time: self.stop_time,
            source: EntityId::new(0),
            targets: vec![],
            payload: EventPayload::SimulationEnd,
        });

        while let Some(event) = self.event_queue.pop() {
            if matches!(event.payload, EventPayload::SimulationEnd) {
                break;
            }
            if event.time > self.stop_time {
                log::trace!("discarding event {:?} past stop time", event.id);
                continue;
            }

            self.context.set_time(event.time);
            self.dispatch(&event)?;

            // Trace firings reach the observation layer before the next
            // queued event is considered.
            for firing in self.context.take_pending_traces() {
                self.bridge.deliver(&firing, event.time);
            }
            for new_event in self.context.take_pending_events() {
                self.event_queue.push(new_event);
            }
            self.events_processed += 1;
        }

        self.context.set_time(self.stop_time);
        self.state = RunState::Halted;
        log::info!(
            "run halted at {} after {} events, {} observations",
            self.stop_time,
            self.events_processed,
            self.bridge.log().len(),
        );
        Ok(())
    }

    fn dispatch(&mut self, event: &Event) -> Result<(), RunnerError> {
        for target in &event.targets {
            let entity = self
                .entities
                .get_mut(*target)
                .ok_or(wapsim_common::SimError::EntityNotFound(*target))?;
            self.context.set_source(*target);
            entity.handle_event(event, &mut self.context)?;
        }
        Ok(())
    }

    /// Freeze the observation log and fold it into the run report.
    pub fn finish(mut self) -> Result<RunReport, RunnerError> {
        if self.state != RunState::Halted {
            return Err(RunnerError::State {
                expected: RunState::Halted,
                actual: self.state,
            });
        }
        self.state = RunState::Reported;

        let observations = self.bridge.freeze();
        let summary = summarize(&observations, &self.inputs);
        Ok(RunReport {
            observations,
            summary,
            events_processed: self.events_processed,
            final_time: self.stop_time,
        })
    }
}

/// Build, run and summarize a scenario in one call.
pub fn run_to_report(scenario: BuiltScenario, seed: u64) -> Result<RunReport, RunnerError> {
    let mut event_loop = EventLoop::new(scenario, seed)?;
    event_loop.run()?;
    event_loop.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wapsim_scenario::{build_security, SecurityScenarioConfig};

    #[test]
    fn test_finish_before_run_is_rejected() {
        let scenario = build_security(&SecurityScenarioConfig::default(), 1).unwrap();
        let event_loop = EventLoop::new(scenario, 1).unwrap();
        assert_eq!(event_loop.state(), RunState::Configured);
        let err = event_loop.finish().unwrap_err();
        assert!(matches!(err, RunnerError::State { .. }));
    }

    #[test]
    fn test_run_twice_is_rejected() {
        let scenario = build_security(&SecurityScenarioConfig::default(), 1).unwrap();
        let mut event_loop = EventLoop::new(scenario, 1).unwrap();
        event_loop.run().unwrap();
        assert_eq!(event_loop.state(), RunState::Halted);
        assert!(matches!(
            event_loop.run(),
            Err(RunnerError::State { .. })
        ));
    }
}
