//! Event / State Tracker — publishes lifecycle events and tracks workflow
//! completion (spec §4.8).
//!
//! Delivery is best-effort: `tokio::sync::broadcast` sends are infallible
//! from the publisher's side, so a panicking listener cannot unwind back
//! into the engine (spec §4.8, §9).

use std::collections::HashMap;
use std::collections::HashSet;
use std::sync::Mutex;

use tokio::sync::{broadcast, watch};
use tracing::debug;

use nodes::NodeOutput;

/// The seven lifecycle events the tracker fans out (spec §4.8).
#[derive(Debug, Clone)]
pub enum Event {
    NodeStarted { node_id: String },
    NodeCompleted { node_id: String, route: Option<String> },
    NodeFailed { node_id: String, error: String },
    WorkflowStarted,
    WorkflowFailed { error: String },
    RunnerRegistered { producer_id: String },
    RunnerUnregistered { producer_id: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkflowStatus {
    Created,
    Running,
    Succeeded,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    Started,
    Completed,
    Failed,
}

#[derive(Default)]
struct Counters {
    started: u64,
    completed: u64,
    failed: u64,
}

struct State {
    total_nodes: usize,
    counters: Counters,
    node_status: HashMap<String, NodeStatus>,
    registered: HashSet<String>,
    unregistered: HashSet<String>,
    any_failure: bool,
}

/// Maintains `WorkflowState` counters and fans lifecycle events out to
/// subscribers. `workflow_completed` (surfaced as a `WorkflowStatus`
/// transition, since it isn't one of the seven discrete event kinds) fires
/// once every registered Runner has unregistered and no node is in
/// progress — including the case where a producer only ever emitted
/// `ExecutionCompleted` and recorded no failures (spec §4.8, §9 open
/// questions).
pub struct EventTracker {
    events: broadcast::Sender<Event>,
    status: watch::Sender<WorkflowStatus>,
    state: Mutex<State>,
}

impl EventTracker {
    pub fn new(total_nodes: usize) -> Self {
        let (events, _) = broadcast::channel(1024);
        let (status, _) = watch::channel(WorkflowStatus::Created);
        Self {
            events,
            status,
            state: Mutex::new(State {
                total_nodes,
                counters: Counters::default(),
                node_status: HashMap::new(),
                registered: HashSet::new(),
                unregistered: HashSet::new(),
                any_failure: false,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    pub fn status(&self) -> WorkflowStatus {
        *self.status.borrow()
    }

    pub fn watch_status(&self) -> watch::Receiver<WorkflowStatus> {
        self.status.subscribe()
    }

    pub fn node_status(&self, node_id: &str) -> Option<NodeStatus> {
        self.state.lock().expect("tracker state poisoned").node_status.get(node_id).copied()
    }

    fn publish(&self, event: Event) {
        let _ = self.events.send(event);
    }

    pub fn workflow_started(&self) {
        let _ = self.status.send(WorkflowStatus::Running);
        self.publish(Event::WorkflowStarted);
    }

    pub fn node_started(&self, node_id: &str) {
        {
            let mut state = self.state.lock().expect("tracker state poisoned");
            state.counters.started += 1;
            state.node_status.insert(node_id.to_string(), NodeStatus::Started);
        }
        self.publish(Event::NodeStarted { node_id: node_id.to_string() });
    }

    pub fn node_completed(&self, node_id: &str, output: &NodeOutput) {
        {
            let mut state = self.state.lock().expect("tracker state poisoned");
            state.counters.completed += 1;
            state.node_status.insert(node_id.to_string(), NodeStatus::Completed);
        }
        self.publish(Event::NodeCompleted {
            node_id: node_id.to_string(),
            route: output.route().map(str::to_string),
        });
    }

    pub fn node_failed(&self, node_id: &str, error: &str) {
        {
            let mut state = self.state.lock().expect("tracker state poisoned");
            state.counters.failed += 1;
            state.node_status.insert(node_id.to_string(), NodeStatus::Failed);
            state.any_failure = true;
        }
        self.publish(Event::NodeFailed {
            node_id: node_id.to_string(),
            error: error.to_string(),
        });
    }

    pub fn workflow_failed(&self, error: &str) {
        self.state.lock().expect("tracker state poisoned").any_failure = true;
        let _ = self.status.send(WorkflowStatus::Failed);
        self.publish(Event::WorkflowFailed { error: error.to_string() });
    }

    pub fn runner_registered(&self, producer_id: &str) {
        self.state
            .lock()
            .expect("tracker state poisoned")
            .registered
            .insert(producer_id.to_string());
        self.publish(Event::RunnerRegistered { producer_id: producer_id.to_string() });
    }

    pub fn runner_unregistered(&self, producer_id: &str) {
        let (all_unregistered, any_failure) = {
            let mut state = self.state.lock().expect("tracker state poisoned");
            state.unregistered.insert(producer_id.to_string());
            let done = !state.registered.is_empty() && state.registered.len() == state.unregistered.len();
            (done, state.any_failure)
        };

        self.publish(Event::RunnerUnregistered { producer_id: producer_id.to_string() });

        if all_unregistered {
            let final_status = if any_failure { WorkflowStatus::Failed } else { WorkflowStatus::Succeeded };
            debug!(?final_status, "every runner unregistered; workflow completed");
            let _ = self.status.send(final_status);
        }
    }

    pub fn total_nodes(&self) -> usize {
        self.state.lock().expect("tracker state poisoned").total_nodes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Map;

    #[test]
    fn workflow_completes_once_every_runner_unregisters() {
        let tracker = EventTracker::new(2);
        tracker.workflow_started();
        tracker.runner_registered("p1");
        tracker.runner_registered("p2");
        assert_eq!(tracker.status(), WorkflowStatus::Running);

        tracker.runner_unregistered("p1");
        assert_eq!(tracker.status(), WorkflowStatus::Running);

        tracker.runner_unregistered("p2");
        assert_eq!(tracker.status(), WorkflowStatus::Succeeded);
    }

    #[test]
    fn any_node_failure_marks_the_workflow_failed_on_completion() {
        let tracker = EventTracker::new(1);
        tracker.runner_registered("p1");
        tracker.node_failed("b", "boom");
        tracker.runner_unregistered("p1");
        assert_eq!(tracker.status(), WorkflowStatus::Failed);
    }

    #[test]
    fn node_completed_carries_the_route_label_through() {
        let tracker = EventTracker::new(1);
        let mut receiver = tracker.subscribe();
        tracker.node_completed("c", &NodeOutput::data(Map::new()).with_route("yes"));
        let event = receiver.try_recv().unwrap();
        assert!(matches!(event, Event::NodeCompleted { route: Some(r), .. } if r == "yes"));
    }
}
