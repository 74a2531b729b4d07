use opentelemetry::metrics::{Counter, Meter, ObservableGauge};
use opentelemetry::Key;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tracing::instrument;

const NODE_KEY: Key = Key::from_static_str("node");
const KIND_KEY: Key = Key::from_static_str("kind");

/// Counters and gauges describing drain progress across the cluster.
pub struct DrainControllerMetrics {
    scale_ups: Counter<u64>,
    scale_downs: Counter<u64>,
    pod_deletions: Counter<u64>,
    node_failures: Counter<u64>,
    tracked_controllers: Arc<Mutex<HashMap<String, u64>>>,
    // Kept alive so that its callback stays registered.
    _tracked_controllers_observer: ObservableGauge<u64>,
}

impl DrainControllerMetrics {
    #[instrument(skip(meter))]
    pub fn new(meter: Meter) -> Self {
        let tracked_controllers = Arc::new(Mutex::new(HashMap::<String, u64>::new()));
        let tracked_controllers_for_observer = Arc::clone(&tracked_controllers);

        let scale_ups = meter
            .u64_counter("drain_controller_scale_ups")
            .with_description("Controllers scaled up to make room for a replacement pod")
            .init();
        let scale_downs = meter
            .u64_counter("drain_controller_scale_downs")
            .with_description("Controllers restored to their original replica count")
            .init();
        let pod_deletions = meter
            .u64_counter("drain_controller_forced_pod_deletions")
            .with_description("Pods deleted after their grace period ran out")
            .init();
        let node_failures = meter
            .u64_counter("drain_controller_node_failures")
            .with_description("Node reconciliations which failed")
            .init();

        // Observer for the number of controllers tracked on each node
        let tracked_controllers_observer = meter
            .u64_observable_gauge("drain_controller_tracked_controllers")
            .with_description("Controllers currently being drained per node")
            .with_callback(move |observer| {
                if let Ok(data) = tracked_controllers_for_observer.lock() {
                    for (node, count) in data.iter() {
                        observer.observe(*count, &[NODE_KEY.string(node.clone())]);
                    }
                }
            })
            .init();

        DrainControllerMetrics {
            scale_ups,
            scale_downs,
            pod_deletions,
            node_failures,
            tracked_controllers,
            _tracked_controllers_observer: tracked_controllers_observer,
        }
    }

    pub fn scaled_up(&self, kind: &str) {
        self.scale_ups.add(1, &[KIND_KEY.string(kind.to_string())]);
    }

    pub fn scaled_down(&self, kind: &str) {
        self.scale_downs.add(1, &[KIND_KEY.string(kind.to_string())]);
    }

    pub fn pod_deleted(&self) {
        self.pod_deletions.add(1, &[]);
    }

    pub fn node_failed(&self, node_name: &str) {
        self.node_failures
            .add(1, &[NODE_KEY.string(node_name.to_string())]);
    }

    /// Records how many controllers a node tracks after its latest reconciliation.
    pub fn set_tracked_controllers(&self, node_name: &str, count: usize) {
        if let Ok(mut data) = self.tracked_controllers.lock() {
            if count == 0 {
                data.remove(node_name);
            } else {
                data.insert(node_name.to_string(), count as u64);
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn tracked_controllers(&self, node_name: &str) -> Option<u64> {
        self.tracked_controllers
            .lock()
            .ok()
            .and_then(|data| data.get(node_name).copied())
    }

    /// Drops the tracked controller count of every node which is no longer part of the cluster.
    pub fn retain_nodes(&self, node_names: &HashSet<String>) {
        if let Ok(mut data) = self.tracked_controllers.lock() {
            data.retain(|node_name, _| node_names.contains(node_name));
        }
    }
}
