use crate::{
    cache::TickCache,
    eligibility::requires_scale_up,
    error::{self, Result},
    metrics::DrainControllerMetrics,
    owner::{resolve_owner, ObservedController},
    retry::retry_strategy,
    statemachine::{determine_next_step, DrainStep},
    store::{load_node_annotation, persist_node_annotation},
};
use models::constants::POD_PHASE_RUNNING;
use models::node::{ControllerAnnotation, ControllerIdentity, DrainClient, NodeAnnotation};

use chrono::{DateTime, Utc};
use futures::future::join_all;
use k8s_openapi::api::core::v1::{Node, Pod};
use kube::ResourceExt;
use snafu::ResultExt;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio::time::Duration;
use tokio_retry::Retry;
use tracing::{event, instrument, Level};

// Scale calls are attempted this many times before the node's tick is aborted.
const SCALE_ATTEMPTS: usize = 3;

/// A source of the current time, injectable for tests.
pub type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// What became of a tracked controller after it was driven for one tick.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
enum DriveOutcome {
    /// The controller stays tracked and is looked at again on the next tick.
    Waiting,
    /// A scale up was issued this tick.
    ScaledUp,
    /// The controller was restored to its original replica count and can stop being tracked.
    Removed,
}

/// DrainReconciler moves the drain of a single node forward by one step per call.
///
/// All progress is read from and written back to the node's drain state annotation, so the reconciler
/// holds no state between calls.
pub struct DrainReconciler<C: DrainClient> {
    client: C,
    grace_period: Duration,
    clock: Clock,
    metrics: DrainControllerMetrics,
}

impl<C: DrainClient> DrainReconciler<C> {
    pub fn new(client: C, grace_period: Duration) -> Self {
        DrainReconciler {
            client,
            grace_period,
            clock: Arc::new(Utc::now),
            metrics: DrainControllerMetrics::new(opentelemetry::global::meter("drain-controller")),
        }
    }

    /// Replaces the wall clock used to anchor and measure grace periods.
    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn client(&self) -> &C {
        &self.client
    }

    pub(crate) fn metrics(&self) -> &DrainControllerMetrics {
        &self.metrics
    }

    /// Reconciles a single node: an unschedulable node is drained further, a schedulable one has any
    /// drain in progress rolled back.
    #[instrument(skip(self, node, cache), fields(node = %node.name_any()), err)]
    pub async fn reconcile_node(&self, node: &Node, cache: &TickCache) -> Result<()> {
        let node_name = node.name_any();
        let unschedulable = node
            .spec
            .as_ref()
            .and_then(|spec| spec.unschedulable)
            .unwrap_or(false);
        let annotation = load_node_annotation(node);

        if unschedulable {
            self.drain_node(&node_name, annotation, cache).await
        } else {
            self.restore_node(&node_name, annotation).await
        }
    }

    /// Returns every tracked controller of a schedulable node to its original replica count and forgets
    /// about them.
    async fn restore_node(&self, node_name: &str, annotation: NodeAnnotation) -> Result<()> {
        if annotation.is_empty() {
            self.metrics.set_tracked_controllers(node_name, 0);
            return Ok(());
        }

        event!(
            Level::INFO,
            controllers = annotation.len(),
            "Node is schedulable again, restoring original replica counts."
        );
        join_all(
            annotation
                .controllers
                .iter()
                .map(|controller| self.scale_controller(&controller.identity, controller.original)),
        )
        .await
        .into_iter()
        .collect::<Result<Vec<()>>>()?;

        for controller in annotation.controllers.iter() {
            self.metrics.scaled_down(&controller.identity.kind);
        }
        persist_node_annotation(&self.client, node_name, &NodeAnnotation::default()).await;
        self.metrics.set_tracked_controllers(node_name, 0);
        Ok(())
    }

    /// Runs one drain cycle for an unschedulable node.
    async fn drain_node(
        &self,
        node_name: &str,
        mut annotation: NodeAnnotation,
        cache: &TickCache,
    ) -> Result<()> {
        let pods = self
            .client
            .list_pods_on_node(node_name)
            .await
            .context(error::ListNodePodsSnafu { node_name })?;

        // Pods of an in-flight drain stay tracked even if their budget has since changed.
        let tracked_pods: HashSet<&str> = annotation
            .controllers
            .iter()
            .flat_map(|controller| controller.pods.iter().map(String::as_str))
            .collect();
        let observed = join_all(
            pods.iter()
                .map(|pod| self.observe_pod(pod, cache, tracked_pods.contains(pod.name_any().as_str()))),
        )
        .await;

        // Upserts are applied here, one at a time, so that two pods of the same new controller never
        // create two entries.
        for (pod_name, controller) in observed.into_iter().flatten() {
            enroll_pod(&mut annotation, &pod_name, controller);
        }
        persist_node_annotation(&self.client, node_name, &annotation).await;

        let identities: Vec<ControllerIdentity> = annotation
            .controllers
            .iter()
            .map(|controller| controller.identity.clone())
            .collect();
        let shared_annotation = Mutex::new(annotation);
        let outcomes = join_all(
            identities
                .iter()
                .map(|identity| self.drive_controller(node_name, &shared_annotation, identity)),
        )
        .await;
        let mut annotation = shared_annotation.into_inner();

        let mut removed = Vec::new();
        let mut first_error = None;
        for (identity, outcome) in identities.into_iter().zip(outcomes) {
            match outcome {
                Ok(DriveOutcome::Removed) => removed.push(identity),
                Ok(_) => {}
                Err(err) => {
                    first_error.get_or_insert(err);
                }
            }
        }

        if !removed.is_empty() {
            annotation.remove_all(&removed);
            persist_node_annotation(&self.client, node_name, &annotation).await;
            if annotation.is_empty() {
                event!(Level::INFO, "Node is drained.");
            }
        }
        if !annotation.is_empty() {
            event!(
                Level::INFO,
                remaining = annotation.len(),
                "{} controllers remaining on node.",
                annotation.len()
            );
        }
        self.metrics
            .set_tracked_controllers(node_name, annotation.len());

        first_error.map_or(Ok(()), Err)
    }

    /// Returns the pod's name and controller if the pod is one whose controller must be scaled up before
    /// the pod goes away.
    async fn observe_pod(
        &self,
        pod: &Pod,
        cache: &TickCache,
        already_tracked: bool,
    ) -> Option<(String, ObservedController)> {
        let pod_name = pod.metadata.name.clone()?;
        if pod_phase(pod) != Some(POD_PHASE_RUNNING) {
            return None;
        }

        if !already_tracked {
            match requires_scale_up(&self.client, cache, pod).await {
                Ok(true) => {}
                Ok(false) => return None,
                Err(err) => {
                    event!(Level::WARN, %err, pod = %pod_name, "Unable to check pod eligibility, skipping it.");
                    return None;
                }
            }
        }

        let controller = resolve_owner(&self.client, cache, &pod.metadata).await?;
        if !controller.is_drainable() {
            event!(
                Level::DEBUG,
                pod = %pod_name,
                controller = %controller.identity,
                "Pod's controller cannot be drained."
            );
            return None;
        }
        Some((pod_name, controller))
    }

    /// Moves one tracked controller forward and reports what became of it.
    #[instrument(skip(self, node_name, shared_annotation), fields(controller = %identity), err)]
    async fn drive_controller(
        &self,
        node_name: &str,
        shared_annotation: &Mutex<NodeAnnotation>,
        identity: &ControllerIdentity,
    ) -> Result<DriveOutcome> {
        let observed_state = shared_annotation.lock().await.controller(identity).cloned();
        let mut controller = match observed_state {
            Some(controller) => controller,
            None => return Ok(DriveOutcome::Waiting),
        };
        let loaded = controller.clone();

        self.untrack_deleted_pods(&mut controller).await;

        let now = (self.clock)();
        let step = determine_next_step(&controller, now, self.grace_period);
        event!(Level::DEBUG, ?step, phase = ?controller.phase(), "Determined next drain step.");

        match step {
            DrainStep::ScaleUp { replicas } => {
                self.scale_controller(&controller.identity, replicas).await?;
                event!(Level::INFO, replicas, "Scaled up controller.");
                self.metrics.scaled_up(&controller.identity.kind);
                controller.desired = replicas;
                self.save_controller(node_name, shared_annotation, controller)
                    .await;
                Ok(DriveOutcome::ScaledUp)
            }
            DrainStep::ScaleDown { replicas } => {
                self.scale_controller(&controller.identity, replicas).await?;
                event!(Level::INFO, replicas, "Restored controller to its original replica count.");
                self.metrics.scaled_down(&controller.identity.kind);
                Ok(DriveOutcome::Removed)
            }
            DrainStep::MarkReady => {
                event!(Level::INFO, "Replacement is ready, starting grace period.");
                controller.ready_time = Some(now);
                self.save_controller(node_name, shared_annotation, controller)
                    .await;
                Ok(DriveOutcome::Waiting)
            }
            DrainStep::ForceDelete => {
                event!(
                    Level::INFO,
                    pods = ?controller.pods,
                    "Grace period elapsed, deleting remaining pods."
                );
                self.delete_pods(&controller).await;
                if controller != loaded {
                    self.save_controller(node_name, shared_annotation, controller)
                        .await;
                }
                Ok(DriveOutcome::Waiting)
            }
            DrainStep::AwaitReady | DrainStep::AwaitOldPods => {
                if controller != loaded {
                    self.save_controller(node_name, shared_annotation, controller)
                        .await;
                }
                Ok(DriveOutcome::Waiting)
            }
        }
    }

    /// Stores the given controller state in the node's annotation and persists the whole annotation.
    ///
    /// The lock is held while persisting so that snapshots reach the node in the order they were taken.
    async fn save_controller(
        &self,
        node_name: &str,
        shared_annotation: &Mutex<NodeAnnotation>,
        controller: ControllerAnnotation,
    ) {
        let mut annotation = shared_annotation.lock().await;
        annotation.upsert(controller);
        persist_node_annotation(&self.client, node_name, &annotation).await;
    }

    /// Probes every tracked pod of a controller and stops tracking those which are gone.
    async fn untrack_deleted_pods(&self, controller: &mut ControllerAnnotation) {
        let namespace = controller.identity.namespace.as_str();
        let probes = join_all(
            controller
                .pods
                .iter()
                .map(|pod_name| self.is_pod_deleted(namespace, pod_name)),
        )
        .await;

        let deleted: Vec<String> = controller
            .pods
            .iter()
            .zip(probes)
            .filter(|(_, deleted)| *deleted)
            .map(|(pod_name, _)| pod_name.clone())
            .collect();
        if !deleted.is_empty() {
            event!(Level::INFO, pods = ?deleted, "Pods are gone from the node.");
            controller.untrack_pods(&deleted);
        }
    }

    /// A pod counts as deleted once it has left the `Running` phase or no longer exists.
    async fn is_pod_deleted(&self, namespace: &str, pod_name: &str) -> bool {
        match self.client.get_pod(namespace, pod_name).await {
            Ok(None) => true,
            Ok(Some(pod)) => pod_phase(&pod) != Some(POD_PHASE_RUNNING),
            Err(err) => {
                event!(Level::WARN, %err, pod = pod_name, "Unable to probe pod, assuming it is still running.");
                false
            }
        }
    }

    /// Deletes the remaining pods of a controller. Failures are retried on a later tick.
    async fn delete_pods(&self, controller: &ControllerAnnotation) {
        let namespace = controller.identity.namespace.as_str();
        let results = join_all(
            controller
                .pods
                .iter()
                .map(|pod_name| self.client.delete_pod(namespace, pod_name)),
        )
        .await;

        for (pod_name, result) in controller.pods.iter().zip(results) {
            match result {
                Ok(()) => self.metrics.pod_deleted(),
                Err(err) => {
                    event!(Level::WARN, %err, pod = %pod_name, "Unable to delete pod, retrying next tick.");
                }
            }
        }
    }

    /// Sets the replica count of a controller, retrying failed attempts.
    async fn scale_controller(&self, identity: &ControllerIdentity, replicas: i32) -> Result<()> {
        Retry::spawn(retry_strategy(SCALE_ATTEMPTS - 1), || async {
            self.client.scale(identity, replicas).await.map_err(|err| {
                event!(Level::WARN, %err, controller = %identity, replicas, "Scale attempt failed.");
                err
            })
        })
        .await
        .context(error::ScaleControllerSnafu {
            controller: identity.to_string(),
            replicas,
        })
    }
}

fn pod_phase(pod: &Pod) -> Option<&str> {
    pod.status.as_ref().and_then(|status| status.phase.as_deref())
}

/// Records a pod against its controller.
///
/// Only single-replica controllers start a new drain. A controller that is already tracked keeps
/// collecting pods and has its replica counts refreshed from the live resource.
fn enroll_pod(annotation: &mut NodeAnnotation, pod_name: &str, observed: ObservedController) {
    match annotation.controller_mut(&observed.identity) {
        Some(existing) => {
            if existing.track_pod(pod_name) {
                event!(Level::INFO, pod = pod_name, controller = %existing.identity, "Tracking pod.");
            }
            existing.current = observed.ready_replicas;
            if observed.replicas == existing.original || observed.replicas == existing.scaled_replicas() {
                existing.desired = observed.replicas;
            } else {
                event!(
                    Level::WARN,
                    controller = %existing.identity,
                    replicas = observed.replicas,
                    original = existing.original,
                    "Controller was scaled outside of the drain, keeping the drain's replica target."
                );
            }
        }
        None if observed.replicas == 1 => {
            event!(Level::INFO, pod = pod_name, controller = %observed.identity, "Starting drain of controller.");
            let mut controller =
                ControllerAnnotation::new(observed.identity, observed.replicas, observed.ready_replicas);
            controller.track_pod(pod_name);
            annotation.upsert(controller);
        }
        None => {
            event!(
                Level::DEBUG,
                pod = pod_name,
                controller = %observed.identity,
                replicas = observed.replicas,
                "Controller runs more than one replica, leaving pod to be evicted normally."
            );
        }
    }
}
