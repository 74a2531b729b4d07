mod client;
mod drain;
mod error;

pub use self::client::*;
pub use self::error::{Error as ClientError, Result as ClientResult};

use crate::constants::DRAIN_STATE_ANNOTATION;

use chrono::{DateTime, Utc};
use k8s_openapi::api::core::v1::Node;
use serde::{Deserialize, Serialize};
use tokio::time::Duration;

use std::fmt;

#[cfg(feature = "mockall")]
pub use self::client::MockDrainClient;

/// Identifies a scalable controller whose pods are being drained from a node.
///
/// `resource_name` is the plural REST path segment of the controller's kind (e.g. `deployments`), as
/// resolved from the API group's discovery document. It is carried along so that scale calls can be
/// addressed without another discovery round trip, but it does not take part in identity comparisons.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerIdentity {
    pub api_version: String,
    pub kind: String,
    pub resource_name: String,
    pub namespace: String,
    pub name: String,
}

impl ControllerIdentity {
    /// Returns true if both identities refer to the same controller, compared on
    /// `{namespace, name, apiVersion, kind}`.
    pub fn same_controller(&self, other: &ControllerIdentity) -> bool {
        self.namespace == other.namespace
            && self.name == other.name
            && self.api_version == other.api_version
            && self.kind == other.kind
    }
}

impl fmt::Display for ControllerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.kind, self.namespace, self.name)
    }
}

/// DrainPhase is the position of a single tracked controller in the drain state machine.
///
/// The phase is never stored; it is reconstructed from the persisted `ControllerAnnotation` on every
/// reconciliation so that the controller can pick up where it left off after a restart.
#[derive(Copy, Clone, Serialize, Deserialize, Debug, Eq, PartialEq)]
pub enum DrainPhase {
    /// The controller's pods were found on the drained node, but no scale up has been requested yet.
    Discovered,
    /// The controller has been scaled to one replica above its original count, and the extra replica
    /// is not ready yet.
    AwaitingReady,
    /// The replacement replica is ready. Pods on the drained node are given the grace period to terminate
    /// before they are deleted.
    AwaitingOldPodsGone,
    /// None of the controller's pods remain on the drained node; the controller can return to its
    /// original replica count and stop being tracked.
    ScalingDown,
}

/// The persisted drain progress of one controller on one node.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControllerAnnotation {
    #[serde(flatten)]
    pub identity: ControllerIdentity,
    /// The replica count before the drain began. Set once, when the entry is created.
    pub original: i32,
    /// The replica count the drain is currently driving towards.
    pub desired: i32,
    /// The most recently observed count of ready replicas.
    pub current: i32,
    /// The moment the scaled-up controller was first observed to be ready.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "chrono::serde::ts_milliseconds_option"
    )]
    pub ready_time: Option<DateTime<Utc>>,
    /// Names of pods believed to be still running on the drained node.
    #[serde(default)]
    pub pods: Vec<String>,
}

impl ControllerAnnotation {
    pub fn new(identity: ControllerIdentity, original: i32, current: i32) -> Self {
        ControllerAnnotation {
            identity,
            original,
            desired: original,
            current,
            ready_time: None,
            pods: Vec::new(),
        }
    }

    /// The replica count used while a replacement pod is brought up elsewhere.
    pub fn scaled_replicas(&self) -> i32 {
        self.original + 1
    }

    pub fn is_scaled(&self) -> bool {
        self.desired == self.scaled_replicas()
    }

    pub fn is_ready(&self) -> bool {
        self.current == self.desired
    }

    /// Returns true if the grace period, measured from `ready_time`, has strictly elapsed at `now`.
    pub fn grace_period_elapsed(&self, now: DateTime<Utc>, grace_period: Duration) -> bool {
        match (self.ready_time, chrono::Duration::from_std(grace_period)) {
            (Some(ready_time), Ok(grace_period)) => now - ready_time > grace_period,
            _ => false,
        }
    }

    /// Starts tracking the given pod. Returns false if the pod was already tracked.
    pub fn track_pod(&mut self, pod_name: &str) -> bool {
        if self.pods.iter().any(|tracked| tracked == pod_name) {
            false
        } else {
            self.pods.push(pod_name.to_string());
            true
        }
    }

    /// Stops tracking all of the given pods.
    pub fn untrack_pods(&mut self, pod_names: &[String]) {
        self.pods.retain(|tracked| !pod_names.contains(tracked));
    }

    pub fn phase(&self) -> DrainPhase {
        if self.pods.is_empty() {
            DrainPhase::ScalingDown
        } else if !self.is_scaled() {
            DrainPhase::Discovered
        } else if !self.is_ready() {
            DrainPhase::AwaitingReady
        } else {
            DrainPhase::AwaitingOldPodsGone
        }
    }
}

/// The entire drain state of a node, stored as JSON under `DRAIN_STATE_ANNOTATION`.
///
/// Holds at most one `ControllerAnnotation` per controller identity.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAnnotation {
    #[serde(default)]
    pub controllers: Vec<ControllerAnnotation>,
}

impl NodeAnnotation {
    /// Reads the drain state annotation of a node.
    ///
    /// Returns `Ok(None)` when the node carries no drain state.
    pub fn from_node(node: &Node) -> serde_json::Result<Option<Self>> {
        node.metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(DRAIN_STATE_ANNOTATION))
            .map(|value| Self::parse(value))
            .transpose()
    }

    /// Parses a serialized node annotation. Entries sharing an identity are merged into the first one.
    pub fn parse(value: &str) -> serde_json::Result<Self> {
        let parsed: NodeAnnotation = serde_json::from_str(value)?;

        let mut annotation = NodeAnnotation::default();
        for controller in parsed.controllers {
            match annotation.controller_mut(&controller.identity) {
                Some(existing) => {
                    for pod_name in controller.pods.iter() {
                        existing.track_pod(pod_name);
                    }
                }
                None => annotation.controllers.push(controller),
            }
        }
        Ok(annotation)
    }

    /// Serializes the node annotation into the value stored on the node. An empty annotation has no
    /// value, which removes the key from the node.
    pub fn to_annotation_value(&self) -> serde_json::Result<Option<String>> {
        if self.is_empty() {
            Ok(None)
        } else {
            serde_json::to_string(self).map(Some)
        }
    }

    pub fn is_empty(&self) -> bool {
        self.controllers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.controllers.len()
    }

    pub fn controller(&self, identity: &ControllerIdentity) -> Option<&ControllerAnnotation> {
        self.controllers
            .iter()
            .find(|controller| controller.identity.same_controller(identity))
    }

    pub fn controller_mut(
        &mut self,
        identity: &ControllerIdentity,
    ) -> Option<&mut ControllerAnnotation> {
        self.controllers
            .iter_mut()
            .find(|controller| controller.identity.same_controller(identity))
    }

    /// Stores the given controller annotation, replacing any entry with the same identity.
    pub fn upsert(&mut self, annotation: ControllerAnnotation) {
        match self.controller_mut(&annotation.identity) {
            Some(existing) => *existing = annotation,
            None => self.controllers.push(annotation),
        }
    }

    /// Stops tracking all of the given controllers.
    pub fn remove_all(&mut self, identities: &[ControllerIdentity]) {
        self.controllers.retain(|controller| {
            !identities
                .iter()
                .any(|identity| identity.same_controller(&controller.identity))
        });
    }
}
