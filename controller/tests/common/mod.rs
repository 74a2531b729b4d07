#![allow(dead_code)]
//! An in-memory cluster which records every write the drain controller makes.
use models::constants::DRAIN_STATE_ANNOTATION;
use models::node::{ClientError, ClientResult, ControllerIdentity, DrainClient, NodeAnnotation};

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use controller::{Clock, DrainController, DrainReconciler};
use k8s_openapi::api::core::v1::{Node, NodeSpec, Pod, PodSpec, PodStatus};
use k8s_openapi::api::policy::v1::{PodDisruptionBudget, PodDisruptionBudgetSpec};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::{
    APIResource, LabelSelector, ObjectMeta, OwnerReference,
};
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::api::DynamicObject;
use maplit::btreemap;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use tokio::time::Duration;

pub const GRACE_PERIOD: Duration = Duration::from_secs(300);
pub const DRAINED_NODE: &str = "node1";
pub const OTHER_NODE: &str = "node2";

/// A write performed against the fake cluster.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Scale {
        namespace: String,
        name: String,
        replicas: i32,
    },
    DeletePod {
        namespace: String,
        name: String,
    },
    PatchNode {
        node_name: String,
        annotation: NodeAnnotation,
    },
}

#[derive(Clone, Debug)]
pub struct FakeController {
    pub api_version: String,
    pub kind: String,
    pub resource_name: String,
    pub replicas: i32,
    pub ready_replicas: i32,
    pub owner: Option<OwnerReference>,
}

#[derive(Default)]
struct ClusterState {
    nodes: BTreeMap<String, Node>,
    pods: BTreeMap<(String, String), Pod>,
    budgets: Vec<PodDisruptionBudget>,
    controllers: BTreeMap<(String, String, String), FakeController>,
    failing_nodes: Vec<String>,
    calls: Vec<Call>,
}

#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<ClusterState>>,
}

fn not_found(reason: &str) -> kube::Error {
    kube::Error::Api(kube::error::ErrorResponse {
        status: "Failure".to_string(),
        message: format!("{} not found", reason),
        reason: "NotFound".to_string(),
        code: 404,
    })
}

fn resource(name: &str, kind: &str) -> APIResource {
    APIResource {
        name: name.to_string(),
        kind: kind.to_string(),
        namespaced: true,
        ..Default::default()
    }
}

pub fn controller_reference(api_version: &str, kind: &str, name: &str) -> OwnerReference {
    OwnerReference {
        api_version: api_version.to_string(),
        kind: kind.to_string(),
        name: name.to_string(),
        uid: format!("{}-uid", name),
        controller: Some(true),
        ..Default::default()
    }
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&self, name: &str, unschedulable: bool) {
        let node = Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                ..Default::default()
            },
            spec: Some(NodeSpec {
                unschedulable: Some(unschedulable),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.state
            .lock()
            .unwrap()
            .nodes
            .insert(name.to_string(), node);
    }

    pub fn set_unschedulable(&self, name: &str, unschedulable: bool) {
        let mut state = self.state.lock().unwrap();
        let node = state.nodes.get_mut(name).unwrap();
        node.spec.get_or_insert_with(Default::default).unschedulable = Some(unschedulable);
    }

    /// Makes listing the pods of the given node fail.
    pub fn fail_pod_listing(&self, node_name: &str) {
        self.state
            .lock()
            .unwrap()
            .failing_nodes
            .push(node_name.to_string());
    }

    fn add_controller(&self, namespace: &str, name: &str, controller: FakeController) {
        self.state.lock().unwrap().controllers.insert(
            (namespace.to_string(), controller.kind.clone(), name.to_string()),
            controller,
        );
    }

    /// Adds a DeploymentConfig along with the ReplicationController it manages, `<name>-1`.
    pub fn add_deployment_config(&self, namespace: &str, name: &str, replicas: i32) {
        self.add_controller(
            namespace,
            name,
            FakeController {
                api_version: "apps.openshift.io/v1".to_string(),
                kind: "DeploymentConfig".to_string(),
                resource_name: "deploymentconfigs".to_string(),
                replicas,
                ready_replicas: replicas,
                owner: None,
            },
        );
        self.add_controller(
            namespace,
            &format!("{}-1", name),
            FakeController {
                api_version: "v1".to_string(),
                kind: "ReplicationController".to_string(),
                resource_name: "replicationcontrollers".to_string(),
                replicas,
                ready_replicas: replicas,
                owner: Some(controller_reference(
                    "apps.openshift.io/v1",
                    "DeploymentConfig",
                    name,
                )),
            },
        );
    }

    pub fn set_ready_replicas(&self, namespace: &str, name: &str, ready_replicas: i32) {
        let mut state = self.state.lock().unwrap();
        let controller = state
            .controllers
            .get_mut(&(
                namespace.to_string(),
                "DeploymentConfig".to_string(),
                name.to_string(),
            ))
            .unwrap();
        controller.ready_replicas = ready_replicas;
    }

    pub fn replicas(&self, namespace: &str, name: &str) -> i32 {
        self.state.lock().unwrap().controllers[&(
            namespace.to_string(),
            "DeploymentConfig".to_string(),
            name.to_string(),
        )]
            .replicas
    }

    /// Adds a running pod of the given DeploymentConfig to a node.
    pub fn add_pod(&self, namespace: &str, name: &str, node_name: &str, deployment_config: &str) {
        let pod = Pod {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                namespace: Some(namespace.to_string()),
                labels: Some(btreemap! {
                    "deploymentconfig".to_string() => deployment_config.to_string(),
                }),
                owner_references: Some(vec![controller_reference(
                    "v1",
                    "ReplicationController",
                    &format!("{}-1", deployment_config),
                )]),
                ..Default::default()
            },
            spec: Some(PodSpec {
                node_name: Some(node_name.to_string()),
                ..Default::default()
            }),
            status: Some(PodStatus {
                phase: Some("Running".to_string()),
                ..Default::default()
            }),
        };
        self.state
            .lock()
            .unwrap()
            .pods
            .insert((namespace.to_string(), name.to_string()), pod);
    }

    pub fn set_pod_phase(&self, namespace: &str, name: &str, phase: &str) {
        let mut state = self.state.lock().unwrap();
        let pod = state
            .pods
            .get_mut(&(namespace.to_string(), name.to_string()))
            .unwrap();
        pod.status.get_or_insert_with(Default::default).phase = Some(phase.to_string());
    }

    pub fn remove_pod(&self, namespace: &str, name: &str) {
        self.state
            .lock()
            .unwrap()
            .pods
            .remove(&(namespace.to_string(), name.to_string()));
    }

    pub fn has_pod(&self, namespace: &str, name: &str) -> bool {
        self.state
            .lock()
            .unwrap()
            .pods
            .contains_key(&(namespace.to_string(), name.to_string()))
    }

    /// Protects the pods of a DeploymentConfig with a budget.
    pub fn add_budget(&self, namespace: &str, deployment_config: &str, min_available: i32) {
        let budget = PodDisruptionBudget {
            metadata: ObjectMeta {
                name: Some(deployment_config.to_string()),
                namespace: Some(namespace.to_string()),
                ..Default::default()
            },
            spec: Some(PodDisruptionBudgetSpec {
                min_available: Some(IntOrString::Int(min_available)),
                selector: Some(LabelSelector {
                    match_labels: Some(btreemap! {
                        "deploymentconfig".to_string() => deployment_config.to_string(),
                    }),
                    ..Default::default()
                }),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.state.lock().unwrap().budgets.push(budget);
    }

    /// Deletes the budgets named after a DeploymentConfig.
    pub fn remove_budget(&self, namespace: &str, deployment_config: &str) {
        self.state.lock().unwrap().budgets.retain(|budget| {
            budget.metadata.namespace.as_deref() != Some(namespace)
                || budget.metadata.name.as_deref() != Some(deployment_config)
        });
    }

    /// The drain state currently stored on a node.
    pub fn stored_annotation(&self, node_name: &str) -> Option<NodeAnnotation> {
        let state = self.state.lock().unwrap();
        state.nodes[node_name]
            .metadata
            .annotations
            .as_ref()
            .and_then(|annotations| annotations.get(DRAIN_STATE_ANNOTATION))
            .map(|value| NodeAnnotation::parse(value).unwrap())
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn clear_calls(&self) {
        self.state.lock().unwrap().calls.clear();
    }

    pub fn scale_calls(&self) -> Vec<(String, i32)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::Scale {
                    namespace,
                    name,
                    replicas,
                } => Some((format!("{}/{}", namespace, name), replicas)),
                _ => None,
            })
            .collect()
    }

    pub fn delete_calls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::DeletePod { namespace, name } => Some(format!("{}/{}", namespace, name)),
                _ => None,
            })
            .collect()
    }

    /// Every drain state written to the node, in order.
    pub fn persisted_annotations(&self, node: &str) -> Vec<NodeAnnotation> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                Call::PatchNode {
                    node_name,
                    annotation,
                } if node_name == node => Some(annotation),
                _ => None,
            })
            .collect()
    }
}

#[async_trait]
impl DrainClient for FakeCluster {
    async fn list_nodes(&self) -> ClientResult<Vec<Node>> {
        Ok(self.state.lock().unwrap().nodes.values().cloned().collect())
    }

    async fn patch_node(&self, node_name: &str, patch: &serde_json::Value) -> ClientResult<()> {
        let mut state = self.state.lock().unwrap();
        let node = state
            .nodes
            .get_mut(node_name)
            .ok_or_else(|| ClientError::PatchNode {
                source: not_found(node_name),
                node_name: node_name.to_string(),
            })?;

        let annotations = node.metadata.annotations.get_or_insert_with(BTreeMap::new);
        for (key, value) in patch["metadata"]["annotations"].as_object().unwrap() {
            match value.as_str() {
                Some(value) => annotations.insert(key.clone(), value.to_string()),
                None => annotations.remove(key),
            };
        }

        let annotation = annotations
            .get(DRAIN_STATE_ANNOTATION)
            .map(|value| NodeAnnotation::parse(value).unwrap())
            .unwrap_or_default();
        state.calls.push(Call::PatchNode {
            node_name: node_name.to_string(),
            annotation,
        });
        Ok(())
    }

    async fn list_pods_on_node(&self, node_name: &str) -> ClientResult<Vec<Pod>> {
        let state = self.state.lock().unwrap();
        if state.failing_nodes.iter().any(|failing| failing == node_name) {
            return Err(ClientError::FindNodePods {
                source: not_found(node_name),
                node_name: node_name.to_string(),
            });
        }
        Ok(state
            .pods
            .values()
            .filter(|pod| {
                pod.spec.as_ref().and_then(|spec| spec.node_name.as_deref()) == Some(node_name)
            })
            .cloned()
            .collect())
    }

    async fn get_pod(&self, namespace: &str, pod_name: &str) -> ClientResult<Option<Pod>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .pods
            .get(&(namespace.to_string(), pod_name.to_string()))
            .cloned())
    }

    async fn delete_pod(&self, namespace: &str, pod_name: &str) -> ClientResult<()> {
        let mut state = self.state.lock().unwrap();
        state
            .pods
            .remove(&(namespace.to_string(), pod_name.to_string()));
        state.calls.push(Call::DeletePod {
            namespace: namespace.to_string(),
            name: pod_name.to_string(),
        });
        Ok(())
    }

    async fn list_disruption_budgets(
        &self,
        namespace: &str,
    ) -> ClientResult<Vec<PodDisruptionBudget>> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .budgets
            .iter()
            .filter(|budget| budget.metadata.namespace.as_deref() == Some(namespace))
            .cloned()
            .collect())
    }

    async fn api_resources(&self, api_version: &str) -> ClientResult<Vec<APIResource>> {
        Ok(match api_version {
            "v1" => vec![
                resource("pods", "Pod"),
                resource("replicationcontrollers", "ReplicationController"),
                resource("replicationcontrollers/scale", "Scale"),
            ],
            "apps.openshift.io/v1" => vec![
                resource("deploymentconfigs", "DeploymentConfig"),
                resource("deploymentconfigs/scale", "Scale"),
            ],
            "apps/v1" => vec![
                resource("deployments", "Deployment"),
                resource("replicasets", "ReplicaSet"),
            ],
            _ => vec![],
        })
    }

    async fn get_resource(&self, target: &ControllerIdentity) -> ClientResult<DynamicObject> {
        let state = self.state.lock().unwrap();
        let key = (
            target.namespace.clone(),
            target.kind.clone(),
            target.name.clone(),
        );
        match state.controllers.get(&key) {
            Some(controller) if controller.resource_name == target.resource_name => {
                Ok(DynamicObject {
                    types: None,
                    metadata: ObjectMeta {
                        name: Some(target.name.clone()),
                        namespace: Some(target.namespace.clone()),
                        owner_references: controller.owner.clone().map(|owner| vec![owner]),
                        ..Default::default()
                    },
                    data: serde_json::json!({
                        "spec": { "replicas": controller.replicas },
                        "status": { "readyReplicas": controller.ready_replicas },
                    }),
                })
            }
            _ => Err(ClientError::GetResource {
                source: not_found(&target.name),
                api_version: target.api_version.clone(),
                kind: target.kind.clone(),
                resource_name: target.resource_name.clone(),
                namespace: target.namespace.clone(),
                name: target.name.clone(),
            }),
        }
    }

    async fn scale(&self, target: &ControllerIdentity, replicas: i32) -> ClientResult<()> {
        let mut state = self.state.lock().unwrap();
        let key = (
            target.namespace.clone(),
            target.kind.clone(),
            target.name.clone(),
        );
        if let Some(controller) = state.controllers.get_mut(&key) {
            controller.replicas = replicas;
        }
        state.calls.push(Call::Scale {
            namespace: target.namespace.clone(),
            name: target.name.clone(),
            replicas,
        });
        Ok(())
    }
}

/// A clock which only moves when told to.
#[derive(Clone)]
pub struct TestClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl TestClock {
    pub fn new() -> Self {
        TestClock {
            now: Arc::new(Mutex::new(
                Utc.timestamp_millis_opt(1_700_000_000_000).unwrap(),
            )),
        }
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock().unwrap();
        *now += by;
    }

    pub fn as_clock(&self) -> Clock {
        let now = Arc::clone(&self.now);
        Arc::new(move || *now.lock().unwrap())
    }
}

/// Builds a drain controller working against the fake cluster.
pub fn drain_controller(cluster: &FakeCluster, clock: &TestClock) -> DrainController<FakeCluster> {
    let reconciler = DrainReconciler::new(cluster.clone(), GRACE_PERIOD).with_clock(clock.as_clock());
    DrainController::with_reconciler(reconciler, Duration::from_secs(10))
}
