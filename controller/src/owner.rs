//! Resolution of the top-level controller managing a pod, following `ownerReferences` across
//! arbitrary resource kinds.
use crate::cache::TickCache;
use models::node::{ControllerIdentity, DrainClient};

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};
use kube::api::DynamicObject;
use std::fmt;
use tracing::{event, instrument, Level};

// Bounds the ownership walk in case of a reference cycle.
const MAX_OWNER_DEPTH: usize = 8;

// The scale subresource defaults to one replica when `spec.replicas` is omitted.
const DEFAULT_REPLICAS: i32 = 1;

/// The closed set of controller kinds which can be drained through their scale subresource.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ControllerKind {
    ReplicationController,
    ReplicaSet,
    Deployment,
    DeploymentConfig,
    Unsupported(String),
}

impl ControllerKind {
    pub fn is_supported(&self) -> bool {
        !matches!(self, ControllerKind::Unsupported(_))
    }
}

impl From<&str> for ControllerKind {
    fn from(kind: &str) -> Self {
        match kind {
            "ReplicationController" => ControllerKind::ReplicationController,
            "ReplicaSet" => ControllerKind::ReplicaSet,
            "Deployment" => ControllerKind::Deployment,
            "DeploymentConfig" => ControllerKind::DeploymentConfig,
            other => ControllerKind::Unsupported(other.to_string()),
        }
    }
}

impl fmt::Display for ControllerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ControllerKind::ReplicationController => write!(f, "ReplicationController"),
            ControllerKind::ReplicaSet => write!(f, "ReplicaSet"),
            ControllerKind::Deployment => write!(f, "Deployment"),
            ControllerKind::DeploymentConfig => write!(f, "DeploymentConfig"),
            ControllerKind::Unsupported(kind) => write!(f, "{}", kind),
        }
    }
}

/// A controller as read from the cluster during the owner walk.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ObservedController {
    pub identity: ControllerIdentity,
    pub kind: ControllerKind,
    /// `spec.replicas` of the live resource.
    pub replicas: i32,
    /// `status.readyReplicas` of the live resource.
    pub ready_replicas: i32,
}

impl ObservedController {
    fn from_object(identity: ControllerIdentity, kind: ControllerKind, object: &DynamicObject) -> Self {
        let replica_field = |section: &str, field: &str| {
            object
                .data
                .get(section)
                .and_then(|section| section.get(field))
                .and_then(|value| value.as_i64())
                .and_then(|value| i32::try_from(value).ok())
        };

        ObservedController {
            identity,
            kind,
            replicas: replica_field("spec", "replicas").unwrap_or(DEFAULT_REPLICAS),
            ready_replicas: replica_field("status", "readyReplicas").unwrap_or(0),
        }
    }

    pub fn is_drainable(&self) -> bool {
        self.kind.is_supported()
    }
}

/// Returns the owner reference flagged as the managing controller.
fn controller_reference(metadata: &ObjectMeta) -> Option<&OwnerReference> {
    metadata
        .owner_references
        .iter()
        .flatten()
        .find(|reference| reference.controller == Some(true))
}

/// Looks up the plural REST resource name serving `kind` within `api_version`.
async fn resolve_resource_name<C: DrainClient>(
    client: &C,
    cache: &TickCache,
    api_version: &str,
    kind: &str,
) -> Option<String> {
    match cache.api_resources(client, api_version).await {
        Ok(resources) => resources
            .iter()
            // Subresources such as `deployments/scale` share the kind of their parent.
            .find(|resource| resource.kind == kind && !resource.name.contains('/'))
            .map(|resource| resource.name.clone()),
        Err(err) => {
            event!(Level::WARN, %err, api_version, "Unable to discover API resources.");
            None
        }
    }
}

/// Walks the controller references upwards from the given object and returns the outermost
/// controller that could be resolved.
///
/// Returns `None` if the object has no controller, if its direct controller is not a supported kind,
/// or if a lookup fails. If the resource name of an owner cannot be discovered the walk stops there,
/// and the last resolved controller is returned.
#[instrument(skip(client, cache, metadata), fields(name = ?metadata.name, namespace = ?metadata.namespace))]
pub async fn resolve_owner<C: DrainClient>(
    client: &C,
    cache: &TickCache,
    metadata: &ObjectMeta,
) -> Option<ObservedController> {
    let namespace = metadata.namespace.clone().unwrap_or_default();
    let mut reference = controller_reference(metadata)?.clone();
    let mut resolved: Option<ObservedController> = None;

    for _ in 0..MAX_OWNER_DEPTH {
        let kind = ControllerKind::from(reference.kind.as_str());
        if !kind.is_supported() {
            event!(
                Level::DEBUG,
                kind = %kind,
                name = %reference.name,
                "Owner kind cannot be drained, stopping owner walk."
            );
            break;
        }

        let resource_name =
            match resolve_resource_name(client, cache, &reference.api_version, &reference.kind)
                .await
            {
                Some(resource_name) => resource_name,
                None => {
                    event!(
                        Level::WARN,
                        api_version = %reference.api_version,
                        kind = %reference.kind,
                        "Could not find resource name of owner, stopping owner walk."
                    );
                    break;
                }
            };

        let identity = ControllerIdentity {
            api_version: reference.api_version.clone(),
            kind: reference.kind.clone(),
            resource_name,
            namespace: namespace.clone(),
            name: reference.name.clone(),
        };
        let object = match client.get_resource(&identity).await {
            Ok(object) => object,
            Err(err) => {
                event!(Level::WARN, %err, owner = %identity, "Unable to fetch owner.");
                return None;
            }
        };

        let next_reference = controller_reference(&object.metadata).cloned();
        resolved = Some(ObservedController::from_object(identity, kind, &object));
        match next_reference {
            Some(next_reference) => reference = next_reference,
            None => break,
        }
    }

    resolved
}
