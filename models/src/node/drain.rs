//! Pod lookups and deletions performed while draining a Node.
//!
//! The drain itself is driven by the controller, which scales up the owner of each protected Pod before
//! removing it. The functions here are the Pod-level building blocks it relies on. Cordoning is not
//! handled here: a Node is expected to be marked unschedulable before it is drained.
use super::error::{self, Result};

use k8s_openapi::api::core::v1::Pod;
use kube::{
    api::{DeleteParams, ListParams},
    Api,
};
use snafu::ResultExt;
use tracing::{event, instrument, Level};

// The API answers with this status code when the Pod no longer exists.
const NOT_FOUND: u16 = 404;

/// Finds all pods bound to the given node.
#[instrument(skip(k8s_client), err)]
pub(crate) async fn find_node_pods(k8s_client: &kube::Client, node_name: &str) -> Result<Vec<Pod>> {
    let pods: Api<Pod> = Api::all(k8s_client.clone());

    let node_pods = pods
        .list(&ListParams {
            field_selector: Some(format!("spec.nodeName={}", node_name)),
            ..Default::default()
        })
        .await
        .context(error::FindNodePodsSnafu {
            node_name: node_name.to_string(),
        })?;

    Ok(node_pods.items)
}

/// Fetches the given Pod. A Pod which Kubernetes does not know about is reported as `None`.
#[instrument(skip(k8s_client), err)]
pub(crate) async fn find_pod(
    k8s_client: &kube::Client,
    namespace: &str,
    pod_name: &str,
) -> Result<Option<Pod>> {
    let pod_api: Api<Pod> = Api::namespaced(k8s_client.clone(), namespace);
    match pod_api.get(pod_name).await {
        Ok(pod) => Ok(Some(pod)),
        Err(kube::Error::Api(e)) if e.code == NOT_FOUND => {
            event!(Level::DEBUG, "Pod '{}/{}' not found.", namespace, pod_name);
            Ok(None)
        }
        Err(e) => Err(e).context(error::GetPodSnafu {
            namespace: namespace.to_string(),
            pod_name: pod_name.to_string(),
        }),
    }
}

/// Deletes the given Pod, bypassing any PodDisruptionBudget that protects it.
///
/// The Pod keeps its own termination grace period. A Pod which is already gone counts as deleted.
#[instrument(skip(k8s_client), err)]
pub(crate) async fn delete_pod(k8s_client: &kube::Client, namespace: &str, pod_name: &str) -> Result<()> {
    let pod_api: Api<Pod> = Api::namespaced(k8s_client.clone(), namespace);
    match pod_api.delete(pod_name, &DeleteParams::default()).await {
        Ok(_) => {
            event!(Level::INFO, "Deleted Pod '{}/{}'", namespace, pod_name);
            Ok(())
        }
        Err(kube::Error::Api(e)) if e.code == NOT_FOUND => {
            event!(Level::INFO, "Pod '{}/{}' was already deleted.", namespace, pod_name);
            Ok(())
        }
        Err(e) => Err(e).context(error::DeletePodSnafu {
            namespace: namespace.to_string(),
            pod_name: pod_name.to_string(),
        }),
    }
}
