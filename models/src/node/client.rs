use super::{
    drain,
    error::{self, Result},
    ControllerIdentity,
};
use crate::constants::CORE_API_VERSION;

use async_trait::async_trait;
use k8s_openapi::api::{
    autoscaling::v1::ScaleSpec,
    core::v1::{Node, Pod},
    policy::v1::PodDisruptionBudget,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResource;
use kube::api::{
    Api, ApiResource, DynamicObject, ListParams, Patch, PatchParams, PostParams,
};
use snafu::ResultExt;
use tracing::instrument;

#[cfg(feature = "mockall")]
use mockall::mock;

#[async_trait]
/// A trait providing an interface to the cluster resources read and written while draining nodes. This
/// is provided as a trait in order to allow mocks to be used for testing purposes.
pub trait DrainClient: Send + Sync {
    /// Lists every node in the cluster.
    async fn list_nodes(&self) -> Result<Vec<Node>>;
    /// Applies a JSON merge patch to a node.
    async fn patch_node(&self, node_name: &str, patch: &serde_json::Value) -> Result<()>;
    /// Lists the pods bound to the given node.
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;
    /// Fetches a pod, returning `None` if the pod does not exist.
    async fn get_pod(&self, namespace: &str, pod_name: &str) -> Result<Option<Pod>>;
    /// Deletes a pod.
    async fn delete_pod(&self, namespace: &str, pod_name: &str) -> Result<()>;
    /// Lists the PodDisruptionBudgets of a namespace.
    async fn list_disruption_budgets(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>>;
    /// Lists the resources served by an API group version, e.g. `v1` or `apps/v1`.
    async fn api_resources(&self, api_version: &str) -> Result<Vec<APIResource>>;
    /// Fetches an arbitrary namespaced resource.
    async fn get_resource(&self, target: &ControllerIdentity) -> Result<DynamicObject>;
    /// Sets the replica count of a controller through its scale subresource.
    async fn scale(&self, target: &ControllerIdentity, replicas: i32) -> Result<()>;
}

#[cfg(feature = "mockall")]
mock! {
    /// A Mock DrainClient for use in tests.
    pub DrainClient {}
    #[async_trait]
    impl DrainClient for DrainClient {
        async fn list_nodes(&self) -> Result<Vec<Node>>;
        async fn patch_node(&self, node_name: &str, patch: &serde_json::Value) -> Result<()>;
        async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>>;
        async fn get_pod(&self, namespace: &str, pod_name: &str) -> Result<Option<Pod>>;
        async fn delete_pod(&self, namespace: &str, pod_name: &str) -> Result<()>;
        async fn list_disruption_budgets(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>>;
        async fn api_resources(&self, api_version: &str) -> Result<Vec<APIResource>>;
        async fn get_resource(&self, target: &ControllerIdentity) -> Result<DynamicObject>;
        async fn scale(&self, target: &ControllerIdentity, replicas: i32) -> Result<()>;
    }
}

#[derive(Clone)]
/// Concrete implementation of the `DrainClient` trait. This implementation will almost
/// certainly be used in any case that isn't a unit test.
pub struct K8SDrainClient {
    k8s_client: kube::client::Client,
}

impl K8SDrainClient {
    pub fn new(k8s_client: kube::client::Client) -> Self {
        K8SDrainClient { k8s_client }
    }

    /// Creates an `Api` addressing the given resource without needing its static type.
    fn dynamic_api(&self, target: &ControllerIdentity) -> Api<DynamicObject> {
        let (group, version) = match target.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", target.api_version.as_str()),
        };
        let api_resource = ApiResource {
            group: group.to_string(),
            version: version.to_string(),
            api_version: target.api_version.clone(),
            kind: target.kind.clone(),
            plural: target.resource_name.clone(),
        };
        Api::namespaced_with(self.k8s_client.clone(), &target.namespace, &api_resource)
    }
}

#[async_trait]
impl DrainClient for K8SDrainClient {
    #[instrument(skip(self), err)]
    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let nodes: Api<Node> = Api::all(self.k8s_client.clone());
        let nodes = nodes
            .list(&ListParams::default())
            .await
            .context(error::ListNodesSnafu)?;
        Ok(nodes.items)
    }

    #[instrument(skip(self, patch), err)]
    async fn patch_node(&self, node_name: &str, patch: &serde_json::Value) -> Result<()> {
        let nodes: Api<Node> = Api::all(self.k8s_client.clone());
        nodes
            .patch(node_name, &PatchParams::default(), &Patch::Merge(patch))
            .await
            .context(error::PatchNodeSnafu {
                node_name: node_name.to_string(),
            })?;
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn list_pods_on_node(&self, node_name: &str) -> Result<Vec<Pod>> {
        drain::find_node_pods(&self.k8s_client, node_name).await
    }

    #[instrument(skip(self), err)]
    async fn get_pod(&self, namespace: &str, pod_name: &str) -> Result<Option<Pod>> {
        drain::find_pod(&self.k8s_client, namespace, pod_name).await
    }

    #[instrument(skip(self), err)]
    async fn delete_pod(&self, namespace: &str, pod_name: &str) -> Result<()> {
        drain::delete_pod(&self.k8s_client, namespace, pod_name).await
    }

    #[instrument(skip(self), err)]
    async fn list_disruption_budgets(&self, namespace: &str) -> Result<Vec<PodDisruptionBudget>> {
        let budgets: Api<PodDisruptionBudget> =
            Api::namespaced(self.k8s_client.clone(), namespace);
        let budgets = budgets
            .list(&ListParams::default())
            .await
            .context(error::ListDisruptionBudgetsSnafu {
                namespace: namespace.to_string(),
            })?;
        Ok(budgets.items)
    }

    #[instrument(skip(self), err)]
    async fn api_resources(&self, api_version: &str) -> Result<Vec<APIResource>> {
        // The core group is served from `/api/v1`, every other group from `/apis/<group>/<version>`.
        let resource_list = if api_version == CORE_API_VERSION {
            self.k8s_client.list_core_api_resources(api_version).await
        } else {
            self.k8s_client.list_api_group_resources(api_version).await
        }
        .context(error::DiscoverResourcesSnafu {
            api_version: api_version.to_string(),
        })?;
        Ok(resource_list.resources)
    }

    #[instrument(skip(self), err)]
    async fn get_resource(&self, target: &ControllerIdentity) -> Result<DynamicObject> {
        self.dynamic_api(target)
            .get(&target.name)
            .await
            .context(error::GetResourceSnafu {
                api_version: target.api_version.clone(),
                kind: target.kind.clone(),
                resource_name: target.resource_name.clone(),
                namespace: target.namespace.clone(),
                name: target.name.clone(),
            })
    }

    #[instrument(skip(self), err)]
    async fn scale(&self, target: &ControllerIdentity, replicas: i32) -> Result<()> {
        let api = self.dynamic_api(target);

        let mut scale = api
            .get_scale(&target.name)
            .await
            .context(error::GetScaleSnafu {
                target: target.to_string(),
            })?;
        scale.spec = Some(ScaleSpec {
            replicas: Some(replicas),
        });
        let scale_request = serde_json::to_vec(&scale).context(error::CreateScaleRequestSnafu {
            target: target.to_string(),
        })?;

        api.replace_scale(&target.name, &PostParams::default(), scale_request)
            .await
            .context(error::ReplaceScaleSnafu {
                target: target.to_string(),
                replicas,
            })?;
        Ok(())
    }
}
