use snafu::Snafu;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to list nodes: '{}'", source))]
    ListNodes { source: kube::Error },

    #[snafu(display("Unable to patch node '{}': '{}'", node_name, source))]
    PatchNode {
        source: kube::Error,
        node_name: String,
    },

    #[snafu(display("Unable to find Pods for Node '{}': '{}'", node_name, source))]
    FindNodePods {
        source: kube::Error,
        node_name: String,
    },

    #[snafu(display("Unable to get Pod '{}/{}': '{}'", namespace, pod_name, source))]
    GetPod {
        source: kube::Error,
        namespace: String,
        pod_name: String,
    },

    #[snafu(display("Unable to delete Pod '{}/{}': '{}'", namespace, pod_name, source))]
    DeletePod {
        source: kube::Error,
        namespace: String,
        pod_name: String,
    },

    #[snafu(display(
        "Unable to list PodDisruptionBudgets in namespace '{}': '{}'",
        namespace,
        source
    ))]
    ListDisruptionBudgets {
        source: kube::Error,
        namespace: String,
    },

    #[snafu(display("Unable to discover resources of API '{}': '{}'", api_version, source))]
    DiscoverResources {
        source: kube::Error,
        api_version: String,
    },

    #[snafu(display(
        "Unable to get {} '{}/{}' ({}/{}): '{}'",
        kind,
        namespace,
        name,
        api_version,
        resource_name,
        source
    ))]
    GetResource {
        source: kube::Error,
        api_version: String,
        kind: String,
        resource_name: String,
        namespace: String,
        name: String,
    },

    #[snafu(display("Unable to read scale of '{}': '{}'", target, source))]
    GetScale { source: kube::Error, target: String },

    #[snafu(display("Unable to create scale request for '{}': '{}'", target, source))]
    CreateScaleRequest {
        source: serde_json::Error,
        target: String,
    },

    #[snafu(display("Unable to scale '{}' to {} replicas: '{}'", target, replicas, source))]
    ReplaceScale {
        source: kube::Error,
        target: String,
        replicas: i32,
    },
}
