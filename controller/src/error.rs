use models::node::ClientError;

use snafu::Snafu;

/// The crate-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// The crate-wide error type.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("Unable to list nodes: '{}'", source))]
    ListNodes { source: ClientError },

    #[snafu(display("Unable to list pods on node '{}': '{}'", node_name, source))]
    ListNodePods {
        source: ClientError,
        node_name: String,
    },

    #[snafu(display("Failed to scale {} to {} replicas: '{}'", controller, replicas, source))]
    ScaleController {
        source: ClientError,
        controller: String,
        replicas: i32,
    },
}
