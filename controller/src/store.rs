//! Reads and writes the drain state persisted on the Node object.
use crate::retry::retry_strategy;
use models::constants::DRAIN_STATE_ANNOTATION;
use models::node::{DrainClient, NodeAnnotation};

use k8s_openapi::api::core::v1::Node;
use kube::ResourceExt;
use serde_json::{Map, Value};
use tokio_retry::Retry;
use tracing::{event, instrument, Level};

// Annotation writes are attempted this many times before the tick gives up on them.
const PERSIST_ATTEMPTS: usize = 10;

/// Loads the drain state of a node.
///
/// A node without the annotation has an empty drain state. So does a node whose annotation cannot be
/// parsed, in which case an error is logged.
pub fn load_node_annotation(node: &Node) -> NodeAnnotation {
    match NodeAnnotation::from_node(node) {
        Ok(annotation) => annotation.unwrap_or_default(),
        Err(err) => {
            event!(
                Level::ERROR,
                %err,
                node = %node.name_any(),
                "Unable to parse drain state annotation, treating it as empty."
            );
            NodeAnnotation::default()
        }
    }
}

/// Builds a merge patch touching only the drain state annotation. An empty annotation removes the key.
fn annotation_patch(annotation: &NodeAnnotation) -> serde_json::Result<Value> {
    let value = match annotation.to_annotation_value()? {
        Some(serialized) => Value::String(serialized),
        None => Value::Null,
    };

    let mut annotations = Map::new();
    annotations.insert(DRAIN_STATE_ANNOTATION.to_string(), value);
    Ok(serde_json::json!({ "metadata": { "annotations": annotations } }))
}

/// Persists the drain state of a node.
///
/// Failed writes are retried with backoff. If every attempt fails the error is logged and dropped:
/// the next tick starts again from whatever state the node holds.
#[instrument(skip(client, annotation), fields(controllers = annotation.len()))]
pub async fn persist_node_annotation<C: DrainClient>(
    client: &C,
    node_name: &str,
    annotation: &NodeAnnotation,
) {
    let patch = match annotation_patch(annotation) {
        Ok(patch) => patch,
        Err(err) => {
            event!(Level::ERROR, %err, "Unable to serialize drain state.");
            return;
        }
    };

    let result = Retry::spawn(retry_strategy(PERSIST_ATTEMPTS - 1), || async {
        client.patch_node(node_name, &patch).await.map_err(|err| {
            event!(Level::WARN, %err, "Failed to persist drain state, retrying.");
            err
        })
    })
    .await;

    if let Err(err) = result {
        event!(
            Level::ERROR,
            %err,
            attempts = PERSIST_ATTEMPTS,
            "Giving up persisting drain state for this tick."
        );
    }
}
