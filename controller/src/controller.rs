use super::{
    cache::TickCache,
    config::DrainSettings,
    error::{self, Result},
    reconciler::DrainReconciler,
};
use models::node::DrainClient;

use futures::future::join_all;
use kube::ResourceExt;
use snafu::ResultExt;
use std::collections::HashSet;
use tokio::time::{sleep, Duration};
use tracing::{event, instrument, Level};

/// The DrainController periodically reconciles every node in the cluster.
pub struct DrainController<C: DrainClient> {
    reconciler: DrainReconciler<C>,
    poll_period: Duration,
}

impl<C: DrainClient> DrainController<C> {
    pub fn new(client: C, settings: &DrainSettings) -> Self {
        DrainController {
            reconciler: DrainReconciler::new(client, settings.grace_period()),
            poll_period: settings.poll_period(),
        }
    }

    /// Builds a controller around an already configured reconciler.
    pub fn with_reconciler(reconciler: DrainReconciler<C>, poll_period: Duration) -> Self {
        DrainController {
            reconciler,
            poll_period,
        }
    }

    pub fn reconciler(&self) -> &DrainReconciler<C> {
        &self.reconciler
    }

    /// Runs a single reconciliation pass over all nodes.
    ///
    /// Nodes are reconciled concurrently. A failure on one node is logged and does not stop the others;
    /// only a failure to list the nodes fails the tick.
    #[instrument(skip(self), err)]
    pub async fn tick(&self) -> Result<()> {
        let nodes = self
            .reconciler
            .client()
            .list_nodes()
            .await
            .context(error::ListNodesSnafu)?;
        event!(Level::TRACE, nodes = nodes.len(), "Reconciling nodes.");

        // Forget the gauge values of nodes deleted from the cluster.
        let node_names: HashSet<String> = nodes.iter().map(|node| node.name_any()).collect();
        self.reconciler.metrics().retain_nodes(&node_names);

        // Discovery documents and budgets are shared by all nodes, but only for this tick.
        let cache = TickCache::new();
        let results = join_all(
            nodes
                .iter()
                .map(|node| self.reconciler.reconcile_node(node, &cache)),
        )
        .await;

        for (node, result) in nodes.iter().zip(results) {
            if let Err(err) = result {
                let node_name = node.name_any();
                event!(Level::ERROR, %err, node = %node_name, "Failed to reconcile node.");
                self.reconciler.metrics().node_failed(&node_name);
            }
        }
        Ok(())
    }

    /// Runs the polling loop of the drain controller.
    ///
    /// Every tick rebuilds its view of the cluster from the nodes themselves, so the controller behaves
    /// the same whether it has been running for days or was just restarted. A tick always finishes
    /// before the next one is scheduled, so two ticks never work on the same node at once.
    pub async fn run(&self) -> Result<()> {
        loop {
            // Errors are logged by instrumentation in `tick()`.
            #[allow(unused_must_use)]
            {
                self.tick().await;
            }

            // Sleep until it's time to check for more action.
            sleep(self.poll_period).await;
        }
    }
}
