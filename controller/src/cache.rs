//! Per-tick memoization of cluster lookups which many pods share.
use models::node::{ClientResult, DrainClient};

use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::APIResource;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// TickCache remembers API discovery documents and PodDisruptionBudget lists for the duration of a
/// single reconciliation tick. A fresh cache is created for every tick so that no state leaks between
/// ticks.
///
/// Failed lookups are not remembered, so a later caller within the same tick retries them.
#[derive(Debug, Default)]
pub struct TickCache {
    api_resources: Mutex<HashMap<String, Arc<Vec<APIResource>>>>,
    disruption_budgets: Mutex<HashMap<String, Arc<Vec<PodDisruptionBudget>>>>,
}

impl TickCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the resources served by the given API group version.
    pub async fn api_resources<C: DrainClient>(
        &self,
        client: &C,
        api_version: &str,
    ) -> ClientResult<Arc<Vec<APIResource>>> {
        if let Some(resources) = self.api_resources.lock().await.get(api_version) {
            return Ok(Arc::clone(resources));
        }

        let resources = Arc::new(client.api_resources(api_version).await?);
        self.api_resources
            .lock()
            .await
            .insert(api_version.to_string(), Arc::clone(&resources));
        Ok(resources)
    }

    /// Returns the PodDisruptionBudgets of the given namespace.
    pub async fn disruption_budgets<C: DrainClient>(
        &self,
        client: &C,
        namespace: &str,
    ) -> ClientResult<Arc<Vec<PodDisruptionBudget>>> {
        if let Some(budgets) = self.disruption_budgets.lock().await.get(namespace) {
            return Ok(Arc::clone(budgets));
        }

        let budgets = Arc::new(client.list_disruption_budgets(namespace).await?);
        self.disruption_budgets
            .lock()
            .await
            .insert(namespace.to_string(), Arc::clone(&budgets));
        Ok(budgets)
    }
}
