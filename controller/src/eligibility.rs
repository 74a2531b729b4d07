use crate::cache::TickCache;
use models::node::{ClientResult, DrainClient};

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use std::collections::BTreeMap;
use tracing::{event, instrument, Level};

// Only budgets which forbid losing the last replica call for a scale up before eviction.
const PROTECTED_MIN_AVAILABLE: IntOrString = IntOrString::Int(1);

/// Returns true if every `matchLabels` entry of the budget's selector is present on the pod.
///
/// A budget without a selector, or whose selector has no `matchLabels`, matches nothing.
fn budget_selects(budget: &PodDisruptionBudget, pod_labels: &BTreeMap<String, String>) -> bool {
    let match_labels = match budget
        .spec
        .as_ref()
        .and_then(|spec| spec.selector.as_ref())
        .and_then(|selector| selector.match_labels.as_ref())
    {
        Some(match_labels) => match_labels,
        None => return false,
    };

    match_labels
        .iter()
        .all(|(key, value)| pod_labels.get(key) == Some(value))
}

/// Determines whether the controller of the given pod has to be scaled up before the pod is evicted.
///
/// The first PodDisruptionBudget in the pod's namespace which selects the pod decides: the pod is
/// eligible only if that budget requires exactly one available replica.
#[instrument(skip(client, cache, pod), fields(pod = ?pod.metadata.name), err)]
pub async fn requires_scale_up<C: DrainClient>(
    client: &C,
    cache: &TickCache,
    pod: &Pod,
) -> ClientResult<bool> {
    let namespace = pod.metadata.namespace.as_deref().unwrap_or("default");
    let budgets = cache.disruption_budgets(client, namespace).await?;

    let no_labels = BTreeMap::new();
    let pod_labels = pod.metadata.labels.as_ref().unwrap_or(&no_labels);

    let matching_budget = budgets
        .iter()
        .find(|budget| budget_selects(budget, pod_labels));

    Ok(match matching_budget {
        Some(budget) => {
            let min_available = budget
                .spec
                .as_ref()
                .and_then(|spec| spec.min_available.as_ref());
            event!(
                Level::TRACE,
                budget = ?budget.metadata.name,
                ?min_available,
                "Found disruption budget for pod."
            );
            min_available == Some(&PROTECTED_MIN_AVAILABLE)
        }
        None => false,
    })
}
