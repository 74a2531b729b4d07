use models::node::{ControllerAnnotation, DrainPhase};

use chrono::{DateTime, Utc};
use tokio::time::Duration;
use tracing::instrument;

/// The action a tick takes for one tracked controller.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum DrainStep {
    /// Request one replica above the original count so that a replacement pod can start elsewhere.
    ScaleUp { replicas: i32 },
    /// The replacement replica is not ready yet.
    AwaitReady,
    /// The replacement just became ready; anchor the grace period.
    MarkReady,
    /// Old pods are still within their grace period.
    AwaitOldPods,
    /// The grace period has run out; delete the old pods.
    ForceDelete,
    /// No old pods remain; restore the original replica count.
    ScaleDown { replicas: i32 },
}

/// Determines the next step for a controller, given its drain state after the latest pod probe.
#[instrument(skip(controller), fields(controller = %controller.identity))]
pub fn determine_next_step(
    controller: &ControllerAnnotation,
    now: DateTime<Utc>,
    grace_period: Duration,
) -> DrainStep {
    match controller.phase() {
        DrainPhase::Discovered => DrainStep::ScaleUp {
            replicas: controller.scaled_replicas(),
        },
        DrainPhase::AwaitingReady => DrainStep::AwaitReady,
        DrainPhase::AwaitingOldPodsGone => match controller.ready_time {
            None => DrainStep::MarkReady,
            Some(_) if controller.grace_period_elapsed(now, grace_period) => DrainStep::ForceDelete,
            Some(_) => DrainStep::AwaitOldPods,
        },
        DrainPhase::ScalingDown => DrainStep::ScaleDown {
            replicas: controller.original,
        },
    }
}
