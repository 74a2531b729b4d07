/// Helper macro to avoid retyping the base domain-like name of our system when creating further
/// string constants from it. When given no parameters, this returns the base domain-like name of
/// the system. When given a string literal parameter it adds `/parameter` to the end.
#[macro_export]
macro_rules! drain_domain {
    () => {
        "drain-controller.dev"
    };
    ($s:literal) => {
        concat!(drain_domain!(), "/", $s)
    };
}

pub const DRAIN_DOMAIN_LIKE_NAME: &str = drain_domain!();

/// The node annotation holding the serialized drain progress for that node.
/// The suffix is bumped whenever the persisted layout changes incompatibly.
pub const DRAIN_STATE_ANNOTATION: &str = drain_domain!("state-v1");

// Pod phases, see https://kubernetes.io/docs/concepts/workloads/pods/pod-lifecycle/#pod-phase
pub const POD_PHASE_RUNNING: &str = "Running";

// The API version of the kubernetes core group, which is served from `/api` rather than `/apis`.
pub const CORE_API_VERSION: &str = "v1";

// controller constants
pub const CONTROLLER_DEFAULT_HTTP_PORT: u16 = 8080;
pub const CONTROLLER_HEALTH_CHECK_ROUTE: &str = "/health"; // Route used for k8s liveness and readiness checks.
pub const CONTROLLER_METRICS_ROUTE: &str = "/metrics";
