mod cache;
mod controller;
mod error;
mod metrics;
mod retry;
mod store;

pub mod config;
pub mod eligibility;
pub mod owner;
pub mod reconciler;
pub mod statemachine;
pub mod telemetry;

pub use crate::cache::TickCache;
pub use crate::controller::DrainController;
pub use crate::error::{Error, Result};
pub use crate::reconciler::{Clock, DrainReconciler};
