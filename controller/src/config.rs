//! Settings for the drain controller, read from the process environment.
use models::constants::CONTROLLER_DEFAULT_HTTP_PORT;

use snafu::ResultExt;
use std::env;
use std::str::FromStr;
use tokio::time::Duration;
use validator::Validate;

// Defines the drain timing related env variable names
const POLL_PERIOD_ENV_VAR: &str = "DRAIN_POLL_PERIOD_SECONDS";
const GRACE_PERIOD_ENV_VAR: &str = "DRAIN_GRACE_PERIOD_SECONDS";

// Defines the port on which `/health` and `/metrics` are served
const HTTP_PORT_ENV_VAR: &str = "DRAIN_HTTP_PORT";

const DEFAULT_POLL_PERIOD_SECONDS: u64 = 10;
const DEFAULT_GRACE_PERIOD_SECONDS: u64 = 5 * 60;

/// The module-wide result type.
type Result<T> = std::result::Result<T, settings_error::Error>;

/// DrainSettings holds the tunables of the reconciliation loop.
#[derive(Clone, Debug, PartialEq, Eq, Validate)]
pub struct DrainSettings {
    /// Time between two reconciliation ticks.
    #[validate(range(min = 1, max = 3600))]
    pub poll_period_seconds: u64,
    /// Time granted to old pods to terminate once their replacement is ready.
    #[validate(range(max = 86400))]
    pub grace_period_seconds: u64,
    pub http_port: u16,
}

impl Default for DrainSettings {
    fn default() -> Self {
        DrainSettings {
            poll_period_seconds: DEFAULT_POLL_PERIOD_SECONDS,
            grace_period_seconds: DEFAULT_GRACE_PERIOD_SECONDS,
            http_port: CONTROLLER_DEFAULT_HTTP_PORT,
        }
    }
}

impl DrainSettings {
    pub fn from_environment() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = DrainSettings::default();
        let settings = DrainSettings {
            poll_period_seconds: parse_var(&lookup, POLL_PERIOD_ENV_VAR)?
                .unwrap_or(defaults.poll_period_seconds),
            grace_period_seconds: parse_var(&lookup, GRACE_PERIOD_ENV_VAR)?
                .unwrap_or(defaults.grace_period_seconds),
            http_port: parse_var(&lookup, HTTP_PORT_ENV_VAR)?.unwrap_or(defaults.http_port),
        };

        settings
            .validate()
            .context(settings_error::InvalidSettingsSnafu)?;
        Ok(settings)
    }

    pub fn poll_period(&self) -> Duration {
        Duration::from_secs(self.poll_period_seconds)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_seconds)
    }
}

fn parse_var<F, T>(lookup: &F, variable: &'static str) -> Result<Option<T>>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr<Err = std::num::ParseIntError>,
{
    lookup(variable)
        .map(|value| {
            value
                .trim()
                .parse()
                .context(settings_error::ParseVariableSnafu { variable, value })
        })
        .transpose()
}

pub mod settings_error {
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum Error {
        #[snafu(display(
            "Unable to parse environment variable '{}={}': '{}'",
            variable,
            value,
            source
        ))]
        ParseVariable {
            source: std::num::ParseIntError,
            variable: &'static str,
            value: String,
        },

        #[snafu(display("Invalid drain settings: '{}'", source))]
        InvalidSettings { source: validator::ValidationErrors },
    }
}
