//! Logging setup shared by the drain controller binaries.
//!
//! Logging is configured entirely through environment variables:
//!
//! * `TRACING_FILTER_DIRECTIVE`: an `EnvFilter` directive, defaulting to `info`.
//! * `LOGGING_FORMATTER`: one of `full`, `compact`, `pretty` or `json`.
//! * `LOGGING_ANSI_ENABLED`: `true` to colorize output.
use serde::Deserialize;
use snafu::ResultExt;
use std::env;
use tracing::Subscriber;
use tracing_subscriber::{
    filter::LevelFilter, fmt, layer::SubscriberExt, registry::LookupSpan, EnvFilter, Registry,
};

const DEFAULT_LOG_LEVEL: LevelFilter = LevelFilter::INFO;

const TRACING_FILTER_DIRECTIVE_ENV_VAR: &str = "TRACING_FILTER_DIRECTIVE";
const LOGGING_FORMATTER_ENV_VAR: &str = "LOGGING_FORMATTER";
const LOGGING_ANSI_ENABLED_ENV_VAR: &str = "LOGGING_ANSI_ENABLED";

type Result<T> = std::result::Result<T, TelemetryConfigError>;
pub use error::TelemetryConfigError;

/// The layout of each logged event.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageFormat {
    #[default]
    Full,
    Compact,
    Pretty,
    /// Newline-delimited JSON, one object per event.
    Json,
}

/// How log lines are rendered, as read from the environment.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Default)]
pub struct LogFormat {
    pub message_format: MessageFormat,
    pub ansi_enabled: bool,
}

impl LogFormat {
    pub fn from_environment() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let message_format = match lookup(LOGGING_FORMATTER_ENV_VAR) {
            Some(value) => serde_plain::from_str(value.trim())
                .context(error::LogFormatterEnvSnafu { env_value: value })?,
            None => MessageFormat::default(),
        };
        let ansi_enabled = match lookup(LOGGING_ANSI_ENABLED_ENV_VAR) {
            Some(value) => value
                .trim()
                .to_lowercase()
                .parse()
                .context(error::LogAnsiEnvSnafu { env_value: value })?,
            None => false,
        };

        Ok(LogFormat {
            message_format,
            ansi_enabled,
        })
    }

    /// Stacks the matching `fmt` layer onto `subscriber`.
    fn layered<S>(&self, subscriber: S) -> Box<dyn Subscriber + Send + Sync>
    where
        S: Subscriber + Send + Sync + for<'a> LookupSpan<'a> + 'static,
    {
        let layer = fmt::layer().with_ansi(self.ansi_enabled);
        match self.message_format {
            MessageFormat::Full => Box::new(subscriber.with(layer)),
            MessageFormat::Compact => Box::new(subscriber.with(layer.compact())),
            MessageFormat::Pretty => Box::new(subscriber.with(layer.pretty())),
            MessageFormat::Json => Box::new(subscriber.with(layer.json())),
        }
    }
}

/// Installs the global tracing subscriber, configured from the process environment.
pub fn init_telemetry_from_env() -> Result<()> {
    let env_filter = EnvFilter::builder()
        .with_default_directive(DEFAULT_LOG_LEVEL.into())
        .with_env_var(TRACING_FILTER_DIRECTIVE_ENV_VAR)
        .from_env_lossy();

    let subscriber = LogFormat::from_environment()?.layered(Registry::default().with(env_filter));
    tracing::subscriber::set_global_default(subscriber)
        .context(error::TracingConfigurationSnafu)
}

pub mod error {
    use super::{LOGGING_ANSI_ENABLED_ENV_VAR, LOGGING_FORMATTER_ENV_VAR};
    use snafu::Snafu;

    #[derive(Debug, Snafu)]
    #[snafu(visibility(pub))]
    pub enum TelemetryConfigError {
        #[snafu(display("Unable to install tracing subscriber: '{}'", source))]
        TracingConfiguration {
            source: tracing::subscriber::SetGlobalDefaultError,
        },

        #[snafu(display(
            "Invalid log format in '{}={}': '{}'",
            LOGGING_FORMATTER_ENV_VAR,
            env_value,
            source
        ))]
        LogFormatterEnv {
            source: serde_plain::Error,
            env_value: String,
        },

        #[snafu(display(
            "Invalid ANSI setting in '{}={}': '{}'",
            LOGGING_ANSI_ENABLED_ENV_VAR,
            env_value,
            source
        ))]
        LogAnsiEnv {
            source: std::str::ParseBoolError,
            env_value: String,
        },
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use maplit::hashmap;
    use std::collections::HashMap;

    #[test]
    fn test_log_format_from_lookup() {
        let mut test_cases: Vec<(HashMap<&str, &str>, Option<LogFormat>)> = vec![
            (HashMap::new(), Some(LogFormat::default())),
            (
                hashmap! { LOGGING_FORMATTER_ENV_VAR => "json" },
                Some(LogFormat {
                    message_format: MessageFormat::Json,
                    ansi_enabled: false,
                }),
            ),
            (
                hashmap! {
                    LOGGING_FORMATTER_ENV_VAR => "compact",
                    LOGGING_ANSI_ENABLED_ENV_VAR => "TRUE",
                },
                Some(LogFormat {
                    message_format: MessageFormat::Compact,
                    ansi_enabled: true,
                }),
            ),
            (hashmap! { LOGGING_FORMATTER_ENV_VAR => "pretty" }, Some(LogFormat {
                message_format: MessageFormat::Pretty,
                ansi_enabled: false,
            })),
            (hashmap! { LOGGING_FORMATTER_ENV_VAR => "yaml" }, None),
            (hashmap! { LOGGING_ANSI_ENABLED_ENV_VAR => "yes" }, None),
        ];

        for (vars, expected) in test_cases.drain(..) {
            let parsed = LogFormat::from_lookup(|key| vars.get(key).map(|value| value.to_string()));
            assert_eq!(parsed.ok(), expected, "vars: {:?}", vars);
        }
    }
}
