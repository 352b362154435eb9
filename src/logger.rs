use std::env;
use std::str::FromStr;
use strum_macros::{Display, EnumString};
use tracing_subscriber::EnvFilter;

const CI_VAR: &str = "CI";
const DEFAULT_FILTER: &str = "info";

#[derive(Clone, Copy, Debug, Display, EnumString, PartialEq, Eq)]
#[strum(serialize_all = "lowercase")]
pub enum LogFormat {
    Text,
    /// One json object per event, with the current scenario span.
    Json,
}

impl LogFormat {
    /// Json on CI, where logs of parallel scenarios are interleaved, text otherwise. `LOG_FORMAT`
    /// overrides both.
    pub fn from_env() -> LogFormat {
        if let Some(format) = env::var("LOG_FORMAT").ok().and_then(|f| LogFormat::from_str(&f).ok()) {
            return format;
        }

        match env::var_os(CI_VAR) {
            Some(_) => LogFormat::Json,
            None => LogFormat::Text,
        }
    }
}

/// Installs the global subscriber, filtered by `RUST_LOG` (`info` when unset). Calling it again
/// is a no-op.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));

    let result = match format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .try_init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).try_init(),
    };

    if result.is_err() {
        debug!("tracing subscriber already installed");
    }
}
