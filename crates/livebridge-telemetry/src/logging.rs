//! `tracing` subscriber setup.

use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

/// Configuration for log output.
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Default level directive (`info`, `debug`, ...). Overridden by `RUST_LOG`.
    pub level: String,
    /// Per-module level overrides (e.g. `livebridge_server` => `debug`).
    pub module_levels: Vec<(String, String)>,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            module_levels: Vec::new(),
            json: false,
        }
    }
}

impl LoggingConfig {
    /// Build the filter directive string, e.g. `info,livebridge_server=debug`.
    pub fn directives(&self) -> String {
        let mut filter = self.level.trim().to_lowercase();
        if filter.is_empty() {
            filter.push_str("info");
        }
        for (module, level) in &self.module_levels {
            filter.push(',');
            filter.push_str(module);
            filter.push('=');
            filter.push_str(&level.to_lowercase());
        }
        filter
    }
}

/// Install the global subscriber. Call once at startup.
///
/// `RUST_LOG` takes precedence over the configured directives. Fails if a
/// global subscriber is already installed or the directives do not parse.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(config.directives())?,
    };

    let json_layer = config.json.then(|| {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_span_list(true)
    });
    let text_layer = (!config.json).then(|| tracing_subscriber::fmt::layer().with_target(true));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(json_layer)
        .with(text_layer)
        .try_init()?;
    Ok(())
}
