//! Tracing / logging initialisation.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use starknetid_core::error::IndexerError;

/// Log level per component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogConfig {
    /// Global default level: "trace" | "debug" | "info" | "warn" | "error"
    #[serde(default = "default_level")]
    pub level: String,
    /// Override per component: crate name → level
    #[serde(default)]
    pub components: HashMap<String, String>,
    /// Emit JSON structured logs (true) or human-readable text (false)
    #[serde(default)]
    pub json: bool,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            components: HashMap::new(),
            json: false,
        }
    }
}

impl LogConfig {
    /// Directive string, e.g. `"info,starknetid_indexer=debug"`.
    pub fn directives(&self) -> String {
        let mut directives = self.level.clone();
        let mut components: Vec<_> = self.components.iter().collect();
        components.sort();
        for (component, level) in components {
            directives.push_str(&format!(",{}={}", component.replace('-', "_"), level));
        }
        directives
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_tracing(config: &LogConfig) -> Result<(), IndexerError> {
    let filter = EnvFilter::try_new(config.directives())
        .or_else(|_| EnvFilter::try_new("info"))
        .map_err(|e| IndexerError::Config(format!("log filter: {e}")))?;

    let installed = if config.json {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json())
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer())
            .try_init()
    };
    installed.map_err(|e| IndexerError::Config(format!("tracing init: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directives_include_components() {
        let cfg = LogConfig {
            level: "warn".into(),
            components: HashMap::from([
                ("starknetid-indexer".to_string(), "debug".to_string()),
                ("sqlx".to_string(), "error".to_string()),
            ]),
            json: false,
        };
        assert_eq!(cfg.directives(), "warn,sqlx=error,starknetid_indexer=debug");
    }
}
