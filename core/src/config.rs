//! Runtime configuration.
//!
//! Loaded from TOML, then optionally overridden by environment variables:
//! - `DENDRITE_OUTPUT_BUFFER`
//! - `DENDRITE_WORKER_BUFFER`
//! - `DENDRITE_DIAGNOSTICS` (`off` | `tracing`)
//!
//! Invalid environment values are ignored with warning logs.

use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Parse(#[from] toml::de::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticsMode {
    #[default]
    Off,
    /// Attach a `TracingListener` to every runtime.
    Tracing,
}

impl DiagnosticsMode {
    fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "off" | "none" => Some(Self::Off),
            "tracing" | "trace" | "log" => Some(Self::Tracing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Capacity of the host-facing output channel. Never below 1.
    pub output_buffer: usize,
    /// Capacity of each worker's event channel. Never below 1.
    pub worker_buffer: usize,
    pub diagnostics: DiagnosticsMode,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            output_buffer: 1,
            worker_buffer: 1,
            diagnostics: DiagnosticsMode::Off,
        }
    }
}

impl RuntimeConfig {
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: RuntimeConfig = toml::from_str(source)?;
        Ok(config.normalized())
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    /// Defaults overridden by `DENDRITE_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(value) = lookup("DENDRITE_OUTPUT_BUFFER") {
            match value.trim().parse() {
                Ok(size) => self.output_buffer = size,
                Err(e) => tracing::warn!("Ignoring DENDRITE_OUTPUT_BUFFER={}: {}", value, e),
            }
        }
        if let Some(value) = lookup("DENDRITE_WORKER_BUFFER") {
            match value.trim().parse() {
                Ok(size) => self.worker_buffer = size,
                Err(e) => tracing::warn!("Ignoring DENDRITE_WORKER_BUFFER={}: {}", value, e),
            }
        }
        if let Some(value) = lookup("DENDRITE_DIAGNOSTICS") {
            match DiagnosticsMode::parse(value.trim()) {
                Some(mode) => self.diagnostics = mode,
                None => tracing::warn!("Ignoring unknown DENDRITE_DIAGNOSTICS={}", value),
            }
        }
        self.normalized()
    }

    pub fn with_output_buffer(mut self, size: usize) -> Self {
        self.output_buffer = size;
        self.normalized()
    }

    pub fn with_worker_buffer(mut self, size: usize) -> Self {
        self.worker_buffer = size;
        self.normalized()
    }

    pub fn with_diagnostics(mut self, mode: DiagnosticsMode) -> Self {
        self.diagnostics = mode;
        self
    }

    fn normalized(mut self) -> Self {
        self.output_buffer = self.output_buffer.max(1);
        self.worker_buffer = self.worker_buffer.max(1);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RuntimeConfig::default();
        assert_eq!(config.output_buffer, 1);
        assert_eq!(config.worker_buffer, 1);
        assert_eq!(config.diagnostics, DiagnosticsMode::Off);
    }

    #[test]
    fn test_toml_partial_and_clamped() {
        let config = RuntimeConfig::from_toml_str("output_buffer = 0\ndiagnostics = \"tracing\"").unwrap();
        assert_eq!(config.output_buffer, 1);
        assert_eq!(config.worker_buffer, 1);
        assert_eq!(config.diagnostics, DiagnosticsMode::Tracing);

        assert!(matches!(
            RuntimeConfig::from_toml_str("output_buffer = \"lots\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_env_overrides_ignore_invalid_values() {
        let env: HashMap<&str, &str> = [
            ("DENDRITE_OUTPUT_BUFFER", "8"),
            ("DENDRITE_WORKER_BUFFER", "many"),
            ("DENDRITE_DIAGNOSTICS", "TRACING"),
        ]
        .into_iter()
        .collect();

        let config = RuntimeConfig::default()
            .with_overrides_from(|name| env.get(name).map(|value| value.to_string()));
        assert_eq!(config.output_buffer, 8);
        assert_eq!(config.worker_buffer, 1);
        assert_eq!(config.diagnostics, DiagnosticsMode::Tracing);
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "worker_buffer = 4").unwrap();
        let config = RuntimeConfig::from_path(file.path()).unwrap();
        assert_eq!(config.worker_buffer, 4);

        assert!(matches!(
            RuntimeConfig::from_path("/definitely/not/here.toml"),
            Err(ConfigError::Io { .. })
        ));
    }
}
