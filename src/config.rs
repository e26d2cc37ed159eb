use crate::client::{Credential, QueryOptions};
use crate::error::ConfigError;
use crate::format::{DiagnosticsFormat, FormatVersion};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Top-level configuration loaded from sampler.toml.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct SamplerConfig {
    pub connection: ConnectionConfig,
    pub query: QueryConfig,
    pub options: QueryOptions,
    pub diagnostics: DiagnosticsConfig,
    pub load: LoadConfig,
    pub output: OutputConfig,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Account endpoint. For the replay client, a directory of recorded pages.
    pub endpoint: String,
    pub key: Credential,
    pub database: String,
    pub container: String,
    pub partition_key_path: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct QueryConfig {
    pub text: String,
    pub run_id: String,
    pub query_type: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct DiagnosticsConfig {
    pub format: FormatVersion,
    /// Overrides the profile's line separator.
    pub line_separator: Option<String>,
    /// Overrides the retrieved-document-count column offset.
    pub retrieved_count_offset: Option<usize>,
    /// Always record `Duration`, not only when debug logging is on.
    pub record_duration: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoadConfig {
    /// Concurrent virtual users.
    pub threads: usize,
    /// Samples per virtual user.
    pub iterations: u64,
    /// Delay between starting consecutive users.
    pub ramp_up_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct OutputConfig {
    /// JSON-lines file receiving one sample result per line.
    pub path: PathBuf,
}

// --- Default implementations ---

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            threads: 1,
            iterations: 1,
            ramp_up_ms: 0,
        }
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("results.jsonl"),
        }
    }
}

impl SamplerConfig {
    /// Load config from `path`. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "config file not found, using defaults");
                return Ok(Self::default());
            }
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Check the settings a run cannot start without.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.connection.endpoint.is_empty() {
            return Err(ConfigError::Invalid("connection.endpoint is required".into()));
        }
        if self.query.text.trim().is_empty() {
            return Err(ConfigError::Invalid("query.text is required".into()));
        }
        if self.load.threads == 0 {
            return Err(ConfigError::Invalid("load.threads must be at least 1".into()));
        }
        if self.load.iterations == 0 {
            return Err(ConfigError::Invalid(
                "load.iterations must be at least 1".into(),
            ));
        }
        if self.options.page_size == 0 {
            return Err(ConfigError::Invalid("options.page_size must be at least 1".into()));
        }
        if matches!(&self.diagnostics.line_separator, Some(sep) if sep.is_empty()) {
            return Err(ConfigError::Invalid(
                "diagnostics.line_separator must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The diagnostics profile with any configured overrides applied.
    pub fn diagnostics_format(&self) -> DiagnosticsFormat {
        let mut format = DiagnosticsFormat::for_version(self.diagnostics.format);
        if let Some(sep) = &self.diagnostics.line_separator {
            format = format.with_line_separator(sep.clone());
        }
        if let Some(offset) = self.diagnostics.retrieved_count_offset {
            format = format.with_fixed_offset(offset);
        }
        format
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::ExtractionRule;
    use tempfile::TempDir;

    fn valid() -> SamplerConfig {
        let mut cfg = SamplerConfig::default();
        cfg.connection.endpoint = "recordings".into();
        cfg.query.text = "SELECT * FROM c".into();
        cfg
    }

    #[test]
    fn defaults() {
        let cfg = SamplerConfig::default();
        assert_eq!(cfg.load.threads, 1);
        assert_eq!(cfg.load.iterations, 1);
        assert_eq!(cfg.options.page_size, 10);
        assert_eq!(cfg.output.path, PathBuf::from("results.jsonl"));
        assert_eq!(cfg.diagnostics.format, FormatVersion::V4);
        assert!(!cfg.diagnostics.record_duration);
    }

    #[test]
    fn missing_file_yields_defaults() {
        let cfg = SamplerConfig::load(Path::new("/nonexistent/sampler.toml")).unwrap();
        assert_eq!(cfg.load.threads, 1);
    }

    #[test]
    fn parses_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sampler.toml");
        std::fs::write(
            &path,
            r#"
[connection]
endpoint = "https://account.documents.example:443/"
key = "secret"
database = "shop"
container = "orders"

[query]
text = "SELECT * FROM c WHERE c.status = 'open'"
run_id = "nightly-42"
query_type = "cross-partition"

[options]
page_size = 25

[diagnostics]
retrieved_count_offset = 60
line_separator = "\r\n"

[load]
threads = 4
"#,
        )
        .unwrap();

        let cfg = SamplerConfig::load(&path).unwrap();
        assert_eq!(cfg.connection.database, "shop");
        assert_eq!(cfg.connection.key.expose(), "secret");
        assert_eq!(cfg.query.run_id, "nightly-42");
        assert_eq!(cfg.options.page_size, 25);
        assert_eq!(cfg.options.max_buffered_item_count, 100);
        assert_eq!(cfg.load.threads, 4);
        assert_eq!(cfg.load.iterations, 1);
        assert!(cfg.validate().is_ok());

        let format = cfg.diagnostics_format();
        assert_eq!(format.line_separator(), "\r\n");
        assert!(format.rules().iter().any(|r| matches!(
            r,
            ExtractionRule::FixedOffset { offset: 60, .. }
        )));
    }

    #[test]
    fn malformed_file_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sampler.toml");
        std::fs::write(&path, "[load]\nthreads = \"many\"\n").unwrap();
        let err = SamplerConfig::load(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn unknown_format_version_is_parse_error() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("sampler.toml");
        std::fs::write(&path, "[diagnostics]\nformat = \"v9\"\n").unwrap();
        assert!(SamplerConfig::load(&path).is_err());
    }

    #[test]
    fn validate_requires_endpoint_and_query() {
        let mut cfg = valid();
        cfg.connection.endpoint.clear();
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.query.text = "   ".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_load() {
        let mut cfg = valid();
        cfg.load.threads = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = valid();
        cfg.load.iterations = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_separator() {
        let mut cfg = valid();
        cfg.diagnostics.line_separator = Some(String::new());
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn debug_output_redacts_key() {
        let mut cfg = valid();
        cfg.connection.key = Credential::new("hunter2");
        let dump = format!("{cfg:?}");
        assert!(!dump.contains("hunter2"));
    }
}
