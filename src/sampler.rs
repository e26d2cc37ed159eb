/// One sample: run the configured query, fold its page diagnostics into a
/// record, and report the outcome the way a load-test result line expects.
use crate::aggregate::{Aggregator, RunMetadata};
use crate::client::{ClientCache, ClientFactory, Credential, DocumentClient, QueryContainer, QueryOptions};
use crate::error::QueryError;
use crate::format::DiagnosticsFormat;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;

pub const SAMPLE_LABEL: &str = "Document DB Sampler";
pub const RESPONSE_CODE_OK: &str = "200";
pub const RESPONSE_CODE_FAILED: &str = "500";
pub const DATA_TYPE_TEXT: &str = "text";
pub const DATA_ENCODING: &str = "UTF-8";

/// Outcome of one sample.
#[derive(Debug, Clone, Serialize)]
pub struct SampleResult {
    pub label: String,
    pub success: bool,
    pub response_code: String,
    pub response_message: String,
    pub data_type: String,
    pub data_encoding: String,
    pub sampler_data: String,
    pub response_data: String,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub user: usize,
    pub iteration: u64,
}

/// Connection and query settings for a sampler.
#[derive(Debug, Clone, Default)]
pub struct SamplerSettings {
    endpoint: String,
    credential: Credential,
    database: String,
    container: String,
    partition_key_path: String,
    query: String,
    run_id: String,
    query_type: String,
}

impl SamplerSettings {
    fn metadata(&self) -> RunMetadata {
        RunMetadata {
            query: self.query.clone(),
            run_id: self.run_id.clone(),
            query_type: self.query_type.clone(),
        }
    }
}

/// Runs samples for one virtual user.
///
/// Owns its container handle; the client itself comes from the shared cache.
/// Changing any connection setting drops the container so the next sample
/// re-acquires it.
pub struct Sampler<F: ClientFactory> {
    settings: SamplerSettings,
    options: QueryOptions,
    format: Arc<DiagnosticsFormat>,
    record_duration: bool,
    cache: Arc<ClientCache<F>>,
    container: Option<Arc<dyn QueryContainer>>,
    user: usize,
    iteration: u64,
}

impl<F: ClientFactory> Sampler<F> {
    pub fn new(cache: Arc<ClientCache<F>>, format: Arc<DiagnosticsFormat>) -> Self {
        Self {
            settings: SamplerSettings::default(),
            options: QueryOptions::default(),
            format,
            record_duration: false,
            cache,
            container: None,
            user: 0,
            iteration: 0,
        }
    }

    pub fn set_endpoint(&mut self, endpoint: impl Into<String>) {
        let endpoint = endpoint.into();
        if endpoint != self.settings.endpoint {
            self.container = None;
        }
        self.settings.endpoint = endpoint;
    }

    pub fn set_credential(&mut self, credential: Credential) {
        if credential != self.settings.credential {
            self.container = None;
        }
        self.settings.credential = credential;
    }

    pub fn set_database(&mut self, database: impl Into<String>) {
        let database = database.into();
        if database != self.settings.database {
            self.container = None;
        }
        self.settings.database = database;
    }

    pub fn set_container(&mut self, container: impl Into<String>) {
        let container = container.into();
        if container != self.settings.container {
            self.container = None;
        }
        self.settings.container = container;
    }

    pub fn set_partition_key_path(&mut self, path: impl Into<String>) {
        self.settings.partition_key_path = path.into();
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.settings.query = query.into();
    }

    pub fn set_run_id(&mut self, run_id: impl Into<String>) {
        self.settings.run_id = run_id.into();
    }

    pub fn set_query_type(&mut self, query_type: impl Into<String>) {
        self.settings.query_type = query_type.into();
    }

    pub fn set_query_options(&mut self, options: QueryOptions) {
        self.options = options;
    }

    /// Force `Duration` into every record, regardless of log level.
    pub fn set_record_duration(&mut self, enabled: bool) {
        self.record_duration = enabled;
    }

    /// Tag results with the virtual user running this sampler.
    pub fn set_user(&mut self, user: usize) {
        self.user = user;
    }

    pub fn test_started(&self) {
        tracing::info!(
            endpoint = %self.settings.endpoint,
            database = %self.settings.database,
            container = %self.settings.container,
            partition_key_path = %self.settings.partition_key_path,
            format = ?self.format.version(),
            "test started"
        );
    }

    /// Close the shared client; the next sample reconnects.
    pub fn test_ended(&mut self) {
        self.container = None;
        self.cache.release();
        tracing::info!("test ended");
    }

    /// Execute the query once and report the outcome.
    pub fn sample(&mut self) -> SampleResult {
        self.iteration += 1;
        let started_at = Utc::now();
        let start = Instant::now();

        let outcome = self.execute();
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let mut result = SampleResult {
            label: SAMPLE_LABEL.to_string(),
            success: false,
            response_code: String::new(),
            response_message: String::new(),
            data_type: String::new(),
            data_encoding: String::new(),
            sampler_data: String::new(),
            response_data: String::new(),
            started_at,
            elapsed_ms,
            user: self.user,
            iteration: self.iteration,
        };

        match outcome {
            Ok(json) => {
                result.success = true;
                result.response_code = RESPONSE_CODE_OK.to_string();
                result.response_message = "OK".to_string();
                result.data_type = DATA_TYPE_TEXT.to_string();
                result.data_encoding = DATA_ENCODING.to_string();
                result.sampler_data = json.clone();
                result.response_data = json;
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    user = self.user,
                    iteration = self.iteration,
                    "query failed"
                );
                result.response_code = RESPONSE_CODE_FAILED.to_string();
                result.response_message = e.to_string();
            }
        }
        result
    }

    fn execute(&mut self) -> Result<String, QueryError> {
        let container = self.connect_if_necessary()?;
        let pages = container.query_pages(&self.settings.query, &self.options)?;

        let record_duration = self.record_duration || tracing::enabled!(tracing::Level::DEBUG);
        let record = Aggregator::new(&self.format)
            .record_duration(record_duration)
            .aggregate(pages, &self.settings.metadata())?;

        if let Some(duration) = record.get(crate::aggregate::DURATION_KEY) {
            tracing::debug!(duration_ms = duration, "response time");
        }
        Ok(record.to_json())
    }

    fn connect_if_necessary(&mut self) -> Result<Arc<dyn QueryContainer>, QueryError> {
        if let Some(container) = &self.container {
            return Ok(Arc::clone(container));
        }
        let client = self
            .cache
            .acquire(&self.settings.endpoint, &self.settings.credential)?;
        let container = client.container(&self.settings.database, &self.settings.container)?;
        self.container = Some(Arc::clone(&container));
        Ok(container)
    }
}
