/// Result aggregation: fold every page's diagnostics into one record and
/// stamp it with the run metadata.
use crate::error::QueryError;
use crate::format::DiagnosticsFormat;
use crate::parser::{self, DiagnosticsMap};
use serde::Serialize;
use std::time::Instant;

pub const QUERY_KEY: &str = "query";
pub const RUN_ID_KEY: &str = "runID";
pub const QUERY_TYPE_KEY: &str = "queryType";
pub const DURATION_KEY: &str = "Duration";

/// Caller-supplied fields attached to every result.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunMetadata {
    pub query: String,
    pub run_id: String,
    pub query_type: String,
}

/// The merged diagnostics of one sample, serialized as a flat JSON object.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ResultRecord {
    entries: DiagnosticsMap,
}

impl ResultRecord {
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[cfg(test)]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json(&self) -> String {
        // A map of strings always serializes.
        serde_json::to_string(&self.entries).unwrap_or_default()
    }
}

/// Folds a page sequence into a `ResultRecord`.
pub struct Aggregator<'a> {
    format: &'a DiagnosticsFormat,
    record_duration: bool,
}

impl<'a> Aggregator<'a> {
    pub fn new(format: &'a DiagnosticsFormat) -> Self {
        Self {
            format,
            record_duration: false,
        }
    }

    /// Record the page loop's wall-clock time under `Duration`.
    pub fn record_duration(mut self, enabled: bool) -> Self {
        self.record_duration = enabled;
        self
    }

    /// Consume every page in order and build the record.
    ///
    /// Stops at the first page error and returns it; no partial record is
    /// produced. Metadata keys are written last and win over parsed entries.
    pub fn aggregate<I>(&self, pages: I, metadata: &RunMetadata) -> Result<ResultRecord, QueryError>
    where
        I: IntoIterator<Item = Result<String, QueryError>>,
    {
        let mut entries = DiagnosticsMap::new();
        let start = Instant::now();
        let mut page_count = 0usize;

        for page in pages {
            let block = page?;
            parser::parse_into(&block, self.format, &mut entries);
            page_count += 1;
        }

        let elapsed_ms = start.elapsed().as_millis() as u64;
        tracing::debug!(pages = page_count, elapsed_ms, "diagnostics pages consumed");

        if self.record_duration {
            entries.insert(DURATION_KEY.to_string(), elapsed_ms.to_string());
        }

        entries.insert(QUERY_KEY.to_string(), metadata.query.clone());
        entries.insert(RUN_ID_KEY.to_string(), metadata.run_id.clone());
        entries.insert(QUERY_TYPE_KEY.to_string(), metadata.query_type.clone());

        Ok(ResultRecord { entries })
    }
}
