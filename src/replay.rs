/// Replay client: serves diagnostics recorded from earlier runs.
///
/// The endpoint is a directory. A container resolves to
/// `<endpoint>/<database>/<container>/` when that exists, otherwise to the
/// endpoint directory itself. Each `.diag` file is one page of diagnostics;
/// an `.err` file makes the query fail at that page with the file's
/// contents as the message. Pages are served in file name order and read
/// only when the stream advances.
use crate::client::{ClientFactory, Credential, DocumentClient, PageStream, QueryContainer, QueryOptions};
use crate::error::QueryError;
use std::path::{Path, PathBuf};
use std::sync::Arc;

pub const PAGE_EXTENSION: &str = "diag";
pub const ERROR_EXTENSION: &str = "err";

/// Status reported for injected `.err` pages.
const INJECTED_FAILURE_STATUS: u16 = 500;

pub struct ReplayFactory;

impl ReplayFactory {
    pub fn new() -> Self {
        ReplayFactory
    }
}

impl Default for ReplayFactory {
    fn default() -> Self {
        Self::new()
    }
}

impl ClientFactory for ReplayFactory {
    type Client = ReplayClient;

    fn connect(&self, endpoint: &str, _credential: &Credential) -> Result<ReplayClient, QueryError> {
        let root = PathBuf::from(endpoint);
        if !root.is_dir() {
            return Err(QueryError::Connect {
                endpoint: endpoint.to_string(),
                message: "replay endpoint is not a directory".into(),
            });
        }
        Ok(ReplayClient { root })
    }
}

pub struct ReplayClient {
    root: PathBuf,
}

impl DocumentClient for ReplayClient {
    fn container(
        &self,
        database: &str,
        container: &str,
    ) -> Result<Arc<dyn QueryContainer>, QueryError> {
        let nested = self.root.join(database).join(container);
        let dir = if !database.is_empty() && !container.is_empty() && nested.is_dir() {
            nested
        } else {
            self.root.clone()
        };
        tracing::debug!(dir = %dir.display(), "replay container resolved");
        Ok(Arc::new(ReplayContainer { dir }))
    }

    fn close(&self) {
        tracing::debug!(root = %self.root.display(), "replay client closed");
    }
}

struct ReplayContainer {
    dir: PathBuf,
}

impl QueryContainer for ReplayContainer {
    fn query_pages(&self, query: &str, options: &QueryOptions) -> Result<PageStream, QueryError> {
        tracing::debug!(
            query,
            page_size = options.page_size,
            max_degree_of_parallelism = options.max_degree_of_parallelism,
            "replaying query"
        );
        let files = list_pages(&self.dir)?;
        Ok(Box::new(files.into_iter().map(read_page)))
    }
}

/// Page files in the directory, sorted by name.
fn list_pages(dir: &Path) -> Result<Vec<PathBuf>, QueryError> {
    let pattern = dir.join("*");
    let pattern = pattern.to_string_lossy();
    let entries = glob::glob(&pattern).map_err(|e| QueryError::Connect {
        endpoint: dir.display().to_string(),
        message: format!("bad replay directory pattern: {e}"),
    })?;

    let mut files: Vec<PathBuf> = entries
        .filter_map(|entry| match entry {
            Ok(path) => Some(path),
            Err(e) => {
                tracing::warn!(error = %e, "skipping unreadable replay entry");
                None
            }
        })
        .filter(|path| {
            path.is_file()
                && matches!(
                    path.extension().and_then(|e| e.to_str()),
                    Some(PAGE_EXTENSION) | Some(ERROR_EXTENSION)
                )
        })
        .collect();
    files.sort();
    Ok(files)
}

fn read_page(path: PathBuf) -> Result<String, QueryError> {
    let contents = match std::fs::read_to_string(&path) {
        Ok(c) => c,
        Err(source) => return Err(QueryError::Source { path, source }),
    };

    if path.extension().and_then(|e| e.to_str()) == Some(ERROR_EXTENSION) {
        return Err(QueryError::Rejected {
            status: INJECTED_FAILURE_STATUS,
            message: contents.trim().to_string(),
        });
    }
    Ok(contents)
}
