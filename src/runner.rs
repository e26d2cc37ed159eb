/// Load run: drive concurrent virtual users, each looping over samples,
/// and stream every result to a JSON-lines file.
///
/// Samples are synchronous, so each user runs on the blocking pool. Results
/// flow back over a channel to a single writer, which also keeps the
/// running summary.
use crate::client::{ClientCache, ClientFactory};
use crate::config::SamplerConfig;
use crate::error::RunError;
use crate::sampler::{SampleResult, Sampler};
use serde::Serialize;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;

const RESULT_CHANNEL_CAPACITY: usize = 256;
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Totals for a finished run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunSummary {
    pub samples: u64,
    pub failures: u64,
    pub min_ms: Option<u64>,
    pub max_ms: Option<u64>,
    pub mean_ms: Option<f64>,
    #[serde(skip)]
    total_ms: u64,
}

impl RunSummary {
    fn record(&mut self, result: &SampleResult) {
        self.samples += 1;
        if !result.success {
            self.failures += 1;
        }
        self.total_ms += result.elapsed_ms;
        self.min_ms = Some(self.min_ms.map_or(result.elapsed_ms, |m| m.min(result.elapsed_ms)));
        self.max_ms = Some(self.max_ms.map_or(result.elapsed_ms, |m| m.max(result.elapsed_ms)));
        self.mean_ms = Some(self.total_ms as f64 / self.samples as f64);
    }
}

/// Build the sampler for one virtual user from the run config.
fn build_sampler<F: ClientFactory>(
    config: &SamplerConfig,
    cache: &Arc<ClientCache<F>>,
    format: &Arc<crate::format::DiagnosticsFormat>,
    user: usize,
) -> Sampler<F> {
    let mut sampler = Sampler::new(Arc::clone(cache), Arc::clone(format));
    sampler.set_endpoint(config.connection.endpoint.clone());
    sampler.set_credential(config.connection.key.clone());
    sampler.set_database(config.connection.database.clone());
    sampler.set_container(config.connection.container.clone());
    sampler.set_partition_key_path(config.connection.partition_key_path.clone());
    sampler.set_query(config.query.text.clone());
    sampler.set_run_id(config.query.run_id.clone());
    sampler.set_query_type(config.query.query_type.clone());
    sampler.set_query_options(config.options.clone());
    sampler.set_record_duration(config.diagnostics.record_duration);
    sampler.set_user(user);
    sampler
}

/// Run the configured load and return the summary.
///
/// `stop` is checked between samples and during ramp-up; a set flag lets
/// every user finish its current sample and exit. The shared client is
/// released before returning, whether or not the results were written.
pub async fn run<F>(
    config: &SamplerConfig,
    factory: F,
    stop: Arc<AtomicBool>,
) -> Result<RunSummary, RunError>
where
    F: ClientFactory + 'static,
{
    config.validate()?;

    let output = &config.output.path;
    let mut file = open_output(output).await?;

    let cache = Arc::new(ClientCache::new(factory));
    let format = Arc::new(config.diagnostics_format());
    let mut samplers: Vec<Sampler<F>> = (0..config.load.threads)
        .map(|user| build_sampler(config, &cache, &format, user))
        .collect();

    if let Some(first) = samplers.first() {
        first.test_started();
    }
    tracing::info!(
        threads = config.load.threads,
        iterations = config.load.iterations,
        run_id = %config.query.run_id,
        "starting run"
    );

    let (tx, rx) = mpsc::channel::<SampleResult>(RESULT_CHANNEL_CAPACITY);
    let mut users = Vec::with_capacity(samplers.len());
    let iterations = config.load.iterations;
    let ramp_up = Duration::from_millis(config.load.ramp_up_ms);

    for (user, mut sampler) in samplers.drain(..).enumerate() {
        let tx = tx.clone();
        let stop = Arc::clone(&stop);
        users.push(tokio::task::spawn_blocking(move || {
            if !wait_for_ramp_up(ramp_up * user as u32, &stop) {
                tracing::info!(user, "stop requested during ramp-up, virtual user exiting");
                return sampler;
            }
            for _ in 0..iterations {
                if stop.load(Ordering::SeqCst) {
                    tracing::info!(user, "stop requested, virtual user exiting");
                    break;
                }
                let result = sampler.sample();
                if tx.blocking_send(result).is_err() {
                    break;
                }
            }
            sampler
        }));
    }
    drop(tx);

    let mut summary = RunSummary::default();
    let written = write_results(rx, &mut file, output, &mut summary).await;

    // Users see a closed channel once the writer gives up, so they all exit.
    let mut finished = Vec::with_capacity(users.len());
    let mut join_error = None;
    for user in users {
        match user.await {
            Ok(sampler) => finished.push(sampler),
            Err(e) => {
                join_error.get_or_insert(e);
            }
        }
    }
    match finished.first_mut() {
        Some(first) => first.test_ended(),
        None => cache.release(),
    }
    written?;
    if let Some(e) = join_error {
        return Err(e.into());
    }

    tracing::info!(
        samples = summary.samples,
        failures = summary.failures,
        mean_ms = summary.mean_ms.unwrap_or(0.0),
        output = %output.display(),
        "run complete"
    );
    Ok(summary)
}

/// Drain results into the JSON-lines file until every user has hung up.
async fn write_results(
    mut rx: mpsc::Receiver<SampleResult>,
    file: &mut tokio::fs::File,
    output: &Path,
    summary: &mut RunSummary,
) -> Result<(), RunError> {
    let to_err = |source| RunError::Output {
        path: output.to_path_buf(),
        source,
    };
    while let Some(result) = rx.recv().await {
        summary.record(&result);
        let mut line = serde_json::to_string(&result)?;
        line.push('\n');
        file.write_all(line.as_bytes()).await.map_err(to_err)?;
        tracing::debug!(
            user = result.user,
            iteration = result.iteration,
            success = result.success,
            elapsed_ms = result.elapsed_ms,
            "sample recorded"
        );
    }
    file.flush().await.map_err(to_err)
}

/// Sleep out a user's ramp-up delay. Returns false if `stop` was set first.
fn wait_for_ramp_up(delay: Duration, stop: &AtomicBool) -> bool {
    let deadline = std::time::Instant::now() + delay;
    loop {
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        let now = std::time::Instant::now();
        if now >= deadline {
            return true;
        }
        std::thread::sleep(STOP_POLL_INTERVAL.min(deadline - now));
    }
}

async fn open_output(path: &Path) -> Result<tokio::fs::File, RunError> {
    let to_err = |source| RunError::Output {
        path: path.to_path_buf(),
        source,
    };
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
    }
    tokio::fs::File::create(path).await.map_err(to_err)
}
