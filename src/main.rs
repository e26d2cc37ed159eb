mod aggregate;
mod client;
mod config;
mod error;
mod format;
mod parser;
mod replay;
mod runner;
mod sampler;

use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

/// Run a document database query under load and record the per-page query
/// diagnostics (request charge, document counts, timings) of every sample.
#[derive(Parser, Debug)]
#[command(name = "query-sampler", version, about)]
pub struct Cli {
    /// Config file path
    #[arg(short, long, default_value = "sampler.toml")]
    config: PathBuf,

    /// Endpoint (overrides config). The replay client expects a directory.
    #[arg(long)]
    endpoint: Option<String>,

    /// Query text (overrides config)
    #[arg(long)]
    query: Option<String>,

    /// Run identifier attached to every result (overrides config)
    #[arg(long)]
    run_id: Option<String>,

    /// Query type label attached to every result (overrides config)
    #[arg(long)]
    query_type: Option<String>,

    /// Concurrent virtual users (overrides config)
    #[arg(long)]
    threads: Option<usize>,

    /// Samples per virtual user (overrides config)
    #[arg(long)]
    iterations: Option<u64>,

    /// Results file, JSON lines (overrides config)
    #[arg(short, long)]
    output: Option<PathBuf>,

    /// Validate config and print resolved settings, don't run
    #[arg(long)]
    dry_run: bool,

    /// Debug logging; also records `Duration` in every result
    #[arg(short, long)]
    verbose: bool,

    /// Only warnings and errors
    #[arg(short, long)]
    quiet: bool,
}

impl Cli {
    fn apply_overrides(&self, cfg: &mut config::SamplerConfig) {
        if let Some(endpoint) = &self.endpoint {
            cfg.connection.endpoint = endpoint.clone();
        }
        if let Some(query) = &self.query {
            cfg.query.text = query.clone();
        }
        if let Some(run_id) = &self.run_id {
            cfg.query.run_id = run_id.clone();
        }
        if let Some(query_type) = &self.query_type {
            cfg.query.query_type = query_type.clone();
        }
        if let Some(threads) = self.threads {
            cfg.load.threads = threads;
        }
        if let Some(iterations) = self.iterations {
            cfg.load.iterations = iterations;
        }
        if let Some(output) = &self.output {
            cfg.output.path = output.clone();
        }
    }

    fn log_level(&self) -> &'static str {
        if self.verbose {
            "debug"
        } else if self.quiet {
            "warn"
        } else {
            "info"
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(cli.log_level()));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    tracing::debug!(?cli, "parsed CLI arguments");

    let mut cfg = match config::SamplerConfig::load(&cli.config) {
        Ok(cfg) => cfg,
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut cfg);

    if cli.dry_run {
        if let Err(e) = cfg.validate() {
            tracing::error!("{e}");
            std::process::exit(1);
        }
        println!("query-sampler v{}", env!("CARGO_PKG_VERSION"));
        println!("Config file: {}", cli.config.display());
        println!("{cfg:#?}");
        println!("Dry run: config validated, not running.");
        return;
    }

    let stop = Arc::new(AtomicBool::new(false));
    {
        let stop = Arc::clone(&stop);
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, finishing current samples");
                stop.store(true, Ordering::SeqCst);
            }
        });
    }

    match runner::run(&cfg, replay::ReplayFactory::new(), stop).await {
        Ok(summary) => {
            println!(
                "{} samples, {} failed, mean {:.1} ms -> {}",
                summary.samples,
                summary.failures,
                summary.mean_ms.unwrap_or(0.0),
                cfg.output.path.display()
            );
        }
        Err(e) => {
            tracing::error!("{e}");
            std::process::exit(1);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_overrides_config() {
        let cli = Cli::parse_from([
            "query-sampler",
            "--endpoint",
            "recordings",
            "--query",
            "SELECT * FROM c",
            "--run-id",
            "r1",
            "--query-type",
            "scan",
            "--threads",
            "4",
            "--iterations",
            "10",
            "-o",
            "out.jsonl",
        ]);
        let mut cfg = config::SamplerConfig::default();
        cli.apply_overrides(&mut cfg);
        assert_eq!(cfg.connection.endpoint, "recordings");
        assert_eq!(cfg.query.text, "SELECT * FROM c");
        assert_eq!(cfg.query.run_id, "r1");
        assert_eq!(cfg.query.query_type, "scan");
        assert_eq!(cfg.load.threads, 4);
        assert_eq!(cfg.load.iterations, 10);
        assert_eq!(cfg.output.path, PathBuf::from("out.jsonl"));
    }

    #[test]
    fn no_overrides_keeps_config() {
        let cli = Cli::parse_from(["query-sampler"]);
        let mut cfg = config::SamplerConfig::default();
        cfg.load.threads = 7;
        cli.apply_overrides(&mut cfg);
        assert_eq!(cfg.load.threads, 7);
        assert_eq!(cli.config, PathBuf::from("sampler.toml"));
    }

    #[test]
    fn log_level_follows_flags() {
        assert_eq!(Cli::parse_from(["query-sampler", "-v"]).log_level(), "debug");
        assert_eq!(Cli::parse_from(["query-sampler", "-q"]).log_level(), "warn");
        assert_eq!(Cli::parse_from(["query-sampler"]).log_level(), "info");
    }
}
