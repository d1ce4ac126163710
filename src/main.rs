mod aggregate;
mod config;
mod dispatcher;
mod distribution;
mod executor;
mod selector;
mod sink;
mod transport;

use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::runtime::Runtime;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use aggregate::summarize;
use config::{load_config, load_url_pool, resolve, Cli, FileConfig};
use sink::{ArrowSink, RecordSink, TsvLogSink};
use transport::HttpTransport;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let file = match &cli.config {
        Some(path) => load_config(path)?,
        None => FileConfig::default(),
    };
    let settings = resolve(&cli, file)?;
    let urls = load_url_pool(&settings.url_file, settings.num_urls)?;
    info!("loaded {} urls from {}", urls.len(), settings.url_file.display());

    // validate before the log file is truncated
    dispatcher::check(&urls, &settings.run)?;

    let rt = Runtime::new()?;
    let transport = Arc::new(HttpTransport::new(&settings.http)?);
    let mut sinks: Vec<Box<dyn RecordSink>> =
        vec![Box::new(TsvLogSink::create(&settings.log_file)?)];
    if let Some(path) = &settings.arrow_output {
        sinks.push(Box::new(ArrowSink::new(path)));
    }

    let (report, mut sinks) =
        rt.block_on(dispatcher::run(&urls, &settings.run, transport, sinks))?;

    println!("Traffic generation completed.");
    let summary = match summarize(&report.records) {
        Ok(s) => {
            println!(
                "Requests: {} ({} ok, {} failed)",
                s.requests, s.succeeded, s.failed
            );
            println!(
                "Total RTT: {:.2} ms, Total Throughput: {:.2} bytes/ms",
                s.total_rtt_ms, s.total_throughput
            );
            println!(
                "Average RTT: {:.2} ms, Average Throughput: {:.2} bytes/ms",
                s.avg_rtt_ms, s.avg_throughput
            );
            Some(s)
        }
        Err(e) => {
            warn!("no summary: {}", e);
            println!("No summary available: {}", e);
            None
        }
    };
    println!(
        "Launch phase: {:.3}s, total: {:.3}s",
        report.launch_elapsed.as_secs_f64(),
        report.total_elapsed.as_secs_f64()
    );

    sinks.finish(summary.as_ref())?;
    Ok(())
}
