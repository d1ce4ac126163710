//! Paced, concurrent dispatch of one GET per scheduled request.
//!
//! Launch `i + 1` starts one pacing interval after launch `i`, whatever the
//! state of earlier requests, so the number in flight is unbounded. Each
//! request task sends its record over a channel to a single collector task,
//! which owns both the record list and the sink; appends are therefore
//! serialized without a lock. The collector runs on the blocking pool since
//! sinks write files synchronously.

use std::sync::Arc;
use std::time::{Duration, Instant};

use governor::{Quota, RateLimiter};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinSet};
use tracing::{debug, error, info, warn};

use crate::config::RunConfig;
use crate::distribution::{zipf_mandelbrot, DistributionError};
use crate::executor::{execute, MeasurementRecord};
use crate::selector::{Selector, SelectorError};
use crate::sink::RecordSink;
use crate::transport::Transport;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("url pool is empty")]
    EmptyPool,
    #[error("number of requests must be at least 1")]
    NoRequests,
    #[error("requests per second must be finite, > 0 and give a representable interval, got {0}")]
    InvalidRate(f64),
    #[error("{requests} requests exceed the pool of {pool} urls; each url is requested at most once")]
    PoolTooSmall { requests: usize, pool: usize },
    #[error(transparent)]
    Distribution(#[from] DistributionError),
    #[error(transparent)]
    Selector(#[from] SelectorError),
    #[error("record collector stopped: {0}")]
    Collector(#[from] JoinError),
}

#[derive(Debug)]
pub struct RunReport {
    /// Completion order.
    pub records: Vec<MeasurementRecord>,
    /// First launch to last launch.
    pub launch_elapsed: Duration,
    /// First launch to the last request finishing.
    pub total_elapsed: Duration,
}

/// Rates above 1e9 req/s would round the period down to zero.
const MIN_INTERVAL: Duration = Duration::from_nanos(1);

fn pacing_interval(rps: f64) -> Result<Duration, DispatchError> {
    if !rps.is_finite() || rps <= 0.0 {
        return Err(DispatchError::InvalidRate(rps));
    }
    let interval =
        Duration::try_from_secs_f64(1.0 / rps).map_err(|_| DispatchError::InvalidRate(rps))?;
    Ok(interval.max(MIN_INTERVAL))
}

fn prepare(urls: &[String], cfg: &RunConfig) -> Result<(Vec<f64>, Duration), DispatchError> {
    if urls.is_empty() {
        return Err(DispatchError::EmptyPool);
    }
    if cfg.num_requests == 0 {
        return Err(DispatchError::NoRequests);
    }
    let interval = pacing_interval(cfg.requests_per_second)?;
    if cfg.num_requests > urls.len() {
        return Err(DispatchError::PoolTooSmall {
            requests: cfg.num_requests,
            pool: urls.len(),
        });
    }
    let weights = zipf_mandelbrot(urls.len(), cfg.q, cfg.s)?;
    Ok((weights, interval))
}

/// Runs every setup check `run` performs, without sending anything.
pub fn check(urls: &[String], cfg: &RunConfig) -> Result<(), DispatchError> {
    prepare(urls, cfg).map(|_| ())
}

pub async fn run<S>(
    urls: &[String],
    cfg: &RunConfig,
    transport: Arc<dyn Transport>,
    mut sink: S,
) -> Result<(RunReport, S), DispatchError>
where
    S: RecordSink + 'static,
{
    let (weights, interval) = prepare(urls, cfg)?;
    let mut selector = Selector::new(weights);
    let quota = Quota::with_period(interval)
        .ok_or(DispatchError::InvalidRate(cfg.requests_per_second))?;
    let limiter = RateLimiter::direct(quota);

    let (tx, mut rx) = mpsc::unbounded_channel::<MeasurementRecord>();
    let collector = tokio::task::spawn_blocking(move || {
        let mut records = Vec::new();
        while let Some(record) = rx.blocking_recv() {
            if let Err(e) = sink.record(&record) {
                error!("failed to log record for {}: {:#}", record.url, e);
            }
            records.push(record);
        }
        (records, sink)
    });

    info!(
        "dispatching {} requests over {} urls at {} req/s (q={}, s={})",
        cfg.num_requests,
        urls.len(),
        cfg.requests_per_second,
        cfg.q,
        cfg.s
    );

    let started = Instant::now();
    let mut inflight = JoinSet::new();
    for i in 0..cfg.num_requests {
        limiter.until_ready().await;
        let idx = selector.next_index()?;
        let url = urls[idx].clone();
        debug!(
            "launch #{} -> [{}] {} ({} urls unused)",
            i,
            idx,
            url,
            selector.remaining()
        );

        let transport = Arc::clone(&transport);
        let tx = tx.clone();
        inflight.spawn(async move {
            let record = execute(transport.as_ref(), &url).await;
            // the collector outlives every sender
            let _ = tx.send(record);
        });
    }
    let launch_elapsed = started.elapsed();
    drop(tx);

    while let Some(res) = inflight.join_next().await {
        if let Err(e) = res {
            warn!("request task did not complete: {}", e);
        }
    }
    let total_elapsed = started.elapsed();

    let (records, sink) = collector.await?;
    if records.len() != cfg.num_requests {
        warn!(
            "{} requests launched but {} records collected",
            cfg.num_requests,
            records.len()
        );
    }

    Ok((
        RunReport {
            records,
            launch_elapsed,
            total_elapsed,
        },
        sink,
    ))
}
