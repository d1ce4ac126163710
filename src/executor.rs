use std::fmt;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use tracing::{info, warn};

use crate::transport::Transport;

/// RTTs below this are degenerate; throughput is computed against it instead.
pub const MIN_RTT_MS: f64 = 0.001;

#[derive(Debug, Clone, PartialEq)]
pub enum RequestStatus {
    Http(u16),
    Failed(String),
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestStatus::Http(code) => write!(f, "{}", code),
            RequestStatus::Failed(reason) => write!(f, "Failed: {}", reason),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MeasurementRecord {
    pub url: String,
    /// Epoch milliseconds.
    pub start_ms: i64,
    pub end_ms: i64,
    pub rtt_ms: f64,
    pub status: RequestStatus,
    pub body_bytes: u64,
    /// Bytes per millisecond.
    pub throughput: f64,
}

impl MeasurementRecord {
    pub fn is_failure(&self) -> bool {
        matches!(self.status, RequestStatus::Failed(_))
    }
}

pub fn throughput(body_bytes: u64, rtt_ms: f64) -> f64 {
    body_bytes as f64 / rtt_ms.max(MIN_RTT_MS)
}

/// Performs one GET and measures it. Transport failures become a
/// failure-marked record, never an error.
pub async fn execute(transport: &dyn Transport, url: &str) -> MeasurementRecord {
    let start_ms = now_millis();
    let started = Instant::now();
    let outcome = transport.get(url).await;
    let rtt_ms = started.elapsed().as_secs_f64() * 1000.0;
    let end_ms = now_millis();

    match outcome {
        Ok(resp) => {
            let tput = throughput(resp.body_bytes, rtt_ms);
            info!(
                "{} -> {} rtt={:.3}ms size={}B throughput={:.2}B/ms",
                url, resp.status, rtt_ms, resp.body_bytes, tput
            );
            MeasurementRecord {
                url: url.to_string(),
                start_ms,
                end_ms,
                rtt_ms,
                status: RequestStatus::Http(resp.status),
                body_bytes: resp.body_bytes,
                throughput: tput,
            }
        }
        Err(e) => {
            warn!("{} failed after {:.3}ms: {}", url, rtt_ms, e);
            MeasurementRecord {
                url: url.to_string(),
                start_ms,
                end_ms,
                rtt_ms,
                status: RequestStatus::Failed(e.to_string()),
                body_bytes: 0,
                throughput: 0.0,
            }
        }
    }
}

fn now_millis() -> i64 {
    let d = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default();
    d.as_millis() as i64
}
