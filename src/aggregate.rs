use thiserror::Error;

use crate::executor::MeasurementRecord;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AggregateError {
    #[error("no records to summarize")]
    Empty,
    #[error("all {failed} requests failed; no RTT or throughput to average")]
    NoSuccessful { failed: usize },
}

/// RTT and throughput figures cover successful records only; failures are
/// counted but their timings are not meaningful.
#[derive(Debug, Clone, PartialEq)]
pub struct Summary {
    pub requests: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub total_rtt_ms: f64,
    pub total_throughput: f64,
    pub avg_rtt_ms: f64,
    pub avg_throughput: f64,
}

pub fn summarize(records: &[MeasurementRecord]) -> Result<Summary, AggregateError> {
    if records.is_empty() {
        return Err(AggregateError::Empty);
    }

    let (mut total_rtt_ms, mut total_throughput, mut succeeded) = (0.0, 0.0, 0usize);
    for r in records.iter().filter(|r| !r.is_failure()) {
        total_rtt_ms += r.rtt_ms;
        total_throughput += r.throughput;
        succeeded += 1;
    }
    let failed = records.len() - succeeded;
    if succeeded == 0 {
        return Err(AggregateError::NoSuccessful { failed });
    }

    Ok(Summary {
        requests: records.len(),
        succeeded,
        failed,
        total_rtt_ms,
        total_throughput,
        avg_rtt_ms: total_rtt_ms / succeeded as f64,
        avg_throughput: total_throughput / succeeded as f64,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::RequestStatus;

    fn record(rtt_ms: f64, body_bytes: u64, status: RequestStatus) -> MeasurementRecord {
        let throughput = if matches!(status, RequestStatus::Failed(_)) {
            0.0
        } else {
            body_bytes as f64 / rtt_ms
        };
        MeasurementRecord {
            url: "http://x/".into(),
            start_ms: 0,
            end_ms: rtt_ms as i64,
            rtt_ms,
            status,
            body_bytes,
            throughput,
        }
    }

    #[test]
    fn test_totals_and_averages() {
        let records = vec![
            record(10.0, 1000, RequestStatus::Http(200)),
            record(30.0, 600, RequestStatus::Http(404)),
        ];
        let s = summarize(&records).unwrap();
        assert_eq!(s.requests, 2);
        assert_eq!(s.succeeded, 2);
        assert_eq!(s.failed, 0);
        assert!((s.total_rtt_ms - 40.0).abs() < 1e-9);
        assert!((s.total_throughput - 120.0).abs() < 1e-9);
        assert!((s.avg_rtt_ms - 20.0).abs() < 1e-9);
        assert!((s.avg_throughput - 60.0).abs() < 1e-9);
    }

    #[test]
    fn test_failures_excluded_from_averages() {
        let records = vec![
            record(10.0, 1000, RequestStatus::Http(200)),
            record(5000.0, 0, RequestStatus::Failed("timed out".into())),
        ];
        let s = summarize(&records).unwrap();
        assert_eq!(s.requests, 2);
        assert_eq!(s.failed, 1);
        assert!((s.avg_rtt_ms - 10.0).abs() < 1e-9);
        assert!((s.avg_throughput - 100.0).abs() < 1e-9);
    }

    #[test]
    fn test_empty_is_error() {
        assert_eq!(summarize(&[]), Err(AggregateError::Empty));
    }

    #[test]
    fn test_all_failed_is_error() {
        let records = vec![
            record(1.0, 0, RequestStatus::Failed("refused".into())),
            record(2.0, 0, RequestStatus::Failed("refused".into())),
        ];
        assert_eq!(
            summarize(&records),
            Err(AggregateError::NoSuccessful { failed: 2 })
        );
    }
}
