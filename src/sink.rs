//! Per-request record sinks.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arrow::array::{
    ArrayRef, Float64Builder, StringBuilder, TimestampMillisecondBuilder, UInt16Builder,
    UInt64Builder,
};
use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use arrow::record_batch::RecordBatch;
use arrow_ipc::writer::FileWriter;
use tracing::info;

use crate::aggregate::Summary;
use crate::executor::{MeasurementRecord, RequestStatus};

/// Receives each record once, as it completes, then the run summary.
pub trait RecordSink: Send {
    fn record(&mut self, record: &MeasurementRecord) -> Result<()>;
    fn finish(&mut self, summary: Option<&Summary>) -> Result<()>;
}

/// Every sink sees every call; the first error is returned once all have run.
impl RecordSink for Vec<Box<dyn RecordSink>> {
    fn record(&mut self, record: &MeasurementRecord) -> Result<()> {
        let mut first = None;
        for sink in self.iter_mut() {
            if let Err(e) = sink.record(record) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }

    fn finish(&mut self, summary: Option<&Summary>) -> Result<()> {
        let mut first = None;
        for sink in self.iter_mut() {
            if let Err(e) = sink.finish(summary) {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

const TSV_HEADER: [&str; 7] = [
    "URL",
    "Start Time",
    "End Time",
    "RTT (ms)",
    "Status Code",
    "Content Size (bytes)",
    "Throughput (bytes/ms)",
];

/// Tab-separated request log, one line per record, with `Total` and
/// `Average` rows appended at the end of the run.
pub struct TsvLogSink {
    path: PathBuf,
    out: BufWriter<File>,
}

impl TsvLogSink {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("creating request log {}", path.display()))?;
        let mut out = BufWriter::new(file);
        writeln!(out, "{}", TSV_HEADER.join("\t"))?;
        out.flush()?;
        Ok(Self {
            path: path.to_path_buf(),
            out,
        })
    }
}

impl RecordSink for TsvLogSink {
    fn record(&mut self, r: &MeasurementRecord) -> Result<()> {
        // keep one record per line
        let status = r.status.to_string().replace(['\t', '\r', '\n'], " ");
        writeln!(
            self.out,
            "{}\t{}\t{}\t{:.3}\t{}\t{}\t{:.3}",
            r.url, r.start_ms, r.end_ms, r.rtt_ms, status, r.body_bytes, r.throughput
        )?;
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self, summary: Option<&Summary>) -> Result<()> {
        if let Some(s) = summary {
            writeln!(
                self.out,
                "Total\t\t\t{:.3}\t\t\t{:.3}",
                s.total_rtt_ms, s.total_throughput
            )?;
            writeln!(
                self.out,
                "Average\t\t\t{:.3}\t\t\t{:.3}",
                s.avg_rtt_ms, s.avg_throughput
            )?;
        }
        self.out
            .flush()
            .with_context(|| format!("flushing {}", self.path.display()))?;
        Ok(())
    }
}

/// Buffers every record and writes them as one Arrow IPC file on finish.
pub struct ArrowSink {
    path: PathBuf,
    records: Vec<MeasurementRecord>,
}

impl ArrowSink {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            records: Vec::new(),
        }
    }

    pub fn schema() -> Schema {
        Schema::new(vec![
            Field::new("url", DataType::Utf8, false),
            Field::new("start_ms", DataType::Timestamp(TimeUnit::Millisecond, None), false),
            Field::new("end_ms", DataType::Timestamp(TimeUnit::Millisecond, None), false),
            Field::new("rtt_ms", DataType::Float64, false),
            Field::new("status", DataType::UInt16, true),
            Field::new("error", DataType::Utf8, true),
            Field::new("body_bytes", DataType::UInt64, false),
            Field::new("throughput", DataType::Float64, false),
        ])
    }

    fn to_batch(&self, schema: Arc<Schema>) -> Result<RecordBatch> {
        let mut url = StringBuilder::new();
        let mut start = TimestampMillisecondBuilder::new();
        let mut end = TimestampMillisecondBuilder::new();
        let mut rtt = Float64Builder::new();
        let mut status = UInt16Builder::new();
        let mut error = StringBuilder::new();
        let mut size = UInt64Builder::new();
        let mut tput = Float64Builder::new();

        for r in &self.records {
            url.append_value(&r.url);
            start.append_value(r.start_ms);
            end.append_value(r.end_ms);
            rtt.append_value(r.rtt_ms);
            match &r.status {
                RequestStatus::Http(code) => {
                    status.append_value(*code);
                    error.append_null();
                }
                RequestStatus::Failed(reason) => {
                    status.append_null();
                    error.append_value(reason);
                }
            }
            size.append_value(r.body_bytes);
            tput.append_value(r.throughput);
        }

        let columns: Vec<ArrayRef> = vec![
            Arc::new(url.finish()),
            Arc::new(start.finish()),
            Arc::new(end.finish()),
            Arc::new(rtt.finish()),
            Arc::new(status.finish()),
            Arc::new(error.finish()),
            Arc::new(size.finish()),
            Arc::new(tput.finish()),
        ];
        Ok(RecordBatch::try_new(schema, columns)?)
    }
}

impl RecordSink for ArrowSink {
    fn record(&mut self, record: &MeasurementRecord) -> Result<()> {
        self.records.push(record.clone());
        Ok(())
    }

    fn finish(&mut self, _summary: Option<&Summary>) -> Result<()> {
        let schema = Arc::new(Self::schema());
        let batch = self.to_batch(schema.clone())?;

        let file = File::create(&self.path)
            .with_context(|| format!("creating arrow output {}", self.path.display()))?;
        let mut writer = FileWriter::try_new(file, &schema)?;
        writer.write(&batch)?;
        writer.finish()?;
        info!(
            "wrote {} records to {}",
            self.records.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Array, UInt16Array};
    use arrow_ipc::reader::FileReader;

    fn records() -> Vec<MeasurementRecord> {
        vec![
            MeasurementRecord {
                url: "http://a.test/".into(),
                start_ms: 1_700_000_000_000,
                end_ms: 1_700_000_000_020,
                rtt_ms: 20.0,
                status: RequestStatus::Http(200),
                body_bytes: 2000,
                throughput: 100.0,
            },
            MeasurementRecord {
                url: "http://b.test/".into(),
                start_ms: 1_700_000_000_100,
                end_ms: 1_700_000_000_105,
                rtt_ms: 5.0,
                status: RequestStatus::Failed("connection failed:\trefused\n".into()),
                body_bytes: 0,
                throughput: 0.0,
            },
        ]
    }

    #[test]
    fn test_tsv_log_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.log");
        let mut sink = TsvLogSink::create(&path).unwrap();
        for r in records() {
            sink.record(&r).unwrap();
        }
        let summary = crate::aggregate::summarize(&records()).unwrap();
        sink.finish(Some(&summary)).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 5);
        assert_eq!(lines[0], TSV_HEADER.join("\t"));
        assert_eq!(
            lines[1],
            "http://a.test/\t1700000000000\t1700000000020\t20.000\t200\t2000\t100.000"
        );
        let failed: Vec<&str> = lines[2].split('\t').collect();
        assert_eq!(failed.len(), 7);
        assert!(failed[4].starts_with("Failed: connection failed"));
        assert_eq!(failed[5], "0");
        assert_eq!(lines[3], "Total\t\t\t20.000\t\t\t100.000");
        assert_eq!(lines[4], "Average\t\t\t20.000\t\t\t100.000");
    }

    #[test]
    fn test_tsv_log_without_summary() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.log");
        let mut sink = TsvLogSink::create(&path).unwrap();
        sink.finish(None).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert_eq!(content.lines().count(), 1);
    }

    #[test]
    fn test_arrow_export() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("requests.arrow");
        let mut sink = ArrowSink::new(&path);
        for r in records() {
            sink.record(&r).unwrap();
        }
        sink.finish(None).unwrap();

        let reader = FileReader::try_new(File::open(&path).unwrap(), None).unwrap();
        assert_eq!(reader.schema().as_ref(), &ArrowSink::schema());
        let batches: Vec<RecordBatch> = reader.map(|b| b.unwrap()).collect();
        assert_eq!(batches.len(), 1);
        let batch = &batches[0];
        assert_eq!(batch.num_rows(), 2);

        let status = batch
            .column(4)
            .as_any()
            .downcast_ref::<UInt16Array>()
            .unwrap();
        assert_eq!(status.value(0), 200);
        assert!(status.is_null(1));
    }

    #[test]
    fn test_fan_out() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("requests.log");
        let arrow = dir.path().join("requests.arrow");
        let mut sinks: Vec<Box<dyn RecordSink>> = vec![
            Box::new(TsvLogSink::create(&log).unwrap()),
            Box::new(ArrowSink::new(&arrow)),
        ];
        for r in records() {
            sinks.record(&r).unwrap();
        }
        sinks.finish(None).unwrap();
        assert_eq!(std::fs::read_to_string(&log).unwrap().lines().count(), 3);
        assert!(arrow.exists());
    }

    struct BrokenSink;

    impl RecordSink for BrokenSink {
        fn record(&mut self, _record: &MeasurementRecord) -> Result<()> {
            anyhow::bail!("disk full")
        }

        fn finish(&mut self, _summary: Option<&Summary>) -> Result<()> {
            anyhow::bail!("disk full")
        }
    }

    #[test]
    fn test_fan_out_survives_failing_sink() {
        let dir = tempfile::tempdir().unwrap();
        let arrow = dir.path().join("requests.arrow");
        let mut sinks: Vec<Box<dyn RecordSink>> =
            vec![Box::new(BrokenSink), Box::new(ArrowSink::new(&arrow))];
        for r in records() {
            let err = sinks.record(&r).unwrap_err();
            assert_eq!(err.to_string(), "disk full");
        }
        assert!(sinks.finish(None).is_err());

        let reader = FileReader::try_new(File::open(&arrow).unwrap(), None).unwrap();
        let rows: usize = reader.map(|b| b.unwrap().num_rows()).sum();
        assert_eq!(rows, 2);
    }
}
