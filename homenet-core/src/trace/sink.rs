//! Measurement sinks attached to the trace hub.

use std::cell::{Cell, RefCell};
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use super::record::TraceRecord;
use crate::SimError;

/// Consumer of trace records.
///
/// Sinks are invoked synchronously on the simulation thread, so `record`
/// must not block on anything but local I/O.
pub trait TraceSink {
    /// Consumes one record.
    fn record(&self, record: &TraceRecord);

    /// Pushes buffered output to its destination.
    ///
    /// # Errors
    /// Returns the underlying I/O error if buffered data cannot be written.
    fn flush(&self) -> io::Result<()> {
        Ok(())
    }
}

/// Writes each record as one JSON object per line.
pub struct JsonLinesSink {
    writer: RefCell<BufWriter<Box<dyn Write>>>,
    write_errors: Cell<u64>,
}

impl JsonLinesSink {
    /// Creates (truncating) the file at `path`.
    ///
    /// # Errors
    ///
    /// - `SimError::Io` - If the file cannot be created
    pub fn create(path: &Path) -> Result<Self, SimError> {
        let file = File::create(path)?;
        tracing::debug!(path = %path.display(), "json trace sink created");
        Ok(Self::from_writer(file))
    }

    /// Wraps an arbitrary writer.
    pub fn from_writer<W: Write + 'static>(writer: W) -> Self {
        Self {
            writer: RefCell::new(BufWriter::new(Box::new(writer))),
            write_errors: Cell::new(0),
        }
    }

    /// Records that could not be written.
    pub fn write_errors(&self) -> u64 {
        self.write_errors.get()
    }
}

impl TraceSink for JsonLinesSink {
    fn record(&self, record: &TraceRecord) {
        let mut writer = self.writer.borrow_mut();
        let result = serde_json::to_writer(&mut *writer, record)
            .map_err(io::Error::from)
            .and_then(|()| writer.write_all(b"\n"));
        if let Err(e) = result {
            self.write_errors.set(self.write_errors.get() + 1);
            tracing::warn!(signal = %record.signal, error = %e, "failed to write trace record");
        }
    }

    fn flush(&self) -> io::Result<()> {
        self.writer.borrow_mut().flush()
    }
}

/// Emits every record through `tracing` at INFO.
#[derive(Debug, Default)]
pub struct LogSink;

impl TraceSink for LogSink {
    fn record(&self, record: &TraceRecord) {
        tracing::info!(time = %record.time, signal = %record.signal, "{}", record.value);
    }
}

/// Keeps records in memory; used by the scenario report and tests.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: RefCell<Vec<TraceRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of everything recorded so far.
    pub fn records(&self) -> Vec<TraceRecord> {
        self.records.borrow().clone()
    }

    /// Records fired on `signal`, in firing order.
    pub fn records_for(&self, signal: &str) -> Vec<TraceRecord> {
        self.records
            .borrow()
            .iter()
            .filter(|r| r.signal == signal)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.records.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.borrow().is_empty()
    }
}

impl TraceSink for MemorySink {
    fn record(&self, record: &TraceRecord) {
        self.records.borrow_mut().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader};
    use std::rc::Rc;

    use super::*;
    use crate::engine::{Clock, SimTime};
    use crate::trace::{TraceHub, TraceValue};

    #[test]
    fn test_json_lines_sink_writes_one_record_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("trace.jsonl");
        let hub = TraceHub::new(Clock::new());
        let sink = Rc::new(JsonLinesSink::create(&path).unwrap());
        hub.attach_sink(sink.clone(), &["a", "b"]);

        hub.fire("a", TraceValue::Bytes { bytes: 10 });
        hub.fire("b", TraceValue::Fraction { fraction: 1.0 });
        hub.fire("c", TraceValue::Bytes { bytes: 99 });
        hub.flush().unwrap();

        let lines: Vec<String> = BufReader::new(File::open(&path).unwrap())
            .lines()
            .map(Result::unwrap)
            .collect();
        assert_eq!(lines.len(), 2);

        let first: TraceRecord = serde_json::from_str(&lines[0]).unwrap();
        assert_eq!(first.signal, "a");
        assert_eq!(first.time, SimTime::ZERO);
        assert_eq!(first.value, TraceValue::Bytes { bytes: 10 });
        assert_eq!(sink.write_errors(), 0);
    }

    #[test]
    fn test_memory_sink_filters_by_signal() {
        let sink = MemorySink::new();
        for (signal, bytes) in [("x", 1), ("y", 2), ("x", 3)] {
            sink.record(&TraceRecord {
                time: SimTime::ZERO,
                signal: signal.to_string(),
                value: TraceValue::Bytes { bytes },
            });
        }

        let xs = sink.records_for("x");
        assert_eq!(xs.len(), 2);
        assert_eq!(xs[1].value, TraceValue::Bytes { bytes: 3 });
        assert_eq!(sink.len(), 3);
    }
}
