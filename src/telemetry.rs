//! Tab-separated frequency/power data log.
//!
//! One record per oracle step: virtual time, relative time, frequency
//! deviation, and aggregated VPP power. The format is fixed so downstream
//! plotting scripts can rely on it byte-for-byte.

use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::Path;

/// Column layout, written once at oracle start.
pub const FREQUENCY_LOG_HEADER: [&str; 5] = [
    "# SimTime_ms",
    "SimTime_s",
    "RelativeTime_s",
    "FreqDeviation_Hz",
    "TotalVppPower_kW",
];

/// Append-only data sink for frequency-response records.
///
/// Write failures do not stop the simulation: the first failure is reported
/// on stderr, subsequent records are silently dropped.
pub struct FrequencyLog {
    writer: Option<csv::Writer<Box<dyn Write>>>,
    failure_reported: bool,
}

impl FrequencyLog {
    /// Creates a log writing to the file at `path` (truncating it).
    ///
    /// # Errors
    ///
    /// Returns an `io::Error` if the file cannot be created.
    pub fn to_path(path: &Path) -> io::Result<Self> {
        let file = File::create(path)?;
        Ok(Self::to_writer(Box::new(BufWriter::new(file))))
    }

    /// Creates a log writing to an arbitrary sink (tests use a shared
    /// in-memory buffer).
    pub fn to_writer(writer: Box<dyn Write>) -> Self {
        let writer = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(writer);
        FrequencyLog {
            writer: Some(writer),
            failure_reported: false,
        }
    }

    /// Creates a log that discards everything. Used when no output path is
    /// configured.
    pub fn disabled() -> Self {
        FrequencyLog {
            writer: None,
            failure_reported: false,
        }
    }

    /// Writes the column header.
    pub fn header(&mut self) {
        self.write(|writer| writer.write_record(FREQUENCY_LOG_HEADER))
    }

    /// Appends one record.
    pub fn record(
        &mut self,
        sim_time_ms: f64,
        sim_time_s: f64,
        relative_time_s: f64,
        freq_deviation_hz: f64,
        total_vpp_power_kw: f64,
    ) {
        self.write(|writer| {
            writer.write_record(&[
                format!("{sim_time_ms:.0}"),
                format!("{sim_time_s:.3}"),
                format!("{relative_time_s:.3}"),
                format!("{freq_deviation_hz:.5}"),
                format!("{total_vpp_power_kw:.2}"),
            ])
        })
    }

    /// Flushes buffered records to the underlying sink.
    pub fn flush(&mut self) {
        self.write(|writer| writer.flush().map_err(csv::Error::from))
    }

    fn write(&mut self, op: impl FnOnce(&mut csv::Writer<Box<dyn Write>>) -> csv::Result<()>) {
        let Some(writer) = self.writer.as_mut() else {
            return;
        };
        if let Err(error) = op(writer) {
            if !self.failure_reported {
                eprintln!("error: frequency log write failed: {error}");
                self.failure_reported = true;
            }
        }
    }
}
