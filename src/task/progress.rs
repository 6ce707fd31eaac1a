use crate::protocol::VolleyRecord;
use crate::task::constants::*;
use crate::task::error::{Result, TaskError};
use crate::task::sink::RecordSink;
use colored::*;
use indicatif::{ProgressBar, ProgressStyle};
use std::time::{Duration, Instant};

/// Sink decorator showing a live progress bar with running latency figures
pub struct ProgressSink<S: RecordSink> {
    inner: S,
    pb: ProgressBar,
    last_update: Instant,
    count: u64,
    sum_ms: f64,
}

impl<S: RecordSink> ProgressSink<S> {
    pub fn new(inner: S, n_messages: u64) -> Result<Self> {
        let pb = ProgressBar::new(n_messages);
        pb.set_style(
            ProgressStyle::with_template("{msg}\n{bar:40.cyan/blue} {pos:>7}/{len:7} [{elapsed_precise}]")
                .map_err(|e| TaskError::Report(format!("Failed to create progress style: {}", e)))?
                .progress_chars("█░"),
        );
        pb.enable_steady_tick(Duration::from_millis(PROGRESS_TICK_INTERVAL_MS));

        Ok(Self {
            inner,
            pb,
            last_update: Instant::now(),
            count: 0,
            sum_ms: 0.0,
        })
    }

    fn update_message(&self, last_ms: f64) {
        let mean_ms = self.sum_ms / self.count as f64;
        let last = format!("{:.3}", last_ms);
        let last = if last_ms < GOOD_LATENCY_MS {
            last.green()
        } else if last_ms < ACCEPTABLE_LATENCY_MS {
            last.yellow()
        } else {
            last.red()
        };
        self.pb
            .set_message(format!("→ {}ms   Mean: {:.3}ms", last, mean_ms));
    }

    pub fn finish(self) -> S {
        self.pb.finish();
        self.inner
    }
}

impl<S: RecordSink> RecordSink for ProgressSink<S> {
    fn emit(&mut self, record: VolleyRecord) -> Result<()> {
        let latency = record.latency_ms;
        self.inner.emit(record)?;

        self.count += 1;
        self.sum_ms += latency;
        self.pb.inc(1);
        if self.count == 1
            || self.last_update.elapsed() > Duration::from_millis(LIVE_STATS_UPDATE_INTERVAL_MS)
        {
            self.update_message(latency);
            self.last_update = Instant::now();
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_progress_sink_passes_records_through() -> Result<()> {
        let mut sink = ProgressSink::new(Vec::<VolleyRecord>::new(), 2)?;
        let now = Utc::now();
        sink.emit(VolleyRecord::new(0, now, now, "s", "p"))?;
        sink.emit(VolleyRecord::new(1, now, now, "s", "p"))?;

        let records = sink.finish();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].trial_num, 1);
        Ok(())
    }
}
