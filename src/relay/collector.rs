use crate::node::{Listens, Outbox};
use crate::protocol::{Envelope, Message, VolleyRecord};
use crate::relay::monitor::RelayCounters;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::fs::{File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Records kept in memory; the records file and counters see every one
pub const RECENT_RECORDS: usize = 1024;

/// Dispatch table of the relay: stores `DATA` records, counts everything else
pub struct Collector {
    counters: Arc<RelayCounters>,
    records: Mutex<VecDeque<VolleyRecord>>,
    output: Mutex<Option<BufWriter<File>>>,
}

impl Collector {
    pub fn new(counters: Arc<RelayCounters>) -> Self {
        Self {
            counters,
            records: Mutex::new(VecDeque::with_capacity(RECENT_RECORDS)),
            output: Mutex::new(None),
        }
    }

    /// Also append every record to `path` as a JSON line
    pub fn with_output(counters: Arc<RelayCounters>, path: &Path) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        info!(path = %path.display(), "Persisting records");
        Ok(Self {
            output: Mutex::new(Some(BufWriter::new(file))),
            ..Self::new(counters)
        })
    }

    /// The most recent records, oldest first
    pub fn records(&self) -> Vec<VolleyRecord> {
        self.records.lock().iter().cloned().collect()
    }

    fn collect(&self, sender: &str, record: &VolleyRecord) {
        self.counters.increment_record();
        info!(
            sender = %sender,
            pilot = %record.pilot,
            subject = %record.subject,
            trial_num = record.trial_num,
            latency_ms = record.latency_ms,
            "Record collected"
        );

        if let Some(output) = self.output.lock().as_mut() {
            if let Err(e) = append_line(output, record) {
                warn!(error = %e, trial_num = record.trial_num, "Failed to persist record");
                self.counters.increment_error();
            }
        }
        let mut records = self.records.lock();
        if records.len() == RECENT_RECORDS {
            records.pop_front();
        }
        records.push_back(record.clone());
    }
}

fn append_line(output: &mut BufWriter<File>, record: &VolleyRecord) -> io::Result<()> {
    serde_json::to_writer(&mut *output, record)?;
    output.write_all(b"\n")?;
    output.flush()
}

impl Listens for Collector {
    fn on_message(&self, envelope: &Envelope, _outbox: &dyn Outbox) {
        match &envelope.message {
            Message::Data(record) => self.collect(&envelope.sender, record),
            Message::Ready
            | Message::Stop
            | Message::Call { .. }
            | Message::Response(_)
            | Message::Init { .. }
            | Message::Start(_) => {
                self.counters.increment_message();
                debug!(
                    sender = %envelope.sender,
                    key = %envelope.message.key(),
                    "Relay received message addressed to itself"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::MockOutbox;
    use crate::protocol::{DeliveryFlags, Route};
    use chrono::Utc;

    fn data(trial_num: u64) -> Envelope {
        let now = Utc::now();
        Envelope {
            id: trial_num,
            sender: "leader".into(),
            route: Route::to("T"),
            message: Message::Data(VolleyRecord::new(trial_num, now, now, "s", "p")),
            flags: DeliveryFlags::NONE,
        }
    }

    #[test]
    fn test_collects_data_and_counts_messages() {
        let counters = Arc::new(RelayCounters::default());
        let collector = Collector::new(Arc::clone(&counters));
        let outbox = MockOutbox::new();

        collector.on_message(&data(0), &outbox);
        collector.on_message(&data(1), &outbox);
        collector.on_message(
            &Envelope {
                message: Message::Ready,
                ..data(2)
            },
            &outbox,
        );

        let records = collector.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].trial_num, 1);
        let stats = counters.snapshot();
        assert_eq!(stats.records, 2);
        assert_eq!(stats.messages, 1);
    }

    #[test]
    fn test_keeps_only_recent_records() {
        let counters = Arc::new(RelayCounters::default());
        let collector = Collector::new(Arc::clone(&counters));
        let outbox = MockOutbox::new();
        let total = RECENT_RECORDS as u64 + 10;

        for trial_num in 0..total {
            collector.on_message(&data(trial_num), &outbox);
        }

        let records = collector.records();
        assert_eq!(records.len(), RECENT_RECORDS);
        assert_eq!(records[0].trial_num, 10);
        assert_eq!(records[RECENT_RECORDS - 1].trial_num, total - 1);
        assert_eq!(counters.snapshot().records, total);
    }

    #[test]
    fn test_persists_json_lines() {
        let path = std::env::temp_dir().join(format!("volley-records-{}.jsonl", std::process::id()));
        let _ = std::fs::remove_file(&path);

        let counters = Arc::new(RelayCounters::default());
        let collector = Collector::with_output(counters, &path).unwrap();
        let outbox = MockOutbox::new();
        collector.on_message(&data(0), &outbox);
        collector.on_message(&data(1), &outbox);

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        let record: VolleyRecord = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(record.trial_num, 1);
        let _ = std::fs::remove_file(&path);
    }
}
