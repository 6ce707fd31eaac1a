//! Relay status line: collected records, handled messages and errors

use colored::*;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

/// Time without new records before a session is shown as idle (milliseconds)
const IDLE_THRESHOLD_MS: u64 = 1_000;

/// Counters shared between the collector (bus threads) and the display thread
#[derive(Debug, Default)]
pub struct RelayCounters {
    records: AtomicU64,
    messages: AtomicU64,
    errors: AtomicU64,
}

impl RelayCounters {
    #[inline]
    pub fn increment_record(&self) {
        self.records.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_message(&self) {
        self.messages.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn increment_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> RelayStats {
        RelayStats {
            records: self.records.load(Ordering::Relaxed),
            messages: self.messages.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayStats {
    pub records: u64,
    pub messages: u64,
    pub errors: u64,
}

pub struct RelayMonitor {
    counters: Arc<RelayCounters>,
    start_time: Instant,
    update_interval: Duration,
}

impl RelayMonitor {
    pub fn new(update_interval_ms: u64) -> Self {
        Self {
            counters: Arc::new(RelayCounters::default()),
            start_time: Instant::now(),
            update_interval: Duration::from_millis(update_interval_ms),
        }
    }

    pub fn counters(&self) -> Arc<RelayCounters> {
        Arc::clone(&self.counters)
    }

    /// Spawn the background thread redrawing the status line
    pub fn start_display(&self) {
        let counters = Arc::clone(&self.counters);
        let update_interval = self.update_interval;

        thread::spawn(move || {
            let mut last_records = 0u64;
            let mut last_record_time: Option<Instant> = None;

            loop {
                thread::sleep(update_interval);
                let stats = counters.snapshot();
                let now = Instant::now();

                if stats.records > last_records {
                    last_record_time = Some(now);
                    last_records = stats.records;
                }
                let active = last_record_time.map_or(false, |t| {
                    now.duration_since(t) < Duration::from_millis(IDLE_THRESHOLD_MS)
                });

                print!("\r{}", Self::status_line(active, &stats));
                std::io::Write::flush(&mut std::io::stdout()).ok();
            }
        });
    }

    fn status_line(active: bool, stats: &RelayStats) -> String {
        let indicator = if active {
            "█ COLLECTING".green().bold().to_string()
        } else {
            "░ IDLE".normal().to_string()
        };
        let errors = if stats.errors > 0 {
            stats.errors.to_string().red().to_string()
        } else {
            stats.errors.to_string()
        };
        format!(
            "{} | Records: {} | Messages: {} | Errors: {}",
            indicator, stats.records, stats.messages, errors
        )
    }

    pub fn stats(&self) -> RelayStats {
        self.counters.snapshot()
    }

    pub fn uptime(&self) -> Duration {
        self.start_time.elapsed()
    }
}
