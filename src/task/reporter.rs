use crate::protocol::VolleyRecord;
use crate::task::constants::{ACCEPTABLE_LATENCY_MS, GOOD_LATENCY_MS};
use crate::task::error::Result;
use crate::task::statistics::Statistics;
use crate::task::volley::VolleyOutcome;
use colored::*;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Prints the leader's end-of-session summary
pub struct Reporter;

const BAR_WIDTH: usize = 30;
const LABEL_WIDTH: usize = 12;

/// Upper bounds (ms) of the distribution buckets; anything above the last is an outlier
const BUCKETS_MS: [(f64, &str); 7] = [
    (0.5, "<0.5 ms"),
    (1.0, "0.5-1 ms"),
    (2.0, "1-2 ms"),
    (5.0, "2-5 ms"),
    (10.0, "5-10 ms"),
    (50.0, "10-50 ms"),
    (100.0, "50-100 ms"),
];

impl Reporter {
    /// Bar scaled against the fullest bucket; a non-empty bucket always gets
    /// at least a sliver.
    fn render_bar(count: usize, max_count: usize) -> String {
        if count == 0 || max_count == 0 {
            return String::new();
        }
        let length = (count * BAR_WIDTH) / max_count;
        if length == 0 {
            "▏".to_string()
        } else {
            "█".repeat(length)
        }
    }

    fn format_percentage(percentage: f64) -> String {
        if percentage < 1.0 {
            format!("{:5.2}%", percentage)
        } else {
            format!("{:5.1}%", percentage)
        }
    }

    fn colorize_latency(latency_ms: f64) -> ColoredString {
        let text = format!("{:.3} ms", latency_ms);
        if latency_ms < GOOD_LATENCY_MS {
            text.green()
        } else if latency_ms < ACCEPTABLE_LATENCY_MS {
            text.yellow()
        } else {
            text.red()
        }
    }

    /// Bucket counts plus the number of outliers beyond the last bucket
    fn bucket_counts(records: &[VolleyRecord]) -> (Vec<usize>, usize) {
        let mut counts = vec![0usize; BUCKETS_MS.len()];
        let mut outliers = 0usize;
        for record in records {
            match BUCKETS_MS
                .iter()
                .position(|&(upper, _)| record.latency_ms < upper)
            {
                Some(i) => counts[i] += 1,
                None => outliers += 1,
            }
        }
        (counts, outliers)
    }

    /// Print the complete results summary
    pub fn print_results(
        &self,
        stats: &Statistics,
        outcome: &VolleyOutcome,
        requested: u64,
        elapsed: Duration,
        records: &[VolleyRecord],
    ) -> Result<()> {
        debug!(
            completed = outcome.completed,
            requested = requested,
            "Printing volley results"
        );

        println!("\n{}", "┌─────────────────────────────┐".cyan());
        println!("{}", "│  Volley Results             │".cyan());
        println!("{}", "└─────────────────────────────┘".cyan());
        println!();
        println!(
            "Volleys:  {} of {} completed in {:.2}s",
            outcome.completed,
            requested,
            elapsed.as_secs_f64()
        );
        if outcome.truncated {
            println!("          {}", "└─ stopped early".yellow());
        }
        if outcome.mismatches > 0 {
            println!(
                "          {}",
                format!(
                    "└─ {} response(s) out of order; treat their latencies with suspicion",
                    outcome.mismatches
                )
                .yellow()
            );
        }
        println!();

        if stats.count() == 0 {
            warn!("No volleys recorded");
            println!("{}", "No volleys recorded.".red());
            return Ok(());
        }

        println!("Latency (follower receipt - leader send):");
        println!(
            "  Mean:   {}  ± {:.3} ms",
            Self::colorize_latency(stats.mean()),
            stats.std_dev()
        );
        println!("  Min:    {:.3} ms", stats.min());
        println!("  Max:    {:.3} ms", stats.max());
        println!("  P50:    {:.3} ms", stats.percentile(0.5));
        println!("  P90:    {:.3} ms", stats.percentile(0.9));
        println!("  P99:    {:.3} ms", stats.percentile(0.99));
        if stats.clamped_count() > 0 {
            println!(
                "  ⚠ {} value(s) fell outside the histogram range (clock skew between hosts?)",
                stats.clamped_count()
            );
        }
        println!();

        self.print_distribution(records);

        info!(
            mean_latency_ms = stats.mean(),
            std_dev_ms = stats.std_dev(),
            volleys = outcome.completed,
            "Results reported"
        );
        Ok(())
    }

    /// Print the latency distribution as a bar chart
    pub fn print_distribution(&self, records: &[VolleyRecord]) {
        if records.is_empty() {
            return;
        }
        let (counts, outliers) = Self::bucket_counts(records);
        let total = records.len() as f64;
        let max_count = counts.iter().copied().max().unwrap_or(0).max(outliers);

        println!("Latency Distribution:");
        for (&(_, label), &count) in BUCKETS_MS.iter().zip(counts.iter()) {
            let percentage = count as f64 / total * 100.0;
            println!(
                "  {:>width$}:  {:30} {} ({:>6})",
                label,
                Self::render_bar(count, max_count),
                Self::format_percentage(percentage),
                count,
                width = LABEL_WIDTH
            );
        }
        if outliers > 0 {
            let percentage = outliers as f64 / total * 100.0;
            let label = format!("{:>width$}", ">100 ms", width = LABEL_WIDTH);
            println!(
                "  {}:  {:30} {} ({:>6})",
                label.red().bold(),
                Self::render_bar(outliers, max_count),
                Self::format_percentage(percentage),
                outliers
            );
        }
    }
}
