use crate::protocol::VolleyRecord;
use crate::task::constants::*;
use crate::task::error::{Result, TaskError};
use hdrhistogram::Histogram;
use tracing::{debug, warn};

/// Latency summary of a set of volleys.
///
/// Mean, spread and extremes come from the raw values; percentiles come from
/// an HDR histogram in microseconds. Latencies straddle two host clocks and
/// can come out negative under clock skew; those are clamped into the
/// histogram and counted.
pub struct Statistics {
    hist: Histogram<u64>,
    count: usize,
    mean_ms: f64,
    std_dev_ms: f64,
    min_ms: f64,
    max_ms: f64,
    clamped_count: usize,
}

impl Statistics {
    pub fn from_records(records: &[VolleyRecord]) -> Result<Self> {
        let latencies: Vec<f64> = records.iter().map(|r| r.latency_ms).collect();
        Self::new(&latencies)
    }

    /// Create a new Statistics instance from latencies in milliseconds
    pub fn new(latencies_ms: &[f64]) -> Result<Self> {
        debug!(
            sample_count = latencies_ms.len(),
            "Creating statistics from latency measurements"
        );
        let mut hist = Histogram::<u64>::new_with_bounds(
            HISTOGRAM_LOW_BOUND_US,
            HISTOGRAM_HIGH_BOUND_US,
            HISTOGRAM_SIGNIFICANT_DIGITS,
        )
        .map_err(|e| TaskError::Report(format!("Failed to create histogram: {}", e)))?;

        let mut clamped_count = 0;
        for &latency in latencies_ms {
            let micros = (latency * 1000.0).round();
            let clamped = micros.clamp(
                HISTOGRAM_LOW_BOUND_US as f64,
                HISTOGRAM_HIGH_BOUND_US as f64,
            );
            if clamped != micros {
                clamped_count += 1;
            }
            hist.record(clamped as u64).map_err(|e| {
                warn!(latency_ms = latency, error = %e, "Failed to record latency");
                TaskError::Report(format!("Failed to record latency: {}", e))
            })?;
        }

        let count = latencies_ms.len();
        let (mean_ms, std_dev_ms) = if count == 0 {
            (0.0, 0.0)
        } else {
            let mean = latencies_ms.iter().sum::<f64>() / count as f64;
            let variance =
                latencies_ms.iter().map(|l| (l - mean).powi(2)).sum::<f64>() / count as f64;
            (mean, variance.sqrt())
        };
        let min_ms = latencies_ms.iter().copied().fold(f64::INFINITY, f64::min);
        let max_ms = latencies_ms.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        if clamped_count > 0 {
            warn!(
                clamped_count = clamped_count,
                total_count = count,
                "Some latency values were clamped to histogram bounds"
            );
        }

        Ok(Self {
            hist,
            count,
            mean_ms,
            std_dev_ms,
            min_ms: if count == 0 { 0.0 } else { min_ms },
            max_ms: if count == 0 { 0.0 } else { max_ms },
            clamped_count,
        })
    }

    pub fn mean(&self) -> f64 {
        self.mean_ms
    }

    /// Population standard deviation
    pub fn std_dev(&self) -> f64 {
        self.std_dev_ms
    }

    pub fn min(&self) -> f64 {
        self.min_ms
    }

    pub fn max(&self) -> f64 {
        self.max_ms
    }

    /// Latency at `quantile`, in milliseconds
    pub fn percentile(&self, quantile: f64) -> f64 {
        self.hist.value_at_quantile(quantile) as f64 / 1000.0
    }

    pub fn clamped_count(&self) -> usize {
        self.clamped_count
    }

    pub fn count(&self) -> usize {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_calculation() -> Result<()> {
        let stats = Statistics::new(&[1.0, 2.0, 3.0, 4.0, 5.0])?;

        assert_eq!(stats.count(), 5);
        assert_eq!(stats.min(), 1.0);
        assert_eq!(stats.max(), 5.0);
        assert!((stats.mean() - 3.0).abs() < 1e-9);
        assert!((stats.std_dev() - 2f64.sqrt()).abs() < 1e-9);
        assert!((stats.percentile(0.5) - 3.0).abs() < 0.01);
        assert_eq!(stats.clamped_count(), 0);
        Ok(())
    }

    #[test]
    fn test_empty_statistics() -> Result<()> {
        let stats = Statistics::new(&[])?;
        assert_eq!(stats.count(), 0);
        assert_eq!(stats.mean(), 0.0);
        assert_eq!(stats.min(), 0.0);
        assert_eq!(stats.max(), 0.0);
        Ok(())
    }

    #[test]
    fn test_negative_latency_clamped() -> Result<()> {
        let stats = Statistics::new(&[-0.5, 1.0])?;
        assert_eq!(stats.clamped_count(), 1);
        assert_eq!(stats.min(), -0.5);
        assert!((stats.mean() - 0.25).abs() < 1e-9);
        Ok(())
    }

    #[test]
    fn test_out_of_range_latency_is_clamped_not_rejected() -> Result<()> {
        let stats = Statistics::new(&[1.0e9, 2.0])?;
        assert_eq!(stats.count(), 2);
        assert_eq!(stats.clamped_count(), 1);
        assert_eq!(stats.max(), 1.0e9);
        Ok(())
    }
}
