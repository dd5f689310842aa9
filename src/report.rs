//! Performance report (C11, ambient): aggregates per-worker counters into
//! diagnostic GFLOPS/bandwidth estimates, printed after join regardless of
//! whether the run ended via timeout or signal.

use std::time::Duration;

use crate::worker::WorkerReport;

pub struct PerformanceReport {
    pub worker_count: usize,
    pub total_iterations: u64,
    pub min_iterations: u64,
    pub max_iterations: u64,
    pub elapsed: Duration,
    pub estimated_gflops: f64,
    pub estimated_bandwidth_gbs: f64,
}

impl PerformanceReport {
    pub fn compute(
        reports: &[WorkerReport],
        elapsed: Duration,
        flops_per_iteration: u64,
        bytes_per_iteration: u64,
    ) -> Self {
        let total_iterations: u64 = reports.iter().map(|r| r.iterations).sum();
        let min_iterations = reports.iter().map(|r| r.iterations).min().unwrap_or(0);
        let max_iterations = reports.iter().map(|r| r.iterations).max().unwrap_or(0);
        let seconds = elapsed.as_secs_f64().max(f64::EPSILON);

        let estimated_gflops =
            (total_iterations as f64 * flops_per_iteration as f64) / seconds / 1e9;
        let estimated_bandwidth_gbs =
            (total_iterations as f64 * bytes_per_iteration as f64) / seconds / 1e9;

        Self {
            worker_count: reports.len(),
            total_iterations,
            min_iterations,
            max_iterations,
            elapsed,
            estimated_gflops,
            estimated_bandwidth_gbs,
        }
    }

    pub fn log(&self) {
        tracing::info!(
            workers = self.worker_count,
            total_iterations = self.total_iterations,
            min_iterations = self.min_iterations,
            max_iterations = self.max_iterations,
            elapsed_secs = self.elapsed.as_secs_f64(),
            estimated_gflops = self.estimated_gflops,
            estimated_bandwidth_gbs = self.estimated_bandwidth_gbs,
            "performance report"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aggregates_across_workers() {
        let reports = vec![
            WorkerReport { iterations: 100, start_tsc: 0, stop_tsc: 1 },
            WorkerReport { iterations: 200, start_tsc: 0, stop_tsc: 1 },
        ];
        let report = PerformanceReport::compute(&reports, Duration::from_secs(1), 2, 8);
        assert_eq!(report.total_iterations, 300);
        assert_eq!(report.min_iterations, 100);
        assert_eq!(report.max_iterations, 200);
        assert!(report.estimated_gflops > 0.0);
        assert!(report.estimated_bandwidth_gbs > 0.0);
    }

    #[test]
    fn handles_zero_elapsed_without_dividing_by_zero() {
        let reports = vec![WorkerReport { iterations: 10, start_tsc: 0, stop_tsc: 0 }];
        let report = PerformanceReport::compute(&reports, Duration::ZERO, 1, 1);
        assert!(report.estimated_gflops.is_finite());
    }
}
