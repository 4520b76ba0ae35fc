//! Run statistics and summary output.

use std::time::Duration;

use observability::RoundStatsAggregator;

/// Statistics from one `run` invocation
#[derive(Debug, Clone, Default)]
pub struct RunStats {
    /// Per-round aggregation (outcomes, fetch latency, round duration)
    pub rounds: RoundStatsAggregator,

    /// Snapshots printed by the subscriber
    pub snapshots_received: u64,

    /// Snapshots the subscriber skipped because it fell behind
    pub snapshots_skipped: u64,

    /// Updates applied by the aggregator
    pub updates_accepted: u64,

    /// Updates rejected (length mismatch / unknown key)
    pub updates_rejected: u64,

    /// Keys present in the final snapshot
    pub final_keys: usize,

    /// Records in the final snapshot
    pub final_records: usize,

    /// Version of the final snapshot
    pub final_version: u64,

    /// Run stopped early by a shutdown signal
    pub interrupted: bool,

    /// Total duration of the run
    pub duration: Duration,
}

impl RunStats {
    /// Snapshots printed per second
    pub fn snapshots_per_sec(&self) -> f64 {
        if self.duration.as_secs_f64() > 0.0 {
            self.snapshots_received as f64 / self.duration.as_secs_f64()
        } else {
            0.0
        }
    }

    /// Print detailed summary
    pub fn print_summary(&self) {
        eprintln!("\n╔══════════════════════════════════════════════════════════════╗");
        eprintln!("║                      Run Statistics                          ║");
        eprintln!("╚══════════════════════════════════════════════════════════════╝\n");

        eprintln!("📊 Overview");
        eprintln!("   ├─ Duration: {:.2}s", self.duration.as_secs_f64());
        eprintln!("   ├─ Interrupted: {}", self.interrupted);
        eprintln!("   ├─ Snapshots received: {}", self.snapshots_received);
        eprintln!("   ├─ Snapshots skipped: {}", self.snapshots_skipped);
        eprintln!("   └─ Snapshots/s: {:.2}", self.snapshots_per_sec());

        eprintln!("\n🧮 Aggregator");
        eprintln!("   ├─ Updates accepted: {}", self.updates_accepted);
        eprintln!("   ├─ Updates rejected: {}", self.updates_rejected);
        eprintln!("   ├─ Final version: {}", self.final_version);
        eprintln!("   ├─ Final keys: {}", self.final_keys);
        eprintln!("   └─ Final records: {}", self.final_records);

        let summary = self.rounds.summary();

        eprintln!("\n📈 Fetch Rounds");
        eprintln!("   ├─ Rounds: {}", summary.total_rounds);
        eprintln!("   ├─ Fetch units: {}", summary.total_units);
        eprintln!("   ├─ Fetched: {}", summary.fetched);
        eprintln!(
            "   ├─ Degraded to empty: {} ({:.2}%)",
            summary.degraded, summary.degraded_rate
        );
        eprintln!("   ├─ Timed out: {}", summary.timed_out);
        eprintln!("   ├─ Cancelled: {}", summary.cancelled);
        eprintln!("   ├─ Fetch latency (ms): {}", summary.fetch_latency_ms);
        eprintln!("   └─ Round duration (ms): {}", summary.round_duration_ms);

        if !summary.degraded_counts.is_empty() {
            eprintln!("\n⚠️  Degraded Keys");
            for (key, count) in &summary.degraded_counts {
                eprintln!("   ├─ {}: {}", key, count);
            }
        }

        eprintln!();
    }
}
