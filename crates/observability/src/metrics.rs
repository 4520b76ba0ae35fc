//! 聚合引擎指标收集模块
//!
//! 基于 RoundReport 与 Snapshot 收集和统计抓取轮次与快照流的运行指标。

use std::collections::BTreeMap;
use std::fmt::Display;

use aggregator::MetricsSnapshot;
use contracts::{ResourceKey, Snapshot};
use dispatcher::{RoundReport, WorkerOutcome};
use metrics::{counter, gauge, histogram};

/// 从 RoundReport 记录指标
///
/// 每轮 `wait_all` 返回后调用。单次抓取的计数与延迟由 dispatcher 自身记录，
/// 这里只记录轮次级别的指标。
///
/// # Example
///
/// ```ignore
/// use observability::metrics::record_round_report;
///
/// let report = round.wait_all().await;
/// record_round_report(&report);
/// ```
pub fn record_round_report<K>(report: &RoundReport<K>) {
    counter!("fanin_rounds_total").increment(1);

    gauge!("fanin_round_last_id").set(report.round as f64);
    gauge!("fanin_round_units").set(report.len() as f64);
    histogram!("fanin_round_records").record(report.total_records() as f64);

    let degraded = report.degraded();
    gauge!("fanin_round_degraded_units").set(degraded as f64);
    if degraded > 0 {
        counter!("fanin_rounds_degraded_total").increment(1);
    }

    let cancelled = report.cancelled();
    if cancelled > 0 {
        counter!("fanin_rounds_cancelled_total").increment(1);
        counter!("fanin_units_cancelled_total").increment(cancelled as u64);
    }
}

/// 记录订阅端收到的快照
pub fn record_snapshot_received<K: ResourceKey, R>(snapshot: &Snapshot<K, R>) {
    counter!("fanin_snapshots_received_total").increment(1);
    gauge!("fanin_snapshot_version").set(snapshot.version() as f64);
    gauge!("fanin_snapshot_records").set(snapshot.total_records() as f64);
}

/// 记录订阅端跳过的快照数 (慢订阅者)
pub fn record_subscriber_skipped(skipped: u64) {
    gauge!("fanin_subscriber_skipped").set(skipped as f64);
}

/// 记录聚合器计数器快照
pub fn record_aggregator_metrics(snapshot: &MetricsSnapshot) {
    gauge!("fanin_aggregator_inbox_len").set(snapshot.inbox_len as f64);
    gauge!("fanin_aggregator_accepted").set(snapshot.accepted_count as f64);
    gauge!("fanin_aggregator_rejected").set(snapshot.rejected_count as f64);
    gauge!("fanin_aggregator_subscribers").set(snapshot.subscriber_count as f64);
}

/// 抓取轮次指标聚合器
///
/// 在内存中聚合指标，便于统计和输出摘要。
#[derive(Debug, Clone, Default)]
pub struct RoundStatsAggregator {
    /// 总轮数
    pub total_rounds: u64,

    /// 总抓取单元数
    pub total_units: u64,

    /// 成功抓取数
    pub fetched: u64,

    /// 降级为空结果的单元数 (错误/超时/panic)
    pub degraded: u64,

    /// 超时单元数
    pub timed_out: u64,

    /// 被取消的单元数
    pub cancelled: u64,

    /// 抓取到的记录总数
    pub total_records: u64,

    /// 单次抓取耗时统计 (毫秒)
    pub fetch_latency_stats: RunningStats,

    /// 轮次耗时统计 (毫秒)
    pub round_duration_stats: RunningStats,

    /// 各 key 降级次数
    pub degraded_counts: BTreeMap<String, u64>,
}

impl RoundStatsAggregator {
    /// 创建新的聚合器
    pub fn new() -> Self {
        Self::default()
    }

    /// 更新聚合统计
    pub fn update<K: Display>(&mut self, report: &RoundReport<K>) {
        self.total_rounds += 1;
        self.total_units += report.len() as u64;
        self.total_records += report.total_records() as u64;

        for unit in &report.units {
            match unit.outcome {
                WorkerOutcome::Fetched { .. } => self.fetched += 1,
                WorkerOutcome::Failed | WorkerOutcome::Panicked => {
                    self.record_degraded(&unit.key);
                }
                WorkerOutcome::TimedOut => {
                    self.timed_out += 1;
                    self.record_degraded(&unit.key);
                }
                WorkerOutcome::Cancelled | WorkerOutcome::Undelivered => self.cancelled += 1,
            }
        }

        for fetch_time in report.fetch_times() {
            self.fetch_latency_stats
                .push(fetch_time.as_secs_f64() * 1000.0);
        }
        self.round_duration_stats
            .push(report.elapsed.as_secs_f64() * 1000.0);
    }

    fn record_degraded(&mut self, key: &impl Display) {
        self.degraded += 1;
        *self.degraded_counts.entry(key.to_string()).or_insert(0) += 1;
    }

    /// 生成摘要报告
    pub fn summary(&self) -> RoundSummary {
        RoundSummary {
            total_rounds: self.total_rounds,
            total_units: self.total_units,
            fetched: self.fetched,
            degraded: self.degraded,
            timed_out: self.timed_out,
            cancelled: self.cancelled,
            total_records: self.total_records,
            degraded_rate: if self.total_units > 0 {
                self.degraded as f64 / self.total_units as f64 * 100.0
            } else {
                0.0
            },
            fetch_latency_ms: StatsSummary::from(&self.fetch_latency_stats),
            round_duration_ms: StatsSummary::from(&self.round_duration_stats),
            degraded_counts: self.degraded_counts.clone(),
        }
    }

    /// 重置统计
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// 指标摘要
#[derive(Debug, Clone, Default)]
pub struct RoundSummary {
    pub total_rounds: u64,
    pub total_units: u64,
    pub fetched: u64,
    pub degraded: u64,
    pub timed_out: u64,
    pub cancelled: u64,
    pub total_records: u64,
    pub degraded_rate: f64,
    pub fetch_latency_ms: StatsSummary,
    pub round_duration_ms: StatsSummary,
    pub degraded_counts: BTreeMap<String, u64>,
}

impl std::fmt::Display for RoundSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "=== Fetch Round Summary ===")?;
        writeln!(f, "Rounds: {}", self.total_rounds)?;
        writeln!(f, "Fetch units: {}", self.total_units)?;
        writeln!(f, "Fetched: {}", self.fetched)?;
        writeln!(
            f,
            "Degraded to empty: {} ({:.2}%)",
            self.degraded, self.degraded_rate
        )?;
        writeln!(f, "Timed out: {}", self.timed_out)?;
        writeln!(f, "Cancelled: {}", self.cancelled)?;
        writeln!(f, "Records: {}", self.total_records)?;
        writeln!(f, "Fetch latency (ms): {}", self.fetch_latency_ms)?;
        writeln!(f, "Round duration (ms): {}", self.round_duration_ms)?;

        if !self.degraded_counts.is_empty() {
            writeln!(f, "Degraded keys:")?;
            for (key, count) in &self.degraded_counts {
                writeln!(f, "  {}: {}", key, count)?;
            }
        }

        Ok(())
    }
}

/// 统计摘要
#[derive(Debug, Clone, Default)]
pub struct StatsSummary {
    pub count: u64,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

impl From<&RunningStats> for StatsSummary {
    fn from(stats: &RunningStats) -> Self {
        Self {
            count: stats.count,
            min: stats.min,
            max: stats.max,
            mean: stats.mean(),
            std_dev: stats.std_dev(),
        }
    }
}

impl std::fmt::Display for StatsSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.count == 0 {
            write!(f, "N/A")
        } else {
            write!(
                f,
                "min={:.3}, max={:.3}, mean={:.3}, std={:.3} (n={})",
                self.min, self.max, self.mean, self.std_dev, self.count
            )
        }
    }
}

/// 在线统计计算器 (Welford's algorithm)
#[derive(Debug, Clone, Default)]
pub struct RunningStats {
    count: u64,
    mean: f64,
    m2: f64,
    min: f64,
    max: f64,
}

impl RunningStats {
    /// 添加新值
    pub fn push(&mut self, value: f64) {
        self.count += 1;

        if self.count == 1 {
            self.min = value;
            self.max = value;
            self.mean = value;
            self.m2 = 0.0;
            return;
        }

        self.min = self.min.min(value);
        self.max = self.max.max(value);

        let delta = value - self.mean;
        self.mean += delta / self.count as f64;
        self.m2 += delta * (value - self.mean);
    }

    /// 样本数量
    pub fn count(&self) -> u64 {
        self.count
    }

    /// 均值
    pub fn mean(&self) -> f64 {
        if self.count == 0 {
            0.0
        } else {
            self.mean
        }
    }

    /// 样本方差
    pub fn variance(&self) -> f64 {
        if self.count < 2 {
            0.0
        } else {
            self.m2 / (self.count - 1) as f64
        }
    }

    /// 标准差
    pub fn std_dev(&self) -> f64 {
        self.variance().sqrt()
    }

    /// 最小值
    pub fn min(&self) -> f64 {
        self.min
    }

    /// 最大值
    pub fn max(&self) -> f64 {
        self.max
    }
}
