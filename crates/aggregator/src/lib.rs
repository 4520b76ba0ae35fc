//! # Aggregator
//!
//! 单写者快照聚合器。
//!
//! 负责：
//! - 通过单一 inbox 串行化所有更新（同一时刻只有一个写者）
//! - 校验结果数量一致性，拒绝冲突更新并上报故障
//! - 每次接受更新后发布完整的不可变 `Snapshot`
//! - 多订阅者快照流（可选回放最新快照，慢订阅者丢弃最旧快照）
//!
//! ## 使用示例
//!
//! ```ignore
//! use aggregator::{Aggregator, AggregatorConfig};
//!
//! let handle = Aggregator::start(vec!["allergies", "vitals"], AggregatorConfig::default())?;
//! let mut stream = handle.subscribe().await?;
//!
//! handle.send_update("vitals", vec![reading]).await?;
//!
//! while let Some(snapshot) = stream.next().await {
//!     // Render snapshot
//! }
//! ```

mod actor;
mod engine;
mod metrics;
mod stream;

pub use crate::actor::{Aggregator, AggregatorHandle, UpdateSender};
pub use crate::engine::SnapshotAccumulator;
pub use crate::metrics::{AggregatorMetrics, MetricsSnapshot};
pub use crate::stream::{FaultStream, SnapshotStream};

// Re-export contracts types
pub use contracts::{
    AggregationFault, AggregatorConfig, ContractError, ResourceKey, ResultList, Snapshot,
    UpdateMessage,
};
