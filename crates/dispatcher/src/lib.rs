//! # Dispatcher
//!
//! 抓取分发模块。
//!
//! 负责：
//! - 每个 ResourceKey 启动一个并发抓取单元（可选并发上限）
//! - 抓取失败、panic、超时统一转换为空结果，不中断整轮
//! - 将结果以 `UpdateMessage` 投递到聚合器 inbox
//! - Batch / Streaming 两种完成模式，支持取消

pub mod dispatcher;
pub mod error;
pub mod metrics;
pub mod round;
mod worker;

pub use contracts::{DispatchConfig, DispatchMode, FetchError, FnFetcher, ResourceFetcher};
pub use dispatcher::Dispatcher;
pub use error::DispatcherError;
pub use crate::metrics::{RoundMetrics, RoundMetricsSnapshot};
pub use round::{FetchRound, RoundReport, UnitReport, WorkerOutcome};
