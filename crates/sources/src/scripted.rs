//! Scripted 资源源
//!
//! 按配置返回固定记录，可注入延迟、失败和 panic，用于无后端环境的运行和测试。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use contracts::{AggregationBlueprint, FetchError, ResourceFetcher, ResourceSpec};
use serde_json::Value;
use tracing::{debug, trace};

use crate::error::SourceError;
use crate::metrics::SourceMetrics;

/// Scripted 响应
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ScriptedResponse {
    /// 返回的记录
    pub records: Vec<Value>,

    /// 模拟延迟
    pub delay: Duration,

    /// 返回错误
    pub fail: bool,

    /// 触发 panic
    pub panic: bool,
}

impl ScriptedResponse {
    /// 立即返回 `records`
    pub fn records(records: Vec<Value>) -> Self {
        Self {
            records,
            ..Default::default()
        }
    }

    /// 设置延迟
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// 返回错误
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Default::default()
        }
    }

    /// 触发 panic
    pub fn panicking() -> Self {
        Self {
            panic: true,
            ..Default::default()
        }
    }
}

impl From<&ResourceSpec> for ScriptedResponse {
    fn from(spec: &ResourceSpec) -> Self {
        Self {
            records: spec.records.clone(),
            delay: Duration::from_millis(spec.delay_ms),
            fail: spec.fail,
            panic: spec.panic,
        }
    }
}

/// Scripted 资源源
///
/// Key 为资源名，记录为任意 JSON 值。未配置的 key 返回 `FetchError`。
#[derive(Debug, Default)]
pub struct ScriptedFetcher {
    responses: HashMap<String, ScriptedResponse>,
    metrics: Arc<SourceMetrics>,
}

impl ScriptedFetcher {
    /// 创建空的 Scripted 源
    pub fn new() -> Self {
        Self::default()
    }

    /// 从 blueprint 的资源定义创建
    pub fn from_blueprint(blueprint: &AggregationBlueprint) -> Self {
        blueprint
            .resources
            .iter()
            .fold(Self::new(), |fetcher, spec| {
                fetcher.with_response(spec.key.clone(), ScriptedResponse::from(spec))
            })
    }

    /// 添加（或替换）一个 key 的响应
    pub fn with_response(mut self, key: impl Into<String>, response: ScriptedResponse) -> Self {
        self.responses.insert(key.into(), response);
        self
    }

    /// 已配置的 key
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.responses.keys().map(String::as_str)
    }

    /// 获取 metrics
    pub fn metrics(&self) -> &Arc<SourceMetrics> {
        &self.metrics
    }

    fn respond(&self, key: &str) -> Result<&ScriptedResponse, SourceError> {
        self.responses
            .get(key)
            .ok_or_else(|| SourceError::UnknownResource {
                key: key.to_string(),
            })
    }
}

impl ResourceFetcher<String, Value> for ScriptedFetcher {
    async fn fetch(&self, key: &String) -> Result<Vec<Value>, FetchError> {
        self.metrics.record_call();

        let response = match self.respond(key) {
            Ok(response) => response,
            Err(e) => {
                self.metrics.record_failure();
                return Err(e.into());
            }
        };

        if !response.delay.is_zero() {
            trace!(key = %key, delay_ms = response.delay.as_millis() as u64, "scripted delay");
            tokio::time::sleep(response.delay).await;
        }

        if response.panic {
            self.metrics.record_panic();
            panic!("scripted panic for resource '{key}'");
        }

        if response.fail {
            self.metrics.record_failure();
            metrics::counter!("fanin_source_failures_total").increment(1);
            return Err(SourceError::ScriptedFailure { key: key.clone() }.into());
        }

        self.metrics.record_served();
        debug!(key = %key, records = response.records.len(), "scripted response served");
        Ok(response.records.clone())
    }
}
