//! 模型调用重试：可重试错误按指数退避重试，限流时至少等待服务端给出的时长

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::llm::{ModelClient, ModelDecision, ModelError, ModelRequest};

/// 重试策略（对应配置 `[model]` 段）
#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    /// 总尝试次数（含首次）
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    4
}

fn default_base_delay_ms() -> u64 {
    500
}

fn default_max_delay_ms() -> u64 {
    8_000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

impl RetryConfig {
    /// 第 attempt 次重试前的等待（attempt 从 0 起）
    pub fn delay_for(&self, attempt: u32, err: &ModelError) -> Duration {
        let exponent = attempt.min(30);
        let backoff = self
            .base_delay_ms
            .saturating_mul(2u64.saturating_pow(exponent))
            .min(self.max_delay_ms);
        let floor = match err {
            ModelError::RateLimited { retry_after_ms } => *retry_after_ms,
            _ => 0,
        };
        Duration::from_millis(backoff.max(floor))
    }
}

/// 包装任意 ModelClient，透明重试
pub struct RetryingModelClient {
    inner: Arc<dyn ModelClient>,
    config: RetryConfig,
}

impl RetryingModelClient {
    pub fn new(inner: Arc<dyn ModelClient>, config: RetryConfig) -> Self {
        Self { inner, config }
    }
}

#[async_trait]
impl ModelClient for RetryingModelClient {
    async fn next_action(&self, request: &ModelRequest<'_>) -> Result<ModelDecision, ModelError> {
        let attempts = self.config.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            match self.inner.next_action(request).await {
                Ok(decision) => return Ok(decision),
                Err(e) if e.is_retryable() && attempt + 1 < attempts => {
                    let delay = self.config.delay_for(attempt, &e);
                    tracing::warn!(attempt = attempt + 1, max_attempts = attempts, delay_ms = delay.as_millis() as u64, error = %e, "model call failed, retrying");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
