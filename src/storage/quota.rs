//! Periodic quota enforcement.
//!
//! [`QuotaMonitor::spawn`] starts a tokio task that runs [`check_quota`] on
//! a fixed interval. Ticks run one after another inside the task; an
//! eviction pass over an already-evicted store removes nothing new.

use super::events::StorageEvent;
use super::store::{EvictionReport, QuotaLevel, Storage};
use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::interval;

/// Quota monitor configuration.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QuotaConfig {
    /// Default: 5000
    pub check_interval_ms: u64,

    /// Default: 0.8
    pub warning_threshold: f64,

    /// Ask before evicting at the warning level.
    pub prompt_on_warning: bool,

    pub warning_message: String,
}

impl QuotaConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_check_interval(mut self, interval: Duration) -> Self {
        self.check_interval_ms = interval.as_millis() as u64;
        self
    }

    pub fn with_warning_threshold(mut self, threshold: f64) -> Self {
        self.warning_threshold = threshold;
        self
    }

    pub fn with_prompt_on_warning(mut self, enabled: bool) -> Self {
        self.prompt_on_warning = enabled;
        self
    }

    pub fn with_warning_message(mut self, message: impl Into<String>) -> Self {
        self.warning_message = message.into();
        self
    }

    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }
}

impl Default for QuotaConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 5000,
            warning_threshold: 0.8,
            prompt_on_warning: true,
            warning_message: "Storage is almost full. Clear old cached data?".to_string(),
        }
    }
}

/// Asks the user whether to clean up.
#[async_trait]
pub trait ConfirmPrompt: Send + Sync {
    /// `true` to go ahead.
    async fn confirm(&self, message: &str) -> bool;
}

/// Result of one quota check.
#[derive(Clone, Debug, PartialEq)]
pub struct QuotaCheck {
    pub level: QuotaLevel,
    pub usage_ratio: f64,

    /// Set when the check evicted.
    pub eviction: Option<EvictionReport>,
}

/// Inspect usage once and react.
///
/// At or above the limit the store is evicted straight away and
/// [`StorageEvent::QuotaCritical`] is published. At or above the warning
/// threshold [`StorageEvent::QuotaWarning`] is published and, when a prompt
/// is given and `prompt_on_warning` is set, the store is evicted if the user
/// confirms.
pub async fn check_quota(
    storage: &Storage,
    config: &QuotaConfig,
    prompt: Option<&dyn ConfirmPrompt>,
) -> Result<QuotaCheck> {
    let info = storage.info()?;
    let usage_ratio = info.usage_ratio;
    let level = QuotaLevel::from_ratio(usage_ratio, config.warning_threshold);

    let eviction = match level {
        QuotaLevel::Normal => None,
        QuotaLevel::Critical => {
            tracing::warn!(usage_ratio, "storage quota critical, evicting");
            let report = storage.evict()?;
            storage.publish(StorageEvent::QuotaCritical {
                usage_ratio,
                current_size: info.current_size,
                limit_size: info.limit_size,
            });
            Some(report)
        }
        QuotaLevel::Warning => {
            tracing::warn!(usage_ratio, "storage quota warning");
            storage.publish(StorageEvent::QuotaWarning {
                usage_ratio,
                current_size: info.current_size,
                limit_size: info.limit_size,
            });
            match prompt {
                Some(prompt) if config.prompt_on_warning => {
                    if prompt.confirm(&config.warning_message).await {
                        Some(storage.evict()?)
                    } else {
                        tracing::debug!("cleanup declined");
                        None
                    }
                }
                _ => None,
            }
        }
    };

    Ok(QuotaCheck {
        level,
        usage_ratio,
        eviction,
    })
}

/// Handle to a running quota monitor.
pub struct MonitorHandle {
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<()>,
}

impl MonitorHandle {
    /// Signal the task and wait for it to finish its current tick.
    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Err(e) = (&mut self.task).await {
            if !e.is_cancelled() {
                tracing::warn!(error = %e, "quota monitor task failed");
            }
        }
    }

    /// Cancel the task without waiting.
    pub fn abort(&self) {
        self.task.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Background quota checker.
pub struct QuotaMonitor;

impl QuotaMonitor {
    /// Start checking on `config.check_interval_ms`. Must be called from
    /// within a tokio runtime. The first check runs immediately.
    pub fn spawn(
        storage: Arc<Storage>,
        config: QuotaConfig,
        prompt: Option<Arc<dyn ConfirmPrompt>>,
    ) -> MonitorHandle {
        let (stop_tx, mut stop_rx) = oneshot::channel();

        let task = tokio::spawn(async move {
            let mut tick = interval(config.check_interval());
            loop {
                tokio::select! {
                    _ = &mut stop_rx => break,
                    _ = tick.tick() => {
                        if let Err(e) = check_quota(&storage, &config, prompt.as_deref()).await {
                            tracing::warn!(error = %e, "quota check failed");
                        }
                    }
                }
            }
            tracing::debug!("quota monitor stopped");
        });

        MonitorHandle {
            stop: Some(stop_tx),
            task,
        }
    }
}
