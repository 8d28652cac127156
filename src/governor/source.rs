//! Metric sources feeding the governor's sampling loop

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::Utc;
use sysinfo::System;

use super::SystemMetrics;
use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::models::{WorkFilter, WorkItemKind, WorkItemStatus};
use crate::store::ContentStore;

/// Something that can report current system load
#[async_trait]
pub trait MetricsSource: Send + Sync {
    async fn sample_system_metrics(&self) -> Result<SystemMetrics>;
}

/// Reports how much work is waiting in the batch queues
#[async_trait]
pub trait QueueDepth: Send + Sync {
    async fn pending_items(&self) -> usize;
}

/// Production metrics source
///
/// CPU and memory come from `sysinfo`; queue size from the batch queue;
/// API failures from the executor's failure log; active jobs from running
/// work items in the store.
pub struct SystemMetricsSource {
    system: Mutex<System>,
    executor: Arc<Executor>,
    queue: Arc<dyn QueueDepth>,
    store: Arc<dyn ContentStore>,
    api_failure_window: chrono::Duration,
}

impl SystemMetricsSource {
    pub fn new(
        executor: Arc<Executor>,
        queue: Arc<dyn QueueDepth>,
        store: Arc<dyn ContentStore>,
        api_failure_window: chrono::Duration,
    ) -> Self {
        let mut system = System::new();
        // first cpu reading is always zero; prime it
        system.refresh_cpu();
        system.refresh_memory();

        Self {
            system: Mutex::new(system),
            executor,
            queue,
            store,
            api_failure_window,
        }
    }

    fn host_usage(&self) -> Result<(f64, f64)> {
        let mut system = self
            .system
            .lock()
            .map_err(|_| Error::other("system metrics lock poisoned"))?;
        system.refresh_cpu();
        system.refresh_memory();

        let cpus = system.cpus();
        let cpu = if cpus.is_empty() {
            0.0
        } else {
            cpus.iter().map(|c| f64::from(c.cpu_usage())).sum::<f64>() / cpus.len() as f64
        };

        let total = system.total_memory();
        let memory = if total == 0 {
            0.0
        } else {
            system.used_memory() as f64 / total as f64 * 100.0
        };

        Ok((cpu, memory))
    }
}

#[async_trait]
impl MetricsSource for SystemMetricsSource {
    async fn sample_system_metrics(&self) -> Result<SystemMetrics> {
        let (cpu_percent, memory_percent) = self.host_usage()?;
        let queue_size = self.queue.pending_items().await as u64;
        let api_failures = self.executor.recent_failures(self.api_failure_window).await as u64;

        let ctx = self.executor.store_context("list_work_items");
        let store = self.store.clone();
        let running = self
            .executor
            .execute_with_retry(&ctx, || {
                let store = store.clone();
                async move {
                    let filter = WorkFilter::kind(WorkItemKind::Production)
                        .with_statuses(&[WorkItemStatus::Running]);
                    Ok(store.list_work_items(&filter).await?)
                }
            })
            .await?;

        Ok(SystemMetrics {
            cpu_percent,
            memory_percent,
            queue_size,
            api_failures,
            active_jobs: running.len() as u64,
            timestamp: Utc::now(),
        })
    }
}

/// Fixed metrics, for tests and dry runs
pub struct StaticMetricsSource {
    metrics: tokio::sync::RwLock<SystemMetrics>,
}

impl StaticMetricsSource {
    pub fn new(metrics: SystemMetrics) -> Self {
        Self {
            metrics: tokio::sync::RwLock::new(metrics),
        }
    }

    pub async fn set(&self, metrics: SystemMetrics) {
        *self.metrics.write().await = metrics;
    }
}

#[async_trait]
impl MetricsSource for StaticMetricsSource {
    async fn sample_system_metrics(&self) -> Result<SystemMetrics> {
        let mut metrics = self.metrics.read().await.clone();
        metrics.timestamp = Utc::now();
        Ok(metrics)
    }
}
