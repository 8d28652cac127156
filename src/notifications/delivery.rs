//! Background alert delivery
//!
//! `raise_alert` only records an alert and pushes it onto a bounded queue.
//! A single worker drains the queue and sends each alert to every channel
//! through the executor, so a slow or failing webhook never blocks the code
//! path that raised the alert.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::channels::Channel;
use super::PerformanceAlert;
use crate::executor::{Executor, OperationContext};

/// Executor service name of alert deliveries
pub const DELIVERY_SERVICE: &str = "alerts";

/// Alerts waiting for delivery before new ones are dropped
pub const DELIVERY_QUEUE_SIZE: usize = 256;

/// Drains `inbox` until every sender is gone
pub(super) async fn run(
    channels: Vec<Arc<dyn Channel>>,
    executor: Arc<Executor>,
    mut inbox: mpsc::Receiver<PerformanceAlert>,
) {
    while let Some(alert) = inbox.recv().await {
        // failures of delivery itself stay local, or a dead webhook would
        // feed itself new alerts
        if is_delivery_alert(&alert) {
            debug!(key = %alert.key, "Delivery alert kept local");
            continue;
        }
        for channel in &channels {
            deliver(channel.as_ref(), &executor, &alert).await;
        }
    }
    debug!("Alert delivery worker stopped");
}

async fn deliver(channel: &dyn Channel, executor: &Executor, alert: &PerformanceAlert) {
    let ctx = OperationContext::new(DELIVERY_SERVICE, channel.name())
        .with_policy(executor.config().default_policy.clone())
        .with_job_id(&alert.id);

    match executor
        .execute_with_retry(&ctx, || async { Ok(channel.send(alert).await?) })
        .await
    {
        Ok(()) => debug!(channel = channel.name(), alert_id = %alert.id, "Alert delivered"),
        Err(e) => warn!(channel = channel.name(), alert_id = %alert.id, error = %e, "Alert not delivered"),
    }
}

fn is_delivery_alert(alert: &PerformanceAlert) -> bool {
    let prefix = format!("{DELIVERY_SERVICE}:");
    alert
        .key
        .split_once(':')
        .is_some_and(|(_, scope)| scope.starts_with(&prefix))
}
