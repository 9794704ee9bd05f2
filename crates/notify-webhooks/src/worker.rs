//! Background runner.
//!
//! Consumes published events (fan-out through the [`Dispatcher`]) and due
//! delivery tasks (attempts through the [`DeliveryWorker`]), each on its own
//! spawned task, bounded by a semaphore. On start it re-schedules every
//! unfinished delivery so retries survive restarts.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, Semaphore};

use crate::error::WebhookError;
use crate::models::DeliveryStatus;
use crate::repository::DeliveryRepository;
use crate::scheduler::{DeliveryScheduler, DeliveryTask, TaskTrigger};
use crate::services::delivery_worker::DeliveryWorker;
use crate::services::dispatcher::Dispatcher;
use crate::services::event_publisher::WebhookEvent;

pub struct WebhookWorker {
    dispatcher: Dispatcher,
    delivery_worker: DeliveryWorker,
    deliveries: Arc<dyn DeliveryRepository>,
    scheduler: Arc<dyn DeliveryScheduler>,
    events: broadcast::Receiver<WebhookEvent>,
    tasks: mpsc::UnboundedReceiver<DeliveryTask>,
    concurrency: usize,
}

impl WebhookWorker {
    #[must_use]
    pub fn new(
        dispatcher: Dispatcher,
        delivery_worker: DeliveryWorker,
        deliveries: Arc<dyn DeliveryRepository>,
        scheduler: Arc<dyn DeliveryScheduler>,
        events: broadcast::Receiver<WebhookEvent>,
        tasks: mpsc::UnboundedReceiver<DeliveryTask>,
        concurrency: usize,
    ) -> Self {
        Self {
            dispatcher,
            delivery_worker,
            deliveries,
            scheduler,
            events,
            tasks,
            concurrency: concurrency.max(1),
        }
    }

    /// Re-schedule `pending` deliveries now and `retrying` ones at their
    /// `next_retry_at`. Returns how many were scheduled.
    pub async fn recover_unfinished(&self) -> Result<usize, WebhookError> {
        let unfinished = self.deliveries.list_unfinished().await?;
        let now = Utc::now();
        let mut scheduled = 0;

        for delivery in &unfinished {
            let delay = match (delivery.status, delivery.next_retry_at) {
                (DeliveryStatus::Retrying, Some(at)) => (at - now).to_std().unwrap_or_default(),
                _ => Duration::ZERO,
            };
            let task = DeliveryTask::for_delivery(delivery, TaskTrigger::Recovery);
            match self.scheduler.schedule(task, delay) {
                Ok(()) => scheduled += 1,
                Err(e) => tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %delivery.id,
                    error = %e,
                    "Failed to re-schedule unfinished delivery"
                ),
            }
        }

        Ok(scheduled)
    }

    /// Run until `shutdown` resolves, then wait for in-flight work.
    pub async fn run<F>(mut self, shutdown: F)
    where
        F: Future<Output = ()> + Send,
    {
        tracing::info!(
            target: "webhook_delivery",
            concurrency = self.concurrency,
            "Starting webhook worker"
        );

        match self.recover_unfinished().await {
            Ok(0) => {}
            Ok(count) => tracing::info!(
                target: "webhook_delivery",
                count,
                "Re-scheduled unfinished deliveries"
            ),
            Err(e) => tracing::error!(
                target: "webhook_delivery",
                error = %e,
                "Failed to recover unfinished deliveries"
            ),
        }

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut events_open = true;
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                () = &mut shutdown => {
                    tracing::info!(target: "webhook_delivery", "Webhook worker shutdown requested");
                    break;
                }
                received = self.events.recv(), if events_open => match received {
                    Ok(event) => self.spawn_dispatch(&semaphore, event).await,
                    Err(RecvError::Lagged(skipped)) => tracing::warn!(
                        target: "webhook_delivery",
                        skipped,
                        "Webhook worker lagged behind publisher; events dropped"
                    ),
                    Err(RecvError::Closed) => {
                        tracing::info!(target: "webhook_delivery", "Event publisher closed");
                        events_open = false;
                    }
                },
                task = self.tasks.recv() => match task {
                    Some(task) => self.spawn_attempt(&semaphore, task).await,
                    None => {
                        tracing::info!(target: "webhook_delivery", "Task channel closed");
                        break;
                    }
                },
            }
        }

        tracing::info!(target: "webhook_delivery", "Waiting for in-flight deliveries to complete...");
        let permits = u32::try_from(self.concurrency).unwrap_or(u32::MAX);
        let _ = semaphore.acquire_many(permits).await;
        tracing::info!(target: "webhook_delivery", "Webhook worker stopped");
    }

    async fn spawn_dispatch(&self, semaphore: &Arc<Semaphore>, event: WebhookEvent) {
        let Ok(permit) = Arc::clone(semaphore).acquire_owned().await else {
            return;
        };
        let dispatcher = self.dispatcher.clone();
        tokio::spawn(async move {
            let _permit = permit;
            if let Err(e) = dispatcher.dispatch(&event).await {
                tracing::error!(
                    target: "webhook_delivery",
                    event_id = %event.event_id,
                    event_type = %event.event_type,
                    tenant_id = %event.tenant_id,
                    error = %e,
                    "Event dispatch failed"
                );
            }
        });
    }

    async fn spawn_attempt(&self, semaphore: &Arc<Semaphore>, task: DeliveryTask) {
        let Ok(permit) = Arc::clone(semaphore).acquire_owned().await else {
            return;
        };
        let worker = self.delivery_worker.clone();
        tokio::spawn(async move {
            let _permit = permit;
            match worker.execute(task).await {
                Ok(outcome) => tracing::debug!(
                    target: "webhook_delivery",
                    delivery_id = %task.delivery_id,
                    outcome = ?outcome,
                    "Delivery task finished"
                ),
                Err(e) => tracing::error!(
                    target: "webhook_delivery",
                    delivery_id = %task.delivery_id,
                    attempt = task.attempt,
                    error = %e,
                    "Delivery task failed"
                ),
            }
        });
    }
}
