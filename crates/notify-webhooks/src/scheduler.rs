//! Delayed execution of delivery attempts.
//!
//! The delivery worker is the only place that computes delays; it hands a
//! [`DeliveryTask`] and the delay to a [`DeliveryScheduler`] and forgets about
//! it. The task is re-checked against the persisted row when it runs, so a
//! task that was overtaken (manual retry, restart recovery) is dropped.

use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::WebhookError;
use crate::models::{DeliveryStatus, WebhookDelivery};

/// What caused a task to be scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskTrigger {
    /// First attempt right after fan-out.
    Dispatch,
    /// Next attempt after a failure, per the backoff schedule.
    Retry,
    /// Operator asked to try again now.
    Manual,
    /// Re-scheduled when the runner started.
    Recovery,
}

/// One pending invocation of the delivery worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeliveryTask {
    pub tenant_id: Uuid,
    pub delivery_id: Uuid,
    /// Attempt number this task was scheduled for.
    pub attempt: i32,
    pub trigger: TaskTrigger,
}

impl DeliveryTask {
    #[must_use]
    pub fn for_delivery(delivery: &WebhookDelivery, trigger: TaskTrigger) -> Self {
        Self {
            tenant_id: delivery.tenant_id,
            delivery_id: delivery.id,
            attempt: delivery.attempt,
            trigger,
        }
    }

    /// Whether the task still applies to the current state of `delivery`.
    ///
    /// Automatic tasks only run `pending`/`retrying` rows; manual tasks may
    /// also re-run a `failed` row. Nothing re-runs a `success`.
    #[must_use]
    pub fn is_current(&self, delivery: &WebhookDelivery) -> bool {
        if delivery.attempt != self.attempt {
            return false;
        }
        match self.trigger {
            TaskTrigger::Manual => delivery.status != DeliveryStatus::Success,
            _ => !delivery.status.is_terminal(),
        }
    }
}

/// Runs a delivery task after a delay.
pub trait DeliveryScheduler: Send + Sync {
    /// # Errors
    ///
    /// Returns `WebhookError::Scheduler` if the task can no longer be accepted.
    fn schedule(&self, task: DeliveryTask, delay: Duration) -> Result<(), WebhookError>;
}

/// In-process scheduler: due tasks are sent over an mpsc channel to the runner.
///
/// Timers live in the runtime; tasks still waiting when the process stops are
/// recovered from the `pending`/`retrying` rows on the next start.
#[derive(Clone)]
pub struct TokioScheduler {
    sender: mpsc::UnboundedSender<DeliveryTask>,
}

impl TokioScheduler {
    /// Create a scheduler and the receiver due tasks arrive on.
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<DeliveryTask>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl DeliveryScheduler for TokioScheduler {
    fn schedule(&self, task: DeliveryTask, delay: Duration) -> Result<(), WebhookError> {
        if self.sender.is_closed() {
            return Err(WebhookError::Scheduler("task channel closed".to_string()));
        }

        if delay.is_zero() {
            return self
                .sender
                .send(task)
                .map_err(|e| WebhookError::Scheduler(e.to_string()));
        }

        let sender = self.sender.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if sender.send(task).is_err() {
                tracing::debug!(
                    target: "webhook_delivery",
                    delivery_id = %task.delivery_id,
                    attempt = task.attempt,
                    "Runner stopped before scheduled task became due"
                );
            }
        });
        Ok(())
    }
}

/// Scheduler that only records what it was asked to do (for tests and dry runs).
#[derive(Debug, Default)]
pub struct RecordingScheduler {
    scheduled: Mutex<Vec<(DeliveryTask, Duration)>>,
}

impl RecordingScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Everything scheduled so far, in order.
    pub fn scheduled(&self) -> Vec<(DeliveryTask, Duration)> {
        self.scheduled.lock().expect("lock poisoned").clone()
    }

    /// Drain the recorded tasks.
    pub fn take(&self) -> Vec<(DeliveryTask, Duration)> {
        std::mem::take(&mut *self.scheduled.lock().expect("lock poisoned"))
    }

    pub fn len(&self) -> usize {
        self.scheduled.lock().expect("lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl DeliveryScheduler for RecordingScheduler {
    fn schedule(&self, task: DeliveryTask, delay: Duration) -> Result<(), WebhookError> {
        self.scheduled
            .lock()
            .expect("lock poisoned")
            .push((task, delay));
        Ok(())
    }
}
