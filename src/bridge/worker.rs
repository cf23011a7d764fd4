//! Delivery workers draining the message queue
//!
//! Each worker takes one message at a time and runs it through the controller. The
//! processing itself runs on a separate task so a panic is contained: the join error
//! becomes a reported fault and the worker moves on to the next message.

use super::controller::BridgeController;
use std::any::Any;
use std::sync::Arc;
use tokio::task::{JoinError, JoinHandle};
use tracing::debug;

/// Spawn `count` workers (at least one) sharing the controller's queue
pub fn spawn_workers(count: usize, controller: Arc<BridgeController>) -> Vec<JoinHandle<()>> {
    (0..count.max(1))
        .map(|worker_id| {
            let controller = controller.clone();
            tokio::spawn(run_worker(worker_id, controller))
        })
        .collect()
}

async fn run_worker(worker_id: usize, controller: Arc<BridgeController>) {
    let queue = controller.queue();
    debug!(worker_id, "Delivery worker started");

    // Ends once the queue is closed and drained
    while let Some(message) = queue.pop().await {
        let sequence = message.sequence;
        let task_controller = controller.clone();
        let task = tokio::spawn(async move {
            task_controller.process_message(&message).await;
        });

        if let Err(e) = task.await {
            controller.report_fault(Some(sequence), describe_join_error(e));
        }
    }

    debug!(worker_id, "Delivery worker stopped");
}

fn describe_join_error(error: JoinError) -> String {
    if error.is_panic() {
        format!("processing panicked: {}", panic_message(error.into_panic()))
    } else {
        format!("processing task failed: {error}")
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
