//! Bridge core: queueing, per-message processing, workers and lifecycle
//!
//! ```text
//! connector task ──on_message──▶ MessageQueue ──pop──▶ worker(s) ──▶ validate ──▶ deliver
//!                                                                        │
//!                                                                   StatusSink
//! ```

pub mod controller;
pub mod lifecycle;
pub mod queue;
pub mod report;
pub mod worker;

pub use controller::{BridgeController, MessageDisposition};
pub use lifecycle::{BridgeLifecycle, LifecycleError, DEFAULT_DRAIN_TIMEOUT};
pub use queue::{MessageQueue, PushOutcome};
pub use report::{StatusEvent, StatusSink, TracingStatusSink};
pub use worker::spawn_workers;
