//! Dispatcher metrics.

use metriken::{Counter, Gauge, metric};

/// Batches sent.
#[metric(name = "dispatch_batches")]
pub static BATCHES: Counter = Counter::new();

/// Requests accepted by the transfer engine.
#[metric(name = "dispatch_requests_submitted")]
pub static REQUESTS_SUBMITTED: Counter = Counter::new();

/// Requests the transfer engine refused to start.
#[metric(name = "dispatch_submit_errors")]
pub static SUBMIT_ERRORS: Counter = Counter::new();

/// Requests answered with HTTP 200.
#[metric(name = "dispatch_requests_succeeded")]
pub static REQUESTS_SUCCEEDED: Counter = Counter::new();

/// Requests that ended in any other way.
#[metric(name = "dispatch_requests_failed")]
pub static REQUESTS_FAILED: Counter = Counter::new();

/// Waits that ended without a ready descriptor.
#[metric(name = "dispatch_wait_timeouts")]
pub static WAIT_TIMEOUTS: Counter = Counter::new();

/// Requests submitted but not yet terminal.
#[metric(name = "dispatch_in_flight")]
pub static IN_FLIGHT: Gauge = Gauge::new();
