//! Per-request outcomes and their reporting.

use chrono::{DateTime, Utc};
use std::fmt;

/// How far a transfer got.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TransferStatus {
    /// The exchange completed and a response status is available.
    Ok,
    /// Connection, TLS or timeout failure, or the request never started.
    TransportError,
    /// The HTTP/2 session or stream failed mid-exchange.
    ProtocolError,
}

impl TransferStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Ok => "ok",
            TransferStatus::TransportError => "transport_error",
            TransferStatus::ProtocolError => "protocol_error",
        }
    }
}

impl fmt::Display for TransferStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification of an outcome. Only a completed exchange answered with
/// `200` counts as success.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Success,
    StatusMismatch(u32),
    TransportError,
    ProtocolError,
}

/// Terminal result of one request, produced exactly once.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outcome {
    pub url: String,
    pub observed_at: DateTime<Utc>,
    pub transfer_status: TransferStatus,
    pub http_status: Option<u32>,
    pub engine_code: Option<i32>,
    /// Engine error text, or the APNs `reason` for a rejected push.
    pub detail: Option<String>,
}

impl Outcome {
    pub fn new(url: impl Into<String>, transfer_status: TransferStatus) -> Self {
        Self {
            url: url.into(),
            observed_at: Utc::now(),
            transfer_status,
            http_status: None,
            engine_code: None,
            detail: None,
        }
    }

    pub fn verdict(&self) -> Verdict {
        match (self.transfer_status, self.http_status) {
            (TransferStatus::Ok, Some(200)) => Verdict::Success,
            (TransferStatus::Ok, Some(code)) => Verdict::StatusMismatch(code),
            // completed without a status line is not something we can trust
            (TransferStatus::Ok, None) => Verdict::TransportError,
            (TransferStatus::TransportError, _) => Verdict::TransportError,
            (TransferStatus::ProtocolError, _) => Verdict::ProtocolError,
        }
    }

    pub fn is_success(&self) -> bool {
        self.verdict() == Verdict::Success
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "time: {}, url: {}, status: {}",
            self.observed_at.to_rfc3339(),
            self.url,
            self.transfer_status
        )?;
        if let Some(code) = self.engine_code {
            write!(f, ", engine code: {code}")?;
        }
        if let Some(code) = self.http_status {
            write!(f, ", http code: {code}")?;
        }
        if let Some(detail) = &self.detail {
            write!(f, ", detail: {detail}")?;
        }
        Ok(())
    }
}

/// Receives failed outcomes as they are produced.
///
/// Called from inside the event loop, so implementations must return
/// promptly.
pub trait OutcomeReporter {
    fn report(&mut self, outcome: &Outcome);
}

impl<F: FnMut(&Outcome)> OutcomeReporter for F {
    fn report(&mut self, outcome: &Outcome) {
        self(outcome)
    }
}

/// Reporter that emits one `warn` event per failed request.
#[derive(Debug, Default)]
pub struct LogReporter {
    sequence: u64,
}

impl LogReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of outcomes reported by this instance.
    pub fn reported(&self) -> u64 {
        self.sequence
    }
}

impl OutcomeReporter for LogReporter {
    fn report(&mut self, outcome: &Outcome) {
        self.sequence += 1;
        tracing::warn!(
            seq = self.sequence,
            url = %outcome.url,
            time = %outcome.observed_at.to_rfc3339(),
            status = %outcome.transfer_status,
            engine_code = ?outcome.engine_code,
            http_code = ?outcome.http_status,
            detail = outcome.detail.as_deref().unwrap_or(""),
            "push failed"
        );
    }
}
