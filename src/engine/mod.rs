//! Transfer engine boundary.
//!
//! The dispatcher talks to whatever performs the network transfers through
//! the five operations of [`TransferEngine`]. The engine never blocks; it
//! reports which descriptors it wants watched and when it next needs to be
//! ticked, and the dispatcher drives it when either becomes due.

pub mod curl_multi;

use crate::error::{DriveError, SubmitError};
use crate::outcome::TransferStatus;
use std::os::unix::io::RawFd;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub use curl_multi::CurlEngine;

/// A descriptor the engine asked to have watched.
pub type Descriptor = RawFd;

/// Opaque identifier for a submitted transfer.
///
/// Valid from a successful [`TransferEngine::submit`] until the matching
/// [`TransferEngine::release`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransferId(pub(crate) usize);

impl TransferId {
    /// Create a transfer ID from a raw value.
    ///
    /// This is primarily useful for engine implementations outside this crate.
    #[inline]
    pub fn new(id: usize) -> Self {
        Self(id)
    }

    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// Client certificate presented during the TLS handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientCert {
    /// Path to a PEM file holding the certificate and its private key.
    pub path: PathBuf,
    pub password: Option<String>,
}

/// One push request. Immutable once submitted.
#[derive(Debug, Clone)]
pub struct Request {
    pub url: String,
    pub body: Vec<u8>,
    /// Shared across a batch; most batches use a single credential.
    pub client_cert: Option<Arc<ClientCert>>,
}

impl Request {
    pub fn new(url: impl Into<String>, body: impl Into<Vec<u8>>) -> Self {
        Self {
            url: url.into(),
            body: body.into(),
            client_cert: None,
        }
    }

    /// Build a request addressed to one device on an APNs host.
    pub fn apns(
        host: &str,
        device_token: &str,
        payload: impl Into<Vec<u8>>,
        cert: Option<Arc<ClientCert>>,
    ) -> Self {
        Self {
            url: format!("https://{host}/3/device/{device_token}"),
            body: payload.into(),
            client_cert: cert,
        }
    }
}

/// Interest the engine has in a descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Readable,
    Writable,
    Both,
}

/// Requested change to the watch state of one descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterestChange {
    Watch(Descriptor, Interest),
    Unwatch(Descriptor),
}

/// Readiness reported for one descriptor by the multiplexer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Readiness {
    pub fd: Descriptor,
    pub readable: bool,
    pub writable: bool,
    pub error: bool,
}

impl Readiness {
    pub fn readable(fd: Descriptor) -> Self {
        Self {
            fd,
            readable: true,
            writable: false,
            error: false,
        }
    }

    pub fn writable(fd: Descriptor) -> Self {
        Self {
            fd,
            readable: false,
            writable: true,
            error: false,
        }
    }
}

/// What a single drive call should service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriveTarget {
    /// Synthetic tick not tied to any descriptor.
    Timeout,
    Socket(Readiness),
}

/// A transfer reached its terminal state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    pub id: TransferId,
    pub status: TransferStatus,
    pub http_status: Option<u32>,
    /// Engine-specific status code (libcurl's `CURLcode` for the curl engine).
    pub engine_code: Option<i32>,
    /// Human readable failure detail from the engine or the server.
    pub detail: Option<String>,
}

impl Completion {
    pub fn ok(id: TransferId, http_status: u32) -> Self {
        Self {
            id,
            status: TransferStatus::Ok,
            http_status: Some(http_status),
            engine_code: None,
            detail: None,
        }
    }

    pub fn transport_error(id: TransferId, detail: impl Into<String>) -> Self {
        Self {
            id,
            status: TransferStatus::TransportError,
            http_status: None,
            engine_code: None,
            detail: Some(detail.into()),
        }
    }
}

/// Non-blocking transfer engine driven by the dispatcher's event loop.
///
/// Implementations queue interest and timer changes as they arise, including
/// synchronously inside `submit` and `drive`, and hand them over through
/// [`take_interest_changes`](Self::take_interest_changes) and
/// [`take_deadline`](Self::take_deadline).
pub trait TransferEngine {
    /// Hand a request to the engine. Never blocks on the network.
    fn submit(&mut self, request: &Request) -> Result<TransferId, SubmitError>;

    /// Service a ready descriptor or a timeout tick, appending any transfers
    /// that became terminal to `completions`.
    fn drive(
        &mut self,
        target: DriveTarget,
        completions: &mut Vec<Completion>,
    ) -> Result<(), DriveError>;

    /// Drain interest changes emitted since the last call, in emission order.
    fn take_interest_changes(&mut self, changes: &mut Vec<InterestChange>);

    /// The most recent deadline reported since the last call, if any.
    ///
    /// The outer `Option` is `None` when no new deadline was reported. An
    /// inner `None` means the engine has no pending timer.
    fn take_deadline(&mut self) -> Option<Option<Duration>>;

    /// Release a transfer. For a transfer still in flight this abandons it.
    fn release(&mut self, id: TransferId);
}
