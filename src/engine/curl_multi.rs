//! Transfer engine backed by libcurl's multi-socket interface.
//!
//! libcurl announces socket interest and timer changes through callbacks
//! that run synchronously inside `add2`, `action` and `timeout`. The
//! callbacks only record what they were told; the dispatcher collects it
//! through [`TransferEngine::take_interest_changes`] and
//! [`TransferEngine::take_deadline`] once the call returns.

use super::{
    Completion, DriveTarget, Interest, InterestChange, Request, TransferEngine, TransferId,
};
use crate::config::EngineConfig;
use crate::error::{DriveError, InitError, SubmitError};
use crate::outcome::TransferStatus;
use curl::easy::{Easy2, Handler, HttpVersion, InfoType, List, WriteError};
use curl::multi::{Easy2Handle, Events, Multi};
use parking_lot::Mutex;
use serde::Deserialize;
use slab::Slab;
use std::sync::Arc;
use std::time::Duration;
use tracing::trace;

/// Response bodies beyond this are truncated. APNs error bodies are tiny.
const MAX_BODY_LEN: usize = 4096;

/// Collects the response body and forwards verbose output to tracing.
struct Collector {
    body: Vec<u8>,
}

impl Handler for Collector {
    fn write(&mut self, data: &[u8]) -> Result<usize, WriteError> {
        let room = MAX_BODY_LEN.saturating_sub(self.body.len());
        self.body.extend_from_slice(&data[..data.len().min(room)]);
        Ok(data.len())
    }

    fn debug(&mut self, kind: InfoType, data: &[u8]) {
        match kind {
            InfoType::Text => trace!(target: "curl", "* {}", String::from_utf8_lossy(data).trim_end()),
            InfoType::HeaderOut => {
                trace!(target: "curl", "=> send header {}", String::from_utf8_lossy(data).trim_end())
            }
            InfoType::HeaderIn => {
                trace!(target: "curl", "<= recv header {}", String::from_utf8_lossy(data).trim_end())
            }
            InfoType::DataOut => trace!(target: "curl", bytes = data.len(), "=> send data"),
            InfoType::DataIn => trace!(target: "curl", bytes = data.len(), "<= recv data"),
            InfoType::SslDataOut => trace!(target: "curl", bytes = data.len(), "=> send ssl data"),
            InfoType::SslDataIn => trace!(target: "curl", bytes = data.len(), "<= recv ssl data"),
            _ => {}
        }
    }
}

/// APNs error document, e.g. `{"reason":"BadDeviceToken"}`.
#[derive(Deserialize)]
struct ApnsError {
    reason: String,
}

fn apns_reason(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<ApnsError>(body)
        .ok()
        .map(|e| e.reason)
}

/// Signals recorded by the libcurl callbacks.
#[derive(Default)]
struct Signals {
    changes: Vec<InterestChange>,
    deadline: Option<Option<Duration>>,
}

enum Transfer {
    Active(Easy2Handle<Collector>),
    /// Terminal, waiting for `release`.
    Done,
}

/// libcurl multi handle with its in-flight transfers.
///
/// The connection pool lives inside the multi handle and is reused across
/// batches for as long as the engine exists.
pub struct CurlEngine {
    transfers: Slab<Transfer>,
    multi: Multi,
    signals: Arc<Mutex<Signals>>,
    headers: Vec<String>,
    config: EngineConfig,
}

impl CurlEngine {
    /// Create a multi handle configured with the connection and stream bounds.
    ///
    /// `headers` are attached to every request.
    pub fn new(config: &EngineConfig, headers: Vec<String>) -> Result<Self, InitError> {
        let signals = Arc::new(Mutex::new(Signals::default()));
        let mut multi = Multi::new();

        let socket_signals = signals.clone();
        multi.socket_function(move |socket, events, _| {
            let change = if events.remove() {
                InterestChange::Unwatch(socket)
            } else if events.input_and_output() {
                InterestChange::Watch(socket, Interest::Both)
            } else if events.input() {
                InterestChange::Watch(socket, Interest::Readable)
            } else if events.output() {
                InterestChange::Watch(socket, Interest::Writable)
            } else {
                InterestChange::Unwatch(socket)
            };
            socket_signals.lock().changes.push(change);
        })?;

        let timer_signals = signals.clone();
        multi.timer_function(move |timeout| {
            timer_signals.lock().deadline = Some(timeout);
            true
        })?;

        multi.pipelining(false, true)?;
        multi.set_max_host_connections(config.max_host_connections)?;
        multi.set_max_concurrent_streams(config.max_streams_per_connection)?;

        let mut headers = headers;
        headers.extend(config.headers.iter().cloned());

        Ok(Self {
            transfers: Slab::new(),
            multi,
            signals,
            headers,
            config: config.clone(),
        })
    }

    /// Transfers submitted and not yet released.
    pub fn transfer_count(&self) -> usize {
        self.transfers.len()
    }

    fn prepare(&self, request: &Request) -> Result<Easy2<Collector>, SubmitError> {
        let mut easy = Easy2::new(Collector { body: Vec::new() });
        easy.url(&request.url)?;
        easy.post(true)?;
        easy.post_fields_copy(&request.body)?;
        if self.config.http2 {
            // h2 through ALPN on https, plain http stays on HTTP/1.1
            easy.http_version(HttpVersion::V2TLS)?;
        }
        easy.pipewait(self.config.pipewait)?;
        easy.connect_timeout(Duration::from_millis(self.config.connect_timeout_ms))?;
        if self.config.transfer_timeout_ms > 0 {
            easy.timeout(Duration::from_millis(self.config.transfer_timeout_ms))?;
        }

        if let Some(cert) = &request.client_cert {
            easy.ssl_cert(&cert.path)?;
            if let Some(password) = &cert.password {
                easy.key_password(password)?;
            }
        }

        let mut list = List::new();
        for header in &self.headers {
            list.append(header)?;
        }
        easy.http_headers(list)?;

        if self.config.verbose {
            easy.verbose(true)?;
        }
        Ok(easy)
    }

    fn collect(&mut self, completions: &mut Vec<Completion>) {
        let mut finished = Vec::new();
        self.multi.messages(|message| {
            if let Ok(token) = message.token()
                && let Some(result) = message.result()
            {
                finished.push((token, result));
            }
        });

        for (token, result) in finished {
            let Some(slot) = self.transfers.get_mut(token) else {
                continue;
            };
            let Transfer::Active(handle) = std::mem::replace(slot, Transfer::Done) else {
                continue;
            };
            let id = TransferId(token);

            let easy = match self.multi.remove2(handle) {
                Ok(easy) => easy,
                Err(e) => {
                    completions.push(Completion {
                        engine_code: Some(e.code() as i32),
                        ..Completion::transport_error(id, e.to_string())
                    });
                    continue;
                }
            };
            completions.push(complete(id, result, easy));
        }
    }
}

fn complete(
    id: TransferId,
    result: Result<(), curl::Error>,
    mut easy: Easy2<Collector>,
) -> Completion {
    if let Err(e) = result {
        let status = if e.is_http2_error() || e.is_http2_stream_error() {
            TransferStatus::ProtocolError
        } else {
            TransferStatus::TransportError
        };
        return Completion {
            id,
            status,
            http_status: None,
            engine_code: Some(e.code() as i32),
            detail: Some(e.to_string()),
        };
    }

    match easy.response_code() {
        Ok(0) => Completion::transport_error(id, "no response status"),
        Ok(code) => {
            let mut completion = Completion::ok(id, code);
            if code != 200 {
                completion.detail = apns_reason(&easy.get_ref().body);
            }
            completion
        }
        Err(e) => Completion {
            engine_code: Some(e.code() as i32),
            ..Completion::transport_error(id, e.to_string())
        },
    }
}

impl TransferEngine for CurlEngine {
    fn submit(&mut self, request: &Request) -> Result<TransferId, SubmitError> {
        let easy = self.prepare(request)?;

        let entry = self.transfers.vacant_entry();
        let key = entry.key();
        let mut handle = self.multi.add2(easy)?;
        if let Err(e) = handle.set_token(key) {
            let _ = self.multi.remove2(handle);
            return Err(e.into());
        }
        entry.insert(Transfer::Active(handle));
        Ok(TransferId(key))
    }

    fn drive(
        &mut self,
        target: DriveTarget,
        completions: &mut Vec<Completion>,
    ) -> Result<(), DriveError> {
        let result = match target {
            DriveTarget::Timeout => self.multi.timeout(),
            DriveTarget::Socket(ready) => {
                let mut events = Events::new();
                events
                    .input(ready.readable)
                    .output(ready.writable)
                    .error(ready.error);
                self.multi.action(ready.fd, &events)
            }
        };
        // completions are gathered even when the action reported an error
        self.collect(completions);
        result.map(|_| ()).map_err(DriveError::from)
    }

    fn take_interest_changes(&mut self, changes: &mut Vec<InterestChange>) {
        changes.append(&mut self.signals.lock().changes);
    }

    fn take_deadline(&mut self) -> Option<Option<Duration>> {
        self.signals.lock().deadline.take()
    }

    fn release(&mut self, id: TransferId) {
        if let Some(Transfer::Active(handle)) = self.transfers.try_remove(id.0)
            && let Err(e) = self.multi.remove2(handle)
        {
            trace!(id = id.0, error = %e, "failed to remove abandoned transfer");
        }
    }
}
