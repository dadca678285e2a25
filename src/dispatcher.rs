//! Batch dispatcher.
//!
//! Owns one transfer engine and one multiplexer and runs a single-threaded
//! reactor loop over them:
//!
//! ```text
//! submit all ─► sync ─► wait(deadline) ─┬─ nothing ready ─► drive(timeout)
//!                  ▲                    └─ ready fds ─────► drive(fd), re-arm fd
//!                  └──── drain completions, report failures ◄──┘
//! ```
//!
//! The loop ends when no submitted request is left in flight.

use crate::adapter::{Adapter, Deadline};
use crate::config::Config;
use crate::engine::{
    Completion, CurlEngine, DriveTarget, Readiness, Request, TransferEngine, TransferId,
};
use crate::error::InitError;
use crate::metrics::{
    BATCHES, IN_FLIGHT, REQUESTS_FAILED, REQUESTS_SUBMITTED, REQUESTS_SUCCEEDED, SUBMIT_ERRORS,
    WAIT_TIMEOUTS,
};
use crate::multiplexer::{MioMultiplexer, Multiplexer};
use crate::outcome::{LogReporter, Outcome, OutcomeReporter, TransferStatus};
use std::collections::HashMap;
use std::io;
use std::time::Instant;
use tracing::{debug, warn};

/// Sends batches of requests and waits for every one of them to finish.
///
/// Reusable across batches; the engine's connection pool is kept between
/// them.
pub struct Dispatcher<E = CurlEngine, M = MioMultiplexer, R = LogReporter> {
    engine: E,
    multiplexer: M,
    adapter: Adapter,
    reporter: R,
    /// Transfer -> position in the current batch.
    in_flight: HashMap<TransferId, usize>,
    active: usize,
    ready: Vec<Readiness>,
    completions: Vec<Completion>,
    batches: u64,
}

impl Dispatcher {
    /// Acquire a multiplexer and a libcurl engine configured from `config`,
    /// logging failed pushes.
    pub fn init(config: &Config) -> Result<Self, InitError> {
        Self::with_reporter(config, LogReporter::new())
    }
}

impl<R: OutcomeReporter> Dispatcher<CurlEngine, MioMultiplexer, R> {
    /// Like [`Dispatcher::init`], delivering failed outcomes to `reporter`.
    pub fn with_reporter(config: &Config, reporter: R) -> Result<Self, InitError> {
        config
            .validate()
            .map_err(|e| InitError::Config(e.to_string()))?;
        let multiplexer = MioMultiplexer::with_capacity(config.dispatcher.event_capacity)?;
        let engine = CurlEngine::new(&config.engine, config.apns.headers())?;
        Ok(Self::new(
            engine,
            multiplexer,
            reporter,
            config.dispatcher.deadline(),
        ))
    }
}

impl<E, M, R> Dispatcher<E, M, R>
where
    E: TransferEngine,
    M: Multiplexer,
    R: OutcomeReporter,
{
    pub fn new(engine: E, multiplexer: M, reporter: R, deadline: Deadline) -> Self {
        Self {
            engine,
            multiplexer,
            adapter: Adapter::new(deadline),
            reporter,
            in_flight: HashMap::new(),
            active: 0,
            ready: Vec::new(),
            completions: Vec::new(),
            batches: 0,
        }
    }

    /// Send every request and block until each has reached a terminal state.
    ///
    /// Outcomes are returned in request order. Failures are handed to the
    /// reporter as they happen, in completion order. A request the engine
    /// refuses is recorded as a transport error without affecting the rest.
    pub fn send_batch(&mut self, requests: &[Request]) -> Vec<Outcome> {
        // leftovers from a batch that unwound refer to the old request slice
        if !self.in_flight.is_empty() {
            let abandoned = self.abandon();
            warn!(abandoned, "abandoned transfers left over from a previous batch");
        }

        if requests.is_empty() {
            return Vec::new();
        }

        self.batches += 1;
        BATCHES.increment();
        let started = Instant::now();
        let mut outcomes: Vec<Option<Outcome>> = vec![None; requests.len()];

        for (index, request) in requests.iter().enumerate() {
            match self.engine.submit(request) {
                Ok(id) => {
                    self.in_flight.insert(id, index);
                    self.active += 1;
                    REQUESTS_SUBMITTED.increment();
                    IN_FLIGHT.increment();
                }
                Err(e) => {
                    SUBMIT_ERRORS.increment();
                    let mut outcome = Outcome::new(&request.url, TransferStatus::TransportError);
                    outcome.engine_code = e.code();
                    outcome.detail = Some(e.to_string());
                    self.record(outcome, index, &mut outcomes);
                }
            }
        }
        debug!(
            batch = self.batches,
            requests = requests.len(),
            submitted = self.active,
            "batch submitted"
        );

        self.adapter.sync(&mut self.engine, &mut self.multiplexer);
        if self.adapter.take_immediate_tick() {
            self.drive(DriveTarget::Timeout, requests, &mut outcomes);
        }

        while self.active > 0 {
            let mut ready = std::mem::take(&mut self.ready);
            match self.multiplexer.wait(self.adapter.timeout(), &mut ready) {
                Ok(()) => {}
                // a signal interrupted the wait, service timers instead
                Err(e) if e.kind() == io::ErrorKind::Interrupted => ready.clear(),
                Err(e) => {
                    // sleep out the timeout, a failing poll must not spin
                    warn!(error = %e, "wait failed");
                    ready.clear();
                    std::thread::sleep(self.adapter.timeout());
                }
            }

            if ready.is_empty() {
                WAIT_TIMEOUTS.increment();
                self.drive(DriveTarget::Timeout, requests, &mut outcomes);
            } else {
                for readiness in &ready {
                    self.drive(DriveTarget::Socket(*readiness), requests, &mut outcomes);
                    self.adapter.rearm(readiness.fd, &mut self.multiplexer);
                }
            }
            self.ready = ready;
        }

        debug!(
            batch = self.batches,
            requests = requests.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch complete"
        );

        outcomes
            .into_iter()
            .enumerate()
            .map(|(index, outcome)| {
                outcome.unwrap_or_else(|| {
                    let mut outcome =
                        Outcome::new(&requests[index].url, TransferStatus::TransportError);
                    outcome.detail = Some("abandoned".to_string());
                    outcome
                })
            })
            .collect()
    }

    /// Release the engine and the multiplexer.
    ///
    /// Transfers still in flight, possible only if a batch was interrupted by
    /// a panic, are abandoned without waiting. The next `send_batch` does the
    /// same.
    pub fn deinit(mut self) {
        let abandoned = self.abandon();
        self.adapter.clear(&mut self.multiplexer);
        debug!(batches = self.batches, abandoned, "dispatcher shut down");
    }

    /// Requests of the current batch that are not yet terminal.
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn batches(&self) -> u64 {
        self.batches
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn multiplexer(&self) -> &M {
        &self.multiplexer
    }

    pub fn adapter(&self) -> &Adapter {
        &self.adapter
    }

    pub fn reporter(&self) -> &R {
        &self.reporter
    }

    /// Release every transfer still in flight and reset the active count.
    fn abandon(&mut self) -> usize {
        let abandoned = self.in_flight.len();
        for (id, _) in self.in_flight.drain() {
            self.engine.release(id);
            IN_FLIGHT.decrement();
        }
        self.active = 0;
        abandoned
    }

    /// Drive the engine once, plus one immediate tick if the engine asked
    /// for it while being driven. A zero deadline from that extra tick waits
    /// for the floor instead of chaining further ticks.
    fn drive(
        &mut self,
        target: DriveTarget,
        requests: &[Request],
        outcomes: &mut [Option<Outcome>],
    ) {
        self.drive_once(target, requests, outcomes);
        if self.adapter.take_immediate_tick() {
            self.drive_once(DriveTarget::Timeout, requests, outcomes);
            self.adapter.take_immediate_tick();
        }
    }

    fn drive_once(
        &mut self,
        target: DriveTarget,
        requests: &[Request],
        outcomes: &mut [Option<Outcome>],
    ) {
        let mut completions = std::mem::take(&mut self.completions);
        if let Err(e) = self.engine.drive(target, &mut completions) {
            warn!(?target, error = %e, "engine drive failed");
        }
        self.adapter.sync(&mut self.engine, &mut self.multiplexer);

        for completion in completions.drain(..) {
            self.finish(completion, requests, outcomes);
        }
        self.completions = completions;
    }

    fn finish(
        &mut self,
        completion: Completion,
        requests: &[Request],
        outcomes: &mut [Option<Outcome>],
    ) {
        let Some(index) = self.in_flight.remove(&completion.id) else {
            warn!(id = completion.id.as_usize(), "completion for unknown transfer");
            return;
        };
        self.active -= 1;
        IN_FLIGHT.decrement();
        self.engine.release(completion.id);

        let mut outcome = Outcome::new(&requests[index].url, completion.status);
        outcome.http_status = completion.http_status;
        outcome.engine_code = completion.engine_code;
        outcome.detail = completion.detail;
        self.record(outcome, index, outcomes);
    }

    fn record(&mut self, outcome: Outcome, index: usize, outcomes: &mut [Option<Outcome>]) {
        if outcome.is_success() {
            REQUESTS_SUCCEEDED.increment();
        } else {
            REQUESTS_FAILED.increment();
            self.reporter.report(&outcome);
        }
        outcomes[index] = Some(outcome);
    }
}
