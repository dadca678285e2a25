//! apns-dispatch - batched push delivery over multiplexed HTTP/2.
//!
//! A [`Dispatcher`] hands a batch of push requests to libcurl's multi
//! interface, drives it from a single epoll/kqueue loop, and returns once
//! every request has finished. Connections are bounded per host and shared
//! by many concurrent HTTP/2 streams; the pool survives across batches.
//!
//! # Example
//!
//! ```no_run
//! use apns_dispatch::{Config, Dispatcher, Request};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::default();
//! let cert = config.apns.client_cert();
//! let mut dispatcher = Dispatcher::init(&config)?;
//!
//! let batch: Vec<Request> = ["token-a", "token-b"]
//!     .iter()
//!     .map(|token| {
//!         Request::apns(config.apns.host(), token, r#"{"aps":{"alert":"hi"}}"#, cert.clone())
//!     })
//!     .collect();
//!
//! for outcome in dispatcher.send_batch(&batch) {
//!     println!("{} -> {:?}", outcome.url, outcome.verdict());
//! }
//! dispatcher.deinit();
//! # Ok(())
//! # }
//! ```
//!
//! The engine and the multiplexer are traits, so the loop can be driven by
//! other implementations, e.g. scripted ones in tests.

pub mod adapter;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod multiplexer;
pub mod outcome;

pub mod logging;
pub mod signal;

pub use config::Config;
pub use dispatcher::Dispatcher;
pub use engine::{ClientCert, Request, TransferEngine};
pub use error::{ConfigError, DriveError, InitError, SubmitError};
pub use multiplexer::{MioMultiplexer, Multiplexer};
pub use outcome::{LogReporter, Outcome, OutcomeReporter, TransferStatus, Verdict};
