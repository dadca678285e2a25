//! apns-dispatch binary.

use apns_dispatch::metrics::{
    REQUESTS_FAILED, REQUESTS_SUBMITTED, REQUESTS_SUCCEEDED, SUBMIT_ERRORS, WAIT_TIMEOUTS,
};
use apns_dispatch::{Config, Dispatcher, Request, Verdict};
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::time::Instant;

const DEFAULT_PAYLOAD: &str = r#"{"aps":{"alert":"hello","badge":1}}"#;

#[derive(Parser)]
#[command(name = "apns-dispatch")]
#[command(about = "Send push notifications to APNs in batches")]
struct Args {
    /// Path to configuration file
    config: Option<PathBuf>,

    /// Device token to send to (repeatable)
    #[arg(long = "token")]
    tokens: Vec<String>,

    /// File with one device token per line
    #[arg(long)]
    tokens_file: Option<PathBuf>,

    /// JSON payload
    #[arg(long, conflicts_with = "payload_file")]
    payload: Option<String>,

    /// File holding the JSON payload
    #[arg(long)]
    payload_file: Option<PathBuf>,

    /// Number of times to send the batch
    #[arg(long, default_value_t = 1)]
    repeat: u32,

    /// Print default configuration and exit
    #[arg(long)]
    print_config: bool,
}

fn main() {
    let args = Args::parse();

    if args.print_config {
        print_default_config();
        return;
    }

    let config = match &args.config {
        Some(path) => match Config::load(path) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("Failed to load config: {}", e);
                std::process::exit(1);
            }
        },
        None => Config::default(),
    };

    apns_dispatch::logging::init(&config.logging);

    if let Err(e) = run(&args, &config) {
        tracing::error!(error = %e, "dispatch failed");
        std::process::exit(1);
    }
}

fn run(args: &Args, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let mut tokens = args.tokens.clone();
    if let Some(path) = &args.tokens_file {
        let content = std::fs::read_to_string(path)?;
        tokens.extend(
            content
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty() && !line.starts_with('#'))
                .map(String::from),
        );
    }
    if tokens.is_empty() {
        return Err("no device tokens given, use --token or --tokens-file".into());
    }

    let payload = match (&args.payload, &args.payload_file) {
        (Some(payload), _) => payload.clone(),
        (None, Some(path)) => std::fs::read_to_string(path)?,
        (None, None) => DEFAULT_PAYLOAD.to_string(),
    };

    let host = config.apns.host();
    let cert = config.apns.client_cert();
    let batch: Vec<Request> = tokens
        .iter()
        .map(|token| Request::apns(host, token, payload.as_bytes(), cert.clone()))
        .collect();

    let shutdown = apns_dispatch::signal::install_signal_handler()?;
    let mut dispatcher = Dispatcher::init(config)?;
    tracing::info!(host, requests = batch.len(), repeat = args.repeat, "dispatcher ready");

    for round in 0..args.repeat {
        if shutdown.load(Ordering::SeqCst) {
            tracing::info!(round, "interrupted, stopping");
            break;
        }

        let started = Instant::now();
        let outcomes = dispatcher.send_batch(&batch);

        let mut succeeded = 0;
        let mut rejected = 0;
        let mut failed = 0;
        for outcome in &outcomes {
            match outcome.verdict() {
                Verdict::Success => succeeded += 1,
                Verdict::StatusMismatch(_) => rejected += 1,
                Verdict::TransportError | Verdict::ProtocolError => failed += 1,
            }
        }
        tracing::info!(
            round,
            succeeded,
            rejected,
            failed,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch sent"
        );
        tracing::debug!(
            submitted = REQUESTS_SUBMITTED.value(),
            submit_errors = SUBMIT_ERRORS.value(),
            succeeded = REQUESTS_SUCCEEDED.value(),
            failed = REQUESTS_FAILED.value(),
            wait_timeouts = WAIT_TIMEOUTS.value(),
            "totals"
        );
    }

    dispatcher.deinit();
    Ok(())
}

fn print_default_config() {
    let config = r#"# apns-dispatch configuration

[apns]
# "production" (api.push.apple.com) or "development" (api.development.push.apple.com)
environment = "production"

# Explicit host[:port], overrides environment
# host = "api.push.apple.com"

# apns-topic header, usually the app bundle id
# topic = "com.example.app"

# apns-push-type and apns-priority headers
# push_type = "alert"
# priority = 10

# Client certificate (PEM, certificate and key)
# cert = "/path/to/cert.pem"
# cert_password = "secret"

[engine]
# Maximum connections to the host
max_host_connections = 50

# Maximum concurrent HTTP/2 streams per connection
max_streams_per_connection = 30

# Negotiate HTTP/2
http2 = true

# Wait for a multiplexable connection instead of opening a new one
pipewait = true

# Timeouts in milliseconds (transfer_timeout_ms = 0 disables)
connect_timeout_ms = 5000
transfer_timeout_ms = 30000

# Log libcurl's verbose output at trace level
verbose = false

[dispatcher]
# Bounds on how long one wait may block, in milliseconds
deadline_floor_ms = 10
deadline_ceiling_ms = 1000
initial_deadline_ms = 1000

# Readiness events fetched per wait
event_capacity = 1024

[logging]
# Log level: "error", "warn", "info", "debug", "trace"
level = "info"

# Log format: "pretty", "json", or "compact"
format = "pretty"

timestamps = true
"#;
    print!("{}", config);
}
