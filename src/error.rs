/// Failure to acquire the resources a dispatcher needs.
///
/// Fatal to the dispatcher instance being built, never to the process.
#[derive(Debug, thiserror::Error)]
pub enum InitError {
    #[error("readiness multiplexer: {0}")]
    Multiplexer(#[from] std::io::Error),
    #[error("transfer engine: {0}")]
    Engine(#[from] curl::MultiError),
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// A single request could not be handed to the transfer engine.
///
/// Recorded as a `transport_error` outcome; the rest of the batch proceeds.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("request setup: {0}")]
    Easy(#[from] curl::Error),
    #[error("transfer rejected: {0}")]
    Multi(#[from] curl::MultiError),
    #[error("{0}")]
    Rejected(String),
}

impl SubmitError {
    /// Raw libcurl code, when the failure came from libcurl.
    pub fn code(&self) -> Option<i32> {
        match self {
            SubmitError::Easy(e) => Some(e.code() as i32),
            SubmitError::Multi(e) => Some(e.code() as i32),
            SubmitError::Rejected(_) => None,
        }
    }
}

/// The engine failed to service a drive call.
///
/// Logged by the dispatcher; the event loop keeps running.
#[derive(Debug, thiserror::Error)]
pub enum DriveError {
    #[error("socket action: {0}")]
    Multi(#[from] curl::MultiError),
    #[error("{0}")]
    Other(String),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
