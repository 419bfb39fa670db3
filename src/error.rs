use std::fmt;

/// Errors surfaced by the trigger path and the storage layer.
#[derive(Debug)]
pub enum Error {
    /// The event payload could not be serialized. Nothing was enqueued.
    Payload(serde_json::Error),

    /// The storage backend failed.
    Store(String),

    /// An endpoint definition failed admission validation.
    /// Carries the offending field name.
    InvalidWebhook(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Payload(err) => write!(f, "serializing event payload: {}", err),
            Error::Store(msg) => write!(f, "storage error: {}", msg),
            Error::InvalidWebhook(field) => write!(f, "invalid webhook field: {}", field),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Payload(err)
    }
}

#[cfg(feature = "postgres")]
impl From<tokio_postgres::Error> for Error {
    fn from(err: tokio_postgres::Error) -> Self {
        Error::Store(err.to_string())
    }
}

/// Classification of a single delivery attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The receiver answered with a 2xx status.
    Delivered { code: u16, body: String },

    /// The request could not be constructed; no HTTP exchange occurred.
    /// Deterministic for a given row, so never retried.
    BuildFailed { error: String },

    /// The request was sent but no HTTP response arrived
    /// (timeout, DNS failure, connection reset, TLS error).
    TransportFailed { error: String },

    /// The receiver answered with a non-2xx status.
    RemoteStatus { code: u16, body: String },
}
