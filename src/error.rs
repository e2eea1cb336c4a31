//! Crate-wide error taxonomy (spec §7).
//!
//! Every error exposes a stable `CATEGORY:SUBCATEGORY` code, a human
//! readable message, and an opaque `details` value so it round-trips
//! through a [`crate::envelope::ResponseEnvelope`] across the wire.

use serde_json::Value;
use std::fmt;

/// A single crate-wide error type covering every category in spec §7.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("connection error: {message}")]
    Connection {
        subcategory: ConnectionSubcategory,
        message: String,
    },

    #[error("channel error: {message}")]
    Channel {
        subcategory: ChannelSubcategory,
        message: String,
    },

    #[error("validation error: {message}")]
    Validation { message: String, details: Option<Value> },

    #[error("timeout: {message}")]
    Timeout { message: String, details: Option<Value> },

    #[error("invalid state: {message}")]
    State { message: String },

    #[error("poison message: {message}")]
    MessageValidation { message: String, details: Option<Value> },

    #[error("retry exhausted after {attempts} attempts: {message}")]
    RetryExhausted {
        attempts: u32,
        message: String,
        #[source]
        source: Box<Error>,
    },

    #[error("publish error: {message}")]
    Publish { message: String, details: Option<Value> },

    #[error("aborted: {message}")]
    Aborted { message: String },

    #[error("client is closing")]
    ClientClosing,

    #[error("{code}: {message}")]
    Remote {
        code: String,
        message: String,
        details: Option<Value>,
    },

    #[error(transparent)]
    Lapin(#[from] lapin::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionSubcategory {
    Failed,
    Closed,
    Auth,
    Timeout,
    Tls,
}

impl fmt::Display for ConnectionSubcategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionSubcategory::Failed => "FAILED",
            ConnectionSubcategory::Closed => "CLOSED",
            ConnectionSubcategory::Auth => "AUTH",
            ConnectionSubcategory::Timeout => "TIMEOUT",
            ConnectionSubcategory::Tls => "TLS",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelSubcategory {
    CreationFailed,
    PoolDraining,
    Closed,
    FlowControl,
    Timeout,
}

impl fmt::Display for ChannelSubcategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ChannelSubcategory::CreationFailed => "CREATION_FAILED",
            ChannelSubcategory::PoolDraining => "POOL_DRAINING",
            ChannelSubcategory::Closed => "CLOSED",
            ChannelSubcategory::FlowControl => "FLOW_CONTROL",
            ChannelSubcategory::Timeout => "TIMEOUT",
        };
        f.write_str(s)
    }
}

impl Error {
    /// The stable `CATEGORY:SUBCATEGORY` code used on the wire (spec §7).
    pub fn code(&self) -> String {
        match self {
            Error::Connection { subcategory, .. } => format!("CONNECTION:{subcategory}"),
            Error::Channel { subcategory, .. } => format!("CHANNEL:{subcategory}"),
            Error::Validation { .. } => "VALIDATION:INVALID".to_string(),
            Error::Timeout { .. } => "TIMEOUT:RPC".to_string(),
            Error::State { .. } => "STATE:INVALID".to_string(),
            Error::MessageValidation { .. } => "MESSAGE_VALIDATION:POISON".to_string(),
            Error::RetryExhausted { .. } => "RETRY_EXHAUSTED:ATTEMPTS".to_string(),
            Error::Publish { .. } => "PUBLISH:FAILED".to_string(),
            Error::Aborted { .. } => "ABORTED:CANCELLED".to_string(),
            Error::ClientClosing => "STATE:CLOSING".to_string(),
            Error::Remote { code, .. } => code.clone(),
            Error::Lapin(_) => "CHANNEL:TRANSPORT".to_string(),
            Error::Serde(_) => "VALIDATION:SERDE".to_string(),
        }
    }

    /// Opaque structured details attached to the error, if any.
    pub fn details(&self) -> Option<&Value> {
        match self {
            Error::Validation { details, .. }
            | Error::Timeout { details, .. }
            | Error::MessageValidation { details, .. }
            | Error::Publish { details, .. }
            | Error::Remote { details, .. } => details.as_ref(),
            _ => None,
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Error::Validation { message: message.into(), details: None }
    }

    pub fn timeout(message: impl Into<String>, details: Value) -> Self {
        Error::Timeout { message: message.into(), details: Some(details) }
    }

    pub fn state(message: impl Into<String>) -> Self {
        Error::State { message: message.into() }
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Error::Aborted { message: message.into() }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
