//! Reliability primitives (spec §2 "Reliability primitives", §4.7-§4.12).

pub mod buffer;
pub mod circuit_breaker;
pub mod dedup;
pub mod parser;
pub mod reconnect;
pub mod retry;

pub use buffer::{BufferError, MessageBuffer};
pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError};
pub use dedup::{DedupeConfig, Deduplicator};
pub use parser::{DeadLetterTarget, Disposition, MessageParser, ParseError, ParserConfig};
pub use reconnect::{ConsumerReconnectionManager, ReconnectCallback, ReconnectConfig};
pub use retry::{RetryConfig, RetryPolicy};
