//! A RabbitMQ (AMQP 0-9-1) messaging core providing request/response RPC
//! and topic-based pub/sub on top of [`lapin`], with pluggable
//! serialization, logging, and a passive event surface for observability.
//!
//! Applications own a single [`connection::ConnectionManager`] and hand
//! it to whichever of [`rpc::RpcClient`], [`rpc::RpcServer`],
//! [`pubsub::Publisher`], or [`pubsub::Subscriber`] they need; the
//! reliability primitives in [`reliability`] (retry, circuit breaker,
//! dedup, bounded buffering, consumer reconnection) are opt-in wrappers
//! the caller composes around those four, rather than behavior baked in
//! underneath them.

pub mod connection;
pub mod envelope;
pub mod error;
pub mod events;
pub mod logger;
pub mod middleware;
pub mod pubsub;
pub mod reliability;
pub mod rpc;
pub mod serializer;

pub use connection::{Channel, ChannelMode, Connection, ConnectionConfig, ConnectionManager, ConnectionState, ReconnectPolicy, TlsOptions};
pub use envelope::{EventEnvelope, Metadata, RequestEnvelope, ResponseEnvelope, ResponseError};
pub use error::{Error, Result};
pub use events::{CircuitState, CircuitStateChange, ConnectionEvent, Event, EventSink, NoopEventSink};
pub use logger::{LogLogger, Logger, NoopLogger};
pub use middleware::{AckFn, Middleware, MiddlewareChain, MiddlewareContext, NackFn, Next, TerminalHandler};
pub use pubsub::{topic_matches, ErrorMode, OnReturn, PublishOptions, Publisher, PublisherConfig, ReturnedMessage, Subscriber, SubscriberConfig};
pub use reliability::{
    BufferError, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError, ConsumerReconnectionManager, DeadLetterTarget, DedupeConfig,
    Deduplicator, Disposition, MessageBuffer, MessageParser, ParseError, ParserConfig, ReconnectCallback, ReconnectConfig, RetryConfig,
    RetryPolicy,
};
pub use rpc::{AckMode, ClientMiddleware, RpcClient, RpcClientConfig, RpcClientOptions, RpcServer, RpcServerConfig, DIRECT_REPLY_TO};
pub use serializer::{JsonSerializer, Serializer, SerializerExt};
