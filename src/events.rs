//! Passive debug/metrics event surface (spec §2, §6).
//!
//! Observers implementing [`EventSink`] are registered with the
//! connection manager, RPC client/server, and subscriber. They are
//! invoked synchronously and must not block or throw (spec §5 "Shared-
//! resource policy"); a panicking sink is the caller's bug, not ours,
//! so we do not catch_unwind here.

use std::time::Duration;

/// A lifecycle transition on the shared [`crate::connection::Connection`].
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    Connected,
    Disconnected,
    Reconnecting { attempt: u32 },
    Error { message: String },
    Closed,
}

/// A circuit breaker state transition (spec §4.8).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
pub struct CircuitStateChange {
    pub old_state: CircuitState,
    pub new_state: CircuitState,
    pub failure_count: u32,
    pub success_count: u32,
}

/// Typed events emitted on message receive/success/error/timeout,
/// connection connect/disconnect/error, and service start/stop (spec §6).
#[derive(Debug, Clone)]
pub enum Event {
    Connection(ConnectionEvent),
    MessageReceived { command_or_event: String },
    MessageSucceeded { command_or_event: String, duration: Duration },
    MessageFailed { command_or_event: String, error_code: String },
    MessageTimedOut { command_or_event: String, timeout: Duration },
    CircuitBreakerStateChange(CircuitStateChange),
    CircuitBreakerReset,
    ServiceStarted { name: String },
    ServiceStopped { name: String },
}

/// Passive observer. Must not block or panic; the caller owns resilience
/// of its own sink.
pub trait EventSink: Send + Sync {
    fn on_event(&self, event: &Event);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn on_event(&self, _event: &Event) {}
}
