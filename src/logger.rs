//! Leveled structured logging abstraction (spec §2, §6).
//!
//! Every RabbitMQ-facing module elsewhere in this codebase calls the
//! `log` crate's macros directly (`log::info!`, `log::warn!`, ...). This
//! library is injected with a `Logger` instead so it stays decoupled
//! from whichever logging backend (`env_logger`, `stderrlog`, `tracing`)
//! the embedding service already initialized — but the default
//! implementation simply forwards to `log`, matching the rest of this
//! codebase.

use serde_json::Value;
use std::fmt;

pub trait Logger: Send + Sync {
    fn debug(&self, message: &str, context: Option<&Value>);
    fn info(&self, message: &str, context: Option<&Value>);
    fn warn(&self, message: &str, context: Option<&Value>);
    fn error(&self, message: &str, context: Option<&Value>, error: Option<&dyn fmt::Display>);
}

fn format_context(context: Option<&Value>) -> String {
    match context {
        Some(v) => format!(" context={v}"),
        None => String::new(),
    }
}

/// Forwards to the `log` crate, the logging facade used throughout this
/// codebase's RabbitMQ-touching modules.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLogger;

impl Logger for LogLogger {
    fn debug(&self, message: &str, context: Option<&Value>) {
        log::debug!("{message}{}", format_context(context));
    }

    fn info(&self, message: &str, context: Option<&Value>) {
        log::info!("{message}{}", format_context(context));
    }

    fn warn(&self, message: &str, context: Option<&Value>) {
        log::warn!("{message}{}", format_context(context));
    }

    fn error(&self, message: &str, context: Option<&Value>, error: Option<&dyn fmt::Display>) {
        match error {
            Some(e) => log::error!("{message}{}: {e}", format_context(context)),
            None => log::error!("{message}{}", format_context(context)),
        }
    }
}

impl Logger for std::sync::Arc<dyn Logger> {
    fn debug(&self, message: &str, context: Option<&Value>) {
        (**self).debug(message, context);
    }

    fn info(&self, message: &str, context: Option<&Value>) {
        (**self).info(message, context);
    }

    fn warn(&self, message: &str, context: Option<&Value>) {
        (**self).warn(message, context);
    }

    fn error(&self, message: &str, context: Option<&Value>, error: Option<&dyn fmt::Display>) {
        (**self).error(message, context, error);
    }
}

/// Discards everything. Useful for tests and embedders who don't want
/// the library to log on their behalf.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn debug(&self, _message: &str, _context: Option<&Value>) {}
    fn info(&self, _message: &str, _context: Option<&Value>) {}
    fn warn(&self, _message: &str, _context: Option<&Value>) {}
    fn error(&self, _message: &str, _context: Option<&Value>, _error: Option<&dyn fmt::Display>) {}
}
