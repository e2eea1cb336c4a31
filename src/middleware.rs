//! Onion-model middleware composition (spec §4.2).
//!
//! Given middleware `m1..mk` and a terminal handler `h`, produces a
//! single callable executing the onion model: each middleware receives
//! a `next` continuation that advances to the following stage; the
//! final `next` invokes the terminal handler.

use crate::error::Error;
use crate::logger::Logger;
use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Bound acknowledgment references a caller (RPC server, subscriber)
/// wires into the context so handlers can take manual control of
/// delivery disposition (spec §3 MiddlewareContext "reply/ack/nack
/// function references").
pub type AckFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;
pub type NackFn = Arc<dyn Fn(bool) -> BoxFuture<'static, Result<(), Error>> + Send + Sync>;

/// Per-request mutable carrier threaded through the middleware chain
/// (spec §3 MiddlewareContext).
pub struct MiddlewareContext {
    pub command: String,
    pub payload: Value,
    pub properties: HashMap<String, String>,
    pub meta: HashMap<String, Value>,
    pub logger: Arc<dyn Logger>,
    pub attempt: u32,
    pub ack: Option<AckFn>,
    pub nack: Option<NackFn>,
    replied: AtomicBool,
    reply_value: std::sync::Mutex<Option<Value>>,
}

impl MiddlewareContext {
    pub fn new(command: String, payload: Value, properties: HashMap<String, String>, logger: Arc<dyn Logger>) -> Self {
        Self {
            command,
            payload,
            properties,
            meta: HashMap::new(),
            logger,
            attempt: 1,
            ack: None,
            nack: None,
            replied: AtomicBool::new(false),
            reply_value: std::sync::Mutex::new(None),
        }
    }

    /// Binds manual ack/nack references (spec §4.4 step 3). Builder-style
    /// so call sites can chain it onto `new`.
    pub fn with_ack_nack(mut self, ack: AckFn, nack: NackFn) -> Self {
        self.ack = Some(ack);
        self.nack = Some(nack);
        self
    }

    /// Commits `value` as the reply. Exactly one reply per context is
    /// honored; later attempts are ignored with a warning (spec §4.2
    /// "Response arbitration").
    pub fn reply(&self, value: Value) {
        if !self.try_commit(value) {
            self.logger.warn("ignoring duplicate reply on MiddlewareContext", None);
        }
    }

    /// Commits `value` as the reply iff nothing has been committed yet.
    /// Used internally by the chain to commit the terminal handler's
    /// return value or a short-circuiting middleware's value at the
    /// point it is produced, so a later explicit `ctx.reply(..)` call
    /// cannot silently override an already-committed result (spec §4.2
    /// "Response arbitration": first commit wins, later attempts warn).
    /// Returns whether this call performed the commit.
    fn try_commit(&self, value: Value) -> bool {
        if self.replied.compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst).is_ok() {
            *self.reply_value.lock().unwrap() = Some(value);
            true
        } else {
            false
        }
    }

    pub fn has_replied(&self) -> bool {
        self.replied.load(Ordering::SeqCst)
    }

    pub fn take_reply(&self) -> Option<Value> {
        self.reply_value.lock().unwrap().take()
    }
}

/// Advances the chain to the next stage (or the terminal handler).
/// Calling it more than once per middleware invocation is a programmer
/// error and fails the chain (spec §4.2).
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    index: usize,
    handler: &'a (dyn TerminalHandler),
    used: Arc<AtomicBool>,
}

impl<'a> Next<'a> {
    pub async fn call(&self, ctx: &MiddlewareContext) -> Result<Option<Value>, Error> {
        if self.used.swap(true, Ordering::SeqCst) {
            return Err(Error::state("next() called more than once in the same middleware invocation"));
        }
        run_from(self.chain, self.index, self.handler, ctx).await
    }
}

#[async_trait]
pub trait Middleware: Send + Sync {
    /// Returning `Ok(Some(value))` that is not the propagated result of
    /// `next.call()` short-circuits the chain: `value` becomes the
    /// response and the terminal handler is never invoked. Returning
    /// `Ok(None)` without calling `next` simply stops the chain (no
    /// reply is committed by this middleware).
    async fn handle(&self, ctx: &MiddlewareContext, next: Next<'_>) -> Result<Option<Value>, Error>;
}

#[async_trait]
pub trait TerminalHandler: Send + Sync {
    async fn call(&self, payload: &Value, ctx: &MiddlewareContext) -> Result<Value, Error>;
}

#[async_trait]
impl<F> TerminalHandler for F
where
    F: for<'a> Fn(&'a Value, &'a MiddlewareContext) -> futures_util::future::BoxFuture<'a, Result<Value, Error>> + Send + Sync,
{
    async fn call(&self, payload: &Value, ctx: &MiddlewareContext) -> Result<Value, Error> {
        (self)(payload, ctx).await
    }
}

fn run_from<'a>(
    chain: &'a [Arc<dyn Middleware>],
    index: usize,
    handler: &'a (dyn TerminalHandler),
    ctx: &'a MiddlewareContext,
) -> futures_util::future::BoxFuture<'a, Result<Option<Value>, Error>> {
    Box::pin(async move {
        if index >= chain.len() {
            let result = handler.call(&ctx.payload, ctx).await?;
            // Commit at the point the value is produced, not when it
            // finishes propagating back up through the calling
            // middlewares' post-`next` logic (spec §4.2: the terminal
            // handler's return commits the reply).
            ctx.try_commit(result.clone());
            return Ok(Some(result));
        }
        let next = Next { chain, index: index + 1, handler, used: Arc::new(AtomicBool::new(false)) };
        let outcome = chain[index].handle(ctx, next).await?;
        if let Some(value) = &outcome {
            // Short-circuit: this middleware produced a value of its
            // own (or is relaying one already committed below it).
            // `try_commit` is a no-op past the first commit, so this
            // never overrides an earlier one.
            ctx.try_commit(value.clone());
        }
        Ok(outcome)
    })
}

/// A composed callable: ordered middleware plus a terminal handler.
pub struct MiddlewareChain {
    stack: Vec<Arc<dyn Middleware>>,
    handler: Arc<dyn TerminalHandler>,
}

impl MiddlewareChain {
    pub fn new(stack: Vec<Arc<dyn Middleware>>, handler: Arc<dyn TerminalHandler>) -> Self {
        Self { stack, handler }
    }

    /// Executes the chain. Returns the committed reply. Whichever of
    /// the terminal handler's return, a short-circuiting middleware's
    /// value, or an explicit `ctx.reply(..)` call is committed *first*
    /// wins; later attempts are dropped with a warning (spec §4.2
    /// "Response arbitration").
    pub async fn run(&self, ctx: &MiddlewareContext) -> Result<Value, Error> {
        run_from(&self.stack, 0, self.handler.as_ref(), ctx).await?;
        ctx.take_reply().ok_or_else(|| Error::state("middleware chain produced no reply"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Passthrough;
    #[async_trait]
    impl Middleware for Passthrough {
        async fn handle(&self, ctx: &MiddlewareContext, next: Next<'_>) -> Result<Option<Value>, Error> {
            next.call(ctx).await
        }
    }

    struct ShortCircuit(Value);
    #[async_trait]
    impl Middleware for ShortCircuit {
        async fn handle(&self, _ctx: &MiddlewareContext, _next: Next<'_>) -> Result<Option<Value>, Error> {
            Ok(Some(self.0.clone()))
        }
    }

    struct StopsChain;
    #[async_trait]
    impl Middleware for StopsChain {
        async fn handle(&self, _ctx: &MiddlewareContext, _next: Next<'_>) -> Result<Option<Value>, Error> {
            Ok(None)
        }
    }

    struct DoubleNext;
    #[async_trait]
    impl Middleware for DoubleNext {
        async fn handle(&self, ctx: &MiddlewareContext, next: Next<'_>) -> Result<Option<Value>, Error> {
            let _ = next.call(ctx).await;
            next.call(ctx).await
        }
    }

    fn echo_handler() -> Arc<dyn TerminalHandler> {
        struct Echo;
        #[async_trait]
        impl TerminalHandler for Echo {
            async fn call(&self, payload: &Value, _ctx: &MiddlewareContext) -> Result<Value, Error> {
                Ok(payload.clone())
            }
        }
        Arc::new(Echo)
    }

    fn ctx() -> MiddlewareContext {
        MiddlewareContext::new("ADD".into(), json!({"a": 1}), HashMap::new(), Arc::new(crate::logger::NoopLogger))
    }

    #[tokio::test]
    async fn terminal_handler_runs_when_all_middleware_call_next() {
        let chain = MiddlewareChain::new(vec![Arc::new(Passthrough), Arc::new(Passthrough)], echo_handler());
        let c = ctx();
        let result = chain.run(&c).await.unwrap();
        assert_eq!(result, json!({"a": 1}));
    }

    #[tokio::test]
    async fn short_circuiting_middleware_skips_terminal_handler() {
        let chain = MiddlewareChain::new(
            vec![Arc::new(ShortCircuit(json!({"short": true}))), Arc::new(Passthrough)],
            echo_handler(),
        );
        let c = ctx();
        let result = chain.run(&c).await.unwrap();
        assert_eq!(result, json!({"short": true}));
    }

    #[tokio::test]
    async fn middleware_not_calling_next_stops_the_chain() {
        let chain = MiddlewareChain::new(vec![Arc::new(StopsChain), Arc::new(Passthrough)], echo_handler());
        let c = ctx();
        // StopsChain returns Ok(None) and never replies explicitly -> no reply committed.
        let result = chain.run(&c).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn calling_next_twice_fails_the_chain() {
        let chain = MiddlewareChain::new(vec![Arc::new(DoubleNext)], echo_handler());
        let c = ctx();
        let result = chain.run(&c).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn explicit_reply_is_honored_and_duplicate_is_ignored() {
        let c = ctx();
        c.reply(json!({"first": true}));
        c.reply(json!({"second": true}));
        assert_eq!(c.take_reply(), Some(json!({"first": true})));
    }
}
