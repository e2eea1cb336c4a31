//! Pattern-matched event dispatch (spec §4.6).
//!
//! AMQP topic wildcards: `*` matches exactly one dot-delimited segment;
//! `#` matches zero or more segments.

use crate::connection::{ChannelMode, ConnectionManager};
use crate::envelope::EventEnvelope;
use crate::error::Error;
use crate::events::{Event, EventSink, NoopEventSink};
use crate::logger::{Logger, NoopLogger};
use crate::middleware::{Middleware, MiddlewareChain, MiddlewareContext, TerminalHandler};
use crate::reliability::{DeadLetterTarget, Disposition, MessageParser, ParserConfig};
use crate::serializer::{JsonSerializer, Serializer, SerializerExt};
use futures_util::stream::StreamExt;
use lapin::options::{
    BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicPublishOptions, BasicQosOptions, ExchangeDeclareOptions,
    QueueBindOptions, QueueDeclareOptions,
};
use lapin::types::FieldTable;
use lapin::{BasicProperties, ExchangeKind};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorMode {
    /// Any failing handler nacks the delivery with requeue (default).
    Strict,
    /// Failed handlers log; the delivery is acked regardless.
    Isolated,
}

#[derive(Clone)]
pub struct SubscriberConfig {
    pub exchange: String,
    pub exchange_kind: ExchangeKind,
    pub exchange_durable: bool,
    pub queue_name: Option<String>,
    pub prefetch: u16,
    pub error_mode: ErrorMode,
    pub parser: ParserConfig,
    pub shutdown_timeout: Duration,
}

impl SubscriberConfig {
    pub fn new(exchange: impl Into<String>) -> Self {
        Self {
            exchange: exchange.into(),
            exchange_kind: ExchangeKind::Topic,
            exchange_durable: true,
            queue_name: None,
            prefetch: 10,
            error_mode: ErrorMode::Strict,
            parser: ParserConfig::default(),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PatternToken {
    Literal(String),
    Star,
    Hash,
}

/// A compiled AMQP topic pattern (spec §3 PatternBinding "compiled
/// matcher"). Matching is done segment-wise via the same dynamic
/// program used for wildcard-sequence matching, rather than a textual
/// regex translation, since `#` must also absorb its own separators.
#[derive(Clone)]
struct CompiledPattern {
    tokens: Vec<PatternToken>,
}

impl CompiledPattern {
    fn compile(pattern: &str) -> Self {
        let tokens = pattern
            .split('.')
            .map(|segment| match segment {
                "*" => PatternToken::Star,
                "#" => PatternToken::Hash,
                other => PatternToken::Literal(other.to_string()),
            })
            .collect();
        Self { tokens }
    }

    fn matches(&self, event_name: &str) -> bool {
        let segments: Vec<&str> = event_name.split('.').collect();
        let pat = &self.tokens;
        let n = segments.len();
        let m = pat.len();
        let mut dp = vec![vec![false; m + 1]; n + 1];
        dp[0][0] = true;
        for j in 1..=m {
            if pat[j - 1] == PatternToken::Hash {
                dp[0][j] = dp[0][j - 1];
            }
        }
        for i in 1..=n {
            for j in 1..=m {
                dp[i][j] = match &pat[j - 1] {
                    PatternToken::Hash => dp[i - 1][j] || dp[i][j - 1],
                    PatternToken::Star => dp[i - 1][j - 1],
                    PatternToken::Literal(word) => dp[i - 1][j - 1] && segments[i - 1] == word,
                };
            }
        }
        dp[n][m]
    }
}

/// Tests AMQP topic pattern matching directly (spec §8 round-trip laws).
pub fn topic_matches(event_name: &str, pattern: &str) -> bool {
    CompiledPattern::compile(pattern).matches(event_name)
}

struct PatternBinding {
    pattern: String,
    compiled: CompiledPattern,
    chain: Arc<MiddlewareChain>,
}

struct SubscriberInit {
    channel: lapin::Channel,
    consumer_tag: String,
    queue_name: String,
}

pub struct Subscriber {
    connection_manager: Arc<ConnectionManager>,
    config: SubscriberConfig,
    serializer: Arc<dyn Serializer>,
    logger: Arc<dyn Logger>,
    sink: Arc<dyn EventSink>,
    parser: MessageParser,
    global_middleware: Mutex<Vec<Arc<dyn Middleware>>>,
    bindings: Mutex<Vec<PatternBinding>>,
    init: Mutex<Option<Arc<SubscriberInit>>>,
    stopping: AtomicBool,
    started: AtomicBool,
}

impl Subscriber {
    pub fn new(connection_manager: Arc<ConnectionManager>, config: SubscriberConfig) -> Arc<Self> {
        Self::with_collaborators(connection_manager, config, Arc::new(JsonSerializer), Arc::new(NoopLogger), Arc::new(NoopEventSink))
    }

    pub fn with_collaborators(
        connection_manager: Arc<ConnectionManager>,
        config: SubscriberConfig,
        serializer: Arc<dyn Serializer>,
        logger: Arc<dyn Logger>,
        sink: Arc<dyn EventSink>,
    ) -> Arc<Self> {
        let parser = MessageParser::new(config.parser.clone());
        Arc::new(Self {
            connection_manager,
            config,
            serializer,
            logger,
            sink,
            parser,
            global_middleware: Mutex::new(Vec::new()),
            bindings: Mutex::new(Vec::new()),
            init: Mutex::new(None),
            stopping: AtomicBool::new(false),
            started: AtomicBool::new(false),
        })
    }

    pub async fn use_middleware(&self, middleware: Arc<dyn Middleware>) {
        self.global_middleware.lock().await.push(middleware);
    }

    /// Registers `handler` for `pattern`. May be called before or after
    /// `start`; bindings added after `start` are applied to the broker
    /// immediately (spec §4.6 `on`).
    pub async fn on(self: &Arc<Self>, pattern: &str, stack: Vec<Arc<dyn Middleware>>, handler: Arc<dyn TerminalHandler>) -> Result<(), Error> {
        let mut composed = self.global_middleware.lock().await.clone();
        composed.extend(stack);
        let binding = PatternBinding {
            pattern: pattern.to_string(),
            compiled: CompiledPattern::compile(pattern),
            chain: Arc::new(MiddlewareChain::new(composed, handler)),
        };
        self.bindings.lock().await.push(binding);

        if self.started.load(Ordering::SeqCst) {
            if let Some(state) = self.init.lock().await.as_ref() {
                state
                    .channel
                    .queue_bind(&state.queue_name, &self.config.exchange, pattern, QueueBindOptions::default(), FieldTable::default())
                    .await?;
            }
        }
        Ok(())
    }

    /// Asserts the exchange and queue, binds every registered pattern,
    /// sets prefetch, and begins consuming (spec §4.6 `start`).
    pub async fn start(self: &Arc<Self>) -> Result<(), Error> {
        let channel = self.connection_manager.get_channel(ChannelMode::Plain).await?;
        let lapin_channel = channel.lapin().clone();

        lapin_channel
            .exchange_declare(
                &self.config.exchange,
                self.config.exchange_kind.clone(),
                ExchangeDeclareOptions { durable: self.config.exchange_durable, ..Default::default() },
                FieldTable::default(),
            )
            .await?;

        let (queue_name, declare_options) = match &self.config.queue_name {
            // named queues are durable and shared.
            Some(name) => (name.clone(), QueueDeclareOptions { durable: true, ..Default::default() }),
            // auto-named queues default exclusive=false, auto_delete=true (spec §6).
            None => (String::new(), QueueDeclareOptions { exclusive: false, auto_delete: true, ..Default::default() }),
        };
        let queue = lapin_channel.queue_declare(&queue_name, declare_options, FieldTable::default()).await?;
        let queue_name = queue.name().to_string();

        lapin_channel.basic_qos(self.config.prefetch, BasicQosOptions::default()).await?;

        for binding in self.bindings.lock().await.iter() {
            lapin_channel
                .queue_bind(&queue_name, &self.config.exchange, &binding.pattern, QueueBindOptions::default(), FieldTable::default())
                .await?;
        }

        let consumer = lapin_channel
            .basic_consume(&queue_name, "", BasicConsumeOptions::default(), FieldTable::default())
            .await?;
        let consumer_tag = consumer.tag().to_string();

        self.spawn_consume_loop(consumer, lapin_channel.clone());

        *self.init.lock().await = Some(Arc::new(SubscriberInit { channel: lapin_channel, consumer_tag, queue_name }));
        self.started.store(true, Ordering::SeqCst);
        self.sink.on_event(&Event::ServiceStarted { name: self.config.exchange.clone() });
        Ok(())
    }

    fn spawn_consume_loop(self: &Arc<Self>, mut consumer: lapin::Consumer, channel: lapin::Channel) {
        let this = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(delivery_result) = consumer.next().await {
                let delivery = match delivery_result {
                    Ok(d) => d,
                    Err(e) => {
                        this.logger.error("error receiving subscriber delivery", None, Some(&e));
                        continue;
                    }
                };
                if this.stopping.load(Ordering::SeqCst) {
                    continue;
                }
                let this = Arc::clone(&this);
                let channel = channel.clone();
                tokio::spawn(async move {
                    this.handle_delivery(delivery, channel).await;
                });
            }
        });
    }

    async fn handle_delivery(self: &Arc<Self>, delivery: lapin::message::Delivery, channel: lapin::Channel) {
        if let Err(parse_err) = self.parser.parse(&delivery.data) {
            self.apply_disposition(&delivery, &channel, parse_err.disposition).await;
            return;
        }

        let envelope: EventEnvelope = match self.serializer.decode_typed(&delivery.data) {
            Ok(e) => e,
            Err(_) => {
                // event name falls back to the delivery's routing key
                // when the body doesn't carry one (spec §4.6 step 2).
                EventEnvelope::new(delivery.routing_key.to_string(), serde_json::Value::Null, None)
            }
        };
        let event_name = if envelope.event_name.is_empty() { delivery.routing_key.to_string() } else { envelope.event_name.clone() };

        let matching: Vec<Arc<MiddlewareChain>> = {
            let bindings = self.bindings.lock().await;
            bindings.iter().filter(|b| b.compiled.matches(&event_name)).map(|b| Arc::clone(&b.chain)).collect()
        };

        if matching.is_empty() {
            self.logger.warn(&format!("no binding matched event {event_name}; acking to avoid queue buildup"), None);
            let _ = channel.basic_ack(delivery.delivery_tag, BasicAckOptions::default()).await;
            return;
        }

        self.sink.on_event(&Event::MessageReceived { command_or_event: event_name.clone() });
        let start = std::time::Instant::now();

        let results = futures_util::future::join_all(matching.iter().map(|chain| {
            let ctx = MiddlewareContext::new(event_name.clone(), envelope.data.clone(), Default::default(), Arc::clone(&self.logger));
            async move { chain.run(&ctx).await }
        }))
        .await;

        let failed = results.iter().any(Result::is_err);
        if failed {
            if let Some(Err(e)) = results.into_iter().find(Result::is_err) {
                self.sink.on_event(&Event::MessageFailed { command_or_event: event_name.clone(), error_code: e.code() });
                self.logger.error(&format!("handler failed for event {event_name}"), None, Some(&e));
            }
        } else {
            self.sink.on_event(&Event::MessageSucceeded { command_or_event: event_name.clone(), duration: start.elapsed() });
        }

        match (failed, self.config.error_mode) {
            (true, ErrorMode::Strict) => {
                let _ = channel.basic_nack(delivery.delivery_tag, BasicNackOptions { requeue: true, ..Default::default() }).await;
            }
            _ => {
                let _ = channel.basic_ack(delivery.delivery_tag, BasicAckOptions::default()).await;
            }
        }
    }

    async fn apply_disposition(&self, delivery: &lapin::message::Delivery, channel: &lapin::Channel, disposition: Disposition) {
        match disposition {
            Disposition::Reject => {
                let _ = channel.basic_nack(delivery.delivery_tag, BasicNackOptions { requeue: false, ..Default::default() }).await;
            }
            Disposition::Dlq => {
                if let Some(DeadLetterTarget { exchange, routing_key }) = self.parser.dead_letter_target() {
                    let _ = channel
                        .basic_publish(exchange, routing_key, BasicPublishOptions::default(), &delivery.data, BasicProperties::default())
                        .await;
                } else {
                    self.logger.warn("poison message disposition is Dlq but no dead_letter_target is configured", None);
                }
                let _ = channel.basic_ack(delivery.delivery_tag, BasicAckOptions::default()).await;
            }
            Disposition::Ignore => {
                let _ = channel.basic_ack(delivery.delivery_tag, BasicAckOptions::default()).await;
            }
        }
    }

    /// Cancels the consumer and closes the channel (spec §4.6 `stop`).
    /// An unacked delivery on cancel is left to the broker to requeue.
    pub async fn stop(self: &Arc<Self>) -> Result<(), Error> {
        if self.stopping.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        if let Some(state) = self.init.lock().await.take() {
            let _ = state.channel.basic_cancel(&state.consumer_tag, Default::default()).await;
            state.channel.close(200, "closed by application").await?;
        }
        self.sink.on_event(&Event::ServiceStopped { name: self.config.exchange.clone() });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn star_matches_exactly_one_segment() {
        assert!(topic_matches("a.b.c", "a.*.c"));
    }

    #[test]
    fn hash_matches_multiple_segments() {
        assert!(topic_matches("a.b.d.c", "a.#.c"));
    }

    #[test]
    fn trailing_hash_matches_everything_after_prefix() {
        assert!(topic_matches("a.b.c", "a.#"));
    }

    #[test]
    fn star_requires_a_second_segment() {
        assert!(!topic_matches("a", "a.*"));
    }

    #[test]
    fn star_does_not_match_wildcard_routing_for_unrelated_prefix() {
        assert!(!topic_matches("user.created", "order.*"));
    }

    #[test]
    fn hash_alone_matches_any_routing_key() {
        assert!(topic_matches("a.b.c.d", "#"));
        assert!(topic_matches("a", "#"));
    }

    #[test]
    fn exact_literal_pattern_only_matches_itself() {
        assert!(topic_matches("user.created", "user.created"));
        assert!(!topic_matches("user.updated", "user.created"));
    }

    #[test]
    fn wildcard_subscription_selects_only_matching_binding() {
        // spec §8 scenario 4: binding on "user.*" sees "user.created" but not "order.placed".
        assert!(topic_matches("user.created", "user.*"));
        assert!(!topic_matches("order.placed", "user.*"));
    }
}
