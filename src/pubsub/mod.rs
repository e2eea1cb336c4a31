//! Event publish/subscribe over a topic exchange (spec §4.5, §4.6).

pub mod publisher;
pub mod subscriber;

pub use publisher::{OnReturn, PublishOptions, Publisher, PublisherConfig, ReturnedMessage};
pub use subscriber::{topic_matches, ErrorMode, Subscriber, SubscriberConfig};
