//! # The durable log collaborator.
//!
//! The dispatcher does not implement a broker. It needs three operations from
//! one, expressed by [`EventLog`] and [`LogConsumer`]:
//!
//! ```text
//! ingress ──► EventLog::produce(topic, message)            (acked append)
//! pipeline ─► EventLog::subscribe(topic, group) ──► LogConsumer
//!                                                   ├─ next()   ──► Record
//!                                                   ├─ commit(&Record)
//!                                                   └─ close()
//! ```
//!
//! Backends:
//! - [`InMemoryLog`] in-process log with consumer groups (tests, embedding).
//! - `KafkaLog` (feature `kafka`) backed by rdkafka.
//!
//! ## Naming
//! The topic of a channel comes from an injected [`TopicNamer`]; the default is
//! [`default_topic_name`]. The consumer group is derived from the channel
//! identity ([`consumer_group_id`]) so a restarted pipeline resumes from its last
//! committed position.

mod memory;

#[cfg(feature = "kafka")]
mod kafka;

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::LogError;
use crate::model::{ChannelRef, Message};

pub use memory::InMemoryLog;

#[cfg(feature = "kafka")]
pub use kafka::{KafkaLog, KafkaLogConfig};

/// Maps a channel identity to its log topic.
pub type TopicNamer = Arc<dyn Fn(&ChannelRef) -> String + Send + Sync>;

/// `knative-messaging-kafka.<namespace>.<name>`
pub fn default_topic_name(channel: &ChannelRef) -> String {
    format!(
        "knative-messaging-kafka.{}.{}",
        channel.namespace, channel.name
    )
}

/// `kafka.<namespace>.<name>`
pub fn consumer_group_id(channel: &ChannelRef) -> String {
    format!("kafka.{}.{}", channel.namespace, channel.name)
}

/// One consumed log entry.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub message: Message,
}

/// Append side of the log plus the factory for consumer-group subscriptions.
#[async_trait]
pub trait EventLog: Send + Sync + 'static {
    /// Appends `message` to `topic`; returns once the log acknowledged it.
    async fn produce(&self, topic: &str, message: &Message) -> Result<(), LogError>;

    /// Joins consumer group `group` on `topic`.
    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn LogConsumer>, LogError>;
}

/// A live consumer-group subscription.
///
/// `next` must be cancel-safe: dropping its future loses no record.
#[async_trait]
pub trait LogConsumer: Send {
    /// Waits for the next record in log order.
    async fn next(&mut self) -> Result<Record, LogError>;

    /// Marks `record` (and everything before it in its partition) as consumed.
    async fn commit(&mut self, record: &Record) -> Result<(), LogError>;

    /// Leaves the consumer group. Dropping the consumer also releases it.
    async fn close(&mut self);
}
