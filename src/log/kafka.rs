//! # KafkaLog: the durable log backed by Kafka (feature `kafka`).
//!
//! Messages are stored in Kafka binary mode: each attribute becomes a `ce_<name>`
//! record header, `datacontenttype` becomes `content-type`, and the body is the
//! record payload.
//!
//! Consumers run with `enable.auto.commit=false`; a position is committed only
//! through [`LogConsumer::commit`], after the fanout of that record finished.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Header, Headers, Message as _, OwnedHeaders};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{ClientConfig, Offset, TopicPartitionList};
use tracing::debug;

use crate::error::LogError;
use crate::model::{CONTENT_TYPE_ATTRIBUTE, Message};

use super::{EventLog, LogConsumer, Record};

const HEADER_PREFIX: &str = "ce_";
const CONTENT_TYPE_HEADER: &str = "content-type";

/// Connection settings.
#[derive(Clone, Debug)]
pub struct KafkaLogConfig {
    /// Comma-separated `host:port` list.
    pub bootstrap_servers: String,
    /// Time the producer waits for an acknowledgement.
    pub produce_timeout: Duration,
    /// Extra librdkafka properties applied to producer and consumers.
    pub properties: BTreeMap<String, String>,
}

impl KafkaLogConfig {
    pub fn new(bootstrap_servers: impl Into<String>) -> Self {
        Self {
            bootstrap_servers: bootstrap_servers.into(),
            produce_timeout: Duration::from_secs(5),
            properties: BTreeMap::new(),
        }
    }

    fn client_config(&self) -> ClientConfig {
        let mut cfg = ClientConfig::new();
        cfg.set("bootstrap.servers", &self.bootstrap_servers);
        for (key, value) in &self.properties {
            cfg.set(key, value);
        }
        cfg
    }
}

/// [`EventLog`] over a Kafka cluster.
pub struct KafkaLog {
    config: KafkaLogConfig,
    producer: FutureProducer,
}

impl KafkaLog {
    pub fn connect(config: KafkaLogConfig) -> Result<Self, LogError> {
        let producer: FutureProducer = config
            .client_config()
            .set("acks", "all")
            .create()
            .map_err(unreachable)?;
        Ok(Self { config, producer })
    }
}

#[async_trait]
impl EventLog for KafkaLog {
    async fn produce(&self, topic: &str, message: &Message) -> Result<(), LogError> {
        let mut headers = OwnedHeaders::new_with_capacity(message.attributes.len());
        for (name, value) in &message.attributes {
            let key = if name == CONTENT_TYPE_ATTRIBUTE {
                CONTENT_TYPE_HEADER.to_string()
            } else {
                format!("{HEADER_PREFIX}{name}")
            };
            headers = headers.insert(Header {
                key: key.as_str(),
                value: Some(value.as_bytes()),
            });
        }

        let record: FutureRecord<'_, (), [u8]> = FutureRecord::to(topic)
            .payload(message.body.as_ref())
            .headers(headers);

        self.producer
            .send(record, self.config.produce_timeout)
            .await
            .map(|_| ())
            .map_err(|(e, _)| match e.rdkafka_error_code() {
                Some(RDKafkaErrorCode::UnknownTopicOrPartition | RDKafkaErrorCode::UnknownTopic) => {
                    LogError::TopicNotFound {
                        topic: topic.to_string(),
                    }
                }
                _ => unreachable(e),
            })
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn LogConsumer>, LogError> {
        let consumer: StreamConsumer = self
            .config
            .client_config()
            .set("group.id", group)
            .set("enable.auto.commit", "false")
            .set("auto.offset.reset", "earliest")
            .create()
            .map_err(unreachable)?;
        consumer.subscribe(&[topic]).map_err(unreachable)?;
        debug!(topic, group, "joined consumer group");
        Ok(Box::new(KafkaConsumer { consumer }))
    }
}

struct KafkaConsumer {
    consumer: StreamConsumer,
}

#[async_trait]
impl LogConsumer for KafkaConsumer {
    async fn next(&mut self) -> Result<Record, LogError> {
        let msg = self.consumer.recv().await.map_err(unreachable)?;

        let mut attributes = BTreeMap::new();
        if let Some(headers) = msg.headers() {
            for header in headers.iter() {
                let Some(value) = header.value.and_then(|v| std::str::from_utf8(v).ok()) else {
                    continue;
                };
                if header.key.eq_ignore_ascii_case(CONTENT_TYPE_HEADER) {
                    attributes.insert(CONTENT_TYPE_ATTRIBUTE.to_string(), value.to_string());
                } else if let Some(name) = header.key.strip_prefix(HEADER_PREFIX) {
                    attributes.insert(name.to_ascii_lowercase(), value.to_string());
                }
            }
        }

        Ok(Record {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            message: Message {
                attributes,
                body: Bytes::copy_from_slice(msg.payload().unwrap_or_default()),
            },
        })
    }

    async fn commit(&mut self, record: &Record) -> Result<(), LogError> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&record.topic, record.partition, Offset::Offset(record.offset + 1))
            .map_err(commit_failed)?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(commit_failed)
    }

    async fn close(&mut self) {
        self.consumer.unsubscribe();
    }
}

fn unreachable(e: KafkaError) -> LogError {
    LogError::Unreachable {
        reason: e.to_string(),
    }
}

fn commit_failed(e: KafkaError) -> LogError {
    LogError::Commit {
        reason: e.to_string(),
    }
}
