//! # InMemoryLog: in-process log with consumer groups.
//!
//! One partition per topic. Each topic keeps its records, the committed
//! position of every consumer group, and a `watch` channel carrying the record
//! count so waiting consumers wake on append.
//!
//! ```text
//! produce ──► topic.records.push ──► len_tx.send(len)
//!                                          │
//! consumer.next() ◄── len_rx.changed() ◄───┘
//! ```
//!
//! ## Rules
//! - A new subscription starts at the group's committed position (or the
//!   beginning of the topic).
//! - Commits only move forward.
//! - Topics are created on first use unless the log is [`InMemoryLog::strict`].
//! - [`InMemoryLog::fail_produces`], [`InMemoryLog::fail_subscribes`],
//!   [`InMemoryLog::fail_reads`] and [`InMemoryLog::fail_commits`] inject
//!   `Unreachable` failures for the next N calls.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::LogError;
use crate::model::Message;

use super::{EventLog, LogConsumer, Record};

struct Topic {
    records: Vec<Message>,
    committed: HashMap<String, i64>,
    members: HashMap<String, usize>,
    len_tx: watch::Sender<usize>,
}

impl Topic {
    fn new() -> Self {
        let (len_tx, _) = watch::channel(0);
        Self {
            records: Vec::new(),
            committed: HashMap::new(),
            members: HashMap::new(),
            len_tx,
        }
    }
}

#[derive(Default)]
struct Faults {
    produce: u32,
    subscribe: u32,
    read: u32,
    commit: u32,
}

struct Inner {
    topics: Mutex<HashMap<String, Topic>>,
    faults: Mutex<Faults>,
    auto_create: bool,
}

/// Cloneable handle to one in-process log.
#[derive(Clone)]
pub struct InMemoryLog {
    inner: Arc<Inner>,
}

impl Default for InMemoryLog {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryLog {
    /// Log that creates topics on first use.
    pub fn new() -> Self {
        Self::with_auto_create(true)
    }

    /// Log that only accepts topics created via [`InMemoryLog::create_topic`].
    pub fn strict() -> Self {
        Self::with_auto_create(false)
    }

    fn with_auto_create(auto_create: bool) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                faults: Mutex::new(Faults::default()),
                auto_create,
            }),
        }
    }

    pub fn create_topic(&self, topic: &str) {
        self.inner
            .topics
            .lock()
            .entry(topic.to_string())
            .or_insert_with(Topic::new);
    }

    /// Makes the next `n` produce calls fail.
    pub fn fail_produces(&self, n: u32) {
        self.inner.faults.lock().produce = n;
    }

    /// Makes the next `n` subscribe calls fail.
    pub fn fail_subscribes(&self, n: u32) {
        self.inner.faults.lock().subscribe = n;
    }

    /// Makes the next `n` reads, across all consumers, fail.
    pub fn fail_reads(&self, n: u32) {
        self.inner.faults.lock().read = n;
    }

    /// Makes the next `n` commits, across all consumers, fail.
    pub fn fail_commits(&self, n: u32) {
        self.inner.faults.lock().commit = n;
    }

    /// Snapshot of the messages appended to `topic`.
    pub fn messages(&self, topic: &str) -> Vec<Message> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .map(|t| t.records.clone())
            .unwrap_or_default()
    }

    /// Next offset `group` will read from on `topic` after a restart.
    pub fn committed(&self, topic: &str, group: &str) -> Option<i64> {
        self.inner
            .topics
            .lock()
            .get(topic)
            .and_then(|t| t.committed.get(group).copied())
    }

    /// Number of live consumers of `group` on `topic`.
    pub fn active_consumers(&self, topic: &str, group: &str) -> usize {
        self.inner
            .topics
            .lock()
            .get(topic)
            .and_then(|t| t.members.get(group).copied())
            .unwrap_or(0)
    }

    fn take_fault(counter: &mut u32) -> bool {
        if *counter == 0 {
            return false;
        }
        *counter -= 1;
        true
    }
}

#[async_trait]
impl EventLog for InMemoryLog {
    async fn produce(&self, topic: &str, message: &Message) -> Result<(), LogError> {
        if Self::take_fault(&mut self.inner.faults.lock().produce) {
            return Err(LogError::Unreachable {
                reason: "injected produce failure".into(),
            });
        }

        let mut topics = self.inner.topics.lock();
        if !topics.contains_key(topic) {
            if !self.inner.auto_create {
                return Err(LogError::TopicNotFound {
                    topic: topic.to_string(),
                });
            }
            topics.insert(topic.to_string(), Topic::new());
        }
        let Some(state) = topics.get_mut(topic) else {
            return Err(LogError::TopicNotFound {
                topic: topic.to_string(),
            });
        };
        state.records.push(message.clone());
        state.len_tx.send_replace(state.records.len());
        Ok(())
    }

    async fn subscribe(&self, topic: &str, group: &str) -> Result<Box<dyn LogConsumer>, LogError> {
        if Self::take_fault(&mut self.inner.faults.lock().subscribe) {
            return Err(LogError::Unreachable {
                reason: "injected subscribe failure".into(),
            });
        }

        let mut topics = self.inner.topics.lock();
        if !topics.contains_key(topic) {
            if !self.inner.auto_create {
                return Err(LogError::TopicNotFound {
                    topic: topic.to_string(),
                });
            }
            topics.insert(topic.to_string(), Topic::new());
        }
        let Some(state) = topics.get_mut(topic) else {
            return Err(LogError::TopicNotFound {
                topic: topic.to_string(),
            });
        };

        *state.members.entry(group.to_string()).or_insert(0) += 1;
        let position = state.committed.get(group).copied().unwrap_or(0);
        Ok(Box::new(MemoryConsumer {
            inner: Arc::clone(&self.inner),
            topic: topic.to_string(),
            group: group.to_string(),
            position,
            len_rx: state.len_tx.subscribe(),
            joined: true,
        }))
    }
}

struct MemoryConsumer {
    inner: Arc<Inner>,
    topic: String,
    group: String,
    position: i64,
    len_rx: watch::Receiver<usize>,
    joined: bool,
}

impl MemoryConsumer {
    fn leave(&mut self) {
        if !self.joined {
            return;
        }
        self.joined = false;
        let mut topics = self.inner.topics.lock();
        if let Some(state) = topics.get_mut(&self.topic) {
            if let Some(n) = state.members.get_mut(&self.group) {
                *n = n.saturating_sub(1);
                if *n == 0 {
                    state.members.remove(&self.group);
                }
            }
        }
    }
}

#[async_trait]
impl LogConsumer for MemoryConsumer {
    async fn next(&mut self) -> Result<Record, LogError> {
        if InMemoryLog::take_fault(&mut self.inner.faults.lock().read) {
            return Err(LogError::Unreachable {
                reason: "injected read failure".into(),
            });
        }
        loop {
            if !self.joined {
                return Err(LogError::Closed);
            }
            // marks the current length as seen before the read below
            self.len_rx.borrow_and_update();
            {
                let topics = self.inner.topics.lock();
                let state = topics.get(&self.topic).ok_or_else(|| LogError::TopicNotFound {
                    topic: self.topic.clone(),
                })?;
                if let Some(message) = usize::try_from(self.position)
                    .ok()
                    .and_then(|idx| state.records.get(idx))
                {
                    let record = Record {
                        topic: self.topic.clone(),
                        partition: 0,
                        offset: self.position,
                        message: message.clone(),
                    };
                    self.position += 1;
                    return Ok(record);
                }
            }
            self.len_rx.changed().await.map_err(|_| LogError::Closed)?;
        }
    }

    async fn commit(&mut self, record: &Record) -> Result<(), LogError> {
        if !self.joined {
            return Err(LogError::Closed);
        }
        if InMemoryLog::take_fault(&mut self.inner.faults.lock().commit) {
            return Err(LogError::Commit {
                reason: "injected commit failure".into(),
            });
        }
        let mut topics = self.inner.topics.lock();
        let state = topics
            .get_mut(&self.topic)
            .ok_or_else(|| LogError::TopicNotFound {
                topic: self.topic.clone(),
            })?;
        let next = record.offset + 1;
        let entry = state.committed.entry(self.group.clone()).or_insert(0);
        if next > *entry {
            *entry = next;
        }
        Ok(())
    }

    async fn close(&mut self) {
        self.leave();
    }
}

impl Drop for MemoryConsumer {
    fn drop(&mut self) {
        self.leave();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn msg(id: &str) -> Message {
        Message::new(id.to_string()).with_attribute("id", id)
    }

    #[tokio::test]
    async fn consumer_reads_in_order_and_waits_for_more() {
        let log = InMemoryLog::new();
        log.produce("t", &msg("1")).await.unwrap();

        let mut consumer = log.subscribe("t", "g").await.unwrap();
        assert_eq!(consumer.next().await.unwrap().message.id(), Some("1"));

        let producer = log.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.produce("t", &msg("2")).await.unwrap();
        });
        let rec = tokio::time::timeout(Duration::from_secs(2), consumer.next())
            .await
            .expect("record in time")
            .unwrap();
        assert_eq!(rec.offset, 1);
        assert_eq!(rec.message.id(), Some("2"));
    }

    #[tokio::test]
    async fn new_subscription_resumes_from_commit() {
        let log = InMemoryLog::new();
        for id in ["1", "2", "3"] {
            log.produce("t", &msg(id)).await.unwrap();
        }

        let mut first = log.subscribe("t", "g").await.unwrap();
        let r1 = first.next().await.unwrap();
        first.commit(&r1).await.unwrap();
        let _uncommitted = first.next().await.unwrap();
        drop(first);

        assert_eq!(log.committed("t", "g"), Some(1));
        let mut second = log.subscribe("t", "g").await.unwrap();
        assert_eq!(second.next().await.unwrap().message.id(), Some("2"));

        let mut other_group = log.subscribe("t", "h").await.unwrap();
        assert_eq!(other_group.next().await.unwrap().message.id(), Some("1"));
    }

    #[tokio::test]
    async fn commits_never_move_backwards() {
        let log = InMemoryLog::new();
        log.produce("t", &msg("1")).await.unwrap();
        log.produce("t", &msg("2")).await.unwrap();
        let mut c = log.subscribe("t", "g").await.unwrap();
        let r1 = c.next().await.unwrap();
        let r2 = c.next().await.unwrap();
        c.commit(&r2).await.unwrap();
        c.commit(&r1).await.unwrap();
        assert_eq!(log.committed("t", "g"), Some(2));
    }

    #[tokio::test]
    async fn strict_log_rejects_unknown_topics() {
        let log = InMemoryLog::strict();
        assert!(matches!(
            log.produce("t", &msg("1")).await,
            Err(LogError::TopicNotFound { .. })
        ));
        assert!(log.subscribe("t", "g").await.is_err());

        log.create_topic("t");
        log.produce("t", &msg("1")).await.unwrap();
        assert_eq!(log.messages("t").len(), 1);
    }

    #[tokio::test]
    async fn injected_faults_are_consumed() {
        let log = InMemoryLog::new();
        log.fail_produces(1);
        log.fail_subscribes(2);

        assert!(matches!(
            log.produce("t", &msg("1")).await,
            Err(LogError::Unreachable { .. })
        ));
        log.produce("t", &msg("1")).await.unwrap();

        assert!(log.subscribe("t", "g").await.is_err());
        assert!(log.subscribe("t", "g").await.is_err());
        assert!(log.subscribe("t", "g").await.is_ok());
    }

    #[tokio::test]
    async fn injected_read_and_commit_faults_leave_position_intact() {
        let log = InMemoryLog::new();
        log.produce("t", &msg("1")).await.unwrap();
        log.fail_reads(1);
        log.fail_commits(1);

        let mut c = log.subscribe("t", "g").await.unwrap();
        assert!(matches!(c.next().await, Err(LogError::Unreachable { .. })));
        let rec = c.next().await.unwrap();
        assert_eq!(rec.message.id(), Some("1"));

        assert!(matches!(c.commit(&rec).await, Err(LogError::Commit { .. })));
        assert_eq!(log.committed("t", "g"), None);
        c.commit(&rec).await.unwrap();
        assert_eq!(log.committed("t", "g"), Some(1));
    }

    #[tokio::test]
    async fn membership_is_released_on_close_and_drop() {
        let log = InMemoryLog::new();
        let mut a = log.subscribe("t", "g").await.unwrap();
        let b = log.subscribe("t", "g").await.unwrap();
        assert_eq!(log.active_consumers("t", "g"), 2);

        a.close().await;
        assert_eq!(log.active_consumers("t", "g"), 1);
        assert!(matches!(a.next().await, Err(LogError::Closed)));

        drop(b);
        assert_eq!(log.active_consumers("t", "g"), 0);
    }
}
