//! Redis Streams-backed log transport (durable, at-least-once delivery).
//!
//! ## Layout
//!
//! - **Stream key**: `<prefix>:<topic>`, one stream per topic. A stream is a
//!   single partition, so every record reports partition `0`.
//! - **Consumer groups**: one per consuming service, created on first fetch
//!   (`XGROUP CREATE ... 0 MKSTREAM`, starting from the beginning of the stream).
//! - **Consumers**: named per process within the group.
//!
//! ## Redelivery
//!
//! A fetched record stays in the group's pending list until `commit` sends
//! `XACK`. Fetch serves, in order: this consumer's own pending entries, entries
//! another consumer left idle for longer than `claim_idle` (`XAUTOCLAIM`), and
//! finally new entries (`XREADGROUP ... >`, blocking up to `block`).
//!
//! Pending entries trimmed from the stream before they were acknowledged
//! come back without fields. They are acknowledged on sight so they cannot
//! hide live pending entries behind them.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use redis::Value;
use redis::aio::MultiplexedConnection;
use tokio::sync::OnceCell;
use tracing::{debug, instrument, warn};

use khata_events::{LogTransport, Record, TransportError};

const DEFAULT_PREFIX: &str = "khata";
const DEFAULT_BLOCK: Duration = Duration::from_millis(1_000);
const DEFAULT_CLAIM_IDLE: Duration = Duration::from_secs(60);
/// How many of this consumer's own pending entries one fetch looks at.
const PENDING_BATCH: usize = 16;

pub struct RedisStreamsTransport {
    client: redis::Client,
    connection: OnceCell<MultiplexedConnection>,
    prefix: String,
    consumer: String,
    block: Duration,
    claim_idle: Duration,
    groups: Mutex<HashSet<(String, String)>>,
}

impl RedisStreamsTransport {
    /// Create a transport; no connection is opened until first use.
    ///
    /// * `redis_url` - e.g. `redis://localhost:6379`
    /// * `consumer` - consumer name, unique per process within a group
    pub fn new(redis_url: &str, consumer: impl Into<String>) -> Result<Self, TransportError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| TransportError::Unavailable(format!("invalid redis url: {e}")))?;

        Ok(Self {
            client,
            connection: OnceCell::new(),
            prefix: DEFAULT_PREFIX.to_string(),
            consumer: consumer.into(),
            block: DEFAULT_BLOCK,
            claim_idle: DEFAULT_CLAIM_IDLE,
            groups: Mutex::new(HashSet::new()),
        })
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// How long a fetch waits for new entries before returning `None`.
    pub fn with_block(mut self, block: Duration) -> Self {
        self.block = block;
        self
    }

    /// Minimum idle time before another consumer's pending entry is taken over.
    pub fn with_claim_idle(mut self, idle: Duration) -> Self {
        self.claim_idle = idle;
        self
    }

    pub fn stream_key(&self, topic: &str) -> String {
        format!("{}:{}", self.prefix, topic)
    }

    async fn conn(&self) -> Result<MultiplexedConnection, TransportError> {
        self.connection
            .get_or_try_init(|| async {
                self.client
                    .get_multiplexed_async_connection()
                    .await
                    .map_err(|e| TransportError::Unavailable(e.to_string()))
            })
            .await
            .cloned()
    }

    /// Create the consumer group if it does not exist yet (idempotent).
    async fn ensure_group(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        group: &str,
    ) -> Result<(), TransportError> {
        let key = (stream.to_string(), group.to_string());
        if self.groups.lock().map(|g| g.contains(&key)).unwrap_or(false) {
            return Ok(());
        }

        let created: redis::RedisResult<Value> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(conn)
            .await;

        match created {
            Ok(_) => {}
            Err(e) if e.code() == Some("BUSYGROUP") => {}
            Err(e) => return Err(command_error("XGROUP CREATE", e)),
        }

        if let Ok(mut groups) = self.groups.lock() {
            groups.insert(key);
        }
        Ok(())
    }

    async fn read_group(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        group: &str,
        id: &str,
        count: usize,
        block: Option<Duration>,
    ) -> Result<Entries, TransportError> {
        let mut cmd = redis::cmd("XREADGROUP");
        cmd.arg("GROUP").arg(group).arg(&self.consumer).arg("COUNT").arg(count);
        if let Some(block) = block {
            cmd.arg("BLOCK").arg(block.as_millis() as u64);
        }
        cmd.arg("STREAMS").arg(stream).arg(id);

        let reply: Value = cmd
            .query_async(conn)
            .await
            .map_err(|e| command_error("XREADGROUP", e))?;

        entries_of_read(reply)
    }

    async fn auto_claim(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        group: &str,
    ) -> Result<Entries, TransportError> {
        let reply: Value = redis::cmd("XAUTOCLAIM")
            .arg(stream)
            .arg(group)
            .arg(&self.consumer)
            .arg(self.claim_idle.as_millis() as u64)
            .arg("0-0")
            .arg("COUNT")
            .arg(1)
            .query_async(conn)
            .await
            .map_err(|e| command_error("XAUTOCLAIM", e))?;

        // [next-start-id, [entries...], (deleted ids)]
        match reply {
            Value::Bulk(mut parts) if parts.len() >= 2 => parse_entries(parts.swap_remove(1)),
            Value::Nil => Ok(Entries::default()),
            other => Err(invalid(format!("unexpected XAUTOCLAIM reply: {other:?}"))),
        }
    }

    /// Drop trimmed entries from the group's pending list.
    async fn ack_trimmed(
        &self,
        conn: &mut MultiplexedConnection,
        stream: &str,
        group: &str,
        ids: &[String],
    ) -> Result<(), TransportError> {
        if ids.is_empty() {
            return Ok(());
        }
        let _: i64 = redis::cmd("XACK")
            .arg(stream)
            .arg(group)
            .arg(ids)
            .query_async(conn)
            .await
            .map_err(|e| command_error("XACK", e))?;
        warn!(stream, group, count = ids.len(), "acknowledged pending entries trimmed from the stream");
        Ok(())
    }

    fn to_record(&self, topic: &str, entry: StreamEntry, redelivered: bool) -> Result<Record, TransportError> {
        let StreamEntry { id, mut fields } = entry;
        let payload = fields
            .remove("payload")
            .ok_or_else(|| invalid(format!("entry {id} has no payload field")))?;
        let key = fields
            .remove("key")
            .map(|k| String::from_utf8_lossy(&k).into_owned())
            .unwrap_or_default();

        Ok(Record {
            topic: topic.to_string(),
            partition: 0,
            position: id,
            key,
            payload,
            redelivered,
        })
    }
}

impl core::fmt::Debug for RedisStreamsTransport {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("RedisStreamsTransport")
            .field("prefix", &self.prefix)
            .field("consumer", &self.consumer)
            .field("block", &self.block)
            .field("claim_idle", &self.claim_idle)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LogTransport for RedisStreamsTransport {
    #[instrument(skip(self, payload), fields(bytes = payload.len()), err)]
    async fn append(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let mut conn = self.conn().await?;
        let id: String = redis::cmd("XADD")
            .arg(self.stream_key(topic))
            .arg("*")
            .arg("key")
            .arg(key)
            .arg("payload")
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("XADD", e))?;

        debug!(entry_id = %id, "entry appended");
        Ok(())
    }

    #[instrument(skip(self), err)]
    async fn fetch(&self, topic: &str, group: &str) -> Result<Option<Record>, TransportError> {
        let stream = self.stream_key(topic);
        let mut conn = self.conn().await?;
        self.ensure_group(&mut conn, &stream, group).await?;

        let own = self
            .read_group(&mut conn, &stream, group, "0", PENDING_BATCH, None)
            .await?;
        self.ack_trimmed(&mut conn, &stream, group, &own.trimmed).await?;
        if let Some(entry) = own.live {
            return self.to_record(topic, entry, true).map(Some);
        }

        let claimed = self.auto_claim(&mut conn, &stream, group).await?;
        self.ack_trimmed(&mut conn, &stream, group, &claimed.trimmed).await?;
        if let Some(entry) = claimed.live {
            return self.to_record(topic, entry, true).map(Some);
        }

        let fresh = self
            .read_group(&mut conn, &stream, group, ">", 1, Some(self.block))
            .await?;
        match fresh.live {
            Some(entry) => self.to_record(topic, entry, false).map(Some),
            None => Ok(None),
        }
    }

    #[instrument(skip(self, record), fields(topic = %record.topic, entry_id = %record.position), err)]
    async fn commit(&self, group: &str, record: &Record) -> Result<(), TransportError> {
        let mut conn = self.conn().await?;
        let _: i64 = redis::cmd("XACK")
            .arg(self.stream_key(&record.topic))
            .arg(group)
            .arg(&record.position)
            .query_async(&mut conn)
            .await
            .map_err(|e| command_error("XACK", e))?;
        Ok(())
    }
}

/// One stream entry: id plus its field map.
#[derive(Debug)]
struct StreamEntry {
    id: String,
    fields: HashMap<String, Vec<u8>>,
}

fn command_error(command: &str, err: redis::RedisError) -> TransportError {
    if err.is_io_error() || err.is_connection_refusal() || err.is_timeout() {
        TransportError::Unavailable(format!("{command}: {err}"))
    } else {
        TransportError::Command(format!("{command}: {err}"))
    }
}

fn invalid(msg: String) -> TransportError {
    TransportError::InvalidRecord(msg)
}

/// What one read returned: the first live entry, plus the ids of entries
/// that were trimmed from the stream while pending.
#[derive(Debug, Default)]
struct Entries {
    live: Option<StreamEntry>,
    trimmed: Vec<String>,
}

/// XREADGROUP reply: `[[stream, [entry...]]]`, or nil when nothing arrived.
fn entries_of_read(reply: Value) -> Result<Entries, TransportError> {
    let streams = match reply {
        Value::Nil => return Ok(Entries::default()),
        Value::Bulk(streams) => streams,
        other => return Err(invalid(format!("unexpected XREADGROUP reply: {other:?}"))),
    };

    let Some(Value::Bulk(mut stream)) = streams.into_iter().next() else {
        return Ok(Entries::default());
    };
    if stream.len() < 2 {
        return Err(invalid("stream reply too short".into()));
    }
    parse_entries(stream.swap_remove(1))
}

/// Parse `[[id, [field, value, ...]], ...]`.
///
/// Trimmed entries come back as `[id, nil]`; every one of them is collected.
/// Live entries after the first stay pending and are served by later fetches.
fn parse_entries(entries: Value) -> Result<Entries, TransportError> {
    let mut parsed = Entries::default();
    let entries = match entries {
        Value::Bulk(entries) => entries,
        Value::Nil => return Ok(parsed),
        other => return Err(invalid(format!("unexpected entry list: {other:?}"))),
    };

    for entry in entries {
        let Value::Bulk(parts) = entry else {
            return Err(invalid("entry is not an array".into()));
        };
        let mut parts = parts.into_iter();
        let id = match parts.next() {
            Some(Value::Data(id)) => String::from_utf8_lossy(&id).into_owned(),
            Some(Value::Status(id)) => id,
            _ => return Err(invalid("entry id missing".into())),
        };
        let Some(Value::Bulk(raw_fields)) = parts.next() else {
            parsed.trimmed.push(id);
            continue;
        };
        if parsed.live.is_some() {
            continue;
        }

        let mut fields = HashMap::new();
        for pair in raw_fields.chunks(2) {
            if let [Value::Data(name), Value::Data(value)] = pair {
                fields.insert(String::from_utf8_lossy(name).into_owned(), value.clone());
            }
        }
        parsed.live = Some(StreamEntry { id, fields });
    }
    Ok(parsed)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn data(s: &str) -> Value {
        Value::Data(s.as_bytes().to_vec())
    }

    #[test]
    fn parses_xreadgroup_reply() {
        let reply = Value::Bulk(vec![Value::Bulk(vec![
            data("khata:manage-user"),
            Value::Bulk(vec![Value::Bulk(vec![
                data("1700000000000-0"),
                Value::Bulk(vec![data("key"), data("u1"), data("payload"), data("{}")]),
            ])]),
        ])]);

        let entry = entries_of_read(reply).unwrap().live.unwrap();
        assert_eq!(entry.id, "1700000000000-0");
        assert_eq!(entry.fields["key"], b"u1");
        assert_eq!(entry.fields["payload"], b"{}");
    }

    #[test]
    fn nil_and_trimmed_entries_yield_nothing_live() {
        assert!(entries_of_read(Value::Nil).unwrap().live.is_none());

        let trimmed = Value::Bulk(vec![Value::Bulk(vec![data("1-0"), Value::Nil])]);
        let parsed = parse_entries(trimmed).unwrap();
        assert!(parsed.live.is_none());
        assert_eq!(parsed.trimmed, vec!["1-0".to_string()]);
    }

    #[test]
    fn trimmed_entries_do_not_hide_live_ones() {
        let entries = Value::Bulk(vec![
            Value::Bulk(vec![data("1-0"), Value::Nil]),
            Value::Bulk(vec![data("2-0"), Value::Bulk(vec![data("payload"), data("two")])]),
            Value::Bulk(vec![data("3-0"), Value::Nil]),
            Value::Bulk(vec![data("4-0"), Value::Bulk(vec![data("payload"), data("four")])]),
        ]);

        let parsed = parse_entries(entries).unwrap();
        let live = parsed.live.unwrap();
        assert_eq!(live.id, "2-0");
        assert_eq!(live.fields["payload"], b"two");
        assert_eq!(parsed.trimmed, vec!["1-0".to_string(), "3-0".to_string()]);
    }

    #[test]
    fn malformed_replies_are_invalid_records() {
        let err = entries_of_read(Value::Int(3)).unwrap_err();
        assert!(matches!(err, TransportError::InvalidRecord(_)));
    }

    /// Runs against a live server only when `REDIS_URL` is set.
    #[tokio::test]
    async fn uncommitted_entries_come_back_until_acked() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let prefix = format!("khata-test-{}", uuid::Uuid::now_v7());
        let transport = RedisStreamsTransport::new(&url, "tester")
            .unwrap()
            .with_prefix(prefix)
            .with_block(Duration::from_millis(50));

        transport.append("t", "k1", b"one".to_vec()).await.unwrap();

        let first = transport.fetch("t", "g").await.unwrap().unwrap();
        assert_eq!(first.payload, b"one");
        assert!(!first.redelivered);

        let again = transport.fetch("t", "g").await.unwrap().unwrap();
        assert_eq!(again.position, first.position);
        assert!(again.redelivered);

        transport.commit("g", &again).await.unwrap();
        assert!(transport.fetch("t", "g").await.unwrap().is_none());
    }

    /// Runs against a live server only when `REDIS_URL` is set.
    #[tokio::test]
    async fn trimmed_pending_entries_are_acked_and_skipped() {
        let Ok(url) = std::env::var("REDIS_URL") else {
            return;
        };
        let prefix = format!("khata-test-{}", uuid::Uuid::now_v7());
        let transport = RedisStreamsTransport::new(&url, "tester")
            .unwrap()
            .with_prefix(prefix)
            .with_block(Duration::from_millis(50));
        let stream = transport.stream_key("t");

        transport.append("t", "k1", b"one".to_vec()).await.unwrap();
        transport.append("t", "k2", b"two".to_vec()).await.unwrap();

        // Take both into this consumer's pending list, then delete the first.
        let mut conn = transport.conn().await.unwrap();
        transport.ensure_group(&mut conn, &stream, "g").await.unwrap();
        let read = transport
            .read_group(&mut conn, &stream, "g", ">", 2, None)
            .await
            .unwrap();
        let first = read.live.unwrap().id;
        let _: i64 = redis::cmd("XDEL")
            .arg(&stream)
            .arg(&first)
            .query_async(&mut conn)
            .await
            .unwrap();

        let record = transport.fetch("t", "g").await.unwrap().unwrap();
        assert_eq!(record.payload, b"two");
        assert!(record.redelivered);

        transport.commit("g", &record).await.unwrap();
        assert!(transport.fetch("t", "g").await.unwrap().is_none());
    }
}
