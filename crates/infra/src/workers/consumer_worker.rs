use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use khata_events::{CatalogEvent, EventEnvelope, EventHandler, LogTransport, Record};

use super::backoff::Backoff;

/// Consumer loop configuration.
#[derive(Debug, Clone)]
pub struct ConsumerConfig {
    /// Consumer group; offsets are tracked per group.
    pub group: String,
    /// Deadline for one handler invocation.
    pub handler_timeout: Duration,
    /// Pause after an empty fetch.
    pub idle_wait: Duration,
    pub backoff: Backoff,
}

impl ConsumerConfig {
    pub fn new(group: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            handler_timeout: Duration::from_secs(10),
            idle_wait: Duration::from_millis(100),
            backoff: Backoff::default(),
        }
    }

    pub fn with_handler_timeout(mut self, timeout: Duration) -> Self {
        self.handler_timeout = timeout;
        self
    }

    pub fn with_idle_wait(mut self, wait: Duration) -> Self {
        self.idle_wait = wait;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }
}

/// Counters of a running consumer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ConsumerStats {
    /// Records handled and committed.
    pub processed: u64,
    /// Fetch, decode, handler or commit failures.
    pub failed: u64,
    /// Records that arrived flagged as redelivered.
    pub redelivered: u64,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    failed: AtomicU64,
    redelivered: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> ConsumerStats {
        ConsumerStats {
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            redelivered: self.redelivered.load(Ordering::Relaxed),
        }
    }
}

/// Handle to control and join a consumer task.
#[derive(Debug)]
pub struct ConsumerHandle {
    name: &'static str,
    shutdown: watch::Sender<bool>,
    join: Option<JoinHandle<()>>,
    counters: Arc<Counters>,
}

impl ConsumerHandle {
    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn stats(&self) -> ConsumerStats {
        self.counters.snapshot()
    }

    /// Request graceful shutdown and wait for the loop to stop.
    ///
    /// A handler already running finishes (or times out) first; its record
    /// is committed only if it succeeded.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        if let Some(join) = self.join.take() {
            if let Err(err) = join.await {
                error!(worker = self.name, error = %err, "consumer task panicked");
            }
        }
    }
}

/// At-least-once consumer of one topic.
///
/// Loop: fetch the next uncommitted record for the group, decode it, run the
/// handler under a deadline, commit on success. Any failure leaves the record
/// uncommitted and backs off before the next fetch, so the same record comes
/// back. There is no dead-letter path.
#[derive(Debug)]
pub struct ConsumerWorker;

impl ConsumerWorker {
    pub fn spawn<E, H>(
        name: &'static str,
        transport: Arc<dyn LogTransport>,
        handler: H,
        config: ConsumerConfig,
    ) -> ConsumerHandle
    where
        E: CatalogEvent,
        H: EventHandler<E> + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = Arc::new(Counters::default());

        let join = tokio::spawn(worker_loop::<E, H>(
            name,
            transport,
            handler,
            config,
            shutdown_rx,
            Arc::clone(&counters),
        ));

        ConsumerHandle {
            name,
            shutdown: shutdown_tx,
            join: Some(join),
            counters,
        }
    }
}

enum Step {
    Idle,
    Committed,
    Failed,
}

async fn worker_loop<E, H>(
    name: &'static str,
    transport: Arc<dyn LogTransport>,
    handler: H,
    config: ConsumerConfig,
    mut shutdown: watch::Receiver<bool>,
    counters: Arc<Counters>,
) where
    E: CatalogEvent,
    H: EventHandler<E>,
{
    let topic = E::KIND.topic();
    let mut consecutive_failures: u32 = 0;
    info!(worker = name, topic, group = %config.group, "consumer started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let pause = match step::<E, H>(name, transport.as_ref(), &handler, &config, &counters).await {
            Step::Committed => {
                consecutive_failures = 0;
                continue;
            }
            Step::Idle => {
                consecutive_failures = 0;
                config.idle_wait
            }
            Step::Failed => {
                counters.failed.fetch_add(1, Ordering::Relaxed);
                consecutive_failures = consecutive_failures.saturating_add(1);
                config.backoff.delay_for_attempt(consecutive_failures)
            }
        };

        tokio::select! {
            _ = tokio::time::sleep(pause) => {}
            _ = shutdown.changed() => {}
        }
    }

    info!(worker = name, topic, "consumer stopped");
}

async fn step<E, H>(
    name: &'static str,
    transport: &dyn LogTransport,
    handler: &H,
    config: &ConsumerConfig,
    counters: &Counters,
) -> Step
where
    E: CatalogEvent,
    H: EventHandler<E>,
{
    let topic = E::KIND.topic();

    let record = match transport.fetch(topic, &config.group).await {
        Ok(Some(record)) => record,
        Ok(None) => return Step::Idle,
        Err(err) => {
            warn!(worker = name, topic, error = %err, "fetch failed");
            return Step::Failed;
        }
    };

    if record.redelivered {
        counters.redelivered.fetch_add(1, Ordering::Relaxed);
    }

    let envelope = match decode::<E>(&record) {
        Ok(envelope) => envelope,
        Err(err) => {
            warn!(
                worker = name,
                topic,
                partition = record.partition,
                position = %record.position,
                error = %err,
                "undecodable record left uncommitted"
            );
            return Step::Failed;
        }
    };
    let event_id = envelope.id();

    match tokio::time::timeout(config.handler_timeout, handler.handle(envelope)).await {
        Ok(Ok(())) => {}
        Ok(Err(err)) => {
            warn!(worker = name, topic, %event_id, error = ?err, "handler failed");
            return Step::Failed;
        }
        Err(_) => {
            warn!(
                worker = name,
                topic,
                %event_id,
                timeout_ms = config.handler_timeout.as_millis() as u64,
                "handler timed out"
            );
            return Step::Failed;
        }
    }

    if let Err(err) = transport.commit(&config.group, &record).await {
        warn!(worker = name, topic, %event_id, error = %err, "commit failed; record will be redelivered");
        return Step::Failed;
    }

    counters.processed.fetch_add(1, Ordering::Relaxed);
    debug!(worker = name, topic, %event_id, partition = record.partition, "record committed");
    Step::Committed
}

fn decode<E: CatalogEvent>(record: &Record) -> anyhow::Result<EventEnvelope<E>> {
    let envelope: EventEnvelope<E> = serde_json::from_slice(&record.payload)?;
    if envelope.event() != E::KIND {
        anyhow::bail!(
            "envelope kind {} does not match topic {}",
            envelope.event(),
            E::KIND.topic()
        );
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;

    use async_trait::async_trait;
    use chrono::Utc;
    use khata_core::UserId;
    use khata_events::{EventPublisher, InMemoryLog, UserSnapshot, action};

    use super::*;

    fn user(name: &str) -> UserSnapshot {
        let now = Utc::now();
        UserSnapshot {
            id: UserId::new(),
            human_id: "user-AAAAAAA".into(),
            name: name.into(),
            email: format!("{}@x.com", name.to_lowercase()),
            phone: "+15550100000".into(),
            avatar: None,
            email_verified: false,
            phone_verified: false,
            created_at: now,
            created_by: UserId::root(),
            updated_at: now,
            updated_by: None,
            deactivated_at: None,
            deactivated_by: None,
            deleted_at: None,
            deleted_by: None,
        }
    }

    /// Fails the first `fail_first` calls, then records names.
    #[derive(Default)]
    struct Recorder {
        fail_first: usize,
        calls: AtomicUsize,
        seen: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventHandler<UserSnapshot> for Recorder {
        async fn handle(&self, envelope: EventEnvelope<UserSnapshot>) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_first {
                anyhow::bail!("boom");
            }
            self.seen.lock().unwrap().push(envelope.data().name.clone());
            Ok(())
        }
    }

    fn fast_config() -> ConsumerConfig {
        ConsumerConfig::new("test")
            .with_idle_wait(Duration::from_millis(5))
            .with_backoff(Backoff::new(Duration::from_millis(1), Duration::from_millis(5)))
    }

    async fn wait_for(mut cond: impl FnMut() -> bool) {
        for _ in 0..400 {
            if cond() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached in time");
    }

    #[tokio::test]
    async fn commits_after_successful_handling() {
        let log = Arc::new(InMemoryLog::with_partitions(1));
        let publisher = EventPublisher::new(log.clone());
        for name in ["Ann", "Bob"] {
            publisher.publish(&EventEnvelope::new(action::CREATE, user(name))).await.unwrap();
        }

        let recorder = Arc::new(Recorder::default());
        let handle = ConsumerWorker::spawn::<UserSnapshot, _>("users", log.clone(), recorder.clone(), fast_config());

        wait_for(|| handle.stats().processed == 2).await;
        handle.shutdown().await;

        assert_eq!(*recorder.seen.lock().unwrap(), vec!["Ann".to_string(), "Bob".to_string()]);
        assert_eq!(log.lag("manage-user", "test"), 0);
    }

    #[tokio::test]
    async fn failed_handling_is_redelivered() {
        let log = Arc::new(InMemoryLog::with_partitions(1));
        EventPublisher::new(log.clone())
            .publish(&EventEnvelope::new(action::CREATE, user("Ann")))
            .await
            .unwrap();

        let recorder = Arc::new(Recorder { fail_first: 2, ..Default::default() });
        let handle = ConsumerWorker::spawn::<UserSnapshot, _>("users", log.clone(), recorder.clone(), fast_config());

        wait_for(|| handle.stats().processed == 1).await;
        let stats = handle.stats();
        handle.shutdown().await;

        assert_eq!(stats.failed, 2);
        assert!(stats.redelivered >= 2);
        assert_eq!(recorder.calls.load(Ordering::SeqCst), 3);
        assert_eq!(*recorder.seen.lock().unwrap(), vec!["Ann".to_string()]);
    }

    struct Slow;

    #[async_trait]
    impl EventHandler<UserSnapshot> for Slow {
        async fn handle(&self, _: EventEnvelope<UserSnapshot>) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn handler_deadline_leaves_record_uncommitted() {
        let log = Arc::new(InMemoryLog::with_partitions(1));
        EventPublisher::new(log.clone())
            .publish(&EventEnvelope::new(action::CREATE, user("Ann")))
            .await
            .unwrap();

        let config = fast_config().with_handler_timeout(Duration::from_millis(10));
        let handle = ConsumerWorker::spawn::<UserSnapshot, _>("users", log.clone(), Slow, config);

        wait_for(|| handle.stats().failed >= 1).await;
        handle.shutdown().await;

        assert_eq!(log.lag("manage-user", "test"), 1);
    }

    #[tokio::test]
    async fn garbage_records_are_never_committed() {
        let log = Arc::new(InMemoryLog::with_partitions(1));
        log.append("manage-user", "k", b"not json".to_vec()).await.unwrap();

        let recorder = Arc::new(Recorder::default());
        let handle = ConsumerWorker::spawn::<UserSnapshot, _>("users", log.clone(), recorder.clone(), fast_config());

        wait_for(|| handle.stats().failed >= 2).await;
        handle.shutdown().await;

        assert_eq!(recorder.calls.load(Ordering::SeqCst), 0);
        assert_eq!(log.lag("manage-user", "test"), 1);
    }
}
