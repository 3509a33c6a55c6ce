use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use serde_json::Value;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;

use crate::config::{ConsumerConfig, EvictionPolicy, ProducerConfig, RunArgs, RunConfig};
use crate::error::ServerError;
use topic_engine::{PublishHandle, SubscriptionCursor, TopicError, TopicRegistry};

type Tasks<T> = JoinSet<Result<T, ServerError>>;

pub async fn run(args: RunArgs) -> Result<(), ServerError> {
    tracing::info!("topic-server starting");

    // --- Load config ---
    let config = RunConfig::load(&args.config)?;
    tracing::info!(config = %args.config, "loaded config");

    // --- Create topics ---
    if config.topics.is_empty() {
        return Err(ServerError::NoComponents("[[topics]]"));
    }
    let registry = TopicRegistry::<Value>::new();
    for topic_cfg in &config.topics {
        registry
            .create_from_config(topic_cfg)
            .map_err(|e| e.with_context(format!("topic '{}'", topic_cfg.name)))?;
    }

    let token = CancellationToken::new();
    let producers_done = CancellationToken::new();

    // --- Subscribe consumers before any producer starts ---
    let mut consumers: Tasks<ConsumerSummary> = JoinSet::new();
    for consumer_cfg in config.consumers {
        let topic = registry
            .topic(&consumer_cfg.topic)
            .map_err(|e| e.with_context(format!("consumer '{}'", consumer_cfg.id)))?;
        let cursor = topic.subscribe(consumer_cfg.id.clone())?;
        tracing::info!(
            consumer = %consumer_cfg.id,
            topic = %consumer_cfg.topic,
            on_evicted = ?consumer_cfg.on_evicted,
            limit = ?consumer_cfg.limit,
            "spawned consumer"
        );
        consumers.spawn(run_consumer(consumer_cfg, cursor, token.clone(), producers_done.clone()));
    }

    // --- Spawn producers ---
    let mut producers: Tasks<()> = JoinSet::new();
    for producer_cfg in config.producers {
        let topic = registry
            .topic(&producer_cfg.topic)
            .map_err(|e| e.with_context(format!("producer '{}'", producer_cfg.id)))?;
        let template = serde_json::to_value(&producer_cfg.payload)?;
        let publisher = topic.publisher(producer_cfg.id.clone());
        tracing::info!(
            producer = %producer_cfg.id,
            topic = %producer_cfg.topic,
            count = producer_cfg.count,
            interval_ms = producer_cfg.interval_ms,
            "spawned producer"
        );
        producers.spawn(run_producer(producer_cfg, template, publisher, token.clone()));
    }

    tracing::info!("runner ready");

    // --- Wait for producers, then let consumers catch up ---
    let mut ctrl_c = std::pin::pin!(tokio::signal::ctrl_c());
    let mut failed = 0;
    let drain = Duration::from_millis(config.drain_timeout_ms);

    let (n, interrupted) = supervise(&mut producers, ctrl_c.as_mut()).await?;
    failed += n;
    producers_done.cancel();

    if interrupted {
        failed += shutdown(&token, &mut producers, &mut consumers, drain).await;
    } else {
        let (n, interrupted) = supervise(&mut consumers, ctrl_c.as_mut()).await?;
        failed += n;
        if interrupted {
            failed += shutdown(&token, &mut producers, &mut consumers, drain).await;
        }
    }

    // --- Final topic stats ---
    for name in registry.topic_names() {
        if let Some(topic) = registry.get(&name) {
            let stats = topic.stats();
            tracing::info!(
                topic = %stats.name,
                capacity = stats.capacity,
                start_offset = stats.start_offset,
                end_offset = stats.end_offset,
                retained = stats.len,
                "topic stats"
            );
        }
    }

    if failed > 0 {
        return Err(ServerError::TasksFailed(failed));
    }
    tracing::info!("run complete");
    Ok(())
}

/// Log a joined task's outcome. Returns 1 if it failed, 0 otherwise.
fn record<T>(joined: Result<Result<T, ServerError>, JoinError>) -> usize {
    match joined {
        Ok(Ok(_)) => 0,
        Ok(Err(e)) => {
            tracing::error!(error = %e, "task failed");
            1
        }
        Err(e) => {
            tracing::error!(error = %e, "task panicked or was aborted");
            1
        }
    }
}

/// Join every task in `tasks`, logging failures. Returns the number of
/// failed tasks and whether Ctrl+C arrived first.
async fn supervise<T: 'static>(
    tasks: &mut Tasks<T>,
    mut ctrl_c: Pin<&mut impl Future<Output = std::io::Result<()>>>,
) -> Result<(usize, bool), ServerError> {
    let mut failed = 0;
    loop {
        tokio::select! {
            next = tasks.join_next() => match next {
                None => return Ok((failed, false)),
                Some(joined) => failed += record(joined),
            },
            res = ctrl_c.as_mut() => {
                res?;
                tracing::info!("shutting down...");
                return Ok((failed, true));
            }
        }
    }
}

/// Cancel everything, give tasks `drain` to stop, then abort the rest.
/// Returns the number of tasks that failed while draining.
async fn shutdown(
    token: &CancellationToken,
    producers: &mut Tasks<()>,
    consumers: &mut Tasks<ConsumerSummary>,
    drain: Duration,
) -> usize {
    token.cancel();
    let mut failed = 0;
    let joined = tokio::time::timeout(drain, async {
        while let Some(joined) = producers.join_next().await {
            failed += record(joined);
        }
        while let Some(joined) = consumers.join_next().await {
            failed += record(joined);
        }
    })
    .await;
    if joined.is_err() {
        tracing::warn!("drain timed out, aborting remaining tasks");
        producers.abort_all();
        consumers.abort_all();
    }
    failed
}

// ═══════════════════════════════════════════════════════════════
//  Producer task
// ═══════════════════════════════════════════════════════════════

/// Payload for message `seq`: tables get `seq` injected, anything else is
/// sent as-is.
fn payload_for(template: &Value, seq: u64) -> Value {
    let mut payload = template.clone();
    if let Value::Object(map) = &mut payload {
        map.insert("seq".to_string(), Value::from(seq));
    }
    payload
}

async fn run_producer(
    config: ProducerConfig,
    template: Value,
    publisher: PublishHandle<Value>,
    token: CancellationToken,
) -> Result<(), ServerError> {
    let destination = config.destination().to_string();
    let interval = Duration::from_millis(config.interval_ms);
    let mut published = 0u64;

    for seq in 0..config.count {
        if token.is_cancelled() {
            break;
        }
        let offset = publisher.send(payload_for(&template, seq), destination.clone())?;
        published += 1;
        tracing::debug!(producer = %config.id, topic = %config.topic, seq, offset, "published");

        if interval.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = token.cancelled() => break,
            }
        }
    }

    tracing::info!(producer = %config.id, topic = %config.topic, published, "producer finished");
    Ok(())
}

// ═══════════════════════════════════════════════════════════════
//  Consumer task
// ═══════════════════════════════════════════════════════════════

/// What a consumer saw before it stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ConsumerSummary {
    received: u64,
    /// Offsets skipped after falling out of retention.
    lost: u64,
    /// Next offset the cursor would have read.
    offset: u64,
}

async fn run_consumer(
    config: ConsumerConfig,
    mut cursor: SubscriptionCursor<Value>,
    token: CancellationToken,
    producers_done: CancellationToken,
) -> Result<ConsumerSummary, ServerError> {
    let mut received = 0u64;
    let mut lost = 0u64;

    loop {
        if config.limit.is_some_and(|limit| received >= limit) {
            break;
        }
        tokio::select! {
            biased;
            _ = token.cancelled() => break,
            res = cursor.recv() => match res {
                Ok(delivery) => {
                    received += 1;
                    let message = delivery.message();
                    tracing::info!(
                        consumer = %config.id,
                        topic = %config.topic,
                        offset = delivery.offset(),
                        message_id = %message.id(),
                        source = %message.source(),
                        payload = %message.payload(),
                        "received"
                    );
                }
                Err(e @ TopicError::Evicted { .. }) => match config.on_evicted {
                    EvictionPolicy::SkipToStart => {
                        let skipped = cursor.seek_to_start();
                        lost += skipped;
                        tracing::warn!(
                            consumer = %config.id,
                            topic = %config.topic,
                            skipped,
                            resume_at = cursor.offset(),
                            "messages lost to eviction, resuming at oldest retained"
                        );
                    }
                    EvictionPolicy::Fail => {
                        return Err(ServerError::Consumer { consumer: config.id, source: e });
                    }
                },
                Err(e) => return Err(ServerError::Consumer { consumer: config.id, source: e }),
            },
            // Only reached once recv has nothing ready: the consumer is caught up.
            _ = producers_done.cancelled() => break,
        }
    }

    tracing::info!(
        consumer = %config.id,
        topic = %config.topic,
        received,
        lost,
        offset = cursor.offset(),
        "consumer stopped"
    );
    Ok(ConsumerSummary {
        received,
        lost,
        offset: cursor.offset(),
    })
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use serde_json::json;
    use topic_engine::Topic;

    use super::*;

    #[test]
    fn payload_injects_seq_into_objects_only() {
        assert_eq!(payload_for(&json!({"item": "book"}), 3), json!({"item": "book", "seq": 3}));
        assert_eq!(payload_for(&json!("ping"), 3), json!("ping"));
    }

    fn producer(count: u64) -> ProducerConfig {
        ProducerConfig {
            id: "shop".into(),
            topic: "orders".into(),
            destination: None,
            count,
            interval_ms: 0,
            payload: toml::Value::Table(toml::Table::new()),
        }
    }

    fn consumer(on_evicted: EvictionPolicy, limit: Option<u64>) -> ConsumerConfig {
        ConsumerConfig {
            id: "billing".into(),
            topic: "orders".into(),
            on_evicted,
            limit,
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn producer_publishes_count_messages_with_seq() {
        let topic = Topic::<Value>::new("orders", 16).unwrap();
        run_producer(producer(3), json!({}), topic.publisher("shop"), CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(topic.end_offset(), 3);
        let msg = topic.read_at(2).unwrap();
        assert_eq!(msg.payload(), &json!({"seq": 2}));
        assert_eq!(msg.source(), "shop");
        assert_eq!(msg.destination(), "orders");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn consumer_stops_at_limit() {
        let topic = Topic::<Value>::new("orders", 16).unwrap();
        for i in 0..5 {
            topic.publish(json!(i), "shop", "orders").unwrap();
        }
        let cursor = topic.subscribe("billing").unwrap();
        let summary = run_consumer(
            consumer(EvictionPolicy::Fail, Some(2)),
            cursor,
            CancellationToken::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary, ConsumerSummary { received: 2, lost: 0, offset: 2 });
        // The cursor was dropped with the task.
        assert!(topic.subscribers().is_empty());
    }

    #[tokio::test(flavor = "current_thread")]
    async fn consumer_fails_on_eviction_when_configured() {
        let topic = Topic::<Value>::new("orders", 2).unwrap();
        let cursor = topic.subscribe("billing").unwrap();
        for i in 0..4 {
            topic.publish(json!(i), "shop", "orders").unwrap();
        }
        let err = run_consumer(
            consumer(EvictionPolicy::Fail, None),
            cursor,
            CancellationToken::new(),
            CancellationToken::new(),
        )
        .await
        .unwrap_err();
        assert!(matches!(
            err,
            ServerError::Consumer { source: TopicError::Evicted { offset: 0, start_offset: 2 }, .. }
        ));
    }

    #[tokio::test(flavor = "current_thread")]
    async fn consumer_skips_lost_messages_and_drains_after_producers_finish() {
        let topic = Topic::<Value>::new("orders", 2).unwrap();
        let cursor = topic.subscribe("billing").unwrap();
        for i in 0..4 {
            topic.publish(json!(i), "shop", "orders").unwrap();
        }
        let done = CancellationToken::new();
        done.cancel();

        let summary = run_consumer(
            consumer(EvictionPolicy::SkipToStart, None),
            cursor,
            CancellationToken::new(),
            done,
        )
        .await
        .unwrap();
        // Offsets 0 and 1 were evicted; 2 and 3 were read after the skip.
        assert_eq!(summary, ConsumerSummary { received: 2, lost: 2, offset: 4 });
    }

    #[tokio::test(flavor = "current_thread")]
    async fn cancelled_consumer_stops_without_reading() {
        let topic = Topic::<Value>::new("orders", 4).unwrap();
        topic.publish(json!(0), "shop", "orders").unwrap();
        let cursor = topic.subscribe("billing").unwrap();
        let token = CancellationToken::new();
        token.cancel();

        let summary = run_consumer(
            consumer(EvictionPolicy::SkipToStart, None),
            cursor,
            token,
            CancellationToken::new(),
        )
        .await
        .unwrap();
        assert_eq!(summary, ConsumerSummary { received: 0, lost: 0, offset: 0 });
    }

    fn config_file(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    fn run_args(file: &tempfile::NamedTempFile) -> RunArgs {
        RunArgs {
            config: file.path().to_str().unwrap().to_string(),
        }
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_finishes_once_producers_stop_and_consumers_drain() {
        let file = config_file(
            r#"
            [[topics]]
            name = "orders"
            capacity = 8

            [[producers]]
            id = "shop"
            topic = "orders"
            count = 20
            payload = { item = "book" }

            [[consumers]]
            id = "billing"
            topic = "orders"

            [[consumers]]
            id = "sampler"
            topic = "orders"
            limit = 3
            "#,
        );

        let result = tokio::time::timeout(Duration::from_secs(10), run(run_args(&file)))
            .await
            .expect("run should terminate on its own");
        assert!(result.is_ok(), "run failed: {result:?}");
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_counts_a_consumer_that_fails_on_eviction() {
        // Two producers interleave on a one-slot topic, so the consumer is
        // always behind by the time it wakes.
        let file = config_file(
            r#"
            [[topics]]
            name = "orders"
            capacity = 1

            [[producers]]
            id = "shop"
            topic = "orders"
            count = 50

            [[producers]]
            id = "outlet"
            topic = "orders"
            count = 50

            [[consumers]]
            id = "archiver"
            topic = "orders"
            on_evicted = "fail"
            "#,
        );

        let result = tokio::time::timeout(Duration::from_secs(10), run(run_args(&file)))
            .await
            .expect("run should terminate on its own");
        assert!(
            matches!(result, Err(ServerError::TasksFailed(1))),
            "unexpected result: {result:?}"
        );
    }

    #[tokio::test(flavor = "current_thread")]
    async fn run_rejects_a_config_without_topics() {
        let file = config_file("drain_timeout_ms = 100\n");
        let err = run(run_args(&file)).await.unwrap_err();
        assert!(matches!(err, ServerError::NoComponents(_)));
    }
}
