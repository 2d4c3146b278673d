//! 消费循环集成测试
//!
//! 用内存存储、内存消息源与记录型死信端驱动完整消费循环，
//! 验证 offset 提交、死信隔离、瞬时失败重投与幂等扣减的组合行为。

use std::sync::Arc;
use std::time::Duration;

use inventory_worker::{ConsumerSettings, ConsumerStats, InventoryApplier, InventoryConsumer};
use order_management::models::NewProduct;
use order_management::repository::{MemoryStore, OrderRepositoryTrait, ProductRepositoryTrait};
use order_shared::kafka::topics;
use order_shared::test_utils::{
    MemoryMessageSource, RecordingDeadLetterSink, SourceLog, paid_event_message, test_message,
};
use tokio::sync::{Mutex, watch};

struct Scenario {
    store: MemoryStore,
    sink: RecordingDeadLetterSink,
    order_id: i64,
    product_id: i64,
}

impl Scenario {
    /// 一个订单：商品单价 500，数量 2
    async fn new(stock: i64) -> Self {
        let store = MemoryStore::new();
        let product = store
            .create_product(&NewProduct::new("咖啡机", 500, stock))
            .await
            .unwrap();
        let order = store.create_order(1).await.unwrap();
        store.add_item(order.id, product.id, 2, product.price).await.unwrap();

        Self {
            store,
            sink: RecordingDeadLetterSink::new(),
            order_id: order.id,
            product_id: product.id,
        }
    }

    async fn run(&self, source: MemoryMessageSource) -> (ConsumerStats, Arc<Mutex<SourceLog>>) {
        let log = source.log();
        let consumer = InventoryConsumer::new(
            source,
            InventoryApplier::new(Arc::new(self.store.clone())),
            Arc::new(self.sink.clone()),
            ConsumerSettings {
                transient_backoff: Duration::from_millis(1),
                fetch_error_backoff: Duration::from_millis(1),
            },
        );
        let (_tx, rx) = watch::channel(false);
        let stats = consumer.run(rx).await;
        (stats, log)
    }

    async fn stock(&self) -> i64 {
        self.store.product_stock(self.product_id).await.unwrap()
    }
}

fn committed_offsets(log: &SourceLog) -> Vec<i64> {
    log.commits.iter().map(|(_, _, next)| *next).collect()
}

#[tokio::test]
async fn test_redelivered_paid_event_decrements_once() {
    let s = Scenario::new(10).await;
    let source = MemoryMessageSource::new([
        paid_event_message(0, 0, s.order_id),
        paid_event_message(0, 1, s.order_id),
    ]);

    let (stats, log) = s.run(source).await;

    assert_eq!(stats.applied, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(s.stock().await, 8);
    assert_eq!(s.store.ledger_entries().await.len(), 1);
    assert_eq!(committed_offsets(&*log.lock().await), vec![1, 2]);
}

#[tokio::test]
async fn test_malformed_payload_is_dead_lettered_and_committed() {
    let s = Scenario::new(10).await;
    let source = MemoryMessageSource::new([
        test_message(0, 0, b"{\"type\": \"order.paid\", \"payload\": "),
        paid_event_message(0, 1, s.order_id),
    ]);

    let (stats, log) = s.run(source).await;

    let records = s.sink.records().await;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].original_topic, topics::ORDER_EVENTS);
    assert_eq!(records[0].offset, 0);
    assert!(records[0].payload.is_string());

    // 毒消息不阻塞后续消息
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(committed_offsets(&*log.lock().await), vec![1, 2]);
    assert!(log.lock().await.rewinds.is_empty());
}

#[tokio::test]
async fn test_transient_failure_retries_until_storage_recovers() {
    let s = Scenario::new(10).await;
    s.store.fail_next_begins(2);
    let source = MemoryMessageSource::new([paid_event_message(0, 0, s.order_id)]);

    let (stats, log) = s.run(source).await;
    let log = log.lock().await;

    // 两次失败都回退到同一 offset，恢复后只扣减一次
    assert_eq!(stats.transient_failures, 2);
    assert_eq!(log.rewinds, vec![0, 0]);
    assert_eq!(committed_offsets(&log), vec![1]);
    assert_eq!(stats.applied, 1);
    assert_eq!(s.stock().await, 8);
    assert!(s.sink.records().await.is_empty());
}

#[tokio::test]
async fn test_outage_after_ledger_insert_is_rolled_back() {
    let s = Scenario::new(10).await;
    s.store.fail_next_decrements(1);
    let source = MemoryMessageSource::new([paid_event_message(0, 0, s.order_id)]);

    let (stats, _) = s.run(source).await;

    assert_eq!(stats.transient_failures, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.duplicates, 0);
    assert_eq!(s.stock().await, 8);
    assert_eq!(s.store.ledger_entries().await.len(), 1);
}

#[tokio::test]
async fn test_insufficient_stock_is_poison_and_leaves_no_ledger_row() {
    let s = Scenario::new(1).await;
    let source = MemoryMessageSource::new([paid_event_message(0, 0, s.order_id)]);

    let (stats, log) = s.run(source).await;

    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(s.stock().await, 1);
    assert!(s.store.ledger_entries().await.is_empty());
    assert_eq!(committed_offsets(&*log.lock().await), vec![1]);

    let records = s.sink.records().await;
    assert!(records[0].error.contains("库存不足"));
    assert_eq!(records[0].payload["payload"]["order_id"], s.order_id);
}

#[tokio::test]
async fn test_unknown_order_is_poison() {
    let s = Scenario::new(10).await;
    let source = MemoryMessageSource::new([paid_event_message(0, 0, 4_242)]);

    let (stats, _) = s.run(source).await;

    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(s.stock().await, 10);
}

#[tokio::test]
async fn test_dead_letter_failure_keeps_message_uncommitted() {
    let s = Scenario::new(10).await;
    s.sink.fail_next(1).await;
    let source = MemoryMessageSource::new([test_message(0, 0, b"garbage")]);

    let (stats, log) = s.run(source).await;
    let log = log.lock().await;

    // 第一次写死信失败 -> 回退；重投后写入成功才提交
    assert_eq!(stats.dead_letter_failures, 1);
    assert_eq!(stats.dead_lettered, 1);
    assert_eq!(log.rewinds, vec![0]);
    assert_eq!(committed_offsets(&log), vec![1]);
    assert_eq!(s.sink.records().await.len(), 1);
}

#[tokio::test]
async fn test_unknown_event_types_are_committed_without_side_effects() {
    let s = Scenario::new(10).await;
    let source = MemoryMessageSource::new([
        test_message(
            0,
            0,
            br#"{"type":"test.message","payload":{"msg":"hello"},"timestamp":"2026-01-01T00:00:00Z"}"#,
        ),
        test_message(0, 1, br#"{"type":"order.refunded","payload":{"order_id":1}}"#),
    ]);

    let (stats, log) = s.run(source).await;

    assert_eq!(stats.ignored, 2);
    assert!(s.sink.records().await.is_empty());
    assert_eq!(committed_offsets(&*log.lock().await), vec![1, 2]);
    assert_eq!(s.stock().await, 10);
}

#[tokio::test]
async fn test_non_rfc3339_timestamps_are_not_poison() {
    let s = Scenario::new(10).await;
    let paid = format!(
        r#"{{"type":"order.paid","payload":{{"order_id":{}}},"timestamp":"2026-01-01 10:00:00"}}"#,
        s.order_id
    );
    let source = MemoryMessageSource::new([
        test_message(0, 0, br#"{"type":"user.signed_up","payload":{},"timestamp":1700000000}"#),
        test_message(0, 1, paid.as_bytes()),
    ]);

    let (stats, log) = s.run(source).await;

    assert_eq!(stats.ignored, 1);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.dead_lettered, 0);
    assert!(s.sink.records().await.is_empty());
    assert_eq!(s.stock().await, 8);
    assert_eq!(committed_offsets(&*log.lock().await), vec![1, 2]);
}

#[tokio::test]
async fn test_failed_rewind_blocks_partition_until_it_succeeds() {
    let s = Scenario::new(10).await;
    s.store.fail_next_begins(1);
    let source = MemoryMessageSource::new([
        paid_event_message(0, 0, s.order_id),
        paid_event_message(0, 1, s.order_id),
    ])
    .fail_rewinds(1);

    let (stats, log) = s.run(source).await;
    let log = log.lock().await;

    // offset 0 先被重新处理并提交，之后才轮到 offset 1
    assert_eq!(stats.rewind_failures, 1);
    assert_eq!(log.rewinds, vec![0]);
    assert_eq!(committed_offsets(&log), vec![1, 2]);
    assert_eq!(stats.applied, 1);
    assert_eq!(stats.duplicates, 1);
    assert_eq!(s.stock().await, 8);
}

#[tokio::test]
async fn test_shutdown_during_failing_rewind_commits_nothing() {
    let s = Scenario::new(10).await;
    s.store.fail_next_begins(1);
    let source = MemoryMessageSource::new([
        paid_event_message(0, 0, s.order_id),
        paid_event_message(0, 1, s.order_id),
    ])
    .fail_rewinds(usize::MAX);
    let log = source.log();
    let consumer = InventoryConsumer::new(
        source,
        InventoryApplier::new(Arc::new(s.store.clone())),
        Arc::new(s.sink.clone()),
        ConsumerSettings {
            transient_backoff: Duration::from_millis(1),
            fetch_error_backoff: Duration::from_millis(5),
        },
    );
    let (tx, rx) = watch::channel(false);
    let handle = tokio::spawn(consumer.run(rx));

    tokio::time::sleep(Duration::from_millis(30)).await;
    tx.send(true).unwrap();
    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("消费循环未在关闭信号后退出")
        .unwrap();

    // 回退一直失败时不再拉取后续消息，任何 offset 都不提交
    assert_eq!(stats.received, 1);
    assert!(stats.rewind_failures >= 1);
    assert!(log.lock().await.commits.is_empty());
    assert_eq!(s.stock().await, 10);
}

#[tokio::test]
async fn test_shutdown_signal_stops_idle_loop() {
    let s = Scenario::new(10).await;
    let consumer = InventoryConsumer::new(
        PendingSource,
        InventoryApplier::new(Arc::new(s.store.clone())),
        Arc::new(s.sink.clone()),
        ConsumerSettings::default(),
    );
    let (tx, rx) = watch::channel(false);

    let handle = tokio::spawn(consumer.run(rx));
    tx.send(true).unwrap();

    let stats = tokio::time::timeout(Duration::from_secs(5), handle)
        .await
        .expect("消费循环未在关闭信号后退出")
        .unwrap();
    assert_eq!(stats.received, 0);
}

/// 永远等不到消息的消息源
struct PendingSource;

#[async_trait::async_trait]
impl order_shared::kafka::MessageSource for PendingSource {
    async fn fetch(&mut self) -> order_shared::error::Result<Option<order_shared::kafka::ConsumerMessage>> {
        std::future::pending().await
    }

    async fn commit(&mut self, _: &order_shared::kafka::ConsumerMessage) -> order_shared::error::Result<()> {
        Ok(())
    }

    async fn rewind(&mut self, _: &order_shared::kafka::ConsumerMessage) -> order_shared::error::Result<()> {
        Ok(())
    }
}
