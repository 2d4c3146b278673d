//! Kafka 基础设施封装
//!
//! 将 rdkafka 的底层 API 封装为业务友好的 Producer / 消息源抽象。
//! 消费端关闭自动提交，offset 只在业务处理成功或消息被隔离到死信后才手动提交，
//! 以此获得 at-least-once 语义。

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rdkafka::client::ClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, ConsumerContext, StreamConsumer};
use rdkafka::error::KafkaResult;
use rdkafka::message::{BorrowedMessage, Headers, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::{Offset, TopicPartitionList};
use serde::Serialize;
use tracing::{debug, error, info};

use crate::config::KafkaConfig;
use crate::error::{OrderError, Result};
use crate::observability::metrics;

// ---------------------------------------------------------------------------
// Topic 常量
// ---------------------------------------------------------------------------

/// 默认 topic 名称，可被 KafkaConfig 覆盖
pub mod topics {
    pub const ORDER_EVENTS: &str = "orders.events";
    pub const DEAD_LETTER_QUEUE: &str = "orders-events.dlq";
}

/// seek 回退的超时时间
const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// ConsumerMessage
// ---------------------------------------------------------------------------

/// 消费到的 Kafka 消息的统一表示
///
/// 将 rdkafka 的 `BorrowedMessage`（带生命周期约束）转换为拥有所有权的结构体，
/// 使消息可以安全地跨 await 点传递给异步处理函数。
#[derive(Debug, Clone)]
pub struct ConsumerMessage {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<String>,
    pub payload: Vec<u8>,
    pub timestamp: Option<i64>,
    pub headers: HashMap<String, String>,
}

impl ConsumerMessage {
    fn from_borrowed(msg: &BorrowedMessage<'_>) -> Self {
        let key = msg
            .key()
            .and_then(|k| std::str::from_utf8(k).ok())
            .map(String::from);

        let payload = msg.payload().map(|p| p.to_vec()).unwrap_or_default();

        let mut headers = HashMap::new();
        if let Some(h) = msg.headers() {
            for idx in 0..h.count() {
                let header = h.get(idx);
                if let Some(raw) = header.value
                    && let Ok(value) = std::str::from_utf8(raw)
                {
                    headers.insert(header.key.to_string(), value.to_string());
                }
            }
        }

        Self {
            topic: msg.topic().to_string(),
            partition: msg.partition(),
            offset: msg.offset(),
            key,
            payload,
            timestamp: msg.timestamp().to_millis(),
            headers,
        }
    }

    /// 将负载视为 UTF-8 字符串返回（日志用，非法字节做有损替换）
    pub fn payload_lossy(&self) -> String {
        String::from_utf8_lossy(&self.payload).into_owned()
    }
}

// ---------------------------------------------------------------------------
// MessageSource：消费循环依赖的拉取/提交契约
// ---------------------------------------------------------------------------

/// 可手动提交 offset 的消息源
///
/// 消费循环是唯一调用 `commit` / `rewind` 的组件。
#[async_trait]
pub trait MessageSource: Send {
    /// 拉取下一条消息；返回 `Ok(None)` 表示消息流已关闭
    async fn fetch(&mut self) -> Result<Option<ConsumerMessage>>;

    /// 提交该消息的 offset，之后本消费组不会再收到它
    async fn commit(&mut self, msg: &ConsumerMessage) -> Result<()>;

    /// 将分区位置回退到该消息，使其被重新投递
    async fn rewind(&mut self, msg: &ConsumerMessage) -> Result<()>;
}

// ---------------------------------------------------------------------------
// KafkaProducer
// ---------------------------------------------------------------------------

/// 面向业务的 Kafka 生产者
///
/// 内部已派生 Clone（`FutureProducer` 本身是 Arc 包装的）。
#[derive(Clone)]
pub struct KafkaProducer {
    producer: FutureProducer,
    timeout: Duration,
}

impl KafkaProducer {
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        let producer: FutureProducer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("message.timeout.ms", config.message_timeout_ms.to_string())
            .create()
            .map_err(|e| OrderError::Kafka(format!("创建生产者失败: {e}")))?;

        info!(brokers = %config.brokers, "Kafka 生产者已初始化");
        Ok(Self {
            producer,
            timeout: Duration::from_millis(config.message_timeout_ms),
        })
    }

    /// 发送原始字节消息，返回 (partition, offset)
    pub async fn send(&self, topic: &str, key: &str, payload: &[u8]) -> Result<(i32, i64)> {
        let record = FutureRecord::to(topic).key(key).payload(payload);

        // rdkafka 0.39+ 返回 Delivery 结构体而非元组
        let delivery = self
            .producer
            .send(record, self.timeout)
            .await
            .map_err(|(e, _)| OrderError::Kafka(format!("发送消息失败: {e}")))?;

        debug!(
            topic,
            key,
            partition = delivery.partition,
            offset = delivery.offset,
            "消息已发送"
        );
        Ok((delivery.partition, delivery.offset))
    }

    /// 将值序列化为 JSON 后发送
    pub async fn send_json<T: Serialize>(
        &self,
        topic: &str,
        key: &str,
        value: &T,
    ) -> Result<(i32, i64)> {
        let payload = serde_json::to_vec(value)?;
        self.send(topic, key, &payload).await
    }
}

// ---------------------------------------------------------------------------
// CommitReporter：异步提交结果回调
// ---------------------------------------------------------------------------

/// 消费者上下文
///
/// `CommitMode::Async` 的 `commit` 只返回入队错误，broker 端的提交结果
/// 经由 `commit_callback` 回报，这里负责记录日志与指标。
#[derive(Debug, Default)]
pub struct CommitReporter {
    failures: AtomicU64,
}

impl CommitReporter {
    /// broker 端提交失败的累计次数
    pub fn failures(&self) -> u64 {
        self.failures.load(Ordering::Relaxed)
    }
}

impl ClientContext for CommitReporter {}

impl ConsumerContext for CommitReporter {
    fn commit_callback(&self, result: KafkaResult<()>, offsets: &TopicPartitionList) {
        match result {
            Ok(()) => debug!(?offsets, "offset 提交已确认"),
            Err(e) => {
                // 提交丢失只会导致重投，由幂等账本吸收
                self.failures.fetch_add(1, Ordering::Relaxed);
                metrics::record_offset_commit_failure();
                error!(error = %e, ?offsets, "提交 offset 失败");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// KafkaMessageSource
// ---------------------------------------------------------------------------

/// 基于 `StreamConsumer` 的手动提交消息源
pub struct KafkaMessageSource {
    consumer: StreamConsumer<CommitReporter>,
}

impl KafkaMessageSource {
    /// 创建消费者并订阅 topic
    ///
    /// 关闭 `enable.auto.commit`：offset 的推进完全由消费循环决定。
    pub fn new(config: &KafkaConfig, topics: &[&str]) -> Result<Self> {
        let consumer: StreamConsumer<CommitReporter> = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.consumer_group)
            .set("auto.offset.reset", &config.auto_offset_reset)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("enable.partition.eof", "false")
            .create_with_context(CommitReporter::default())
            .map_err(|e| OrderError::Kafka(format!("创建消费者失败: {e}")))?;

        consumer
            .subscribe(topics)
            .map_err(|e| OrderError::Kafka(format!("订阅 topic 失败: {e}")))?;

        info!(
            brokers = %config.brokers,
            group_id = %config.consumer_group,
            ?topics,
            manual_commit = true,
            "Kafka 消费者已初始化"
        );
        Ok(Self { consumer })
    }

    fn partition_list(msg: &ConsumerMessage, offset: i64) -> Result<TopicPartitionList> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(&msg.topic, msg.partition, Offset::Offset(offset))
            .map_err(|e| OrderError::Kafka(format!("构造分区列表失败: {e}")))?;
        Ok(tpl)
    }
}

#[async_trait]
impl MessageSource for KafkaMessageSource {
    async fn fetch(&mut self) -> Result<Option<ConsumerMessage>> {
        let msg = self
            .consumer
            .recv()
            .await
            .map(|borrowed| ConsumerMessage::from_borrowed(&borrowed))
            .map_err(|e| OrderError::Kafka(format!("接收消息失败: {e}")))?;
        Ok(Some(msg))
    }

    async fn commit(&mut self, msg: &ConsumerMessage) -> Result<()> {
        // 提交的是"下一条要读的位置"
        let tpl = Self::partition_list(msg, msg.offset + 1)?;
        self.consumer
            .commit(&tpl, CommitMode::Async)
            .map_err(|e| OrderError::Kafka(format!("提交 offset 失败: {e}")))
    }

    async fn rewind(&mut self, msg: &ConsumerMessage) -> Result<()> {
        self.consumer
            .seek(
                &msg.topic,
                msg.partition,
                Offset::Offset(msg.offset),
                SEEK_TIMEOUT,
            )
            .map_err(|e| OrderError::Kafka(format!("回退 offset 失败: {e}")))
    }
}
