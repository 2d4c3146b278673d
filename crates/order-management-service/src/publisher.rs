//! 订单事件发布
//!
//! 业务操作只负责把事件放入有界队列，由后台分发任务按订单 id 作 key
//! 发布到事件总线。发布失败按重试策略退避重试，耗尽后记录错误与指标，
//! 不影响已经完成的业务写入。
//!
//! 注意：订单状态写入与事件发布之间没有事务保证，进程在两者之间崩溃会丢失事件。

use std::sync::Arc;

use async_trait::async_trait;
use order_shared::config::{KafkaConfig, PublisherConfig};
use order_shared::error::{OrderError, Result};
use order_shared::events::DomainEvent;
use order_shared::kafka::KafkaProducer;
use order_shared::observability::metrics;
use order_shared::retry::{RetryPolicy, retry_with_policy};
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// 事件发布接口
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: &DomainEvent) -> Result<()>;
}

/// 发布到 Kafka 订单事件 topic
pub struct KafkaEventPublisher {
    producer: KafkaProducer,
    topic: String,
}

impl KafkaEventPublisher {
    pub fn new(producer: KafkaProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }

    /// 按配置创建生产者，发布到订单事件 topic
    pub fn from_config(config: &KafkaConfig) -> Result<Self> {
        Ok(Self::new(
            KafkaProducer::new(config)?,
            config.order_events_topic.clone(),
        ))
    }
}

#[async_trait]
impl EventPublisher for KafkaEventPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        let (partition, offset) = self
            .producer
            .send_json(&self.topic, &event.partition_key(), event)
            .await?;

        debug!(
            event_type = %event.event_type,
            order_id = event.payload.order_id,
            partition,
            offset,
            "订单事件已发布"
        );
        Ok(())
    }
}

/// 分发任务的累计结果
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DispatchStats {
    pub delivered: u64,
    pub failed: u64,
}

/// 事件分发入口，可克隆后在多个服务间共享
#[derive(Clone)]
pub struct EventDispatcher {
    sender: mpsc::Sender<DomainEvent>,
}

/// 分发任务句柄
///
/// 所有 `EventDispatcher` 被丢弃后队列关闭，`join` 等待剩余事件发完。
pub struct DispatcherHandle {
    task: JoinHandle<DispatchStats>,
}

impl EventDispatcher {
    pub fn spawn(
        publisher: Arc<dyn EventPublisher>,
        policy: RetryPolicy,
        capacity: usize,
    ) -> (Self, DispatcherHandle) {
        let (sender, receiver) = mpsc::channel(capacity.max(1));
        let task = tokio::spawn(run_dispatcher(publisher, policy, receiver));
        (Self { sender }, DispatcherHandle { task })
    }

    /// 按发布配置启动分发任务
    pub fn with_config(
        publisher: Arc<dyn EventPublisher>,
        config: &PublisherConfig,
    ) -> (Self, DispatcherHandle) {
        Self::spawn(publisher, config.retry_policy(), config.queue_capacity)
    }

    /// 将事件放入发布队列，队列满时等待
    pub async fn dispatch(&self, event: DomainEvent) {
        let event_type = event.event_type.as_str();
        let order_id = event.payload.order_id;
        if self.sender.send(event).await.is_err() {
            metrics::record_event_published(event_type, false);
            error!(event_type, order_id, "事件分发任务已停止，事件被丢弃");
        }
    }
}

impl DispatcherHandle {
    pub async fn join(self) -> DispatchStats {
        match self.task.await {
            Ok(stats) => stats,
            Err(e) => {
                error!(error = %e, "事件分发任务异常退出");
                DispatchStats::default()
            }
        }
    }
}

async fn run_dispatcher(
    publisher: Arc<dyn EventPublisher>,
    policy: RetryPolicy,
    mut receiver: mpsc::Receiver<DomainEvent>,
) -> DispatchStats {
    let mut stats = DispatchStats::default();

    while let Some(event) = receiver.recv().await {
        let event_type = event.event_type.as_str();
        let order_id = event.payload.order_id;

        let publisher = &publisher;
        let event = &event;
        let result = retry_with_policy(
            &policy,
            "publish_order_event",
            |e| matches!(e, OrderError::Kafka(_)),
            move || publisher.publish(event),
        )
        .await;

        match result {
            Ok(()) => {
                stats.delivered += 1;
                metrics::record_event_published(event_type, true);
            }
            Err(e) => {
                stats.failed += 1;
                metrics::record_event_published(event_type, false);
                error!(event_type, order_id, error = %e, "订单事件发布失败，已放弃");
            }
        }
    }

    info!(
        delivered = stats.delivered,
        failed = stats.failed,
        "事件分发任务已退出"
    );
    stats
}

/// 记录所有事件的发布端，可注入失败
#[derive(Clone, Default)]
pub struct RecordingPublisher {
    events: Arc<Mutex<Vec<DomainEvent>>>,
    failures_left: Arc<Mutex<usize>>,
}

impl RecordingPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// 让接下来的 n 次发布失败
    pub async fn fail_next(&self, n: usize) {
        *self.failures_left.lock().await = n;
    }

    pub async fn events(&self) -> Vec<DomainEvent> {
        self.events.lock().await.clone()
    }
}

#[async_trait]
impl EventPublisher for RecordingPublisher {
    async fn publish(&self, event: &DomainEvent) -> Result<()> {
        let mut failures = self.failures_left.lock().await;
        if *failures > 0 {
            *failures -= 1;
            return Err(OrderError::Kafka("模拟发布失败".to_string()));
        }
        drop(failures);
        self.events.lock().await.push(event.clone());
        Ok(())
    }
}
