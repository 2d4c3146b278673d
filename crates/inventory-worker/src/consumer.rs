//! 订单事件消费循环
//!
//! 逐条拉取订单事件，解码后交给库存扣减器，并根据结果决定 offset 的去向：
//! - 成功（含重复投递、未知事件类型）：提交 offset
//! - 毒消息：写入死信队列后提交 offset；死信写入失败则回退重投，绝不丢消息
//! - 瞬时失败：不提交，回退到该消息并退避，之后重新投递
//!
//! 同一分区内消息严格按接收顺序处理，瞬时失败会阻塞该分区直到恢复。
//! 本循环是唯一提交 offset、写入死信队列的组件。

use std::sync::Arc;
use std::time::Duration;

use order_management::repository::InventoryStore;
use order_shared::config::KafkaConfig;
use order_shared::dlq::{DeadLetterRecord, DeadLetterSink};
use order_shared::error::Result;
use order_shared::events::{EventEnvelope, EventType};
use order_shared::kafka::{ConsumerMessage, MessageSource};
use order_shared::observability::metrics;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::applier::{ApplyOutcome, InventoryApplier};
use crate::classifier::{FailureClass, classify};

/// 消费循环参数
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerSettings {
    /// 瞬时失败后重新拉取前的等待时间
    pub transient_backoff: Duration,
    /// 拉取出错后的等待时间
    pub fetch_error_backoff: Duration,
}

impl ConsumerSettings {
    pub fn from_config(config: &KafkaConfig) -> Self {
        Self {
            transient_backoff: config.transient_backoff(),
            fetch_error_backoff: config.fetch_error_backoff(),
        }
    }
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self::from_config(&KafkaConfig::default())
    }
}

/// 单条消息的处理结果（成功路径）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandleOutcome {
    Applied { items: usize },
    AlreadyApplied,
    /// 与库存无关的事件类型
    Ignored,
}

impl HandleOutcome {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Applied { .. } => "applied",
            Self::AlreadyApplied => "duplicate",
            Self::Ignored => "ignored",
        }
    }
}

impl From<ApplyOutcome> for HandleOutcome {
    fn from(outcome: ApplyOutcome) -> Self {
        match outcome {
            ApplyOutcome::Applied { items } => Self::Applied { items },
            ApplyOutcome::AlreadyApplied => Self::AlreadyApplied,
        }
    }
}

/// 消息最终去向
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// offset 已（尝试）提交，继续下一条
    Advance,
    /// 需回退到该消息，退避后重新拉取同一条
    Retry,
}

/// 消费循环的累计统计
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConsumerStats {
    pub received: u64,
    pub applied: u64,
    pub duplicates: u64,
    pub ignored: u64,
    pub dead_lettered: u64,
    pub transient_failures: u64,
    pub commit_failures: u64,
    pub dead_letter_failures: u64,
    pub rewind_failures: u64,
}

/// 库存事件消费者
pub struct InventoryConsumer<M, S>
where
    M: MessageSource,
    S: InventoryStore,
{
    source: M,
    applier: InventoryApplier<S>,
    dead_letters: Arc<dyn DeadLetterSink>,
    settings: ConsumerSettings,
    stats: ConsumerStats,
}

impl<M, S> InventoryConsumer<M, S>
where
    M: MessageSource,
    S: InventoryStore,
{
    pub fn new(
        source: M,
        applier: InventoryApplier<S>,
        dead_letters: Arc<dyn DeadLetterSink>,
        settings: ConsumerSettings,
    ) -> Self {
        Self {
            source,
            applier,
            dead_letters,
            settings,
            stats: ConsumerStats::default(),
        }
    }

    /// 运行消费循环，直到收到关闭信号或消息流关闭
    ///
    /// 关闭时正在处理的消息会先处理完；尚未提交的消息之后会被重新投递。
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> ConsumerStats {
        info!("库存事件消费者已启动");

        loop {
            if *shutdown.borrow() {
                info!("收到关闭信号，停止消费");
                break;
            }

            let fetched = tokio::select! {
                biased;
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        info!("关闭信号通道已断开，停止消费");
                        break;
                    }
                    continue;
                }
                fetched = self.source.fetch() => fetched,
            };

            let msg = match fetched {
                Ok(Some(msg)) => msg,
                Ok(None) => {
                    info!("消息流已关闭，停止消费");
                    break;
                }
                Err(e) => {
                    error!(error = %e, "拉取消息失败");
                    if !wait_or_shutdown(&mut shutdown, self.settings.fetch_error_backoff).await {
                        break;
                    }
                    continue;
                }
            };

            if self.process(&msg).await == Disposition::Retry {
                // 回退未成功前不能再拉取：后续消息一旦提交就会越过这条消息
                if !self.rewind(&msg, &mut shutdown).await
                    || !wait_or_shutdown(&mut shutdown, self.settings.transient_backoff).await
                {
                    break;
                }
            }
        }

        info!(stats = ?self.stats, "库存事件消费者已停止");
        self.stats
    }

    async fn process(&mut self, msg: &ConsumerMessage) -> Disposition {
        self.stats.received += 1;

        let err = match self.handle_message(msg).await {
            Ok(outcome) => {
                match outcome {
                    HandleOutcome::Applied { .. } => self.stats.applied += 1,
                    HandleOutcome::AlreadyApplied => self.stats.duplicates += 1,
                    HandleOutcome::Ignored => self.stats.ignored += 1,
                }
                metrics::record_inventory_event(outcome.as_str());
                self.commit(msg).await;
                return Disposition::Advance;
            }
            Err(err) => err,
        };

        let class = classify(&err);
        metrics::record_inventory_event(class.as_str());

        match class {
            FailureClass::Poison => {
                warn!(
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    error = %err,
                    "毒消息，转入死信队列"
                );
                let record = DeadLetterRecord::from_message(msg, err.to_string());
                match self.dead_letters.publish(&record).await {
                    Ok(()) => {
                        self.stats.dead_lettered += 1;
                        self.commit(msg).await;
                        Disposition::Advance
                    }
                    Err(dlq_err) => {
                        self.stats.dead_letter_failures += 1;
                        metrics::record_dead_letter_failure();
                        error!(
                            offset = msg.offset,
                            error = %dlq_err,
                            "写入死信队列失败，消息将被重新投递"
                        );
                        Disposition::Retry
                    }
                }
            }
            FailureClass::Transient => {
                self.stats.transient_failures += 1;
                warn!(
                    topic = %msg.topic,
                    partition = msg.partition,
                    offset = msg.offset,
                    error = %err,
                    "瞬时失败，不提交 offset，等待重新投递"
                );
                Disposition::Retry
            }
        }
    }

    /// 解码并处理单条消息
    ///
    /// 返回的错误由调用方分类；这里不提交 offset，也不写死信。
    pub async fn handle_message(&self, msg: &ConsumerMessage) -> Result<HandleOutcome> {
        let envelope = EventEnvelope::decode(&msg.payload)?;

        let Some(event_type) = envelope.known_type() else {
            debug!(event_type = %envelope.event_type, offset = msg.offset, "未知事件类型，跳过");
            return Ok(HandleOutcome::Ignored);
        };

        match event_type {
            EventType::OrderPaid => {
                let payload = envelope.order_payload()?;
                let outcome = self.applier.apply(payload.order_id).await?;
                Ok(outcome.into())
            }
            EventType::OrderCreated => Ok(HandleOutcome::Ignored),
        }
    }

    async fn commit(&mut self, msg: &ConsumerMessage) {
        if let Err(e) = self.source.commit(msg).await {
            // 提交丢失只会导致重投，由幂等账本吸收
            self.stats.commit_failures += 1;
            metrics::record_offset_commit_failure();
            error!(
                partition = msg.partition,
                offset = msg.offset,
                error = %e,
                "提交 offset 失败"
            );
        }
    }

    /// 回退到该消息，失败则按拉取退避重试
    ///
    /// 收到关闭信号时返回 false，此时循环直接退出，重启后从最后提交的位置继续。
    async fn rewind(&mut self, msg: &ConsumerMessage, shutdown: &mut watch::Receiver<bool>) -> bool {
        loop {
            match self.source.rewind(msg).await {
                Ok(()) => return true,
                Err(e) => {
                    self.stats.rewind_failures += 1;
                    error!(
                        partition = msg.partition,
                        offset = msg.offset,
                        error = %e,
                        "回退 offset 失败，稍后重试"
                    );
                    if !wait_or_shutdown(shutdown, self.settings.fetch_error_backoff).await {
                        return false;
                    }
                }
            }
        }
    }
}

/// 等待指定时间，期间收到关闭信号则返回 false
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, delay: Duration) -> bool {
    tokio::select! {
        biased;
        changed = shutdown.changed() => changed.is_ok() && !*shutdown.borrow(),
        _ = tokio::time::sleep(delay) => true,
    }
}
