//! 死信队列
//!
//! 无论重试多少次都不可能成功的消息（毒消息）会连同失败原因写入独立的死信 topic，
//! 随后原消息的 offset 被提交，分区得以继续推进。死信记录保留原始负载与定位信息，
//! 供人工排查或手动重放。
//!
//! 运维须知：被隔离的 "order.paid" 事件意味着订单已是 paid 状态但库存尚未扣减，
//! 需要人工修复后重放该记录（或直接修正库存）。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;
use crate::kafka::{ConsumerMessage, KafkaProducer};

// ---------------------------------------------------------------------------
// DeadLetterRecord：死信记录
// ---------------------------------------------------------------------------

/// 死信记录
///
/// `payload` 为原始消息字节：合法 JSON 原样内嵌，否则以（有损 UTF-8）字符串保存，
/// 保证死信记录本身始终是合法 JSON。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub original_topic: String,
    pub partition: i32,
    pub offset: i64,
    pub error: String,
    pub payload: serde_json::Value,
    pub failed_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn from_message(msg: &ConsumerMessage, error: impl Into<String>) -> Self {
        let payload = serde_json::from_slice(&msg.payload)
            .unwrap_or_else(|_| serde_json::Value::String(msg.payload_lossy()));

        Self {
            original_topic: msg.topic.clone(),
            partition: msg.partition,
            offset: msg.offset,
            error: error.into(),
            payload,
            failed_at: Utc::now(),
        }
    }

    /// 死信消息 key：topic/partition/offset 唯一定位原消息
    pub fn key(&self) -> String {
        format!("{}-{}-{}", self.original_topic, self.partition, self.offset)
    }
}

// ---------------------------------------------------------------------------
// DeadLetterSink：死信写入契约
// ---------------------------------------------------------------------------

/// 死信写入端
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<()>;
}

// ---------------------------------------------------------------------------
// DlqProducer：Kafka 实现
// ---------------------------------------------------------------------------

/// 将死信记录写入 Kafka 死信 topic
pub struct DlqProducer {
    producer: KafkaProducer,
    topic: String,
}

impl DlqProducer {
    pub fn new(producer: KafkaProducer, topic: impl Into<String>) -> Self {
        Self {
            producer,
            topic: topic.into(),
        }
    }
}

#[async_trait]
impl DeadLetterSink for DlqProducer {
    async fn publish(&self, record: &DeadLetterRecord) -> Result<()> {
        self.producer
            .send_json(&self.topic, &record.key(), record)
            .await?;

        warn!(
            dlq_topic = %self.topic,
            original_topic = %record.original_topic,
            partition = record.partition,
            offset = record.offset,
            error = %record.error,
            "消息已发送到死信队列"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::test_message;

    #[test]
    fn test_record_embeds_json_payload() {
        let msg = test_message(1, 17, br#"{"type":"order.paid","payload":{"order_id":3}}"#);
        let record = DeadLetterRecord::from_message(&msg, "库存不足");

        assert_eq!(record.original_topic, "orders.events");
        assert_eq!(record.partition, 1);
        assert_eq!(record.offset, 17);
        assert_eq!(record.error, "库存不足");
        assert_eq!(record.payload["payload"]["order_id"], 3);
        assert_eq!(record.key(), "orders.events-1-17");
    }

    #[test]
    fn test_record_keeps_malformed_payload_as_string() {
        let msg = test_message(0, 5, b"{broken");
        let record = DeadLetterRecord::from_message(&msg, "解码失败");

        assert_eq!(record.payload, serde_json::Value::String("{broken".to_string()));
        // 记录本身必须能序列化为合法 JSON
        let json = serde_json::to_string(&record).unwrap();
        let back: DeadLetterRecord = serde_json::from_str(&json).unwrap();
        assert_eq!(back.offset, 5);
    }

    #[test]
    fn test_record_wire_fields() {
        let msg = test_message(0, 9, br#"{"a":1}"#);
        let json = serde_json::to_value(DeadLetterRecord::from_message(&msg, "boom")).unwrap();

        for field in ["original_topic", "partition", "offset", "error", "payload", "failed_at"] {
            assert!(json.get(field).is_some(), "缺少字段 {field}");
        }
    }
}
