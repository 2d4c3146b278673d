//! 订单事件模型
//!
//! 定义 "order events" topic 上的线上格式：
//! `{"type": "...", "payload": {"order_id": 1}, "timestamp": "RFC3339"}`。
//!
//! 消费端采用两阶段解码：先解出信封（`EventEnvelope`），只有本系统认识的
//! 事件类型才继续解析 payload。这样新增的事件类型即使 payload 结构完全不同，
//! 也只会被当作无需处理的消息跳过，而不会被判定为毒消息。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{OrderError, Result};

// ---------------------------------------------------------------------------
// EventType
// ---------------------------------------------------------------------------

/// 订单事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "order.created")]
    OrderCreated,
    #[serde(rename = "order.paid")]
    OrderPaid,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::OrderCreated => "order.created",
            Self::OrderPaid => "order.paid",
        }
    }

    /// 未知类型返回 None（向前兼容，不视为错误）
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "order.created" => Some(Self::OrderCreated),
            "order.paid" => Some(Self::OrderPaid),
            _ => None,
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// OrderEventPayload
// ---------------------------------------------------------------------------

/// 订单事件负载
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderEventPayload {
    pub order_id: i64,
    /// 仅 order.created 携带
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
}

impl OrderEventPayload {
    /// 结构校验：order_id 必须为正数
    pub fn validate(&self) -> Result<()> {
        if self.order_id <= 0 {
            return Err(OrderError::InvalidPayload(format!(
                "order_id 必须为正数: {}",
                self.order_id
            )));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// DomainEvent：生产端使用的强类型事件
// ---------------------------------------------------------------------------

/// 领域事件
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainEvent {
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub payload: OrderEventPayload,
    pub timestamp: DateTime<Utc>,
}

impl DomainEvent {
    pub fn order_created(order_id: i64, user_id: i64) -> Self {
        Self {
            event_type: EventType::OrderCreated,
            payload: OrderEventPayload {
                order_id,
                user_id: Some(user_id),
            },
            timestamp: Utc::now(),
        }
    }

    pub fn order_paid(order_id: i64) -> Self {
        Self {
            event_type: EventType::OrderPaid,
            payload: OrderEventPayload {
                order_id,
                user_id: None,
            },
            timestamp: Utc::now(),
        }
    }

    /// Kafka 消息 key：同一订单的事件落在同一分区，保证分区内有序
    pub fn partition_key(&self) -> String {
        self.payload.order_id.to_string()
    }
}

// ---------------------------------------------------------------------------
// EventEnvelope：消费端的宽松解码
// ---------------------------------------------------------------------------

/// 事件信封
///
/// `event_type` 保留原始字符串，payload 延迟解析。
/// `timestamp` 不参与处理，按任意 JSON 值原样保留，格式不合法也不会拒收消息。
#[derive(Debug, Clone, Deserialize)]
pub struct EventEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<serde_json::Value>,
}

impl EventEnvelope {
    /// 解码信封，失败即为无效负载
    pub fn decode(raw: &[u8]) -> Result<Self> {
        serde_json::from_slice(raw)
            .map_err(|e| OrderError::InvalidPayload(format!("事件信封解码失败: {e}")))
    }

    pub fn known_type(&self) -> Option<EventType> {
        EventType::parse(&self.event_type)
    }

    /// 将 payload 解析为订单事件负载并做结构校验
    pub fn order_payload(&self) -> Result<OrderEventPayload> {
        let payload: OrderEventPayload = serde_json::from_value(self.payload.clone())
            .map_err(|e| OrderError::InvalidPayload(format!("事件负载解码失败: {e}")))?;
        payload.validate()?;
        Ok(payload)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_order_paid_wire_format() {
        let event = DomainEvent::order_paid(42);
        let json: serde_json::Value = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "order.paid");
        assert_eq!(json["payload"]["order_id"], 42);
        // order.paid 不携带 user_id
        assert!(json["payload"].get("user_id").is_none());
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_order_created_carries_user_id() {
        let event = DomainEvent::order_created(5, 9);
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "order.created");
        assert_eq!(json["payload"]["user_id"], 9);
        assert_eq!(event.partition_key(), "5");
    }

    #[test]
    fn test_envelope_decodes_producer_output() {
        let raw = serde_json::to_vec(&DomainEvent::order_paid(7)).unwrap();
        let envelope = EventEnvelope::decode(&raw).unwrap();

        assert_eq!(envelope.known_type(), Some(EventType::OrderPaid));
        assert!(envelope.timestamp.is_some());
        assert_eq!(envelope.order_payload().unwrap().order_id, 7);
    }

    #[test]
    fn test_envelope_tolerates_non_rfc3339_timestamp() {
        for raw in [
            &br#"{"type":"order.paid","payload":{"order_id":3},"timestamp":1700000000}"#[..],
            &br#"{"type":"order.paid","payload":{"order_id":3},"timestamp":"2026-01-01 10:00:00"}"#[..],
            &br#"{"type":"order.paid","payload":{"order_id":3},"timestamp":null}"#[..],
        ] {
            let envelope = EventEnvelope::decode(raw).unwrap();
            assert_eq!(envelope.known_type(), Some(EventType::OrderPaid));
            assert_eq!(envelope.order_payload().unwrap().order_id, 3);
        }
    }

    #[test]
    fn test_envelope_unknown_type_with_foreign_payload() {
        let raw = br#"{"type":"test.message","payload":{"msg":"hello from startup"},"timestamp":"2026-01-01T00:00:00Z"}"#;
        let envelope = EventEnvelope::decode(raw).unwrap();
        assert_eq!(envelope.known_type(), None);
        assert_eq!(envelope.event_type, "test.message");
    }

    #[test]
    fn test_envelope_rejects_malformed_json() {
        let err = EventEnvelope::decode(b"{not json").unwrap_err();
        assert!(matches!(err, OrderError::InvalidPayload(_)));
    }

    #[test]
    fn test_order_payload_requires_order_id() {
        let envelope = EventEnvelope::decode(br#"{"type":"order.paid","payload":{}}"#).unwrap();
        assert!(matches!(
            envelope.order_payload(),
            Err(OrderError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_order_payload_rejects_non_positive_id() {
        let envelope =
            EventEnvelope::decode(br#"{"type":"order.paid","payload":{"order_id":0}}"#).unwrap();
        assert!(matches!(
            envelope.order_payload(),
            Err(OrderError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_event_type_parse() {
        assert_eq!(EventType::parse("order.paid"), Some(EventType::OrderPaid));
        assert_eq!(EventType::parse("order.created"), Some(EventType::OrderCreated));
        assert_eq!(EventType::parse("order.refunded"), None);
        assert_eq!(EventType::OrderPaid.to_string(), "order.paid");
    }
}
