//! 统一错误处理模块
//!
//! 订单系统所有组件共用的封闭错误枚举。每个变体携带结构化上下文，
//! 事件消费端据此做毒消息 / 瞬时故障的判定，因此不允许通过字符串匹配识别错误。

use thiserror::Error;

/// 系统错误类型
#[derive(Debug, Error)]
pub enum OrderError {
    // ==================== 基础设施错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 记录不存在 ====================
    #[error("订单不存在: order_id={0}")]
    OrderNotFound(i64),

    #[error("商品不存在: product_id={0}")]
    ProductNotFound(i64),

    #[error("订单明细不存在: order_id={order_id}, item_id={item_id}")]
    OrderItemNotFound { order_id: i64, item_id: i64 },

    // ==================== 业务逻辑错误 ====================
    #[error("库存不足: product_id={product_id}, 需要 {requested}, 可用 {available}")]
    InsufficientStock {
        product_id: i64,
        requested: i64,
        available: i64,
    },

    #[error("订单状态不允许此操作: order_id={order_id}, current_status={current_status}, action={action}")]
    InvalidOrderStatus {
        order_id: i64,
        current_status: String,
        action: String,
    },

    // ==================== 验证错误 ====================
    #[error("无效的事件负载: {0}")]
    InvalidPayload(String),

    #[error("参数验证失败: {0}")]
    Validation(String),

    // ==================== 通用错误 ====================
    #[error("内部错误: {0}")]
    Internal(String),
}

/// 错误结果类型别名
pub type Result<T> = std::result::Result<T, OrderError>;

impl OrderError {
    /// 获取错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::OrderNotFound(_) => "ORDER_NOT_FOUND",
            Self::ProductNotFound(_) => "PRODUCT_NOT_FOUND",
            Self::OrderItemNotFound { .. } => "ORDER_ITEM_NOT_FOUND",
            Self::InsufficientStock { .. } => "INSUFFICIENT_STOCK",
            Self::InvalidOrderStatus { .. } => "INVALID_ORDER_STATUS",
            Self::InvalidPayload(_) => "INVALID_PAYLOAD",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为"记录不存在"类错误
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::OrderNotFound(_) | Self::ProductNotFound(_) | Self::OrderItemNotFound { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        let err = OrderError::InsufficientStock {
            product_id: 7,
            requested: 3,
            available: 1,
        };
        assert_eq!(err.code(), "INSUFFICIENT_STOCK");
        assert_eq!(OrderError::OrderNotFound(1).code(), "ORDER_NOT_FOUND");
        assert_eq!(
            OrderError::Database(sqlx::Error::PoolTimedOut).code(),
            "DATABASE_ERROR"
        );
    }

    #[test]
    fn test_error_display() {
        let err = OrderError::InsufficientStock {
            product_id: 7,
            requested: 3,
            available: 1,
        };
        assert_eq!(err.to_string(), "库存不足: product_id=7, 需要 3, 可用 1");

        let err = OrderError::InvalidOrderStatus {
            order_id: 42,
            current_status: "completed".to_string(),
            action: "cancel".to_string(),
        };
        assert!(err.to_string().contains("order_id=42"));
        assert!(err.to_string().contains("completed"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(OrderError::OrderNotFound(1).is_not_found());
        assert!(
            OrderError::OrderItemNotFound {
                order_id: 1,
                item_id: 2
            }
            .is_not_found()
        );
        assert!(!OrderError::Validation("bad".to_string()).is_not_found());
    }
}
