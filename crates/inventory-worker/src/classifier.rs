//! 失败分类
//!
//! 把处理错误映射为毒消息或瞬时失败。分类基于错误变体的穷举匹配，
//! 新增错误变体时编译器会强制在这里做出选择。

use order_shared::error::OrderError;

/// 失败类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// 重试也不会成功：写入死信后提交 offset
    Poison,
    /// 可能在重试后成功：不提交，等待重新投递
    Transient,
}

impl FailureClass {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Poison => "poison",
            Self::Transient => "transient",
        }
    }
}

pub fn classify(err: &OrderError) -> FailureClass {
    match err {
        OrderError::InvalidPayload(_)
        | OrderError::Serialization(_)
        | OrderError::InsufficientStock { .. }
        | OrderError::OrderNotFound(_)
        | OrderError::ProductNotFound(_)
        | OrderError::OrderItemNotFound { .. }
        | OrderError::InvalidOrderStatus { .. }
        | OrderError::Validation(_) => FailureClass::Poison,

        OrderError::Database(_) | OrderError::Kafka(_) | OrderError::Internal(_) => {
            FailureClass::Transient
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_poison_set() {
        let poison = [
            OrderError::InvalidPayload("bad".into()),
            OrderError::Serialization(serde_json::from_str::<i64>("x").unwrap_err()),
            OrderError::InsufficientStock {
                product_id: 1,
                requested: 2,
                available: 1,
            },
            OrderError::OrderNotFound(1),
            OrderError::ProductNotFound(1),
            OrderError::InvalidOrderStatus {
                order_id: 1,
                current_status: "completed".into(),
                action: "pay".into(),
            },
        ];
        for err in &poison {
            assert_eq!(classify(err), FailureClass::Poison, "{err}");
        }
    }

    #[test]
    fn test_storage_and_bus_failures_are_transient() {
        assert_eq!(
            classify(&OrderError::Database(sqlx::Error::PoolTimedOut)),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&OrderError::Kafka("broker down".into())),
            FailureClass::Transient
        );
        assert_eq!(
            classify(&OrderError::Internal("unexpected".into())),
            FailureClass::Transient
        );
    }
}
