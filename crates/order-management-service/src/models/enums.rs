//! 订单状态机
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化

use std::fmt;
use std::str::FromStr;

use order_shared::error::{OrderError, Result};
use serde::{Deserialize, Serialize};

/// 订单状态
///
/// ```text
/// pending --pay--> paid --ship--> completed
///    |               |
///    +----cancel-----+----> cancelled
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum OrderStatus {
    /// 待支付，唯一允许修改订单明细的状态
    #[default]
    Pending,
    Paid,
    Cancelled,
    Completed,
}

/// 订单状态变更动作
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderAction {
    Pay,
    Ship,
    Cancel,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Paid => "paid",
            Self::Cancelled => "cancelled",
            Self::Completed => "completed",
        }
    }

    /// 动作作用后的目标状态，不合法的迁移返回 None
    pub fn next(self, action: OrderAction) -> Option<Self> {
        match (self, action) {
            (Self::Pending, OrderAction::Pay) => Some(Self::Paid),
            (Self::Paid, OrderAction::Ship) => Some(Self::Completed),
            (Self::Pending | Self::Paid, OrderAction::Cancel) => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn allows_item_changes(self) -> bool {
        self == Self::Pending
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = OrderError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(Self::Pending),
            "paid" => Ok(Self::Paid),
            "cancelled" => Ok(Self::Cancelled),
            "completed" => Ok(Self::Completed),
            other => Err(OrderError::Validation(format!("未知订单状态: {other}"))),
        }
    }
}

impl OrderAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pay => "pay",
            Self::Ship => "ship",
            Self::Cancel => "cancel",
        }
    }
}

impl fmt::Display for OrderAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        assert_eq!(OrderStatus::Pending.next(OrderAction::Pay), Some(OrderStatus::Paid));
        assert_eq!(OrderStatus::Paid.next(OrderAction::Ship), Some(OrderStatus::Completed));
    }

    #[test]
    fn test_cancel_only_before_completion() {
        assert_eq!(
            OrderStatus::Pending.next(OrderAction::Cancel),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(
            OrderStatus::Paid.next(OrderAction::Cancel),
            Some(OrderStatus::Cancelled)
        );
        assert_eq!(OrderStatus::Completed.next(OrderAction::Cancel), None);
        assert_eq!(OrderStatus::Cancelled.next(OrderAction::Cancel), None);
    }

    #[test]
    fn test_illegal_transitions_rejected() {
        assert_eq!(OrderStatus::Paid.next(OrderAction::Pay), None);
        assert_eq!(OrderStatus::Pending.next(OrderAction::Ship), None);
        assert_eq!(OrderStatus::Cancelled.next(OrderAction::Pay), None);
        assert_eq!(OrderStatus::Completed.next(OrderAction::Ship), None);
    }

    #[test]
    fn test_terminal_states_have_no_exit() {
        for status in [OrderStatus::Cancelled, OrderStatus::Completed] {
            for action in [OrderAction::Pay, OrderAction::Ship, OrderAction::Cancel] {
                assert_eq!(status.next(action), None);
            }
        }
    }

    #[test]
    fn test_only_pending_allows_item_changes() {
        assert!(OrderStatus::Pending.allows_item_changes());
        assert!(!OrderStatus::Paid.allows_item_changes());
        assert!(!OrderStatus::Cancelled.allows_item_changes());
        assert!(!OrderStatus::Completed.allows_item_changes());
    }

    #[test]
    fn test_status_string_forms() {
        assert_eq!(
            serde_json::to_string(&OrderStatus::Cancelled).unwrap(),
            "\"cancelled\""
        );
        assert_eq!("paid".parse::<OrderStatus>().unwrap(), OrderStatus::Paid);
        assert!("shipped".parse::<OrderStatus>().is_err());
    }
}
