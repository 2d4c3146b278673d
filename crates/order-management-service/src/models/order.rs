//! 订单与订单明细模型

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use order_shared::error::{OrderError, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::enums::{OrderAction, OrderStatus};

/// 订单
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Order {
    pub id: i64,
    pub user_id: i64,
    pub status: OrderStatus,
    /// 明细行金额之和（最小货币单位）
    pub total_amount: i64,
    pub created_at: DateTime<Utc>,
}

impl Order {
    /// 计算动作作用后的状态，不合法时返回 InvalidOrderStatus
    pub fn transition(&self, action: OrderAction) -> Result<OrderStatus> {
        self.status
            .next(action)
            .ok_or_else(|| OrderError::InvalidOrderStatus {
                order_id: self.id,
                current_status: self.status.to_string(),
                action: action.to_string(),
            })
    }

    /// 校验当前状态允许修改明细
    pub fn ensure_items_editable(&self, action: &str) -> Result<()> {
        if self.status.allows_item_changes() {
            Ok(())
        } else {
            Err(OrderError::InvalidOrderStatus {
                order_id: self.id,
                current_status: self.status.to_string(),
                action: action.to_string(),
            })
        }
    }
}

/// 订单明细
///
/// `price` 是加入订单时的商品单价快照，之后商品调价不影响已有明细。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct OrderItem {
    pub id: i64,
    pub order_id: i64,
    pub product_id: i64,
    pub quantity: i64,
    pub price: i64,
}

impl OrderItem {
    /// 明细金额，溢出时返回校验错误
    pub fn line_total(&self) -> Result<i64> {
        self.quantity
            .checked_mul(self.price)
            .ok_or_else(|| amount_overflow(self.order_id))
    }
}

/// 订单总额 = Σ quantity × price，没有明细时为 0
pub fn order_total<'a>(items: impl IntoIterator<Item = &'a OrderItem>) -> Result<i64> {
    items.into_iter().try_fold(0i64, |total, item| {
        total
            .checked_add(item.line_total()?)
            .ok_or_else(|| amount_overflow(item.order_id))
    })
}

fn amount_overflow(order_id: i64) -> OrderError {
    OrderError::Validation(format!("订单 {order_id} 金额超出范围"))
}

/// 订单查询条件
///
/// 日期区间按 UTC 自然日计算，`to` 当天整天都包含在内。
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub user_id: Option<i64>,
    pub status: Option<OrderStatus>,
    pub from: Option<NaiveDate>,
    pub to: Option<NaiveDate>,
}

impl OrderFilter {
    pub fn by_user(user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::default()
        }
    }

    pub fn by_status(status: OrderStatus) -> Self {
        Self {
            status: Some(status),
            ..Self::default()
        }
    }

    /// 创建时间下界（含）
    pub fn created_after(&self) -> Option<DateTime<Utc>> {
        self.from.map(|d| d.and_time(NaiveTime::MIN).and_utc())
    }

    /// 创建时间上界（不含）：`to` 的次日零点
    pub fn created_before(&self) -> Option<DateTime<Utc>> {
        self.to
            .and_then(|d| d.succ_opt())
            .map(|d| d.and_time(NaiveTime::MIN).and_utc())
    }

    pub fn matches(&self, order: &Order) -> bool {
        self.user_id.is_none_or(|u| order.user_id == u)
            && self.status.is_none_or(|s| order.status == s)
            && self.created_after().is_none_or(|t| order.created_at >= t)
            && self.created_before().is_none_or(|t| order.created_at < t)
    }
}
