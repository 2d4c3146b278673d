use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 幂等账本记录
///
/// (event_type, order_id) 唯一，存在即表示该事件的库存扣减已经生效。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct ProcessedEvent {
    pub event_type: String,
    pub order_id: i64,
    pub processed_at: DateTime<Utc>,
}
