//! 幂等账本仓储
//!
//! `processed_events` 以 (event_type, order_id) 为主键，主键冲突即代表重复投递。

use order_shared::error::Result;
use sqlx::PgConnection;

use super::traits::LedgerInsert;

/// 幂等账本仓储
///
/// 账本只在库存扣减事务内写入，因此只提供事务内操作。
pub struct ProcessedEventRepository;

impl ProcessedEventRepository {
    /// 在事务中写入账本
    ///
    /// 主键冲突返回 `Duplicate`。冲突后 Postgres 事务已处于中止状态，调用方只能回滚。
    pub async fn insert_in_tx(
        tx: &mut PgConnection,
        event_type: &str,
        order_id: i64,
    ) -> Result<LedgerInsert> {
        let result = sqlx::query(
            "INSERT INTO processed_events (event_type, order_id) VALUES ($1, $2)",
        )
        .bind(event_type)
        .bind(order_id)
        .execute(tx)
        .await;

        match result {
            Ok(_) => Ok(LedgerInsert::Inserted),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Ok(LedgerInsert::Duplicate)
            }
            Err(e) => Err(e.into()),
        }
    }
}
