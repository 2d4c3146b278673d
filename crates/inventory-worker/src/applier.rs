//! 幂等库存扣减
//!
//! 在同一个事务里：写入幂等账本 (order.paid, order_id)，再按订单明细逐项扣减库存。
//! 账本主键冲突说明该订单的扣减已经生效，回滚后按成功返回；
//! 任一明细扣减失败则整个事务回滚，账本行也不会留下，后续重投可以重新尝试。

use std::sync::Arc;
use std::time::Instant;

use order_management::repository::{InventoryStore, InventoryTransaction, LedgerInsert};
use order_shared::error::{OrderError, Result};
use order_shared::events::EventType;
use order_shared::observability::metrics;
use tracing::{debug, info, instrument, warn};

/// 扣减结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
    /// 本次完成扣减，`items` 为扣减的明细行数
    Applied { items: usize },
    /// 此前已生效，本次为空操作
    AlreadyApplied,
}

/// 幂等库存扣减器
pub struct InventoryApplier<S>
where
    S: InventoryStore,
{
    store: Arc<S>,
}

impl<S> InventoryApplier<S>
where
    S: InventoryStore,
{
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// 对已支付订单执行库存扣减，可被同一订单重复调用
    #[instrument(skip(self))]
    pub async fn apply(&self, order_id: i64) -> Result<ApplyOutcome> {
        let started = Instant::now();
        let mut tx = self.store.begin().await?;

        match tx
            .record_processed_event(EventType::OrderPaid.as_str(), order_id)
            .await
        {
            Ok(LedgerInsert::Inserted) => {}
            Ok(LedgerInsert::Duplicate) => {
                if let Err(e) = tx.rollback().await {
                    warn!(order_id, error = %e, "回滚重复事件事务失败");
                }
                info!(order_id, "订单库存已扣减过，跳过");
                return Ok(ApplyOutcome::AlreadyApplied);
            }
            Err(e) => {
                rollback_quietly(tx, order_id).await;
                return Err(e);
            }
        }

        match decrement_items(&mut tx, order_id).await {
            Ok(items) => {
                tx.commit().await?;
                metrics::record_apply_duration(started.elapsed().as_secs_f64());
                info!(order_id, items, "订单库存扣减完成");
                Ok(ApplyOutcome::Applied { items })
            }
            Err(e) => {
                rollback_quietly(tx, order_id).await;
                Err(e)
            }
        }
    }
}

async fn decrement_items<T>(tx: &mut T, order_id: i64) -> Result<usize>
where
    T: InventoryTransaction,
{
    if !tx.order_exists(order_id).await? {
        return Err(OrderError::OrderNotFound(order_id));
    }

    let items = tx.order_items(order_id).await?;
    for item in &items {
        tx.decrement_stock(item.product_id, item.quantity).await?;
        debug!(
            order_id,
            product_id = item.product_id,
            quantity = item.quantity,
            "库存已扣减"
        );
    }
    Ok(items.len())
}

/// 回滚失败只记录日志：未提交的事务在连接归还时同样会被丢弃
async fn rollback_quietly<T>(tx: T, order_id: i64)
where
    T: InventoryTransaction,
{
    if let Err(e) = tx.rollback().await {
        warn!(order_id, error = %e, "回滚库存事务失败");
    }
}
