//! 库存扣减事务的 Postgres 实现

use async_trait::async_trait;
use order_shared::error::Result;
use sqlx::{PgPool, Postgres, Transaction};

use super::ledger_repo::ProcessedEventRepository;
use super::order_repo::OrderRepository;
use super::product_repo::ProductRepository;
use super::traits::{InventoryStore, InventoryTransaction, LedgerInsert};
use crate::models::OrderItem;

/// 基于连接池的库存存储
#[derive(Clone)]
pub struct PgInventoryStore {
    pool: PgPool,
}

impl PgInventoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InventoryStore for PgInventoryStore {
    type Tx = PgInventoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        let tx = self.pool.begin().await?;
        Ok(PgInventoryTransaction { tx })
    }
}

/// 单个 Postgres 事务，drop 时未提交则由 sqlx 自动回滚
pub struct PgInventoryTransaction {
    tx: Transaction<'static, Postgres>,
}

#[async_trait]
impl InventoryTransaction for PgInventoryTransaction {
    async fn record_processed_event(
        &mut self,
        event_type: &str,
        order_id: i64,
    ) -> Result<LedgerInsert> {
        ProcessedEventRepository::insert_in_tx(&mut self.tx, event_type, order_id).await
    }

    async fn order_exists(&mut self, order_id: i64) -> Result<bool> {
        OrderRepository::exists_in_tx(&mut self.tx, order_id).await
    }

    async fn order_items(&mut self, order_id: i64) -> Result<Vec<OrderItem>> {
        OrderRepository::list_items_in_tx(&mut self.tx, order_id).await
    }

    async fn decrement_stock(&mut self, product_id: i64, quantity: i64) -> Result<()> {
        ProductRepository::decrement_stock_in_tx(&mut self.tx, product_id, quantity).await
    }

    async fn commit(self) -> Result<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}
