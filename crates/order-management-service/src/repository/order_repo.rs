//! 订单仓储
//!
//! 订单与订单明细的数据访问。明细变更与总额重算放在同一事务里，
//! 并以 `SELECT ... FOR UPDATE` 锁住订单行，避免与支付并发时改到已支付订单。

use async_trait::async_trait;
use order_shared::error::{OrderError, Result};
use sqlx::{PgConnection, PgPool};
use tracing::debug;

use super::traits::OrderRepositoryTrait;
use crate::models::{Order, OrderFilter, OrderItem, OrderStatus};

const ORDER_COLUMNS: &str = "id, user_id, status, total_amount, created_at";

/// 订单仓储
pub struct OrderRepository {
    pool: PgPool,
}

impl OrderRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中列出订单明细
    pub async fn list_items_in_tx(tx: &mut PgConnection, order_id: i64) -> Result<Vec<OrderItem>> {
        let items = sqlx::query_as::<_, OrderItem>(
            r#"
            SELECT id, order_id, product_id, quantity, price
            FROM order_items
            WHERE order_id = $1
            ORDER BY id
            "#,
        )
        .bind(order_id)
        .fetch_all(tx)
        .await?;

        Ok(items)
    }

    /// 在事务中判断订单是否存在
    pub async fn exists_in_tx(tx: &mut PgConnection, order_id: i64) -> Result<bool> {
        let exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM orders WHERE id = $1)")
                .bind(order_id)
                .fetch_one(tx)
                .await?;

        Ok(exists)
    }

    /// 锁定订单行并确认仍允许修改明细
    async fn lock_editable_order(tx: &mut PgConnection, order_id: i64, action: &str) -> Result<()> {
        let status: Option<OrderStatus> =
            sqlx::query_scalar("SELECT status FROM orders WHERE id = $1 FOR UPDATE")
                .bind(order_id)
                .fetch_optional(tx)
                .await?;

        match status {
            None => Err(OrderError::OrderNotFound(order_id)),
            Some(status) if status.allows_item_changes() => Ok(()),
            Some(status) => Err(OrderError::InvalidOrderStatus {
                order_id,
                current_status: status.to_string(),
                action: action.to_string(),
            }),
        }
    }

    /// 按明细重算订单总额
    async fn recalculate_total(tx: &mut PgConnection, order_id: i64) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE orders
            SET total_amount = (
                SELECT COALESCE(SUM(quantity * price), 0)::BIGINT
                FROM order_items
                WHERE order_id = $1
            )
            WHERE id = $1
            "#,
        )
        .bind(order_id)
        .execute(tx)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl OrderRepositoryTrait for OrderRepository {
    async fn create_order(&self, user_id: i64) -> Result<Order> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "INSERT INTO orders (user_id, status, total_amount) VALUES ($1, $2, 0) RETURNING {ORDER_COLUMNS}"
        ))
        .bind(user_id)
        .bind(OrderStatus::Pending)
        .fetch_one(&self.pool)
        .await?;

        Ok(order)
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        let order = sqlx::query_as::<_, Order>(&format!(
            "SELECT {ORDER_COLUMNS} FROM orders WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(order)
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        let orders = sqlx::query_as::<_, Order>(&format!(
            r#"
            SELECT {ORDER_COLUMNS}
            FROM orders
            WHERE ($1::bigint IS NULL OR user_id = $1)
              AND ($2::varchar IS NULL OR status = $2)
              AND ($3::timestamptz IS NULL OR created_at >= $3)
              AND ($4::timestamptz IS NULL OR created_at < $4)
            ORDER BY id
            "#
        ))
        .bind(filter.user_id)
        .bind(filter.status)
        .bind(filter.created_after())
        .bind(filter.created_before())
        .fetch_all(&self.pool)
        .await?;

        Ok(orders)
    }

    async fn transition_status(
        &self,
        id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let result = sqlx::query("UPDATE orders SET status = $1 WHERE id = $2 AND status = $3")
            .bind(to)
            .bind(id)
            .bind(from)
            .execute(&self.pool)
            .await?;

        debug!(order_id = id, %from, %to, applied = result.rows_affected() == 1, "订单状态变更");
        Ok(result.rows_affected() == 1)
    }

    async fn list_items(&self, order_id: i64) -> Result<Vec<OrderItem>> {
        let mut conn = self.pool.acquire().await?;
        Self::list_items_in_tx(&mut conn, order_id).await
    }

    async fn add_item(
        &self,
        order_id: i64,
        product_id: i64,
        quantity: i64,
        unit_price: i64,
    ) -> Result<OrderItem> {
        let mut tx = self.pool.begin().await?;
        Self::lock_editable_order(&mut tx, order_id, "add_item").await?;

        let item = sqlx::query_as::<_, OrderItem>(
            r#"
            INSERT INTO order_items (order_id, product_id, quantity, price)
            VALUES ($1, $2, $3, $4)
            RETURNING id, order_id, product_id, quantity, price
            "#,
        )
        .bind(order_id)
        .bind(product_id)
        .bind(quantity)
        .bind(unit_price)
        .fetch_one(&mut *tx)
        .await?;

        Self::recalculate_total(&mut tx, order_id).await?;
        tx.commit().await?;
        Ok(item)
    }

    async fn update_item_quantity(
        &self,
        order_id: i64,
        item_id: i64,
        quantity: i64,
    ) -> Result<OrderItem> {
        let mut tx = self.pool.begin().await?;
        Self::lock_editable_order(&mut tx, order_id, "update_item").await?;

        let item = sqlx::query_as::<_, OrderItem>(
            r#"
            UPDATE order_items
            SET quantity = $1
            WHERE id = $2 AND order_id = $3
            RETURNING id, order_id, product_id, quantity, price
            "#,
        )
        .bind(quantity)
        .bind(item_id)
        .bind(order_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or(OrderError::OrderItemNotFound { order_id, item_id })?;

        Self::recalculate_total(&mut tx, order_id).await?;
        tx.commit().await?;
        Ok(item)
    }

    async fn remove_item(&self, order_id: i64, item_id: i64) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        Self::lock_editable_order(&mut tx, order_id, "remove_item").await?;

        let result = sqlx::query("DELETE FROM order_items WHERE id = $1 AND order_id = $2")
            .bind(item_id)
            .bind(order_id)
            .execute(&mut *tx)
            .await?;
        if result.rows_affected() == 0 {
            return Err(OrderError::OrderItemNotFound { order_id, item_id });
        }

        Self::recalculate_total(&mut tx, order_id).await?;
        tx.commit().await?;
        Ok(())
    }
}
