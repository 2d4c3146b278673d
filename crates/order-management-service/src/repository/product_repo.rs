//! 商品仓储

use async_trait::async_trait;
use order_shared::error::{OrderError, Result};
use sqlx::{PgConnection, PgPool};

use super::traits::ProductRepositoryTrait;
use crate::models::{NewProduct, Product};

/// 商品仓储
pub struct ProductRepository {
    pool: PgPool,
}

impl ProductRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中按条件扣减库存
    ///
    /// `stock >= quantity` 写在 WHERE 条件里，检查与扣减是同一条语句，
    /// 并发扣减不会把库存减成负数。
    pub async fn decrement_stock_in_tx(
        tx: &mut PgConnection,
        product_id: i64,
        quantity: i64,
    ) -> Result<()> {
        let remaining: Option<i64> = sqlx::query_scalar(
            r#"
            UPDATE products
            SET stock = stock - $1
            WHERE id = $2 AND stock >= $1
            RETURNING stock
            "#,
        )
        .bind(quantity)
        .bind(product_id)
        .fetch_optional(&mut *tx)
        .await?;

        if remaining.is_some() {
            return Ok(());
        }

        // 未命中：区分商品不存在与库存不足
        let available: Option<i64> = sqlx::query_scalar("SELECT stock FROM products WHERE id = $1")
            .bind(product_id)
            .fetch_optional(&mut *tx)
            .await?;

        match available {
            None => Err(OrderError::ProductNotFound(product_id)),
            Some(available) => Err(OrderError::InsufficientStock {
                product_id,
                requested: quantity,
                available,
            }),
        }
    }
}

#[async_trait]
impl ProductRepositoryTrait for ProductRepository {
    async fn create_product(&self, product: &NewProduct) -> Result<Product> {
        let created = sqlx::query_as::<_, Product>(
            r#"
            INSERT INTO products (name, price, stock)
            VALUES ($1, $2, $3)
            RETURNING id, name, price, stock, created_at
            "#,
        )
        .bind(&product.name)
        .bind(product.price)
        .bind(product.stock)
        .fetch_one(&self.pool)
        .await?;

        Ok(created)
    }

    async fn get_product(&self, id: i64) -> Result<Option<Product>> {
        let product = sqlx::query_as::<_, Product>(
            "SELECT id, name, price, stock, created_at FROM products WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(product)
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        let products = sqlx::query_as::<_, Product>(
            "SELECT id, name, price, stock, created_at FROM products ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(products)
    }
}
