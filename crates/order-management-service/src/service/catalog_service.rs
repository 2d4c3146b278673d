//! 商品目录服务

use std::sync::Arc;

use order_shared::error::{OrderError, Result};
use tracing::{info, instrument};

use crate::models::{NewProduct, Product};
use crate::repository::ProductRepositoryTrait;

/// 商品目录服务
pub struct CatalogService<PR>
where
    PR: ProductRepositoryTrait,
{
    product_repo: Arc<PR>,
}

impl<PR> CatalogService<PR>
where
    PR: ProductRepositoryTrait,
{
    pub fn new(product_repo: Arc<PR>) -> Self {
        Self { product_repo }
    }

    #[instrument(skip(self), fields(name = %product.name))]
    pub async fn create_product(&self, product: NewProduct) -> Result<Product> {
        product.validate()?;
        let created = self.product_repo.create_product(&product).await?;
        info!(product_id = created.id, price = created.price, stock = created.stock, "商品已创建");
        Ok(created)
    }

    pub async fn get_product(&self, product_id: i64) -> Result<Product> {
        self.product_repo
            .get_product(product_id)
            .await?
            .ok_or(OrderError::ProductNotFound(product_id))
    }

    pub async fn list_products(&self) -> Result<Vec<Product>> {
        self.product_repo.list_products().await
    }
}
