//! 商品目录模型

use chrono::{DateTime, Utc};
use order_shared::error::{OrderError, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// 商品
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct Product {
    pub id: i64,
    pub name: String,
    /// 单价（最小货币单位）
    pub price: i64,
    /// 可售库存，永不为负
    pub stock: i64,
    pub created_at: DateTime<Utc>,
}

/// 新建商品请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewProduct {
    pub name: String,
    pub price: i64,
    pub stock: i64,
}

impl NewProduct {
    pub fn new(name: impl Into<String>, price: i64, stock: i64) -> Self {
        Self {
            name: name.into(),
            price,
            stock,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(OrderError::Validation("商品名称不能为空".to_string()));
        }
        if self.price <= 0 {
            return Err(OrderError::Validation(format!(
                "商品价格必须为正数: {}",
                self.price
            )));
        }
        if self.stock < 0 {
            return Err(OrderError::Validation(format!(
                "商品库存不能为负: {}",
                self.stock
            )));
        }
        Ok(())
    }
}
