//! 仓储 Trait 定义
//!
//! 定义仓储接口，便于服务层依赖抽象而非具体实现，支持 mock 测试

use async_trait::async_trait;
use order_shared::error::Result;

use crate::models::{NewProduct, Order, OrderFilter, OrderItem, OrderStatus, Product};

/// 订单仓储接口
///
/// 明细变更（增/改/删）在同一事务内完成：锁定订单行、确认仍为 pending、
/// 写明细、重算总额。任何一步失败都不会留下部分修改。
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait OrderRepositoryTrait: Send + Sync {
    // 订单
    async fn create_order(&self, user_id: i64) -> Result<Order>;
    async fn get_order(&self, id: i64) -> Result<Option<Order>>;
    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>>;

    /// 比较并交换：仅当当前状态为 `from` 时改为 `to`，返回是否生效
    async fn transition_status(&self, id: i64, from: OrderStatus, to: OrderStatus)
    -> Result<bool>;

    // 明细
    async fn list_items(&self, order_id: i64) -> Result<Vec<OrderItem>>;
    async fn add_item(
        &self,
        order_id: i64,
        product_id: i64,
        quantity: i64,
        unit_price: i64,
    ) -> Result<OrderItem>;
    async fn update_item_quantity(
        &self,
        order_id: i64,
        item_id: i64,
        quantity: i64,
    ) -> Result<OrderItem>;
    async fn remove_item(&self, order_id: i64, item_id: i64) -> Result<()>;
}

/// 商品仓储接口
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ProductRepositoryTrait: Send + Sync {
    async fn create_product(&self, product: &NewProduct) -> Result<Product>;
    async fn get_product(&self, id: i64) -> Result<Option<Product>>;
    async fn list_products(&self) -> Result<Vec<Product>>;
}

/// 幂等账本写入结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerInsert {
    Inserted,
    /// 键已存在，事件此前已生效
    Duplicate,
}

/// 库存扣减所需的事务性存储
///
/// 一次 `begin` 开启一个事务；账本写入与库存扣减要么一起提交，要么一起回滚。
#[async_trait]
pub trait InventoryStore: Send + Sync {
    type Tx: InventoryTransaction;

    async fn begin(&self) -> Result<Self::Tx>;
}

/// 库存扣减事务
///
/// 未提交即被丢弃的事务等同于回滚。
#[async_trait]
pub trait InventoryTransaction: Send {
    async fn record_processed_event(&mut self, event_type: &str, order_id: i64)
    -> Result<LedgerInsert>;
    async fn order_exists(&mut self, order_id: i64) -> Result<bool>;
    async fn order_items(&mut self, order_id: i64) -> Result<Vec<OrderItem>>;

    /// 条件扣减：库存不足返回 InsufficientStock，商品不存在返回 ProductNotFound
    async fn decrement_stock(&mut self, product_id: i64, quantity: i64) -> Result<()>;

    async fn commit(self) -> Result<()>;
    async fn rollback(self) -> Result<()>;
}
