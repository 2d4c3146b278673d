//! 内存存储
//!
//! 同时实现订单、商品仓储与库存事务接口，供单元测试和集成测试在没有
//! Postgres 的情况下驱动完整流程。事务持有整张表的锁并保存一份快照，
//! 回滚或未提交即被丢弃时恢复快照，语义与数据库事务一致。
//! 可注入数据库故障，模拟连接中断等瞬时错误。

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::Utc;
use order_shared::error::{OrderError, Result};
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::traits::{
    InventoryStore, InventoryTransaction, LedgerInsert, OrderRepositoryTrait,
    ProductRepositoryTrait,
};
use crate::models::{
    NewProduct, Order, OrderFilter, OrderItem, OrderStatus, ProcessedEvent, Product, order_total,
};

#[derive(Debug, Clone, Default)]
struct Tables {
    orders: BTreeMap<i64, Order>,
    items: BTreeMap<i64, OrderItem>,
    products: BTreeMap<i64, Product>,
    ledger: BTreeMap<(String, i64), ProcessedEvent>,
    next_order_id: i64,
    next_item_id: i64,
    next_product_id: i64,
}

impl Tables {
    fn editable_order(&self, order_id: i64, action: &str) -> Result<&Order> {
        let order = self
            .orders
            .get(&order_id)
            .ok_or(OrderError::OrderNotFound(order_id))?;
        order.ensure_items_editable(action)?;
        Ok(order)
    }

    fn items_of(&self, order_id: i64) -> Vec<OrderItem> {
        self.items
            .values()
            .filter(|item| item.order_id == order_id)
            .cloned()
            .collect()
    }

    fn recalculate_total(&mut self, order_id: i64) -> Result<()> {
        let total = order_total(self.items.values().filter(|item| item.order_id == order_id))?;
        if let Some(order) = self.orders.get_mut(&order_id) {
            order.total_amount = total;
        }
        Ok(())
    }
}

/// 故障注入计数
#[derive(Debug, Default)]
struct Faults {
    begins: AtomicUsize,
    decrements: AtomicUsize,
}

impl Faults {
    fn take(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

fn simulated_outage() -> OrderError {
    OrderError::Database(sqlx::Error::PoolTimedOut)
}

/// 内存存储，克隆后共享同一份数据
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    faults: Arc<Faults>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// 接下来 n 次开启事务失败
    pub fn fail_next_begins(&self, n: usize) {
        self.faults.begins.store(n, Ordering::SeqCst);
    }

    /// 接下来 n 次库存扣减失败（发生在账本写入之后）
    pub fn fail_next_decrements(&self, n: usize) {
        self.faults.decrements.store(n, Ordering::SeqCst);
    }

    pub async fn product_stock(&self, product_id: i64) -> Option<i64> {
        self.tables
            .lock()
            .await
            .products
            .get(&product_id)
            .map(|p| p.stock)
    }

    pub async fn ledger_entries(&self) -> Vec<ProcessedEvent> {
        self.tables.lock().await.ledger.values().cloned().collect()
    }

    /// 直接改写订单状态，绕过状态机（构造测试场景用）
    pub async fn force_status(&self, order_id: i64, status: OrderStatus) -> Result<()> {
        let mut tables = self.tables.lock().await;
        let order = tables
            .orders
            .get_mut(&order_id)
            .ok_or(OrderError::OrderNotFound(order_id))?;
        order.status = status;
        Ok(())
    }
}

#[async_trait]
impl OrderRepositoryTrait for MemoryStore {
    async fn create_order(&self, user_id: i64) -> Result<Order> {
        let mut tables = self.tables.lock().await;
        tables.next_order_id += 1;
        let order = Order {
            id: tables.next_order_id,
            user_id,
            status: OrderStatus::Pending,
            total_amount: 0,
            created_at: Utc::now(),
        };
        tables.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get_order(&self, id: i64) -> Result<Option<Order>> {
        Ok(self.tables.lock().await.orders.get(&id).cloned())
    }

    async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        Ok(self
            .tables
            .lock()
            .await
            .orders
            .values()
            .filter(|order| filter.matches(order))
            .cloned()
            .collect())
    }

    async fn transition_status(
        &self,
        id: i64,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<bool> {
        let mut tables = self.tables.lock().await;
        match tables.orders.get_mut(&id) {
            Some(order) if order.status == from => {
                order.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_items(&self, order_id: i64) -> Result<Vec<OrderItem>> {
        Ok(self.tables.lock().await.items_of(order_id))
    }

    async fn add_item(
        &self,
        order_id: i64,
        product_id: i64,
        quantity: i64,
        unit_price: i64,
    ) -> Result<OrderItem> {
        let mut tables = self.tables.lock().await;
        tables.editable_order(order_id, "add_item")?;
        if !tables.products.contains_key(&product_id) {
            return Err(OrderError::ProductNotFound(product_id));
        }

        // 在副本上修改，总额溢出时整体放弃
        let mut draft = tables.clone();
        draft.next_item_id += 1;
        let item = OrderItem {
            id: draft.next_item_id,
            order_id,
            product_id,
            quantity,
            price: unit_price,
        };
        draft.items.insert(item.id, item.clone());
        draft.recalculate_total(order_id)?;
        *tables = draft;
        Ok(item)
    }

    async fn update_item_quantity(
        &self,
        order_id: i64,
        item_id: i64,
        quantity: i64,
    ) -> Result<OrderItem> {
        let mut tables = self.tables.lock().await;
        tables.editable_order(order_id, "update_item")?;

        let mut draft = tables.clone();
        let item = draft
            .items
            .get_mut(&item_id)
            .filter(|item| item.order_id == order_id)
            .ok_or(OrderError::OrderItemNotFound { order_id, item_id })?;
        item.quantity = quantity;
        let updated = item.clone();

        draft.recalculate_total(order_id)?;
        *tables = draft;
        Ok(updated)
    }

    async fn remove_item(&self, order_id: i64, item_id: i64) -> Result<()> {
        let mut tables = self.tables.lock().await;
        tables.editable_order(order_id, "remove_item")?;

        let belongs = tables
            .items
            .get(&item_id)
            .is_some_and(|item| item.order_id == order_id);
        if !belongs {
            return Err(OrderError::OrderItemNotFound { order_id, item_id });
        }
        tables.items.remove(&item_id);

        tables.recalculate_total(order_id)
    }
}

#[async_trait]
impl ProductRepositoryTrait for MemoryStore {
    async fn create_product(&self, product: &NewProduct) -> Result<Product> {
        let mut tables = self.tables.lock().await;
        tables.next_product_id += 1;
        let created = Product {
            id: tables.next_product_id,
            name: product.name.clone(),
            price: product.price,
            stock: product.stock,
            created_at: Utc::now(),
        };
        tables.products.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_product(&self, id: i64) -> Result<Option<Product>> {
        Ok(self.tables.lock().await.products.get(&id).cloned())
    }

    async fn list_products(&self) -> Result<Vec<Product>> {
        Ok(self.tables.lock().await.products.values().cloned().collect())
    }
}

#[async_trait]
impl InventoryStore for MemoryStore {
    type Tx = MemoryTransaction;

    async fn begin(&self) -> Result<Self::Tx> {
        if Faults::take(&self.faults.begins) {
            return Err(simulated_outage());
        }

        let guard = Arc::clone(&self.tables).lock_owned().await;
        let snapshot = guard.clone();
        Ok(MemoryTransaction {
            guard,
            snapshot: Some(snapshot),
            faults: Arc::clone(&self.faults),
        })
    }
}

/// 内存事务：独占全部表，直到提交或丢弃
pub struct MemoryTransaction {
    guard: OwnedMutexGuard<Tables>,
    snapshot: Option<Tables>,
    faults: Arc<Faults>,
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if let Some(snapshot) = self.snapshot.take() {
            *self.guard = snapshot;
        }
    }
}

#[async_trait]
impl InventoryTransaction for MemoryTransaction {
    async fn record_processed_event(
        &mut self,
        event_type: &str,
        order_id: i64,
    ) -> Result<LedgerInsert> {
        let key = (event_type.to_string(), order_id);
        if self.guard.ledger.contains_key(&key) {
            return Ok(LedgerInsert::Duplicate);
        }
        self.guard.ledger.insert(
            key,
            ProcessedEvent {
                event_type: event_type.to_string(),
                order_id,
                processed_at: Utc::now(),
            },
        );
        Ok(LedgerInsert::Inserted)
    }

    async fn order_exists(&mut self, order_id: i64) -> Result<bool> {
        Ok(self.guard.orders.contains_key(&order_id))
    }

    async fn order_items(&mut self, order_id: i64) -> Result<Vec<OrderItem>> {
        Ok(self.guard.items_of(order_id))
    }

    async fn decrement_stock(&mut self, product_id: i64, quantity: i64) -> Result<()> {
        if Faults::take(&self.faults.decrements) {
            return Err(simulated_outage());
        }

        let product = self
            .guard
            .products
            .get_mut(&product_id)
            .ok_or(OrderError::ProductNotFound(product_id))?;
        if product.stock < quantity {
            return Err(OrderError::InsufficientStock {
                product_id,
                requested: quantity,
                available: product.stock,
            });
        }
        product.stock -= quantity;
        Ok(())
    }

    async fn commit(mut self) -> Result<()> {
        self.snapshot = None;
        Ok(())
    }

    async fn rollback(self) -> Result<()> {
        // drop 时恢复快照
        Ok(())
    }
}
