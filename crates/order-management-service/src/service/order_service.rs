//! 订单服务
//!
//! 负责订单生命周期与明细维护：
//! - 创建订单（发布 order.created）
//! - 状态流转：支付（发布 order.paid）、发货、取消
//! - 明细增删改，仅 pending 状态允许，总额随之重算
//!
//! 状态写入采用比较并交换，两个并发的支付请求只有一个会成功，
//! 因此同一订单只会发布一次 order.paid。

use std::sync::Arc;

use order_shared::error::{OrderError, Result};
use order_shared::events::DomainEvent;
use tracing::{info, instrument, warn};

use crate::models::{Order, OrderAction, OrderFilter, OrderItem, OrderStatus};
use crate::publisher::EventDispatcher;
use crate::repository::{OrderRepositoryTrait, ProductRepositoryTrait};

/// 订单服务
pub struct OrderService<OR, PR>
where
    OR: OrderRepositoryTrait,
    PR: ProductRepositoryTrait,
{
    order_repo: Arc<OR>,
    product_repo: Arc<PR>,
    dispatcher: EventDispatcher,
}

impl<OR, PR> OrderService<OR, PR>
where
    OR: OrderRepositoryTrait,
    PR: ProductRepositoryTrait,
{
    pub fn new(order_repo: Arc<OR>, product_repo: Arc<PR>, dispatcher: EventDispatcher) -> Self {
        Self {
            order_repo,
            product_repo,
            dispatcher,
        }
    }

    #[instrument(skip(self))]
    pub async fn create_order(&self, user_id: i64) -> Result<Order> {
        if user_id <= 0 {
            return Err(OrderError::Validation(format!("user_id 必须为正数: {user_id}")));
        }

        let order = self.order_repo.create_order(user_id).await?;
        info!(order_id = order.id, user_id, "订单已创建");

        self.dispatcher
            .dispatch(DomainEvent::order_created(order.id, user_id))
            .await;
        Ok(order)
    }

    pub async fn get_order(&self, order_id: i64) -> Result<Order> {
        self.order_repo
            .get_order(order_id)
            .await?
            .ok_or(OrderError::OrderNotFound(order_id))
    }

    pub async fn list_orders(&self, filter: &OrderFilter) -> Result<Vec<Order>> {
        self.order_repo.list_orders(filter).await
    }

    pub async fn list_orders_by_user(&self, user_id: i64) -> Result<Vec<Order>> {
        self.order_repo.list_orders(&OrderFilter::by_user(user_id)).await
    }

    pub async fn list_orders_by_status(&self, status: OrderStatus) -> Result<Vec<Order>> {
        self.order_repo.list_orders(&OrderFilter::by_status(status)).await
    }

    /// 支付：pending -> paid，成功后发布 order.paid
    #[instrument(skip(self))]
    pub async fn pay_order(&self, order_id: i64) -> Result<Order> {
        let order = self.apply_action(order_id, OrderAction::Pay).await?;
        self.dispatcher.dispatch(DomainEvent::order_paid(order.id)).await;
        Ok(order)
    }

    /// 发货：paid -> completed
    #[instrument(skip(self))]
    pub async fn ship_order(&self, order_id: i64) -> Result<Order> {
        self.apply_action(order_id, OrderAction::Ship).await
    }

    /// 取消：pending/paid -> cancelled
    ///
    /// 取消已支付订单不会回补库存。
    #[instrument(skip(self))]
    pub async fn cancel_order(&self, order_id: i64) -> Result<Order> {
        self.apply_action(order_id, OrderAction::Cancel).await
    }

    async fn apply_action(&self, order_id: i64, action: OrderAction) -> Result<Order> {
        let order = self.get_order(order_id).await?;
        let next = order.transition(action)?;

        if !self
            .order_repo
            .transition_status(order_id, order.status, next)
            .await?
        {
            // 读取与写入之间状态已被其他请求改变
            let current = self.get_order(order_id).await?;
            warn!(order_id, %action, current = %current.status, "订单状态并发变更");
            return Err(OrderError::InvalidOrderStatus {
                order_id,
                current_status: current.status.to_string(),
                action: action.to_string(),
            });
        }

        info!(order_id, from = %order.status, to = %next, "订单状态已变更");
        Ok(Order {
            status: next,
            ..order
        })
    }

    pub async fn list_items(&self, order_id: i64) -> Result<Vec<OrderItem>> {
        self.get_order(order_id).await?;
        self.order_repo.list_items(order_id).await
    }

    /// 添加明细，单价取商品当前价格
    #[instrument(skip(self))]
    pub async fn add_item(&self, order_id: i64, product_id: i64, quantity: i64) -> Result<OrderItem> {
        validate_quantity(quantity)?;
        self.get_order(order_id).await?.ensure_items_editable("add_item")?;

        let product = self
            .product_repo
            .get_product(product_id)
            .await?
            .ok_or(OrderError::ProductNotFound(product_id))?;

        let item = self
            .order_repo
            .add_item(order_id, product_id, quantity, product.price)
            .await?;
        info!(order_id, item_id = item.id, product_id, quantity, "订单明细已添加");
        Ok(item)
    }

    #[instrument(skip(self))]
    pub async fn update_item_quantity(
        &self,
        order_id: i64,
        item_id: i64,
        quantity: i64,
    ) -> Result<OrderItem> {
        validate_quantity(quantity)?;
        self.get_order(order_id).await?.ensure_items_editable("update_item")?;
        self.order_repo
            .update_item_quantity(order_id, item_id, quantity)
            .await
    }

    #[instrument(skip(self))]
    pub async fn remove_item(&self, order_id: i64, item_id: i64) -> Result<()> {
        self.get_order(order_id).await?.ensure_items_editable("remove_item")?;
        self.order_repo.remove_item(order_id, item_id).await
    }
}

fn validate_quantity(quantity: i64) -> Result<()> {
    if quantity <= 0 {
        return Err(OrderError::Validation(format!("数量必须为正数: {quantity}")));
    }
    Ok(())
}
