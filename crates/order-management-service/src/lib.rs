//! 订单管理服务
//!
//! 维护订单、订单明细与商品目录，并在订单创建、支付时向事件总线发布事件。
//! 库存扣减不在这里完成，由 inventory-worker 消费 order.paid 事件异步执行。
//!
//! ## 模块结构
//!
//! - `models`: 领域模型与订单状态机
//! - `repository`: 数据库仓储层（Postgres 实现与内存实现）
//! - `service`: 业务服务层
//! - `publisher`: 订单事件发布

pub mod models;
pub mod publisher;
pub mod repository;
pub mod service;

pub use models::*;
pub use publisher::{DispatchStats, DispatcherHandle, EventDispatcher, EventPublisher, KafkaEventPublisher};
pub use repository::{
    InventoryStore, InventoryTransaction, LedgerInsert, MemoryStore, OrderRepository,
    PgInventoryStore, ProcessedEventRepository, ProductRepository,
};
pub use service::{CatalogService, OrderService};
