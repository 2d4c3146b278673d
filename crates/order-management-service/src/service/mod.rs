//! 服务层
//!
//! 实现订单业务逻辑，协调仓储层与事件发布。

pub mod catalog_service;
pub mod order_service;

pub use catalog_service::CatalogService;
pub use order_service::OrderService;
