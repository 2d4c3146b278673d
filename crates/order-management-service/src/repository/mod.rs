//! 数据库仓储层

mod inventory_repo;
mod ledger_repo;
pub mod memory;
mod order_repo;
mod product_repo;
pub mod traits;

pub use inventory_repo::{PgInventoryStore, PgInventoryTransaction};
pub use ledger_repo::ProcessedEventRepository;
pub use memory::{MemoryStore, MemoryTransaction};
pub use order_repo::OrderRepository;
pub use product_repo::ProductRepository;
pub use traits::*;
