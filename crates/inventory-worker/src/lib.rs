//! 库存事件处理服务
//!
//! 消费订单事件 topic 中的 order.paid 事件，以幂等方式扣减订单明细对应的商品库存。
//! 处理失败时区分毒消息与瞬时失败：前者写入死信队列后继续推进，后者回退等待重投。

pub mod applier;
pub mod classifier;
pub mod consumer;

pub use applier::{ApplyOutcome, InventoryApplier};
pub use classifier::{FailureClass, classify};
pub use consumer::{ConsumerSettings, ConsumerStats, HandleOutcome, InventoryConsumer};
