//! 领域模型

mod enums;
mod order;
mod processed_event;
mod product;

pub use enums::*;
pub use order::*;
pub use processed_event::*;
pub use product::*;
