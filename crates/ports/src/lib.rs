//! ports - 抽象 trait 层
//!
//! 定义事务层依赖的存储契约、仓储事务能力以及 Unit of Work 接口

mod repository;
mod store;
mod unit_of_work;

pub use repository::*;
pub use store::*;
pub use unit_of_work::*;
