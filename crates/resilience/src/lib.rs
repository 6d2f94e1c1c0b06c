//! resilience - 错误分类、重试与断路
//!
//! 把存储驱动的大量错误码归类为瞬时/永久/配置/未知四类，
//! 并据此驱动带指数退避和抖动的重试执行器以及断路器。

mod circuit_breaker;
mod classification;
mod handler;

pub use circuit_breaker::*;
pub use classification::*;
pub use handler::*;
