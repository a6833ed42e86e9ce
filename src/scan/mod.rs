// scan/mod.rs - 扫描模块
//! 扫描编排与断点持久化

mod checkpoint;
mod orchestrator;

pub use checkpoint::*;
pub use orchestrator::*;
