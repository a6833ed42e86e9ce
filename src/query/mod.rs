// query/mod.rs - 查询模块
//! 查询条件、文本语法解析与记录过滤

mod parser;
pub mod filter;
pub mod types;

pub use parser::*;
pub use filter::*;
pub use types::*;
