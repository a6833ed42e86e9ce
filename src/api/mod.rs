// api/mod.rs - API 模块
//! 提供给调用方（CLI / UI）的结构化响应类型

pub mod response;

pub use response::*;
