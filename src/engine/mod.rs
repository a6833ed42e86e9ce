// engine/mod.rs - 媒体库抽象层
//! 提供统一的媒体库接口

pub mod core;
pub mod builder;

pub use self::core::*;
pub use self::builder::*;
