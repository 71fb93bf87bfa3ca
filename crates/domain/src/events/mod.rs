//! 实时通道上的事件定义
//!
//! 每个事件名对应一个枚举变体，载荷有明确的结构，不使用无类型的字典。
//! 线上格式为 `{"event": "<name>", "data": {...}}`。

pub mod client;
pub mod server;

pub use client::{ClientEvent, SignalKind};
pub use server::{RoleFeed, ServerEvent};
