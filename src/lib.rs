/// 基于 BLE / Wi-Fi 信号指纹的房间估计
///
/// 数据流：原始观测 → 指纹构建 → 标准化 → 估计器 → 逐指纹输出 → 聚合结果

pub mod algorithms;
pub mod artifacts;
pub mod config;
pub mod corpus;
pub mod error;
pub mod inference;
pub mod judgement;
pub mod scanner;
pub mod service;
pub mod training;

/// 版本号
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
