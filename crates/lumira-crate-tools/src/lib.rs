//! Lumira 工具集
//!
//! 提供日志初始化等通用工具。

pub mod init_log;
