//! Vulkan 抽象层
//!
//! 提供对 Vulkan API 的高层封装，包括设备管理、命令缓冲、同步原语、shader 模块等核心功能。
//! 所有 Vulkan 资源通过 [`gfx::Gfx`] 单例统一管理，简化生命周期和借用关系。

pub mod commands;
pub mod foundation;
pub mod gfx;
pub mod gfx_core;
pub mod pipelines;
