//! 帧级 render graph
//!
//! 每帧接受 compute / graphics / ray-tracing pass 的声明，按声明顺序解析资源依赖，
//! 自动插入最小化的 barrier，并录制到 command buffer 中。
//! pipeline 从 shader 反射自动推导 descriptor 布局，带缓存与热重载。

pub mod access;
pub mod graph;
pub mod pass;
pub mod pipeline;
pub mod reflection;
pub mod resource;
pub mod sbt;
pub mod shader;
pub mod sync;
