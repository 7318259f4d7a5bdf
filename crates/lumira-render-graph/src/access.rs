//! 资源访问状态定义
//!
//! 封装 Vulkan 的 pipeline stage 和 access mask，
//! 提供预定义的常用状态组合，用于自动计算 barrier。

use ash::vk;

/// render graph 内部的资源标识
///
/// buffer 使用 device address，image / tlas 使用 handle 的原始值。
/// 两类句柄来自不同的地址空间，实践中不会冲突。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceId(pub u64);

/// 资源在某个执行点上的访问方式
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct AccessState {
    /// Pipeline stage
    pub stage: vk::PipelineStageFlags2,
    /// Access mask
    pub access: vk::AccessFlags2,
}

impl Default for AccessState {
    fn default() -> Self {
        Self::NONE
    }
}

// new & 常量定义
impl AccessState {
    /// 创建自定义状态
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2) -> Self {
        Self { stage, access }
    }

    // ============ 预定义状态常量 ============

    pub const NONE: Self = Self::new(vk::PipelineStageFlags2::NONE, vk::AccessFlags2::NONE);

    /// storage buffer/image 读取（计算着色器）
    pub const STORAGE_READ_COMPUTE: Self =
        Self::new(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_STORAGE_READ);

    /// storage buffer/image 写入（计算着色器）
    pub const STORAGE_WRITE_COMPUTE: Self =
        Self::new(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::SHADER_STORAGE_WRITE);

    /// storage buffer/image 读写（计算着色器）
    pub const STORAGE_READ_WRITE_COMPUTE: Self = Self::new(
        vk::PipelineStageFlags2::COMPUTE_SHADER,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
    );

    /// storage buffer/image 读取（光追着色器）
    pub const STORAGE_READ_RAY_TRACING: Self =
        Self::new(vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR, vk::AccessFlags2::SHADER_STORAGE_READ);

    /// storage buffer/image 写入（光追着色器）
    pub const STORAGE_WRITE_RAY_TRACING: Self =
        Self::new(vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR, vk::AccessFlags2::SHADER_STORAGE_WRITE);

    /// storage buffer/image 读写（光追着色器）
    pub const STORAGE_READ_WRITE_RAY_TRACING: Self = Self::new(
        vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::SHADER_STORAGE_READ.as_raw() | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw(),
        ),
    );

    /// uniform buffer 读取（计算着色器）
    pub const UNIFORM_READ_COMPUTE: Self =
        Self::new(vk::PipelineStageFlags2::COMPUTE_SHADER, vk::AccessFlags2::UNIFORM_READ);

    /// 采样读取（片段着色器）
    pub const SHADER_READ_FRAGMENT: Self =
        Self::new(vk::PipelineStageFlags2::FRAGMENT_SHADER, vk::AccessFlags2::SHADER_SAMPLED_READ);

    /// 加速结构读取（光追着色器）
    pub const ACCELERATION_STRUCTURE_READ: Self = Self::new(
        vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
    );

    /// transfer 读取（copy 的 src）
    pub const TRANSFER_READ: Self = Self::new(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_READ);

    /// transfer 写入（copy 的 dst，以及 fill/zero）
    pub const TRANSFER_WRITE: Self = Self::new(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE);

    /// 颜色附件写入（图形管线）
    pub const COLOR_ATTACHMENT_WRITE: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::COLOR_ATTACHMENT_WRITE,
    );
}

// tools
impl AccessState {
    /// 所有写类型的 access mask
    pub const WRITE_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_WRITE.as_raw()
            | vk::AccessFlags2::SHADER_STORAGE_WRITE.as_raw()
            | vk::AccessFlags2::TRANSFER_WRITE.as_raw()
            | vk::AccessFlags2::MEMORY_WRITE.as_raw()
            | vk::AccessFlags2::HOST_WRITE.as_raw()
            | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw()
            | vk::AccessFlags2::ACCELERATION_STRUCTURE_WRITE_KHR.as_raw(),
    );

    /// 是否包含写操作
    #[inline]
    pub fn is_write(&self) -> bool {
        self.access.intersects(Self::WRITE_ACCESS)
    }

    /// 合并两个访问状态（stage 和 access 取并集）
    #[inline]
    pub fn merge(self, other: Self) -> Self {
        Self {
            stage: self.stage | other.stage,
            access: self.access | other.access,
        }
    }

    /// 当前状态是否覆盖了 other 的 stage 和 access
    ///
    /// 用于去重：一次 barrier 让资源对某组 (stage, access) 可见之后，
    /// 被覆盖的后续读取无需再加 barrier
    #[inline]
    pub fn covers(&self, other: &Self) -> bool {
        self.stage.contains(other.stage) && self.access.contains(other.access)
    }

    #[inline]
    pub fn is_none(&self) -> bool {
        self.stage == vk::PipelineStageFlags2::NONE && self.access == vk::AccessFlags2::NONE
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_write() {
        assert!(AccessState::STORAGE_WRITE_COMPUTE.is_write());
        assert!(AccessState::STORAGE_READ_WRITE_COMPUTE.is_write());
        assert!(AccessState::TRANSFER_WRITE.is_write());
        assert!(!AccessState::STORAGE_READ_COMPUTE.is_write());
        assert!(!AccessState::ACCELERATION_STRUCTURE_READ.is_write());
        assert!(!AccessState::UNIFORM_READ_COMPUTE.is_write());
    }

    #[test]
    fn test_merge_and_covers() {
        let merged = AccessState::STORAGE_READ_COMPUTE.merge(AccessState::STORAGE_READ_RAY_TRACING);
        assert!(merged.covers(&AccessState::STORAGE_READ_COMPUTE));
        assert!(merged.covers(&AccessState::STORAGE_READ_RAY_TRACING));
        assert!(!merged.covers(&AccessState::STORAGE_WRITE_COMPUTE));
        assert!(!AccessState::STORAGE_READ_COMPUTE.covers(&merged));
    }
}
