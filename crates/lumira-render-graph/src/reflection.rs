//! SPIR-V 反射
//!
//! 从编译后的 SPIR-V 中提取 descriptor 布局和 push constant 大小，
//! pipeline layout 完全由反射推导，调用方不需要手写 binding 描述。
//!
//! 约定：set 0 承载普通 descriptor（通过 push descriptor template 更新），
//! set 1 binding 0 固定是 TLAS（单独的持久 descriptor set）。

use anyhow::{bail, Context};
use ash::vk;
use spirq::prelude::*;
use spirq::ty::{AccessType, DescriptorType as SpirqDescriptorType};

use crate::access::AccessState;

/// TLAS 所在的 descriptor set 编号
pub const TLAS_SET: u32 = 1;

/// 单个 binding 的布局与访问信息
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BindingInfo {
    pub binding: u32,
    pub descriptor_type: vk::DescriptorType,
    /// descriptor 数组长度，非数组为 1
    pub count: u32,
    pub stages: vk::ShaderStageFlags,
    /// 反射推断出的读 / 写行为
    pub reads: bool,
    pub writes: bool,
}

impl BindingInfo {
    /// 推断该 binding 的访问状态，结合所属 pipeline stage
    pub fn inferred_access(&self, shader_stage: vk::PipelineStageFlags2) -> AccessState {
        let access = match self.descriptor_type {
            vk::DescriptorType::UNIFORM_BUFFER => vk::AccessFlags2::UNIFORM_READ,
            vk::DescriptorType::STORAGE_BUFFER | vk::DescriptorType::STORAGE_IMAGE => {
                let mut access = vk::AccessFlags2::NONE;
                if self.reads {
                    access |= vk::AccessFlags2::SHADER_STORAGE_READ;
                }
                if self.writes {
                    access |= vk::AccessFlags2::SHADER_STORAGE_WRITE;
                }
                access
            }
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER | vk::DescriptorType::SAMPLED_IMAGE => {
                vk::AccessFlags2::SHADER_SAMPLED_READ
            }
            vk::DescriptorType::ACCELERATION_STRUCTURE_KHR => vk::AccessFlags2::ACCELERATION_STRUCTURE_READ_KHR,
            _ => vk::AccessFlags2::SHADER_READ,
        };
        AccessState::new(shader_stage, access)
    }
}

/// 多个 stage 合并后的 pipeline layout 信息
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PipelineLayoutInfo {
    /// set 0 的 binding，按 binding 编号升序
    pub bindings: Vec<BindingInfo>,
    /// 是否声明了 set 1 的 TLAS
    pub has_tlas: bool,
    pub tlas_stages: vk::ShaderStageFlags,
    pub push_constant_size: u32,
    pub push_constant_stages: vk::ShaderStageFlags,
}

impl PipelineLayoutInfo {
    pub fn binding(&self, binding: u32) -> Option<&BindingInfo> {
        self.bindings.iter().find(|b| b.binding == binding)
    }
}

/// 单个 shader stage 的反射结果
#[derive(Clone, Debug)]
pub struct StageReflection {
    pub stage: vk::ShaderStageFlags,
    pub bindings: Vec<BindingInfo>,
    pub has_tlas: bool,
    pub push_constant_size: u32,
}

impl StageReflection {
    /// 反射一个 SPIR-V 模块
    ///
    /// entry point 固定是 main，与 glslc 的输出一致
    pub fn reflect(spv: &[u32], stage: vk::ShaderStageFlags) -> anyhow::Result<Self> {
        let entry_points = ReflectConfig::new()
            .spv(spv)
            .ref_all_rscs(true)
            .reflect()
            .context("failed to reflect SPIR-V module")?;
        let entry = entry_points
            .into_iter()
            .find(|entry| entry.name == "main")
            .context("no `main` entry point in SPIR-V module")?;

        let mut bindings = Vec::new();
        let mut has_tlas = false;
        let mut push_constant_size = 0u32;

        for var in &entry.vars {
            match var {
                Variable::Descriptor { desc_bind, desc_ty, nbind, .. } => {
                    if desc_bind.set() == TLAS_SET {
                        if desc_bind.bind() != 0 || !matches!(desc_ty, SpirqDescriptorType::AccelStruct()) {
                            bail!(
                                "descriptor set {} is reserved for a single TLAS at binding 0, found {:?} at binding {}",
                                TLAS_SET,
                                desc_ty,
                                desc_bind.bind()
                            );
                        }
                        has_tlas = true;
                        continue;
                    }
                    if desc_bind.set() != 0 {
                        bail!("unsupported descriptor set {}, only set 0 and set {} are used", desc_bind.set(), TLAS_SET);
                    }

                    let (descriptor_type, reads, writes) = Self::map_descriptor_type(desc_ty)?;
                    bindings.push(BindingInfo {
                        binding: desc_bind.bind(),
                        descriptor_type,
                        count: *nbind,
                        stages: stage,
                        reads,
                        writes,
                    });
                }
                Variable::PushConstant { ty, .. } => {
                    push_constant_size = ty.nbyte().unwrap_or(0) as u32;
                }
                _ => {}
            }
        }

        bindings.sort_by_key(|b| b.binding);
        Ok(Self { stage, bindings, has_tlas, push_constant_size })
    }

    fn map_descriptor_type(desc_ty: &SpirqDescriptorType) -> anyhow::Result<(vk::DescriptorType, bool, bool)> {
        let access_rw = |access: &AccessType| match access {
            AccessType::ReadOnly => (true, false),
            AccessType::WriteOnly => (false, true),
            AccessType::ReadWrite => (true, true),
        };
        Ok(match desc_ty {
            SpirqDescriptorType::UniformBuffer() => (vk::DescriptorType::UNIFORM_BUFFER, true, false),
            SpirqDescriptorType::StorageBuffer(access) => {
                let (reads, writes) = access_rw(access);
                (vk::DescriptorType::STORAGE_BUFFER, reads, writes)
            }
            SpirqDescriptorType::StorageImage(access) => {
                let (reads, writes) = access_rw(access);
                (vk::DescriptorType::STORAGE_IMAGE, reads, writes)
            }
            SpirqDescriptorType::CombinedImageSampler() => (vk::DescriptorType::COMBINED_IMAGE_SAMPLER, true, false),
            SpirqDescriptorType::SampledImage() => (vk::DescriptorType::SAMPLED_IMAGE, true, false),
            SpirqDescriptorType::Sampler() => (vk::DescriptorType::SAMPLER, true, false),
            SpirqDescriptorType::AccelStruct() => (vk::DescriptorType::ACCELERATION_STRUCTURE_KHR, true, false),
            other => bail!("unsupported descriptor type in shader: {other:?}"),
        })
    }
}

/// 合并多个 stage 的反射结果
///
/// 相同 binding 在不同 stage 中的 descriptor type 必须一致，
/// stage flags 和读写行为取并集
pub fn merge_stages(stages: &[StageReflection]) -> anyhow::Result<PipelineLayoutInfo> {
    let mut info = PipelineLayoutInfo::default();

    for stage in stages {
        for binding in &stage.bindings {
            match info.bindings.iter_mut().find(|b| b.binding == binding.binding) {
                Some(existing) => {
                    if existing.descriptor_type != binding.descriptor_type {
                        bail!(
                            "binding {} has conflicting descriptor types across stages: {:?} vs {:?}",
                            binding.binding,
                            existing.descriptor_type,
                            binding.descriptor_type
                        );
                    }
                    if existing.count != binding.count {
                        bail!(
                            "binding {} has conflicting array sizes across stages: {} vs {}",
                            binding.binding,
                            existing.count,
                            binding.count
                        );
                    }
                    existing.stages |= binding.stages;
                    existing.reads |= binding.reads;
                    existing.writes |= binding.writes;
                }
                None => info.bindings.push(binding.clone()),
            }
        }
        if stage.has_tlas {
            info.has_tlas = true;
            info.tlas_stages |= stage.stage;
        }
        if stage.push_constant_size > 0 {
            info.push_constant_size = info.push_constant_size.max(stage.push_constant_size);
            info.push_constant_stages |= stage.stage;
        }
    }

    info.bindings.sort_by_key(|b| b.binding);
    Ok(info)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(binding: u32, ty: vk::DescriptorType, stage: vk::ShaderStageFlags, reads: bool, writes: bool) -> BindingInfo {
        BindingInfo { binding, descriptor_type: ty, count: 1, stages: stage, reads, writes }
    }

    fn stage_reflection(stage: vk::ShaderStageFlags, bindings: Vec<BindingInfo>) -> StageReflection {
        StageReflection { stage, bindings, has_tlas: false, push_constant_size: 0 }
    }

    #[test]
    fn test_merge_unions_stages_and_access() {
        let rgen = StageReflection {
            stage: vk::ShaderStageFlags::RAYGEN_KHR,
            bindings: vec![binding(0, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::RAYGEN_KHR, false, true)],
            has_tlas: true,
            push_constant_size: 16,
        };
        let rchit = StageReflection {
            stage: vk::ShaderStageFlags::CLOSEST_HIT_KHR,
            bindings: vec![
                binding(0, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::CLOSEST_HIT_KHR, true, false),
                binding(2, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::CLOSEST_HIT_KHR, true, false),
            ],
            has_tlas: false,
            push_constant_size: 8,
        };

        let info = merge_stages(&[rgen, rchit]).unwrap();
        assert_eq!(info.bindings.len(), 2);

        let b0 = info.binding(0).unwrap();
        assert_eq!(b0.stages, vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR);
        assert!(b0.reads && b0.writes);

        assert!(info.has_tlas);
        assert_eq!(info.tlas_stages, vk::ShaderStageFlags::RAYGEN_KHR);
        assert_eq!(info.push_constant_size, 16);
        assert_eq!(
            info.push_constant_stages,
            vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::CLOSEST_HIT_KHR
        );
    }

    #[test]
    fn test_merge_is_idempotent() {
        let s = stage_reflection(
            vk::ShaderStageFlags::COMPUTE,
            vec![binding(1, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE, true, true)],
        );
        let once = merge_stages(std::slice::from_ref(&s)).unwrap();
        let twice = merge_stages(&[s.clone(), s]).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_merge_rejects_type_conflict() {
        let a = stage_reflection(
            vk::ShaderStageFlags::VERTEX,
            vec![binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::VERTEX, true, false)],
        );
        let b = stage_reflection(
            vk::ShaderStageFlags::FRAGMENT,
            vec![binding(0, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::FRAGMENT, true, false)],
        );
        assert!(merge_stages(&[a, b]).is_err());
    }

    #[test]
    fn test_bindings_sorted_by_slot() {
        let s = stage_reflection(
            vk::ShaderStageFlags::COMPUTE,
            vec![
                binding(3, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE, true, false),
                binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::COMPUTE, true, false),
            ],
        );
        let info = merge_stages(&[s]).unwrap();
        let slots: Vec<u32> = info.bindings.iter().map(|b| b.binding).collect();
        assert_eq!(slots, vec![0, 3]);
    }

    #[test]
    fn test_inferred_access() {
        let write_only = binding(0, vk::DescriptorType::STORAGE_BUFFER, vk::ShaderStageFlags::COMPUTE, false, true);
        let state = write_only.inferred_access(vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(state, AccessState::STORAGE_WRITE_COMPUTE);
        assert!(state.is_write());

        let uniform = binding(1, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::COMPUTE, true, false);
        let state = uniform.inferred_access(vk::PipelineStageFlags2::COMPUTE_SHADER);
        assert_eq!(state, AccessState::UNIFORM_READ_COMPUTE);
        assert!(!state.is_write());
    }
}
