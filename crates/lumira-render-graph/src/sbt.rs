//! Shader Binding Table
//!
//! 布局计算是纯函数，方便单测；device 侧只负责分配 buffer、
//! 拷贝 group handle、生成 trace rays 用的四个 region。

use anyhow::Context;
use ash::vk;

use lumira_gfx::gfx::Gfx;

/// 向上对齐到 align 的整数倍，align 必须是 2 的幂
#[inline]
pub const fn align_up(value: u64, align: u64) -> u64 {
    (value + align - 1) & !(align - 1)
}

/// 一个 region 在 SBT buffer 中的位置
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RegionLayout {
    pub offset: u64,
    pub stride: u64,
    pub size: u64,
}

/// 完整的 SBT 布局
///
/// 每个 region 的起始地址都对齐到 base_alignment，
/// region 内每条 record 对齐到 handle_alignment。
/// raygen region 比较特殊：Vulkan 规定它的 stride 必须等于 size
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SbtLayout {
    pub handle_stride: u64,
    pub raygen: RegionLayout,
    pub miss: RegionLayout,
    pub hit: RegionLayout,
    pub callable: RegionLayout,
    pub total_size: u64,
}

pub fn compute_sbt_layout(
    handle_size: u64,
    handle_alignment: u64,
    base_alignment: u64,
    miss_count: u64,
    hit_count: u64,
    callable_count: u64,
) -> SbtLayout {
    let handle_stride = align_up(handle_size, handle_alignment);

    let mut cursor = 0u64;
    let mut region = |count: u64, stride: u64| {
        if count == 0 {
            return RegionLayout::default();
        }
        let offset = align_up(cursor, base_alignment);
        let size = align_up(count * stride, base_alignment);
        cursor = offset + size;
        RegionLayout { offset, stride, size }
    };

    let mut raygen = region(1, handle_stride);
    raygen.stride = raygen.size;
    let miss = region(miss_count, handle_stride);
    let hit = region(hit_count, handle_stride);
    let callable = region(callable_count, handle_stride);

    SbtLayout {
        handle_stride,
        raygen,
        miss,
        hit,
        callable,
        total_size: cursor,
    }
}

/// device 上的 SBT：一块 host 可见的 buffer，划分成四个 region
pub struct SbtRegions {
    buffer: vk::Buffer,
    memory: vk::DeviceMemory,
    raygen_region: vk::StridedDeviceAddressRegionKHR,
    miss_region: vk::StridedDeviceAddressRegionKHR,
    hit_region: vk::StridedDeviceAddressRegionKHR,
    callable_region: vk::StridedDeviceAddressRegionKHR,
}

impl SbtRegions {
    /// 从刚创建好的 ray tracing pipeline 构建 SBT
    ///
    /// group 顺序与 pipeline 创建时一致：raygen、miss * n、hit * n
    pub fn new(
        pipeline: vk::Pipeline,
        miss_count: u32,
        hit_count: u32,
        debug_name: &str,
    ) -> anyhow::Result<Self> {
        let gfx = Gfx::get();
        let device = gfx.gfx_device();
        let rt_props = gfx.rt_pipeline_props();

        let group_count = 1 + miss_count + hit_count;
        let handle_size = rt_props.shader_group_handle_size as u64;
        let layout = compute_sbt_layout(
            handle_size,
            rt_props.shader_group_handle_alignment as u64,
            rt_props.shader_group_base_alignment as u64,
            miss_count as u64,
            hit_count as u64,
            0,
        );

        let handles = unsafe {
            device
                .ray_tracing_pipeline()
                .get_ray_tracing_shader_group_handles(
                    pipeline,
                    0,
                    group_count,
                    group_count as usize * handle_size as usize,
                )
                .context("get_ray_tracing_shader_group_handles failed")?
        };

        // SBT buffer：host 可见，带 device address
        let (buffer, memory) = unsafe {
            let buffer = device
                .create_buffer(
                    &vk::BufferCreateInfo::default()
                        .size(layout.total_size)
                        .usage(
                            vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR
                                | vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS,
                        )
                        .sharing_mode(vk::SharingMode::EXCLUSIVE),
                    None,
                )
                .context("create SBT buffer failed")?;

            let requirements = device.get_buffer_memory_requirements(buffer);
            let memory_type = gfx.physical_device().find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            );
            let mut alloc_flags =
                vk::MemoryAllocateFlagsInfo::default().flags(vk::MemoryAllocateFlags::DEVICE_ADDRESS);
            let memory = device
                .allocate_memory(
                    &vk::MemoryAllocateInfo::default()
                        .allocation_size(requirements.size)
                        .memory_type_index(memory_type)
                        .push_next(&mut alloc_flags),
                    None,
                )
                .context("allocate SBT memory failed")?;
            device.bind_buffer_memory(buffer, memory, 0).context("bind SBT memory failed")?;
            (buffer, memory)
        };
        device.set_object_debug_name(buffer, debug_name);

        // 把 group handle 按 region 布局拷贝进去
        unsafe {
            let mapped = device
                .map_memory(memory, 0, layout.total_size, vk::MemoryMapFlags::empty())
                .context("map SBT memory failed")? as *mut u8;

            let mut copy_group = |group_index: u64, region: &RegionLayout, slot: u64| {
                let src = &handles[(group_index * handle_size) as usize..][..handle_size as usize];
                let dst_offset = region.offset + slot * layout.handle_stride;
                std::ptr::copy_nonoverlapping(src.as_ptr(), mapped.add(dst_offset as usize), src.len());
            };

            copy_group(0, &layout.raygen, 0);
            for i in 0..miss_count as u64 {
                copy_group(1 + i, &layout.miss, i);
            }
            for i in 0..hit_count as u64 {
                copy_group(1 + miss_count as u64 + i, &layout.hit, i);
            }

            device.unmap_memory(memory);
        }

        let base_address = unsafe {
            device.get_buffer_device_address(&vk::BufferDeviceAddressInfo::default().buffer(buffer))
        };
        let region = |layout: &RegionLayout| vk::StridedDeviceAddressRegionKHR {
            device_address: if layout.size == 0 { 0 } else { base_address + layout.offset },
            stride: layout.stride,
            size: layout.size,
        };

        Ok(Self {
            buffer,
            memory,
            raygen_region: region(&layout.raygen),
            miss_region: region(&layout.miss),
            hit_region: region(&layout.hit),
            callable_region: region(&layout.callable),
        })
    }

    #[inline]
    pub fn raygen_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.raygen_region
    }

    #[inline]
    pub fn miss_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.miss_region
    }

    #[inline]
    pub fn hit_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.hit_region
    }

    #[inline]
    pub fn callable_region(&self) -> &vk::StridedDeviceAddressRegionKHR {
        &self.callable_region
    }

    pub fn destroy(self) {
        let device = Gfx::get().gfx_device();
        unsafe {
            device.destroy_buffer(self.buffer, None);
            device.free_memory(self.memory, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 64), 0);
        assert_eq!(align_up(1, 64), 64);
        assert_eq!(align_up(64, 64), 64);
        assert_eq!(align_up(65, 64), 128);
    }

    #[test]
    fn test_sbt_layout_typical_props() {
        // 常见硬件参数：handle 32 字节，handle 对齐 32，base 对齐 64
        let layout = compute_sbt_layout(32, 32, 64, 2, 1, 0);

        assert_eq!(layout.handle_stride, 32);

        // raygen：1 条 record，region 补齐到 64，stride == size
        assert_eq!(layout.raygen, RegionLayout { offset: 0, stride: 64, size: 64 });

        // miss：2 条 record，正好 64
        assert_eq!(layout.miss, RegionLayout { offset: 64, stride: 32, size: 64 });

        // hit：1 条 record，补齐到 64
        assert_eq!(layout.hit, RegionLayout { offset: 128, stride: 32, size: 64 });

        assert_eq!(layout.callable, RegionLayout::default());
        assert_eq!(layout.total_size, 192);
    }

    #[test]
    fn test_sbt_layout_unaligned_handle() {
        // handle 大小不是对齐值的整数倍时 stride 向上取整
        let layout = compute_sbt_layout(20, 16, 64, 1, 1, 0);
        assert_eq!(layout.handle_stride, 32);

        // 各 region 起始地址都满足 base 对齐
        assert_eq!(layout.raygen.offset % 64, 0);
        assert_eq!(layout.miss.offset % 64, 0);
        assert_eq!(layout.hit.offset % 64, 0);

        // raygen 的 stride 必须等于 size
        assert_eq!(layout.raygen.stride, layout.raygen.size);
    }

    #[test]
    fn test_sbt_regions_disjoint() {
        let layout = compute_sbt_layout(32, 32, 64, 3, 5, 2);
        let regions = [layout.raygen, layout.miss, layout.hit, layout.callable];
        for pair in regions.windows(2) {
            assert!(pair[0].offset + pair[0].size <= pair[1].offset);
        }
        let last = regions.last().unwrap();
        assert_eq!(layout.total_size, last.offset + last.size);
    }
}
