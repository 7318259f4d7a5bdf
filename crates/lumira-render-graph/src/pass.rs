//! Pass 的声明与构建
//!
//! 每帧由调用方声明若干 pass，graph 按声明顺序执行。
//! pass 携带着色器来源、资源绑定、push constant 数据，
//! 以及执行前后的 transfer 辅助操作（清零、回读复制）。

use ash::vk;
use bytemuck::Pod;

use crate::access::{AccessState, ResourceId};
use crate::resource::{BufferResource, TextureResource, TlasResource};

/// compute pass 的配置
#[derive(Clone, Debug)]
pub struct ComputePassSettings {
    /// shader 源文件路径
    pub shader: String,
    /// specialization constant，按 constant id 顺序排列
    pub specialization: Vec<u32>,
    /// dispatch 的 workgroup 数量
    pub dims: [u32; 3],
    /// (binding, count)：反射推不出长度的 runtime 数组的显式 descriptor 数量
    pub descriptor_counts: Vec<(u32, u32)>,
}

impl ComputePassSettings {
    pub fn new(shader: impl Into<String>, dims: [u32; 3]) -> Self {
        Self {
            shader: shader.into(),
            specialization: Vec::new(),
            dims,
            descriptor_counts: Vec::new(),
        }
    }

    pub fn specialization(mut self, values: Vec<u32>) -> Self {
        self.specialization = values;
        self
    }

    pub fn descriptor_count(mut self, binding: u32, count: u32) -> Self {
        self.descriptor_counts.push((binding, count));
        self
    }
}

/// ray tracing pass 的配置
///
/// shaders 的顺序决定 shader group 的顺序：raygen 必须排在第一个，
/// 其后是任意数量的 miss 和 hit 着色器
#[derive(Clone, Debug)]
pub struct RtPassSettings {
    pub shaders: Vec<String>,
    pub specialization: Vec<u32>,
    /// trace rays 的宽、高、深
    pub dims: [u32; 3],
    pub max_recursion_depth: u32,
    /// (binding, count)：反射推不出长度的 runtime 数组的显式 descriptor 数量
    pub descriptor_counts: Vec<(u32, u32)>,
}

impl RtPassSettings {
    pub fn new(shaders: Vec<String>, dims: [u32; 3]) -> Self {
        Self {
            shaders,
            specialization: Vec::new(),
            dims,
            max_recursion_depth: 1,
            descriptor_counts: Vec::new(),
        }
    }

    pub fn descriptor_count(mut self, binding: u32, count: u32) -> Self {
        self.descriptor_counts.push((binding, count));
        self
    }

    pub fn specialization(mut self, values: Vec<u32>) -> Self {
        self.specialization = values;
        self
    }

    pub fn max_recursion_depth(mut self, depth: u32) -> Self {
        self.max_recursion_depth = depth;
        self
    }
}

/// graphics pass 的配置
///
/// 基于 dynamic rendering，不使用 render pass 对象
#[derive(Clone, Debug)]
pub struct GraphicsPassSettings {
    pub vertex_shader: String,
    pub fragment_shader: String,
    pub specialization: Vec<u32>,
    pub extent: vk::Extent2D,
    pub color_formats: Vec<vk::Format>,
    pub vertex_count: u32,
    pub instance_count: u32,
}

impl GraphicsPassSettings {
    pub fn new(vertex_shader: impl Into<String>, fragment_shader: impl Into<String>, extent: vk::Extent2D) -> Self {
        Self {
            vertex_shader: vertex_shader.into(),
            fragment_shader: fragment_shader.into(),
            specialization: Vec::new(),
            extent,
            color_formats: Vec::new(),
            vertex_count: 3,
            instance_count: 1,
        }
    }

    pub fn color_format(mut self, format: vk::Format) -> Self {
        self.color_formats.push(format);
        self
    }

    pub fn draw(mut self, vertex_count: u32, instance_count: u32) -> Self {
        self.vertex_count = vertex_count;
        self.instance_count = instance_count;
        self
    }
}

/// pass 的种类与执行参数
#[derive(Clone, Debug)]
pub enum PassKind {
    Compute(ComputePassSettings),
    RayTracing(RtPassSettings),
    Graphics(GraphicsPassSettings),
}

impl PassKind {
    /// 着色器主体执行时对应的 pipeline stage
    pub fn shader_stage(&self) -> vk::PipelineStageFlags2 {
        match self {
            PassKind::Compute(_) => vk::PipelineStageFlags2::COMPUTE_SHADER,
            PassKind::RayTracing(_) => vk::PipelineStageFlags2::RAY_TRACING_SHADER_KHR,
            PassKind::Graphics(_) => vk::PipelineStageFlags2::FRAGMENT_SHADER,
        }
    }
}

/// pass 执行前后的 transfer 辅助操作
#[derive(Clone, Copy, Debug)]
pub enum TransferOp {
    /// 把 buffer 的前 size 字节填零
    Zero {
        buffer: vk::Buffer,
        id: ResourceId,
        size: vk::DeviceSize,
    },
    /// buffer 到 buffer 的复制，常用于把计算结果搬到 host 可见的回读 buffer
    Copy {
        src: vk::Buffer,
        src_id: ResourceId,
        dst: vk::Buffer,
        dst_id: ResourceId,
        size: vk::DeviceSize,
    },
}

/// 一个绑定槽位上的资源
#[derive(Clone, Debug)]
pub enum BoundKind {
    Buffer {
        id: ResourceId,
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        range: vk::DeviceSize,
    },
    Texture {
        id: ResourceId,
        image: vk::Image,
        view: vk::ImageView,
        layout: vk::ImageLayout,
        sampler: vk::Sampler,
    },
    /// 同一槽位上的 descriptor 数组
    TextureArray {
        entries: Vec<(ResourceId, vk::Image, vk::ImageView)>,
        layout: vk::ImageLayout,
        sampler: vk::Sampler,
    },
    Tlas {
        id: ResourceId,
        handle: vk::AccelerationStructureKHR,
    },
}

/// 绑定槽位，按声明顺序对应反射出的 binding 顺序
#[derive(Clone, Debug)]
pub struct BoundResource {
    pub kind: BoundKind,
    /// 显式声明的访问状态；None 表示由反射推断
    pub state: Option<AccessState>,
}

/// shader 通过 device address 间接引用的 buffer，无法从 descriptor 发现
#[derive(Clone, Copy, Debug)]
pub struct IndirectAccess {
    pub address: vk::DeviceAddress,
    pub state: AccessState,
}

/// 一个已声明的 pass
#[derive(Clone, Debug)]
pub struct Pass {
    pub name: String,
    pub kind: PassKind,
    pub bindings: Vec<BoundResource>,
    pub push_constants: Vec<u8>,
    /// 执行前的 transfer 操作（目前只有 Zero）
    pub pre_ops: Vec<TransferOp>,
    /// 执行后的 transfer 操作（目前只有 Copy）
    pub post_ops: Vec<TransferOp>,
    pub indirect_accesses: Vec<IndirectAccess>,
    /// graphics pass 的颜色附件
    pub color_attachments: Vec<(ResourceId, vk::Image, vk::ImageView)>,
}

impl Pass {
    pub fn new(name: impl Into<String>, kind: PassKind) -> Self {
        Self {
            name: name.into(),
            kind,
            bindings: Vec::new(),
            push_constants: Vec::new(),
            pre_ops: Vec::new(),
            post_ops: Vec::new(),
            indirect_accesses: Vec::new(),
            color_attachments: Vec::new(),
        }
    }
}

/// pass 的链式构建器
///
/// 由 [`crate::graph::RenderGraph`] 的 add_* 系列方法返回，
/// 借用 graph 中刚刚压入的 pass
pub struct PassBuilder<'a> {
    pass: &'a mut Pass,
}

impl<'a> PassBuilder<'a> {
    pub(crate) fn new(pass: &'a mut Pass) -> Self {
        Self { pass }
    }

    /// 设置 push constant 数据
    pub fn push_constants<T: Pod>(self, data: &T) -> Self {
        self.pass.push_constants = bytemuck::bytes_of(data).to_vec();
        self
    }

    /// 绑定 buffer，访问状态由 shader 反射推断
    pub fn bind(self, buffer: &BufferResource) -> Self {
        self.bind_range(buffer, 0, buffer.size())
    }

    /// 绑定 buffer 的一个子区间
    pub fn bind_range(self, buffer: &BufferResource, offset: vk::DeviceSize, range: vk::DeviceSize) -> Self {
        assert!(range > 0, "binding a zero-sized buffer range for pass {}", self.pass.name);
        self.pass.bindings.push(BoundResource {
            kind: BoundKind::Buffer {
                id: buffer.id(),
                buffer: buffer.vk_buffer(),
                offset,
                range,
            },
            state: None,
        });
        self
    }

    /// 绑定 buffer 并显式指定访问状态，优先于反射推断
    pub fn bind_with(self, buffer: &BufferResource, state: AccessState) -> Self {
        assert!(buffer.size() > 0, "binding a zero-sized buffer for pass {}", self.pass.name);
        self.pass.bindings.push(BoundResource {
            kind: BoundKind::Buffer {
                id: buffer.id(),
                buffer: buffer.vk_buffer(),
                offset: 0,
                range: buffer.size(),
            },
            state: Some(state),
        });
        self
    }

    /// 绑定 texture（storage image 或 sampled image，按反射决定）
    pub fn bind_texture(self, texture: &TextureResource, layout: vk::ImageLayout, sampler: vk::Sampler) -> Self {
        self.pass.bindings.push(BoundResource {
            kind: BoundKind::Texture {
                id: texture.id(),
                image: texture.vk_image(),
                view: texture.vk_view(),
                layout,
                sampler,
            },
            state: None,
        });
        self
    }

    /// 绑定 texture 数组到同一个 binding
    pub fn bind_texture_array(
        self,
        textures: &[TextureResource],
        layout: vk::ImageLayout,
        sampler: vk::Sampler,
    ) -> Self {
        self.pass.bindings.push(BoundResource {
            kind: BoundKind::TextureArray {
                entries: textures.iter().map(|t| (t.id(), t.vk_image(), t.vk_view())).collect(),
                layout,
                sampler,
            },
            state: None,
        });
        self
    }

    /// 绑定 top-level 加速结构
    pub fn bind_tlas(self, tlas: &TlasResource) -> Self {
        self.pass.bindings.push(BoundResource {
            kind: BoundKind::Tlas {
                id: tlas.id(),
                handle: tlas.vk_handle(),
            },
            state: None,
        });
        self
    }

    /// 声明一个通过 device address 间接访问的 buffer
    ///
    /// 地址需要事先通过 [`crate::resource::ResourceRegistry`] 注册，
    /// 否则 run 时会报错
    pub fn bind_indirect(self, address: vk::DeviceAddress, state: AccessState) -> Self {
        self.pass.indirect_accesses.push(IndirectAccess { address, state });
        self
    }

    /// graphics pass：把 texture 作为颜色附件
    pub fn color_attachment(self, texture: &TextureResource) -> Self {
        assert!(
            matches!(self.pass.kind, PassKind::Graphics(_)),
            "color_attachment on non-graphics pass {}",
            self.pass.name
        );
        self.pass.color_attachments.push((texture.id(), texture.vk_image(), texture.vk_view()));
        self
    }

    /// pass 执行前把 buffer 清零
    ///
    /// # Panics
    /// vkCmdFillBuffer 要求填充长度是 4 的倍数
    pub fn zero(self, buffer: &BufferResource) -> Self {
        assert!(
            buffer.size() % 4 == 0,
            "zero on a buffer of size {} (must be a multiple of 4)",
            buffer.size()
        );
        self.pass.pre_ops.push(TransferOp::Zero {
            buffer: buffer.vk_buffer(),
            id: buffer.id(),
            size: buffer.size(),
        });
        self
    }

    /// pass 执行后把 src 复制到 dst（取两者 size 的较小值）
    pub fn copy(self, src: &BufferResource, dst: &BufferResource) -> Self {
        self.pass.post_ops.push(TransferOp::Copy {
            src: src.vk_buffer(),
            src_id: src.id(),
            dst: dst.vk_buffer(),
            dst_id: dst.id(),
            size: src.size().min(dst.size()),
        });
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    fn test_pass() -> Pass {
        Pass::new("test", PassKind::Compute(ComputePassSettings::new("a.comp", [1, 1, 1])))
    }

    #[test]
    fn test_builder_accumulates_in_order() {
        let mut pass = test_pass();
        let a = BufferResource::new(vk::Buffer::from_raw(1), 0x100, 64);
        let b = BufferResource::new(vk::Buffer::from_raw(2), 0x200, 128);

        PassBuilder::new(&mut pass)
            .bind(&a)
            .bind_with(&b, AccessState::STORAGE_WRITE_COMPUTE)
            .zero(&b)
            .copy(&b, &a)
            .push_constants(&42u32);

        assert_eq!(pass.bindings.len(), 2);
        assert!(matches!(
            pass.bindings[0].kind,
            BoundKind::Buffer { id: ResourceId(0x100), .. }
        ));
        assert_eq!(pass.bindings[1].state, Some(AccessState::STORAGE_WRITE_COMPUTE));
        assert_eq!(pass.pre_ops.len(), 1);
        assert_eq!(pass.post_ops.len(), 1);
        assert_eq!(pass.push_constants, 42u32.to_ne_bytes().to_vec());

        // copy 的长度取两端较小值
        match pass.post_ops[0] {
            TransferOp::Copy { size, .. } => assert_eq!(size, 64),
            _ => panic!("expected copy"),
        }
    }

    #[test]
    #[should_panic(expected = "zero-sized buffer")]
    fn test_bind_zero_sized_buffer_panics() {
        let mut pass = test_pass();
        let empty = BufferResource::new(vk::Buffer::from_raw(1), 0x100, 0);
        PassBuilder::new(&mut pass).bind(&empty);
    }

    #[test]
    #[should_panic(expected = "multiple of 4")]
    fn test_zero_unaligned_buffer_panics() {
        let mut pass = test_pass();
        let odd = BufferResource::new(vk::Buffer::from_raw(1), 0x100, 6);
        PassBuilder::new(&mut pass).zero(&odd);
    }
}
