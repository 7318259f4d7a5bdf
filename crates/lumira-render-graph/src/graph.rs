//! 帧级 render graph
//!
//! 每帧流程：add_* 声明 pass（IDLE -> ACCUMULATING），run 解析依赖、
//! 插入 barrier 并录制（-> RECORDED），submit 提交（-> SUBMITTED），
//! reset 清空 pass 回到 IDLE。pipeline 缓存跨帧存活，reset 不会清空。

use std::ffi::c_void;

use anyhow::{bail, Context};
use ash::vk;
use glam::UVec3;

use lumira_gfx::commands::command_buffer::{GfxCommandBuffer, RecordState};
use lumira_gfx::commands::barrier::{GfxBufferBarrier, GfxImageBarrier};

use crate::access::AccessState;
use crate::pass::{
    BoundKind, ComputePassSettings, GraphicsPassSettings, Pass, PassBuilder, PassKind, RtPassSettings, TransferOp,
};
use crate::pipeline::{DescriptorData, Pipeline, PipelineCache, PipelineKey, ReloadGate};
use crate::reflection::TLAS_SET;
use crate::resource::ResourceRegistry;
use crate::shader::ShaderCompiler;
use crate::sync::{AccessTarget, BarrierPlanner, ResourceAccess, SyncPlan, SyncStep};

/// graph 的运行配置
#[derive(Clone, Debug)]
pub struct RenderGraphSettings {
    /// 从 shader 反射推断绑定的访问状态；关闭后未显式声明的绑定
    /// 按保守的 storage 读写处理
    pub shader_inference: bool,
    /// SPIR-V 编译产物的缓存目录
    pub shader_cache_dir: String,
    /// glslc 的 include 目录
    pub shader_include_dir: Option<String>,
}

impl Default for RenderGraphSettings {
    fn default() -> Self {
        Self {
            shader_inference: true,
            shader_cache_dir: ".shader-cache".to_string(),
            shader_include_dir: None,
        }
    }
}

/// 一帧之内 graph 的状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    Idle,
    Accumulating,
    Recorded,
    Submitted,
}

/// pass 主体之外的执行点
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Pre,
    Main,
    Post,
}

/// 录制阶段需要的预处理结果
struct PreparedPass {
    key: PipelineKey,
    /// (阶段, 全局 step 下标)
    steps: Vec<(Phase, usize)>,
    /// push descriptor template 的数据块
    blob: Vec<DescriptorData>,
    tlas: Option<vk::AccelerationStructureKHR>,
}

/// 每帧重建的 pass graph
///
/// graph 实例由调用方持有，同一线程内可以同时存在多个互不相干的 graph
pub struct RenderGraph {
    settings: RenderGraphSettings,
    compiler: ShaderCompiler,
    passes: Vec<Pass>,
    pipeline_cache: PipelineCache,
    registry: ResourceRegistry,
    gate: ReloadGate,
    frame_state: FrameState,
    reload_requested: bool,
}

// 创建与销毁
impl RenderGraph {
    pub fn new(settings: RenderGraphSettings) -> Self {
        let mut compiler = ShaderCompiler::new(&settings.shader_cache_dir);
        if let Some(include_dir) = &settings.shader_include_dir {
            compiler = compiler.include_dir(include_dir);
        }
        Self {
            settings,
            compiler,
            passes: Vec::new(),
            pipeline_cache: PipelineCache::new(),
            registry: ResourceRegistry::new(),
            gate: ReloadGate::new(),
            frame_state: FrameState::Idle,
            reload_requested: false,
        }
    }

    pub fn destroy(self) {
        self.pipeline_cache.destroy();
    }
}

// pass 声明
impl RenderGraph {
    pub fn add_compute(&mut self, name: impl Into<String>, settings: ComputePassSettings) -> PassBuilder<'_> {
        self.push_pass(Pass::new(name, PassKind::Compute(settings)))
    }

    pub fn add_ray_tracing(&mut self, name: impl Into<String>, settings: RtPassSettings) -> PassBuilder<'_> {
        self.push_pass(Pass::new(name, PassKind::RayTracing(settings)))
    }

    pub fn add_graphics(&mut self, name: impl Into<String>, settings: GraphicsPassSettings) -> PassBuilder<'_> {
        self.push_pass(Pass::new(name, PassKind::Graphics(settings)))
    }

    /// 最近声明的 pass 的构建器，用于事后补挂 zero / copy
    ///
    /// # Panics
    /// 本帧还没有声明任何 pass
    pub fn current_pass(&mut self) -> PassBuilder<'_> {
        assert!(
            self.frame_state == FrameState::Accumulating,
            "current_pass called with no pass declared this frame"
        );
        PassBuilder::new(self.passes.last_mut().unwrap())
    }

    fn push_pass(&mut self, pass: Pass) -> PassBuilder<'_> {
        assert!(
            matches!(self.frame_state, FrameState::Idle | FrameState::Accumulating),
            "cannot add pass {} in frame state {:?}",
            pass.name,
            self.frame_state
        );
        self.frame_state = FrameState::Accumulating;
        self.passes.push(pass);
        PassBuilder::new(self.passes.last_mut().unwrap())
    }
}

// getters
impl RenderGraph {
    #[inline]
    pub fn frame_state(&self) -> FrameState {
        self.frame_state
    }

    #[inline]
    pub fn registry(&self) -> &ResourceRegistry {
        &self.registry
    }

    #[inline]
    pub fn registry_mut(&mut self) -> &mut ResourceRegistry {
        &mut self.registry
    }

    #[inline]
    pub fn pass_count(&self) -> usize {
        self.passes.len()
    }
}

// 每帧执行
impl RenderGraph {
    /// 请求 shader 热重载
    ///
    /// 只是设置一个标记，重复调用会合并；真正的重建发生在 reset 之后的
    /// 下一次 run，且只重建源文件确实变化了的 pipeline
    pub fn request_shader_reload(&mut self) {
        self.reload_requested = true;
    }

    /// 解析依赖、插入 barrier，把所有 pass 录制到 cmd 中
    ///
    /// 任何 pass 的 pipeline 创建失败都会丢弃本帧的全部 pass 并返回错误，
    /// 已缓存的 pipeline 不受影响
    ///
    /// # Panics
    /// cmd 未处于录制状态，或 graph 不在声明阶段
    pub fn run(&mut self, cmd: &mut GfxCommandBuffer) -> anyhow::Result<()> {
        let _span = tracy_client::span!("RenderGraph::run");
        assert!(
            matches!(self.frame_state, FrameState::Idle | FrameState::Accumulating),
            "RenderGraph::run called in frame state {:?}",
            self.frame_state
        );
        assert!(cmd.record_state() == RecordState::Recording, "RenderGraph::run needs a recording command buffer");

        let result = self.prepare_and_record(cmd);
        match result {
            Ok(()) => {
                self.frame_state = FrameState::Recorded;
                Ok(())
            }
            Err(err) => {
                // 本帧作废，pipeline 缓存保留
                self.passes.clear();
                self.frame_state = FrameState::Idle;
                Err(err)
            }
        }
    }

    /// 提交录制好的 command buffer
    ///
    /// # Panics
    /// run 还没有成功执行
    pub fn submit(&mut self, cmd: &mut GfxCommandBuffer, wait_fences: bool, queue_wait_idle: bool) {
        assert!(
            self.frame_state == FrameState::Recorded,
            "RenderGraph::submit called in frame state {:?}",
            self.frame_state
        );
        cmd.submit(wait_fences, queue_wait_idle);
        self.frame_state = FrameState::Submitted;
    }

    /// run + submit 的便捷组合，提交后阻塞等待执行完成
    pub fn run_and_submit(&mut self, cmd: &mut GfxCommandBuffer) -> anyhow::Result<()> {
        self.run(cmd)?;
        self.submit(cmd, true, true);
        Ok(())
    }

    /// 清空本帧的 pass 声明，回到 IDLE
    ///
    /// pipeline 缓存永远保留；挂起的重载请求在这里转交给缓存
    pub fn reset(&mut self) {
        self.passes.clear();
        self.frame_state = FrameState::Idle;
        if self.reload_requested {
            self.pipeline_cache.mark_all_stale();
            self.reload_requested = false;
        }
    }
}

// 内部实现
impl RenderGraph {
    fn prepare_and_record(&mut self, cmd: &mut GfxCommandBuffer) -> anyhow::Result<()> {
        let Self {
            settings,
            compiler,
            passes,
            pipeline_cache,
            registry,
            gate,
            ..
        } = self;

        // 阶段一：pipeline 创建 / 重建，期间阻止并发录制
        gate.reload(|| -> anyhow::Result<()> {
            for pass in passes.iter() {
                let key = PipelineKey::from_pass(&pass.name, &pass.kind);
                pipeline_cache
                    .get_or_create(compiler, &key, &pass.kind)
                    .with_context(|| format!("pipeline for pass {} unavailable", pass.name))?;
            }
            Ok(())
        })?;
        pipeline_cache.clear_stale_mark();

        // 阶段二：展开执行点并计算 barrier
        let mut sync_steps: Vec<SyncStep> = Vec::new();
        let mut prepared: Vec<PreparedPass> = Vec::new();
        for (pass_index, pass) in passes.iter().enumerate() {
            let key = PipelineKey::from_pass(&pass.name, &pass.kind);
            let pipeline = pipeline_cache.get_mut(&key).unwrap();
            let item = Self::prepare_pass(settings, registry, pass_index, pass, pipeline, key, &mut sync_steps)?;
            prepared.push(item);
        }
        let plan = BarrierPlanner::plan(&sync_steps);

        // 阶段三：录制
        gate.begin_recording();
        for (pass, item) in passes.iter().zip(&prepared) {
            let pipeline = pipeline_cache.get_mut(&item.key).unwrap();
            Self::record_pass(cmd, pass, item, pipeline, &plan);
        }
        gate.end_recording();
        Ok(())
    }

    /// 把一个 pass 展开成执行点，同时生成 descriptor 数据块
    fn prepare_pass(
        settings: &RenderGraphSettings,
        registry: &ResourceRegistry,
        pass_index: usize,
        pass: &Pass,
        pipeline: &Pipeline,
        key: PipelineKey,
        sync_steps: &mut Vec<SyncStep>,
    ) -> anyhow::Result<PreparedPass> {
        let shader_stage = pass.kind.shader_stage();
        let layout_info = pipeline.layout_info();
        let mut steps = Vec::new();

        // pre：清零
        if !pass.pre_ops.is_empty() {
            let accesses = pass
                .pre_ops
                .iter()
                .map(|op| match *op {
                    TransferOp::Zero { buffer, id, size } => ResourceAccess {
                        id,
                        target: AccessTarget::Buffer { buffer, offset: 0, size },
                        state: AccessState::TRANSFER_WRITE,
                    },
                    TransferOp::Copy { .. } => unreachable!("pre_ops only hold zero ops"),
                })
                .collect();
            steps.push((Phase::Pre, sync_steps.len()));
            sync_steps.push(SyncStep { pass_index, accesses });
        }

        // main：descriptor 绑定 + 间接访问 + 颜色附件
        let mut accesses = Vec::new();
        let mut blob = Vec::new();
        let mut tlas = None;

        let set0_bindings: Vec<_> = pass.bindings.iter().filter(|b| !matches!(b.kind, BoundKind::Tlas { .. })).collect();
        if set0_bindings.len() != layout_info.bindings.len() {
            bail!(
                "pass {} binds {} resources but shader declares {} bindings",
                pass.name,
                set0_bindings.len(),
                layout_info.bindings.len()
            );
        }

        for (bound, info) in set0_bindings.iter().zip(&layout_info.bindings) {
            // 显式声明优先，其次反射推断，最后保守处理
            let state = bound.state.unwrap_or_else(|| {
                if settings.shader_inference {
                    info.inferred_access(shader_stage)
                } else {
                    AccessState::new(
                        shader_stage,
                        vk::AccessFlags2::SHADER_STORAGE_READ | vk::AccessFlags2::SHADER_STORAGE_WRITE,
                    )
                }
            });

            match &bound.kind {
                BoundKind::Buffer { id, buffer, offset, range } => {
                    if info.count != 1 {
                        bail!("binding {} of pass {} expects an array of {}", info.binding, pass.name, info.count);
                    }
                    accesses.push(ResourceAccess {
                        id: *id,
                        target: AccessTarget::Buffer { buffer: *buffer, offset: *offset, size: *range },
                        state,
                    });
                    blob.push(DescriptorData {
                        buffer: vk::DescriptorBufferInfo { buffer: *buffer, offset: *offset, range: *range },
                    });
                }
                BoundKind::Texture { id, image, view, layout, sampler } => {
                    if info.count != 1 {
                        bail!("binding {} of pass {} expects an array of {}", info.binding, pass.name, info.count);
                    }
                    accesses.push(ResourceAccess {
                        id: *id,
                        target: AccessTarget::Image {
                            image: *image,
                            aspect: vk::ImageAspectFlags::COLOR,
                            layout: *layout,
                        },
                        state,
                    });
                    blob.push(DescriptorData {
                        image: vk::DescriptorImageInfo {
                            sampler: *sampler,
                            image_view: *view,
                            image_layout: *layout,
                        },
                    });
                }
                BoundKind::TextureArray { entries, layout, sampler } => {
                    if entries.len() != info.count as usize {
                        bail!(
                            "binding {} of pass {} expects {} array elements, got {}",
                            info.binding,
                            pass.name,
                            info.count,
                            entries.len()
                        );
                    }
                    for (id, image, view) in entries {
                        accesses.push(ResourceAccess {
                            id: *id,
                            target: AccessTarget::Image {
                                image: *image,
                                aspect: vk::ImageAspectFlags::COLOR,
                                layout: *layout,
                            },
                            state,
                        });
                        blob.push(DescriptorData {
                            image: vk::DescriptorImageInfo {
                                sampler: *sampler,
                                image_view: *view,
                                image_layout: *layout,
                            },
                        });
                    }
                }
                BoundKind::Tlas { .. } => unreachable!("tlas bindings are filtered out"),
            }
        }

        for bound in &pass.bindings {
            if let BoundKind::Tlas { id, handle } = bound.kind {
                if !layout_info.has_tlas {
                    bail!("pass {} binds a TLAS but its shaders declare none", pass.name);
                }
                accesses.push(ResourceAccess {
                    id,
                    target: AccessTarget::Tlas,
                    state: AccessState::ACCELERATION_STRUCTURE_READ,
                });
                tlas = Some(handle);
            }
        }
        if layout_info.has_tlas && tlas.is_none() {
            bail!("shaders of pass {} declare a TLAS but none was bound", pass.name);
        }

        for indirect in &pass.indirect_accesses {
            let buffer = registry
                .resolve(indirect.address)
                .with_context(|| {
                    format!("pass {} references unregistered device address {:#x}", pass.name, indirect.address)
                })?;
            accesses.push(ResourceAccess {
                id: buffer.id(),
                target: AccessTarget::Buffer { buffer: buffer.vk_buffer(), offset: 0, size: buffer.size() },
                state: indirect.state,
            });
        }

        for (id, image, _view) in &pass.color_attachments {
            accesses.push(ResourceAccess {
                id: *id,
                target: AccessTarget::Image {
                    image: *image,
                    aspect: vk::ImageAspectFlags::COLOR,
                    layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
                },
                state: AccessState::COLOR_ATTACHMENT_WRITE,
            });
        }

        Self::check_push_constants(&pass.name, pass.push_constants.len(), layout_info.push_constant_size)?;

        steps.push((Phase::Main, sync_steps.len()));
        sync_steps.push(SyncStep { pass_index, accesses });

        // post：回读复制
        if !pass.post_ops.is_empty() {
            let accesses = pass
                .post_ops
                .iter()
                .flat_map(|op| match *op {
                    TransferOp::Copy { src, src_id, dst, dst_id, size } => [
                        ResourceAccess {
                            id: src_id,
                            target: AccessTarget::Buffer { buffer: src, offset: 0, size },
                            state: AccessState::TRANSFER_READ,
                        },
                        ResourceAccess {
                            id: dst_id,
                            target: AccessTarget::Buffer { buffer: dst, offset: 0, size },
                            state: AccessState::TRANSFER_WRITE,
                        },
                    ],
                    TransferOp::Zero { .. } => unreachable!("post_ops only hold copy ops"),
                })
                .collect();
            steps.push((Phase::Post, sync_steps.len()));
            sync_steps.push(SyncStep { pass_index, accesses });
        }

        Ok(PreparedPass { key, steps, blob, tlas })
    }

    /// push constant 数据必须和 shader 声明的大小严格一致
    ///
    /// shader 声明了 push constant block 而 pass 没有提供数据同样是错误，
    /// 否则 dispatch 会读到未定义的内容
    fn check_push_constants(pass_name: &str, provided: usize, expected: u32) -> anyhow::Result<()> {
        if provided != expected as usize {
            bail!("pass {} pushes {} bytes of constants but shader expects {}", pass_name, provided, expected);
        }
        Ok(())
    }

    fn record_pass(
        cmd: &GfxCommandBuffer,
        pass: &Pass,
        item: &PreparedPass,
        pipeline: &mut Pipeline,
        plan: &SyncPlan,
    ) {
        cmd.begin_label(&pass.name, glam::vec4(0.3, 0.6, 0.9, 1.0));

        for &(phase, step_index) in &item.steps {
            Self::record_barriers(cmd, &plan.steps[step_index]);
            match phase {
                Phase::Pre => {
                    for op in &pass.pre_ops {
                        if let TransferOp::Zero { buffer, size, .. } = *op {
                            cmd.cmd_fill_buffer(buffer, 0, size, 0);
                        }
                    }
                }
                Phase::Main => Self::record_main(cmd, pass, item, pipeline),
                Phase::Post => {
                    for op in &pass.post_ops {
                        if let TransferOp::Copy { src, dst, size, .. } = *op {
                            cmd.cmd_copy_buffer(src, dst, &[vk::BufferCopy { src_offset: 0, dst_offset: 0, size }]);
                        }
                    }
                }
            }
        }

        cmd.end_label();
    }

    fn record_barriers(cmd: &GfxCommandBuffer, barriers: &crate::sync::StepBarriers) {
        if barriers.is_empty() {
            return;
        }
        if !barriers.buffer_barriers.is_empty() {
            let buffer_barriers: Vec<GfxBufferBarrier> = barriers
                .buffer_barriers
                .iter()
                .map(|b| {
                    GfxBufferBarrier::new()
                        .src_mask(b.src.stage, b.src.access)
                        .dst_mask(b.dst.stage, b.dst.access)
                        .buffer(b.buffer, b.offset, b.size)
                })
                .collect();
            cmd.buffer_memory_barrier(vk::DependencyFlags::empty(), &buffer_barriers);
        }
        if !barriers.image_barriers.is_empty() {
            let image_barriers: Vec<GfxImageBarrier> = barriers
                .image_barriers
                .iter()
                .map(|b| {
                    GfxImageBarrier::new()
                        .src_mask(b.src.stage, b.src.access)
                        .dst_mask(b.dst.stage, b.dst.access)
                        .layout_transfer(b.old_layout, b.new_layout)
                        .image(b.image)
                        .image_aspect_flag(b.aspect)
                })
                .collect();
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), &image_barriers);
        }
        if !barriers.memory_barriers.is_empty() {
            let memory_barriers: Vec<vk::MemoryBarrier2> = barriers
                .memory_barriers
                .iter()
                .map(|b| {
                    vk::MemoryBarrier2::default()
                        .src_stage_mask(b.src.stage)
                        .src_access_mask(b.src.access)
                        .dst_stage_mask(b.dst.stage)
                        .dst_access_mask(b.dst.access)
                })
                .collect();
            cmd.memory_barrier(&memory_barriers);
        }
    }

    fn record_main(cmd: &GfxCommandBuffer, pass: &Pass, item: &PreparedPass, pipeline: &mut Pipeline) {
        cmd.cmd_bind_pipeline(pipeline.bind_point(), pipeline.vk_pipeline());

        if !item.blob.is_empty() {
            cmd.push_descriptor_set_with_template(
                pipeline.update_template(),
                pipeline.vk_pipeline_layout(),
                0,
                item.blob.as_ptr() as *const c_void,
            );
        }

        if let Some(tlas) = item.tlas {
            if let Some(set) = pipeline.bind_tlas(tlas) {
                cmd.bind_descriptor_sets(
                    pipeline.bind_point(),
                    pipeline.vk_pipeline_layout(),
                    TLAS_SET,
                    &[set],
                    None,
                );
            }
        }

        if !pass.push_constants.is_empty() {
            cmd.cmd_push_constants(
                pipeline.vk_pipeline_layout(),
                pipeline.layout_info().push_constant_stages,
                0,
                &pass.push_constants,
            );
        }

        match &pass.kind {
            PassKind::Compute(settings) => {
                cmd.cmd_dispatch(UVec3::from_array(settings.dims));
            }
            PassKind::RayTracing(settings) => {
                let sbt = pipeline.sbt().expect("ray tracing pipeline always carries an SBT");
                cmd.trace_rays(
                    sbt.raygen_region(),
                    sbt.miss_region(),
                    sbt.hit_region(),
                    sbt.callable_region(),
                    settings.dims,
                );
            }
            PassKind::Graphics(settings) => {
                let attachments: Vec<vk::RenderingAttachmentInfo> = pass
                    .color_attachments
                    .iter()
                    .map(|(_, _, view)| {
                        vk::RenderingAttachmentInfo::default()
                            .image_view(*view)
                            .image_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                            .load_op(vk::AttachmentLoadOp::CLEAR)
                            .store_op(vk::AttachmentStoreOp::STORE)
                            .clear_value(vk::ClearValue::default())
                    })
                    .collect();
                let rendering_info = vk::RenderingInfo::default()
                    .render_area(vk::Rect2D {
                        offset: vk::Offset2D::default(),
                        extent: settings.extent,
                    })
                    .layer_count(1)
                    .color_attachments(&attachments);

                cmd.cmd_begin_rendering(&rendering_info);
                cmd.cmd_set_viewport(
                    0,
                    &[vk::Viewport {
                        x: 0.0,
                        y: 0.0,
                        width: settings.extent.width as f32,
                        height: settings.extent.height as f32,
                        min_depth: 0.0,
                        max_depth: 1.0,
                    }],
                );
                cmd.cmd_set_scissor(
                    0,
                    &[vk::Rect2D {
                        offset: vk::Offset2D::default(),
                        extent: settings.extent,
                    }],
                );
                cmd.cmd_draw(settings.vertex_count, settings.instance_count, 0, 0);
                cmd.end_rendering();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::BufferResource;
    use ash::vk::Handle;

    fn init_test_log() {
        static INIT: std::sync::Once = std::sync::Once::new();
        INIT.call_once(lumira_crate_tools::init_log::init_log);
    }

    #[test]
    fn test_frame_state_transitions() {
        init_test_log();
        let mut graph = RenderGraph::new(RenderGraphSettings::default());
        assert_eq!(graph.frame_state(), FrameState::Idle);

        graph.add_compute("sum", ComputePassSettings::new("sum.comp", [8, 1, 1]));
        assert_eq!(graph.frame_state(), FrameState::Accumulating);
        assert_eq!(graph.pass_count(), 1);

        graph.add_compute("scale", ComputePassSettings::new("scale.comp", [8, 1, 1]));
        assert_eq!(graph.pass_count(), 2);

        graph.reset();
        assert_eq!(graph.frame_state(), FrameState::Idle);
        assert_eq!(graph.pass_count(), 0);
    }

    #[test]
    fn test_reload_request_is_coalesced() {
        let mut graph = RenderGraph::new(RenderGraphSettings::default());
        graph.request_shader_reload();
        graph.request_shader_reload();
        graph.request_shader_reload();
        assert!(graph.reload_requested);

        graph.reset();
        // 请求在 reset 时转交给 pipeline 缓存并清除
        assert!(!graph.reload_requested);
    }

    #[test]
    fn test_pass_declaration_accumulates_bindings() {
        let mut graph = RenderGraph::new(RenderGraphSettings::default());
        let input = BufferResource::new(vk::Buffer::from_raw(1), 0x1000, 256);
        let output = BufferResource::new(vk::Buffer::from_raw(2), 0x2000, 256);

        graph
            .add_compute("sum", ComputePassSettings::new("sum.comp", [4, 1, 1]))
            .bind(&input)
            .bind_with(&output, AccessState::STORAGE_WRITE_COMPUTE)
            .zero(&output)
            .push_constants(&256u32);

        let pass = &graph.passes[0];
        assert_eq!(pass.bindings.len(), 2);
        assert_eq!(pass.pre_ops.len(), 1);
        assert_eq!(pass.push_constants.len(), 4);
    }

    #[test]
    fn test_push_constant_size_must_match_shader() {
        // 完全一致才放行
        assert!(RenderGraph::check_push_constants("sum", 8, 8).is_ok());
        assert!(RenderGraph::check_push_constants("sum", 0, 0).is_ok());

        // shader 声明了 push constant 而 pass 没有提供，同样拒绝
        assert!(RenderGraph::check_push_constants("sum", 0, 8).is_err());
        assert!(RenderGraph::check_push_constants("sum", 4, 8).is_err());
        assert!(RenderGraph::check_push_constants("sum", 8, 0).is_err());
    }

    #[test]
    #[should_panic(expected = "cannot add pass")]
    fn test_add_pass_after_recorded_panics() {
        let mut graph = RenderGraph::new(RenderGraphSettings::default());
        graph.frame_state = FrameState::Recorded;
        graph.add_compute("late", ComputePassSettings::new("late.comp", [1, 1, 1]));
    }

    #[test]
    fn test_registered_address_resolves_for_indirect_use() {
        let mut graph = RenderGraph::new(RenderGraphSettings::default());
        let storage = BufferResource::new(vk::Buffer::from_raw(3), 0x3000, 1024);

        let mut frame_data_field = vk::DeviceAddress::default();
        graph.registry_mut().register_buffer_address(&mut frame_data_field, &storage);
        assert_eq!(frame_data_field, 0x3000);

        graph
            .add_compute("consume", ComputePassSettings::new("consume.comp", [1, 1, 1]))
            .bind_indirect(frame_data_field, AccessState::STORAGE_READ_COMPUTE);

        let resolved = graph.registry().resolve(frame_data_field).unwrap();
        assert_eq!(resolved.size(), 1024);
    }
}
