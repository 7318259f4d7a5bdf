use ash::vk;
use itertools::Itertools;

use crate::gfx::Gfx;
use crate::{
    commands::{
        barrier::{GfxBufferBarrier, GfxImageBarrier},
        command_pool::GfxCommandPool,
        command_queue::GfxCommandQueue,
        fence::GfxFence,
        submit_info::GfxSubmitInfo,
    },
    foundation::debug_messenger::DebugType,
};

/// command buffer 提交到的队列类型
///
/// 当前设备上只创建了一个全能 queue，所有类型都会路由到它；
/// 类型信息保留下来，便于将来使用独立的 compute/transfer queue
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GfxQueueType {
    Graphics,
    Compute,
    Transfer,
}

/// command buffer 的录制状态
///
/// 状态转换是纯逻辑，误用（重复 begin、空录制 submit）视为编程错误，直接 panic
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RecordState {
    Stopped,
    Recording,
}

impl RecordState {
    /// begin 时的状态转换
    ///
    /// # Panics
    /// 已经处于录制状态时 panic
    #[inline]
    pub fn on_begin(self) -> Self {
        assert!(self == RecordState::Stopped, "CommandBuffer::begin called while already recording");
        RecordState::Recording
    }

    /// submit 时的状态转换
    ///
    /// # Panics
    /// 不处于录制状态时 panic
    #[inline]
    pub fn on_submit(self) -> Self {
        assert!(self == RecordState::Recording, "CommandBuffer::submit called without an active recording");
        RecordState::Stopped
    }
}

/// submit fence 的复用状态
///
/// queue submit 只接受 unsignaled 的 fence。submit(wait_fences=false, ..)
/// 之后 fence 停留在 signaled（或尚未 signal）状态，同一个 command buffer
/// 下次 submit 复用它之前必须先 wait + reset
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SubmitFenceState {
    Ready,
    Pending,
}

impl SubmitFenceState {
    /// 再次把 fence 交给 queue submit 之前是否需要 wait + reset
    #[inline]
    pub fn needs_recycle(self) -> bool {
        self == SubmitFenceState::Pending
    }

    /// submit 之后的状态
    ///
    /// # param
    /// * waited - 本次 submit 是否已经 wait + reset 过 fence
    #[inline]
    pub fn on_submit(self, waited: bool) -> Self {
        if waited {
            SubmitFenceState::Ready
        } else {
            SubmitFenceState::Pending
        }
    }
}

/// 命令缓冲封装
///
/// 封装 Vulkan CommandBuffer，提供类型安全的命令录制接口，
/// 并显式跟踪 RECORDING/STOPPED 两态生命周期。
/// 支持图形、计算、光线追踪、屏障、调试标签等功能。
///
/// # 使用示例
/// ```ignore
/// let mut cmd = GfxCommandBuffer::new(&pool, GfxQueueType::Graphics, false, "frame");
/// cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
/// // 录制命令...
/// cmd.submit(true, false);
/// ```
pub struct GfxCommandBuffer {
    vk_handle: vk::CommandBuffer,
    _command_pool_handle: vk::CommandPool,

    queue_type: GfxQueueType,
    state: RecordState,

    /// 每次 submit 都会 signal 这个 fence，其他子系统可以等待它而无需 drain queue
    fence: GfxFence,
    fence_state: SubmitFenceState,

    #[cfg(debug_assertions)]
    name: String,
}
// new & init
impl GfxCommandBuffer {
    /// # param
    /// * auto_begin - 创建后立即进入录制状态
    pub fn new(command_pool: &GfxCommandPool, queue_type: GfxQueueType, auto_begin: bool, debug_name: &str) -> Self {
        let info = vk::CommandBufferAllocateInfo::default()
            .command_pool(command_pool.handle())
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);

        let command_buffer = unsafe { Gfx::get().gfx_device().allocate_command_buffers(&info).unwrap()[0] };
        let mut cmd_buffer = GfxCommandBuffer {
            vk_handle: command_buffer,
            _command_pool_handle: command_pool.handle(),
            queue_type,
            state: RecordState::Stopped,
            fence: GfxFence::new(false, &format!("{}-submit", debug_name)),
            fence_state: SubmitFenceState::Ready,

            #[cfg(debug_assertions)]
            name: debug_name.to_string(),
        };
        Gfx::get().gfx_device().set_debug_name(&cmd_buffer, debug_name);

        if auto_begin {
            cmd_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        }
        cmd_buffer
    }

    pub fn destroy(self) {
        unsafe {
            Gfx::get().gfx_device().free_command_buffers(self._command_pool_handle, &[self.vk_handle]);
        }
        self.fence.destroy();
    }
}
// 生命周期
impl GfxCommandBuffer {
    /// 开始录制 command，STOPPED -> RECORDING
    ///
    /// # Panics
    /// 重复 begin 视为编程错误
    pub fn begin(&mut self, usage_flag: vk::CommandBufferUsageFlags) {
        self.state = self.state.on_begin();
        unsafe {
            Gfx::get()
                .gfx_device()
                .begin_command_buffer(self.vk_handle, &vk::CommandBufferBeginInfo::default().flags(usage_flag))
                .unwrap();
        }
    }

    /// 结束录制并提交，RECORDING -> STOPPED
    ///
    /// submit 时会 signal 内部的 fence
    ///
    /// # param
    /// * wait_fences - 阻塞等待本次提交的 fence，然后 reset 它
    /// * queue_wait_idle - 提交之后 drain 整个 queue
    ///
    /// # Panics
    /// 未处于录制状态时调用视为编程错误
    pub fn submit(&mut self, wait_fences: bool, queue_wait_idle: bool) {
        self.state = self.state.on_submit();
        unsafe {
            Gfx::get().gfx_device().end_command_buffer(self.vk_handle).unwrap();
        }

        // 上一次 submit(false, ..) 留下的 fence 必须先回收，
        // queue submit 只接受 unsignaled 的 fence
        if self.fence_state.needs_recycle() {
            self.fence.wait();
            self.fence.reset();
        }

        let queue = self.queue();
        let submit_info = GfxSubmitInfo::new(&[&*self]);
        queue.submit(vec![submit_info], Some(&self.fence));

        if wait_fences {
            self.fence.wait();
            self.fence.reset();
        }
        if queue_wait_idle {
            queue.wait_idle();
        }
        self.fence_state = self.fence_state.on_submit(wait_fences);
    }

    fn queue(&self) -> &'static GfxCommandQueue {
        // 单 queue 设备：所有 queue type 共用全能 queue
        match self.queue_type {
            GfxQueueType::Graphics | GfxQueueType::Compute | GfxQueueType::Transfer => Gfx::get().gfx_queue(),
        }
    }
}
// getters
impl GfxCommandBuffer {
    #[inline]
    pub fn vk_handle(&self) -> vk::CommandBuffer {
        self.vk_handle
    }

    #[inline]
    pub fn record_state(&self) -> RecordState {
        self.state
    }

    #[inline]
    pub fn queue_type(&self) -> GfxQueueType {
        self.queue_type
    }

    /// 本 command buffer 每次 submit 都会 signal 的 fence
    ///
    /// submit(false, ..) 之后调用方可以随时等待它；若调用方从未 wait + reset，
    /// 下一次 submit 会先回收它再复用
    #[inline]
    pub fn submit_fence(&self) -> &GfxFence {
        &self.fence
    }
}
// 数据传输类型
impl GfxCommandBuffer {
    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_copy_buffer(&self, src: vk::Buffer, dst: vk::Buffer, regions: &[vk::BufferCopy]) {
        unsafe {
            Gfx::get().gfx_device().cmd_copy_buffer(self.vk_handle, src, dst, regions);
        }
    }

    /// 将 buffer 的一个 range 填充为固定值，用于 zero 清零
    ///
    /// - command type: action
    /// - 支持的 queue：transfer，graphics，compute
    #[inline]
    pub fn cmd_fill_buffer(&self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize, data: u32) {
        unsafe {
            Gfx::get().gfx_device().cmd_fill_buffer(self.vk_handle, buffer, offset, size, data);
        }
    }

    /// - command type: state
    /// - 支持的 queue: graphics, compute
    #[inline]
    pub fn cmd_push_constants(
        &self,
        pipeline_layout: vk::PipelineLayout,
        stage: vk::ShaderStageFlags,
        offset: u32,
        data: &[u8],
    ) {
        unsafe {
            Gfx::get().gfx_device().cmd_push_constants(self.vk_handle, pipeline_layout, stage, offset, data);
        }
    }
}
// 绘制类型的命令
impl GfxCommandBuffer {
    /// - command type: action, state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_begin_rendering(&self, render_info: &vk::RenderingInfo) {
        unsafe {
            Gfx::get().gfx_device().dynamic_rendering.cmd_begin_rendering(self.vk_handle, render_info);
        }
    }

    /// - command type: action, state
    /// - supported queue types: graphics
    #[inline]
    pub fn end_rendering(&self) {
        unsafe {
            Gfx::get().gfx_device().dynamic_rendering.cmd_end_rendering(self.vk_handle);
        }
    }

    /// - command type: action
    /// - supported queue types: graphics
    ///
    /// 不使用 index buffer 的绘制
    #[inline]
    pub fn cmd_draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        unsafe {
            Gfx::get().gfx_device().cmd_draw(
                self.vk_handle,
                vertex_count,
                instance_count,
                first_vertex,
                first_instance,
            );
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_set_viewport(&self, first_viewport: u32, viewports: &[vk::Viewport]) {
        unsafe {
            Gfx::get().gfx_device().cmd_set_viewport(self.vk_handle, first_viewport, viewports);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics
    #[inline]
    pub fn cmd_set_scissor(&self, first_scissor: u32, scissors: &[vk::Rect2D]) {
        unsafe {
            Gfx::get().gfx_device().cmd_set_scissor(self.vk_handle, first_scissor, scissors);
        }
    }
}
// descriptor 以及 pipeline 绑定
impl GfxCommandBuffer {
    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn cmd_bind_pipeline(&self, bind_point: vk::PipelineBindPoint, pipeline: vk::Pipeline) {
        unsafe {
            Gfx::get().gfx_device().cmd_bind_pipeline(self.vk_handle, bind_point, pipeline);
        }
    }

    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn bind_descriptor_sets(
        &self,
        bind_point: vk::PipelineBindPoint,
        pipeline_layout: vk::PipelineLayout,
        first_set: u32,
        descriptor_sets: &[vk::DescriptorSet],
        dynamic_offsets: Option<&[u32]>,
    ) {
        unsafe {
            Gfx::get().gfx_device().cmd_bind_descriptor_sets(
                self.vk_handle,
                bind_point,
                pipeline_layout,
                first_set,
                descriptor_sets,
                dynamic_offsets.unwrap_or(&[]),
            );
        }
    }

    /// 使用 descriptor update template 一次推送整个 set 的绑定数据
    ///
    /// # Safety 相关
    /// raw_data 的布局必须和 template 的 entries 一致
    ///
    /// - command type: state
    /// - supported queue types: graphics, compute
    #[inline]
    pub fn push_descriptor_set_with_template(
        &self,
        template: vk::DescriptorUpdateTemplate,
        pipeline_layout: vk::PipelineLayout,
        set: u32,
        raw_data: *const std::ffi::c_void,
    ) {
        unsafe {
            Gfx::get().gfx_device().push_descriptor.cmd_push_descriptor_set_with_template(
                self.vk_handle,
                template,
                pipeline_layout,
                set,
                raw_data,
            );
        }
    }
}
// 光追相关
impl GfxCommandBuffer {
    /// 光追的入口
    /// - command type: action
    /// - supported queue types: compute
    #[inline]
    pub fn trace_rays(
        &self,
        raygen_table: &vk::StridedDeviceAddressRegionKHR,
        miss_table: &vk::StridedDeviceAddressRegionKHR,
        hit_table: &vk::StridedDeviceAddressRegionKHR,
        callable_table: &vk::StridedDeviceAddressRegionKHR,
        thread_size: [u32; 3],
    ) {
        unsafe {
            Gfx::get().gfx_device().ray_tracing_pipeline.cmd_trace_rays(
                self.vk_handle,
                raygen_table,
                miss_table,
                hit_table,
                callable_table,
                thread_size[0],
                thread_size[1],
                thread_size[2],
            );
        }
    }
}
// 计算着色器相关命令
impl GfxCommandBuffer {
    #[inline]
    pub fn cmd_dispatch(&self, group_cnt: glam::UVec3) {
        unsafe {
            Gfx::get().gfx_device().cmd_dispatch(self.vk_handle, group_cnt.x, group_cnt.y, group_cnt.z);
        }
    }
}
// 同步相关命令
impl GfxCommandBuffer {
    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn memory_barrier(&self, barriers: &[vk::MemoryBarrier2]) {
        let dependency_info = vk::DependencyInfo::default().memory_barriers(barriers);
        unsafe {
            Gfx::get().gfx_device().cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }

    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn image_memory_barrier(&self, dependency_flags: vk::DependencyFlags, barriers: &[GfxImageBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info =
            vk::DependencyInfo::default().image_memory_barriers(&barriers).dependency_flags(dependency_flags);
        unsafe {
            Gfx::get().gfx_device().cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }

    /// - command type: synchronize
    /// - supported queue types: graphics, compute, transfer
    #[inline]
    pub fn buffer_memory_barrier(&self, dependency_flags: vk::DependencyFlags, barriers: &[GfxBufferBarrier]) {
        let barriers = barriers.iter().map(|b| *b.inner()).collect_vec();
        let dependency_info =
            vk::DependencyInfo::default().buffer_memory_barriers(&barriers).dependency_flags(dependency_flags);
        unsafe {
            Gfx::get().gfx_device().cmd_pipeline_barrier2(self.vk_handle, &dependency_info);
        }
    }
}
// debug 相关命令
impl GfxCommandBuffer {
    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        let name = std::ffi::CString::new(label_name).unwrap();
        unsafe {
            Gfx::get().gfx_device().debug_utils.cmd_begin_debug_utils_label(
                self.vk_handle,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }

    /// - command type: state, action
    /// - supported queue type: graphics, compute
    #[inline]
    pub fn end_label(&self) {
        unsafe {
            Gfx::get().gfx_device().debug_utils.cmd_end_debug_utils_label(self.vk_handle);
        }
    }
}
impl DebugType for GfxCommandBuffer {
    fn debug_type_name() -> &'static str {
        "GfxCommandBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_state_round_trip() {
        let state = RecordState::Stopped;
        let state = state.on_begin();
        assert_eq!(state, RecordState::Recording);
        let state = state.on_submit();
        assert_eq!(state, RecordState::Stopped);
    }

    #[test]
    #[should_panic(expected = "already recording")]
    fn test_double_begin_panics() {
        let state = RecordState::Stopped;
        let state = state.on_begin();
        let _ = state.on_begin();
    }

    #[test]
    #[should_panic(expected = "without an active recording")]
    fn test_submit_without_begin_panics() {
        let state = RecordState::Stopped;
        let _ = state.on_submit();
    }

    #[test]
    fn test_unwaited_fence_recycled_before_next_submit() {
        let fence_state = SubmitFenceState::Ready;
        assert!(!fence_state.needs_recycle());

        // submit(false, ..) 没有 wait + reset，fence 留在 signaled 状态
        let fence_state = fence_state.on_submit(false);
        assert!(fence_state.needs_recycle());

        // submit(true, ..) 之后 fence 已经 reset，可以直接复用
        let fence_state = fence_state.on_submit(true);
        assert!(!fence_state.needs_recycle());
    }
}
