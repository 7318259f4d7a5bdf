//! Pipeline 缓存与热重载
//!
//! pipeline 由 shader 路径 + specialization 常量唯一确定，缓存跨帧存活。
//! descriptor 布局完全来自反射；set 0 通过 push descriptor template 更新，
//! RT pipeline 的 TLAS 放在 set 1 的持久 descriptor set 中。

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Condvar, Mutex};
use std::time::SystemTime;

use anyhow::{bail, Context};
use ash::vk;

use lumira_gfx::gfx::Gfx;
use lumira_gfx::pipelines::shader::{GfxShaderGroupInfo, GfxShaderModule};

use crate::pass::PassKind;
use crate::reflection::{merge_stages, BindingInfo, PipelineLayoutInfo, StageReflection, TLAS_SET};
use crate::sbt::SbtRegions;
use crate::shader::ShaderCompiler;

/// pipeline 的缓存键
///
/// 同一组 shader + 同一组 specialization 常量复用同一个 pipeline
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PipelineKey {
    pub name: String,
    pub shader_paths: Vec<String>,
    pub specialization: Vec<u32>,
    /// (binding, count) 覆盖，用于反射推不出长度的 runtime 数组
    pub descriptor_counts: Vec<(u32, u32)>,
}

impl PipelineKey {
    pub fn from_pass(name: &str, kind: &PassKind) -> Self {
        let (shader_paths, specialization, descriptor_counts) = match kind {
            PassKind::Compute(settings) => (
                vec![settings.shader.clone()],
                settings.specialization.clone(),
                settings.descriptor_counts.clone(),
            ),
            PassKind::RayTracing(settings) => {
                (settings.shaders.clone(), settings.specialization.clone(), settings.descriptor_counts.clone())
            }
            PassKind::Graphics(settings) => (
                vec![settings.vertex_shader.clone(), settings.fragment_shader.clone()],
                settings.specialization.clone(),
                Vec::new(),
            ),
        };
        Self {
            name: name.to_string(),
            shader_paths,
            specialization,
            descriptor_counts,
        }
    }

    /// 把显式 descriptor 数量套用到反射结果上
    fn apply_descriptor_counts(&self, layout_info: &mut PipelineLayoutInfo) {
        for &(binding, count) in &self.descriptor_counts {
            if let Some(info) = layout_info.bindings.iter_mut().find(|b| b.binding == binding) {
                info.count = count;
            }
        }
    }
}

/// descriptor update template 的数据槽
///
/// buffer 和 image 的 descriptor info 共用一个定长槽位，
/// template entry 按槽位下标乘以固定 stride 寻址
#[repr(C)]
#[derive(Clone, Copy)]
pub union DescriptorData {
    pub buffer: vk::DescriptorBufferInfo,
    pub image: vk::DescriptorImageInfo,
}

impl Default for DescriptorData {
    fn default() -> Self {
        Self {
            buffer: vk::DescriptorBufferInfo::default(),
        }
    }
}

/// 根据 set 0 的 binding 布局生成 template entry
///
/// 返回 entries 和所需的槽位数；TLAS 不走 template，这里不会出现
pub fn template_entries(bindings: &[BindingInfo]) -> (Vec<vk::DescriptorUpdateTemplateEntry>, usize) {
    let stride = size_of::<DescriptorData>();
    let mut entries = Vec::with_capacity(bindings.len());
    let mut slot = 0usize;

    for binding in bindings {
        debug_assert_ne!(binding.descriptor_type, vk::DescriptorType::ACCELERATION_STRUCTURE_KHR);
        entries.push(vk::DescriptorUpdateTemplateEntry {
            dst_binding: binding.binding,
            dst_array_element: 0,
            descriptor_count: binding.count,
            descriptor_type: binding.descriptor_type,
            offset: slot * stride,
            stride,
        });
        slot += binding.count as usize;
    }
    (entries, slot)
}

/// 热重载与录制之间的互斥门
///
/// 录制线程和重载线程不能同时触碰 pipeline：
/// 重载要等所有录制结束，录制要等重载结束
#[derive(Default)]
pub struct ReloadGate {
    state: Mutex<GateState>,
    cv: Condvar,
}

#[derive(Default)]
struct GateState {
    recording: u32,
    reloading: bool,
}

impl ReloadGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 进入录制，若有重载在进行则阻塞等待
    pub fn begin_recording(&self) {
        let mut state = self.state.lock().unwrap();
        while state.reloading {
            state = self.cv.wait(state).unwrap();
        }
        state.recording += 1;
    }

    pub fn end_recording(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(state.recording > 0, "end_recording without matching begin_recording");
        state.recording -= 1;
        if state.recording == 0 {
            self.cv.notify_all();
        }
    }

    /// 在所有录制结束后执行 f，期间阻止新的录制开始
    pub fn reload<R>(&self, f: impl FnOnce() -> R) -> R {
        let mut state = self.state.lock().unwrap();
        while state.reloading || state.recording > 0 {
            state = self.cv.wait(state).unwrap();
        }
        state.reloading = true;
        drop(state);

        let result = f();

        let mut state = self.state.lock().unwrap();
        state.reloading = false;
        self.cv.notify_all();
        result
    }
}

/// RT pipeline 的 TLAS 绑定：一个持久的 descriptor set
struct TlasBinding {
    set_layout: vk::DescriptorSetLayout,
    pool: vk::DescriptorPool,
    set: vk::DescriptorSet,
    /// 上一次写入的 TLAS，相同则跳过 update
    written: Option<vk::AccelerationStructureKHR>,
}

impl TlasBinding {
    fn new(stages: vk::ShaderStageFlags, debug_name: &str) -> anyhow::Result<Self> {
        let device = Gfx::get().gfx_device();

        let bindings = [vk::DescriptorSetLayoutBinding::default()
            .binding(0)
            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .descriptor_count(1)
            .stage_flags(stages)];
        let set_layout = unsafe {
            device
                .create_descriptor_set_layout(&vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings), None)
                .context("create TLAS set layout failed")?
        };

        let pool_sizes = [vk::DescriptorPoolSize {
            ty: vk::DescriptorType::ACCELERATION_STRUCTURE_KHR,
            descriptor_count: 1,
        }];
        let pool = unsafe {
            device
                .create_descriptor_pool(
                    &vk::DescriptorPoolCreateInfo::default().max_sets(1).pool_sizes(&pool_sizes),
                    None,
                )
                .context("create TLAS descriptor pool failed")?
        };

        let set_layouts = [set_layout];
        let set = unsafe {
            device
                .allocate_descriptor_sets(
                    &vk::DescriptorSetAllocateInfo::default().descriptor_pool(pool).set_layouts(&set_layouts),
                )
                .context("allocate TLAS descriptor set failed")?[0]
        };
        device.set_object_debug_name(set, format!("{debug_name}-tlas-set"));

        Ok(Self {
            set_layout,
            pool,
            set,
            written: None,
        })
    }

    /// 把 TLAS 写入持久 set，同一个 TLAS 只写一次
    fn update(&mut self, tlas: vk::AccelerationStructureKHR) {
        if self.written == Some(tlas) {
            return;
        }
        let device = Gfx::get().gfx_device();
        let handles = [tlas];
        let mut tlas_write = vk::WriteDescriptorSetAccelerationStructureKHR::default().acceleration_structures(&handles);
        let mut write = vk::WriteDescriptorSet::default()
            .dst_set(self.set)
            .dst_binding(0)
            .descriptor_type(vk::DescriptorType::ACCELERATION_STRUCTURE_KHR)
            .push_next(&mut tlas_write);
        write.descriptor_count = 1;
        unsafe {
            device.update_descriptor_sets(&[write], &[]);
        }
        self.written = Some(tlas);
    }

    fn destroy(self) {
        let device = Gfx::get().gfx_device();
        unsafe {
            device.destroy_descriptor_pool(self.pool, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
    }
}

/// 反射驱动的 pipeline
///
/// 持有 vk pipeline、layout、push descriptor 的 update template，
/// RT pipeline 另有 SBT 和 TLAS set
pub struct Pipeline {
    name: String,
    bind_point: vk::PipelineBindPoint,
    pipeline: vk::Pipeline,
    pipeline_layout: vk::PipelineLayout,
    set_layout: vk::DescriptorSetLayout,
    update_template: vk::DescriptorUpdateTemplate,
    layout_info: PipelineLayoutInfo,
    tlas_binding: Option<TlasBinding>,
    sbt: Option<SbtRegions>,
    /// 编译时各源文件的 mtime，用于过期检查
    sources: Vec<(PathBuf, SystemTime)>,
}

// 创建
impl Pipeline {
    pub fn create(compiler: &ShaderCompiler, key: &PipelineKey, kind: &PassKind) -> anyhow::Result<Self> {
        let _span = tracy_client::span!("Pipeline::create");
        match kind {
            PassKind::Compute(_) => Self::create_compute(compiler, key),
            PassKind::RayTracing(settings) => Self::create_rt(compiler, key, settings.max_recursion_depth),
            PassKind::Graphics(settings) => Self::create_graphics(compiler, key, &settings.color_formats),
        }
    }

    fn create_compute(compiler: &ShaderCompiler, key: &PipelineKey) -> anyhow::Result<Self> {
        let src = PathBuf::from(&key.shader_paths[0]);
        let compiled = compiler.compile(&src)?;
        let reflection = StageReflection::reflect(&compiled.spv, vk::ShaderStageFlags::COMPUTE)?;
        let mut layout_info = merge_stages(std::slice::from_ref(&reflection))?;
        key.apply_descriptor_counts(&mut layout_info);
        if layout_info.has_tlas {
            bail!("compute pipeline {} declares a TLAS, only ray tracing pipelines may", key.name);
        }

        let layouts = PipelineLayouts::new(&layout_info, &key.name)?;
        let shader_module = GfxShaderModule::from_spirv(&compiled.spv, &key.shader_paths[0]);

        let spec_entries = specialization_entries(&key.specialization);
        let spec_data: &[u8] = bytemuck::cast_slice(&key.specialization);
        let spec_info = vk::SpecializationInfo::default().map_entries(&spec_entries).data(spec_data);

        let mut stage_info = vk::PipelineShaderStageCreateInfo::default()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(shader_module.handle())
            .name(c"main");
        if !key.specialization.is_empty() {
            stage_info = stage_info.specialization_info(&spec_info);
        }

        let create_info =
            vk::ComputePipelineCreateInfo::default().stage(stage_info).layout(layouts.pipeline_layout);
        let pipeline = unsafe {
            Gfx::get()
                .gfx_device()
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, err)| err)
                .with_context(|| format!("create compute pipeline {} failed", key.name))?[0]
        };
        shader_module.destroy();
        Gfx::get().gfx_device().set_object_debug_name(pipeline, &key.name);

        let update_template = layouts.create_template(&layout_info, vk::PipelineBindPoint::COMPUTE)?;

        Ok(Self {
            name: key.name.clone(),
            bind_point: vk::PipelineBindPoint::COMPUTE,
            pipeline,
            pipeline_layout: layouts.pipeline_layout,
            set_layout: layouts.set_layout,
            update_template,
            layout_info,
            tlas_binding: layouts.tlas_binding,
            sbt: None,
            sources: vec![(src, compiled.source_mtime)],
        })
    }

    fn create_rt(compiler: &ShaderCompiler, key: &PipelineKey, max_recursion_depth: u32) -> anyhow::Result<Self> {
        // 约定 shader 顺序：raygen 在前，miss 其次，hit 最后
        let mut reflections = Vec::new();
        let mut compiled = Vec::new();
        let mut sources = Vec::new();
        for path in &key.shader_paths {
            let src = PathBuf::from(path);
            let shader = compiler.compile(&src)?;
            reflections.push(StageReflection::reflect(&shader.spv, shader.stage)?);
            sources.push((src, shader.source_mtime));
            compiled.push(shader);
        }
        if compiled.first().map(|s| s.stage) != Some(vk::ShaderStageFlags::RAYGEN_KHR) {
            bail!("ray tracing pipeline {} must list the raygen shader first", key.name);
        }
        let mut layout_info = merge_stages(&reflections)?;
        key.apply_descriptor_counts(&mut layout_info);

        let layouts = PipelineLayouts::new(&layout_info, &key.name)?;

        let spec_entries = specialization_entries(&key.specialization);
        let spec_data: &[u8] = bytemuck::cast_slice(&key.specialization);
        let spec_info = vk::SpecializationInfo::default().map_entries(&spec_entries).data(spec_data);

        let modules: Vec<GfxShaderModule> = compiled
            .iter()
            .zip(&key.shader_paths)
            .map(|(shader, path)| GfxShaderModule::from_spirv(&shader.spv, path))
            .collect();
        let stages: Vec<vk::PipelineShaderStageCreateInfo> = compiled
            .iter()
            .zip(&modules)
            .map(|(shader, module)| {
                let mut info = vk::PipelineShaderStageCreateInfo::default()
                    .stage(shader.stage)
                    .module(module.handle())
                    .name(c"main");
                if !key.specialization.is_empty() {
                    info = info.specialization_info(&spec_info);
                }
                info
            })
            .collect();

        // group 顺序与 stage 顺序一致：raygen 与 miss 是 general group，hit 是 triangles group
        let mut miss_count = 0u32;
        let mut hit_count = 0u32;
        let groups: Vec<vk::RayTracingShaderGroupCreateInfoKHR> = compiled
            .iter()
            .enumerate()
            .map(|(index, shader)| {
                let unused = GfxShaderGroupInfo::unused();
                match shader.stage {
                    vk::ShaderStageFlags::RAYGEN_KHR | vk::ShaderStageFlags::MISS_KHR => {
                        if shader.stage == vk::ShaderStageFlags::MISS_KHR {
                            miss_count += 1;
                        }
                        vk::RayTracingShaderGroupCreateInfoKHR::default()
                            .ty(vk::RayTracingShaderGroupTypeKHR::GENERAL)
                            .general_shader(index as u32)
                            .closest_hit_shader(unused.closest_hit)
                            .any_hit_shader(unused.any_hit)
                            .intersection_shader(unused.intersection)
                    }
                    _ => {
                        hit_count += 1;
                        vk::RayTracingShaderGroupCreateInfoKHR::default()
                            .ty(vk::RayTracingShaderGroupTypeKHR::TRIANGLES_HIT_GROUP)
                            .general_shader(vk::SHADER_UNUSED_KHR)
                            .closest_hit_shader(index as u32)
                            .any_hit_shader(unused.any_hit)
                            .intersection_shader(unused.intersection)
                    }
                }
            })
            .collect();

        let create_info = vk::RayTracingPipelineCreateInfoKHR::default()
            .stages(&stages)
            .groups(&groups)
            .max_pipeline_ray_recursion_depth(max_recursion_depth)
            .layout(layouts.pipeline_layout);
        let pipeline = unsafe {
            Gfx::get()
                .gfx_device()
                .ray_tracing_pipeline()
                .create_ray_tracing_pipelines(
                    vk::DeferredOperationKHR::null(),
                    vk::PipelineCache::null(),
                    &[create_info],
                    None,
                )
                .map_err(|(_, err)| err)
                .with_context(|| format!("create ray tracing pipeline {} failed", key.name))?[0]
        };
        for module in modules {
            module.destroy();
        }
        Gfx::get().gfx_device().set_object_debug_name(pipeline, &key.name);

        let update_template = layouts.create_template(&layout_info, vk::PipelineBindPoint::RAY_TRACING_KHR)?;
        let sbt = SbtRegions::new(pipeline, miss_count, hit_count, &format!("{}-sbt", key.name))?;

        Ok(Self {
            name: key.name.clone(),
            bind_point: vk::PipelineBindPoint::RAY_TRACING_KHR,
            pipeline,
            pipeline_layout: layouts.pipeline_layout,
            set_layout: layouts.set_layout,
            update_template,
            layout_info,
            tlas_binding: layouts.tlas_binding,
            sbt: Some(sbt),
            sources,
        })
    }

    fn create_graphics(
        compiler: &ShaderCompiler,
        key: &PipelineKey,
        color_formats: &[vk::Format],
    ) -> anyhow::Result<Self> {
        let [vertex_path, fragment_path] = &key.shader_paths[..] else {
            bail!("graphics pipeline {} needs exactly a vertex and a fragment shader", key.name);
        };
        let vertex = compiler.compile(std::path::Path::new(vertex_path))?;
        let fragment = compiler.compile(std::path::Path::new(fragment_path))?;
        let reflections = [
            StageReflection::reflect(&vertex.spv, vk::ShaderStageFlags::VERTEX)?,
            StageReflection::reflect(&fragment.spv, vk::ShaderStageFlags::FRAGMENT)?,
        ];
        let layout_info = merge_stages(&reflections)?;
        if layout_info.has_tlas {
            bail!("graphics pipeline {} declares a TLAS, only ray tracing pipelines may", key.name);
        }

        let layouts = PipelineLayouts::new(&layout_info, &key.name)?;

        let vertex_module = GfxShaderModule::from_spirv(&vertex.spv, vertex_path);
        let fragment_module = GfxShaderModule::from_spirv(&fragment.spv, fragment_path);

        let spec_entries = specialization_entries(&key.specialization);
        let spec_data: &[u8] = bytemuck::cast_slice(&key.specialization);
        let spec_info = vk::SpecializationInfo::default().map_entries(&spec_entries).data(spec_data);

        let stages: Vec<vk::PipelineShaderStageCreateInfo> = [
            (vk::ShaderStageFlags::VERTEX, vertex_module.handle()),
            (vk::ShaderStageFlags::FRAGMENT, fragment_module.handle()),
        ]
        .into_iter()
        .map(|(stage, module)| {
            let mut info = vk::PipelineShaderStageCreateInfo::default().stage(stage).module(module).name(c"main");
            if !key.specialization.is_empty() {
                info = info.specialization_info(&spec_info);
            }
            info
        })
        .collect();

        // dynamic rendering + 动态 viewport/scissor，固定功能都取最简状态
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::default();
        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(vk::PrimitiveTopology::TRIANGLE_LIST);
        let viewport_state = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);
        let rasterization = vk::PipelineRasterizationStateCreateInfo::default()
            .polygon_mode(vk::PolygonMode::FILL)
            .cull_mode(vk::CullModeFlags::NONE)
            .front_face(vk::FrontFace::COUNTER_CLOCKWISE)
            .line_width(1.0);
        let multisample = vk::PipelineMultisampleStateCreateInfo::default()
            .rasterization_samples(vk::SampleCountFlags::TYPE_1);
        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = color_formats
            .iter()
            .map(|_| vk::PipelineColorBlendAttachmentState::default().color_write_mask(vk::ColorComponentFlags::RGBA))
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::default().attachments(&blend_attachments);
        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic_state = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&dynamic_states);
        let mut rendering_info =
            vk::PipelineRenderingCreateInfo::default().color_attachment_formats(color_formats);

        let create_info = vk::GraphicsPipelineCreateInfo::default()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic_state)
            .layout(layouts.pipeline_layout)
            .push_next(&mut rendering_info);
        let pipeline = unsafe {
            Gfx::get()
                .gfx_device()
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map_err(|(_, err)| err)
                .with_context(|| format!("create graphics pipeline {} failed", key.name))?[0]
        };
        vertex_module.destroy();
        fragment_module.destroy();
        Gfx::get().gfx_device().set_object_debug_name(pipeline, &key.name);

        let update_template = layouts.create_template(&layout_info, vk::PipelineBindPoint::GRAPHICS)?;

        Ok(Self {
            name: key.name.clone(),
            bind_point: vk::PipelineBindPoint::GRAPHICS,
            pipeline,
            pipeline_layout: layouts.pipeline_layout,
            set_layout: layouts.set_layout,
            update_template,
            layout_info,
            tlas_binding: layouts.tlas_binding,
            sbt: None,
            sources: vec![
                (PathBuf::from(vertex_path), vertex.source_mtime),
                (PathBuf::from(fragment_path), fragment.source_mtime),
            ],
        })
    }
}

// getters
impl Pipeline {
    #[inline]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[inline]
    pub fn bind_point(&self) -> vk::PipelineBindPoint {
        self.bind_point
    }

    #[inline]
    pub fn vk_pipeline(&self) -> vk::Pipeline {
        self.pipeline
    }

    #[inline]
    pub fn vk_pipeline_layout(&self) -> vk::PipelineLayout {
        self.pipeline_layout
    }

    #[inline]
    pub fn update_template(&self) -> vk::DescriptorUpdateTemplate {
        self.update_template
    }

    #[inline]
    pub fn layout_info(&self) -> &PipelineLayoutInfo {
        &self.layout_info
    }

    #[inline]
    pub fn sbt(&self) -> Option<&SbtRegions> {
        self.sbt.as_ref()
    }
}

// tools
impl Pipeline {
    /// 任一源文件比编译时新则过期
    pub fn is_stale(&self) -> bool {
        self.sources.iter().any(|(path, compiled_at)| {
            ShaderCompiler::source_mtime(path).is_ok_and(|mtime| mtime > *compiled_at)
        })
    }

    /// 把 TLAS 写入持久 set 并返回它，只有 RT pipeline 才有
    pub fn bind_tlas(&mut self, tlas: vk::AccelerationStructureKHR) -> Option<vk::DescriptorSet> {
        self.tlas_binding.as_mut().map(|binding| {
            binding.update(tlas);
            binding.set
        })
    }

    pub fn destroy(self) {
        let device = Gfx::get().gfx_device();
        unsafe {
            device.destroy_pipeline(self.pipeline, None);
            device.destroy_pipeline_layout(self.pipeline_layout, None);
            device.destroy_descriptor_update_template(self.update_template, None);
            device.destroy_descriptor_set_layout(self.set_layout, None);
        }
        if let Some(binding) = self.tlas_binding {
            binding.destroy();
        }
        if let Some(sbt) = self.sbt {
            sbt.destroy();
        }
    }
}

/// set layout / pipeline layout / TLAS set 的创建辅助
struct PipelineLayouts {
    set_layout: vk::DescriptorSetLayout,
    pipeline_layout: vk::PipelineLayout,
    tlas_binding: Option<TlasBinding>,
}

impl PipelineLayouts {
    fn new(layout_info: &PipelineLayoutInfo, debug_name: &str) -> anyhow::Result<Self> {
        let device = Gfx::get().gfx_device();

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = layout_info
            .bindings
            .iter()
            .map(|b| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(b.binding)
                    .descriptor_type(b.descriptor_type)
                    .descriptor_count(b.count)
                    .stage_flags(b.stages)
            })
            .collect();
        let set_layout = unsafe {
            device
                .create_descriptor_set_layout(
                    &vk::DescriptorSetLayoutCreateInfo::default()
                        .bindings(&bindings)
                        .flags(vk::DescriptorSetLayoutCreateFlags::PUSH_DESCRIPTOR_KHR),
                    None,
                )
                .with_context(|| format!("create set layout for {debug_name} failed"))?
        };

        let tlas_binding = if layout_info.has_tlas {
            Some(TlasBinding::new(layout_info.tlas_stages, debug_name)?)
        } else {
            None
        };

        let mut set_layouts = vec![set_layout];
        if let Some(binding) = &tlas_binding {
            debug_assert_eq!(set_layouts.len() as u32, TLAS_SET);
            set_layouts.push(binding.set_layout);
        }

        let push_constant_ranges = [vk::PushConstantRange {
            stage_flags: layout_info.push_constant_stages,
            offset: 0,
            size: layout_info.push_constant_size,
        }];
        let mut layout_create_info = vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts);
        if layout_info.push_constant_size > 0 {
            layout_create_info = layout_create_info.push_constant_ranges(&push_constant_ranges);
        }
        let pipeline_layout = unsafe {
            device
                .create_pipeline_layout(&layout_create_info, None)
                .with_context(|| format!("create pipeline layout for {debug_name} failed"))?
        };

        Ok(Self {
            set_layout,
            pipeline_layout,
            tlas_binding,
        })
    }

    fn create_template(
        &self,
        layout_info: &PipelineLayoutInfo,
        bind_point: vk::PipelineBindPoint,
    ) -> anyhow::Result<vk::DescriptorUpdateTemplate> {
        let (entries, _slots) = template_entries(&layout_info.bindings);
        let create_info = vk::DescriptorUpdateTemplateCreateInfo::default()
            .descriptor_update_entries(&entries)
            .template_type(vk::DescriptorUpdateTemplateType::PUSH_DESCRIPTORS_KHR)
            .descriptor_set_layout(self.set_layout)
            .pipeline_bind_point(bind_point)
            .pipeline_layout(self.pipeline_layout)
            .set(0);
        unsafe {
            Gfx::get()
                .gfx_device()
                .create_descriptor_update_template(&create_info, None)
                .context("create descriptor update template failed")
        }
    }
}

fn specialization_entries(values: &[u32]) -> Vec<vk::SpecializationMapEntry> {
    values
        .iter()
        .enumerate()
        .map(|(index, _)| vk::SpecializationMapEntry {
            constant_id: index as u32,
            offset: (index * size_of::<u32>()) as u32,
            size: size_of::<u32>(),
        })
        .collect()
}

/// 跨帧的 pipeline 缓存
///
/// reset 永远不会清空缓存；热重载通过 mark_all_stale 触发逐个重建
#[derive(Default)]
pub struct PipelineCache {
    pipelines: HashMap<PipelineKey, Pipeline>,
    rebuild_all: bool,
}

impl PipelineCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// 取出或创建 pipeline；过期的 pipeline 先重建
    ///
    /// 重建失败时保留旧 pipeline 继续使用
    pub fn get_or_create(
        &mut self,
        compiler: &ShaderCompiler,
        key: &PipelineKey,
        kind: &PassKind,
    ) -> anyhow::Result<&mut Pipeline> {
        let needs_rebuild = match self.pipelines.get(key) {
            Some(pipeline) => self.rebuild_all && pipeline.is_stale(),
            None => false,
        };

        if needs_rebuild {
            match Pipeline::create(compiler, key, kind) {
                Ok(new_pipeline) => {
                    log::info!("reloaded pipeline {}", key.name);
                    if let Some(old) = self.pipelines.insert(key.clone(), new_pipeline) {
                        old.destroy();
                    }
                }
                Err(err) => {
                    // 保留旧 pipeline，下次 mark_all_stale 时再尝试
                    log::error!("reload of pipeline {} failed, keeping previous version: {err:#}", key.name);
                }
            }
        }

        if !self.pipelines.contains_key(key) {
            let pipeline = Pipeline::create(compiler, key, kind)?;
            self.pipelines.insert(key.clone(), pipeline);
        }
        Ok(self.pipelines.get_mut(key).unwrap())
    }

    /// 已经存在的 pipeline，录制阶段使用
    pub fn get_mut(&mut self, key: &PipelineKey) -> Option<&mut Pipeline> {
        self.pipelines.get_mut(key)
    }

    /// 热重载入口：下一次取用时检查每个 pipeline 的源文件
    pub fn mark_all_stale(&mut self) {
        self.rebuild_all = true;
    }

    /// 重载检查完成后复位
    pub fn clear_stale_mark(&mut self) {
        self.rebuild_all = false;
    }

    pub fn destroy(self) {
        for (_, pipeline) in self.pipelines {
            pipeline.destroy();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[test]
    fn test_pipeline_key_identity() {
        let a = PipelineKey {
            name: "sum".into(),
            shader_paths: vec!["sum.comp".into()],
            specialization: vec![64],
            descriptor_counts: Vec::new(),
        };
        let b = a.clone();
        let c = PipelineKey {
            specialization: vec![128],
            ..a.clone()
        };

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
        assert!(!set.contains(&c));
        set.insert(c);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_template_entries_layout() {
        let stride = size_of::<DescriptorData>();
        let bindings = vec![
            BindingInfo {
                binding: 0,
                descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
                count: 1,
                stages: vk::ShaderStageFlags::COMPUTE,
                reads: true,
                writes: false,
            },
            BindingInfo {
                binding: 1,
                descriptor_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                count: 4,
                stages: vk::ShaderStageFlags::COMPUTE,
                reads: true,
                writes: false,
            },
            BindingInfo {
                binding: 3,
                descriptor_type: vk::DescriptorType::STORAGE_BUFFER,
                count: 1,
                stages: vk::ShaderStageFlags::COMPUTE,
                reads: true,
                writes: true,
            },
        ];

        let (entries, slots) = template_entries(&bindings);
        assert_eq!(slots, 6);
        assert_eq!(entries.len(), 3);

        assert_eq!(entries[0].offset, 0);
        assert_eq!(entries[1].offset, stride);
        assert_eq!(entries[1].descriptor_count, 4);
        // 数组占了 4 个槽位，下一个 binding 从第 5 个槽开始
        assert_eq!(entries[2].offset, 5 * stride);
        assert_eq!(entries[2].stride, stride);
    }

    #[test]
    fn test_reload_gate_waits_for_recording() {
        let gate = Arc::new(ReloadGate::new());
        let reloaded = Arc::new(AtomicBool::new(false));

        gate.begin_recording();

        let reloader = {
            let gate = gate.clone();
            let reloaded = reloaded.clone();
            std::thread::spawn(move || {
                gate.reload(|| {
                    reloaded.store(true, Ordering::SeqCst);
                });
            })
        };

        // 录制仍在进行，重载必须还没发生
        std::thread::sleep(std::time::Duration::from_millis(50));
        assert!(!reloaded.load(Ordering::SeqCst));

        gate.end_recording();
        reloader.join().unwrap();
        assert!(reloaded.load(Ordering::SeqCst));
    }

    #[test]
    fn test_reload_gate_nested_recordings() {
        let gate = ReloadGate::new();
        gate.begin_recording();
        gate.begin_recording();
        gate.end_recording();
        gate.end_recording();
        // 所有录制都结束后，重载立即执行
        let ran = gate.reload(|| true);
        assert!(ran);
    }
}
