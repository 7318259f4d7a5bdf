use ash::vk;

use crate::gfx_core::GfxCore;
use crate::{
    commands::{command_pool::GfxCommandPool, command_queue::GfxCommandQueue},
    foundation::{device::GfxDevice, instance::GfxInstance, physical_device::GfxPhysicalDevice},
};

/// Vulkan 图形上下文单例
///
/// 管理所有 Vulkan 核心资源，包括实例、设备、队列等。
/// 采用单例模式简化参数传递和生命周期管理，仅适用于单线程环境。
///
/// # 初始化流程
/// ```ignore
/// Gfx::init("MyApp".to_string());
/// let device = Gfx::get().gfx_device();
/// // 使用...
/// Gfx::destroy();
/// ```
pub struct Gfx {
    pub(crate) gfx_core: GfxCore,

    /// 默认的 graphics command pool，渲染用的 command buffer 都由它分配
    pub(crate) graphics_command_pool: GfxCommandPool,
}

// 创建与销毁
impl Gfx {
    const ENGINE_NAME: &'static str = "Lumira";

    fn new(app_name: String) -> Self {
        let vk_ctx = GfxCore::new(app_name, Self::ENGINE_NAME.to_string());

        // 注意：在初始化过程中，需要使用传统的参数传递方式，因为单例还没有被初始化
        let gfx_command_pool = GfxCommandPool::new_internal(
            vk_ctx.gfx_device.clone(),
            vk_ctx.physical_device.gfx_queue_family.clone(),
            vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER,
            "gfx-graphics",
        );

        Self {
            gfx_core: vk_ctx,
            graphics_command_pool: gfx_command_pool,
        }
    }
}

// 注意：此静态变量仅用于单线程环境，符合项目要求
static mut G_GFX: Option<Gfx> = None;

// 单例模式
// - Gfx 自身的生命周期管理比较简单，因此适合使用单例模式
// - 让代码变得简单，不再需要考虑复杂的借用规则
// - 其他类的类型签名也会变得更简单
impl Gfx {
    /// 获取单例实例
    ///
    /// # Panics
    /// 如果 Gfx 还未初始化，此方法会 panic
    ///
    /// # Safety
    /// 此方法仅在单线程环境下安全
    #[inline]
    pub fn get() -> &'static Gfx {
        unsafe {
            // 使用 addr_of! 避免直接对 static mut 创建引用，编译器不允许这种行为
            let ptr = std::ptr::addr_of!(G_GFX);
            (*ptr).as_ref().expect("Gfx not initialized. Call Gfx::init() first.")
        }
    }

    /// 初始化 Gfx 单例
    ///
    /// # Panics
    /// 如果 Gfx 已经被初始化，此方法会 panic
    ///
    /// # Safety
    /// 此方法仅在单线程环境下安全
    pub fn init(app_name: String) {
        unsafe {
            // 使用 addr_of_mut! 避免直接对 static mut 创建可变引用
            let ptr = std::ptr::addr_of_mut!(G_GFX);
            assert!((*ptr).is_none(), "Gfx already initialized");
            *ptr = Some(Self::new(app_name));
        }
    }

    /// 销毁 Gfx 单例
    ///
    /// # Safety
    /// 调用此方法后，不应再使用 Gfx::get()
    /// 此方法仅在单线程环境下安全
    pub fn destroy() {
        unsafe {
            // 使用 addr_of_mut! 避免直接对 static mut 创建可变引用
            let ptr = std::ptr::addr_of_mut!(G_GFX);
            let context = (*ptr).take().expect("Gfx not initialized");

            context.graphics_command_pool.destroy_internal(&context.gfx_core.gfx_device);
            context.gfx_core.destroy();
        }
    }
}

// getter
impl Gfx {
    #[inline]
    pub fn instance(&self) -> &GfxInstance {
        &self.gfx_core.instance
    }

    #[inline]
    pub fn gfx_device(&self) -> &GfxDevice {
        &self.gfx_core.gfx_device
    }

    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.gfx_core.physical_device
    }

    #[inline]
    pub fn gfx_queue(&self) -> &GfxCommandQueue {
        &self.gfx_core.gfx_queue
    }

    #[inline]
    pub fn graphics_command_pool(&self) -> &GfxCommandPool {
        &self.graphics_command_pool
    }

    #[inline]
    pub fn rt_pipeline_props(&self) -> &vk::PhysicalDeviceRayTracingPipelinePropertiesKHR<'_> {
        &self.gfx_core.physical_device.rt_pipeline_props
    }
}

// tools
impl Gfx {
    pub fn wait_idle(&self) {
        unsafe {
            self.gfx_device().device_wait_idle().unwrap();
        }
    }
}
