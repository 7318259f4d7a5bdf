//! 外部资源的注册与标识
//!
//! render graph 不拥有资源，只持有调用方注册进来的句柄。
//! buffer 的身份由 device address 决定，image / tlas 由各自的 handle 决定。

use std::collections::HashMap;

use ash::vk;
use ash::vk::Handle;

use crate::access::ResourceId;

/// 调用方拥有的 buffer
///
/// device address 是它在 graph 中的身份，shader 中通过地址间接引用的
/// buffer 也能借此被解析回来
#[derive(Clone, Copy, Debug)]
pub struct BufferResource {
    buffer: vk::Buffer,
    device_address: vk::DeviceAddress,
    size: vk::DeviceSize,
}

impl BufferResource {
    pub fn new(buffer: vk::Buffer, device_address: vk::DeviceAddress, size: vk::DeviceSize) -> Self {
        Self { buffer, device_address, size }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        ResourceId(self.device_address)
    }

    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn device_address(&self) -> vk::DeviceAddress {
        self.device_address
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}

/// 调用方拥有的 image + image view
///
/// graph 内统一使用 GENERAL layout（storage 读写），采样读取时转换到只读 layout
#[derive(Clone, Copy, Debug)]
pub struct TextureResource {
    image: vk::Image,
    view: vk::ImageView,
}

impl TextureResource {
    pub fn new(image: vk::Image, view: vk::ImageView) -> Self {
        Self { image, view }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        ResourceId(self.image.as_raw())
    }

    #[inline]
    pub fn vk_image(&self) -> vk::Image {
        self.image
    }

    #[inline]
    pub fn vk_view(&self) -> vk::ImageView {
        self.view
    }
}

/// 调用方拥有的 top-level 加速结构
#[derive(Clone, Copy, Debug)]
pub struct TlasResource {
    handle: vk::AccelerationStructureKHR,
}

impl TlasResource {
    pub fn new(handle: vk::AccelerationStructureKHR) -> Self {
        Self { handle }
    }

    #[inline]
    pub fn id(&self) -> ResourceId {
        ResourceId(self.handle.as_raw())
    }

    #[inline]
    pub fn vk_handle(&self) -> vk::AccelerationStructureKHR {
        self.handle
    }
}

/// 地址 -> buffer 的注册表
///
/// shader 经常通过 uniform 中嵌入的 device address 间接引用 buffer，
/// 这类引用无法从 descriptor 绑定中发现。调用方通过
/// [`ResourceRegistry::register_buffer_address`] 把地址写进自己的结构体字段，
/// 同时在注册表中留下记录，pass 就可以用 `bind_indirect` 声明这种依赖。
#[derive(Default)]
pub struct ResourceRegistry {
    buffers: HashMap<vk::DeviceAddress, BufferResource>,
}

impl ResourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把 buffer 的 device address 写入 field，并记录该地址对应的 buffer
    pub fn register_buffer_address(&mut self, field: &mut vk::DeviceAddress, resource: &BufferResource) {
        *field = resource.device_address();
        self.buffers.insert(resource.device_address(), *resource);
    }

    /// 直接记录一个 buffer，不写任何字段
    pub fn register_buffer(&mut self, resource: &BufferResource) {
        self.buffers.insert(resource.device_address(), *resource);
    }

    #[inline]
    pub fn resolve(&self, address: vk::DeviceAddress) -> Option<&BufferResource> {
        self.buffers.get(&address)
    }

    pub fn clear(&mut self) {
        self.buffers.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_buffer_address() {
        let mut registry = ResourceRegistry::new();
        let buffer = BufferResource::new(vk::Buffer::from_raw(0x1000), 0xdead_beef, 256);

        let mut field = vk::DeviceAddress::default();
        registry.register_buffer_address(&mut field, &buffer);

        assert_eq!(field, 0xdead_beef);
        let resolved = registry.resolve(0xdead_beef).unwrap();
        assert_eq!(resolved.vk_buffer(), buffer.vk_buffer());
        assert_eq!(resolved.size(), 256);
        assert!(registry.resolve(0x1234).is_none());
    }

    #[test]
    fn test_resource_identity() {
        let a = BufferResource::new(vk::Buffer::from_raw(1), 100, 64);
        let b = BufferResource::new(vk::Buffer::from_raw(2), 100, 64);
        // 身份由 device address 决定，而不是 vk handle
        assert_eq!(a.id(), b.id());

        let t = TextureResource::new(vk::Image::from_raw(7), vk::ImageView::from_raw(8));
        assert_eq!(t.id(), ResourceId(7));
    }
}
