use ash::vk;
use vk_mem::Alloc;

use crate::{debug::DebugType, error::GfxError};

/// 每帧复用的 uniform 流缓冲
///
/// 以 bump 的方式分配，帧开始时整体 reset。常驻映射，写入之后立即 flush。
pub struct UniformStreamBuffer {
    handle: vk::Buffer,
    allocation: vk_mem::Allocation,
    size: vk::DeviceSize,
    cursor: vk::DeviceSize,
    map_ptr: *mut u8,
}
impl DebugType for UniformStreamBuffer {
    fn debug_type_name() -> &'static str {
        "UniformStreamBuffer"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
// new & init
impl UniformStreamBuffer {
    pub fn new(allocator: &vk_mem::Allocator, size: vk::DeviceSize) -> Result<Self, GfxError> {
        let buffer_ci = vk::BufferCreateInfo::default().size(size).usage(vk::BufferUsageFlags::UNIFORM_BUFFER);
        let alloc_ci = vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags: vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            ..Default::default()
        };

        let (handle, mut allocation) = unsafe {
            allocator.create_buffer(&buffer_ci, &alloc_ci).map_err(|result| GfxError::OutOfMemory {
                what: format!("uniform stream buffer ({size} bytes)"),
                result,
            })?
        };
        let map_ptr = match unsafe { allocator.map_memory(&mut allocation) } {
            Ok(ptr) => ptr,
            Err(result) => {
                unsafe { allocator.destroy_buffer(handle, &mut allocation) };
                return Err(GfxError::vulkan("vmaMapMemory")(result));
            }
        };

        Ok(Self {
            handle,
            allocation,
            size,
            cursor: 0,
            map_ptr,
        })
    }

    pub fn destroy(mut self, allocator: &vk_mem::Allocator) {
        unsafe {
            allocator.unmap_memory(&mut self.allocation);
            allocator.destroy_buffer(self.handle, &mut self.allocation);
        }
    }
}
// getters
impl UniformStreamBuffer {
    #[inline]
    pub fn vk_buffer(&self) -> vk::Buffer {
        self.handle
    }

    #[inline]
    pub fn size(&self) -> vk::DeviceSize {
        self.size
    }
}
// tools
impl UniformStreamBuffer {
    /// 写入一段数据，返回其在 buffer 中的 offset；空间不足时返回 None
    pub fn write(
        &mut self,
        allocator: &vk_mem::Allocator,
        data: &[u8],
        alignment: vk::DeviceSize,
    ) -> Result<Option<vk::DeviceSize>, GfxError> {
        let offset = self.cursor.next_multiple_of(alignment.max(1));
        let len = data.len() as vk::DeviceSize;
        if offset + len > self.size {
            return Ok(None);
        }

        unsafe {
            std::ptr::copy_nonoverlapping(data.as_ptr(), self.map_ptr.add(offset as usize), data.len());
        }
        allocator
            .flush_allocation(&self.allocation, offset, len)
            .map_err(GfxError::vulkan("vmaFlushAllocation"))?;

        self.cursor = offset + len;
        Ok(Some(offset))
    }

    #[inline]
    pub fn reset(&mut self) {
        self.cursor = 0;
    }
}
